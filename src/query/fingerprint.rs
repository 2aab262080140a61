//! 查询指纹
//!
//! 对查询的语义内容做稳定哈希，作为缓存键。条件和候选分片先排序，
//! 因此顺序不同但语义相同的查询得到相同指纹。原始文本不参与计算。

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use super::types::InterpretedQuery;

/// 计算查询指纹，格式 `q:<16 位十六进制>`
pub fn fingerprint(query: &InterpretedQuery) -> String {
    let mut hasher = DefaultHasher::new();

    query.data_type.hash(&mut hasher);
    format!("{:?}", query.intent).hash(&mut hasher);

    let mut filters: Vec<String> = query
        .filters
        .iter()
        .map(|f| format!("{}|{:?}|{}", f.field, f.op, f.value))
        .collect();
    filters.sort();
    filters.hash(&mut hasher);

    format!("{:?}", query.temporal).hash(&mut hasher);

    let mut targets = query.target_shard_ids.clone();
    targets.sort();
    targets.hash(&mut hasher);

    query
        .aggregation_strategy_hint
        .map(|s| s.as_str())
        .hash(&mut hasher);

    query.optimization_hints.max_results.hash(&mut hasher);

    format!("q:{:016x}", hasher.finish())
}

/// 对任意文本计算指纹 (用于没有结构化查询时的缓存键)
pub fn fingerprint_text(text: &str) -> String {
    let mut hasher = DefaultHasher::new();
    text.trim().to_lowercase().hash(&mut hasher);
    format!("t:{:016x}", hasher.finish())
}
