//! 聚合策略实现
//!
//! 所有函数只处理成功的分片结果，且输出仅由输入决定 (不读取时钟)。

use std::cmp::Ordering;
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::hash::{Hash, Hasher};

use serde_json::{json, Value};

use super::result::{FieldStatistics, SourceContribution, StrategyDetails};
use crate::query::Record;
use crate::shard::{ShardResult, StorageTier};

/// 去重键优先级
const DEDUP_KEYS: [&str; 3] = ["id", "email", "token"];
/// 时间字段优先级
const TIME_FIELDS: [&str; 3] = ["timestamp", "created_at", "date"];
/// 交叉引用键优先级 (userId › token › sessionId)
const REFERENCE_KEYS: [(&str, &str); 5] = [
    ("userId", "user_id"),
    ("user_id", "user_id"),
    ("token", "token"),
    ("sessionId", "session_id"),
    ("session_id", "session_id"),
];
/// 无状态信息时的默认可靠性
const DEFAULT_RELIABILITY: f64 = 0.95;

/// 策略输出
#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutput {
    pub data: Vec<Record>,
    pub details: StrategyDetails,
}

impl MergeOutput {
    fn plain(data: Vec<Record>) -> Self {
        Self {
            data,
            details: StrategyDetails::None,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// merge / deduplicate / prioritize-hot / time-ordered
// ═══════════════════════════════════════════════════════════════════════════

pub fn merge(results: &[&ShardResult]) -> MergeOutput {
    MergeOutput::plain(concat(results))
}

fn concat(results: &[&ShardResult]) -> Vec<Record> {
    results.iter().flat_map(|r| r.data.iter().cloned()).collect()
}

/// 去重键：id › email › token › 结构哈希
pub fn dedup_key(record: &Record) -> String {
    for field in DEDUP_KEYS {
        match record.get(field) {
            Some(Value::Null) | None => continue,
            Some(value) => return format!("{}:{}", field, normalize(value)),
        }
    }
    let mut hasher = DefaultHasher::new();
    // 默认的 serde_json::Map 按键排序，序列化结果是规范形式
    serde_json::to_string(record)
        .unwrap_or_default()
        .hash(&mut hasher);
    format!("hash:{:016x}", hasher.finish())
}

/// 字符串与数字 "42" / 42 视为同一个键
fn normalize(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub fn deduplicate(results: &[&ShardResult]) -> MergeOutput {
    let merged = concat(results);
    let before = merged.len();
    let mut seen = HashSet::new();
    let data: Vec<Record> = merged
        .into_iter()
        .filter(|r| seen.insert(dedup_key(r)))
        .collect();

    MergeOutput {
        details: StrategyDetails::Deduplicated {
            duplicates_removed: before - data.len(),
        },
        data,
    }
}

/// 热存储 / 低延迟分片的结果排在前面
pub fn prioritize_hot<F>(results: &[&ShardResult], tier_of: F) -> MergeOutput
where
    F: Fn(&str) -> Option<StorageTier>,
{
    let rank = |tier: Option<StorageTier>| match tier {
        Some(StorageTier::Hot) => 0u8,
        Some(StorageTier::Warm) | None => 1,
        Some(StorageTier::Cold) => 2,
    };

    let mut ordered: Vec<&ShardResult> = results.to_vec();
    ordered.sort_by(|a, b| {
        rank(tier_of(&a.shard_id))
            .cmp(&rank(tier_of(&b.shard_id)))
            .then_with(|| b.cache_hit.cmp(&a.cache_hit))
            .then_with(|| a.query_time_ms.cmp(&b.query_time_ms))
            .then_with(|| a.shard_id.cmp(&b.shard_id))
    });

    MergeOutput {
        details: StrategyDetails::Prioritized {
            shard_order: ordered.iter().map(|r| r.shard_id.clone()).collect(),
        },
        data: concat(&ordered),
    }
}

#[derive(Debug, Clone, PartialEq)]
enum TimeKey {
    Number(f64),
    Text(String),
}

fn time_key(record: &Record) -> Option<TimeKey> {
    TIME_FIELDS.iter().find_map(|field| match record.get(*field)? {
        Value::Number(n) => n.as_f64().map(TimeKey::Number),
        Value::String(s) => Some(TimeKey::Text(s.clone())),
        _ => None,
    })
}

/// 数值时间戳排在文本之前；缺少时间字段的记录排在最后
fn compare_time_desc(a: &Option<TimeKey>, b: &Option<TimeKey>) -> Ordering {
    match (a, b) {
        (Some(TimeKey::Number(x)), Some(TimeKey::Number(y))) => {
            y.partial_cmp(x).unwrap_or(Ordering::Equal)
        }
        (Some(TimeKey::Text(x)), Some(TimeKey::Text(y))) => y.cmp(x),
        (Some(TimeKey::Number(_)), Some(TimeKey::Text(_))) => Ordering::Less,
        (Some(TimeKey::Text(_)), Some(TimeKey::Number(_))) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// 按时间降序；同一时间按 (shard_id, 原始位置) 排序，与分片完成顺序无关
pub fn time_ordered(results: &[&ShardResult]) -> MergeOutput {
    let mut rows: Vec<(Option<TimeKey>, &str, usize, &Record)> = results
        .iter()
        .flat_map(|r| {
            r.data
                .iter()
                .enumerate()
                .map(move |(i, rec)| (time_key(rec), r.shard_id.as_str(), i, rec))
        })
        .collect();

    rows.sort_by(|a, b| {
        compare_time_desc(&a.0, &b.0)
            .then_with(|| a.1.cmp(b.1))
            .then_with(|| a.2.cmp(&b.2))
    });

    MergeOutput::plain(rows.into_iter().map(|(_, _, _, rec)| rec.clone()).collect())
}

// ═══════════════════════════════════════════════════════════════════════════
// weighted-average / statistical-summary
// ═══════════════════════════════════════════════════════════════════════════

/// 分片权重：可靠性 × 延迟因子 × 缓存因子 × 数据量因子
pub fn shard_weight(result: &ShardResult, reliability: f64) -> f64 {
    let latency = 1.0 / (1.0 + result.query_time_ms as f64 / 1000.0);
    let cache = if result.cache_hit { 1.1 } else { 1.0 };
    let size = 0.5 + 0.5 * (result.record_count as f64 / 100.0).min(1.0);
    reliability.clamp(0.0, 1.0) * latency * cache * size
}

fn numeric_fields(record: &Record) -> impl Iterator<Item = (&String, f64)> {
    record
        .iter()
        .filter_map(|(k, v)| v.as_f64().map(|x| (k, x)))
}

pub fn weighted_average<F>(results: &[&ShardResult], reliability_of: F) -> MergeOutput
where
    F: Fn(&str) -> Option<f64>,
{
    let weights: Vec<(String, f64)> = results
        .iter()
        .map(|r| {
            let reliability = reliability_of(&r.shard_id).unwrap_or(DEFAULT_RELIABILITY);
            (r.shard_id.clone(), shard_weight(r, reliability))
        })
        .collect();

    // field -> (Σ w·v, Σ w)
    let mut sums: BTreeMap<String, (f64, f64)> = BTreeMap::new();
    for (result, (_, weight)) in results.iter().zip(weights.iter()) {
        for record in &result.data {
            for (field, value) in numeric_fields(record) {
                let entry = sums.entry(field.clone()).or_insert((0.0, 0.0));
                entry.0 += weight * value;
                entry.1 += weight;
            }
        }
    }

    let mut averaged = Record::new();
    for (field, (weighted, total)) in sums {
        if total > 0.0 {
            averaged.insert(field, json!(weighted / total));
        }
    }

    let total_weight: f64 = weights.iter().map(|(_, w)| w).sum();
    let confidence = if results.is_empty() {
        0.0
    } else {
        (total_weight / results.len() as f64).min(1.0)
    };

    let data = if averaged.is_empty() { Vec::new() } else { vec![averaged] };
    MergeOutput {
        data,
        details: StrategyDetails::Weighted {
            weights,
            total_weight,
            confidence,
        },
    }
}

fn statistics(mut values: Vec<f64>) -> FieldStatistics {
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    let count = values.len();
    let sum: f64 = values.iter().sum();
    let median = if count % 2 == 1 {
        values[count / 2]
    } else {
        (values[count / 2 - 1] + values[count / 2]) / 2.0
    };
    FieldStatistics {
        count,
        sum,
        avg: sum / count as f64,
        min: values[0],
        max: values[count - 1],
        median,
    }
}

pub fn statistical_summary(results: &[&ShardResult]) -> MergeOutput {
    let mut values: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    for result in results {
        for record in &result.data {
            for (field, value) in numeric_fields(record) {
                values.entry(field.clone()).or_default().push(value);
            }
        }
    }

    let fields: BTreeMap<String, FieldStatistics> = values
        .into_iter()
        .filter(|(_, v)| !v.is_empty())
        .map(|(k, v)| (k, statistics(v)))
        .collect();

    let total: usize = results.iter().map(|r| r.data.len()).sum();
    let contributions = results
        .iter()
        .map(|r| SourceContribution {
            shard_id: r.shard_id.clone(),
            record_count: r.data.len(),
            percentage: if total == 0 {
                0.0
            } else {
                r.data.len() as f64 * 100.0 / total as f64
            },
        })
        .collect();

    let mut summary = Record::new();
    for (field, stats) in &fields {
        summary.insert(field.clone(), serde_json::to_value(stats).unwrap_or(Value::Null));
    }
    let data = if summary.is_empty() { Vec::new() } else { vec![summary] };

    MergeOutput {
        data,
        details: StrategyDetails::Summary {
            fields,
            contributions,
        },
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// cross-reference
// ═══════════════════════════════════════════════════════════════════════════

fn reference_key(record: &Record) -> Option<(&'static str, String)> {
    REFERENCE_KEYS.iter().find_map(|(field, canonical)| match record.get(*field) {
        Some(Value::Null) | None => None,
        Some(value) => Some((*canonical, normalize(value))),
    })
}

fn is_primary_shard(shard_id: &str) -> bool {
    shard_id.to_ascii_lowercase().contains("primary")
}

struct ReferenceGroup<'a> {
    field: &'static str,
    key: String,
    entries: Vec<(&'a str, &'a Record)>,
}

/// key → {primary, references[]}；主记录优先取自 id 标记为 primary 的分片，否则取最先出现的
pub fn cross_reference(results: &[&ShardResult]) -> MergeOutput {
    let mut groups: Vec<ReferenceGroup<'_>> = Vec::new();
    let mut index: HashMap<(&'static str, String), usize> = HashMap::new();
    let mut unmatched = 0;

    for result in results {
        for record in &result.data {
            let Some((field, key)) = reference_key(record) else {
                unmatched += 1;
                continue;
            };
            let slot = *index.entry((field, key.clone())).or_insert_with(|| {
                groups.push(ReferenceGroup {
                    field,
                    key,
                    entries: Vec::new(),
                });
                groups.len() - 1
            });
            groups[slot].entries.push((result.shard_id.as_str(), record));
        }
    }

    let mut references = 0;
    let data = groups
        .iter()
        .map(|group| {
            let primary = group
                .entries
                .iter()
                .position(|(shard, _)| is_primary_shard(shard))
                .unwrap_or(0);
            let (primary_shard, primary_record) = group.entries[primary];
            let refs: Vec<Value> = group
                .entries
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != primary)
                .map(|(_, (shard, rec))| json!({ "shard_id": shard, "record": rec }))
                .collect();
            references += refs.len();

            let mut out = Record::new();
            out.insert("key".to_string(), json!(group.key));
            out.insert("key_field".to_string(), json!(group.field));
            out.insert("primary_shard".to_string(), json!(primary_shard));
            out.insert("primary".to_string(), Value::Object(primary_record.clone()));
            out.insert("references".to_string(), Value::Array(refs));
            out
        })
        .collect();

    MergeOutput {
        data,
        details: StrategyDetails::CrossReferenced {
            keys: groups.len(),
            references,
            unmatched,
        },
    }
}
