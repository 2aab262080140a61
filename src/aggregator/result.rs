//! 聚合结果结构

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::strategy::AggregationStrategy;
use crate::query::Record;

/// 单个分片的来源信息 (失败的分片也会列出)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceInfo {
    pub shard_id: String,
    pub success: bool,
    pub record_count: usize,
    pub query_time_ms: u64,
    pub cache_hit: bool,
}

/// 数值字段统计
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldStatistics {
    pub count: usize,
    pub sum: f64,
    pub avg: f64,
    pub min: f64,
    pub max: f64,
    pub median: f64,
}

/// 分片贡献占比
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceContribution {
    pub shard_id: String,
    pub record_count: usize,
    pub percentage: f64,
}

/// 策略相关的元数据
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StrategyDetails {
    None,
    Deduplicated {
        duplicates_removed: usize,
    },
    Prioritized {
        shard_order: Vec<String>,
    },
    Weighted {
        /// (shard_id, weight)
        weights: Vec<(String, f64)>,
        total_weight: f64,
        confidence: f64,
    },
    Summary {
        fields: BTreeMap<String, FieldStatistics>,
        contributions: Vec<SourceContribution>,
    },
    CrossReferenced {
        keys: usize,
        references: usize,
        unmatched: usize,
    },
}

/// 聚合元数据
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationMetadata {
    pub strategy: AggregationStrategy,
    pub sources: Vec<SourceInfo>,
    pub successful_shards: usize,
    pub failed_shards: usize,
    /// 成功分片返回的记录总数
    pub input_records: usize,
    /// 聚合后的记录数
    pub output_records: usize,
    pub details: StrategyDetails,
}

/// 失败严重程度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSeverity {
    Warning,
    Error,
    Critical,
}

/// 分片失败记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryError {
    pub shard_id: String,
    pub severity: ErrorSeverity,
    pub message: String,
    /// 建议的处理方式
    pub handling: String,
}

/// 执行洞察
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregationInsights {
    /// 各分片查询耗时之和
    pub total_time_ms: u64,
    pub slow_query: bool,
    pub cache_hits: usize,
    pub slow_shards: Vec<String>,
    pub suggestions: Vec<String>,
}

/// 缓存元数据
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachingMetadata {
    pub key: String,
    pub ttl_ms: u64,
    pub cacheable: bool,
}

/// 聚合结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedResult {
    pub execution_id: String,
    pub query: String,
    pub data: Vec<Record>,
    pub metadata: AggregationMetadata,
    pub insights: AggregationInsights,
    pub errors: Vec<QueryError>,
    pub caching: CachingMetadata,
}

impl AggregatedResult {
    /// 至少一个分片成功
    pub fn success(&self) -> bool {
        self.metadata.successful_shards > 0
    }

    /// 部分分片失败
    pub fn is_partial(&self) -> bool {
        self.success() && !self.errors.is_empty()
    }

    pub fn record_count(&self) -> usize {
        self.data.len()
    }
}
