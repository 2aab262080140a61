//! 分片查询结果与失败类型

use serde::{Deserialize, Serialize};

use crate::query::{Record, TemporalScope};

/// 分片查询失败
///
/// 失败是结果的一部分，而不是向上传播的错误。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum ShardFailure {
    #[error("timeout")]
    Timeout,

    #[error("network error: {0}")]
    Network(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("shard unavailable: {0}")]
    Unavailable(String),

    #[error("cancelled")]
    Cancelled,

    #[error("skipped: {0}")]
    Skipped(String),

    #[error("{0}")]
    Other(String),
}

impl ShardFailure {
    /// 是否应计入分片可靠性 (取消/跳过不是分片本身的问题)
    pub fn counts_against_shard(&self) -> bool {
        !matches!(self, ShardFailure::Cancelled | ShardFailure::Skipped(_))
    }
}

/// 单个分片的查询结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardResult {
    pub shard_id: String,
    pub success: bool,
    pub data: Vec<Record>,
    pub record_count: usize,
    pub query_time_ms: u64,
    pub cache_hit: bool,
    pub error: Option<ShardFailure>,
    /// 该片段查询的时间范围
    #[serde(default)]
    pub temporal: Option<TemporalScope>,
}

impl ShardResult {
    pub fn success(shard_id: impl Into<String>, data: Vec<Record>, query_time_ms: u64) -> Self {
        Self {
            shard_id: shard_id.into(),
            success: true,
            record_count: data.len(),
            data,
            query_time_ms,
            cache_hit: false,
            error: None,
            temporal: None,
        }
    }

    pub fn failure(shard_id: impl Into<String>, error: ShardFailure, query_time_ms: u64) -> Self {
        Self {
            shard_id: shard_id.into(),
            success: false,
            data: Vec::new(),
            record_count: 0,
            query_time_ms,
            cache_hit: false,
            error: Some(error),
            temporal: None,
        }
    }

    pub fn with_cache_hit(mut self, cache_hit: bool) -> Self {
        self.cache_hit = cache_hit;
        self
    }

    pub fn with_temporal(mut self, temporal: Option<TemporalScope>) -> Self {
        self.temporal = temporal;
        self
    }

    /// 结果数据的近似字节数
    pub fn data_size(&self) -> usize {
        self.data
            .iter()
            .map(|r| serde_json::to_vec(r).map(|v| v.len()).unwrap_or(0))
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_constructors() {
        let rec = json!({"id": 1}).as_object().cloned().unwrap();
        let ok = ShardResult::success("s1", vec![rec], 12);
        assert!(ok.success);
        assert_eq!(ok.record_count, 1);
        assert!(ok.data_size() > 0);

        let failed = ShardResult::failure("s2", ShardFailure::Timeout, 5000);
        assert!(!failed.success);
        assert_eq!(failed.error.as_ref().unwrap().to_string(), "timeout");
    }

    #[test]
    fn test_counts_against_shard() {
        assert!(ShardFailure::Timeout.counts_against_shard());
        assert!(!ShardFailure::Cancelled.counts_against_shard());
        assert!(!ShardFailure::Skipped("gate".into()).counts_against_shard());
    }
}
