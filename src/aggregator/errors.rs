//! 失败分类

use super::result::{ErrorSeverity, QueryError};
use crate::shard::{ShardFailure, ShardResult};

/// 把失败的分片结果转换为带处理建议的错误记录
pub fn classify(result: &ShardResult) -> QueryError {
    let failure = result
        .error
        .clone()
        .unwrap_or_else(|| ShardFailure::Other("unknown failure".to_string()));

    let (severity, handling) = match &failure {
        ShardFailure::Timeout | ShardFailure::Network(_) => {
            (ErrorSeverity::Warning, "retry with increased timeout")
        }
        ShardFailure::Auth(_) => (ErrorSeverity::Error, "refresh credentials and retry"),
        ShardFailure::Unavailable(_) => (ErrorSeverity::Critical, "fallback to alternative shard"),
        ShardFailure::Cancelled => (ErrorSeverity::Warning, "none, query was cancelled"),
        ShardFailure::Skipped(_) => (
            ErrorSeverity::Warning,
            "rerun after the upstream failure is resolved",
        ),
        ShardFailure::Other(_) => (ErrorSeverity::Error, "inspect shard logs"),
    };

    QueryError {
        shard_id: result.shard_id.clone(),
        severity,
        message: failure.to_string(),
        handling: handling.to_string(),
    }
}
