//! # QAFEDERATION-RS
//!
//! 多分片联邦查询执行系统
//!
//! ## 核心能力
//!
//! - **动态路由**: 多维度分片评分 (延迟/可靠性/成本/新鲜度) + 软约束惩罚
//! - **执行计划**: 阶段依赖调度、串行/并行/混合策略、资源估算、降级计划
//! - **预测缓存**: 按查询指纹缓存结果，预测 TTL / 淘汰优先级 / 预热任务
//! - **结果聚合**: 按策略合并分片结果，冲突消解，部分失败以数据形式上报
//!
//! ## 架构设计
//!
//! ```text
//! InterpretedQuery
//!     ↓
//! Orchestrator (orchestrator/)
//!     ├─ PredictiveCache (cache/)        指纹查找 / 回填
//!     ├─ ExecutionPlanner (planner/)     ← DynamicRouter (router/)
//!     ├─ ShardExecutor                   分阶段 scatter-gather
//!     └─ ResultAggregator (aggregator/)
//!     ↓
//! AggregatedResult
//! ```
//!
//! 路由器与缓存从不返回错误，规划器总能产出计划，聚合器把失败记录为
//! `QueryError`。只有编排层在没有任何分片产出数据时返回硬错误。

// ============================================================================
// 外部依赖
// ============================================================================

// 异步运行时
pub use futures;
pub use tokio;

// 并发工具
pub use dashmap;
pub use parking_lot;

// 序列化
pub use serde;
pub use serde_json;

// 日志
pub use log;

// ============================================================================
// 内部模块
// ============================================================================

/// 查询模型 (外部解析组件的输出) 与查询指纹
pub mod query;

/// 分片契约、能力描述、注册表与运行状态
pub mod shard;

/// 动态路由器
pub mod router;

/// 预测缓存
pub mod cache;

/// 执行计划器
pub mod planner;

/// 结果聚合器
pub mod aggregator;

/// 编排层 (执行 + 反馈)
pub mod orchestrator;

/// 可观测性模块 (Prometheus)
pub mod observability;

/// 工具模块
pub mod utils;

// ============================================================================
// 重导出常用类型
// ============================================================================

pub use aggregator::{AggregatedResult, AggregationStrategy, ResultAggregator};
pub use cache::PredictiveCache;
pub use orchestrator::{Orchestrator, ShardExecutor};
pub use planner::{ExecutionPlan, ExecutionPlanner};
pub use query::{InterpretedQuery, TemporalScope};
pub use router::{DynamicRouter, RoutingDecision};
pub use shard::{ShardHandle, ShardRegistry, ShardResult, ShardStateStore};

// ============================================================================
// 全局错误类型
// ============================================================================

/// 联邦查询错误类型
///
/// 分片级别的失败不会出现在这里，它们以 [`shard::ShardFailure`] 的形式
/// 记录在 `ShardResult` 中。
#[derive(Debug, thiserror::Error)]
pub enum FederationError {
    #[error("No shard produced data: {0}")]
    NoShardData(String),

    #[error("Query cancelled: {0}")]
    Cancelled(String),

    #[error("Invalid execution plan: {0}")]
    InvalidPlan(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<serde_json::Error> for FederationError {
    fn from(e: serde_json::Error) -> Self {
        FederationError::SerializationError(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, FederationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = FederationError::NoShardData("3 shards failed".to_string());
        assert_eq!(err.to_string(), "No shard produced data: 3 shards failed");
    }
}
