//! 结果聚合模块
//!
//! 按计划的聚合策略合并分片结果，做冲突消解，并把部分失败作为数据上报。

pub mod engine;
pub mod errors;
pub mod merge;
pub mod result;
pub mod strategy;

pub use engine::ResultAggregator;
pub use errors::classify;
pub use result::{
    AggregatedResult, AggregationInsights, AggregationMetadata, CachingMetadata, ErrorSeverity,
    FieldStatistics, QueryError, SourceContribution, SourceInfo, StrategyDetails,
};
pub use strategy::AggregationStrategy;
