//! 动态路由模块
//!
//! 为候选分片打分并选择执行分片，同时从执行反馈中学习分片性能。

pub mod dynamic;
pub mod maintenance;
pub mod predictor;
pub mod strategy;

pub use dynamic::{
    sort_decisions, CriterionScores, DynamicRouter, RoutingDecision, RoutingHistory,
    RoutingLogEntry,
};
pub use maintenance::{RoutingInsights, ShardProblem};
pub use predictor::{blend_hint, ConstantPredictor, ScorePredictor};
pub use strategy::{RoutingStrategy, StrategyWeights};
