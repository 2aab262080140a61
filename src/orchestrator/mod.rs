//! 编排层
//!
//! - `executor`: 分阶段 scatter-gather 执行 (超时 / 取消 / 关键分片中止)
//! - `engine`: 查询循环 (缓存 → 计划 → 执行 → 聚合 → 回填 → 反馈) 与后台任务

pub mod engine;
pub mod executor;

pub use engine::{BackgroundTasks, Orchestrator, OrchestratorStats, QueryResponse};
pub use executor::{CriticalFailure, ExecutionReport, ShardExecutor};
