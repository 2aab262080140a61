//! 执行计划模块
//!
//! 消费路由器的评分结果，构建带依赖关系、执行策略、资源估算与降级计划的多阶段执行计划。

pub mod builder;
pub mod history;
pub mod plan;
pub mod specialize;

pub use builder::{choose_aggregation, ExecutionPlanner};
pub use history::{ExecutionHistory, PerformanceTrend, PlannerInsights, ShardPerformance};
pub use plan::{
    ExecutionPhase, ExecutionPlan, ExecutionStrategy, FallbackKind, FragmentPayload,
    ResourceRequirements, ShardQueryFragment, SortOrder,
};
pub use specialize::specialize;
