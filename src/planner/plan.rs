//! 执行计划模型
//!
//! 计划一旦构建即不可变：执行器只读取它。

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::aggregator::AggregationStrategy;
use crate::query::{QueryFilter, TemporalScope};
use crate::{FederationError, Result};

// ═══════════════════════════════════════════════════════════════════════════
// 片段载荷
// ═══════════════════════════════════════════════════════════════════════════

/// 排序方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    Ascending,
    Descending,
}

/// 按分片类型特化的查询载荷
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum FragmentPayload {
    /// 字段投影 (空字段列表表示全部字段)
    Projection {
        data_type: String,
        fields: Vec<String>,
        filters: Vec<QueryFilter>,
        limit: Option<usize>,
    },
    /// 时序扫描
    TemporalScan {
        data_type: String,
        filters: Vec<QueryFilter>,
        temporal: Option<TemporalScope>,
        order: SortOrder,
        limit: Option<usize>,
    },
    /// 仅校验凭证
    ValidationOnly { tokens: Vec<String> },
    /// 聚合映射
    AggregationMapping {
        data_type: String,
        filters: Vec<QueryFilter>,
        group_by: Vec<String>,
        metrics: Vec<String>,
    },
}

impl FragmentPayload {
    pub fn filters(&self) -> &[QueryFilter] {
        match self {
            FragmentPayload::Projection { filters, .. }
            | FragmentPayload::TemporalScan { filters, .. }
            | FragmentPayload::AggregationMapping { filters, .. } => filters,
            FragmentPayload::ValidationOnly { .. } => &[],
        }
    }

    pub fn limit(&self) -> Option<usize> {
        match self {
            FragmentPayload::Projection { limit, .. }
            | FragmentPayload::TemporalScan { limit, .. } => *limit,
            _ => None,
        }
    }

    pub fn mode(&self) -> &'static str {
        match self {
            FragmentPayload::Projection { .. } => "projection",
            FragmentPayload::TemporalScan { .. } => "temporal_scan",
            FragmentPayload::ValidationOnly { .. } => "validation_only",
            FragmentPayload::AggregationMapping { .. } => "aggregation_mapping",
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// 计划结构
// ═══════════════════════════════════════════════════════════════════════════

/// 执行策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStrategy {
    Sequential,
    Parallel,
    Hybrid,
}

impl ExecutionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStrategy::Sequential => "sequential",
            ExecutionStrategy::Parallel => "parallel",
            ExecutionStrategy::Hybrid => "hybrid",
        }
    }
}

/// 单个分片上的查询片段
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardQueryFragment {
    pub shard_id: String,
    pub payload: FragmentPayload,
    /// 调度优先级 ∈ [0, 1]
    pub priority: f64,
    /// 预期结果字节数
    pub expected_result_size: usize,
    pub timeout_ms: u64,
    /// 关键片段 (主目标 / 凭证校验) 失败会中止所在串行阶段
    pub critical: bool,
    /// 预估耗时 (不超过超时)
    pub estimated_duration_ms: f64,
    pub temporal: Option<TemporalScope>,
}

impl ShardQueryFragment {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// 目标分片是否可用 (不可达分片的预估耗时为无穷大)
    pub fn is_reachable(&self) -> bool {
        self.estimated_duration_ms.is_finite()
    }
}

/// 执行阶段
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPhase {
    pub id: usize,
    pub parallelizable: bool,
    pub fragments: Vec<ShardQueryFragment>,
    /// 前置阶段 id
    pub depends_on: Vec<usize>,
    pub estimated_duration_ms: f64,
}

impl ExecutionPhase {
    /// 并行阶段取最大值，串行阶段求和
    pub fn new(
        id: usize,
        parallelizable: bool,
        fragments: Vec<ShardQueryFragment>,
        depends_on: Vec<usize>,
    ) -> Self {
        let durations = fragments.iter().map(|f| f.estimated_duration_ms);
        let estimated_duration_ms = if parallelizable {
            durations.fold(0.0, f64::max)
        } else {
            durations.sum()
        };
        Self {
            id,
            parallelizable,
            fragments,
            depends_on,
            estimated_duration_ms,
        }
    }
}

/// 资源需求估算
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ResourceRequirements {
    /// 各阶段并发 CPU 的最大值 (%)
    pub cpu_percent: f64,
    pub memory_mb: f64,
    pub disk_io_mb: f64,
    pub network_mb: f64,
    pub expected_result_bytes: usize,
}

/// 降级计划类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackKind {
    PrimaryShardFailure,
    PerformanceDegradation,
    PartialFailure,
}

impl FallbackKind {
    pub fn all() -> [FallbackKind; 3] {
        [
            FallbackKind::PrimaryShardFailure,
            FallbackKind::PerformanceDegradation,
            FallbackKind::PartialFailure,
        ]
    }
}

/// 执行计划
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub execution_id: String,
    pub phases: Vec<ExecutionPhase>,
    pub strategy: ExecutionStrategy,
    pub aggregation: AggregationStrategy,
    pub resource_requirements: ResourceRequirements,
    pub fallbacks: HashMap<FallbackKind, ExecutionPlan>,
    pub estimated_duration_ms: f64,
}

impl ExecutionPlan {
    /// 所有片段
    pub fn fragments(&self) -> impl Iterator<Item = &ShardQueryFragment> {
        self.phases.iter().flat_map(|p| p.fragments.iter())
    }

    pub fn fragment_count(&self) -> usize {
        self.phases.iter().map(|p| p.fragments.len()).sum()
    }

    pub fn shard_ids(&self) -> Vec<String> {
        self.fragments().map(|f| f.shard_id.clone()).collect()
    }

    pub fn fallback(&self, kind: FallbackKind) -> Option<&ExecutionPlan> {
        self.fallbacks.get(&kind)
    }

    /// 至少有一个可达分片
    ///
    /// 规划器从不失败；所有分片都不可达时仍返回计划，调用方通过此标志感知。
    pub fn is_viable(&self) -> bool {
        self.fragments().any(|f| f.is_reachable())
    }

    /// 校验阶段依赖：只能引用更早的阶段 (从而无环)，递归校验降级计划
    pub fn validate(&self) -> Result<()> {
        for (index, phase) in self.phases.iter().enumerate() {
            if phase.id != index {
                return Err(FederationError::InvalidPlan(format!(
                    "phase at position {} has id {}",
                    index, phase.id
                )));
            }
            if let Some(dep) = phase.depends_on.iter().find(|d| **d >= index) {
                return Err(FederationError::InvalidPlan(format!(
                    "phase {} depends on non-earlier phase {}",
                    index, dep
                )));
            }
        }
        for fallback in self.fallbacks.values() {
            fallback.validate()?;
        }
        Ok(())
    }
}
