//! 执行计划器
//!
//! 规划流程：
//! 1. 确定候选分片 (显式目标全部保留；自动发现的候选交给路由器选择)
//! 2. 探测健康与指标，不可达分片使用占位状态，规划继续
//! 3. 评分 → 片段特化 → 选择执行策略 → 构建阶段
//! 4. 估算资源，预先构建三个降级计划
//!
//! 规划从不失败。

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;

use super::history::{ExecutionHistory, PlannerInsights, ShardPerformance};
use super::plan::{
    ExecutionPhase, ExecutionPlan, ExecutionStrategy, FallbackKind, FragmentPayload,
    ResourceRequirements, ShardQueryFragment,
};
use super::specialize::specialize;
use crate::aggregator::AggregationStrategy;
use crate::observability;
use crate::query::{InterpretedQuery, QueryIntent};
use crate::router::{blend_hint, sort_decisions, DynamicRouter, RoutingDecision, ScorePredictor};
use crate::shard::{HealthStatus, ShardCapabilities, ShardState, StorageTier};
use crate::utils::PlannerConfig;

/// 无法从指标推断时的预期记录数
const DEFAULT_EXPECTED_RECORDS: u64 = 1000;
/// 平均记录字节数
const AVG_RECORD_BYTES: usize = 512;
/// 单个凭证的校验结果字节数
const TOKEN_RESULT_BYTES: usize = 128;
/// 每个片段的固定内存开销 (MB)
const FRAGMENT_BASE_MEMORY_MB: f64 = 8.0;
/// 结果缓冲的内存放大系数
const MEMORY_OVERHEAD: f64 = 1.5;
const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// 片段及其资源估算
struct SizedFragment {
    fragment: ShardQueryFragment,
    cpu_percent: f64,
    memory_mb: f64,
    disk_io_mb: f64,
    network_mb: f64,
}

/// 同一阶段内执行的片段组
struct PhaseGroup {
    parallel: bool,
    fragments: Vec<SizedFragment>,
}

impl PhaseGroup {
    fn parallel(fragments: Vec<SizedFragment>) -> Self {
        Self {
            parallel: true,
            fragments,
        }
    }

    fn sequential(fragments: Vec<SizedFragment>) -> Self {
        Self {
            parallel: false,
            fragments,
        }
    }
}

/// 分片之间的依赖关系
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dependency {
    Independent,
    /// 凭证校验必须先于数据访问
    ValidationGate,
    CrossReference,
}

/// 执行计划器
pub struct ExecutionPlanner {
    config: PlannerConfig,
    router: Arc<DynamicRouter>,
    history: ExecutionHistory,
    predictor: Option<Arc<dyn ScorePredictor>>,
    plans_created: AtomicU64,
}

impl ExecutionPlanner {
    pub fn new(config: PlannerConfig, router: Arc<DynamicRouter>) -> Self {
        let history = ExecutionHistory::new(config.max_history);
        Self {
            config,
            router,
            history,
            predictor: None,
            plans_created: AtomicU64::new(0),
        }
    }

    /// 设置优先级提示预测器
    pub fn with_predictor(mut self, predictor: Arc<dyn ScorePredictor>) -> Self {
        self.predictor = Some(predictor);
        self
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    pub fn router(&self) -> &Arc<DynamicRouter> {
        &self.router
    }

    // ───────────────────────────────────────────────────────────────────────
    // 规划
    // ───────────────────────────────────────────────────────────────────────

    /// 为查询构建执行计划 (含降级计划)
    pub async fn create_plan(&self, query: &InterpretedQuery) -> ExecutionPlan {
        let (candidates, explicit) = self.candidates(query);
        let mut states = HashMap::new();
        self.gather_states(&candidates, &mut states).await;

        let mut plan = self.build_plan(query, &candidates, &states, !explicit, false, true);

        for kind in FallbackKind::all() {
            let (fallback_query, ids, force_parallel) =
                self.fallback_inputs(kind, query, &plan, &states);
            self.gather_states(&ids, &mut states).await;
            let fallback =
                self.build_plan(&fallback_query, &ids, &states, false, force_parallel, false);
            plan.fallbacks.insert(kind, fallback);
        }

        self.plans_created.fetch_add(1, Ordering::Relaxed);
        observability::record_plan_strategy(plan.strategy.as_str());

        log::debug!(
            "Plan {} for '{}': strategy={} phases={} fragments={} est={:.1}ms viable={}",
            plan.execution_id,
            query.text,
            plan.strategy.as_str(),
            plan.phases.len(),
            plan.fragment_count(),
            plan.estimated_duration_ms,
            plan.is_viable()
        );

        plan
    }

    /// 候选分片与是否为显式目标
    fn candidates(&self, query: &InterpretedQuery) -> (Vec<String>, bool) {
        if !query.target_shard_ids.is_empty() {
            let mut seen = HashSet::new();
            let ids = query
                .target_shard_ids
                .iter()
                .filter(|id| seen.insert(id.as_str()))
                .cloned()
                .collect();
            return (ids, true);
        }

        let registry = self.router.registry();
        let supporting = registry.shards_supporting(&query.data_type);
        if supporting.is_empty() {
            (registry.shard_ids(), false)
        } else {
            (supporting, false)
        }
    }

    /// 并发探测尚未探测过的分片
    async fn gather_states(&self, ids: &[String], states: &mut HashMap<String, ShardState>) {
        let pending: Vec<&String> = ids.iter().filter(|id| !states.contains_key(*id)).collect();
        if pending.is_empty() {
            return;
        }
        let probed = join_all(pending.into_iter().map(|id| self.probe(id))).await;
        for state in probed {
            states.insert(state.shard_id.clone(), state);
        }
    }

    /// 探测单个分片；失败或超时时返回不可达占位状态
    async fn probe(&self, shard_id: &str) -> ShardState {
        let registry = self.router.registry();
        let Some(shard) = registry.get(shard_id) else {
            log::warn!("Shard {} is not registered, planning with unreachable state", shard_id);
            return ShardState::unreachable(shard_id, ShardCapabilities::default());
        };

        let limit = Duration::from_millis(self.config.probe_timeout_ms);
        let (health, metrics) = tokio::join!(
            tokio::time::timeout(limit, shard.handle.get_health()),
            tokio::time::timeout(limit, shard.handle.get_metrics()),
        );

        match health {
            Ok(Ok(health)) => {
                let mut state = self.router.shard_state(shard_id);
                state.capabilities = shard.capabilities.clone();
                state.apply_health(&health);
                if let Ok(Ok(metrics)) = metrics {
                    state.apply_metrics(&metrics);
                }
                state
            }
            Ok(Err(e)) => {
                log::warn!("Shard {} unavailable during planning: {}", shard_id, e);
                ShardState::unreachable(shard_id, shard.capabilities.clone())
            }
            Err(_) => {
                log::warn!("Shard {} health probe timed out during planning", shard_id);
                ShardState::unreachable(shard_id, shard.capabilities.clone())
            }
        }
    }

    /// 用已探测的状态构建计划 (不含降级计划)
    fn build_plan(
        &self,
        query: &InterpretedQuery,
        shard_ids: &[String],
        states: &HashMap<String, ShardState>,
        narrow: bool,
        force_parallel: bool,
        log_routing: bool,
    ) -> ExecutionPlan {
        let strategy = self.router.strategy(query.routing_strategy());

        let mut decisions: Vec<RoutingDecision> = shard_ids
            .iter()
            .filter_map(|id| states.get(id))
            .map(|state| self.router.score_shard(query, state, &strategy))
            .collect();
        sort_decisions(&mut decisions);
        if log_routing {
            self.router.log_routing(query, &strategy, &decisions);
        }

        if narrow {
            decisions = self.narrow(query, &decisions, states);
        }

        let mut sized: Vec<SizedFragment> = decisions
            .iter()
            .filter_map(|d| {
                states
                    .get(&d.shard_id)
                    .map(|state| self.build_fragment(query, d, state))
            })
            .collect();

        // 凭证校验优先，其余按优先级
        sized.sort_by(|a, b| {
            is_gate(b)
                .cmp(&is_gate(a))
                .then_with(|| {
                    b.fragment
                        .priority
                        .partial_cmp(&a.fragment.priority)
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .then_with(|| a.fragment.shard_id.cmp(&b.fragment.shard_id))
        });

        let dependency = self.dependency(query, &sized);
        let (strategy, groups) = self.choose_strategy(sized, dependency, force_parallel);
        let phases = build_phases(strategy, groups);

        let resource_requirements = resource_requirements(&phases);
        let phases: Vec<ExecutionPhase> = phases.into_iter().map(|(phase, _)| phase).collect();
        let estimated_duration_ms = phases.iter().map(|p| p.estimated_duration_ms).sum();
        let aggregation = choose_aggregation(query, shard_ids.len());

        ExecutionPlan {
            execution_id: uuid::Uuid::new_v4().to_string(),
            phases,
            strategy,
            aggregation,
            resource_requirements,
            fallbacks: HashMap::new(),
            estimated_duration_ms,
        }
    }

    /// 自动发现的候选交给路由器选择，凭证校验分片始终保留
    fn narrow(
        &self,
        query: &InterpretedQuery,
        decisions: &[RoutingDecision],
        states: &HashMap<String, ShardState>,
    ) -> Vec<RoutingDecision> {
        let mut selected = self.router.select(query, decisions);
        for decision in decisions {
            let is_gate = states
                .get(&decision.shard_id)
                .map_or(false, |s| s.capabilities.is_validation());
            if is_gate && !selected.iter().any(|s| s.shard_id == decision.shard_id) {
                selected.push(decision.clone());
            }
        }
        selected
    }

    fn build_fragment(
        &self,
        query: &InterpretedQuery,
        decision: &RoutingDecision,
        state: &ShardState,
    ) -> SizedFragment {
        let caps = &state.capabilities;
        let payload = specialize(caps, query);

        let expected_result_size = match &payload {
            FragmentPayload::ValidationOnly { tokens } => tokens.len().max(1) * TOKEN_RESULT_BYTES,
            _ => {
                let mut records = payload
                    .limit()
                    .map(|l| l as u64)
                    .unwrap_or(DEFAULT_EXPECTED_RECORDS);
                if state.total_records > 0 {
                    records = records.min(state.total_records);
                }
                records as usize * AVG_RECORD_BYTES
            }
        };

        let timeout_ms = query
            .optimization_hints
            .timeout_ms
            .unwrap_or(self.config.default_timeout_ms)
            .clamp(1, self.config.max_timeout_ms.max(1));

        let estimated_duration_ms = if state.synthetic {
            f64::INFINITY
        } else {
            decision.estimated_latency_ms.min(timeout_ms as f64)
        };

        let hint = self
            .predictor
            .as_ref()
            .and_then(|p| p.predict(query, state));
        let priority = blend_hint(decision.score, hint).clamp(0.0, 1.0);

        let critical = query.primary_shard() == Some(state.shard_id.as_str()) || caps.is_validation();

        let expected_mb = expected_result_size as f64 / BYTES_PER_MB;
        let disk_factor = match caps.tier {
            StorageTier::Hot => 0.2,
            StorageTier::Warm => 1.0,
            StorageTier::Cold => 2.0,
        };

        SizedFragment {
            fragment: ShardQueryFragment {
                shard_id: state.shard_id.clone(),
                payload,
                priority,
                expected_result_size,
                timeout_ms,
                critical,
                estimated_duration_ms,
                temporal: query.temporal.clone(),
            },
            cpu_percent: state.cpu_usage,
            memory_mb: expected_mb * MEMORY_OVERHEAD + FRAGMENT_BASE_MEMORY_MB,
            disk_io_mb: expected_mb * disk_factor,
            network_mb: expected_mb,
        }
    }

    /// 凭证校验与数据访问混合，或需要自定义交叉引用时，分片之间存在依赖
    fn dependency(&self, query: &InterpretedQuery, sized: &[SizedFragment]) -> Dependency {
        if query.optimization_hints.custom_cross_reference {
            return Dependency::CrossReference;
        }
        let validation = sized.iter().filter(|s| is_gate(s)).count();
        if validation > 0 && validation < sized.len() {
            Dependency::ValidationGate
        } else {
            Dependency::Independent
        }
    }

    fn fits_budget(&self, sized: &[SizedFragment]) -> bool {
        let memory: f64 = sized.iter().map(|s| s.memory_mb).sum();
        let cpu = sized.iter().map(|s| s.cpu_percent).fold(0.0, f64::max);
        memory < self.config.memory_threshold_mb && cpu < self.config.cpu_threshold_percent
    }

    /// 选择执行策略并分组
    fn choose_strategy(
        &self,
        sized: Vec<SizedFragment>,
        dependency: Dependency,
        force_parallel: bool,
    ) -> (ExecutionStrategy, Vec<PhaseGroup>) {
        let n = sized.len();
        if n <= 1 {
            return (ExecutionStrategy::Sequential, vec![PhaseGroup::sequential(sized)]);
        }

        match dependency {
            Dependency::Independent => {
                if force_parallel || self.fits_budget(&sized) {
                    return (ExecutionStrategy::Parallel, vec![PhaseGroup::parallel(sized)]);
                }
                if n > 3 {
                    let mut parallel: Vec<SizedFragment> = Vec::new();
                    let mut overflow: Vec<SizedFragment> = Vec::new();
                    for fragment in sized {
                        parallel.push(fragment);
                        if !self.fits_budget(&parallel) {
                            if let Some(last) = parallel.pop() {
                                overflow.push(last);
                            }
                        }
                    }
                    if parallel.len() >= 2 && !overflow.is_empty() {
                        return (
                            ExecutionStrategy::Hybrid,
                            vec![PhaseGroup::parallel(parallel), PhaseGroup::sequential(overflow)],
                        );
                    }
                    parallel.extend(overflow);
                    return (ExecutionStrategy::Sequential, vec![PhaseGroup::sequential(parallel)]);
                }
                (ExecutionStrategy::Sequential, vec![PhaseGroup::sequential(sized)])
            }
            Dependency::ValidationGate => {
                // 校验阶段在前，多个数据分片在预算内时并行访问
                let (gates, data): (Vec<_>, Vec<_>) = sized.into_iter().partition(is_gate);
                if data.len() >= 2 && (force_parallel || self.fits_budget(&data)) {
                    return (
                        ExecutionStrategy::Hybrid,
                        vec![PhaseGroup::sequential(gates), PhaseGroup::parallel(data)],
                    );
                }
                let mut ordered = gates;
                ordered.extend(data);
                (ExecutionStrategy::Sequential, vec![PhaseGroup::sequential(ordered)])
            }
            Dependency::CrossReference => {
                (ExecutionStrategy::Sequential, vec![PhaseGroup::sequential(sized)])
            }
        }
    }

    /// 降级计划的输入：(查询, 候选, 是否强制并行)
    fn fallback_inputs(
        &self,
        kind: FallbackKind,
        query: &InterpretedQuery,
        plan: &ExecutionPlan,
        states: &HashMap<String, ShardState>,
    ) -> (InterpretedQuery, Vec<String>, bool) {
        let planned = plan.shard_ids();

        match kind {
            FallbackKind::PrimaryShardFailure => {
                let primary = query
                    .primary_shard()
                    .map(str::to_string)
                    .or_else(|| {
                        plan.fragments()
                            .find(|f| !matches!(f.payload, FragmentPayload::ValidationOnly { .. }))
                            .map(|f| f.shard_id.clone())
                    });
                let ids = self
                    .router
                    .registry()
                    .shards_supporting(&query.data_type)
                    .into_iter()
                    .filter(|id| Some(id) != primary.as_ref())
                    .collect();
                (query.clone(), ids, false)
            }
            FallbackKind::PerformanceDegradation => {
                let mut degraded = query.clone();
                degraded.optimization_hints.prefer_cache = true;
                degraded.optimization_hints.low_complexity = true;
                (degraded, planned, true)
            }
            FallbackKind::PartialFailure => {
                let healthy = planned
                    .into_iter()
                    .filter(|id| {
                        states
                            .get(id)
                            .map_or(false, |s| !s.synthetic && s.health == HealthStatus::Healthy)
                    })
                    .collect();
                (query.clone(), healthy, false)
            }
        }
    }

    // ───────────────────────────────────────────────────────────────────────
    // 执行历史
    // ───────────────────────────────────────────────────────────────────────

    /// 记录片段实际耗时
    pub fn record_execution(&self, shard_id: &str, duration_ms: f64) {
        self.history.record(shard_id, duration_ms);
    }

    pub fn shard_performance(&self, shard_id: &str) -> Option<ShardPerformance> {
        self.history.performance(shard_id)
    }

    /// 规划器洞察
    pub fn insights(&self) -> PlannerInsights {
        PlannerInsights {
            plans_created: self.plans_created.load(Ordering::Relaxed),
            shards: self.history.summary(),
        }
    }
}

/// 构建阶段；每个阶段附带并发 CPU 估算
///
/// 顺序策略每个分片一个阶段；并行与混合策略每组一个阶段，依次依赖前一阶段。
fn build_phases(
    strategy: ExecutionStrategy,
    groups: Vec<PhaseGroup>,
) -> Vec<(ExecutionPhase, PhaseResources)> {
    let mut phases = Vec::new();
    let mut push = |parallel: bool, fragments: Vec<SizedFragment>| {
        let id = phases.len();
        let depends_on = if id == 0 { vec![] } else { vec![id - 1] };
        phases.push(make_phase(id, parallel, fragments, depends_on));
    };

    match strategy {
        ExecutionStrategy::Sequential => {
            for fragment in groups.into_iter().flat_map(|g| g.fragments) {
                push(false, vec![fragment]);
            }
        }
        ExecutionStrategy::Parallel | ExecutionStrategy::Hybrid => {
            for group in groups {
                if !group.fragments.is_empty() {
                    push(group.parallel, group.fragments);
                }
            }
        }
    }

    phases
}

fn is_gate(sized: &SizedFragment) -> bool {
    matches!(sized.fragment.payload, FragmentPayload::ValidationOnly { .. })
}

/// 阶段资源合计
#[derive(Debug, Default)]
struct PhaseResources {
    cpu_percent: f64,
    memory_mb: f64,
    disk_io_mb: f64,
    network_mb: f64,
}

fn make_phase(
    id: usize,
    parallelizable: bool,
    group: Vec<SizedFragment>,
    depends_on: Vec<usize>,
) -> (ExecutionPhase, PhaseResources) {
    let mut resources = PhaseResources::default();
    let mut fragments = Vec::with_capacity(group.len());
    for s in group {
        resources.cpu_percent = resources.cpu_percent.max(s.cpu_percent);
        resources.memory_mb += s.memory_mb;
        resources.disk_io_mb += s.disk_io_mb;
        resources.network_mb += s.network_mb;
        fragments.push(s.fragment);
    }
    (
        ExecutionPhase::new(id, parallelizable, fragments, depends_on),
        resources,
    )
}

/// CPU 取各阶段最大值，其余求和
fn resource_requirements(phases: &[(ExecutionPhase, PhaseResources)]) -> ResourceRequirements {
    let mut total = ResourceRequirements::default();
    for (phase, resources) in phases {
        total.cpu_percent = total.cpu_percent.max(resources.cpu_percent);
        total.memory_mb += resources.memory_mb;
        total.disk_io_mb += resources.disk_io_mb;
        total.network_mb += resources.network_mb;
        total.expected_result_bytes += phase
            .fragments
            .iter()
            .map(|f| f.expected_result_size)
            .sum::<usize>();
    }
    total
}

/// 计划的聚合策略：显式提示优先，否则按意图与时间范围推断
pub fn choose_aggregation(query: &InterpretedQuery, shard_count: usize) -> AggregationStrategy {
    if let Some(hint) = query.aggregation_strategy_hint {
        return hint;
    }
    if query.optimization_hints.custom_cross_reference {
        return AggregationStrategy::CrossReference;
    }
    match query.intent {
        QueryIntent::Analyze => AggregationStrategy::StatisticalSummary,
        QueryIntent::Aggregate => AggregationStrategy::WeightedAverage,
        _ if query.temporal.is_some() => AggregationStrategy::TimeOrdered,
        _ if shard_count > 1 => AggregationStrategy::Deduplicate,
        _ => AggregationStrategy::Merge,
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// 测试
// ═══════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::QueryFilter;
    use crate::shard::{InMemoryShard, ShardHealth, ShardKind, ShardRegistry, ShardStateStore};
    use crate::utils::RouterConfig;

    fn planner_with(shards: Vec<(&str, ShardKind, InMemoryShard)>) -> ExecutionPlanner {
        let registry = Arc::new(ShardRegistry::new());
        for (id, kind, shard) in shards {
            registry.register(
                id,
                Arc::new(shard),
                ShardCapabilities::new(kind, StorageTier::Warm).with_data_types(["users"]),
            );
        }
        let router = Arc::new(DynamicRouter::new(
            RouterConfig::default(),
            registry,
            ShardStateStore::shared(),
        ));
        ExecutionPlanner::new(PlannerConfig::default(), router)
    }

    fn data_shard() -> InMemoryShard {
        InMemoryShard::new(Vec::new())
    }

    #[tokio::test]
    async fn test_single_shard_is_sequential() {
        let planner = planner_with(vec![("a", ShardKind::Data, data_shard())]);
        let query = InterpretedQuery::new("user 1", "users").with_targets(["a"]);

        let plan = planner.create_plan(&query).await;
        assert_eq!(plan.strategy, ExecutionStrategy::Sequential);
        assert_eq!(plan.phases.len(), 1);
        assert!(plan.phases[0].depends_on.is_empty());
        assert!(plan.validate().is_ok());
    }

    #[tokio::test]
    async fn test_independent_shards_run_in_parallel() {
        let planner = planner_with(vec![
            ("a", ShardKind::Data, data_shard()),
            ("b", ShardKind::Data, data_shard()),
            ("c", ShardKind::Primary, data_shard()),
            ("d", ShardKind::Data, data_shard()),
        ]);
        let query = InterpretedQuery::new("all users", "users").with_targets(["a", "b", "c", "d"]);

        let plan = planner.create_plan(&query).await;
        assert_eq!(plan.strategy, ExecutionStrategy::Parallel);
        assert_eq!(plan.phases.len(), 1);
        assert_eq!(plan.phases[0].fragments.len(), 4);
        assert!(plan.phases[0].parallelizable);
        assert_eq!(plan.fallbacks.len(), 3);
        assert!(plan.validate().is_ok());
    }

    #[tokio::test]
    async fn test_validation_gate_forces_sequential() {
        let planner = planner_with(vec![
            ("data", ShardKind::Data, data_shard()),
            ("auth", ShardKind::TokenValidation, data_shard()),
        ]);
        let query = InterpretedQuery::new("session", "users")
            .with_filter(QueryFilter::eq("token", "t-1"))
            .with_targets(["data", "auth"]);

        let plan = planner.create_plan(&query).await;
        assert_eq!(plan.strategy, ExecutionStrategy::Sequential);
        assert_eq!(plan.phases.len(), 2);
        assert_eq!(plan.phases[0].fragments[0].shard_id, "auth");
        assert!(plan.phases[0].fragments[0].critical);
        assert_eq!(plan.phases[1].depends_on, vec![0]);
    }

    #[tokio::test]
    async fn test_validation_gate_then_parallel_data() {
        let planner = planner_with(vec![
            ("auth", ShardKind::TokenValidation, data_shard()),
            ("a", ShardKind::Data, data_shard()),
            ("b", ShardKind::Data, data_shard()),
            ("c", ShardKind::Data, data_shard()),
            ("d", ShardKind::Data, data_shard()),
        ]);
        let query = InterpretedQuery::new("session users", "users")
            .with_filter(QueryFilter::eq("token", "t-1"))
            .with_targets(["auth", "a", "b", "c", "d"]);

        let plan = planner.create_plan(&query).await;
        assert_eq!(plan.strategy, ExecutionStrategy::Hybrid);
        assert_eq!(plan.phases.len(), 2);

        let gate = &plan.phases[0];
        assert!(!gate.parallelizable);
        assert_eq!(gate.fragments.len(), 1);
        assert_eq!(gate.fragments[0].shard_id, "auth");
        assert!(gate.fragments[0].critical);

        let data = &plan.phases[1];
        assert!(data.parallelizable);
        assert_eq!(data.fragments.len(), 4);
        assert_eq!(data.depends_on, vec![0]);
        assert!(plan.validate().is_ok());
    }

    #[tokio::test]
    async fn test_hybrid_when_over_cpu_budget() {
        let busy = || InMemoryShard::new(Vec::new()).with_health(ShardHealth::healthy(90.0, 64.0));
        let planner = planner_with(vec![
            ("a", ShardKind::Data, data_shard()),
            ("b", ShardKind::Data, data_shard()),
            ("c", ShardKind::Data, data_shard()),
            ("d", ShardKind::Data, busy()),
        ]);
        let query = InterpretedQuery::new("q", "users").with_targets(["a", "b", "c", "d"]);

        let plan = planner.create_plan(&query).await;
        assert_eq!(plan.strategy, ExecutionStrategy::Hybrid);
        assert_eq!(plan.phases.len(), 2);
        assert_eq!(plan.phases[0].fragments.len(), 3);
        assert_eq!(plan.phases[1].fragments[0].shard_id, "d");
        assert_eq!(plan.phases[1].depends_on, vec![0]);
        assert!(plan.validate().is_ok());
    }

    #[tokio::test]
    async fn test_unreachable_shard_still_planned() {
        let down = InMemoryShard::new(Vec::new());
        down.set_unreachable(true);
        let planner = planner_with(vec![("down", ShardKind::Data, down)]);
        let query = InterpretedQuery::new("q", "users").with_targets(["down", "ghost"]);

        let plan = planner.create_plan(&query).await;
        assert_eq!(plan.fragment_count(), 2);
        assert!(!plan.is_viable());
        assert!(plan.estimated_duration_ms.is_infinite());

        let partial = plan.fallback(FallbackKind::PartialFailure).unwrap();
        assert_eq!(partial.fragment_count(), 0);
    }

    #[tokio::test]
    async fn test_primary_failure_fallback_excludes_primary() {
        let planner = planner_with(vec![
            ("primary", ShardKind::Primary, data_shard()),
            ("replica", ShardKind::Data, data_shard()),
        ]);
        let query = InterpretedQuery::new("user 1", "users").with_targets(["primary"]);

        let plan = planner.create_plan(&query).await;
        assert!(plan.phases[0].fragments[0].critical);

        let fallback = plan.fallback(FallbackKind::PrimaryShardFailure).unwrap();
        assert_eq!(fallback.shard_ids(), vec!["replica".to_string()]);
    }

    #[tokio::test]
    async fn test_degradation_fallback_is_low_complexity() {
        let planner = planner_with(vec![
            ("a", ShardKind::Data, data_shard()),
            ("b", ShardKind::Data, data_shard()),
        ]);
        let query = InterpretedQuery::new("q", "users")
            .with_filter(QueryFilter::eq("email", "x@y.z"))
            .with_targets(["a", "b"]);

        let plan = planner.create_plan(&query).await;
        let degraded = plan.fallback(FallbackKind::PerformanceDegradation).unwrap();
        assert_eq!(degraded.strategy, ExecutionStrategy::Parallel);
        match &degraded.phases[0].fragments[0].payload {
            FragmentPayload::Projection { fields, .. } => assert!(fields.contains(&"id".to_string())),
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[test]
    fn test_choose_aggregation() {
        let q = InterpretedQuery::new("q", "users");
        assert_eq!(choose_aggregation(&q, 1), AggregationStrategy::Merge);
        assert_eq!(choose_aggregation(&q, 3), AggregationStrategy::Deduplicate);
        let analyze = q.clone().with_intent(QueryIntent::Analyze);
        assert_eq!(choose_aggregation(&analyze, 3), AggregationStrategy::StatisticalSummary);
        let hinted = q.with_aggregation(AggregationStrategy::PrioritizeHot);
        assert_eq!(choose_aggregation(&hinted, 3), AggregationStrategy::PrioritizeHot);
    }

    #[test]
    fn test_insights_track_history() {
        let planner = planner_with(vec![]);
        planner.record_execution("a", 10.0);
        planner.record_execution("a", 30.0);
        let insights = planner.insights();
        assert_eq!(insights.shards.len(), 1);
        assert_eq!(insights.shards[0].avg_ms, 20.0);
    }
}
