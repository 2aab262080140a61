//! 查询编排
//!
//! 一次查询的完整循环：
//!
//! ```text
//! 指纹 → 缓存查找 → 创建计划 → 分阶段执行 → (关键分片失败时执行主分片降级计划)
//!      → 聚合 → 回填缓存 → 反馈路由器 / 规划器
//! ```
//!
//! 只有在没有任何分片成功返回时才返回硬错误 `NoShardData`。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::executor::{ExecutionReport, ShardExecutor};
use crate::aggregator::{AggregatedResult, ResultAggregator};
use crate::cache::{CacheInsights, CacheSourceInfo, CacheWarmer, CacheWarmingTask, PredictiveCache};
use crate::observability;
use crate::planner::{ExecutionPlan, ExecutionPlanner, FallbackKind, PlannerInsights};
use crate::query::{fingerprint, InterpretedQuery};
use crate::router::{DynamicRouter, RoutingHistory, RoutingInsights, ScorePredictor};
use crate::shard::{ShardRegistry, ShardResult, ShardStateStore};
use crate::utils::FederationConfig;
use crate::{FederationError, Result};

/// 查询响应
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponse {
    pub result: AggregatedResult,
    /// 结果来自缓存 (未执行计划)
    pub from_cache: bool,
    pub plan: Option<ExecutionPlan>,
    pub report: Option<ExecutionReport>,
    /// 实际执行的降级计划
    pub fallback: Option<FallbackKind>,
}

/// 编排统计
#[derive(Debug, Default)]
struct OrchestratorCounters {
    queries: AtomicU64,
    cache_hits: AtomicU64,
    fallbacks: AtomicU64,
    partial: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
}

/// 编排统计快照
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorStats {
    pub queries: u64,
    pub cache_hits: u64,
    pub fallbacks: u64,
    pub partial: u64,
    pub failed: u64,
    pub cancelled: u64,
}

/// 后台任务句柄 (路由刷新/衰减、缓存清理/调优/预热)
pub struct BackgroundTasks {
    token: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl BackgroundTasks {
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// 取消所有任务并等待退出
    pub async fn shutdown(self) {
        self.token.cancel();
        for handle in self.handles {
            if let Err(e) = handle.await {
                log::warn!("Background task ended abnormally: {}", e);
            }
        }
        log::info!("Background tasks stopped");
    }
}

/// 联邦查询编排器
pub struct Orchestrator {
    config: FederationConfig,
    router: Arc<DynamicRouter>,
    planner: ExecutionPlanner,
    executor: ShardExecutor,
    cache: Arc<PredictiveCache>,
    aggregator: ResultAggregator,
    counters: OrchestratorCounters,
}

impl Orchestrator {
    pub fn new(config: FederationConfig, registry: Arc<ShardRegistry>) -> Self {
        Self::build(config, registry, None)
    }

    /// 带提示分数预测器 (路由评分与片段优先级都会混入 10% 的提示)
    pub fn with_score_predictor(
        config: FederationConfig,
        registry: Arc<ShardRegistry>,
        predictor: Arc<dyn ScorePredictor>,
    ) -> Self {
        Self::build(config, registry, Some(predictor))
    }

    fn build(
        config: FederationConfig,
        registry: Arc<ShardRegistry>,
        predictor: Option<Arc<dyn ScorePredictor>>,
    ) -> Self {
        let states = ShardStateStore::shared();

        let mut router =
            DynamicRouter::new(config.router.clone(), Arc::clone(&registry), Arc::clone(&states));
        if let Some(p) = &predictor {
            router = router.with_predictor(Arc::clone(p));
        }
        let router = Arc::new(router);

        let mut planner = ExecutionPlanner::new(config.planner.clone(), Arc::clone(&router));
        if let Some(p) = predictor {
            planner = planner.with_predictor(p);
        }

        log::info!(
            "Orchestrator initialized with {} shards (cache {} bytes)",
            registry.len(),
            config.cache.max_size_bytes
        );

        Self {
            executor: ShardExecutor::new(registry),
            cache: Arc::new(PredictiveCache::new(config.cache.clone())),
            aggregator: ResultAggregator::new().with_shard_states(states),
            router,
            planner,
            config,
            counters: OrchestratorCounters::default(),
        }
    }

    pub fn config(&self) -> &FederationConfig {
        &self.config
    }

    pub fn router(&self) -> &Arc<DynamicRouter> {
        &self.router
    }

    pub fn planner(&self) -> &ExecutionPlanner {
        &self.planner
    }

    pub fn cache(&self) -> &Arc<PredictiveCache> {
        &self.cache
    }

    pub fn aggregator(&self) -> &ResultAggregator {
        &self.aggregator
    }

    // ───────────────────────────────────────────────────────────────────────
    // 查询
    // ───────────────────────────────────────────────────────────────────────

    pub async fn execute_query(&self, query: &InterpretedQuery) -> Result<QueryResponse> {
        self.execute_query_with_cancel(query, &CancellationToken::new())
            .await
    }

    /// 执行查询；取消后已返回的部分结果仍会被聚合
    pub async fn execute_query_with_cancel(
        &self,
        query: &InterpretedQuery,
        token: &CancellationToken,
    ) -> Result<QueryResponse> {
        self.counters.queries.fetch_add(1, Ordering::Relaxed);
        let key = fingerprint(query);

        let use_cache =
            self.config.executor.cache_results || query.optimization_hints.prefer_cache;
        if use_cache {
            if let Some(result) = self.cached(&key) {
                self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
                observability::record_query("cache_hit");
                log::debug!("Cache hit for '{}' ({})", query.text, key);
                return Ok(QueryResponse {
                    result,
                    from_cache: true,
                    plan: None,
                    report: None,
                    fallback: None,
                });
            }
        }

        self.run(query, &key, token).await
    }

    fn cached(&self, key: &str) -> Option<AggregatedResult> {
        let value = self.cache.get(key)?;
        match serde_json::from_value(value) {
            Ok(result) => Some(result),
            Err(e) => {
                log::warn!("Dropping undecodable cache entry {}: {}", key, e);
                self.cache.invalidate(key);
                None
            }
        }
    }

    /// 规划 → 执行 → 降级 → 聚合 → 回填 → 反馈 (不查缓存)
    async fn run(
        &self,
        query: &InterpretedQuery,
        key: &str,
        token: &CancellationToken,
    ) -> Result<QueryResponse> {
        let plan = self.planner.create_plan(query).await;
        if !plan.is_viable() {
            log::warn!(
                "Plan {} for '{}' has no reachable shard",
                plan.execution_id,
                query.text
            );
        }

        let mut report = self.executor.execute(&plan, token).await?;
        let mut fallback = None;

        if report.critical_failure.is_some()
            && self.config.executor.run_primary_fallback
            && !token.is_cancelled()
        {
            if let Some(fallback_plan) = plan.fallback(FallbackKind::PrimaryShardFailure) {
                if fallback_plan.fragment_count() > 0 {
                    log::info!(
                        "Execution {}: running primary-shard-failure fallback over {} shards",
                        plan.execution_id,
                        fallback_plan.fragment_count()
                    );
                    let fallback_report = self.executor.execute(fallback_plan, token).await?;
                    merge_fallback(&mut report, fallback_report);
                    fallback = Some(FallbackKind::PrimaryShardFailure);
                    self.counters.fallbacks.fetch_add(1, Ordering::Relaxed);
                }
            }
        }

        self.feedback(query, &report.results);

        if report.cancelled && !report.has_data() {
            self.counters.cancelled.fetch_add(1, Ordering::Relaxed);
            observability::record_query("cancelled");
            return Err(FederationError::Cancelled(plan.execution_id.clone()));
        }

        let mut result = self.aggregator.aggregate_keyed(
            &report.results,
            plan.aggregation,
            &plan.execution_id,
            &query.text,
            key,
        );

        if !result.success() {
            self.counters.failed.fetch_add(1, Ordering::Relaxed);
            observability::record_query("failed");
            return Err(FederationError::NoShardData(format!(
                "all {} fragments of execution {} failed",
                report.results.len(),
                plan.execution_id
            )));
        }

        if result.is_partial() {
            self.counters.partial.fetch_add(1, Ordering::Relaxed);
            observability::record_query("partial");
            add_partial_suggestions(&mut result, &plan);
        } else {
            observability::record_query("success");
        }

        if self.config.executor.cache_results && !report.cancelled {
            self.populate_cache(key, query, &result, &report, &plan);
        }

        Ok(QueryResponse {
            result,
            from_cache: false,
            plan: Some(plan),
            report: Some(report),
            fallback,
        })
    }

    /// 只缓存完整 (无失败分片) 的结果
    fn populate_cache(
        &self,
        key: &str,
        query: &InterpretedQuery,
        result: &AggregatedResult,
        report: &ExecutionReport,
        plan: &ExecutionPlan,
    ) {
        if !result.caching.cacheable || result.is_partial() {
            return;
        }
        let value = match serde_json::to_value(result) {
            Ok(v) => v,
            Err(e) => {
                log::warn!("Failed to serialize result {} for cache: {}", key, e);
                return;
            }
        };

        let mut source = CacheSourceInfo::new(report.duration_ms)
            .with_tags([query.data_type.clone(), plan.strategy.as_str().to_string()]);
        if plan.estimated_duration_ms.is_finite() {
            source = source.with_predicted(plan.estimated_duration_ms.round() as u64);
        }
        self.cache.set(key, value, query, &source);
    }

    /// 把执行结果反馈给路由器与规划器；取消和跳过不计入分片可靠性
    fn feedback(&self, query: &InterpretedQuery, results: &[ShardResult]) {
        let complexity = query.complexity();
        for result in results {
            let counts = result
                .error
                .as_ref()
                .map_or(true, |e| e.counts_against_shard());
            if !counts {
                continue;
            }
            self.router.update_performance_from_result(
                &result.shard_id,
                result.query_time_ms as f64,
                result.success,
                result.data_size(),
                complexity,
            );
            self.planner
                .record_execution(&result.shard_id, result.query_time_ms as f64);
        }
    }

    // ───────────────────────────────────────────────────────────────────────
    // 洞察
    // ───────────────────────────────────────────────────────────────────────

    pub fn routing_insights(&self) -> RoutingInsights {
        self.router.insights()
    }

    pub fn routing_stats(&self) -> RoutingHistory {
        self.router.get_stats()
    }

    pub fn cache_insights(&self) -> CacheInsights {
        self.cache.insights()
    }

    pub fn planner_insights(&self) -> PlannerInsights {
        self.planner.insights()
    }

    pub fn stats(&self) -> OrchestratorStats {
        OrchestratorStats {
            queries: self.counters.queries.load(Ordering::Relaxed),
            cache_hits: self.counters.cache_hits.load(Ordering::Relaxed),
            fallbacks: self.counters.fallbacks.load(Ordering::Relaxed),
            partial: self.counters.partial.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            cancelled: self.counters.cancelled.load(Ordering::Relaxed),
        }
    }

    // ───────────────────────────────────────────────────────────────────────
    // 后台任务
    // ───────────────────────────────────────────────────────────────────────

    /// 启动路由器与缓存的后台维护任务
    pub fn start_background(self: &Arc<Self>) -> BackgroundTasks {
        let token = CancellationToken::new();
        let mut handles = Arc::clone(&self.router).spawn_maintenance(token.child_token());

        let warmer: Arc<dyn CacheWarmer> = Arc::clone(self) as Arc<dyn CacheWarmer>;
        handles.extend(
            Arc::clone(&self.cache).spawn_maintenance(warmer, token.child_token()),
        );

        log::info!("Started {} background tasks", handles.len());
        BackgroundTasks { token, handles }
    }
}

#[async_trait]
impl CacheWarmer for Orchestrator {
    async fn warm(&self, task: &CacheWarmingTask) -> bool {
        match self.run(&task.query, &task.key, &CancellationToken::new()).await {
            Ok(response) => {
                log::debug!(
                    "Warmed cache key {} ({} records)",
                    task.key,
                    response.result.record_count()
                );
                true
            }
            Err(e) => {
                log::debug!("Cache warming for {} failed: {}", task.key, e);
                false
            }
        }
    }
}

/// 合并降级计划的结果：主计划中已成功的分片不重复
fn merge_fallback(report: &mut ExecutionReport, fallback: ExecutionReport) {
    for result in fallback.results {
        let already_ok = report
            .results
            .iter()
            .any(|r| r.success && r.shard_id == result.shard_id);
        if !already_ok {
            report.results.push(result);
        }
    }
    report.phases_completed += fallback.phases_completed;
    report.phases_skipped += fallback.phases_skipped;
    report.cancelled |= fallback.cancelled;
    report.duration_ms += fallback.duration_ms;
}

/// 部分失败时的补充建议
fn add_partial_suggestions(result: &mut AggregatedResult, plan: &ExecutionPlan) {
    let failed = result.errors.len();
    let total = result.metadata.sources.len();
    result.insights.suggestions.push(format!(
        "{} of {} shards failed, results are partial",
        failed, total
    ));
    if let Some(partial) = plan.fallback(FallbackKind::PartialFailure) {
        let healthy = partial.fragment_count();
        if healthy > 0 {
            result.insights.suggestions.push(format!(
                "partial-failure plan restricted to {} healthy shards is available",
                healthy
            ));
        }
    }
}
