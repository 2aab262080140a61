//! 动态路由器
//!
//! 提供分片的多维度评分与选择：
//! - 按策略权重对 {延迟, 可靠性, 成本, 新鲜度} 打分，外加固定 0.2×能力匹配
//! - 违反约束的分片得分乘以 0.1 (软惩罚，从不剔除)
//! - 根据执行反馈维护每个分片的 EMA 延迟 / 成功率与历史样本
//! - 有界路由日志 (用于学习与洞察)

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::predictor::{blend_hint, ScorePredictor};
use super::strategy::RoutingStrategy;
use crate::query::{fingerprint, InterpretedQuery, TemporalScope};
use crate::shard::{load_factor, PerformanceSample, ShardRegistry, ShardState, ShardStateStore};
use crate::utils::{now_ms, RouterConfig};

/// 能力匹配的固定权重
const CAPABILITY_WEIGHT: f64 = 0.2;
/// 加权和上限 (策略权重之和为 1，再加能力匹配项)
const MAX_WEIGHTED_SUM: f64 = 1.0 + CAPABILITY_WEIGHT;
/// 违反约束时的惩罚系数
const CONSTRAINT_PENALTY: f64 = 0.1;
/// 回归预测在延迟估算中的权重
const REGRESSION_BLEND: f64 = 0.3;
/// 成本归一化上限 (hot × 最大数据量 × 最大复杂度)
const MAX_RAW_COST: f64 = 4.0;
/// 单分片查询需要备份的可靠性阈值
const BACKUP_RELIABILITY_THRESHOLD: f64 = 0.95;
/// 备份分片的最低可靠性
const BACKUP_MIN_RELIABILITY: f64 = 0.9;

// ═══════════════════════════════════════════════════════════════════════════
// 路由决策
// ═══════════════════════════════════════════════════════════════════════════

/// 各维度得分
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CriterionScores {
    pub latency: f64,
    pub reliability: f64,
    pub cost: f64,
    pub freshness: f64,
    pub capability_match: f64,
}

/// 路由决策
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub shard_id: String,
    /// 最终得分 ∈ [0, 1]
    pub score: f64,
    /// 未施加约束惩罚前的得分
    pub unconstrained_score: f64,
    pub criteria: CriterionScores,
    pub estimated_latency_ms: f64,
    pub reliability: f64,
    /// 是否满足策略约束
    pub constraints_satisfied: bool,
}

/// 路由日志条目
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingLogEntry {
    pub timestamp_ms: i64,
    pub query_fingerprint: String,
    pub strategy: String,
    pub decisions: Vec<(String, f64)>,
}

/// 路由统计
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoutingHistory {
    pub total_routings: u64,
    pub constraint_violations: u64,
    pub feedback_samples: u64,
    pub strategy_usage: HashMap<String, u64>,
}

// ═══════════════════════════════════════════════════════════════════════════
// 动态路由器
// ═══════════════════════════════════════════════════════════════════════════

/// 动态路由器
pub struct DynamicRouter {
    config: RouterConfig,
    /// 分片状态表 (与规划器共享)
    states: Arc<ShardStateStore>,
    /// 分片注册表
    registry: Arc<ShardRegistry>,
    /// 路由策略 (内置 + 自定义)
    strategies: DashMap<String, RoutingStrategy>,
    /// 有界路由日志
    routing_log: RwLock<VecDeque<RoutingLogEntry>>,
    /// 路由统计
    history: RwLock<RoutingHistory>,
    /// 可选的提示分数预测器
    predictor: Option<Arc<dyn ScorePredictor>>,
}

impl DynamicRouter {
    pub fn new(
        config: RouterConfig,
        registry: Arc<ShardRegistry>,
        states: Arc<ShardStateStore>,
    ) -> Self {
        let strategies = DashMap::new();
        for strategy in RoutingStrategy::builtins() {
            strategies.insert(strategy.name.clone(), strategy);
        }

        Self {
            config,
            states,
            registry,
            strategies,
            routing_log: RwLock::new(VecDeque::new()),
            history: RwLock::new(RoutingHistory::default()),
            predictor: None,
        }
    }

    pub fn with_defaults(registry: Arc<ShardRegistry>) -> Self {
        Self::new(RouterConfig::default(), registry, ShardStateStore::shared())
    }

    /// 设置提示分数预测器
    pub fn with_predictor(mut self, predictor: Arc<dyn ScorePredictor>) -> Self {
        self.predictor = Some(predictor);
        self
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    pub fn states(&self) -> Arc<ShardStateStore> {
        Arc::clone(&self.states)
    }

    pub fn registry(&self) -> Arc<ShardRegistry> {
        Arc::clone(&self.registry)
    }

    /// 注册自定义策略 (同名覆盖内置策略)
    pub fn register_strategy(&self, strategy: RoutingStrategy) {
        self.strategies.insert(strategy.name.clone(), strategy);
    }

    /// 查找策略，未知名称回退到 balanced
    pub fn strategy(&self, name: &str) -> RoutingStrategy {
        match self.strategies.get(name) {
            Some(s) => s.value().clone(),
            None => {
                log::debug!("Unknown routing strategy '{}', using balanced", name);
                RoutingStrategy::balanced()
            }
        }
    }

    /// 分片当前状态，无历史时返回乐观默认值
    pub fn shard_state(&self, shard_id: &str) -> ShardState {
        self.states
            .get(shard_id)
            .unwrap_or_else(|| self.default_state(shard_id))
    }

    fn default_state(&self, shard_id: &str) -> ShardState {
        ShardState::new(
            shard_id,
            self.registry.capabilities(shard_id),
            self.config.default_latency_ms,
            self.config.default_reliability,
            self.config.history_capacity,
        )
    }

    // ───────────────────────────────────────────────────────────────────────
    // 评分
    // ───────────────────────────────────────────────────────────────────────

    /// 对候选分片评分，返回按得分降序排列的全部决策 (受惩罚的分片也保留)
    pub fn route(
        &self,
        query: &InterpretedQuery,
        candidate_shard_ids: &[String],
        strategy_name: &str,
    ) -> Vec<RoutingDecision> {
        let strategy = self.strategy(strategy_name);

        let mut decisions: Vec<RoutingDecision> = candidate_shard_ids
            .iter()
            .map(|id| {
                let state = self.shard_state(id);
                self.score_shard(query, &state, &strategy)
            })
            .collect();

        sort_decisions(&mut decisions);
        self.log_routing(query, &strategy, &decisions);
        decisions
    }

    /// 对单个分片评分
    pub fn score_shard(
        &self,
        query: &InterpretedQuery,
        state: &ShardState,
        strategy: &RoutingStrategy,
    ) -> RoutingDecision {
        let estimated_latency_ms = self.estimate_latency(query, state);
        let reliability = state.reliability.clamp(0.0, 1.0);

        let criteria = CriterionScores {
            latency: latency_score(estimated_latency_ms),
            reliability,
            cost: 1.0 - normalized_cost(query, state),
            freshness: freshness_score(query, state),
            capability_match: state.capabilities.capability_match(query),
        };

        let w = strategy.weights;
        let weighted = w.latency * criteria.latency
            + w.reliability * criteria.reliability
            + w.cost * criteria.cost
            + w.freshness * criteria.freshness
            + CAPABILITY_WEIGHT * criteria.capability_match;

        let hint = self
            .predictor
            .as_ref()
            .and_then(|p| p.predict(query, state));
        // 按上限归一化而非截断，强分片之间仍保持可区分
        let normalized = weighted / MAX_WEIGHTED_SUM;
        let unconstrained_score = blend_hint(normalized, hint).clamp(0.0, 1.0);

        let constraints_satisfied = !strategy.violates(reliability, estimated_latency_ms);
        let score = if constraints_satisfied {
            unconstrained_score
        } else {
            unconstrained_score * CONSTRAINT_PENALTY
        };

        RoutingDecision {
            shard_id: state.shard_id.clone(),
            score,
            unconstrained_score,
            criteria,
            estimated_latency_ms,
            reliability,
            constraints_satisfied,
        }
    }

    /// 延迟估算
    ///
    /// `baseline × loadFactor × complexityFactor × dataSizeFactor`，
    /// 样本数达到阈值后与最近窗口的线性回归预测按 70/30 混合。
    pub fn estimate_latency(&self, query: &InterpretedQuery, state: &ShardState) -> f64 {
        let formula = state.avg_latency_ms
            * load_factor(state.load)
            * (1.0 + query.complexity())
            * data_size_factor(query.temporal.as_ref());

        if !formula.is_finite() || state.samples.len() < self.config.min_regression_samples {
            return formula;
        }

        let window: Vec<f64> = state
            .samples
            .last_n(self.config.regression_window)
            .map(|s| s.latency_ms)
            .collect();

        match linear_forecast(&window) {
            Some(predicted) => {
                (1.0 - REGRESSION_BLEND) * formula + REGRESSION_BLEND * predicted.max(0.0)
            }
            None => formula,
        }
    }

    // ───────────────────────────────────────────────────────────────────────
    // 选择
    // ───────────────────────────────────────────────────────────────────────

    /// 从评分结果中选择执行分片
    ///
    /// - 单分片查询: 最优分片；若其可靠性 < 0.95 且存在可靠性 > 0.9 的备选，加入备份
    /// - 多分片/分析查询: 得分 ≥ 阈值的前 N 个互补分片 (N ≤ 3)
    ///
    /// 结果永不为空 (只要有候选)，没有分片满足要求时退回最优分片。
    pub fn select(
        &self,
        query: &InterpretedQuery,
        decisions: &[RoutingDecision],
    ) -> Vec<RoutingDecision> {
        let Some(best) = decisions.first() else {
            return Vec::new();
        };

        if !query.is_multi_shard() {
            let mut selected = vec![best.clone()];
            if best.reliability < BACKUP_RELIABILITY_THRESHOLD {
                if let Some(backup) = decisions
                    .iter()
                    .skip(1)
                    .find(|d| d.reliability > BACKUP_MIN_RELIABILITY)
                {
                    log::debug!(
                        "Adding backup shard {} for {} (reliability {:.3})",
                        backup.shard_id,
                        best.shard_id,
                        best.reliability
                    );
                    selected.push(backup.clone());
                }
            }
            return selected;
        }

        let max = self.config.max_selected_shards.max(1);
        let mut selected: Vec<RoutingDecision> = Vec::with_capacity(max);
        for decision in decisions {
            if selected.len() >= max {
                break;
            }
            if decision.score < self.config.min_selection_score {
                continue;
            }
            if self.is_complementary(decision, &selected) {
                selected.push(decision.clone());
            }
        }

        if selected.is_empty() {
            selected.push(best.clone());
        }
        selected
    }

    /// 评分并选择
    pub fn route_and_select(
        &self,
        query: &InterpretedQuery,
        candidate_shard_ids: &[String],
        strategy_name: &str,
    ) -> Vec<RoutingDecision> {
        let decisions = self.route(query, candidate_shard_ids, strategy_name);
        self.select(query, &decisions)
    }

    /// 与已选分片能力完全相同 (同类型、同层级、同数据类型) 的分片不提供额外价值
    fn is_complementary(&self, candidate: &RoutingDecision, selected: &[RoutingDecision]) -> bool {
        let caps = self.registry.capabilities(&candidate.shard_id);
        selected.iter().all(|s| {
            let other = self.registry.capabilities(&s.shard_id);
            let mut a = caps.data_types.clone();
            let mut b = other.data_types.clone();
            a.sort();
            b.sort();
            !(caps.kind == other.kind && caps.tier == other.tier && a == b)
        })
    }

    // ───────────────────────────────────────────────────────────────────────
    // 反馈
    // ───────────────────────────────────────────────────────────────────────

    /// 执行结果反馈：更新 EMA 延迟 / 成功率、样本环形缓冲区与分位数
    pub fn update_performance_from_result(
        &self,
        shard_id: &str,
        latency_ms: f64,
        success: bool,
        data_size: usize,
        complexity: f64,
    ) {
        let sample = PerformanceSample {
            timestamp_ms: now_ms(),
            latency_ms,
            success,
            data_size,
            complexity,
        };
        let alpha = self.config.ema_alpha;

        let (avg, reliability) = self.states.update(
            shard_id,
            || self.default_state(shard_id),
            |state| {
                state.record_sample(sample, alpha);
                (state.avg_latency_ms, state.reliability)
            },
        );

        self.history.write().feedback_samples += 1;

        log::trace!(
            "Shard {} feedback: latency={:.1}ms success={} -> avg={:.1}ms reliability={:.3}",
            shard_id,
            latency_ms,
            success,
            avg,
            reliability
        );
    }

    /// 记录一次路由 (统计 + 有界日志)
    pub fn log_routing(
        &self,
        query: &InterpretedQuery,
        strategy: &RoutingStrategy,
        decisions: &[RoutingDecision],
    ) {
        {
            let mut history = self.history.write();
            history.total_routings += 1;
            history.constraint_violations += decisions
                .iter()
                .filter(|d| !d.constraints_satisfied)
                .count() as u64;
            *history
                .strategy_usage
                .entry(strategy.name.clone())
                .or_insert(0) += 1;
        }

        let entry = RoutingLogEntry {
            timestamp_ms: now_ms(),
            query_fingerprint: fingerprint(query),
            strategy: strategy.name.clone(),
            decisions: decisions
                .iter()
                .map(|d| (d.shard_id.clone(), d.score))
                .collect(),
        };

        let mut log = self.routing_log.write();
        log.push_back(entry);
        while log.len() > self.config.routing_log_capacity {
            log.pop_front();
        }
    }

    /// 最近的路由日志
    pub fn routing_log(&self, limit: usize) -> Vec<RoutingLogEntry> {
        let log = self.routing_log.read();
        let skip = log.len().saturating_sub(limit);
        log.iter().skip(skip).cloned().collect()
    }

    /// 路由统计
    pub fn get_stats(&self) -> RoutingHistory {
        self.history.read().clone()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// 评分函数
// ═══════════════════════════════════════════════════════════════════════════

/// 按得分降序、shard_id 升序排列
pub fn sort_decisions(decisions: &mut [RoutingDecision]) {
    decisions.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.shard_id.cmp(&b.shard_id))
    });
}

/// 延迟得分：100ms → 0.91，1s → 0.5，无穷大 → 0
pub fn latency_score(latency_ms: f64) -> f64 {
    if !latency_ms.is_finite() {
        return 0.0;
    }
    1.0 / (1.0 + latency_ms.max(0.0) / 1000.0)
}

/// 时间范围对数据量的放大系数
pub fn data_size_factor(temporal: Option<&TemporalScope>) -> f64 {
    match temporal {
        Some(TemporalScope::Recent) => 0.8,
        Some(TemporalScope::Historical) => 1.5,
        Some(TemporalScope::Range { start_ms, end_ms }) => {
            let days = (end_ms - start_ms).max(0) as f64 / 86_400_000.0;
            1.0 + (days / 30.0).min(1.0) * 0.5
        }
        None => 1.0,
    }
}

/// 归一化成本 ∈ [0, 1]：层级权重 × 数据量 × 复杂度
pub fn normalized_cost(query: &InterpretedQuery, state: &ShardState) -> f64 {
    let size = ((1.0 + state.total_records as f64).log10() / 7.0).clamp(0.1, 1.0);
    let raw = state.capabilities.tier.cost_weight() * size * (1.0 + query.complexity());
    (raw / MAX_RAW_COST).clamp(0.0, 1.0)
}

/// 新鲜度得分
pub fn freshness_score(query: &InterpretedQuery, state: &ShardState) -> f64 {
    use crate::shard::StorageTier;

    match state.capabilities.tier {
        StorageTier::Hot if query.needs_recent_data() => 0.9,
        StorageTier::Cold => 0.3,
        _ => 0.5,
    }
}

/// 最小二乘线性回归，预测下一个点
fn linear_forecast(values: &[f64]) -> Option<f64> {
    let n = values.len();
    if n < 2 {
        return None;
    }
    let n_f = n as f64;
    let mean_x = (n_f - 1.0) / 2.0;
    let mean_y = values.iter().sum::<f64>() / n_f;

    let mut cov = 0.0;
    let mut var = 0.0;
    for (i, y) in values.iter().enumerate() {
        let dx = i as f64 - mean_x;
        cov += dx * (y - mean_y);
        var += dx * dx;
    }
    if var == 0.0 {
        return Some(mean_y);
    }
    let slope = cov / var;
    Some(mean_y + slope * (n_f - mean_x))
}

// ═══════════════════════════════════════════════════════════════════════════
// 测试
// ═══════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::QueryIntent;
    use crate::router::predictor::ConstantPredictor;
    use crate::shard::{InMemoryShard, ShardCapabilities, ShardKind, StorageTier};

    fn registry_with(shards: &[(&str, ShardKind, StorageTier)]) -> Arc<ShardRegistry> {
        let registry = Arc::new(ShardRegistry::new());
        for (id, kind, tier) in shards {
            registry.register(
                *id,
                Arc::new(InMemoryShard::new(Vec::new())),
                ShardCapabilities::new(*kind, *tier).with_data_types(["users"]),
            );
        }
        registry
    }

    fn ids(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    fn set_latency(router: &DynamicRouter, id: &str, latency: f64, reliability: f64) {
        let mut state = router.shard_state(id);
        state.avg_latency_ms = latency;
        state.reliability = reliability;
        state.recompute_derived();
        router.states().insert(state);
    }

    #[test]
    fn test_scores_in_unit_interval() {
        let registry = registry_with(&[
            ("a", ShardKind::Primary, StorageTier::Hot),
            ("b", ShardKind::Data, StorageTier::Cold),
        ]);
        let router = DynamicRouter::with_defaults(registry);
        let query = InterpretedQuery::new("find users", "users").with_temporal(TemporalScope::Recent);

        for name in ["performance", "reliability", "cost", "realtime", "balanced", "unknown"] {
            for d in router.route(&query, &ids(&["a", "b", "missing"]), name) {
                assert!(d.score >= 0.0 && d.score <= 1.0, "{} score {}", name, d.score);
            }
        }
    }

    #[test]
    fn test_strong_shards_keep_distinct_scores() {
        let registry = registry_with(&[
            ("a", ShardKind::Data, StorageTier::Hot),
            ("b", ShardKind::Data, StorageTier::Hot),
        ]);
        let router = DynamicRouter::with_defaults(registry);
        set_latency(&router, "a", 60.0, 0.99);
        set_latency(&router, "b", 10.0, 0.99);

        let query = InterpretedQuery::new("user 42", "users");
        let decisions = router.route(&query, &ids(&["a", "b"]), "balanced");

        // 更快的 b 靠分数胜出，而不是靠 id 排序
        assert_eq!(decisions[0].shard_id, "b");
        assert!(decisions[0].score > decisions[1].score);
        assert!(decisions.iter().all(|d| d.unconstrained_score < 1.0));
    }

    #[test]
    fn test_realtime_penalizes_slow_shard_without_removing_it() {
        let registry = registry_with(&[
            ("slow", ShardKind::Data, StorageTier::Warm),
            ("fast", ShardKind::Data, StorageTier::Hot),
        ]);
        let router = DynamicRouter::with_defaults(registry);
        set_latency(&router, "slow", 500.0, 0.99);
        set_latency(&router, "fast", 20.0, 0.99);

        let query = InterpretedQuery::new("latest users", "users");
        let decisions = router.route(&query, &ids(&["slow", "fast"]), "realtime");

        assert_eq!(decisions.len(), 2);
        let slow = decisions.iter().find(|d| d.shard_id == "slow").unwrap();
        assert_eq!(slow.estimated_latency_ms, 500.0);
        assert!(!slow.constraints_satisfied);
        assert!(slow.score <= 0.1 * slow.unconstrained_score + 1e-12);
        assert_eq!(decisions[0].shard_id, "fast");
    }

    #[test]
    fn test_no_history_uses_optimistic_defaults() {
        let router = DynamicRouter::with_defaults(registry_with(&[]));
        let state = router.shard_state("never-seen");
        assert_eq!(state.avg_latency_ms, 100.0);
        assert_eq!(state.reliability, 0.95);
    }

    #[test]
    fn test_feedback_updates_state() {
        let router = DynamicRouter::with_defaults(registry_with(&[(
            "a",
            ShardKind::Data,
            StorageTier::Warm,
        )]));
        router.update_performance_from_result("a", 300.0, true, 1024, 0.2);
        router.update_performance_from_result("a", 300.0, false, 0, 0.2);

        let state = router.shard_state("a");
        assert_eq!(state.samples.len(), 2);
        assert_eq!(state.avg_latency_ms, 300.0);
        assert!(state.reliability < 0.95);
        assert_eq!(router.get_stats().feedback_samples, 2);
    }

    #[test]
    fn test_regression_blend_after_enough_samples() {
        let router = DynamicRouter::with_defaults(registry_with(&[(
            "a",
            ShardKind::Data,
            StorageTier::Warm,
        )]));
        // 延迟线性增长
        for i in 0..20 {
            router.update_performance_from_result("a", 100.0 + i as f64 * 10.0, true, 0, 0.0);
        }
        let state = router.shard_state("a");
        let query = InterpretedQuery::new("q", "users");
        let formula = state.avg_latency_ms;
        let estimate = router.estimate_latency(&query, &state);

        // 回归预测 (≈300ms) 高于 EMA，混合后估算应高于纯公式
        assert!(estimate > formula);
    }

    #[test]
    fn test_single_shard_selection_with_backup() {
        let registry = registry_with(&[
            ("a", ShardKind::Primary, StorageTier::Hot),
            ("b", ShardKind::Data, StorageTier::Hot),
        ]);
        let router = DynamicRouter::with_defaults(registry);
        set_latency(&router, "a", 10.0, 0.92);
        set_latency(&router, "b", 200.0, 0.97);

        let query = InterpretedQuery::new("user 42", "users");
        let decisions = router.route(&query, &ids(&["a", "b"]), "performance");
        let selected = router.select(&query, &decisions);

        assert_eq!(selected[0].shard_id, "a");
        assert_eq!(selected.len(), 2);
        assert_eq!(selected[1].shard_id, "b");
    }

    #[test]
    fn test_multi_shard_selection_skips_duplicates() {
        let registry = registry_with(&[
            ("a", ShardKind::Data, StorageTier::Hot),
            ("a-copy", ShardKind::Data, StorageTier::Hot),
            ("c", ShardKind::Analytics, StorageTier::Warm),
            ("d", ShardKind::TimeSeries, StorageTier::Warm),
            ("e", ShardKind::Primary, StorageTier::Warm),
        ]);
        let router = DynamicRouter::with_defaults(registry);
        let query = InterpretedQuery::new("analyze users", "users")
            .with_intent(QueryIntent::Analyze)
            .with_targets(["a", "a-copy", "c", "d", "e"]);

        let decisions = router.route(&query, &query.target_shard_ids, "balanced");
        let selected = router.select(&query, &decisions);

        assert!(selected.len() <= 3);
        let has_a = selected.iter().any(|d| d.shard_id == "a");
        let has_copy = selected.iter().any(|d| d.shard_id == "a-copy");
        assert!(!(has_a && has_copy));
        assert!(selected.iter().all(|d| d.score >= 0.5));
    }

    #[test]
    fn test_selection_falls_back_to_best() {
        let registry = registry_with(&[("a", ShardKind::Data, StorageTier::Cold)]);
        let router = DynamicRouter::with_defaults(registry);
        set_latency(&router, "a", 50_000.0, 0.1);

        let query = InterpretedQuery::new("analyze", "users").with_intent(QueryIntent::Analyze);
        let selected = router.route_and_select(&query, &ids(&["a"]), "realtime");
        assert_eq!(selected.len(), 1);
        assert!(selected[0].score < 0.5);
    }

    #[test]
    fn test_predictor_hint_is_blended() {
        let registry = registry_with(&[("a", ShardKind::Data, StorageTier::Warm)]);
        let plain = DynamicRouter::with_defaults(Arc::clone(&registry));
        let hinted = DynamicRouter::with_defaults(registry).with_predictor(Arc::new(ConstantPredictor(1.0)));

        let query = InterpretedQuery::new("q", "users");
        let a = plain.route(&query, &ids(&["a"]), "balanced")[0].unconstrained_score;
        let b = hinted.route(&query, &ids(&["a"]), "balanced")[0].unconstrained_score;
        assert!(b >= a);
    }

    #[test]
    fn test_routing_log_is_bounded() {
        let mut config = RouterConfig::default();
        config.routing_log_capacity = 3;
        let router = DynamicRouter::new(config, registry_with(&[]), ShardStateStore::shared());
        let query = InterpretedQuery::new("q", "users");
        for _ in 0..10 {
            router.route(&query, &ids(&["x"]), "cost");
        }
        assert_eq!(router.routing_log(100).len(), 3);
        assert_eq!(router.get_stats().total_routings, 10);
        assert_eq!(router.get_stats().strategy_usage.get("cost"), Some(&10));
    }

    #[test]
    fn test_linear_forecast() {
        let f = linear_forecast(&[1.0, 2.0, 3.0, 4.0]).unwrap();
        assert!((f - 5.0).abs() < 1e-9);
        assert_eq!(linear_forecast(&[7.0, 7.0]).unwrap(), 7.0);
        assert!(linear_forecast(&[1.0]).is_none());
    }
}
