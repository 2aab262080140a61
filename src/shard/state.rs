//! 分片运行状态
//!
//! `ShardState` 由路由器持续更新 (反馈 / 后台刷新)，由规划器读取。
//! 状态表是显式持有、可注入的 `ShardStateStore`，内部使用 DashMap 分段锁，
//! 请求路径和后台任务都通过它的访问器修改状态。

use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use super::capabilities::ShardCapabilities;
use super::handle::{HealthStatus, ShardHealth, ShardMetrics};
use crate::utils::ring_buffer::RingBuffer;

/// 单次执行的性能样本
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSample {
    /// 采样时间 (毫秒时间戳)
    pub timestamp_ms: i64,
    pub latency_ms: f64,
    pub success: bool,
    pub data_size: usize,
    pub complexity: f64,
}

/// 负载放大系数，load ∈ [0, 1]
pub fn load_factor(load: f64) -> f64 {
    1.0 + load.clamp(0.0, 1.0)
}

/// 分片状态
#[derive(Debug, Clone)]
pub struct ShardState {
    pub shard_id: String,
    pub capabilities: ShardCapabilities,
    /// 当前负载 ∈ [0, 1]
    pub load: f64,
    pub cpu_usage: f64,
    pub memory_usage_mb: f64,
    pub health: HealthStatus,
    /// 有界历史样本
    pub samples: RingBuffer<PerformanceSample>,
    /// 延迟 EMA (毫秒)
    pub avg_latency_ms: f64,
    /// 成功率 EMA
    pub reliability: f64,
    pub p95_latency_ms: f64,
    pub p99_latency_ms: f64,
    /// 负载修正后的延迟
    pub adjusted_latency_ms: f64,
    /// 调度优先级 (越大越优先)
    pub priority: f64,
    /// 指标可信度 ∈ [0, 1]，长时间无更新会衰减
    pub confidence: f64,
    pub total_records: u64,
    pub query_count: u64,
    /// 最近一次更新 (毫秒时间戳)
    pub last_updated_ms: i64,
    /// 探测失败时生成的占位状态
    pub synthetic: bool,
}

impl ShardState {
    /// 无历史分片的乐观默认状态
    pub fn new(
        shard_id: impl Into<String>,
        capabilities: ShardCapabilities,
        default_latency_ms: f64,
        default_reliability: f64,
        history_capacity: usize,
    ) -> Self {
        let mut state = Self {
            shard_id: shard_id.into(),
            capabilities,
            load: 0.0,
            cpu_usage: 0.0,
            memory_usage_mb: 0.0,
            health: HealthStatus::Healthy,
            samples: RingBuffer::new(history_capacity),
            avg_latency_ms: default_latency_ms,
            reliability: default_reliability,
            p95_latency_ms: default_latency_ms,
            p99_latency_ms: default_latency_ms,
            adjusted_latency_ms: default_latency_ms,
            priority: 0.0,
            confidence: 0.5,
            total_records: 0,
            query_count: 0,
            last_updated_ms: chrono::Utc::now().timestamp_millis(),
            synthetic: false,
        };
        state.recompute_derived();
        state
    }

    /// 不可达分片的占位状态：不健康、延迟无穷大、最低优先级
    pub fn unreachable(shard_id: impl Into<String>, capabilities: ShardCapabilities) -> Self {
        let mut state = Self::new(shard_id, capabilities, f64::INFINITY, 0.0, 1);
        state.health = HealthStatus::Unhealthy;
        state.load = 1.0;
        state.p95_latency_ms = f64::INFINITY;
        state.p99_latency_ms = f64::INFINITY;
        state.adjusted_latency_ms = f64::INFINITY;
        state.priority = 0.0;
        state.confidence = 0.0;
        state.synthetic = true;
        state
    }

    /// 是否已有足够样本
    pub fn has_history(&self) -> bool {
        !self.samples.is_empty()
    }

    /// 应用健康探测结果
    pub fn apply_health(&mut self, health: &ShardHealth) {
        self.health = health.status;
        self.cpu_usage = health.cpu_usage;
        self.memory_usage_mb = health.memory_usage;
        self.load = (health.cpu_usage / 100.0).clamp(0.0, 1.0);
        self.synthetic = false;
        self.recompute_derived();
    }

    /// 应用分片指标 (无本地历史时使用分片自报的平均耗时)
    pub fn apply_metrics(&mut self, metrics: &ShardMetrics) {
        self.total_records = metrics.total_records;
        if !self.has_history() && metrics.query_count > 0 && metrics.avg_query_time > 0.0 {
            self.avg_latency_ms = metrics.avg_query_time;
        }
        self.recompute_derived();
    }

    /// 记录一次执行结果并更新 EMA / 分位数
    pub fn record_sample(&mut self, sample: PerformanceSample, alpha: f64) {
        let success = if sample.success { 1.0 } else { 0.0 };

        if self.has_history() && self.avg_latency_ms.is_finite() {
            self.avg_latency_ms = alpha * sample.latency_ms + (1.0 - alpha) * self.avg_latency_ms;
        } else {
            self.avg_latency_ms = sample.latency_ms;
        }
        self.reliability = alpha * success + (1.0 - alpha) * self.reliability;

        self.last_updated_ms = sample.timestamp_ms;
        self.query_count += 1;
        self.confidence = (self.confidence + 0.05).min(1.0);
        self.samples.push(sample);

        self.recompute_percentiles();
        self.recompute_derived();
    }

    /// 重新计算 p95 / p99
    pub fn recompute_percentiles(&mut self) {
        let mut latencies: Vec<f64> = self.samples.iter().map(|s| s.latency_ms).collect();
        if latencies.is_empty() {
            return;
        }
        latencies.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        self.p95_latency_ms = percentile(&latencies, 0.95);
        self.p99_latency_ms = percentile(&latencies, 0.99);
    }

    /// 重新计算负载修正延迟与优先级
    pub fn recompute_derived(&mut self) {
        self.adjusted_latency_ms = self.avg_latency_ms * load_factor(self.load);
        self.priority = if self.adjusted_latency_ms.is_finite() {
            self.health.weight() * self.reliability / (1.0 + self.adjusted_latency_ms / 1000.0)
        } else {
            0.0
        };
    }

    /// 陈旧指标衰减可信度，并清理过期样本。返回被清理的样本数
    pub fn decay(&mut self, now_ms: i64, stale_after_ms: i64, retention_ms: i64) -> usize {
        if now_ms - self.last_updated_ms > stale_after_ms {
            self.confidence *= 0.9;
        }
        let cutoff = now_ms - retention_ms;
        let pruned = self.samples.retain(|s| s.timestamp_ms >= cutoff);
        if pruned > 0 {
            self.recompute_percentiles();
        }
        pruned
    }
}

/// 已排序数组的分位数 (nearest-rank)
pub fn percentile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = (q * sorted.len() as f64).ceil() as usize;
    sorted[rank.saturating_sub(1).min(sorted.len() - 1)]
}

// ═══════════════════════════════════════════════════════════════════════════
// 状态表
// ═══════════════════════════════════════════════════════════════════════════

/// 分片状态表
#[derive(Debug, Default)]
pub struct ShardStateStore {
    states: DashMap<String, ShardState>,
}

impl ShardStateStore {
    pub fn new() -> Self {
        Self {
            states: DashMap::new(),
        }
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// 获取状态快照
    pub fn get(&self, shard_id: &str) -> Option<ShardState> {
        self.states.get(shard_id).map(|s| s.value().clone())
    }

    pub fn contains(&self, shard_id: &str) -> bool {
        self.states.contains_key(shard_id)
    }

    pub fn insert(&self, state: ShardState) {
        self.states.insert(state.shard_id.clone(), state);
    }

    /// 获取或创建状态后在条目锁内修改
    pub fn update<F, R>(&self, shard_id: &str, init: impl FnOnce() -> ShardState, f: F) -> R
    where
        F: FnOnce(&mut ShardState) -> R,
    {
        let mut entry = self
            .states
            .entry(shard_id.to_string())
            .or_insert_with(init);
        f(entry.value_mut())
    }

    /// 修改已存在的状态
    pub fn modify<F, R>(&self, shard_id: &str, f: F) -> Option<R>
    where
        F: FnOnce(&mut ShardState) -> R,
    {
        self.states.get_mut(shard_id).map(|mut s| f(s.value_mut()))
    }

    /// 对所有状态执行修改
    pub fn for_each_mut<F: FnMut(&mut ShardState)>(&self, mut f: F) {
        for mut entry in self.states.iter_mut() {
            f(entry.value_mut());
        }
    }

    pub fn shard_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.states.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn snapshot(&self) -> Vec<ShardState> {
        let mut states: Vec<ShardState> = self.states.iter().map(|e| e.value().clone()).collect();
        states.sort_by(|a, b| a.shard_id.cmp(&b.shard_id));
        states
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(ts: i64, latency: f64, success: bool) -> PerformanceSample {
        PerformanceSample {
            timestamp_ms: ts,
            latency_ms: latency,
            success,
            data_size: 100,
            complexity: 0.1,
        }
    }

    #[test]
    fn test_defaults_are_optimistic() {
        let state = ShardState::new("s1", ShardCapabilities::default(), 100.0, 0.95, 1000);
        assert_eq!(state.avg_latency_ms, 100.0);
        assert_eq!(state.reliability, 0.95);
        assert!(state.priority > 0.0);
        assert!(!state.synthetic);
    }

    #[test]
    fn test_unreachable_state() {
        let state = ShardState::unreachable("gone", ShardCapabilities::default());
        assert_eq!(state.health, HealthStatus::Unhealthy);
        assert!(state.adjusted_latency_ms.is_infinite());
        assert_eq!(state.priority, 0.0);
        assert!(state.synthetic);
    }

    #[test]
    fn test_record_sample_ema() {
        let mut state = ShardState::new("s1", ShardCapabilities::default(), 100.0, 1.0, 1000);

        // 第一个样本直接作为延迟基线
        state.record_sample(sample(1, 200.0, true), 0.1);
        assert_eq!(state.avg_latency_ms, 200.0);

        state.record_sample(sample(2, 100.0, false), 0.1);
        assert!((state.avg_latency_ms - 190.0).abs() < 1e-9);
        assert!((state.reliability - 0.9).abs() < 1e-9);
        assert_eq!(state.query_count, 2);
    }

    #[test]
    fn test_percentiles() {
        let mut state = ShardState::new("s1", ShardCapabilities::default(), 100.0, 1.0, 1000);
        for i in 1..=100 {
            state.record_sample(sample(i, i as f64, true), 0.1);
        }
        assert_eq!(state.p95_latency_ms, 95.0);
        assert_eq!(state.p99_latency_ms, 99.0);
    }

    #[test]
    fn test_history_is_capped() {
        let mut state = ShardState::new("s1", ShardCapabilities::default(), 100.0, 1.0, 10);
        for i in 0..25 {
            state.record_sample(sample(i, 10.0, true), 0.1);
        }
        assert_eq!(state.samples.len(), 10);
    }

    #[test]
    fn test_decay_prunes_and_lowers_confidence() {
        let mut state = ShardState::new("s1", ShardCapabilities::default(), 100.0, 1.0, 100);
        state.record_sample(sample(0, 10.0, true), 0.1);
        state.record_sample(sample(1_000, 10.0, true), 0.1);
        let before = state.confidence;

        let now = 2 * 60 * 60 * 1000;
        let pruned = state.decay(now, 5 * 60 * 1000, 60 * 60 * 1000);
        assert_eq!(pruned, 2);
        assert!(state.confidence < before);
    }

    #[test]
    fn test_store_update_and_modify() {
        let store = ShardStateStore::new();
        store.update(
            "s1",
            || ShardState::new("s1", ShardCapabilities::default(), 100.0, 0.95, 10),
            |s| s.load = 0.5,
        );
        assert_eq!(store.get("s1").unwrap().load, 0.5);

        assert!(store.modify("missing", |s| s.load = 1.0).is_none());
        assert_eq!(store.shard_ids(), vec!["s1".to_string()]);
    }
}
