//! Prometheus 指标导出模块
//!
//! 提供联邦查询的监控指标，包括：
//! - 查询结果 (成功 / 部分失败 / 失败 / 缓存命中)
//! - 分片片段延迟与结果
//! - 缓存命中、淘汰与容量
//! - 执行策略分布

use lazy_static::lazy_static;
use prometheus::{
    self, Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts,
    Registry, TextEncoder,
};

lazy_static! {
    /// 全局 Prometheus Registry
    pub static ref REGISTRY: Registry = Registry::new();

    // ═══════════════════════════════════════════════════════════════════
    // 查询指标
    // ═══════════════════════════════════════════════════════════════════

    /// 联邦查询总数
    pub static ref QUERY_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("query_total", "Total number of federated queries")
            .namespace("qafederation"),
        &["outcome"]
    ).expect("Failed to create QUERY_TOTAL metric");

    /// 执行策略分布
    pub static ref PLAN_STRATEGY_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("plan_strategy_total", "Execution plans by strategy")
            .namespace("qafederation"),
        &["strategy"]
    ).expect("Failed to create PLAN_STRATEGY_TOTAL metric");

    // ═══════════════════════════════════════════════════════════════════
    // 分片指标
    // ═══════════════════════════════════════════════════════════════════

    /// 片段执行延迟 (毫秒)
    pub static ref FRAGMENT_LATENCY: HistogramVec = HistogramVec::new(
        HistogramOpts::new("fragment_latency_ms", "Shard fragment latency in milliseconds")
            .namespace("qafederation")
            .buckets(vec![1.0, 5.0, 10.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 5000.0, 30000.0]),
        &["shard_id"]
    ).expect("Failed to create FRAGMENT_LATENCY metric");

    /// 片段结果
    pub static ref FRAGMENT_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("fragment_total", "Shard fragments by result")
            .namespace("qafederation"),
        &["shard_id", "result"]
    ).expect("Failed to create FRAGMENT_TOTAL metric");

    // ═══════════════════════════════════════════════════════════════════
    // 缓存指标
    // ═══════════════════════════════════════════════════════════════════

    pub static ref CACHE_HITS: IntCounter = IntCounter::new(
        "qafederation_cache_hits", "Predictive cache hits"
    ).expect("Failed to create CACHE_HITS metric");

    pub static ref CACHE_MISSES: IntCounter = IntCounter::new(
        "qafederation_cache_misses", "Predictive cache misses"
    ).expect("Failed to create CACHE_MISSES metric");

    pub static ref CACHE_EVICTIONS: IntCounter = IntCounter::new(
        "qafederation_cache_evictions", "Predictive cache evictions"
    ).expect("Failed to create CACHE_EVICTIONS metric");

    /// 当前缓存字节数
    pub static ref CACHE_BYTES: IntGauge = IntGauge::new(
        "qafederation_cache_bytes", "Current predictive cache size in bytes"
    ).expect("Failed to create CACHE_BYTES metric");
}

/// 初始化所有指标到 Registry
pub fn init_metrics() {
    REGISTRY.register(Box::new(QUERY_TOTAL.clone())).ok();
    REGISTRY.register(Box::new(PLAN_STRATEGY_TOTAL.clone())).ok();
    REGISTRY.register(Box::new(FRAGMENT_LATENCY.clone())).ok();
    REGISTRY.register(Box::new(FRAGMENT_TOTAL.clone())).ok();
    REGISTRY.register(Box::new(CACHE_HITS.clone())).ok();
    REGISTRY.register(Box::new(CACHE_MISSES.clone())).ok();
    REGISTRY.register(Box::new(CACHE_EVICTIONS.clone())).ok();
    REGISTRY.register(Box::new(CACHE_BYTES.clone())).ok();

    log::info!("Prometheus metrics initialized");
}

/// 导出 Prometheus 文本格式
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        log::warn!("Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

// ═══════════════════════════════════════════════════════════════════════════
// 辅助函数
// ═══════════════════════════════════════════════════════════════════════════

/// 记录片段执行结果
#[inline]
pub fn record_fragment(shard_id: &str, latency_ms: u64, success: bool) {
    FRAGMENT_LATENCY
        .with_label_values(&[shard_id])
        .observe(latency_ms as f64);
    FRAGMENT_TOTAL
        .with_label_values(&[shard_id, if success { "success" } else { "failure" }])
        .inc();
}

/// 记录查询结果
#[inline]
pub fn record_query(outcome: &str) {
    QUERY_TOTAL.with_label_values(&[outcome]).inc();
}

/// 记录执行策略
#[inline]
pub fn record_plan_strategy(strategy: &str) {
    PLAN_STRATEGY_TOTAL.with_label_values(&[strategy]).inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_export() {
        init_metrics();
        record_query("success");
        record_fragment("shard-a", 12, true);
        CACHE_HITS.inc();

        let text = gather_metrics();
        assert!(text.contains("qafederation_query_total"));
        assert!(text.contains("qafederation_fragment_latency_ms"));
    }
}
