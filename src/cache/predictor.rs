//! TTL 与预测计算

use super::entry::{AccessTrend, CacheEntry, CacheSourceInfo, Predictions};
use crate::query::{InterpretedQuery, TemporalScope};

pub const MINUTE_MS: u64 = 60 * 1000;
pub const HOUR_MS: u64 = 60 * MINUTE_MS;
pub const DAY_MS: u64 = 24 * HOUR_MS;

/// 大结果阈值 (10MB)
const LARGE_DATA_BYTES: u64 = 10 * 1024 * 1024;
/// 慢源查询阈值
const SLOW_SOURCE_MS: u64 = 5_000;
/// 预测慢查询阈值
const SLOW_PREDICTED_MS: u64 = 2_000;

/// 初始 TTL
///
/// 基础值按时间范围 (recent 5min / historical 24h / 其他 1h)，
/// 大结果 ×0.5，慢源查询 ×1.5，预测慢查询 ×1.3，上限 24h。
pub fn compute_ttl(query: &InterpretedQuery, size: u64, source: &CacheSourceInfo) -> u64 {
    let base = match query.temporal {
        Some(TemporalScope::Recent) => 5 * MINUTE_MS,
        Some(TemporalScope::Historical) => DAY_MS,
        _ => HOUR_MS,
    };

    let mut ttl = base as f64;
    if size > LARGE_DATA_BYTES {
        ttl *= 0.5;
    }
    if source.execution_time_ms > SLOW_SOURCE_MS {
        ttl *= 1.5;
    }
    if source
        .predicted_execution_time_ms
        .map_or(false, |p| p > SLOW_PREDICTED_MS)
    {
        ttl *= 1.3;
    }

    (ttl.round() as u64).min(DAY_MS)
}

/// 理想 TTL：周期 ×1.5 或平均间隔 ×2，限制在 [1min, 24h]
pub fn optimal_ttl(entry: &CacheEntry) -> Option<u64> {
    let ttl = match entry.pattern.periodicity_ms {
        Some(period) => period as f64 * 1.5,
        None => entry.pattern.mean_interval_ms()? * 2.0,
    };
    Some((ttl.round() as u64).clamp(MINUTE_MS, DAY_MS))
}

/// 淘汰分数：空闲时间、低频率、大体积、下降趋势都会提高分数；再访问概率降低分数
pub fn eviction_score(entry: &CacheEntry, now_ms: i64, probability: f64) -> f64 {
    let idle = (now_ms - entry.metadata.last_accessed_ms).max(0) as f64;
    let age_factor = (idle / DAY_MS as f64).min(1.0);
    let frequency_factor = 1.0 / (1.0 + entry.pattern.frequency);
    let size_factor = size_factor(entry.metadata.size);
    let trend = match entry.pattern.trend {
        AccessTrend::Decreasing => 0.1,
        AccessTrend::Increasing => -0.1,
        AccessTrend::Stable => 0.0,
    };

    0.3 * age_factor + 0.3 * frequency_factor + 0.2 * size_factor + trend - 0.1 * probability
}

/// 预加载优先级：高频、高可信度、小体积、上升趋势
pub fn preload_priority(entry: &CacheEntry, probability: f64) -> f64 {
    let frequency = (entry.pattern.frequency / 10.0).min(1.0);
    let increasing = if entry.pattern.trend == AccessTrend::Increasing {
        0.1
    } else {
        0.0
    };
    0.3 * frequency
        + 0.3 * entry.pattern.confidence
        + 0.2 * (1.0 - size_factor(entry.metadata.size))
        + increasing
        + 0.1 * probability
}

fn size_factor(size: u64) -> f64 {
    (size as f64 / LARGE_DATA_BYTES as f64).min(1.0)
}

/// 计算预测
///
/// `since_ms` 是计算再访问概率的参考时刻：命中时为本次访问之前的最后访问时间。
pub fn predict(entry: &CacheEntry, now_ms: i64, since_ms: i64) -> Predictions {
    let expected = entry.pattern.expected_interval_ms();
    let elapsed = (now_ms - since_ms).max(0) as f64;

    let probability = match expected {
        Some(interval) => (-elapsed / interval).exp(),
        None => 0.0,
    };

    Predictions {
        next_access_ms: expected.map(|i| entry.metadata.last_accessed_ms + i.round() as i64),
        probability,
        optimal_ttl_ms: optimal_ttl(entry),
        preload_priority: preload_priority(entry, probability),
        eviction_score: eviction_score(entry, now_ms, probability),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::entry::{AccessPattern, CacheMetadata};
    use serde_json::json;

    fn entry(size: u64, last_accessed: i64) -> CacheEntry {
        CacheEntry {
            key: "k".to_string(),
            data: json!([]),
            query: InterpretedQuery::new("q", "users"),
            metadata: CacheMetadata {
                created_at_ms: 0,
                last_accessed_ms: last_accessed,
                access_count: 0,
                size,
                ttl_ms: HOUR_MS,
                tags: vec![],
            },
            pattern: AccessPattern::new(0),
            predictions: Predictions::default(),
        }
    }

    #[test]
    fn test_recent_slow_source_ttl() {
        let query = InterpretedQuery::new("q", "events").with_temporal(TemporalScope::Recent);
        let ttl = compute_ttl(&query, 1024, &CacheSourceInfo::new(5050));
        assert_eq!(ttl, 450_000);
    }

    #[test]
    fn test_ttl_modifiers_and_cap() {
        let historical = InterpretedQuery::new("q", "events").with_temporal(TemporalScope::Historical);
        let slow = CacheSourceInfo::new(10_000).with_predicted(3_000);
        assert_eq!(compute_ttl(&historical, 10, &slow), DAY_MS);

        let plain = InterpretedQuery::new("q", "events");
        let large = 20 * 1024 * 1024;
        assert_eq!(compute_ttl(&plain, large, &CacheSourceInfo::new(10)), 30 * MINUTE_MS);
    }

    #[test]
    fn test_eviction_prefers_idle_large_entries() {
        let now = DAY_MS as i64;
        let fresh_small = entry(1024, now);
        let stale_large = entry(20 * 1024 * 1024, 0);
        assert!(eviction_score(&stale_large, now, 0.0) > eviction_score(&fresh_small, now, 0.0));
    }

    #[test]
    fn test_predict_probability_decays() {
        let mut e = entry(100, 0);
        for i in 1..=5 {
            e.pattern.record(i * 10 * MINUTE_MS as i64, 100);
        }
        e.metadata.last_accessed_ms = 50 * MINUTE_MS as i64;

        let soon = predict(&e, 51 * MINUTE_MS as i64, e.metadata.last_accessed_ms);
        let later = predict(&e, 90 * MINUTE_MS as i64, e.metadata.last_accessed_ms);
        assert!(soon.probability > later.probability);
        assert_eq!(soon.optimal_ttl_ms, Some(15 * MINUTE_MS));
        assert_eq!(soon.next_access_ms, Some(60 * MINUTE_MS as i64));
    }
}
