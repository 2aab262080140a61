//! 缓存条目与访问模式

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::query::InterpretedQuery;

/// 周期识别的取整粒度 (1 分钟)
const PERIOD_BUCKET_MS: i64 = 60_000;
/// 周期间隔至少占全部间隔的比例
const PERIOD_MIN_SHARE: f64 = 0.3;
/// 趋势判定的相对变化阈值
const TREND_THRESHOLD: f64 = 0.2;
/// 判定趋势所需的最少时间戳数
const TREND_MIN_TIMESTAMPS: usize = 6;

/// 访问趋势
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessTrend {
    Increasing,
    Stable,
    Decreasing,
}

/// 访问模式
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessPattern {
    /// 最近的访问时间戳 (毫秒，有上限)
    pub timestamps: Vec<i64>,
    /// 每小时访问次数
    pub frequency: f64,
    /// 识别出的访问周期 (毫秒)
    pub periodicity_ms: Option<i64>,
    pub trend: AccessTrend,
    /// 模式可信度 ∈ [0, 1]
    pub confidence: f64,
}

impl AccessPattern {
    pub fn new(created_at_ms: i64) -> Self {
        Self {
            timestamps: vec![created_at_ms],
            frequency: 0.0,
            periodicity_ms: None,
            trend: AccessTrend::Stable,
            confidence: 0.0,
        }
    }

    /// 记录一次访问并重新计算频率、周期、趋势
    pub fn record(&mut self, now_ms: i64, capacity: usize) {
        self.timestamps.push(now_ms);
        let capacity = capacity.max(2);
        if self.timestamps.len() > capacity {
            let excess = self.timestamps.len() - capacity;
            self.timestamps.drain(..excess);
        }
        self.recompute();
    }

    fn intervals(&self) -> Vec<i64> {
        self.timestamps
            .windows(2)
            .map(|w| (w[1] - w[0]).max(0))
            .collect()
    }

    /// 平均访问间隔
    pub fn mean_interval_ms(&self) -> Option<f64> {
        let intervals = self.intervals();
        if intervals.is_empty() {
            return None;
        }
        Some(intervals.iter().sum::<i64>() as f64 / intervals.len() as f64)
    }

    /// 预期访问间隔：优先使用周期，其次平均间隔
    pub fn expected_interval_ms(&self) -> Option<f64> {
        self.periodicity_ms
            .map(|p| p as f64)
            .or_else(|| self.mean_interval_ms())
            .filter(|i| *i > 0.0)
    }

    fn recompute(&mut self) {
        let intervals = self.intervals();

        self.frequency = match (self.timestamps.first(), self.timestamps.last()) {
            (Some(first), Some(last)) if self.timestamps.len() >= 2 => {
                let hours = ((last - first) as f64 / 3_600_000.0).max(1.0 / 60.0);
                (self.timestamps.len() - 1) as f64 / hours
            }
            _ => 0.0,
        };

        let (periodicity, share) = periodicity(&intervals);
        self.periodicity_ms = periodicity;
        self.trend = trend(&intervals, self.timestamps.len());

        let sample_factor = (intervals.len() as f64 / 10.0).min(1.0);
        self.confidence = match periodicity {
            Some(_) => share * sample_factor.max(0.5),
            None => sample_factor * 0.5,
        }
        .clamp(0.0, 1.0);
    }
}

/// 最常见的取整间隔 (众数)，占比 ≥ 30% 才视为周期
fn periodicity(intervals: &[i64]) -> (Option<i64>, f64) {
    if intervals.len() < 2 {
        return (None, 0.0);
    }
    let mut counts: std::collections::BTreeMap<i64, usize> = std::collections::BTreeMap::new();
    for interval in intervals {
        let bucket = (*interval as f64 / PERIOD_BUCKET_MS as f64).round() as i64;
        *counts.entry(bucket).or_insert(0) += 1;
    }
    // 出现次数相同时取较小的间隔
    let Some((bucket, count)) = counts
        .iter()
        .max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0)))
    else {
        return (None, 0.0);
    };

    let share = *count as f64 / intervals.len() as f64;
    if *bucket > 0 && share >= PERIOD_MIN_SHARE {
        (Some(bucket * PERIOD_BUCKET_MS), share)
    } else {
        (None, share)
    }
}

/// 比较前三分之一与后三分之一的平均间隔：间隔变短意味着访问在增加
fn trend(intervals: &[i64], timestamps: usize) -> AccessTrend {
    if timestamps < TREND_MIN_TIMESTAMPS {
        return AccessTrend::Stable;
    }
    let third = (intervals.len() / 3).max(1);
    let mean = |xs: &[i64]| xs.iter().sum::<i64>() as f64 / xs.len() as f64;
    let early = mean(&intervals[..third]);
    let late = mean(&intervals[intervals.len() - third..]);

    if early <= 0.0 {
        return AccessTrend::Stable;
    }
    let change = (late - early) / early;
    if change < -TREND_THRESHOLD {
        AccessTrend::Increasing
    } else if change > TREND_THRESHOLD {
        AccessTrend::Decreasing
    } else {
        AccessTrend::Stable
    }
}

/// 预测结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Predictions {
    pub next_access_ms: Option<i64>,
    /// 近期再次访问的概率
    pub probability: f64,
    pub optimal_ttl_ms: Option<u64>,
    pub preload_priority: f64,
    /// 淘汰分数 (越高越先淘汰)
    pub eviction_score: f64,
}

impl Default for Predictions {
    fn default() -> Self {
        Self {
            next_access_ms: None,
            probability: 0.0,
            optimal_ttl_ms: None,
            preload_priority: 0.0,
            eviction_score: 0.5,
        }
    }
}

/// 条目元数据
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheMetadata {
    pub created_at_ms: i64,
    pub last_accessed_ms: i64,
    pub access_count: u64,
    /// 序列化后的字节数
    pub size: u64,
    pub ttl_ms: u64,
    pub tags: Vec<String>,
}

/// 缓存条目
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: String,
    pub data: Value,
    /// 产生该结果的查询 (用于预热)
    pub query: InterpretedQuery,
    pub metadata: CacheMetadata,
    pub pattern: AccessPattern,
    pub predictions: Predictions,
}

impl CacheEntry {
    pub fn expires_at_ms(&self) -> i64 {
        self.metadata.created_at_ms + self.metadata.ttl_ms as i64
    }

    pub fn is_expired(&self, now_ms: i64) -> bool {
        now_ms >= self.expires_at_ms()
    }
}

/// 写入缓存时的来源信息
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheSourceInfo {
    /// 源查询耗时 (毫秒)
    pub execution_time_ms: u64,
    /// 预测的未来执行耗时 (毫秒)
    pub predicted_execution_time_ms: Option<u64>,
    pub tags: Vec<String>,
}

impl CacheSourceInfo {
    pub fn new(execution_time_ms: u64) -> Self {
        Self {
            execution_time_ms,
            ..Default::default()
        }
    }

    pub fn with_predicted(mut self, predicted_ms: u64) -> Self {
        self.predicted_execution_time_ms = Some(predicted_ms);
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIN: i64 = 60_000;

    #[test]
    fn test_periodicity_detected() {
        let mut pattern = AccessPattern::new(0);
        for i in 1..=8 {
            pattern.record(i * 5 * MIN + (i % 2) * 10_000, 100);
        }
        assert_eq!(pattern.periodicity_ms, Some(5 * MIN));
        assert!(pattern.confidence > 0.0);
    }

    #[test]
    fn test_no_periodicity_when_irregular() {
        let mut pattern = AccessPattern::new(0);
        let mut t = 0;
        for gap in [1, 7, 20, 3, 45, 11] {
            t += gap * MIN;
            pattern.record(t, 100);
        }
        assert_eq!(pattern.periodicity_ms, None);
    }

    #[test]
    fn test_trend_increasing_when_intervals_shrink() {
        let mut pattern = AccessPattern::new(0);
        let mut t = 0;
        for gap in [60, 55, 50, 20, 10, 5, 3] {
            t += gap * MIN;
            pattern.record(t, 100);
        }
        assert_eq!(pattern.trend, AccessTrend::Increasing);
    }

    #[test]
    fn test_trend_decreasing_when_intervals_grow() {
        let mut pattern = AccessPattern::new(0);
        let mut t = 0;
        for gap in [1, 2, 2, 10, 30, 60, 90] {
            t += gap * MIN;
            pattern.record(t, 100);
        }
        assert_eq!(pattern.trend, AccessTrend::Decreasing);
    }

    #[test]
    fn test_timestamps_capped() {
        let mut pattern = AccessPattern::new(0);
        for i in 1..=150 {
            pattern.record(i * 1000, 100);
        }
        assert_eq!(pattern.timestamps.len(), 100);
        assert_eq!(pattern.timestamps[0], 51_000);
    }
}
