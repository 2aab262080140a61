//! 分片执行耗时历史与规划器洞察

use std::collections::VecDeque;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// 趋势判定阈值 (后半段均值相对前半段的变化比例)
const TREND_THRESHOLD: f64 = 0.1;

/// 耗时趋势
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PerformanceTrend {
    Improving,
    Stable,
    Degrading,
}

/// 单个分片的执行统计
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardPerformance {
    pub shard_id: String,
    pub executions: usize,
    pub avg_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub trend: PerformanceTrend,
}

/// 规划器洞察
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlannerInsights {
    pub plans_created: u64,
    pub shards: Vec<ShardPerformance>,
}

/// 每个分片的有界执行耗时记录
#[derive(Debug)]
pub struct ExecutionHistory {
    capacity: usize,
    durations: DashMap<String, VecDeque<f64>>,
}

impl ExecutionHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            durations: DashMap::new(),
        }
    }

    pub fn record(&self, shard_id: &str, duration_ms: f64) {
        let mut entry = self.durations.entry(shard_id.to_string()).or_default();
        entry.push_back(duration_ms);
        while entry.len() > self.capacity {
            entry.pop_front();
        }
    }

    pub fn performance(&self, shard_id: &str) -> Option<ShardPerformance> {
        let durations = self.durations.get(shard_id)?;
        summarize(shard_id, durations.value())
    }

    /// 按 shard_id 排序的全部统计
    pub fn summary(&self) -> Vec<ShardPerformance> {
        let mut shards: Vec<ShardPerformance> = self
            .durations
            .iter()
            .filter_map(|e| summarize(e.key(), e.value()))
            .collect();
        shards.sort_by(|a, b| a.shard_id.cmp(&b.shard_id));
        shards
    }
}

fn summarize(shard_id: &str, durations: &VecDeque<f64>) -> Option<ShardPerformance> {
    if durations.is_empty() {
        return None;
    }
    let n = durations.len() as f64;
    let avg_ms = durations.iter().sum::<f64>() / n;
    let min_ms = durations.iter().copied().fold(f64::INFINITY, f64::min);
    let max_ms = durations.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    Some(ShardPerformance {
        shard_id: shard_id.to_string(),
        executions: durations.len(),
        avg_ms,
        min_ms,
        max_ms,
        trend: trend(durations),
    })
}

fn trend(durations: &VecDeque<f64>) -> PerformanceTrend {
    if durations.len() < 4 {
        return PerformanceTrend::Stable;
    }
    let half = durations.len() / 2;
    let first = durations.iter().take(half).sum::<f64>() / half as f64;
    let second = durations.iter().skip(half).sum::<f64>() / (durations.len() - half) as f64;

    if first <= 0.0 {
        return PerformanceTrend::Stable;
    }
    let change = (second - first) / first;
    if change > TREND_THRESHOLD {
        PerformanceTrend::Degrading
    } else if change < -TREND_THRESHOLD {
        PerformanceTrend::Improving
    } else {
        PerformanceTrend::Stable
    }
}
