//! 内存分片
//!
//! `ShardHandle` 的内存实现，用于演示和测试：可配置延迟、健康状态，
//! 并支持注入失败。

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::handle::{ShardHandle, ShardHealth, ShardMetrics};
use super::result::ShardFailure;
use crate::planner::{FragmentPayload, SortOrder};
use crate::query::Record;

/// 内存分片
pub struct InMemoryShard {
    records: RwLock<Vec<Record>>,
    latency: Duration,
    health: RwLock<ShardHealth>,
    /// 注入的失败 (每次查询都返回)
    failure: RwLock<Option<ShardFailure>>,
    /// 健康探测是否失败 (模拟不可达)
    unreachable: RwLock<bool>,
    query_count: AtomicU64,
    total_query_time_ms: AtomicU64,
}

impl InMemoryShard {
    pub fn new(records: Vec<Record>) -> Self {
        Self {
            records: RwLock::new(records),
            latency: Duration::from_millis(0),
            health: RwLock::new(ShardHealth::healthy(10.0, 64.0)),
            failure: RwLock::new(None),
            unreachable: RwLock::new(false),
            query_count: AtomicU64::new(0),
            total_query_time_ms: AtomicU64::new(0),
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_health(self, health: ShardHealth) -> Self {
        *self.health.write() = health;
        self
    }

    pub fn with_failure(self, failure: ShardFailure) -> Self {
        *self.failure.write() = Some(failure);
        self
    }

    /// 设置或清除注入的失败
    pub fn set_failure(&self, failure: Option<ShardFailure>) {
        *self.failure.write() = failure;
    }

    /// 模拟探测不可达
    pub fn set_unreachable(&self, unreachable: bool) {
        *self.unreachable.write() = unreachable;
    }

    pub fn push(&self, record: Record) {
        self.records.write().push(record);
    }

    pub fn query_count(&self) -> u64 {
        self.query_count.load(Ordering::Relaxed)
    }

    fn execute(&self, payload: &FragmentPayload) -> Vec<Record> {
        let records = self.records.read();

        let mut matched: Vec<Record> = match payload {
            FragmentPayload::ValidationOnly { tokens } => records
                .iter()
                .filter(|r| {
                    r.get("token")
                        .and_then(|t| t.as_str())
                        .map_or(false, |t| tokens.iter().any(|x| x == t))
                })
                .cloned()
                .collect(),
            _ => records
                .iter()
                .filter(|r| payload.filters().iter().all(|f| f.matches(r)))
                .cloned()
                .collect(),
        };

        if let FragmentPayload::TemporalScan { order, .. } = payload {
            matched.sort_by_key(|r| r.get("timestamp").and_then(|v| v.as_i64()).unwrap_or(0));
            if *order == SortOrder::Descending {
                matched.reverse();
            }
        }

        if let FragmentPayload::Projection { fields, .. } = payload {
            if !fields.is_empty() {
                for record in matched.iter_mut() {
                    record.retain(|k, _| fields.contains(k));
                }
            }
        }

        if let Some(limit) = payload.limit() {
            matched.truncate(limit);
        }

        matched
    }
}

#[async_trait]
impl ShardHandle for InMemoryShard {
    async fn get_health(&self) -> Result<ShardHealth, ShardFailure> {
        if *self.unreachable.read() {
            return Err(ShardFailure::Unavailable("health probe failed".to_string()));
        }
        Ok(self.health.read().clone())
    }

    async fn get_metrics(&self) -> Result<ShardMetrics, ShardFailure> {
        if *self.unreachable.read() {
            return Err(ShardFailure::Unavailable("metrics probe failed".to_string()));
        }
        let count = self.query_count.load(Ordering::Relaxed);
        let total = self.total_query_time_ms.load(Ordering::Relaxed);
        Ok(ShardMetrics {
            avg_query_time: if count == 0 { 0.0 } else { total as f64 / count as f64 },
            query_count: count,
            total_records: self.records.read().len() as u64,
        })
    }

    async fn query(&self, payload: &FragmentPayload) -> Result<Vec<Record>, ShardFailure> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        self.query_count.fetch_add(1, Ordering::Relaxed);
        self.total_query_time_ms
            .fetch_add(self.latency.as_millis() as u64, Ordering::Relaxed);

        if let Some(failure) = self.failure.read().clone() {
            return Err(failure);
        }

        Ok(self.execute(payload))
    }
}
