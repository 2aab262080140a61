//! 分片句柄契约
//!
//! 分片存储引擎本身是外部组件，这里只描述它们暴露的接口。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::result::ShardFailure;
use crate::planner::FragmentPayload;
use crate::query::Record;

/// 健康状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    /// 健康权重 (用于优先级)
    pub fn weight(&self) -> f64 {
        match self {
            HealthStatus::Healthy => 1.0,
            HealthStatus::Degraded => 0.5,
            HealthStatus::Unhealthy => 0.05,
        }
    }
}

/// 健康探测结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardHealth {
    pub status: HealthStatus,
    /// CPU 使用率 (百分比 0-100)
    pub cpu_usage: f64,
    /// 内存使用量 (MB)
    pub memory_usage: f64,
}

impl ShardHealth {
    pub fn healthy(cpu_usage: f64, memory_usage: f64) -> Self {
        Self {
            status: HealthStatus::Healthy,
            cpu_usage,
            memory_usage,
        }
    }
}

/// 分片指标
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShardMetrics {
    /// 平均查询耗时 (毫秒)
    pub avg_query_time: f64,
    pub query_count: u64,
    pub total_records: u64,
}

/// 分片句柄
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ShardHandle: Send + Sync {
    /// 健康探测
    async fn get_health(&self) -> Result<ShardHealth, ShardFailure>;

    /// 获取分片指标
    async fn get_metrics(&self) -> Result<ShardMetrics, ShardFailure>;

    /// 执行特化后的片段查询 (可能失败)
    async fn query(&self, payload: &FragmentPayload) -> Result<Vec<Record>, ShardFailure>;
}
