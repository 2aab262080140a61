//! 配置管理模块

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::FederationError;

/// 联邦查询配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FederationConfig {
    #[serde(default)]
    pub router: RouterConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub planner: PlannerConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl FederationConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, FederationError> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            FederationError::ConfigError(format!("Failed to read config file: {}", e))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, FederationError> {
        toml::from_str(content).map_err(|e| {
            FederationError::ConfigError(format!("Failed to parse config file: {}", e))
        })
    }

    pub fn load_default() -> Result<Self, FederationError> {
        Self::load_from_file("config/federation.toml")
    }
}

/// 路由器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// EMA 平滑系数
    #[serde(default = "default_ema_alpha")]
    pub ema_alpha: f64,
    /// 每个分片保留的性能样本数
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
    /// 回归窗口
    #[serde(default = "default_regression_window")]
    pub regression_window: usize,
    /// 启用回归所需的最少样本数
    #[serde(default = "default_min_regression_samples")]
    pub min_regression_samples: usize,
    /// 负载估算刷新间隔 (毫秒)
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_ms: u64,
    /// 指标衰减间隔 (毫秒)
    #[serde(default = "default_decay_interval")]
    pub decay_interval_ms: u64,
    /// 超过该时长未更新视为陈旧 (毫秒)
    #[serde(default = "default_stale_after")]
    pub stale_after_ms: u64,
    /// 样本保留时长 (毫秒)
    #[serde(default = "default_sample_retention")]
    pub sample_retention_ms: u64,
    /// 路由日志容量
    #[serde(default = "default_routing_log_capacity")]
    pub routing_log_capacity: usize,
    /// 无历史分片的默认延迟 (毫秒)
    #[serde(default = "default_latency")]
    pub default_latency_ms: f64,
    /// 无历史分片的默认可靠性
    #[serde(default = "default_reliability")]
    pub default_reliability: f64,
    /// 多分片查询最多选择的分片数
    #[serde(default = "default_max_selected")]
    pub max_selected_shards: usize,
    /// 多分片查询的最低分数
    #[serde(default = "default_min_selection_score")]
    pub min_selection_score: f64,
    /// 后台健康/指标探测超时 (毫秒)
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_ms: u64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            ema_alpha: 0.1,
            history_capacity: 1000,
            regression_window: 50,
            min_regression_samples: 10,
            refresh_interval_ms: 5_000,
            decay_interval_ms: 60_000,
            stale_after_ms: 5 * 60 * 1000,
            sample_retention_ms: 60 * 60 * 1000,
            routing_log_capacity: 1000,
            default_latency_ms: 100.0,
            default_reliability: 0.95,
            max_selected_shards: 3,
            min_selection_score: 0.5,
            probe_timeout_ms: 1_000,
        }
    }
}

impl RouterConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }

    pub fn decay_interval(&self) -> Duration {
        Duration::from_millis(self.decay_interval_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

/// 预测缓存配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// 最大缓存字节数
    #[serde(default = "default_max_cache_size")]
    pub max_size_bytes: u64,
    /// TTL 过期清理间隔 (毫秒)
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_ms: u64,
    /// TTL 重新调优间隔 (毫秒)
    #[serde(default = "default_retune_interval")]
    pub retune_interval_ms: u64,
    /// 预热队列处理间隔 (毫秒)
    #[serde(default = "default_warming_interval")]
    pub warming_interval_ms: u64,
    /// 最大并发预热任务数
    #[serde(default = "default_max_concurrent_warming")]
    pub max_concurrent_warming: usize,
    /// 每个条目保留的访问时间戳数
    #[serde(default = "default_access_history")]
    pub access_history: usize,
    /// 是否启用预热
    #[serde(default = "default_true")]
    pub warming_enabled: bool,
    /// 预热可追踪的查询数上限，超出时淘汰最早记录的查询
    #[serde(default = "default_max_known_queries")]
    pub max_known_queries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size_bytes: 100 * 1024 * 1024,
            sweep_interval_ms: 30_000,
            retune_interval_ms: 5 * 60 * 1000,
            warming_interval_ms: 60_000,
            max_concurrent_warming: 5,
            access_history: 100,
            warming_enabled: true,
            max_known_queries: 10_000,
        }
    }
}

/// 执行计划器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannerConfig {
    /// 并行执行允许的合计内存 (MB)
    #[serde(default = "default_memory_threshold")]
    pub memory_threshold_mb: f64,
    /// 并行执行允许的最大 CPU (%)
    #[serde(default = "default_cpu_threshold")]
    pub cpu_threshold_percent: f64,
    /// 默认片段超时 (毫秒)
    #[serde(default = "default_fragment_timeout")]
    pub default_timeout_ms: u64,
    /// 片段超时上限 (毫秒)
    #[serde(default = "default_max_fragment_timeout")]
    pub max_timeout_ms: u64,
    /// 健康探测超时 (毫秒)
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_ms: u64,
    /// 每个分片保留的执行耗时记录数
    #[serde(default = "default_history_capacity")]
    pub max_history: usize,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            memory_threshold_mb: 1000.0,
            cpu_threshold_percent: 80.0,
            default_timeout_ms: 5_000,
            max_timeout_ms: 30_000,
            probe_timeout_ms: 1_000,
            max_history: 1000,
        }
    }
}

/// 执行器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// 关键分片失败时是否执行主分片降级计划
    #[serde(default = "default_true")]
    pub run_primary_fallback: bool,
    /// 是否使用结果缓存
    #[serde(default = "default_true")]
    pub cache_results: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            run_primary_fallback: true,
            cache_results: true,
        }
    }
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// 默认值函数
fn default_ema_alpha() -> f64 {
    0.1
}
fn default_history_capacity() -> usize {
    1000
}
fn default_regression_window() -> usize {
    50
}
fn default_min_regression_samples() -> usize {
    10
}
fn default_refresh_interval() -> u64 {
    5_000
}
fn default_decay_interval() -> u64 {
    60_000
}
fn default_stale_after() -> u64 {
    5 * 60 * 1000
}
fn default_sample_retention() -> u64 {
    60 * 60 * 1000
}
fn default_routing_log_capacity() -> usize {
    1000
}
fn default_latency() -> f64 {
    100.0
}
fn default_reliability() -> f64 {
    0.95
}
fn default_max_selected() -> usize {
    3
}
fn default_min_selection_score() -> f64 {
    0.5
}
fn default_max_cache_size() -> u64 {
    100 * 1024 * 1024
}
fn default_sweep_interval() -> u64 {
    30_000
}
fn default_retune_interval() -> u64 {
    5 * 60 * 1000
}
fn default_warming_interval() -> u64 {
    60_000
}
fn default_max_concurrent_warming() -> usize {
    5
}
fn default_access_history() -> usize {
    100
}
fn default_max_known_queries() -> usize {
    10_000
}
fn default_true() -> bool {
    true
}
fn default_memory_threshold() -> f64 {
    1000.0
}
fn default_cpu_threshold() -> f64 {
    80.0
}
fn default_fragment_timeout() -> u64 {
    5_000
}
fn default_max_fragment_timeout() -> u64 {
    30_000
}
fn default_probe_timeout() -> u64 {
    1_000
}
fn default_log_level() -> String {
    "info".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_partial_config_uses_defaults() {
        let cfg = FederationConfig::from_toml_str(
            r#"
            [router]
            ema_alpha = 0.2

            [cache]
            max_size_bytes = 1024
            "#,
        )
        .unwrap();

        assert_eq!(cfg.router.ema_alpha, 0.2);
        assert_eq!(cfg.router.history_capacity, 1000);
        assert_eq!(cfg.router.probe_timeout(), Duration::from_secs(1));
        assert_eq!(cfg.cache.max_size_bytes, 1024);
        assert_eq!(cfg.cache.max_concurrent_warming, 5);
        assert_eq!(cfg.cache.max_known_queries, 10_000);
        assert_eq!(cfg.planner.memory_threshold_mb, 1000.0);
        assert_eq!(cfg.logging.level, "info");
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[planner]\ncpu_threshold_percent = 70.0").unwrap();

        let cfg = FederationConfig::load_from_file(file.path()).unwrap();
        assert_eq!(cfg.planner.cpu_threshold_percent, 70.0);
    }

    #[test]
    fn test_invalid_config() {
        let err = FederationConfig::from_toml_str("router = 3").unwrap_err();
        assert!(matches!(err, FederationError::ConfigError(_)));
        assert!(FederationConfig::load_from_file("/nonexistent/federation.toml").is_err());
    }
}
