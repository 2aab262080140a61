//! 工具模块

pub mod config;
pub mod ring_buffer;

pub use config::{
    CacheConfig, ExecutorConfig, FederationConfig, LoggingConfig, PlannerConfig, RouterConfig,
};
pub use ring_buffer::RingBuffer;

/// 当前毫秒时间戳
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
