//! 预测缓存模块
//!
//! - `entry`: 缓存条目、访问模式、预测
//! - `predictor`: TTL、淘汰分数、预加载优先级
//! - `warming`: 访问序列学习与预热队列
//! - `store`: `PredictiveCache`

pub mod entry;
pub mod predictor;
pub mod store;
pub mod warming;

pub use entry::{
    AccessPattern, AccessTrend, CacheEntry, CacheMetadata, CacheSourceInfo, Predictions,
};
pub use predictor::{compute_ttl, eviction_score, optimal_ttl, predict, preload_priority};
pub use store::{
    CacheEntrySummary, CacheInsights, CacheStats, CacheStatsSnapshot, PredictiveCache,
};
pub use warming::{CacheWarmer, CacheWarmingTask, QueryCatalog, SequenceModel, WarmingQueue};
