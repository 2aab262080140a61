//! 分片管理模块
//!
//! 提供联邦查询所需的分片抽象：
//! - 分片句柄契约 (外部存储引擎实现)
//! - 能力描述与注册表
//! - 运行状态表 (路由器写，规划器读)
//! - 内存分片实现

pub mod capabilities;
pub mod handle;
pub mod memory;
pub mod registry;
pub mod result;
pub mod state;

pub use capabilities::{ShardCapabilities, ShardKind, StorageTier};
pub use handle::{HealthStatus, ShardHandle, ShardHealth, ShardMetrics};
pub use memory::InMemoryShard;
pub use registry::{RegisteredShard, ShardRegistry};
pub use result::{ShardFailure, ShardResult};
pub use state::{load_factor, PerformanceSample, ShardState, ShardStateStore};
