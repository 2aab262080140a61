//! 分片注册表

use std::sync::Arc;

use dashmap::DashMap;

use super::capabilities::ShardCapabilities;
use super::handle::ShardHandle;

/// 已注册的分片
#[derive(Clone)]
pub struct RegisteredShard {
    pub handle: Arc<dyn ShardHandle>,
    pub capabilities: ShardCapabilities,
}

/// 分片注册表 (shard_id -> 句柄 + 能力描述)
pub struct ShardRegistry {
    shards: DashMap<String, RegisteredShard>,
}

impl ShardRegistry {
    pub fn new() -> Self {
        Self {
            shards: DashMap::new(),
        }
    }

    /// 注册分片 (同名覆盖)
    pub fn register(
        &self,
        shard_id: impl Into<String>,
        handle: Arc<dyn ShardHandle>,
        capabilities: ShardCapabilities,
    ) {
        let shard_id = shard_id.into();
        log::info!(
            "Registered shard {} (kind={:?}, tier={:?})",
            shard_id,
            capabilities.kind,
            capabilities.tier
        );
        self.shards.insert(
            shard_id,
            RegisteredShard {
                handle,
                capabilities,
            },
        );
    }

    /// 注销分片
    pub fn deregister(&self, shard_id: &str) -> bool {
        let removed = self.shards.remove(shard_id).is_some();
        if removed {
            log::info!("Deregistered shard {}", shard_id);
        }
        removed
    }

    pub fn get(&self, shard_id: &str) -> Option<RegisteredShard> {
        self.shards.get(shard_id).map(|s| s.value().clone())
    }

    pub fn handle(&self, shard_id: &str) -> Option<Arc<dyn ShardHandle>> {
        self.shards.get(shard_id).map(|s| Arc::clone(&s.handle))
    }

    /// 能力描述，未注册分片返回默认描述
    pub fn capabilities(&self, shard_id: &str) -> ShardCapabilities {
        self.shards
            .get(shard_id)
            .map(|s| s.capabilities.clone())
            .unwrap_or_default()
    }

    /// 所有分片 ID (排序)
    pub fn shard_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.shards.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// 支持指定数据类型的分片 (排序)
    pub fn shards_supporting(&self, data_type: &str) -> Vec<String> {
        let mut ids: Vec<String> = self
            .shards
            .iter()
            .filter(|e| e.capabilities.supports_data_type(data_type))
            .map(|e| e.key().clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.shards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }
}

impl Default for ShardRegistry {
    fn default() -> Self {
        Self::new()
    }
}
