//! 预测缓存
//!
//! 按查询指纹缓存聚合结果：
//! - 命中时更新访问模式与预测，学习访问序列并生成预热任务
//! - 写入时按 TTL 规则设置过期时间，容量不足时按淘汰分数降序淘汰
//! - 后台任务：过期清理、TTL 调优、预热队列处理
//!
//! 条目表与 `current_size` 在同一把锁下修改，`Σ entry.size == current_size ≤ max_size` 始终成立。

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;

use super::entry::{AccessPattern, CacheEntry, CacheMetadata, CacheSourceInfo, Predictions};
use super::predictor::{compute_ttl, eviction_score, predict, MINUTE_MS};
use super::warming::{CacheWarmer, CacheWarmingTask, QueryCatalog, SequenceModel, WarmingQueue};
use crate::observability::{CACHE_BYTES, CACHE_EVICTIONS, CACHE_HITS, CACHE_MISSES};
use crate::query::InterpretedQuery;
use crate::utils::{now_ms, CacheConfig};

/// 每次命中最多预测的后继查询数
const MAX_PREDICTED_NEXT: usize = 3;
/// 后继查询概率下限
const MIN_NEXT_PROBABILITY: f64 = 0.3;
/// TTL 调优的最小变化量
const RETUNE_MIN_DELTA_MS: u64 = MINUTE_MS;
/// 即将过期且值得刷新的预加载优先级阈值
const REFRESH_PRIORITY: f64 = 0.6;
/// 洞察中列出的热门条目数
const TOP_ENTRIES: usize = 10;

/// 缓存统计
#[derive(Debug, Default)]
pub struct CacheStats {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub evictions: AtomicU64,
    pub expirations: AtomicU64,
    pub sets: AtomicU64,
    pub warmed: AtomicU64,
}

/// 缓存统计快照
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub sets: u64,
    pub warmed: u64,
}

impl CacheStats {
    pub fn snapshot(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            sets: self.sets.load(Ordering::Relaxed),
            warmed: self.warmed.load(Ordering::Relaxed),
        }
    }
}

/// 热门条目
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntrySummary {
    pub key: String,
    pub access_count: u64,
    pub size: u64,
    pub ttl_ms: u64,
    pub eviction_score: f64,
}

/// 缓存洞察
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheInsights {
    pub entries: usize,
    pub current_size: u64,
    pub max_size: u64,
    pub utilization: f64,
    pub hit_rate: f64,
    /// 淘汰次数 / 写入次数
    pub eviction_rate: f64,
    pub pending_warming_tasks: usize,
    pub top_entries: Vec<CacheEntrySummary>,
    pub recommendations: Vec<String>,
    pub stats: CacheStatsSnapshot,
}

/// 锁内状态
#[derive(Debug)]
struct CacheStore {
    entries: HashMap<String, CacheEntry>,
    current_size: u64,
    sequence: SequenceModel,
    warming: WarmingQueue,
    /// 条目被淘汰或过期后仍保留，供预热重新执行
    known_queries: QueryCatalog,
}

impl CacheStore {
    fn new(max_known_queries: usize) -> Self {
        Self {
            entries: HashMap::new(),
            current_size: 0,
            sequence: SequenceModel::new(max_known_queries),
            warming: WarmingQueue::new(),
            known_queries: QueryCatalog::new(max_known_queries),
        }
    }

    fn remember(&mut self, key: &str, query: &InterpretedQuery) {
        for forgotten in self.known_queries.remember(key, query) {
            self.sequence.forget(&forgotten);
        }
    }

    fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let entry = self.entries.remove(key)?;
        self.current_size -= entry.metadata.size;
        Some(entry)
    }
}

/// 预测缓存
pub struct PredictiveCache {
    config: CacheConfig,
    store: Mutex<CacheStore>,
    stats: CacheStats,
}

impl PredictiveCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            store: Mutex::new(CacheStore::new(config.max_known_queries)),
            config,
            stats: CacheStats::default(),
        }
    }

    pub fn with_capacity(max_size_bytes: u64) -> Self {
        Self::new(CacheConfig {
            max_size_bytes,
            ..CacheConfig::default()
        })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    // ───────────────────────────────────────────────────────────────────────
    // 读写
    // ───────────────────────────────────────────────────────────────────────

    /// 查找缓存，过期条目视为未命中并删除
    pub fn get(&self, key: &str) -> Option<Value> {
        self.get_at(key, now_ms())
    }

    pub fn get_at(&self, key: &str, now: i64) -> Option<Value> {
        let mut store = self.store.lock();

        let Some(expired) = store.entries.get(key).map(|e| e.is_expired(now)) else {
            drop(store);
            self.record_miss();
            return None;
        };

        if expired {
            store.remove(key);
            CACHE_BYTES.set(store.current_size as i64);
            drop(store);
            self.stats.expirations.fetch_add(1, Ordering::Relaxed);
            self.record_miss();
            log::trace!("Cache entry {} expired on access", key);
            return None;
        }

        let history = self.config.access_history;
        let data = match store.entries.get_mut(key) {
            Some(entry) => {
                let previous_access = entry.metadata.last_accessed_ms;
                entry.pattern.record(now, history);
                entry.predictions = predict(entry, now, previous_access);
                entry.metadata.access_count += 1;
                entry.metadata.last_accessed_ms = now;
                entry.data.clone()
            }
            None => return None,
        };

        store.sequence.observe(key);
        if self.config.warming_enabled {
            self.schedule_predicted(&mut store, key, now);
        }
        drop(store);

        self.stats.hits.fetch_add(1, Ordering::Relaxed);
        CACHE_HITS.inc();
        Some(data)
    }

    fn record_miss(&self) {
        self.stats.misses.fetch_add(1, Ordering::Relaxed);
        CACHE_MISSES.inc();
    }

    /// 写入缓存；大于总容量的数据不缓存。返回是否写入
    pub fn set(
        &self,
        key: &str,
        data: Value,
        query: &InterpretedQuery,
        source: &CacheSourceInfo,
    ) -> bool {
        self.set_at(key, data, query, source, now_ms())
    }

    pub fn set_at(
        &self,
        key: &str,
        data: Value,
        query: &InterpretedQuery,
        source: &CacheSourceInfo,
        now: i64,
    ) -> bool {
        let size = match serde_json::to_vec(&data) {
            Ok(bytes) => bytes.len() as u64,
            Err(e) => {
                log::warn!("Failed to size cache value for {}: {}", key, e);
                return false;
            }
        };
        if size > self.config.max_size_bytes {
            log::debug!(
                "Skipping cache for {}: {} bytes exceeds capacity {}",
                key,
                size,
                self.config.max_size_bytes
            );
            return false;
        }

        let ttl_ms = compute_ttl(query, size, source);
        let mut store = self.store.lock();

        // 覆盖写入保留访问模式
        let (pattern, access_count) = match store.remove(key) {
            Some(old) => (old.pattern, old.metadata.access_count),
            None => (AccessPattern::new(now), 0),
        };

        let evicted = self.evict_for(&mut store, size, now);

        let entry = CacheEntry {
            key: key.to_string(),
            data,
            query: query.clone(),
            metadata: CacheMetadata {
                created_at_ms: now,
                last_accessed_ms: now,
                access_count,
                size,
                ttl_ms,
                tags: source.tags.clone(),
            },
            pattern,
            predictions: Predictions::default(),
        };
        store.current_size += size;
        store.entries.insert(key.to_string(), entry);

        store.remember(key, query);
        CACHE_BYTES.set(store.current_size as i64);
        drop(store);

        self.stats.sets.fetch_add(1, Ordering::Relaxed);
        if evicted > 0 {
            self.stats.evictions.fetch_add(evicted, Ordering::Relaxed);
            CACHE_EVICTIONS.inc_by(evicted);
        }
        log::trace!("Cached {} ({} bytes, ttl {}ms)", key, size, ttl_ms);
        true
    }

    /// 按淘汰分数降序淘汰，直到能放下 `incoming` 字节
    fn evict_for(&self, store: &mut CacheStore, incoming: u64, now: i64) -> u64 {
        if store.current_size + incoming <= self.config.max_size_bytes {
            return 0;
        }

        let mut candidates: Vec<(String, f64)> = store
            .entries
            .values()
            .map(|e| {
                let probability = predict(e, now, e.metadata.last_accessed_ms).probability;
                (e.key.clone(), eviction_score(e, now, probability))
            })
            .collect();
        candidates.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        let mut evicted = 0;
        for (key, score) in candidates {
            if store.current_size + incoming <= self.config.max_size_bytes {
                break;
            }
            if store.remove(&key).is_some() {
                evicted += 1;
                log::debug!("Evicted cache entry {} (score {:.3})", key, score);
            }
        }
        evicted
    }

    pub fn invalidate(&self, key: &str) -> bool {
        let mut store = self.store.lock();
        let removed = store.remove(key).is_some();
        store.sequence.forget(key);
        store.known_queries.forget(key);
        CACHE_BYTES.set(store.current_size as i64);
        removed
    }

    pub fn clear(&self) {
        let mut store = self.store.lock();
        store.entries.clear();
        store.current_size = 0;
        store.sequence.clear();
        store.warming.clear();
        store.known_queries.clear();
        CACHE_BYTES.set(0);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.store.lock().entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.store.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn current_size(&self) -> u64 {
        self.store.lock().current_size
    }

    pub fn stats(&self) -> CacheStatsSnapshot {
        self.stats.snapshot()
    }

    /// 条目的元数据与预测
    pub fn entry_info(&self, key: &str) -> Option<(CacheMetadata, Predictions)> {
        self.store
            .lock()
            .entries
            .get(key)
            .map(|e| (e.metadata.clone(), e.predictions.clone()))
    }

    // ───────────────────────────────────────────────────────────────────────
    // 预热
    // ───────────────────────────────────────────────────────────────────────

    /// 为预测的后继查询生成预热任务，已缓存的跳过
    fn schedule_predicted(&self, store: &mut CacheStore, key: &str, now: i64) {
        let predicted = store.sequence.predict_next(key, MAX_PREDICTED_NEXT);
        for (next_key, probability) in predicted {
            if probability < MIN_NEXT_PROBABILITY || store.entries.contains_key(&next_key) {
                continue;
            }
            let Some(query) = store.known_queries.get(&next_key).cloned() else {
                continue;
            };
            let task = CacheWarmingTask::new(next_key, query, probability, now, probability * 1000.0);
            store.warming.push(task);
        }
    }

    /// 手动加入预热任务
    pub fn schedule_warming(&self, task: CacheWarmingTask) -> bool {
        self.store.lock().warming.push(task)
    }

    pub fn pending_warming(&self) -> usize {
        self.store.lock().warming.len()
    }

    /// 执行到期的预热任务 (最多 `max_concurrent_warming` 个并发)。返回成功数
    pub async fn drain_warming(&self, warmer: &dyn CacheWarmer) -> usize {
        self.drain_warming_at(warmer, now_ms()).await
    }

    pub async fn drain_warming_at(&self, warmer: &dyn CacheWarmer, now: i64) -> usize {
        let tasks = {
            let mut store = self.store.lock();
            let due = store.warming.pop_due(now, usize::MAX);
            due.into_iter()
                .filter(|t| {
                    store
                        .entries
                        .get(&t.key)
                        .map_or(true, |e| e.is_expired(now))
                })
                .collect::<Vec<_>>()
        };
        if tasks.is_empty() {
            return 0;
        }

        let concurrency = self.config.max_concurrent_warming.max(1);
        let warmed = stream::iter(tasks)
            .map(|task| async move { warmer.warm(&task).await })
            .buffer_unordered(concurrency)
            .filter(|ok| futures::future::ready(*ok))
            .count()
            .await;

        self.stats.warmed.fetch_add(warmed as u64, Ordering::Relaxed);
        log::debug!("Cache warming completed: {} tasks succeeded", warmed);
        warmed
    }

    // ───────────────────────────────────────────────────────────────────────
    // 维护
    // ───────────────────────────────────────────────────────────────────────

    /// 删除过期条目。返回删除数
    pub fn sweep_expired(&self, now: i64) -> usize {
        let mut store = self.store.lock();
        let expired: Vec<String> = store
            .entries
            .values()
            .filter(|e| e.is_expired(now))
            .map(|e| e.key.clone())
            .collect();
        for key in &expired {
            store.remove(key);
        }
        CACHE_BYTES.set(store.current_size as i64);
        drop(store);

        if !expired.is_empty() {
            self.stats
                .expirations
                .fetch_add(expired.len() as u64, Ordering::Relaxed);
            log::debug!("Swept {} expired cache entries", expired.len());
        }
        expired.len()
    }

    /// 重新计算预测，与当前 TTL 相差超过 1 分钟时应用理想 TTL；
    /// 即将过期的高优先级条目加入刷新预热。返回调整的条目数
    pub fn retune_ttls(&self, now: i64) -> usize {
        let retune_window = self.config.retune_interval_ms as i64;
        let warming_enabled = self.config.warming_enabled;
        let mut store = self.store.lock();
        let mut retuned = 0;
        let mut refresh = Vec::new();

        for entry in store.entries.values_mut() {
            entry.predictions = predict(entry, now, entry.metadata.last_accessed_ms);
            if let Some(optimal) = entry.predictions.optimal_ttl_ms {
                if optimal.abs_diff(entry.metadata.ttl_ms) > RETUNE_MIN_DELTA_MS {
                    log::trace!(
                        "Retuning TTL of {}: {}ms -> {}ms",
                        entry.key,
                        entry.metadata.ttl_ms,
                        optimal
                    );
                    entry.metadata.ttl_ms = optimal;
                    retuned += 1;
                }
            }

            let expires_soon = entry.expires_at_ms() - now <= retune_window;
            if warming_enabled
                && expires_soon
                && entry.predictions.preload_priority >= REFRESH_PRIORITY
            {
                refresh.push(CacheWarmingTask::new(
                    entry.key.clone(),
                    entry.query.clone(),
                    entry.predictions.preload_priority,
                    entry.expires_at_ms(),
                    entry.predictions.probability * 1000.0,
                ));
            }
        }

        for task in refresh {
            store.warming.push(task);
        }
        retuned
    }

    /// 缓存洞察
    pub fn insights(&self) -> CacheInsights {
        let stats = self.stats.snapshot();
        let store = self.store.lock();

        let mut top_entries: Vec<CacheEntrySummary> = store
            .entries
            .values()
            .map(|e| CacheEntrySummary {
                key: e.key.clone(),
                access_count: e.metadata.access_count,
                size: e.metadata.size,
                ttl_ms: e.metadata.ttl_ms,
                eviction_score: e.predictions.eviction_score,
            })
            .collect();
        top_entries.sort_by(|a, b| {
            b.access_count
                .cmp(&a.access_count)
                .then_with(|| a.key.cmp(&b.key))
        });
        top_entries.truncate(TOP_ENTRIES);

        let lookups = stats.hits + stats.misses;
        let hit_rate = if lookups == 0 {
            0.0
        } else {
            stats.hits as f64 / lookups as f64
        };
        let eviction_rate = if stats.sets == 0 {
            0.0
        } else {
            stats.evictions as f64 / stats.sets as f64
        };
        let utilization = if self.config.max_size_bytes == 0 {
            0.0
        } else {
            store.current_size as f64 / self.config.max_size_bytes as f64
        };

        let mut recommendations = Vec::new();
        if lookups >= 20 && hit_rate < 0.5 {
            recommendations.push(format!(
                "hit rate {:.0}% is low, consider longer TTLs or enabling warming",
                hit_rate * 100.0
            ));
        }
        if eviction_rate > 0.2 {
            recommendations.push(format!(
                "eviction rate {:.0}% is high, consider increasing max cache size",
                eviction_rate * 100.0
            ));
        }
        if utilization > 0.9 {
            recommendations.push("cache is over 90% full".to_string());
        }

        CacheInsights {
            entries: store.entries.len(),
            current_size: store.current_size,
            max_size: self.config.max_size_bytes,
            utilization,
            hit_rate,
            eviction_rate,
            pending_warming_tasks: store.warming.len(),
            top_entries,
            recommendations,
            stats,
        }
    }

    /// 启动后台任务：过期清理、TTL 调优、预热
    pub fn spawn_maintenance(
        self: Arc<Self>,
        warmer: Arc<dyn CacheWarmer>,
        token: CancellationToken,
    ) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();

        let cache = Arc::clone(&self);
        let sweep_token = token.clone();
        let sweep_every = Duration::from_millis(self.config.sweep_interval_ms);
        handles.push(tokio::spawn(async move {
            let mut ticker = interval(sweep_every);
            loop {
                tokio::select! {
                    _ = sweep_token.cancelled() => break,
                    _ = ticker.tick() => {
                        cache.sweep_expired(now_ms());
                    }
                }
            }
            log::debug!("Cache sweep task stopped");
        }));

        let cache = Arc::clone(&self);
        let retune_token = token.clone();
        let retune_every = Duration::from_millis(self.config.retune_interval_ms);
        handles.push(tokio::spawn(async move {
            let mut ticker = interval(retune_every);
            loop {
                tokio::select! {
                    _ = retune_token.cancelled() => break,
                    _ = ticker.tick() => {
                        cache.retune_ttls(now_ms());
                    }
                }
            }
            log::debug!("Cache retune task stopped");
        }));

        if self.config.warming_enabled {
            let cache = Arc::clone(&self);
            let warm_every = Duration::from_millis(self.config.warming_interval_ms);
            handles.push(tokio::spawn(async move {
                let mut ticker = interval(warm_every);
                loop {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = ticker.tick() => {
                            cache.drain_warming(warmer.as_ref()).await;
                        }
                    }
                }
                log::debug!("Cache warming task stopped");
            }));
        }

        handles
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// 测试
// ═══════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::TemporalScope;
    use async_trait::async_trait;
    use serde_json::json;

    fn query() -> InterpretedQuery {
        InterpretedQuery::new("recent orders", "orders").with_temporal(TemporalScope::Recent)
    }

    fn assert_size_invariant(cache: &PredictiveCache) {
        let store = cache.store.lock();
        let sum: u64 = store.entries.values().map(|e| e.metadata.size).sum();
        assert_eq!(sum, store.current_size);
        assert!(store.current_size <= cache.config.max_size_bytes);
    }

    #[test]
    fn test_set_then_get_returns_same_data() {
        let cache = PredictiveCache::new(CacheConfig::default());
        let data = json!([{"id": 1, "total": 9.5}, {"id": 2, "total": 3.0}]);

        assert!(cache.set_at("k1", data.clone(), &query(), &CacheSourceInfo::new(100), 0));
        assert_eq!(cache.get_at("k1", 1_000), Some(data));
        assert_eq!(cache.stats().hits, 1);
    }

    #[test]
    fn test_recent_slow_query_ttl() {
        let cache = PredictiveCache::new(CacheConfig::default());
        cache.set_at("k", json!([1]), &query(), &CacheSourceInfo::new(5050), 0);
        let (meta, _) = cache.entry_info("k").unwrap();
        assert_eq!(meta.ttl_ms, 450_000);
    }

    #[test]
    fn test_expired_entry_is_removed_on_get() {
        let cache = PredictiveCache::new(CacheConfig::default());
        cache.set_at("k", json!([1]), &query(), &CacheSourceInfo::new(10), 0);

        assert!(cache.get_at("k", 300_000).is_none());
        assert!(!cache.contains("k"));
        assert_eq!(cache.current_size(), 0);
        let stats = cache.stats();
        assert_eq!(stats.expirations, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn test_eviction_keeps_size_invariant() {
        let cache = PredictiveCache::with_capacity(200);
        for i in 0..20 {
            let data = json!({"id": i, "payload": "x".repeat(30)});
            cache.set_at(&format!("k{}", i), data, &query(), &CacheSourceInfo::new(10), i);
            assert_size_invariant(&cache);
        }
        assert!(cache.stats().evictions > 0);
        assert!(cache.len() < 20);
    }

    #[test]
    fn test_oversized_value_is_skipped() {
        let cache = PredictiveCache::with_capacity(10);
        assert!(!cache.set_at("big", json!("0123456789abcdef"), &query(), &CacheSourceInfo::new(1), 0));
        assert!(cache.is_empty());
        assert_size_invariant(&cache);
    }

    #[test]
    fn test_overwrite_keeps_size_exact() {
        let cache = PredictiveCache::new(CacheConfig::default());
        cache.set_at("k", json!("short"), &query(), &CacheSourceInfo::new(1), 0);
        cache.set_at("k", json!("a much longer value"), &query(), &CacheSourceInfo::new(1), 1);
        assert_eq!(cache.len(), 1);
        assert_size_invariant(&cache);
        assert!(cache.invalidate("k"));
        assert_eq!(cache.current_size(), 0);
    }

    #[test]
    fn test_sweep_expired() {
        let cache = PredictiveCache::new(CacheConfig::default());
        cache.set_at("recent", json!(1), &query(), &CacheSourceInfo::new(1), 0);
        let hourly = InterpretedQuery::new("all orders", "orders");
        cache.set_at("hourly", json!(2), &hourly, &CacheSourceInfo::new(1), 0);

        assert_eq!(cache.sweep_expired(10 * 60 * 1000), 1);
        assert!(cache.contains("hourly"));
        assert_size_invariant(&cache);
    }

    #[test]
    fn test_retune_applies_optimal_ttl() {
        let cache = PredictiveCache::new(CacheConfig::default());
        let hourly = InterpretedQuery::new("all orders", "orders");
        cache.set_at("k", json!(1), &hourly, &CacheSourceInfo::new(1), 0);
        for i in 1..=6 {
            cache.get_at("k", i * 2 * 60 * 1000);
        }
        assert_eq!(cache.retune_ttls(13 * 60 * 1000), 1);
        let (meta, _) = cache.entry_info("k").unwrap();
        assert_eq!(meta.ttl_ms, 3 * 60 * 1000);
    }

    #[test]
    fn test_sequence_learning_schedules_warming() {
        let cache = PredictiveCache::new(CacheConfig::default());
        let hourly = InterpretedQuery::new("q", "orders");
        let recent = InterpretedQuery::new("r", "orders").with_temporal(TemporalScope::Recent);
        cache.set_at("a", json!(1), &hourly, &CacheSourceInfo::new(1), 0);
        cache.set_at("b", json!(2), &recent, &CacheSourceInfo::new(1), 0);

        cache.get_at("a", 1);
        cache.get_at("b", 2);
        // b 过期被清理后仍可预热
        let later = 6 * MINUTE_MS as i64;
        assert_eq!(cache.sweep_expired(later), 1);
        cache.get_at("a", later);

        assert_eq!(cache.pending_warming(), 1);
    }

    #[test]
    fn test_invalidated_key_is_not_warmed() {
        let cache = PredictiveCache::new(CacheConfig::default());
        let hourly = InterpretedQuery::new("q", "orders");
        cache.set_at("a", json!(1), &hourly, &CacheSourceInfo::new(1), 0);
        cache.set_at("b", json!(2), &hourly, &CacheSourceInfo::new(1), 0);

        cache.get_at("a", 1);
        cache.get_at("b", 2);
        cache.invalidate("b");
        cache.get_at("a", 3);

        assert_eq!(cache.pending_warming(), 0);
    }

    #[test]
    fn test_warming_keeps_learning_after_many_keys_and_clear() {
        let cache = PredictiveCache::new(CacheConfig {
            max_known_queries: 100,
            ..CacheConfig::default()
        });
        let hourly = InterpretedQuery::new("q", "orders");
        let source = CacheSourceInfo::new(1);

        // 大量一次性 key，其中一半未显式失效
        for i in 0..250 {
            let key = format!("once-{}", i);
            cache.set_at(&key, json!(i), &hourly, &source, 0);
            cache.get_at(&key, 1);
            if i % 2 == 0 {
                cache.invalidate(&key);
            }
        }
        {
            let store = cache.store.lock();
            assert!(store.known_queries.len() <= 100);
            assert!(store.sequence.tracked_keys() <= 100);
        }

        // 目录已满时新查询仍会被记住
        cache.set_at("fresh", json!(0), &hourly, &source, 2);
        assert!(cache.store.lock().known_queries.get("fresh").is_some());

        cache.clear();
        assert!(cache.store.lock().known_queries.is_empty());

        let hourly = InterpretedQuery::new("q", "orders");
        let recent = InterpretedQuery::new("r", "orders").with_temporal(TemporalScope::Recent);
        cache.set_at("a", json!(1), &hourly, &source, 0);
        cache.set_at("b", json!(2), &recent, &source, 0);
        cache.get_at("a", 1);
        cache.get_at("b", 2);
        let later = 6 * MINUTE_MS as i64;
        cache.sweep_expired(later);
        cache.get_at("a", later);

        assert_eq!(cache.pending_warming(), 1);
    }

    struct CountingWarmer(AtomicU64);

    #[async_trait]
    impl CacheWarmer for CountingWarmer {
        async fn warm(&self, _task: &CacheWarmingTask) -> bool {
            self.0.fetch_add(1, Ordering::Relaxed);
            true
        }
    }

    #[tokio::test]
    async fn test_drain_warming() {
        let cache = PredictiveCache::new(CacheConfig::default());
        for key in ["x", "y"] {
            cache.schedule_warming(CacheWarmingTask::new(key, query(), 0.5, 0, 10.0));
        }
        let warmer = CountingWarmer(AtomicU64::new(0));

        assert_eq!(cache.drain_warming_at(&warmer, 10).await, 2);
        assert_eq!(warmer.0.load(Ordering::Relaxed), 2);
        assert_eq!(cache.pending_warming(), 0);
        assert_eq!(cache.stats().warmed, 2);
    }

    #[test]
    fn test_insights() {
        let cache = PredictiveCache::new(CacheConfig::default());
        cache.set_at("k", json!(1), &query(), &CacheSourceInfo::new(1), 0);
        cache.get_at("k", 1);
        cache.get_at("missing", 1);

        let insights = cache.insights();
        assert_eq!(insights.entries, 1);
        assert_eq!(insights.hit_rate, 0.5);
        assert_eq!(insights.top_entries[0].key, "k");
    }
}
