//! 缓存预热
//!
//! - 访问序列学习：key → 下一个 key 的转移计数
//! - 可预热查询目录：条目被淘汰或过期后仍记得如何重新执行
//! - 预热任务优先队列 (BinaryHeap，优先级高者先出)
//! - `CacheWarmer`：实际执行预热查询的外部协作者
//!
//! 序列模型与查询目录都有容量上限，满时淘汰最早写入的 key。

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::query::InterpretedQuery;

/// 每个 key 保留的最大后继数
const MAX_SUCCESSORS: usize = 32;

/// 预热任务
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheWarmingTask {
    pub id: String,
    pub key: String,
    pub query: InterpretedQuery,
    pub priority: f64,
    pub scheduled_at_ms: i64,
    /// 预期收益 (预计节省的执行时间，毫秒)
    pub expected_benefit_ms: f64,
}

impl CacheWarmingTask {
    pub fn new(
        key: impl Into<String>,
        query: InterpretedQuery,
        priority: f64,
        scheduled_at_ms: i64,
        expected_benefit_ms: f64,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            key: key.into(),
            query,
            priority,
            scheduled_at_ms,
            expected_benefit_ms,
        }
    }
}

impl PartialEq for CacheWarmingTask {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for CacheWarmingTask {}

impl PartialOrd for CacheWarmingTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// 优先级高者大；同优先级时更早调度者大
impl Ord for CacheWarmingTask {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .total_cmp(&other.priority)
            .then_with(|| other.scheduled_at_ms.cmp(&self.scheduled_at_ms))
            .then_with(|| other.key.cmp(&self.key))
    }
}

/// 预热任务队列 (同一 key 只排队一次)
#[derive(Debug, Default)]
pub struct WarmingQueue {
    heap: BinaryHeap<CacheWarmingTask>,
    queued: HashSet<String>,
}

impl WarmingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// 入队，key 已在队列中时返回 false
    pub fn push(&mut self, task: CacheWarmingTask) -> bool {
        if !self.queued.insert(task.key.clone()) {
            return false;
        }
        self.heap.push(task);
        true
    }

    /// 取出最多 `limit` 个已到调度时间的任务，未到期的保留
    pub fn pop_due(&mut self, now_ms: i64, limit: usize) -> Vec<CacheWarmingTask> {
        let mut due = Vec::new();
        let mut deferred = Vec::new();

        while due.len() < limit {
            let Some(task) = self.heap.pop() else {
                break;
            };
            if task.scheduled_at_ms <= now_ms {
                self.queued.remove(&task.key);
                due.push(task);
            } else {
                deferred.push(task);
            }
        }
        self.heap.extend(deferred);
        due
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn clear(&mut self) {
        self.heap.clear();
        self.queued.clear();
    }
}

/// 按写入顺序追踪 key，重复写入刷新其位置
#[derive(Debug, Default)]
struct InsertionOrder {
    order: VecDeque<(String, u64)>,
    stamps: HashMap<String, u64>,
    next_stamp: u64,
}

impl InsertionOrder {
    fn touch(&mut self, key: &str) {
        let stamp = self.next_stamp;
        self.next_stamp += 1;
        self.stamps.insert(key.to_string(), stamp);
        self.order.push_back((key.to_string(), stamp));
        // 过期记录过多时压缩
        if self.order.len() > 2 * self.stamps.len() + 16 {
            let stamps = &self.stamps;
            self.order.retain(|(k, s)| stamps.get(k) == Some(s));
        }
    }

    fn remove(&mut self, key: &str) {
        self.stamps.remove(key);
    }

    fn pop_oldest(&mut self) -> Option<String> {
        while let Some((key, stamp)) = self.order.pop_front() {
            if self.stamps.get(&key) == Some(&stamp) {
                self.stamps.remove(&key);
                return Some(key);
            }
        }
        None
    }

    fn clear(&mut self) {
        self.order.clear();
        self.stamps.clear();
    }
}

/// 访问序列模型
#[derive(Debug)]
pub struct SequenceModel {
    transitions: HashMap<String, HashMap<String, u32>>,
    order: InsertionOrder,
    max_keys: usize,
    last_key: Option<String>,
}

impl SequenceModel {
    /// `max_keys`：最多追踪转移的源 key 数
    pub fn new(max_keys: usize) -> Self {
        Self {
            transitions: HashMap::new(),
            order: InsertionOrder::default(),
            max_keys: max_keys.max(1),
            last_key: None,
        }
    }

    /// 记录一次访问，更新上一个 key → 当前 key 的转移
    pub fn observe(&mut self, key: &str) {
        let Some(prev) = self.last_key.replace(key.to_string()) else {
            return;
        };
        if prev == key {
            return;
        }

        if !self.transitions.contains_key(&prev) {
            while self.transitions.len() >= self.max_keys {
                let Some(oldest) = self.order.pop_oldest() else {
                    break;
                };
                self.transitions.remove(&oldest);
            }
        }
        self.order.touch(&prev);

        let successors = self.transitions.entry(prev).or_default();
        if successors.len() < MAX_SUCCESSORS || successors.contains_key(key) {
            *successors.entry(key.to_string()).or_insert(0) += 1;
        }
    }

    /// 预测接下来可能访问的 key 及其概率 (按概率降序)
    pub fn predict_next(&self, key: &str, limit: usize) -> Vec<(String, f64)> {
        let Some(successors) = self.transitions.get(key) else {
            return Vec::new();
        };
        let total: u32 = successors.values().sum();
        if total == 0 {
            return Vec::new();
        }
        let mut predictions: Vec<(String, f64)> = successors
            .iter()
            .map(|(k, count)| (k.clone(), *count as f64 / total as f64))
            .collect();
        predictions.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        predictions.truncate(limit);
        predictions
    }

    pub fn forget(&mut self, key: &str) {
        self.transitions.remove(key);
        self.order.remove(key);
    }

    /// 追踪转移的源 key 数
    pub fn tracked_keys(&self) -> usize {
        self.transitions.len()
    }

    pub fn clear(&mut self) {
        self.transitions.clear();
        self.order.clear();
        self.last_key = None;
    }
}

/// 可预热查询目录 (key → 原始查询)
#[derive(Debug)]
pub struct QueryCatalog {
    queries: HashMap<String, InterpretedQuery>,
    order: InsertionOrder,
    capacity: usize,
}

impl QueryCatalog {
    pub fn new(capacity: usize) -> Self {
        Self {
            queries: HashMap::new(),
            order: InsertionOrder::default(),
            capacity: capacity.max(1),
        }
    }

    /// 记录查询；超出容量时淘汰并返回最早写入的 key
    pub fn remember(&mut self, key: &str, query: &InterpretedQuery) -> Vec<String> {
        let mut evicted = Vec::new();
        if !self.queries.contains_key(key) {
            while self.queries.len() >= self.capacity {
                let Some(oldest) = self.order.pop_oldest() else {
                    break;
                };
                self.queries.remove(&oldest);
                evicted.push(oldest);
            }
        }
        self.queries.insert(key.to_string(), query.clone());
        self.order.touch(key);
        evicted
    }

    pub fn get(&self, key: &str) -> Option<&InterpretedQuery> {
        self.queries.get(key)
    }

    pub fn forget(&mut self, key: &str) {
        self.queries.remove(key);
        self.order.remove(key);
    }

    pub fn len(&self) -> usize {
        self.queries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }

    pub fn clear(&mut self) {
        self.queries.clear();
        self.order.clear();
    }
}

/// 预热执行者
#[async_trait]
pub trait CacheWarmer: Send + Sync {
    /// 执行预热查询并写回缓存，成功返回 true
    async fn warm(&self, task: &CacheWarmingTask) -> bool;
}
