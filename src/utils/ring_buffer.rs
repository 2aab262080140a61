//! 环形缓冲区 - 有界历史样本
//!
//! 分片性能样本、缓存访问时间戳都使用它保存最近 N 条记录：
//! - O(1) 插入，满时淘汰最旧元素
//! - 固定容量
//! - 支持按条件清理 (过期样本)

use std::collections::VecDeque;

/// 泛型环形缓冲区
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    /// 内部存储
    buffer: VecDeque<T>,
    /// 容量
    capacity: usize,
}

impl<T: Clone> RingBuffer<T> {
    /// 创建指定容量的环形缓冲区
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            buffer: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    /// 推入新元素，如果已满则弹出最旧的元素
    /// 返回被弹出的元素（如果有）
    pub fn push(&mut self, value: T) -> Option<T> {
        let expired = if self.buffer.len() >= self.capacity {
            self.buffer.pop_front()
        } else {
            None
        };
        self.buffer.push_back(value);
        expired
    }

    /// 获取最新元素
    pub fn latest(&self) -> Option<&T> {
        self.buffer.back()
    }

    /// 获取最旧元素
    pub fn oldest(&self) -> Option<&T> {
        self.buffer.front()
    }

    /// 当前元素数量
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// 是否已满
    pub fn is_full(&self) -> bool {
        self.buffer.len() >= self.capacity
    }

    /// 容量
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 只保留满足条件的元素，返回被移除的数量
    pub fn retain<F: FnMut(&T) -> bool>(&mut self, f: F) -> usize {
        let before = self.buffer.len();
        self.buffer.retain(f);
        before - self.buffer.len()
    }

    /// 迭代器（从旧到新）
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.buffer.iter()
    }

    /// 最近 n 个元素（从旧到新）
    pub fn last_n(&self, n: usize) -> impl Iterator<Item = &T> {
        let skip = self.buffer.len().saturating_sub(n);
        self.buffer.iter().skip(skip)
    }

    /// 转换为 Vec
    pub fn to_vec(&self) -> Vec<T> {
        self.buffer.iter().cloned().collect()
    }
}

impl<T: Clone> Default for RingBuffer<T> {
    fn default() -> Self {
        Self::new(64) // 默认容量
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_evicts_oldest() {
        let mut rb = RingBuffer::new(3);
        assert_eq!(rb.push(1), None);
        assert_eq!(rb.push(2), None);
        assert_eq!(rb.push(3), None);
        assert!(rb.is_full());

        assert_eq!(rb.push(4), Some(1));
        assert_eq!(rb.to_vec(), vec![2, 3, 4]);
        assert_eq!(rb.oldest(), Some(&2));
        assert_eq!(rb.latest(), Some(&4));
    }

    #[test]
    fn test_retain_and_last_n() {
        let mut rb = RingBuffer::new(10);
        for i in 0..10 {
            rb.push(i);
        }

        let tail: Vec<i32> = rb.last_n(3).copied().collect();
        assert_eq!(tail, vec![7, 8, 9]);

        let removed = rb.retain(|v| *v >= 5);
        assert_eq!(removed, 5);
        assert_eq!(rb.len(), 5);

        // n 大于长度时返回全部
        assert_eq!(rb.last_n(100).count(), 5);
    }
}
