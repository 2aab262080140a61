//! 结果聚合器
//!
//! 只对成功的分片结果执行聚合；失败的分片转换为 `QueryError`，
//! 但所有分片 (包括失败的) 都会出现在 `metadata.sources` 中。聚合从不返回错误。

use std::sync::Arc;

use dashmap::DashMap;

use super::errors::classify;
use super::merge::{self, MergeOutput};
use super::result::{
    AggregatedResult, AggregationInsights, AggregationMetadata, CachingMetadata, SourceInfo,
};
use super::strategy::AggregationStrategy;
use crate::query::{fingerprint_text, TemporalScope};
use crate::shard::{ShardResult, ShardStateStore};

/// 总耗时阈值 (毫秒)
const SLOW_TOTAL_MS: u64 = 1_000;
/// 单分片耗时阈值 (毫秒)
const SLOW_SHARD_MS: u64 = 500;
/// 近期数据的缓存 TTL
const RECENT_TTL_MS: u64 = 5 * 60 * 1000;
/// 默认缓存 TTL
const DEFAULT_TTL_MS: u64 = 60 * 60 * 1000;

/// 结果聚合器
pub struct ResultAggregator {
    /// 分片状态 (用于热分片排序与加权)，可选
    states: Option<Arc<ShardStateStore>>,
    /// 各策略的使用次数
    usage: DashMap<AggregationStrategy, u64>,
}

impl ResultAggregator {
    pub fn new() -> Self {
        Self {
            states: None,
            usage: DashMap::new(),
        }
    }

    pub fn with_shard_states(mut self, states: Arc<ShardStateStore>) -> Self {
        self.states = Some(states);
        self
    }

    /// 按策略名称聚合 (未知名称按 merge 处理)
    pub fn aggregate(
        &self,
        results: &[ShardResult],
        strategy_name: &str,
        execution_id: &str,
        query_text: &str,
    ) -> AggregatedResult {
        self.aggregate_with(
            results,
            AggregationStrategy::from_name(strategy_name),
            execution_id,
            query_text,
        )
    }

    pub fn aggregate_with(
        &self,
        results: &[ShardResult],
        strategy: AggregationStrategy,
        execution_id: &str,
        query_text: &str,
    ) -> AggregatedResult {
        let cache_key = fingerprint_text(query_text);
        self.aggregate_keyed(results, strategy, execution_id, query_text, &cache_key)
    }

    /// 聚合并在缓存元数据中使用调用方实际写入缓存的键
    pub fn aggregate_keyed(
        &self,
        results: &[ShardResult],
        strategy: AggregationStrategy,
        execution_id: &str,
        query_text: &str,
        cache_key: &str,
    ) -> AggregatedResult {
        *self.usage.entry(strategy).or_insert(0) += 1;

        let successful: Vec<&ShardResult> = results.iter().filter(|r| r.success).collect();
        let output = self.apply(strategy, &successful);

        let sources: Vec<SourceInfo> = results
            .iter()
            .map(|r| SourceInfo {
                shard_id: r.shard_id.clone(),
                success: r.success,
                record_count: r.record_count,
                query_time_ms: r.query_time_ms,
                cache_hit: r.cache_hit,
            })
            .collect();

        let errors = results
            .iter()
            .filter(|r| !r.success)
            .map(classify)
            .collect::<Vec<_>>();

        let input_records = successful.iter().map(|r| r.data.len()).sum();
        let insights = insights(results, strategy);
        let caching = caching(results, cache_key, !successful.is_empty());

        if !errors.is_empty() {
            log::debug!(
                "Aggregation {} ({}): {} of {} shards failed",
                execution_id,
                strategy,
                errors.len(),
                results.len()
            );
        }

        AggregatedResult {
            execution_id: execution_id.to_string(),
            query: query_text.to_string(),
            metadata: AggregationMetadata {
                strategy,
                successful_shards: successful.len(),
                failed_shards: errors.len(),
                input_records,
                output_records: output.data.len(),
                details: output.details,
                sources,
            },
            data: output.data,
            insights,
            errors,
            caching,
        }
    }

    fn apply(&self, strategy: AggregationStrategy, successful: &[&ShardResult]) -> MergeOutput {
        match strategy {
            AggregationStrategy::Merge => merge::merge(successful),
            AggregationStrategy::Deduplicate => merge::deduplicate(successful),
            AggregationStrategy::PrioritizeHot => merge::prioritize_hot(successful, |id| {
                self.states
                    .as_ref()
                    .and_then(|s| s.get(id))
                    .map(|state| state.capabilities.tier)
            }),
            AggregationStrategy::TimeOrdered => merge::time_ordered(successful),
            AggregationStrategy::WeightedAverage => merge::weighted_average(successful, |id| {
                self.states
                    .as_ref()
                    .and_then(|s| s.get(id))
                    .map(|state| state.reliability)
            }),
            AggregationStrategy::StatisticalSummary => merge::statistical_summary(successful),
            AggregationStrategy::CrossReference => merge::cross_reference(successful),
        }
    }

    /// 各策略的使用次数
    pub fn usage(&self, strategy: AggregationStrategy) -> u64 {
        self.usage.get(&strategy).map(|v| *v).unwrap_or(0)
    }
}

impl Default for ResultAggregator {
    fn default() -> Self {
        Self::new()
    }
}

fn insights(results: &[ShardResult], strategy: AggregationStrategy) -> AggregationInsights {
    let total_time_ms: u64 = results.iter().map(|r| r.query_time_ms).sum();
    let cache_hits = results.iter().filter(|r| r.cache_hit).count();
    let slow_shards: Vec<String> = results
        .iter()
        .filter(|r| r.query_time_ms > SLOW_SHARD_MS)
        .map(|r| r.shard_id.clone())
        .collect();

    let mut suggestions = Vec::new();
    let slow_query = total_time_ms > SLOW_TOTAL_MS;
    if slow_query {
        suggestions.push(format!(
            "total shard time {}ms exceeds {}ms, consider a parallel plan or caching",
            total_time_ms, SLOW_TOTAL_MS
        ));
    }
    if !results.is_empty() && cache_hits == 0 {
        suggestions.push("no cache hits, consider cache warming for this query".to_string());
    }
    for shard in &slow_shards {
        suggestions.push(format!("shard {} exceeded {}ms", shard, SLOW_SHARD_MS));
    }
    if strategy == AggregationStrategy::Merge && results.len() > 3 {
        suggestions.push(format!(
            "merge across {} shards may contain duplicates, consider deduplicate",
            results.len()
        ));
    }

    AggregationInsights {
        total_time_ms,
        slow_query,
        cache_hits,
        slow_shards,
        suggestions,
    }
}

fn caching(results: &[ShardResult], cache_key: &str, cacheable: bool) -> CachingMetadata {
    let recent = results
        .iter()
        .any(|r| matches!(r.temporal, Some(TemporalScope::Recent)));
    CachingMetadata {
        key: cache_key.to_string(),
        ttl_ms: if recent { RECENT_TTL_MS } else { DEFAULT_TTL_MS },
        cacheable,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::result::{ErrorSeverity, StrategyDetails};
    use crate::shard::ShardFailure;
    use serde_json::json;

    fn rec(value: serde_json::Value) -> crate::query::Record {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_duplicate_id_collapses_to_one() {
        let results: Vec<ShardResult> = ["a", "b", "c"]
            .iter()
            .map(|shard| {
                ShardResult::success(*shard, vec![rec(json!({"id": "42", "from": shard}))], 10)
            })
            .collect();

        let aggregator = ResultAggregator::new();
        let out = aggregator.aggregate(&results, "deduplicate", "exec-1", "find 42");

        let with_42 = out.data.iter().filter(|r| r["id"] == json!("42")).count();
        assert_eq!(with_42, 1);
        assert_eq!(
            out.metadata.details,
            StrategyDetails::Deduplicated { duplicates_removed: 2 }
        );
    }

    #[test]
    fn test_partial_failure_is_reported() {
        let results = vec![
            ShardResult::success("a", vec![rec(json!({"id": 1}))], 10),
            ShardResult::success("b", vec![rec(json!({"id": 2}))], 20),
            ShardResult::failure("c", ShardFailure::Timeout, 5000),
        ];

        let out = ResultAggregator::new().aggregate(&results, "merge", "exec-2", "q");
        assert!(out.success());
        assert!(out.is_partial());
        assert_eq!(out.errors.len(), 1);
        assert_eq!(out.errors[0].severity, ErrorSeverity::Warning);
        assert_eq!(out.metadata.sources.len(), 3);
        assert_eq!(out.data.len(), 2);
        assert_eq!(out.metadata.successful_shards, 2);
    }

    #[test]
    fn test_all_failed_yields_empty_success_set() {
        let results = vec![
            ShardResult::failure("a", ShardFailure::Unavailable("down".into()), 1),
            ShardResult::failure("b", ShardFailure::Auth("denied".into()), 1),
        ];
        let out = ResultAggregator::new().aggregate(&results, "merge", "exec-3", "q");
        assert!(!out.success());
        assert_eq!(out.errors.len(), 2);
        assert!(!out.caching.cacheable);
    }

    #[test]
    fn test_aggregate_is_idempotent() {
        let results = vec![
            ShardResult::success("a", vec![rec(json!({"timestamp": 5, "v": 1.5}))], 600),
            ShardResult::success("b", vec![rec(json!({"timestamp": 9, "v": 2.5}))], 700),
            ShardResult::failure("c", ShardFailure::Network("reset".into()), 30),
        ];
        let aggregator = ResultAggregator::new();

        for name in [
            "merge",
            "deduplicate",
            "prioritize_hot",
            "time_ordered",
            "weighted_average",
            "statistical_summary",
            "cross_reference",
        ] {
            let first = aggregator.aggregate(&results, name, "exec", "q");
            let second = aggregator.aggregate(&results, name, "exec", "q");
            assert_eq!(first, second, "strategy {} is not idempotent", name);
        }
        assert_eq!(aggregator.usage(AggregationStrategy::Merge), 2);
    }

    #[test]
    fn test_insights_and_caching() {
        let results: Vec<ShardResult> = (0..4)
            .map(|i| {
                ShardResult::success(format!("s{}", i), vec![], 600)
                    .with_temporal(Some(TemporalScope::Recent))
            })
            .collect();
        let out = ResultAggregator::new().aggregate(&results, "merge", "exec", "recent events");

        assert_eq!(out.insights.total_time_ms, 2400);
        assert!(out.insights.slow_query);
        assert_eq!(out.insights.slow_shards.len(), 4);
        assert!(out
            .insights
            .suggestions
            .iter()
            .any(|s| s.contains("consider deduplicate")));
        assert_eq!(out.caching.ttl_ms, 5 * 60 * 1000);
        assert_eq!(out.caching.key, fingerprint_text("recent events"));

        let keyed = ResultAggregator::new().aggregate_keyed(
            &results,
            AggregationStrategy::Merge,
            "exec",
            "recent events",
            "q:events:recent",
        );
        assert_eq!(keyed.caching.key, "q:events:recent");
        assert_eq!(keyed.query, "recent events");
    }
}
