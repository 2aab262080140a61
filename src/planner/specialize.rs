//! 片段载荷特化
//!
//! 纯函数：(分片能力, 查询) → 载荷

use super::plan::{FragmentPayload, SortOrder};
use crate::query::{FilterOp, InterpretedQuery, QueryFilter, TemporalScope};
use crate::shard::{ShardCapabilities, ShardKind};

/// 视为凭证的字段
const TOKEN_FIELDS: [&str; 4] = ["token", "access_token", "session_token", "api_key"];

/// 分析分片的默认指标
const DEFAULT_METRICS: [&str; 4] = ["count", "avg", "min", "max"];

/// 按分片类型生成载荷
pub fn specialize(caps: &ShardCapabilities, query: &InterpretedQuery) -> FragmentPayload {
    let limit = query.optimization_hints.max_results;

    match caps.kind {
        ShardKind::TokenValidation => FragmentPayload::ValidationOnly {
            tokens: extract_tokens(&query.filters),
        },
        ShardKind::TimeSeries => FragmentPayload::TemporalScan {
            data_type: query.data_type.clone(),
            filters: query.filters.clone(),
            temporal: query.temporal.clone(),
            order: match query.temporal {
                Some(TemporalScope::Historical) => SortOrder::Ascending,
                _ => SortOrder::Descending,
            },
            limit,
        },
        ShardKind::Analytics => FragmentPayload::AggregationMapping {
            data_type: query.data_type.clone(),
            filters: query.filters.clone(),
            group_by: query
                .filters
                .iter()
                .filter(|f| f.op == FilterOp::In)
                .map(|f| f.field.clone())
                .collect(),
            metrics: DEFAULT_METRICS.iter().map(|m| m.to_string()).collect(),
        },
        ShardKind::Primary | ShardKind::Data => FragmentPayload::Projection {
            data_type: query.data_type.clone(),
            fields: projection_fields(query),
            filters: query.filters.clone(),
            limit,
        },
    }
}

/// 低复杂度模式只取 id 与条件字段，否则取全部字段
fn projection_fields(query: &InterpretedQuery) -> Vec<String> {
    if !query.optimization_hints.low_complexity {
        return Vec::new();
    }
    let mut fields = vec!["id".to_string()];
    for filter in &query.filters {
        if !fields.contains(&filter.field) {
            fields.push(filter.field.clone());
        }
    }
    fields
}

fn extract_tokens(filters: &[QueryFilter]) -> Vec<String> {
    let mut tokens = Vec::new();
    for filter in filters
        .iter()
        .filter(|f| TOKEN_FIELDS.contains(&f.field.as_str()))
    {
        match &filter.value {
            serde_json::Value::String(s) => tokens.push(s.clone()),
            serde_json::Value::Array(values) => {
                tokens.extend(values.iter().filter_map(|v| v.as_str().map(str::to_string)))
            }
            _ => {}
        }
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::OptimizationHints;
    use crate::shard::StorageTier;
    use serde_json::json;

    #[test]
    fn test_validation_payload_extracts_tokens() {
        let caps = ShardCapabilities::new(ShardKind::TokenValidation, StorageTier::Hot);
        let query = InterpretedQuery::new("check session", "sessions")
            .with_filter(QueryFilter::eq("token", "abc"))
            .with_filter(QueryFilter {
                field: "api_key".to_string(),
                op: FilterOp::In,
                value: json!(["k1", "k2"]),
            })
            .with_filter(QueryFilter::eq("user_id", 7));

        assert_eq!(
            specialize(&caps, &query),
            FragmentPayload::ValidationOnly {
                tokens: vec!["abc".to_string(), "k1".to_string(), "k2".to_string()]
            }
        );
    }

    #[test]
    fn test_time_series_order() {
        let caps = ShardCapabilities::new(ShardKind::TimeSeries, StorageTier::Warm);
        let recent = InterpretedQuery::new("q", "events").with_temporal(TemporalScope::Recent);
        let historical = InterpretedQuery::new("q", "events").with_temporal(TemporalScope::Historical);

        let order = |p: FragmentPayload| match p {
            FragmentPayload::TemporalScan { order, .. } => order,
            other => panic!("unexpected payload {:?}", other),
        };
        assert_eq!(order(specialize(&caps, &recent)), SortOrder::Descending);
        assert_eq!(order(specialize(&caps, &historical)), SortOrder::Ascending);
    }

    #[test]
    fn test_low_complexity_projection() {
        let caps = ShardCapabilities::new(ShardKind::Data, StorageTier::Warm);
        let query = InterpretedQuery::new("q", "users")
            .with_filter(QueryFilter::eq("email", "a@b.c"))
            .with_hints(OptimizationHints {
                low_complexity: true,
                max_results: Some(5),
                ..Default::default()
            });

        match specialize(&caps, &query) {
            FragmentPayload::Projection { fields, limit, .. } => {
                assert_eq!(fields, vec!["id".to_string(), "email".to_string()]);
                assert_eq!(limit, Some(5));
            }
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[test]
    fn test_specialize_is_pure() {
        let caps = ShardCapabilities::new(ShardKind::Analytics, StorageTier::Cold);
        let query = InterpretedQuery::new("q", "orders");
        assert_eq!(specialize(&caps, &query), specialize(&caps, &query));
    }
}
