//! 查询模型
//!
//! `InterpretedQuery` 由外部自然语言解析组件产出，本 crate 只读取它。

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::aggregator::AggregationStrategy;

/// 分片返回的单条记录 (JSON 对象)
pub type Record = serde_json::Map<String, serde_json::Value>;

// ═══════════════════════════════════════════════════════════════════════════
// 查询类型定义
// ═══════════════════════════════════════════════════════════════════════════

/// 查询意图
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryIntent {
    /// 点查询
    Lookup,
    /// 检索
    Search,
    /// 聚合
    Aggregate,
    /// 分析
    Analyze,
    /// 凭证/令牌校验
    Validate,
}

impl Default for QueryIntent {
    fn default() -> Self {
        QueryIntent::Lookup
    }
}

/// 时间范围
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemporalScope {
    /// 近期数据
    Recent,
    /// 历史数据
    Historical,
    /// 显式时间区间 (毫秒时间戳)
    Range { start_ms: i64, end_ms: i64 },
}

/// 条件操作符
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    Contains,
}

/// 查询条件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryFilter {
    pub field: String,
    pub op: FilterOp,
    pub value: serde_json::Value,
}

impl QueryFilter {
    pub fn eq(field: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        Self {
            field: field.into(),
            op: FilterOp::Eq,
            value: value.into(),
        }
    }

    /// 判断记录是否满足条件，缺失字段视为不满足
    pub fn matches(&self, record: &Record) -> bool {
        let Some(actual) = record.get(&self.field) else {
            return false;
        };

        match self.op {
            FilterOp::Eq => actual == &self.value,
            FilterOp::Ne => actual != &self.value,
            FilterOp::Lt => compare(actual, &self.value).map_or(false, |o| o.is_lt()),
            FilterOp::Le => compare(actual, &self.value).map_or(false, |o| o.is_le()),
            FilterOp::Gt => compare(actual, &self.value).map_or(false, |o| o.is_gt()),
            FilterOp::Ge => compare(actual, &self.value).map_or(false, |o| o.is_ge()),
            FilterOp::In => self
                .value
                .as_array()
                .map_or(false, |values| values.contains(actual)),
            FilterOp::Contains => match (actual.as_str(), self.value.as_str()) {
                (Some(haystack), Some(needle)) => haystack.contains(needle),
                _ => false,
            },
        }
    }
}

fn compare(a: &serde_json::Value, b: &serde_json::Value) -> Option<std::cmp::Ordering> {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x.partial_cmp(&y),
        _ => match (a.as_str(), b.as_str()) {
            (Some(x), Some(y)) => Some(x.cmp(y)),
            _ => None,
        },
    }
}

/// 优化提示
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OptimizationHints {
    /// 优先使用缓存
    #[serde(default)]
    pub prefer_cache: bool,
    /// 降低查询复杂度 (性能退化时使用)
    #[serde(default)]
    pub low_complexity: bool,
    /// 分片必须具备的特性
    #[serde(default)]
    pub required_features: Vec<String>,
    /// 分片查询超时 (毫秒)
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// 路由策略名称
    #[serde(default)]
    pub routing_strategy: Option<String>,
    /// 每个分片最多返回的记录数
    #[serde(default)]
    pub max_results: Option<usize>,
    /// 需要自定义交叉引用聚合
    #[serde(default)]
    pub custom_cross_reference: bool,
}

// ═══════════════════════════════════════════════════════════════════════════
// 解析后的查询
// ═══════════════════════════════════════════════════════════════════════════

/// 解析后的查询
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterpretedQuery {
    /// 原始查询文本
    pub text: String,
    /// 数据类型 (如 users / orders / sessions)
    pub data_type: String,
    /// 查询意图
    #[serde(default)]
    pub intent: QueryIntent,
    /// 查询条件
    #[serde(default)]
    pub filters: Vec<QueryFilter>,
    /// 时间范围
    #[serde(default)]
    pub temporal: Option<TemporalScope>,
    /// 候选分片
    #[serde(default)]
    pub target_shard_ids: Vec<String>,
    /// 聚合策略提示
    #[serde(default)]
    pub aggregation_strategy_hint: Option<AggregationStrategy>,
    /// 优化提示
    #[serde(default)]
    pub optimization_hints: OptimizationHints,
}

impl InterpretedQuery {
    pub fn new(text: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            data_type: data_type.into(),
            intent: QueryIntent::Lookup,
            filters: Vec::new(),
            temporal: None,
            target_shard_ids: Vec::new(),
            aggregation_strategy_hint: None,
            optimization_hints: OptimizationHints::default(),
        }
    }

    pub fn with_intent(mut self, intent: QueryIntent) -> Self {
        self.intent = intent;
        self
    }

    pub fn with_filter(mut self, filter: QueryFilter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn with_temporal(mut self, temporal: TemporalScope) -> Self {
        self.temporal = Some(temporal);
        self
    }

    pub fn with_targets<I, S>(mut self, shard_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.target_shard_ids = shard_ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_aggregation(mut self, strategy: AggregationStrategy) -> Self {
        self.aggregation_strategy_hint = Some(strategy);
        self
    }

    pub fn with_hints(mut self, hints: OptimizationHints) -> Self {
        self.optimization_hints = hints;
        self
    }

    /// 查询复杂度 ∈ [0, 1]
    ///
    /// 条件数量、聚合/分析意图、跨分片数量和时间范围都会提高复杂度；
    /// `low_complexity` 提示会把结果压到一半。
    pub fn complexity(&self) -> f64 {
        let mut score = (self.filters.len() as f64 * 0.1).min(0.4);

        score += match self.intent {
            QueryIntent::Aggregate | QueryIntent::Analyze => 0.3,
            QueryIntent::Search => 0.15,
            QueryIntent::Lookup | QueryIntent::Validate => 0.0,
        };

        if self.target_shard_ids.len() > 1 {
            score += 0.1;
        }

        if matches!(
            self.temporal,
            Some(TemporalScope::Historical) | Some(TemporalScope::Range { .. })
        ) {
            score += 0.2;
        }

        if self.optimization_hints.low_complexity {
            score *= 0.5;
        }

        score.clamp(0.0, 1.0)
    }

    /// 是否需要近期数据
    pub fn needs_recent_data(&self) -> bool {
        match &self.temporal {
            Some(TemporalScope::Recent) => true,
            Some(TemporalScope::Range { end_ms, .. }) => {
                let now = chrono::Utc::now().timestamp_millis();
                now - end_ms < 60 * 60 * 1000
            }
            _ => false,
        }
    }

    /// 是否为多分片 / 分析型查询
    pub fn is_multi_shard(&self) -> bool {
        self.target_shard_ids.len() > 1
            || matches!(self.intent, QueryIntent::Aggregate | QueryIntent::Analyze)
    }

    /// 查询的主目标分片
    pub fn primary_shard(&self) -> Option<&str> {
        self.target_shard_ids.first().map(String::as_str)
    }

    /// 用户指定的分片超时
    pub fn timeout(&self) -> Option<Duration> {
        self.optimization_hints.timeout_ms.map(Duration::from_millis)
    }

    /// 路由策略名称 (默认 balanced)
    pub fn routing_strategy(&self) -> &str {
        self.optimization_hints
            .routing_strategy
            .as_deref()
            .unwrap_or("balanced")
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// 测试
// ═══════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: serde_json::Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_filter_matches() {
        let rec = record(json!({"id": "42", "age": 31, "name": "alice"}));

        assert!(QueryFilter::eq("id", "42").matches(&rec));
        assert!(!QueryFilter::eq("id", "43").matches(&rec));

        let gt = QueryFilter {
            field: "age".to_string(),
            op: FilterOp::Gt,
            value: json!(30),
        };
        assert!(gt.matches(&rec));

        let contains = QueryFilter {
            field: "name".to_string(),
            op: FilterOp::Contains,
            value: json!("lic"),
        };
        assert!(contains.matches(&rec));

        // 缺失字段
        assert!(!QueryFilter::eq("email", "x").matches(&rec));
    }

    #[test]
    fn test_complexity_bounds() {
        let simple = InterpretedQuery::new("find user 42", "users");
        assert_eq!(simple.complexity(), 0.0);

        let heavy = InterpretedQuery::new("analyze everything", "events")
            .with_intent(QueryIntent::Analyze)
            .with_temporal(TemporalScope::Historical)
            .with_targets(["a", "b", "c"])
            .with_filter(QueryFilter::eq("a", 1))
            .with_filter(QueryFilter::eq("b", 2))
            .with_filter(QueryFilter::eq("c", 3))
            .with_filter(QueryFilter::eq("d", 4))
            .with_filter(QueryFilter::eq("e", 5));
        let c = heavy.complexity();
        assert!(c > 0.9 && c <= 1.0);

        let mut hints = OptimizationHints::default();
        hints.low_complexity = true;
        let reduced = heavy.clone().with_hints(hints);
        assert!(reduced.complexity() < c);
    }

    #[test]
    fn test_multi_shard_and_primary() {
        let q = InterpretedQuery::new("q", "users").with_targets(["primary-users", "replica"]);
        assert!(q.is_multi_shard());
        assert_eq!(q.primary_shard(), Some("primary-users"));

        let single = InterpretedQuery::new("q", "users").with_targets(["only"]);
        assert!(!single.is_multi_shard());
        assert_eq!(single.routing_strategy(), "balanced");
    }

    #[test]
    fn test_needs_recent_data() {
        let recent = InterpretedQuery::new("q", "events").with_temporal(TemporalScope::Recent);
        assert!(recent.needs_recent_data());

        let historical =
            InterpretedQuery::new("q", "events").with_temporal(TemporalScope::Historical);
        assert!(!historical.needs_recent_data());
    }
}
