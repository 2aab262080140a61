//! 分片能力描述

use serde::{Deserialize, Serialize};

use crate::query::{InterpretedQuery, QueryIntent};

/// 分片类型 (决定片段载荷的特化方式)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShardKind {
    /// 主数据分片
    Primary,
    /// 普通数据分片 / 副本
    Data,
    /// 时序分片
    TimeSeries,
    /// 分析型分片
    Analytics,
    /// 凭证/令牌校验分片 (必须先于数据访问)
    TokenValidation,
}

/// 存储层级
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageTier {
    Hot,
    Warm,
    Cold,
}

impl StorageTier {
    /// 成本权重
    pub fn cost_weight(&self) -> f64 {
        match self {
            StorageTier::Hot => 2.0,
            StorageTier::Warm => 1.0,
            StorageTier::Cold => 0.5,
        }
    }
}

/// 分片能力描述
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardCapabilities {
    pub kind: ShardKind,
    pub tier: StorageTier,
    /// 支持的数据类型 (领域)
    pub data_types: Vec<String>,
    /// 支持的查询意图，空表示全部支持
    #[serde(default)]
    pub intents: Vec<QueryIntent>,
    /// 特性标记
    #[serde(default)]
    pub features: Vec<String>,
}

impl ShardCapabilities {
    pub fn new(kind: ShardKind, tier: StorageTier) -> Self {
        Self {
            kind,
            tier,
            data_types: Vec::new(),
            intents: Vec::new(),
            features: Vec::new(),
        }
    }

    pub fn with_data_types<I, S>(mut self, data_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.data_types = data_types.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_intents(mut self, intents: Vec<QueryIntent>) -> Self {
        self.intents = intents;
        self
    }

    pub fn with_features<I, S>(mut self, features: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.features = features.into_iter().map(Into::into).collect();
        self
    }

    pub fn supports_data_type(&self, data_type: &str) -> bool {
        self.data_types.iter().any(|d| d == data_type)
    }

    pub fn supports_intent(&self, intent: QueryIntent) -> bool {
        self.intents.is_empty() || self.intents.contains(&intent)
    }

    pub fn is_validation(&self) -> bool {
        self.kind == ShardKind::TokenValidation
    }

    /// 能力匹配度 ∈ [0, 1]：{领域, 意图, 特性} 三项检查中满足的比例
    pub fn capability_match(&self, query: &InterpretedQuery) -> f64 {
        let mut satisfied = 0u32;

        if self.supports_data_type(&query.data_type) {
            satisfied += 1;
        }
        if self.supports_intent(query.intent) {
            satisfied += 1;
        }
        if query
            .optimization_hints
            .required_features
            .iter()
            .all(|f| self.features.contains(f))
        {
            satisfied += 1;
        }

        satisfied as f64 / 3.0
    }
}

impl Default for ShardCapabilities {
    fn default() -> Self {
        Self::new(ShardKind::Data, StorageTier::Warm)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::OptimizationHints;

    #[test]
    fn test_capability_match() {
        let caps = ShardCapabilities::new(ShardKind::Data, StorageTier::Hot)
            .with_data_types(["users"])
            .with_intents(vec![QueryIntent::Lookup])
            .with_features(["realtime"]);

        let q = InterpretedQuery::new("find user", "users");
        assert_eq!(caps.capability_match(&q), 1.0);

        let wrong_domain = InterpretedQuery::new("find order", "orders");
        assert!((caps.capability_match(&wrong_domain) - 2.0 / 3.0).abs() < 1e-9);

        let mut hints = OptimizationHints::default();
        hints.required_features = vec!["fulltext".to_string()];
        let q = InterpretedQuery::new("search", "orders")
            .with_intent(QueryIntent::Search)
            .with_hints(hints);
        assert_eq!(caps.capability_match(&q), 0.0);
    }

    #[test]
    fn test_empty_intents_means_any() {
        let caps = ShardCapabilities::default();
        assert!(caps.supports_intent(QueryIntent::Analyze));
    }
}
