//! 聚合策略

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// 聚合策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationStrategy {
    /// 直接拼接
    Merge,
    /// 拼接后按键去重 (id › email › token › 结构哈希)
    Deduplicate,
    /// 热分片 / 低延迟分片优先
    PrioritizeHot,
    /// 按时间戳降序
    TimeOrdered,
    /// 按分片权重对数值字段加权平均
    WeightedAverage,
    /// 数值字段统计摘要
    StatisticalSummary,
    /// 按关联键交叉引用
    CrossReference,
}

impl AggregationStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregationStrategy::Merge => "merge",
            AggregationStrategy::Deduplicate => "deduplicate",
            AggregationStrategy::PrioritizeHot => "prioritize_hot",
            AggregationStrategy::TimeOrdered => "time_ordered",
            AggregationStrategy::WeightedAverage => "weighted_average",
            AggregationStrategy::StatisticalSummary => "statistical_summary",
            AggregationStrategy::CrossReference => "cross_reference",
        }
    }

    /// 解析策略名称，未知名称回退到 merge
    pub fn from_name(name: &str) -> Self {
        name.parse().unwrap_or_else(|_| {
            log::debug!("Unknown aggregation strategy '{}', using merge", name);
            AggregationStrategy::Merge
        })
    }
}

impl fmt::Display for AggregationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AggregationStrategy {
    type Err = String;

    /// 接受 snake_case 与 kebab-case
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "merge" => Ok(AggregationStrategy::Merge),
            "deduplicate" | "dedup" => Ok(AggregationStrategy::Deduplicate),
            "prioritize_hot" => Ok(AggregationStrategy::PrioritizeHot),
            "time_ordered" => Ok(AggregationStrategy::TimeOrdered),
            "weighted_average" => Ok(AggregationStrategy::WeightedAverage),
            "statistical_summary" => Ok(AggregationStrategy::StatisticalSummary),
            "cross_reference" => Ok(AggregationStrategy::CrossReference),
            other => Err(format!("unknown aggregation strategy: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_names() {
        assert_eq!(
            "time-ordered".parse::<AggregationStrategy>().unwrap(),
            AggregationStrategy::TimeOrdered
        );
        assert_eq!(
            AggregationStrategy::from_name("statistical_summary"),
            AggregationStrategy::StatisticalSummary
        );
        assert_eq!(AggregationStrategy::from_name("bogus"), AggregationStrategy::Merge);
    }

    #[test]
    fn test_as_str_round_trips() {
        for s in [
            AggregationStrategy::Merge,
            AggregationStrategy::Deduplicate,
            AggregationStrategy::PrioritizeHot,
            AggregationStrategy::TimeOrdered,
            AggregationStrategy::WeightedAverage,
            AggregationStrategy::StatisticalSummary,
            AggregationStrategy::CrossReference,
        ] {
            assert_eq!(AggregationStrategy::from_name(s.as_str()), s);
        }
    }
}
