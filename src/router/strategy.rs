//! 路由策略
//!
//! 策略 = {latency, reliability, cost, freshness} 权重 + {minReliability, maxLatency} 约束。

use serde::{Deserialize, Serialize};

/// 评分权重
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StrategyWeights {
    pub latency: f64,
    pub reliability: f64,
    pub cost: f64,
    pub freshness: f64,
}

/// 路由策略
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingStrategy {
    pub name: String,
    pub weights: StrategyWeights,
    /// 最低可靠性约束
    pub min_reliability: f64,
    /// 最大延迟约束 (毫秒)
    pub max_latency_ms: f64,
}

impl RoutingStrategy {
    pub fn new(
        name: impl Into<String>,
        weights: StrategyWeights,
        min_reliability: f64,
        max_latency_ms: f64,
    ) -> Self {
        Self {
            name: name.into(),
            weights,
            min_reliability,
            max_latency_ms,
        }
    }

    /// 低延迟优先
    pub fn performance() -> Self {
        Self::new(
            "performance",
            StrategyWeights {
                latency: 0.5,
                reliability: 0.2,
                cost: 0.1,
                freshness: 0.2,
            },
            0.8,
            1_000.0,
        )
    }

    /// 可靠性优先
    pub fn reliability() -> Self {
        Self::new(
            "reliability",
            StrategyWeights {
                latency: 0.2,
                reliability: 0.5,
                cost: 0.1,
                freshness: 0.2,
            },
            0.95,
            5_000.0,
        )
    }

    /// 成本优先
    pub fn cost() -> Self {
        Self::new(
            "cost",
            StrategyWeights {
                latency: 0.2,
                reliability: 0.2,
                cost: 0.5,
                freshness: 0.1,
            },
            0.7,
            10_000.0,
        )
    }

    /// 实时查询 (严格延迟约束)
    pub fn realtime() -> Self {
        Self::new(
            "realtime",
            StrategyWeights {
                latency: 0.4,
                reliability: 0.2,
                cost: 0.0,
                freshness: 0.4,
            },
            0.9,
            100.0,
        )
    }

    /// 均衡
    pub fn balanced() -> Self {
        Self::new(
            "balanced",
            StrategyWeights {
                latency: 0.25,
                reliability: 0.25,
                cost: 0.25,
                freshness: 0.25,
            },
            0.8,
            2_000.0,
        )
    }

    /// 内置策略
    pub fn builtins() -> Vec<RoutingStrategy> {
        vec![
            Self::performance(),
            Self::reliability(),
            Self::cost(),
            Self::realtime(),
            Self::balanced(),
        ]
    }

    /// 是否违反约束
    pub fn violates(&self, reliability: f64, estimated_latency_ms: f64) -> bool {
        reliability < self.min_reliability || estimated_latency_ms > self.max_latency_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_weights_sum_to_one() {
        for strategy in RoutingStrategy::builtins() {
            let w = strategy.weights;
            let sum = w.latency + w.reliability + w.cost + w.freshness;
            assert!((sum - 1.0).abs() < 1e-9, "{} weights sum to {}", strategy.name, sum);
        }
    }

    #[test]
    fn test_violates() {
        let realtime = RoutingStrategy::realtime();
        assert!(realtime.violates(0.99, 500.0));
        assert!(realtime.violates(0.5, 50.0));
        assert!(!realtime.violates(0.95, 50.0));
    }
}
