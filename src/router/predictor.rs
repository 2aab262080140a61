//! 评分预测接口
//!
//! 外部智能组件 (模式学习、模型打分) 可以通过该接口提供提示分数。
//! 路由器和规划器只依赖数值契约，不依赖具体模型；没有预测器时使用纯公式。

use crate::query::InterpretedQuery;
use crate::shard::ShardState;

/// 提示分数在最终得分中的权重
pub const HINT_WEIGHT: f64 = 0.1;

/// 评分预测器
pub trait ScorePredictor: Send + Sync {
    /// 返回 [0, 1] 内的提示分数，`None` 表示不提供
    fn predict(&self, query: &InterpretedQuery, state: &ShardState) -> Option<f64>;
}

/// 把提示分数混入基础分数
pub fn blend_hint(base: f64, hint: Option<f64>) -> f64 {
    match hint {
        Some(h) if h.is_finite() => (1.0 - HINT_WEIGHT) * base + HINT_WEIGHT * h.clamp(0.0, 1.0),
        _ => base,
    }
}

/// 固定分数预测器
pub struct ConstantPredictor(pub f64);

impl ScorePredictor for ConstantPredictor {
    fn predict(&self, _query: &InterpretedQuery, _state: &ShardState) -> Option<f64> {
        Some(self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blend_hint() {
        assert_eq!(blend_hint(0.5, None), 0.5);
        assert!((blend_hint(0.5, Some(1.0)) - 0.55).abs() < 1e-9);
        // 超出范围的提示被截断
        assert!((blend_hint(0.5, Some(3.0)) - 0.55).abs() < 1e-9);
        assert_eq!(blend_hint(0.5, Some(f64::NAN)), 0.5);
    }
}
