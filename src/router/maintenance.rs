//! 路由器后台维护
//!
//! - 负载估算刷新 (默认 5s)：探测每个分片的健康与指标
//! - 陈旧指标衰减 (默认 60s)：降低可信度并清理过期样本
//!
//! 后台任务通过 `CancellationToken` 停止，而不是依赖进程退出。

use std::sync::Arc;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;

use super::dynamic::DynamicRouter;
use crate::shard::{HealthStatus, ShardHealth, ShardState};
use crate::utils::now_ms;

/// 洞察中列出的最优分片数
const TOP_SHARDS: usize = 5;

/// 分片问题描述
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardProblem {
    pub shard_id: String,
    pub reasons: Vec<String>,
}

/// 路由洞察
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoutingInsights {
    /// (shard_id, 综合得分)
    pub top_shards: Vec<(String, f64)>,
    pub problematic_shards: Vec<ShardProblem>,
    pub tracked_shards: usize,
    pub total_routings: u64,
    pub constraint_violations: u64,
}

impl DynamicRouter {
    /// 刷新所有已注册分片的负载估算。返回探测失败的分片数
    ///
    /// 所有分片并发探测，单个分片的健康与指标探测也并发进行，
    /// 超时取 `RouterConfig::probe_timeout_ms`。
    pub async fn refresh_load_estimates(&self) -> usize {
        let registry = self.registry();
        let timeout = self.config().probe_timeout();

        let probes = registry.shard_ids().into_iter().filter_map(|shard_id| {
            let shard = registry.get(&shard_id)?;
            Some(async move {
                let (health, metrics) = tokio::join!(
                    tokio::time::timeout(timeout, shard.handle.get_health()),
                    tokio::time::timeout(timeout, shard.handle.get_metrics()),
                );
                (shard_id, shard, health, metrics)
            })
        });
        let outcomes = join_all(probes).await;

        let states = self.states();
        let config = self.config();
        let mut failures = 0;

        for (shard_id, shard, health, metrics) in outcomes {
            let init = || {
                ShardState::new(
                    &shard_id,
                    shard.capabilities.clone(),
                    config.default_latency_ms,
                    config.default_reliability,
                    config.history_capacity,
                )
            };

            match health {
                Ok(Ok(health)) => {
                    states.update(&shard_id, init, |state| {
                        state.capabilities = shard.capabilities.clone();
                        state.apply_health(&health);
                        if let Ok(Ok(metrics)) = &metrics {
                            state.apply_metrics(metrics);
                        }
                    });
                }
                Ok(Err(e)) => {
                    failures += 1;
                    log::warn!("Health probe failed for shard {}: {}", shard_id, e);
                    states.update(&shard_id, init, mark_unhealthy);
                }
                Err(_) => {
                    failures += 1;
                    log::warn!(
                        "Health probe timed out for shard {} after {}ms",
                        shard_id,
                        config.probe_timeout_ms
                    );
                    states.update(&shard_id, init, mark_unhealthy);
                }
            }
        }

        log::debug!(
            "Refreshed load estimates for {} shards ({} failed)",
            registry.len(),
            failures
        );
        failures
    }

    /// 衰减陈旧指标。返回清理的样本数
    pub fn decay_stale_metrics(&self, now_ms: i64) -> usize {
        let stale_after = self.config().stale_after_ms as i64;
        let retention = self.config().sample_retention_ms as i64;
        let mut pruned = 0;

        self.states().for_each_mut(|state| {
            pruned += state.decay(now_ms, stale_after, retention);
        });

        if pruned > 0 {
            log::debug!("Pruned {} stale performance samples", pruned);
        }
        pruned
    }

    /// 启动后台维护任务
    pub fn spawn_maintenance(self: Arc<Self>, token: CancellationToken) -> Vec<JoinHandle<()>> {
        let refresh_interval = self.config().refresh_interval();
        let decay_interval = self.config().decay_interval();

        let router = Arc::clone(&self);
        let refresh_token = token.clone();
        let refresh = tokio::spawn(async move {
            let mut ticker = interval(refresh_interval);
            loop {
                tokio::select! {
                    _ = refresh_token.cancelled() => break,
                    _ = ticker.tick() => {
                        router.refresh_load_estimates().await;
                    }
                }
            }
            log::debug!("Router load refresh task stopped");
        });

        let router = self;
        let decay = tokio::spawn(async move {
            let mut ticker = interval(decay_interval);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        router.decay_stale_metrics(now_ms());
                    }
                }
            }
            log::debug!("Router decay task stopped");
        });

        vec![refresh, decay]
    }

    /// 路由洞察：最优分片与问题分片
    pub fn insights(&self) -> RoutingInsights {
        let snapshot = self.states().snapshot();

        let mut top_shards: Vec<(String, f64)> = snapshot
            .iter()
            .map(|s| {
                let score = if s.avg_latency_ms.is_finite() {
                    s.reliability / (1.0 + s.avg_latency_ms / 1000.0)
                } else {
                    0.0
                };
                (s.shard_id.clone(), score)
            })
            .collect();
        top_shards.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        top_shards.truncate(TOP_SHARDS);

        let problematic_shards = snapshot
            .iter()
            .filter_map(|s| {
                let mut reasons = Vec::new();
                if s.health == HealthStatus::Unhealthy {
                    reasons.push("unhealthy".to_string());
                }
                if s.reliability < 0.8 {
                    reasons.push(format!("low reliability ({:.2})", s.reliability));
                }
                if s.p95_latency_ms > 1000.0 {
                    reasons.push(format!("high p95 latency ({:.0}ms)", s.p95_latency_ms));
                }
                (!reasons.is_empty()).then(|| ShardProblem {
                    shard_id: s.shard_id.clone(),
                    reasons,
                })
            })
            .collect();

        let stats = self.get_stats();
        RoutingInsights {
            top_shards,
            problematic_shards,
            tracked_shards: snapshot.len(),
            total_routings: stats.total_routings,
            constraint_violations: stats.constraint_violations,
        }
    }
}

fn mark_unhealthy(state: &mut ShardState) {
    state.apply_health(&ShardHealth {
        status: HealthStatus::Unhealthy,
        cpu_usage: 100.0,
        memory_usage: state.memory_usage_mb,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::time::{Duration, Instant};

    use crate::planner::FragmentPayload;
    use crate::query::Record;
    use crate::shard::{
        InMemoryShard, ShardCapabilities, ShardFailure, ShardHandle, ShardMetrics, ShardRegistry,
        ShardStateStore,
    };
    use crate::utils::RouterConfig;

    /// 健康探测响应缓慢的分片
    struct SlowHealthShard {
        delay: Duration,
    }

    #[async_trait]
    impl ShardHandle for SlowHealthShard {
        async fn get_health(&self) -> Result<ShardHealth, ShardFailure> {
            tokio::time::sleep(self.delay).await;
            Ok(ShardHealth::healthy(10.0, 64.0))
        }

        async fn get_metrics(&self) -> Result<ShardMetrics, ShardFailure> {
            Ok(ShardMetrics::default())
        }

        async fn query(&self, _payload: &FragmentPayload) -> Result<Vec<Record>, ShardFailure> {
            Ok(Vec::new())
        }
    }

    fn setup() -> (Arc<DynamicRouter>, Arc<InMemoryShard>, Arc<InMemoryShard>) {
        let registry = Arc::new(ShardRegistry::new());
        let good = Arc::new(
            InMemoryShard::new(Vec::new()).with_health(ShardHealth::healthy(40.0, 256.0)),
        );
        let bad = Arc::new(InMemoryShard::new(Vec::new()));
        bad.set_unreachable(true);

        registry.register("good", good.clone(), ShardCapabilities::default());
        registry.register("bad", bad.clone(), ShardCapabilities::default());

        let router = Arc::new(DynamicRouter::new(
            RouterConfig::default(),
            registry,
            ShardStateStore::shared(),
        ));
        (router, good, bad)
    }

    #[tokio::test]
    async fn test_refresh_marks_unreachable_unhealthy() {
        let (router, _good, _bad) = setup();
        let failures = router.refresh_load_estimates().await;
        assert_eq!(failures, 1);

        let good = router.shard_state("good");
        assert_eq!(good.health, HealthStatus::Healthy);
        assert!((good.load - 0.4).abs() < 1e-9);

        let bad = router.shard_state("bad");
        assert_eq!(bad.health, HealthStatus::Unhealthy);
    }

    #[tokio::test]
    async fn test_refresh_uses_configured_timeout_concurrently() {
        let registry = Arc::new(ShardRegistry::new());
        for i in 0..5 {
            registry.register(
                format!("slow-{}", i),
                Arc::new(SlowHealthShard {
                    delay: Duration::from_secs(2),
                }),
                ShardCapabilities::default(),
            );
        }
        let config = RouterConfig {
            probe_timeout_ms: 40,
            ..RouterConfig::default()
        };
        let router = DynamicRouter::new(config, registry, ShardStateStore::shared());

        let started = Instant::now();
        let failures = router.refresh_load_estimates().await;
        let elapsed = started.elapsed();

        assert_eq!(failures, 5);
        // 串行探测至少需要 5 × 40ms
        assert!(elapsed < Duration::from_millis(150), "took {:?}", elapsed);
        assert_eq!(router.shard_state("slow-3").health, HealthStatus::Unhealthy);
    }

    #[tokio::test]
    async fn test_insights_report_problems() {
        let (router, _good, _bad) = setup();
        router.refresh_load_estimates().await;
        for _ in 0..20 {
            router.update_performance_from_result("good", 20.0, true, 0, 0.1);
        }

        let insights = router.insights();
        assert_eq!(insights.tracked_shards, 2);
        assert_eq!(insights.top_shards[0].0, "good");
        assert!(insights
            .problematic_shards
            .iter()
            .any(|p| p.shard_id == "bad" && p.reasons.contains(&"unhealthy".to_string())));
    }

    #[test]
    fn test_decay_prunes_old_samples() {
        let (router, _good, _bad) = setup();
        router.update_performance_from_result("good", 10.0, true, 0, 0.0);
        let far_future = now_ms() + 2 * 60 * 60 * 1000;
        assert_eq!(router.decay_stale_metrics(far_future), 1);
    }

    #[tokio::test]
    async fn test_maintenance_stops_on_cancel() {
        let (router, _good, _bad) = setup();
        let token = CancellationToken::new();
        let handles = router.spawn_maintenance(token.clone());
        token.cancel();
        for handle in handles {
            handle.await.unwrap();
        }
    }
}
