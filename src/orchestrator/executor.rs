//! 分片执行器 (scatter-gather)
//!
//! 按阶段依赖顺序执行计划：
//! - 并行阶段：所有片段同时发出，全部结束 (成功或失败) 后阶段完成，单个失败不影响兄弟片段
//! - 串行阶段：逐个执行；关键片段 (主目标 / 凭证校验) 失败时，本阶段剩余片段被跳过，
//!   依赖该阶段的后续阶段也被跳过
//! - 每个片段都有超时；超时产生 `ShardFailure::Timeout`
//! - 取消：进行中的片段返回 `Cancelled`，尚未开始的阶段不再发出，已返回的结果保留

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::observability;
use crate::planner::{ExecutionPhase, ExecutionPlan, ShardQueryFragment};
use crate::shard::{ShardFailure, ShardRegistry, ShardResult};
use crate::Result;

/// 关键分片失败
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriticalFailure {
    pub phase_id: usize,
    pub shard_id: String,
    pub failure: ShardFailure,
}

/// 计划执行报告
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub execution_id: String,
    /// 按阶段顺序排列的片段结果 (并行阶段内顺序与计划一致)
    pub results: Vec<ShardResult>,
    pub phases_completed: usize,
    pub phases_skipped: usize,
    pub critical_failure: Option<CriticalFailure>,
    pub cancelled: bool,
    pub duration_ms: u64,
}

impl ExecutionReport {
    pub fn successful_count(&self) -> usize {
        self.results.iter().filter(|r| r.success).count()
    }

    pub fn failed_count(&self) -> usize {
        self.results.iter().filter(|r| !r.success).count()
    }

    /// 是否有分片成功返回
    pub fn has_data(&self) -> bool {
        self.results.iter().any(|r| r.success)
    }

    pub fn failed_shards(&self) -> Vec<String> {
        self.results
            .iter()
            .filter(|r| !r.success)
            .map(|r| r.shard_id.clone())
            .collect()
    }
}

/// 单个阶段的执行结果
struct PhaseOutcome {
    results: Vec<ShardResult>,
    critical: Option<CriticalFailure>,
}

/// 分片执行器
pub struct ShardExecutor {
    registry: Arc<ShardRegistry>,
}

impl ShardExecutor {
    pub fn new(registry: Arc<ShardRegistry>) -> Self {
        Self { registry }
    }

    /// 执行计划。计划依赖不合法时返回 `InvalidPlan`，分片失败记录在报告中
    pub async fn execute(
        &self,
        plan: &ExecutionPlan,
        token: &CancellationToken,
    ) -> Result<ExecutionReport> {
        plan.validate()?;

        let started = Instant::now();
        let mut results = Vec::with_capacity(plan.fragment_count());
        let mut aborted: HashSet<usize> = HashSet::new();
        let mut critical_failure = None;
        let mut phases_completed = 0;
        let mut phases_skipped = 0;

        for phase in &plan.phases {
            if token.is_cancelled() {
                break;
            }

            // 依赖的阶段被中止，本阶段不再发出
            if let Some(dep) = phase.depends_on.iter().find(|d| aborted.contains(d)) {
                let reason = format!("dependency phase {} aborted", dep);
                results.extend(skip_all(&phase.fragments, &reason));
                aborted.insert(phase.id);
                phases_skipped += 1;
                continue;
            }

            let outcome = if phase.parallelizable {
                self.run_parallel(phase, token).await
            } else {
                self.run_sequential(phase, token).await
            };
            results.extend(outcome.results);

            if let Some(failure) = outcome.critical {
                log::warn!(
                    "Execution {}: critical shard {} failed in phase {}: {}",
                    plan.execution_id,
                    failure.shard_id,
                    failure.phase_id,
                    failure.failure
                );
                aborted.insert(phase.id);
                critical_failure.get_or_insert(failure);
            }
            phases_completed += 1;
        }

        let cancelled = token.is_cancelled();
        let report = ExecutionReport {
            execution_id: plan.execution_id.clone(),
            results,
            phases_completed,
            phases_skipped,
            critical_failure,
            cancelled,
            duration_ms: started.elapsed().as_millis() as u64,
        };

        log::debug!(
            "Execution {} finished: {}/{} fragments succeeded, {} phases, cancelled={} in {}ms",
            report.execution_id,
            report.successful_count(),
            report.results.len(),
            report.phases_completed,
            report.cancelled,
            report.duration_ms
        );

        Ok(report)
    }

    async fn run_parallel(&self, phase: &ExecutionPhase, token: &CancellationToken) -> PhaseOutcome {
        let futures = phase
            .fragments
            .iter()
            .map(|fragment| self.run_fragment(fragment, token));
        PhaseOutcome {
            results: join_all(futures).await,
            critical: None,
        }
    }

    async fn run_sequential(
        &self,
        phase: &ExecutionPhase,
        token: &CancellationToken,
    ) -> PhaseOutcome {
        let mut results = Vec::with_capacity(phase.fragments.len());

        for (index, fragment) in phase.fragments.iter().enumerate() {
            if token.is_cancelled() {
                results.extend(
                    phase.fragments[index..]
                        .iter()
                        .map(|f| failed(f, ShardFailure::Cancelled)),
                );
                break;
            }

            let result = self.run_fragment(fragment, token).await;
            let critical = fragment.critical
                && result
                    .error
                    .as_ref()
                    .map_or(false, |e| e.counts_against_shard());

            if critical {
                let failure = result.error.clone().unwrap_or(ShardFailure::Other(
                    "critical fragment failed".to_string(),
                ));
                results.push(result);
                let reason = format!("critical shard {} failed", fragment.shard_id);
                results.extend(skip_all(&phase.fragments[index + 1..], &reason));
                return PhaseOutcome {
                    results,
                    critical: Some(CriticalFailure {
                        phase_id: phase.id,
                        shard_id: fragment.shard_id.clone(),
                        failure,
                    }),
                };
            }
            results.push(result);
        }

        PhaseOutcome {
            results,
            critical: None,
        }
    }

    /// 执行单个片段：超时与取消都转换为失败结果
    async fn run_fragment(
        &self,
        fragment: &ShardQueryFragment,
        token: &CancellationToken,
    ) -> ShardResult {
        let Some(handle) = self.registry.handle(&fragment.shard_id) else {
            return failed(
                fragment,
                ShardFailure::Unavailable(format!("shard {} is not registered", fragment.shard_id)),
            );
        };

        let started = Instant::now();
        let outcome = tokio::select! {
            biased;
            _ = token.cancelled() => Err(ShardFailure::Cancelled),
            res = tokio::time::timeout(fragment.timeout(), handle.query(&fragment.payload)) => {
                res.unwrap_or(Err(ShardFailure::Timeout))
            }
        };
        let elapsed = started.elapsed().as_millis() as u64;

        let result = match outcome {
            Ok(data) => ShardResult::success(&fragment.shard_id, data, elapsed),
            Err(failure) => {
                log::debug!(
                    "Fragment on shard {} failed after {}ms: {}",
                    fragment.shard_id,
                    elapsed,
                    failure
                );
                ShardResult::failure(&fragment.shard_id, failure, elapsed)
            }
        };

        if result
            .error
            .as_ref()
            .map_or(true, |e| e.counts_against_shard())
        {
            observability::record_fragment(&fragment.shard_id, elapsed, result.success);
        }

        result.with_temporal(fragment.temporal.clone())
    }
}

fn failed(fragment: &ShardQueryFragment, failure: ShardFailure) -> ShardResult {
    ShardResult::failure(&fragment.shard_id, failure, 0).with_temporal(fragment.temporal.clone())
}

fn skip_all(fragments: &[ShardQueryFragment], reason: &str) -> Vec<ShardResult> {
    fragments
        .iter()
        .map(|f| failed(f, ShardFailure::Skipped(reason.to_string())))
        .collect()
}

// ═══════════════════════════════════════════════════════════════════════════
// 测试
// ═══════════════════════════════════════════════════════════════════════════
