// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Omnilith Project

//! Runtime Loop: the top-level composition of ingestion, policy evaluation,
//! and effect execution.
//!
//! [`RuntimeLoop::process_observation`] wires the pipeline end to end:
//! ingest the incoming observation, evaluate the node's matching policies
//! against it in priority order, then execute each evaluated policy's
//! (non-suppress) effects in declaration order. Evaluation and execution
//! are sequential within one call — the core is single-threaded cooperative
//! per observation, by design; concurrency across observations is the
//! embedder's concern, not this loop's.

use alloc::string::String;
use alloc::vec::Vec;

use serde::Serialize;

use crate::config::Config;
use crate::effects::{EffectExecutor, ExecutionReport};
use crate::error::PrismResult;
use crate::ingestion::{self, IngestRequest};
use crate::policy::evaluator::PolicyEvaluator;
use crate::prism::Prism;
use crate::registry::EffectRegistry;
use crate::repository::CanonRepository;
use crate::types::{Effect, Observation};

/// Evaluation-phase summary of a [`RuntimeSummary`].
#[derive(Debug, Clone, Serialize)]
pub struct RuntimeEvaluationSummary {
    pub policies_evaluated: usize,
    pub total_effects: usize,
    pub suppressed: bool,
    pub suppress_reason: Option<String>,
    pub suppressed_by_policy_id: Option<String>,
}

/// One policy's effect-execution outcome within a [`RuntimeExecutionSummary`].
#[derive(Debug, Clone, Serialize)]
pub struct PerPolicyExecution {
    pub policy_id: String,
    pub report: ExecutionReport,
}

/// Execution-phase summary of a [`RuntimeSummary`].
#[derive(Debug, Clone, Serialize, Default)]
pub struct RuntimeExecutionSummary {
    pub total_executed: usize,
    pub success_count: usize,
    pub failure_count: usize,
    pub per_policy: Vec<PerPolicyExecution>,
}

/// Outcome of one [`RuntimeLoop::process_observation`] call.
#[derive(Debug, Clone, Serialize)]
pub struct RuntimeSummary {
    pub observation: Observation,
    pub evaluation: RuntimeEvaluationSummary,
    pub execution: RuntimeExecutionSummary,
    pub total_duration_ms: i64,
}

/// Options controlling one `process_observation` call.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessOptions {
    /// Skip effect execution entirely; evaluate policies and return their
    /// effects without dispatching any of them. Useful for dry runs.
    pub skip_execution: bool,
}

/// Drives one node's observation through ingest → evaluate → execute.
pub struct RuntimeLoop<'a> {
    registry: &'a EffectRegistry,
    prism: &'a Prism<'a>,
}

impl<'a> RuntimeLoop<'a> {
    pub fn new(registry: &'a EffectRegistry, prism: &'a Prism<'a>) -> Self {
        Self { registry, prism }
    }

    /// Ingest `request`, evaluate the target node's matching policies
    /// against the resulting observation, and (unless `opts.skip_execution`)
    /// execute each evaluated policy's non-suppress effects in declaration
    /// order.
    pub fn process_observation(
        &self,
        repository: &mut dyn CanonRepository,
        config: &Config,
        request: IngestRequest,
        opts: ProcessOptions,
    ) -> PrismResult<RuntimeSummary> {
        let started = std::time::Instant::now();

        let observation = ingestion::ingest(repository, request)?;
        let node_id = observation.node_id.clone();

        let mut evaluator = PolicyEvaluator::new();
        let outcome = evaluator.evaluate(repository, config, self.registry, &node_id, &observation);

        let evaluation = RuntimeEvaluationSummary {
            policies_evaluated: outcome.policy_results.len(),
            total_effects: outcome.effects.len(),
            suppressed: outcome.suppressed,
            suppress_reason: outcome.suppress_reason.clone(),
            suppressed_by_policy_id: outcome.suppressed_by_policy_id.clone(),
        };

        let mut execution = RuntimeExecutionSummary::default();
        if !opts.skip_execution {
            let executor = EffectExecutor::new(self.registry, self.prism);
            for policy_result in &outcome.policy_results {
                let dispatchable: Vec<Effect> = policy_result
                    .effects
                    .iter()
                    .filter(|e| !e.is_suppress())
                    .cloned()
                    .collect();
                if dispatchable.is_empty() {
                    continue;
                }
                let report = executor.execute(repository, &node_id, &observation, &policy_result.policy_id, &dispatchable);
                execution.total_executed += report.outcomes.len();
                execution.success_count += report.outcomes.iter().filter(|o| o.success).count();
                execution.failure_count += report.outcomes.iter().filter(|o| !o.success).count();
                execution.per_policy.push(PerPolicyExecution {
                    policy_id: policy_result.policy_id.clone(),
                    report,
                });
            }
        }

        Ok(RuntimeSummary {
            observation,
            evaluation,
            execution,
            total_duration_ms: started.elapsed().as_millis() as i64,
        })
    }
}

/// Async mirror of [`RuntimeLoop`], guarded behind the `async` feature.
/// Wraps the repository in a Tokio `RwLock` so policy evaluation and effect
/// execution for independent nodes can run from multiple tasks, and
/// enforces the per-policy and per-action wall-clock budgets via
/// `tokio::time::timeout` rather than the sync loop's `Instant`-based
/// after-the-fact check.
#[cfg(feature = "async")]
pub mod r#async {
    use std::sync::Arc;
    use std::time::Duration;

    use alloc::vec::Vec;

    use tokio::sync::RwLock;

    use crate::config::Config;
    use crate::effects::EffectExecutor;
    use crate::error::{PrismError, PrismResult};
    use crate::ingestion::{self, IngestRequest};
    use crate::policy::evaluator::PolicyEvaluator;
    use crate::prism::Prism;
    use crate::registry::{ActionRegistry, EffectRegistry};
    use crate::repository::CanonRepository;
    use crate::types::Effect;

    use super::{PerPolicyExecution, ProcessOptions, RuntimeEvaluationSummary, RuntimeExecutionSummary, RuntimeSummary};

    /// Async runtime loop. Holds the same collaborators as [`super::RuntimeLoop`]
    /// plus an owned, lock-guarded repository so it can be shared across
    /// concurrently-processed nodes.
    pub struct AsyncRuntimeLoop<R: CanonRepository> {
        repository: Arc<RwLock<R>>,
        registry: Arc<EffectRegistry>,
        action_registry: Arc<ActionRegistry>,
        config: Arc<Config>,
    }

    impl<R: CanonRepository> AsyncRuntimeLoop<R> {
        pub fn new(repository: R, registry: EffectRegistry, action_registry: ActionRegistry, config: Config) -> Self {
            Self {
                repository: Arc::new(RwLock::new(repository)),
                registry: Arc::new(registry),
                action_registry: Arc::new(action_registry),
                config: Arc::new(config),
            }
        }

        /// Process one observation, enforcing `config.policy_timeout_ms`
        /// across the whole evaluation pass via `tokio::time::timeout`
        /// rather than per-policy (the sync evaluator already checks each
        /// policy's own budget after the fact; this adds a hard ceiling a
        /// cooperative but slow evaluator can still be cancelled against).
        pub async fn process_observation(
            &self,
            request: IngestRequest,
            opts: ProcessOptions,
        ) -> PrismResult<RuntimeSummary> {
            let mut repository = self.repository.write().await;
            let prism = Prism::new(&self.action_registry, &self.config);
            let loop_budget = Duration::from_millis(self.config.policy_timeout_ms.max(1) as u64 * 16);

            let fut = async {
                let observation = ingestion::ingest(&mut *repository, request)?;
                let node_id = observation.node_id.clone();

                let mut evaluator = PolicyEvaluator::new();
                let outcome = evaluator.evaluate(&*repository, &self.config, &self.registry, &node_id, &observation);

                let evaluation = RuntimeEvaluationSummary {
                    policies_evaluated: outcome.policy_results.len(),
                    total_effects: outcome.effects.len(),
                    suppressed: outcome.suppressed,
                    suppress_reason: outcome.suppress_reason.clone(),
                    suppressed_by_policy_id: outcome.suppressed_by_policy_id.clone(),
                };

                let mut execution = RuntimeExecutionSummary::default();
                if !opts.skip_execution {
                    let executor = EffectExecutor::new(&self.registry, &prism);
                    for policy_result in &outcome.policy_results {
                        let dispatchable: Vec<Effect> = policy_result
                            .effects
                            .iter()
                            .filter(|e| !e.is_suppress())
                            .cloned()
                            .collect();
                        if dispatchable.is_empty() {
                            continue;
                        }
                        let report = executor.execute(&mut *repository, &node_id, &observation, &policy_result.policy_id, &dispatchable);
                        execution.total_executed += report.outcomes.len();
                        execution.success_count += report.outcomes.iter().filter(|o| o.success).count();
                        execution.failure_count += report.outcomes.iter().filter(|o| !o.success).count();
                        execution.per_policy.push(PerPolicyExecution {
                            policy_id: policy_result.policy_id.clone(),
                            report,
                        });
                    }
                }

                Ok::<_, PrismError>((observation, evaluation, execution))
            };

            let started = std::time::Instant::now();
            let (observation, evaluation, execution) = tokio::time::timeout(loop_budget, fut)
                .await
                .map_err(|_| PrismError::Timeout {
                    context: "runtime loop".into(),
                    elapsed_ms: loop_budget.as_millis() as i64,
                    budget_ms: loop_budget.as_millis() as i64,
                })??;

            Ok(RuntimeSummary {
                observation,
                evaluation,
                execution,
                total_duration_ms: started.elapsed().as_millis() as i64,
            })
        }
    }
}
