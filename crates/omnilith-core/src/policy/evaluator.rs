// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Omnilith Project

//! Policy Evaluator: runs a node's enabled, trigger-matched policies in
//! ascending priority order against a single observation, accumulating
//! effects and honoring suppression.

use alloc::string::{String, ToString};
use alloc::vec::Vec;

use serde::Serialize;

use crate::config::Config;
use crate::error::PrismError;
use crate::repository::CanonRepository;
use crate::types::{Effect, Observation, Policy};

use super::compiler::{run as run_compiled, PolicyCompiler};
use super::context::PolicyContextBuilder;

/// Outcome of a single policy's evaluation within a pass.
#[derive(Debug, Clone, Serialize)]
pub struct PolicyResult {
    pub policy_id: String,
    pub effects: Vec<Effect>,
    pub error: Option<String>,
    pub duration_ms: i64,
}

/// Outcome of evaluating every matching policy against one observation.
#[derive(Debug, Clone, Serialize)]
pub struct EvaluationOutcome {
    pub effects: Vec<Effect>,
    pub suppressed: bool,
    pub suppress_reason: Option<String>,
    pub suppressed_by_policy_id: Option<String>,
    pub policy_results: Vec<PolicyResult>,
    pub total_duration_ms: i64,
}

/// Drives compilation (via its own [`PolicyCompiler`] cache) and sequential
/// evaluation of a node's policies against a triggering observation.
pub struct PolicyEvaluator {
    compiler: PolicyCompiler,
}

impl Default for PolicyEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl PolicyEvaluator {
    pub fn new() -> Self {
        Self {
            compiler: PolicyCompiler::new(),
        }
    }

    /// Evaluate every enabled policy on `node_id` whose trigger matches
    /// `observation`'s type, in ascending priority order (ties by policy
    /// id, per [`CanonRepository::list_enabled_policies`]).
    ///
    /// Each policy is evaluated in isolation: an error compiling or running
    /// one policy discards only that policy's effects and is recorded in
    /// its [`PolicyResult`]; it never aborts the pass. A `suppress` effect
    /// short-circuits — no later policy in the pass runs — but effects
    /// already accumulated from earlier policies in the same pass are kept
    /// and still returned for dispatch.
    pub fn evaluate(
        &mut self,
        repository: &dyn CanonRepository,
        config: &Config,
        registry: &crate::registry::EffectRegistry,
        node_id: &str,
        observation: &Observation,
    ) -> EvaluationOutcome {
        let policies = repository.list_enabled_policies(node_id);
        let matching: Vec<Policy> = policies
            .into_iter()
            .filter(|p| p.matches_observation_type(&observation.observation_type))
            .collect();

        let context_builder = PolicyContextBuilder::new(repository, config);
        let mut accumulated: Vec<Effect> = Vec::new();
        let mut results: Vec<PolicyResult> = Vec::new();
        let mut suppressed = false;
        let mut suppress_reason = None;
        let mut suppressed_by_policy_id = None;
        let mut total_duration_ms: i64 = 0;

        for policy in &matching {
            let started = std::time::Instant::now();
            let outcome = self.evaluate_one(
                &context_builder,
                registry,
                config,
                policy,
                observation,
                &accumulated,
            );
            let elapsed = started.elapsed().as_millis() as i64;
            total_duration_ms += elapsed;

            match outcome {
                Ok(effects) => {
                    results.push(PolicyResult {
                        policy_id: policy.id.clone(),
                        effects: effects.clone(),
                        error: None,
                        duration_ms: elapsed,
                    });
                    for effect in effects {
                        if effect.is_suppress() {
                            suppressed = true;
                            suppress_reason = match &effect {
                                Effect::Suppress { reason } => Some(reason.clone()),
                                _ => None,
                            };
                            suppressed_by_policy_id = Some(policy.id.clone());
                            break;
                        }
                        accumulated.push(effect);
                    }
                }
                Err(err) => {
                    results.push(PolicyResult {
                        policy_id: policy.id.clone(),
                        effects: Vec::new(),
                        error: Some(err.to_string()),
                        duration_ms: elapsed,
                    });
                }
            }

            if suppressed {
                break;
            }
        }

        EvaluationOutcome {
            effects: accumulated,
            suppressed,
            suppress_reason,
            suppressed_by_policy_id,
            policy_results: results,
            total_duration_ms,
        }
    }

    fn evaluate_one(
        &mut self,
        context_builder: &PolicyContextBuilder<'_>,
        registry: &crate::registry::EffectRegistry,
        config: &Config,
        policy: &Policy,
        observation: &Observation,
        prior_effects: &[Effect],
    ) -> Result<Vec<Effect>, PrismError> {
        let compiled = self.compiler.compile(policy, registry)?;

        let prior_json: Vec<serde_json::Value> = prior_effects
            .iter()
            .map(|e| serde_json::to_value(e).unwrap_or(serde_json::Value::Null))
            .collect();
        let context = context_builder.build(&policy.node_id, Some(observation), &prior_json)?;

        let started = std::time::Instant::now();
        let budget = config.policy_timeout_ms;

        let effects = run_compiled(&compiled, context.to_json())?;

        let elapsed = started.elapsed().as_millis() as i64;
        if elapsed > budget {
            return Err(PrismError::Timeout {
                context: alloc::format!("policy {} evaluation", policy.id),
                elapsed_ms: elapsed,
                budget_ms: budget,
            });
        }

        for effect in &effects {
            if !registry.can_dispatch(effect) {
                return Err(PrismError::InvalidEffect {
                    policy_id: policy.id.clone(),
                    reason: alloc::format!("no handler registered for '{}'", effect.type_name()),
                });
            }
        }

        Ok(effects)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::EffectRegistry;
    use crate::repository::InMemoryCanonRepository;
    use crate::types::{new_id, Node, NodeKind, ObservationOrigin, Provenance, Trigger};
    use chrono::Utc;

    fn sample_node(repo: &mut InMemoryCanonRepository) -> String {
        let now = Utc::now();
        let node = Node {
            id: new_id(),
            kind: NodeKind::Subject,
            name: "test".into(),
            description: None,
            created_at: now,
            updated_at: now,
        };
        let id = node.id.clone();
        repo.create_node(node).unwrap();
        id
    }

    fn sample_observation(node_id: &str, observation_type: &str) -> Observation {
        Observation {
            id: new_id(),
            node_id: node_id.to_string(),
            observation_type: observation_type.to_string(),
            timestamp: Utc::now(),
            payload: serde_json::Value::Null,
            provenance: Provenance {
                source_id: None,
                origin: ObservationOrigin::Organic,
                method: "manual".into(),
            },
            tags: None,
        }
    }

    fn sample_policy(node_id: &str, priority: i64, trigger: &str, implementation: &str) -> Policy {
        let now = Utc::now();
        Policy {
            id: new_id(),
            node_id: node_id.to_string(),
            name: "p".into(),
            priority,
            enabled: true,
            triggers: alloc::vec![Trigger(trigger.to_string())],
            implementation: implementation.to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn evaluates_matching_policies_in_priority_order() {
        let mut repo = InMemoryCanonRepository::new();
        let node_id = sample_node(&mut repo);
        repo.create_policy(sample_policy(
            &node_id,
            1,
            "health.*",
            "(ctx) => [log(\"info\", \"second\")]",
        ))
        .unwrap();
        repo.create_policy(sample_policy(
            &node_id,
            0,
            "health.*",
            "(ctx) => [log(\"info\", \"first\")]",
        ))
        .unwrap();

        let observation = sample_observation(&node_id, "health.sleep");
        let config = Config::default();
        let registry = EffectRegistry::new();
        let mut evaluator = PolicyEvaluator::new();
        let outcome = evaluator.evaluate(&repo, &config, &registry, &node_id, &observation);

        assert_eq!(outcome.effects.len(), 2);
        match &outcome.effects[0] {
            Effect::Log { message, .. } => assert_eq!(message, "first"),
            _ => panic!("expected log effect"),
        }
    }

    #[test]
    fn suppress_short_circuits_remaining_policies() {
        let mut repo = InMemoryCanonRepository::new();
        let node_id = sample_node(&mut repo);
        repo.create_policy(sample_policy(
            &node_id,
            0,
            "health.*",
            "(ctx) => [suppress(\"noise\")]",
        ))
        .unwrap();
        repo.create_policy(sample_policy(
            &node_id,
            1,
            "health.*",
            "(ctx) => [log(\"info\", \"should not run\")]",
        ))
        .unwrap();

        let observation = sample_observation(&node_id, "health.sleep");
        let config = Config::default();
        let registry = EffectRegistry::new();
        let mut evaluator = PolicyEvaluator::new();
        let outcome = evaluator.evaluate(&repo, &config, &registry, &node_id, &observation);

        assert!(outcome.suppressed);
        assert_eq!(outcome.suppress_reason.as_deref(), Some("noise"));
        assert!(outcome.effects.is_empty());
        assert_eq!(outcome.policy_results.len(), 1);
    }

    #[test]
    fn effects_before_suppression_are_kept() {
        let mut repo = InMemoryCanonRepository::new();
        let node_id = sample_node(&mut repo);
        repo.create_policy(sample_policy(
            &node_id,
            1,
            "health.*",
            "(ctx) => [tag_observation([\"a\"])]",
        ))
        .unwrap();
        repo.create_policy(sample_policy(
            &node_id,
            2,
            "health.*",
            "(ctx) => [suppress(\"enough\")]",
        ))
        .unwrap();
        repo.create_policy(sample_policy(
            &node_id,
            3,
            "health.*",
            "(ctx) => [tag_observation([\"never\"])]",
        ))
        .unwrap();

        let observation = sample_observation(&node_id, "health.sleep");
        let config = Config::default();
        let registry = EffectRegistry::new();
        let mut evaluator = PolicyEvaluator::new();
        let outcome = evaluator.evaluate(&repo, &config, &registry, &node_id, &observation);

        assert!(outcome.suppressed);
        assert_eq!(outcome.suppressed_by_policy_id, Some(outcome.policy_results[1].policy_id.clone()));
        assert_eq!(outcome.effects.len(), 1);
        match &outcome.effects[0] {
            Effect::TagObservation { tags } => assert!(tags.contains("a")),
            other => panic!("expected tag effect, got {other:?}"),
        }
        assert_eq!(outcome.policy_results.len(), 2);
    }

    #[test]
    fn non_matching_trigger_is_skipped() {
        let mut repo = InMemoryCanonRepository::new();
        let node_id = sample_node(&mut repo);
        repo.create_policy(sample_policy(
            &node_id,
            0,
            "finance.*",
            "(ctx) => [log(\"info\", \"finance\")]",
        ))
        .unwrap();

        let observation = sample_observation(&node_id, "health.sleep");
        let config = Config::default();
        let registry = EffectRegistry::new();
        let mut evaluator = PolicyEvaluator::new();
        let outcome = evaluator.evaluate(&repo, &config, &registry, &node_id, &observation);

        assert!(outcome.effects.is_empty());
        assert!(outcome.policy_results.is_empty());
    }

    #[test]
    fn policy_error_is_isolated() {
        let mut repo = InMemoryCanonRepository::new();
        let node_id = sample_node(&mut repo);
        repo.create_policy(sample_policy(&node_id, 0, "health.*", "   ")).unwrap();
        repo.create_policy(sample_policy(
            &node_id,
            1,
            "health.*",
            "(ctx) => [log(\"info\", \"ok\")]",
        ))
        .unwrap();

        let observation = sample_observation(&node_id, "health.sleep");
        let config = Config::default();
        let registry = EffectRegistry::new();
        let mut evaluator = PolicyEvaluator::new();
        let outcome = evaluator.evaluate(&repo, &config, &registry, &node_id, &observation);

        assert_eq!(outcome.effects.len(), 1);
        assert_eq!(outcome.policy_results.len(), 2);
        assert!(outcome.policy_results[0].error.is_some());
    }
}
