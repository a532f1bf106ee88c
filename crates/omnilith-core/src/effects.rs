// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Omnilith Project

//! Effect Executor: dispatches the effects a policy evaluation produced, in
//! declaration order, against the Canon Repository and the Effect Registry.
//!
//! Built-in effects that mutate canon (`tag_observation`, `route_observation`,
//! `create_entity_event`, `propose_action`) are routed through the Prism
//! commit boundary, acting as the node that owns the triggering policy, so
//! each still produces exactly one audit entry. `log` never touches canon
//! and is handled directly. `suppress` carries no handler — the evaluator
//! already stripped it out of any effect list that reaches the executor.
//! `pack:<pack>:<name>` extension effects dispatch through the
//! [`EffectRegistry`] directly, outside the commit boundary: an extension's
//! own handler is responsible for whatever canon access it needs.
//!
//! `continueOnError` defaults to `true`: one effect failing does not stop
//! its siblings from running. Each effect's outcome is recorded on the
//! returned [`ExecutionReport`].

use alloc::string::{String, ToString};
use alloc::vec::Vec;

use serde::Serialize;

use crate::error::PrismError;
use crate::prism::{ActorInput, Operation, OperationPayload, Prism};
use crate::registry::{EffectRegistry, HandlerContext};
use crate::repository::CanonRepository;
use crate::types::{ActorMethod, CausedBy, Effect, Observation};

/// Per-effect outcome, recorded in declaration order.
#[derive(Debug, Clone, Serialize)]
pub struct EffectOutcome {
    pub effect_type: String,
    pub success: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct ExecutionReport {
    pub outcomes: Vec<EffectOutcome>,
}

impl ExecutionReport {
    pub fn all_succeeded(&self) -> bool {
        self.outcomes.iter().all(|o| o.success)
    }
}

/// Dispatches a policy evaluation's effects against a repository.
pub struct EffectExecutor<'a> {
    registry: &'a EffectRegistry,
    prism: &'a Prism<'a>,
}

impl<'a> EffectExecutor<'a> {
    pub fn new(registry: &'a EffectRegistry, prism: &'a Prism<'a>) -> Self {
        Self { registry, prism }
    }

    /// Run `effects` in order against `repository`, scoped to the node and
    /// observation that produced them, continuing past individual effect
    /// failures.
    pub fn execute(
        &self,
        repository: &mut dyn CanonRepository,
        node_id: &str,
        observation: &Observation,
        policy_id: &str,
        effects: &[Effect],
    ) -> ExecutionReport {
        let handler_ctx = HandlerContext {
            node_id,
            action_run_id: None,
            observation_id: Some(observation.id.as_str()),
        };

        let mut report = ExecutionReport::default();
        for effect in effects {
            let type_name = effect.type_name();
            let result = self.dispatch_one(repository, &handler_ctx, observation, policy_id, effect);
            report.outcomes.push(EffectOutcome {
                effect_type: type_name,
                success: result.is_ok(),
                error: result.err().map(|e| e.to_string()),
            });
        }
        report
    }

    fn dispatch_one(
        &self,
        repository: &mut dyn CanonRepository,
        handler_ctx: &HandlerContext<'_>,
        observation: &Observation,
        policy_id: &str,
        effect: &Effect,
    ) -> Result<(), PrismError> {
        match effect {
            Effect::Log { level, message } => {
                match level {
                    crate::types::LogLevel::Trace => tracing::trace!(node_id = handler_ctx.node_id, %message),
                    crate::types::LogLevel::Debug => tracing::debug!(node_id = handler_ctx.node_id, %message),
                    crate::types::LogLevel::Info => tracing::info!(node_id = handler_ctx.node_id, %message),
                    crate::types::LogLevel::Warn => tracing::warn!(node_id = handler_ctx.node_id, %message),
                    crate::types::LogLevel::Error => tracing::error!(node_id = handler_ctx.node_id, %message),
                }
                Ok(())
            }
            Effect::TagObservation { tags } => self.via_prism(
                repository,
                effect,
                handler_ctx,
                observation,
                policy_id,
                OperationPayload::UpdateObservationTags {
                    observation_id: observation.id.clone(),
                    tags: tags.clone(),
                },
            ),
            Effect::RouteObservation { to_node_id } => self.via_prism(
                repository,
                effect,
                handler_ctx,
                observation,
                policy_id,
                OperationPayload::RouteObservation {
                    observation_id: observation.id.clone(),
                    to_node_id: to_node_id.clone(),
                },
            ),
            Effect::Suppress { .. } => Ok(()),
            Effect::ProposeAction { action, .. } => self.via_prism(
                repository,
                effect,
                handler_ctx,
                observation,
                policy_id,
                OperationPayload::CreateActionRun {
                    node_id: handler_ctx.node_id.to_string(),
                    proposed_by: crate::types::ProposedBy {
                        policy_id: Some(policy_id.to_string()),
                        observation_id: Some(observation.id.clone()),
                    },
                    action: action.clone(),
                },
            ),
            Effect::CreateEntityEvent { entity_id, event } => self.via_prism(
                repository,
                effect,
                handler_ctx,
                observation,
                policy_id,
                OperationPayload::AppendEntityEvent {
                    entity_id: entity_id.clone(),
                    event: event.clone(),
                },
            ),
            Effect::Extension { pack, name, payload } => {
                let type_name = alloc::format!("pack:{pack}:{name}");
                let handler = self.registry.get(&type_name).ok_or_else(|| PrismError::EffectExecution {
                    effect_type: type_name.clone(),
                    reason: "no handler registered".into(),
                })?;
                handler(payload, handler_ctx).map_err(|e| PrismError::EffectExecution {
                    effect_type: type_name,
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Route a canon-mutating effect through the Prism commit boundary,
    /// acting as the node the triggering policy belongs to.
    fn via_prism(
        &self,
        repository: &mut dyn CanonRepository,
        effect: &Effect,
        handler_ctx: &HandlerContext<'_>,
        observation: &Observation,
        policy_id: &str,
        payload: OperationPayload,
    ) -> Result<(), PrismError> {
        let operation = Operation {
            actor: ActorInput {
                node_id: handler_ctx.node_id.to_string(),
                method: ActorMethod::Auto,
            },
            caused_by: Some(CausedBy {
                observation_id: Some(observation.id.clone()),
                policy_id: Some(policy_id.to_string()),
                action_run_id: None,
                batch_id: None,
            }),
            payload,
        };
        let result = self.prism.execute(repository, operation);
        if result.success {
            Ok(())
        } else {
            Err(PrismError::EffectExecution {
                effect_type: effect.type_name(),
                reason: result.error.unwrap_or_else(|| "effect mutation failed".into()),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::registry::ActionRegistry;
    use crate::repository::InMemoryCanonRepository;
    use crate::types::{new_id as mk_id, Node, NodeKind, ObservationOrigin as Origin, Provenance};
    use chrono::Utc;

    fn sample_node_and_observation(repo: &mut InMemoryCanonRepository) -> Observation {
        let now = Utc::now();
        let node = Node {
            id: mk_id(),
            kind: NodeKind::Subject,
            name: "test".into(),
            description: None,
            created_at: now,
            updated_at: now,
        };
        let node_id = node.id.clone();
        repo.create_node(node).unwrap();
        let observation = Observation {
            id: mk_id(),
            node_id,
            observation_type: "health.sleep".into(),
            timestamp: now,
            payload: serde_json::Value::Null,
            provenance: Provenance {
                source_id: None,
                origin: Origin::Organic,
                method: "manual".into(),
            },
            tags: None,
        };
        repo.append_observation(observation.clone()).unwrap();
        observation
    }

    #[test]
    fn tag_observation_persists_tags() {
        let mut repo = InMemoryCanonRepository::new();
        let observation = sample_node_and_observation(&mut repo);
        let config = Config::default();
        let registry = EffectRegistry::new();
        let action_registry = ActionRegistry::new();
        let prism = Prism::new(&action_registry, &config);
        let executor = EffectExecutor::new(&registry, &prism);

        let effects = alloc::vec![Effect::TagObservation {
            tags: alloc::collections::BTreeSet::from(["noteworthy".to_string()]),
        }];
        let report = executor.execute(&mut repo, &observation.node_id, &observation, "p1", &effects);
        assert!(report.all_succeeded());
        let stored = repo.get_observation(&observation.id).unwrap();
        assert!(stored.tags.unwrap().contains("noteworthy"));
    }

    #[test]
    fn route_observation_copies_with_fresh_id() {
        let mut repo = InMemoryCanonRepository::new();
        let observation = sample_node_and_observation(&mut repo);
        let now = Utc::now();
        repo.create_node(Node {
            id: "other".into(),
            kind: NodeKind::Subject,
            name: "other".into(),
            description: None,
            created_at: now,
            updated_at: now,
        })
        .unwrap();

        let config = Config::default();
        let registry = EffectRegistry::new();
        let action_registry = ActionRegistry::new();
        let prism = Prism::new(&action_registry, &config);
        let executor = EffectExecutor::new(&registry, &prism);
        let effects = alloc::vec![Effect::RouteObservation {
            to_node_id: "other".into(),
        }];
        executor.execute(&mut repo, &observation.node_id, &observation, "p1", &effects);

        let routed = repo.query_observations(&crate::types::ObservationFilter {
            node_id: Some("other".into()),
            ..Default::default()
        });
        assert_eq!(routed.len(), 1);
        assert_ne!(routed[0].id, observation.id);
    }

    #[test]
    fn propose_action_creates_pending_run() {
        let mut repo = InMemoryCanonRepository::new();
        let observation = sample_node_and_observation(&mut repo);
        let config = Config::default();
        let registry = EffectRegistry::new();
        let action_registry = ActionRegistry::new();
        let prism = Prism::new(&action_registry, &config);
        let executor = EffectExecutor::new(&registry, &prism);

        let effects = alloc::vec![Effect::ProposeAction {
            action: crate::types::ActionIntent {
                action_type: "send_email".into(),
                params: serde_json::Value::Null,
            },
            reason: None,
        }];
        let report = executor.execute(&mut repo, &observation.node_id, &observation, "p1", &effects);
        assert!(report.all_succeeded());
    }

    #[test]
    fn unregistered_extension_effect_fails_and_is_recorded() {
        let mut repo = InMemoryCanonRepository::new();
        let observation = sample_node_and_observation(&mut repo);
        let config = Config::default();
        let registry = EffectRegistry::new();
        let action_registry = ActionRegistry::new();
        let prism = Prism::new(&action_registry, &config);
        let executor = EffectExecutor::new(&registry, &prism);

        let effects = alloc::vec![Effect::Extension {
            pack: "fitness".into(),
            name: "recalc".into(),
            payload: serde_json::Value::Null,
        }];
        let report = executor.execute(&mut repo, &observation.node_id, &observation, "p1", &effects);
        assert!(!report.all_succeeded());
        assert_eq!(report.outcomes[0].effect_type, "pack:fitness:recalc");
    }
}
