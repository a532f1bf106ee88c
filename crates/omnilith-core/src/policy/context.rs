// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Omnilith Project

//! Policy Context Builder: assembles the read-only snapshot a policy
//! evaluates against. Context assembly pre-fetches the node, its edges,
//! grants, variables, active episodes, and a capped recent-observation
//! window; anything a policy asks for beyond that pre-fetch goes through
//! [`CanonAccessor`], which applies the same caps on demand.

use alloc::string::{String, ToString};
use alloc::vec::Vec;

use chrono::{DateTime, Utc};
use hashbrown::HashMap;
use serde::Serialize;
use serde_json::Value as Json;

use crate::config::Config;
use crate::error::PrismResult;
use crate::repository::CanonRepository;
use crate::types::{
    Artifact, Edge, Entity, Episode, Grant, Node, Observation, ObservationFilter, Variable,
    VariableEstimate,
};

/// On-demand read access a policy's implementation can reach for beyond the
/// pre-fetched snapshot, bounded by the same caps the context builder uses.
pub trait CanonAccessor {
    fn get_artifact(&self, id: &str) -> Option<Artifact>;
    fn get_entity(&self, id: &str) -> Option<Entity>;
    fn get_variable(&self, id: &str) -> Option<Variable>;
    fn get_active_episodes(&self, node_id: &str) -> Vec<Episode>;
    /// `limit` is clamped to `min(limit.unwrap_or(100), 1000)`; a query with
    /// neither `since`/`until` nor an explicit window gets the default
    /// 24-hour window.
    fn query_observations(&self, filter: ObservationFilter) -> Vec<Observation>;
}

/// Read-only handle into a [`CanonRepository`], used both to assemble a
/// [`PolicyContext`] and as the concrete [`CanonAccessor`] a compiled policy
/// sees.
pub struct RepositoryAccessor<'a> {
    repository: &'a dyn CanonRepository,
    config: &'a Config,
    now: DateTime<Utc>,
}

impl<'a> RepositoryAccessor<'a> {
    pub fn new(repository: &'a dyn CanonRepository, config: &'a Config, now: DateTime<Utc>) -> Self {
        Self {
            repository,
            config,
            now,
        }
    }
}

impl<'a> CanonAccessor for RepositoryAccessor<'a> {
    fn get_artifact(&self, id: &str) -> Option<Artifact> {
        self.repository.get_artifact(id)
    }

    fn get_entity(&self, id: &str) -> Option<Entity> {
        self.repository.get_entity(id)
    }

    fn get_variable(&self, id: &str) -> Option<Variable> {
        self.repository.get_variable(id)
    }

    fn get_active_episodes(&self, node_id: &str) -> Vec<Episode> {
        self.repository.list_active_episodes(node_id)
    }

    fn query_observations(&self, mut filter: ObservationFilter) -> Vec<Observation> {
        let cap = self.config.observation_query_hard_cap;
        let requested = filter.limit.unwrap_or(100);
        filter.limit = Some(requested.min(cap));
        if filter.since.is_none() && filter.until.is_none() {
            filter.since = Some(
                self.now - chrono::Duration::hours(self.config.default_query_window_hours),
            );
            filter.until = Some(self.now);
        }
        self.repository.query_observations(&filter)
    }
}

/// Read-only snapshot handed to a compiled policy's evaluation. Serializes
/// to the `ctx` object the policy's expression binds its parameter to.
#[derive(Debug, Clone, Serialize)]
pub struct PolicyContext {
    pub node: Node,
    pub edges: Vec<Edge>,
    pub grants: Vec<Grant>,
    pub variables: Vec<Variable>,
    pub variable_estimates: HashMap<String, Option<VariableEstimate>>,
    pub active_episodes: Vec<Episode>,
    pub recent_observations: Vec<Observation>,
    pub observation: Option<Observation>,
    pub prior_effects: Json,
    pub now: DateTime<Utc>,
}

impl PolicyContext {
    /// Serialize to the `Json` value a compiled policy's interpreter binds
    /// its parameter to.
    pub fn to_json(&self) -> Json {
        serde_json::to_value(self).unwrap_or(Json::Null)
    }
}

/// Builds a [`PolicyContext`] for a single triggering observation.
pub struct PolicyContextBuilder<'a> {
    repository: &'a dyn CanonRepository,
    config: &'a Config,
}

impl<'a> PolicyContextBuilder<'a> {
    pub fn new(repository: &'a dyn CanonRepository, config: &'a Config) -> Self {
        Self { repository, config }
    }

    /// Assemble context for `node_id`, triggered by `observation` (absent
    /// when building context outside the observation loop, e.g. for a
    /// scheduled policy). `prior_effects` accumulates effects emitted by
    /// higher-priority policies evaluated earlier in the same pass.
    pub fn build(
        &self,
        node_id: &str,
        observation: Option<&Observation>,
        prior_effects: &[Json],
    ) -> PrismResult<PolicyContext> {
        let node = self
            .repository
            .get_node(node_id)
            .ok_or_else(|| crate::error::PrismError::not_found("node", node_id.to_string()))?;

        let now = Utc::now();
        let edges = self.repository.list_edges_for_node(node_id);
        let grants = self
            .repository
            .list_grants_for_grantee(node_id)
            .into_iter()
            .filter(|g| g.is_active(now))
            .collect::<Vec<_>>();
        let active_episodes = self.repository.list_active_episodes(node_id);

        let variables: Vec<Variable> = self.repository.list_variables_for_node(node_id);
        let variable_estimates: HashMap<String, Option<VariableEstimate>> = variables
            .iter()
            .map(|v| (v.id.clone(), estimate_variable(v, self.repository)))
            .collect();

        let window_start = now
            - chrono::Duration::hours(self.config.context_recent_observation_window_hours);
        let recent_observations = self.repository.query_observations(&ObservationFilter {
            node_id: Some(node_id.to_string()),
            since: Some(window_start),
            until: Some(now),
            limit: Some(self.config.context_recent_observation_cap),
            ..Default::default()
        });

        Ok(PolicyContext {
            node,
            edges,
            grants,
            variables,
            variable_estimates,
            active_episodes,
            recent_observations,
            observation: observation.cloned(),
            prior_effects: Json::Array(prior_effects.to_vec()),
            now,
        })
    }
}

/// Compute a variable's current estimate from its compute specs, or `None`
/// when there isn't enough data yet. Estimation here is intentionally
/// shallow — it reads the relevant observation window and applies the
/// declared method, with no external statistics collaborator.
fn estimate_variable(variable: &Variable, repository: &dyn CanonRepository) -> Option<VariableEstimate> {
    use crate::types::ComputeSpec;

    let now = Utc::now();
    for spec in &variable.compute_specs {
        match spec {
            ComputeSpec::Latest {
                observation_type,
                field,
            } => {
                let filter = ObservationFilter {
                    observation_type: Some(observation_type.clone()),
                    limit: Some(1),
                    ..Default::default()
                };
                let mut results = repository.query_observations(&filter);
                if let Some(observation) = results.pop() {
                    if let Some(value) = observation.payload.get(field) {
                        return Some(VariableEstimate {
                            value: value.clone(),
                            confidence: 1.0,
                            derived_at: now,
                        });
                    }
                }
            }
            ComputeSpec::MovingAverage {
                observation_type,
                field,
                window_count,
            } => {
                let filter = ObservationFilter {
                    observation_type: Some(observation_type.clone()),
                    limit: Some(*window_count),
                    ..Default::default()
                };
                let results = repository.query_observations(&filter);
                let values: Vec<f64> = results
                    .iter()
                    .filter_map(|o| o.payload.get(field).and_then(Json::as_f64))
                    .collect();
                if !values.is_empty() {
                    let sum: f64 = values.iter().sum();
                    let average = sum / values.len() as f64;
                    let confidence = (values.len() as f64 / *window_count as f64).min(1.0);
                    return Some(VariableEstimate {
                        value: serde_json::json!(average),
                        confidence,
                        derived_at: now,
                    });
                }
            }
            ComputeSpec::Count {
                observation_type,
                window_hours,
            } => {
                let filter = ObservationFilter {
                    observation_type: Some(observation_type.clone()),
                    since: Some(now - chrono::Duration::hours(*window_hours)),
                    until: Some(now),
                    ..Default::default()
                };
                let results = repository.query_observations(&filter);
                return Some(VariableEstimate {
                    value: serde_json::json!(results.len() as f64),
                    confidence: 1.0,
                    derived_at: now,
                });
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::InMemoryCanonRepository;
    use crate::types::{new_id, NodeKind, ObservationOrigin, Provenance};

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

    #[test]
    fn build_includes_recent_observations_within_window() {
        let mut repo = InMemoryCanonRepository::new();
        let node_id = sample_node(&mut repo);
        let now = Utc::now();
        repo.append_observation(Observation {
            id: new_id(),
            node_id: node_id.clone(),
            observation_type: "health.sleep".into(),
            timestamp: now,
            payload: Json::Null,
            provenance: Provenance {
                source_id: None,
                origin: ObservationOrigin::Organic,
                method: "manual".into(),
            },
            tags: None,
        })
        .unwrap();

        let config = Config::default();
        let builder = PolicyContextBuilder::new(&repo, &config);
        let ctx = builder.build(&node_id, None, &[]).unwrap();
        assert_eq!(ctx.recent_observations.len(), 1);
    }

    #[test]
    fn build_fails_for_unknown_node() {
        let repo = InMemoryCanonRepository::new();
        let config = Config::default();
        let builder = PolicyContextBuilder::new(&repo, &config);
        assert!(builder.build("missing", None, &[]).is_err());
    }

    #[test]
    fn accessor_clamps_limit_to_hard_cap() {
        let repo = InMemoryCanonRepository::new();
        let mut config = Config::default();
        config.observation_query_hard_cap = 5;
        let accessor = RepositoryAccessor::new(&repo, &config, Utc::now());
        let filter = ObservationFilter {
            limit: Some(1000),
            ..Default::default()
        };
        // Nothing to return, but this exercises the clamp path without panicking.
        assert!(accessor.query_observations(filter).is_empty());
    }

    #[test]
    fn variable_estimate_none_without_data() {
        let repo = InMemoryCanonRepository::new();
        let variable = Variable {
            id: new_id(),
            node_id: "n1".into(),
            name: "resting_hr".into(),
            kind: crate::types::VariableKind::Continuous,
            unit: Some("bpm".into()),
            viable_range: None,
            preferred_range: None,
            compute_specs: alloc::vec![crate::types::ComputeSpec::Latest {
                observation_type: "health.hr".into(),
                field: "bpm".into(),
            }],
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert!(estimate_variable(&variable, &repo).is_none());
    }
}
