// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Omnilith Project

//! Prism Commit Boundary: the sole transactional, audited mutator of canon.
//!
//! Every [`Operation`] passes through the same pipeline: metadata
//! extraction, actor resolution, structural validation, authorization,
//! transactional dispatch, and audit. Exactly one [`AuditEntry`] is
//! produced per invocation, win or lose — on success it is appended inside
//! the same transaction as the mutation; on failure it is appended outside
//! so the failure record survives rollback.
//!
//! Two operations outside §4.8's written enumeration are included here:
//! `CreateActionRun` (the `propose_action` effect's creation step, needed
//! so a proposal gets its own audit entry alongside approve/reject/execute)
//! and `UpdateObservationTags`/`RouteObservation` (the `tag_observation` and
//! `route_observation` effects' canon mutations). The enumeration text names
//! only the operator-facing surface; these effect-triggered mutations still
//! pass through Prism for the same audit totality guarantee.

use alloc::string::{String, ToString};
use alloc::vec::Vec;

use chrono::Utc;
use serde_json::{Map, Value as Json};

use crate::actions;
use crate::config::Config;
use crate::error::{PrismError, PrismResult};
use crate::registry::ActionRegistry;
use crate::repository::CanonRepository;
use crate::types::{
    new_id, Actor, ActorMethod, ArtifactSnapshot, ArtifactStatus, AuditDetails, AuditEntry,
    CausedBy, Edge, Entity, EntityEvent, Episode, EpisodeStatus, Grant, Node, NodeKind, Policy,
    ProposedBy, ActionIntent, Revocation, ResourceType, Scope, Surface, SurfaceStatus, Variable,
};

/// Who is asking, and by what method. Sponsor is resolved internally when
/// the actor is an agent — callers need not supply it.
#[derive(Debug, Clone)]
pub struct ActorInput {
    pub node_id: String,
    pub method: ActorMethod,
}

#[derive(Debug, Clone)]
pub struct Operation {
    pub actor: ActorInput,
    pub caused_by: Option<CausedBy>,
    pub payload: OperationPayload,
}

#[derive(Debug, Clone)]
pub enum OperationPayload {
    CreateNode(Node),
    UpdateNode(Node),
    AddEdge(Edge),
    RemoveEdge { id: String, from_node_id: String },
    SetAgentDelegation(crate::types::AgentDelegation),

    CreateArtifact(crate::types::Artifact),
    UpdateArtifact {
        artifact_id: String,
        snapshot: ArtifactSnapshot,
        message: Option<String>,
    },
    UpdateArtifactStatus {
        artifact_id: String,
        status: ArtifactStatus,
    },
    DeleteArtifact {
        artifact_id: String,
    },

    CreateEpisode(Episode),
    UpdateEpisode(Episode),
    UpdateEpisodeStatus {
        episode_id: String,
        status: EpisodeStatus,
    },
    DeleteEpisode {
        episode_id: String,
    },

    CreateVariable(Variable),
    UpdateVariable(Variable),
    DeleteVariable {
        variable_id: String,
    },

    CreateSurface(Surface),
    UpdateSurface(Surface),
    UpdateSurfaceStatus {
        surface_id: String,
        status: SurfaceStatus,
    },
    DeleteSurface {
        surface_id: String,
    },

    CreatePolicy(Policy),
    UpdatePolicy(Policy),
    UpdatePolicyStatus {
        policy_id: String,
        enabled: bool,
    },
    DeletePolicy {
        policy_id: String,
    },

    CreateEntity(Entity),
    AppendEntityEvent {
        entity_id: String,
        event: EntityEvent,
    },

    CreateGrant(Grant),
    RevokeGrant {
        grant_id: String,
        reason: Option<String>,
    },

    CreateActionRun {
        node_id: String,
        proposed_by: ProposedBy,
        action: ActionIntent,
    },
    ApproveActionRun {
        action_run_id: String,
    },
    RejectActionRun {
        action_run_id: String,
        reason: Option<String>,
    },
    ExecuteActionRun {
        action_run_id: String,
    },

    UpdateObservationTags {
        observation_id: String,
        tags: alloc::collections::BTreeSet<String>,
    },
    RouteObservation {
        observation_id: String,
        to_node_id: String,
    },
}

impl OperationPayload {
    fn operation_type(&self) -> &'static str {
        use OperationPayload::*;
        match self {
            CreateNode(_) => "create_node",
            UpdateNode(_) => "update_node",
            AddEdge(_) => "add_edge",
            RemoveEdge { .. } => "remove_edge",
            SetAgentDelegation(_) => "set_agent_delegation",
            CreateArtifact(_) => "create_artifact",
            UpdateArtifact { .. } => "update_artifact",
            UpdateArtifactStatus { .. } => "update_artifact_status",
            DeleteArtifact { .. } => "delete_artifact",
            CreateEpisode(_) => "create_episode",
            UpdateEpisode(_) => "update_episode",
            UpdateEpisodeStatus { .. } => "update_episode_status",
            DeleteEpisode { .. } => "delete_episode",
            CreateVariable(_) => "create_variable",
            UpdateVariable(_) => "update_variable",
            DeleteVariable { .. } => "delete_variable",
            CreateSurface(_) => "create_surface",
            UpdateSurface(_) => "update_surface",
            UpdateSurfaceStatus { .. } => "update_surface_status",
            DeleteSurface { .. } => "delete_surface",
            CreatePolicy(_) => "create_policy",
            UpdatePolicy(_) => "update_policy",
            UpdatePolicyStatus { .. } => "update_policy_status",
            DeletePolicy { .. } => "delete_policy",
            CreateEntity(_) => "create_entity",
            AppendEntityEvent { .. } => "append_entity_event",
            CreateGrant(_) => "create_grant",
            RevokeGrant { .. } => "revoke_grant",
            CreateActionRun { .. } => "create_action_run",
            ApproveActionRun { .. } => "approve_action_run",
            RejectActionRun { .. } => "reject_action_run",
            ExecuteActionRun { .. } => "execute_action_run",
            UpdateObservationTags { .. } => "update_observation_tags",
            RouteObservation { .. } => "route_observation",
        }
    }

    fn resource_type(&self) -> &'static str {
        use OperationPayload::*;
        match self {
            CreateNode(_) | UpdateNode(_) => "node",
            AddEdge(_) | RemoveEdge { .. } => "edge",
            SetAgentDelegation(_) => "agent_delegation",
            CreateArtifact(_) | UpdateArtifact { .. } | UpdateArtifactStatus { .. } | DeleteArtifact { .. } => {
                "artifact"
            }
            CreateEpisode(_) | UpdateEpisode(_) | UpdateEpisodeStatus { .. } | DeleteEpisode { .. } => "episode",
            CreateVariable(_) | UpdateVariable(_) | DeleteVariable { .. } => "variable",
            CreateSurface(_) | UpdateSurface(_) | UpdateSurfaceStatus { .. } | DeleteSurface { .. } => "surface",
            CreatePolicy(_) | UpdatePolicy(_) | UpdatePolicyStatus { .. } | DeletePolicy { .. } => "policy",
            CreateEntity(_) | AppendEntityEvent { .. } => "entity",
            CreateGrant(_) | RevokeGrant { .. } => "grant",
            CreateActionRun { .. } | ApproveActionRun { .. } | RejectActionRun { .. } | ExecuteActionRun { .. } => {
                "action_run"
            }
            UpdateObservationTags { .. } | RouteObservation { .. } => "observation",
        }
    }

    fn resource_id(&self) -> Option<String> {
        use OperationPayload::*;
        match self {
            CreateNode(n) | UpdateNode(n) => Some(n.id.clone()),
            AddEdge(e) => Some(e.id.clone()),
            RemoveEdge { id, .. } => Some(id.clone()),
            SetAgentDelegation(d) => Some(d.agent_node_id.clone()),
            CreateArtifact(a) => Some(a.id.clone()),
            UpdateArtifact { artifact_id, .. }
            | UpdateArtifactStatus { artifact_id, .. }
            | DeleteArtifact { artifact_id } => Some(artifact_id.clone()),
            CreateEpisode(e) => Some(e.id.clone()),
            UpdateEpisode(e) => Some(e.id.clone()),
            UpdateEpisodeStatus { episode_id, .. } | DeleteEpisode { episode_id } => Some(episode_id.clone()),
            CreateVariable(v) => Some(v.id.clone()),
            UpdateVariable(v) => Some(v.id.clone()),
            DeleteVariable { variable_id } => Some(variable_id.clone()),
            CreateSurface(s) => Some(s.id.clone()),
            UpdateSurface(s) => Some(s.id.clone()),
            UpdateSurfaceStatus { surface_id, .. } | DeleteSurface { surface_id } => Some(surface_id.clone()),
            CreatePolicy(p) => Some(p.id.clone()),
            UpdatePolicy(p) => Some(p.id.clone()),
            UpdatePolicyStatus { policy_id, .. } | DeletePolicy { policy_id } => Some(policy_id.clone()),
            CreateEntity(e) => Some(e.id.clone()),
            AppendEntityEvent { entity_id, .. } => Some(entity_id.clone()),
            CreateGrant(g) => Some(g.id.clone()),
            RevokeGrant { grant_id, .. } => Some(grant_id.clone()),
            CreateActionRun { .. } => None,
            ApproveActionRun { action_run_id }
            | RejectActionRun { action_run_id, .. }
            | ExecuteActionRun { action_run_id } => Some(action_run_id.clone()),
            UpdateObservationTags { observation_id, .. } | RouteObservation { observation_id, .. } => {
                Some(observation_id.clone())
            }
        }
    }
}

/// Outcome of one [`Prism::execute`] call.
#[derive(Debug, Clone)]
pub struct OperationResult {
    pub success: bool,
    pub data: Option<Json>,
    pub error: Option<String>,
    pub audit: AuditEntry,
}

/// One operation's dispatch outcome, recorded before the surrounding
/// transaction (single-op or batch) has resolved. `rolled_back` and the
/// final `success` flag for a batch member are only known once the whole
/// batch's transaction has settled, so this is an intermediate record, not
/// the final [`OperationResult`].
struct DispatchRecord {
    operation_type: &'static str,
    resource_type: &'static str,
    resource_id: Option<String>,
    actor_node_id: String,
    actor: Option<Actor>,
    caused_by: Option<CausedBy>,
    duration_ms: i64,
    outcome: Result<Json, String>,
}

/// The commit boundary. Holds the process-wide collaborators operation
/// dispatch needs beyond the repository itself.
pub struct Prism<'a> {
    action_registry: &'a ActionRegistry,
    config: &'a Config,
}

impl<'a> Prism<'a> {
    pub fn new(action_registry: &'a ActionRegistry, config: &'a Config) -> Self {
        Self {
            action_registry,
            config,
        }
    }

    pub fn execute(&self, repository: &mut dyn CanonRepository, operation: Operation) -> OperationResult {
        let mut record = None;
        let commit_result = repository.transaction(&mut |tx| {
            let r = self.resolve_and_dispatch(tx, &operation);
            let result = match &r.outcome {
                Ok(_) => Ok(()),
                Err(reason) => Err(PrismError::Conflict(reason.clone())),
            };
            record = Some(r);
            result
        });
        let record = record.expect("transaction always invokes the closure exactly once");
        let success = commit_result.is_ok();
        self.finalize(repository, record, success, false)
    }

    /// Run every operation inside one outer transaction. If any fails, all
    /// mutations in the batch roll back. Every operation still receives its
    /// own audit entry: operations dispatched successfully before the
    /// failure are recorded `success: false` (nothing they did survived the
    /// rollback) but not `rolled_back`; the failing operation and every
    /// operation after it are recorded `rolled_back: true`.
    pub fn execute_batch(
        &self,
        repository: &mut dyn CanonRepository,
        operations: Vec<Operation>,
    ) -> Vec<OperationResult> {
        let batch_id = new_id();
        let total = operations.len();
        let mut records: Vec<DispatchRecord> = Vec::with_capacity(total);

        let commit_result = repository.transaction(&mut |tx| {
            for operation in &operations {
                let record = self.resolve_and_dispatch(tx, operation);
                let failed = record.outcome.is_err();
                records.push(record);
                if failed {
                    return Err(PrismError::Conflict("batch operation failed".into()));
                }
            }
            Ok(())
        });

        let failure_index = if commit_result.is_err() { Some(records.len() - 1) } else { None };

        let mut results = Vec::with_capacity(total);
        for (index, mut record) in records.into_iter().enumerate() {
            record.caused_by = Some({
                let mut caused_by = record.caused_by.unwrap_or_default();
                caused_by.batch_id = Some(batch_id.clone());
                caused_by
            });
            let rolled_back = matches!(failure_index, Some(fail_at) if index >= fail_at);
            let success = commit_result.is_ok();
            results.push(self.finalize(repository, record, success, rolled_back));
        }
        results
    }

    fn resolve_and_dispatch(&self, repository: &mut dyn CanonRepository, operation: &Operation) -> DispatchRecord {
        let started = std::time::Instant::now();
        let operation_type = operation.payload.operation_type();
        let resource_type = operation.payload.resource_type();
        let resource_id = operation.payload.resource_id();

        match resolve_actor(repository, &operation.actor) {
            Ok(actor) => {
                let outcome = dispatch(repository, self.action_registry, self.config, &actor, &operation.payload)
                    .map_err(|e| e.to_string());
                DispatchRecord {
                    operation_type,
                    resource_type,
                    resource_id,
                    actor_node_id: actor.node_id.clone(),
                    actor: Some(actor),
                    caused_by: operation.caused_by.clone(),
                    duration_ms: started.elapsed().as_millis() as i64,
                    outcome,
                }
            }
            Err(err) => DispatchRecord {
                operation_type,
                resource_type,
                resource_id,
                actor_node_id: operation.actor.node_id.clone(),
                actor: None,
                caused_by: operation.caused_by.clone(),
                duration_ms: started.elapsed().as_millis() as i64,
                outcome: Err(err.to_string()),
            },
        }
    }

    /// Build and persist the audit entry for one dispatch record, then the
    /// [`OperationResult`] the caller sees. `success` is the entry's final,
    /// post-transaction outcome — for a batch member this may differ from
    /// whether its own `dispatch` call actually returned `Ok`.
    fn finalize(
        &self,
        repository: &mut dyn CanonRepository,
        record: DispatchRecord,
        success: bool,
        rolled_back: bool,
    ) -> OperationResult {
        let actor = record.actor.unwrap_or(Actor {
            node_id: record.actor_node_id.clone(),
            kind: NodeKind::Object,
            sponsor_id: None,
            method: ActorMethod::Auto,
        });
        let (result_summary, error_type, error) = match (&record.outcome, success) {
            (Ok(data), true) => (Some(sanitize(data)), None, None),
            (Ok(_), false) => (None, Some("conflict_error".to_string()), Some("rolled back".to_string())),
            (Err(reason), _) => (None, Some(PrismError::Conflict(reason.clone()).error_type().to_string()), Some(reason.clone())),
        };

        let entry = AuditEntry {
            id: new_id(),
            timestamp: Utc::now(),
            node_id: actor.node_id.clone(),
            actor,
            operation_type: record.operation_type.to_string(),
            resource_type: record.resource_type.to_string(),
            resource_id: record.resource_id,
            details: AuditDetails {
                duration_ms: record.duration_ms,
                result_summary,
                error_type,
                rolled_back,
            },
            caused_by: record.caused_by,
            success,
            error,
        };
        let _ = repository.append_audit(entry.clone());
        OperationResult {
            success,
            data: entry.details.result_summary.clone(),
            error: entry.error.clone(),
            audit: entry,
        }
    }
}

fn resolve_actor(repository: &dyn CanonRepository, input: &ActorInput) -> PrismResult<Actor> {
    let node = repository
        .get_node(&input.node_id)
        .ok_or_else(|| PrismError::Authorization(alloc::format!("actor {} does not exist", input.node_id)))?;
    let sponsor_id = if node.kind == NodeKind::Agent {
        repository.get_delegation(&node.id).map(|d| d.sponsor_node_id)
    } else {
        None
    };
    Ok(Actor {
        node_id: node.id,
        kind: node.kind,
        sponsor_id,
        method: input.method,
    })
}

/// Authorize `actor` to mutate a resource owned by `owning_node_id`,
/// consulting grants on `(resource_type, resource_id)` when ownership
/// (direct, or via an agent's sponsor) doesn't already cover it.
fn authorize(
    repository: &dyn CanonRepository,
    actor: &Actor,
    owning_node_id: &str,
    grantable: Option<(ResourceType, &str)>,
    required_scope: Scope,
) -> PrismResult<()> {
    match actor.kind {
        NodeKind::Object => {
            return Err(PrismError::Authorization(
                "object nodes may never initiate mutations".into(),
            ))
        }
        NodeKind::Subject => {
            if actor.node_id == owning_node_id {
                return Ok(());
            }
        }
        NodeKind::Agent => {
            let delegation = repository.get_delegation(&actor.node_id).ok_or_else(|| {
                PrismError::Authorization(alloc::format!("{} has no delegation", actor.node_id))
            })?;
            if !delegation.is_active(Utc::now()) {
                return Err(PrismError::Authorization(alloc::format!(
                    "{}'s delegation has expired",
                    actor.node_id
                )));
            }
            if delegation.sponsor_node_id == owning_node_id {
                return Ok(());
            }
        }
    }

    if let Some((resource_type, resource_id)) = grantable {
        let now = Utc::now();
        let authorized = repository
            .list_grants_for_grantee(&actor.node_id)
            .into_iter()
            .any(|g| g.is_active(now) && g.covers_resource(resource_type, resource_id) && g.has_scope(required_scope));
        if authorized {
            return Ok(());
        }
    }

    Err(PrismError::Authorization(alloc::format!(
        "{} is not authorized for this operation",
        actor.node_id
    )))
}

fn dispatch(
    repository: &mut dyn CanonRepository,
    action_registry: &ActionRegistry,
    config: &Config,
    actor: &Actor,
    payload: &OperationPayload,
) -> PrismResult<Json> {
    use OperationPayload::*;
    match payload {
        CreateNode(node) => {
            if actor.kind == NodeKind::Object {
                return Err(PrismError::Authorization("object nodes may never initiate mutations".into()));
            }
            let created = repository.create_node(node.clone())?;
            Ok(to_summary(&created))
        }
        UpdateNode(node) => {
            authorize(repository, actor, &node.id, Some((ResourceType::Node, &node.id)), Scope::Write)?;
            let updated = repository.update_node(node.clone())?;
            Ok(to_summary(&updated))
        }
        AddEdge(edge) => {
            authorize(
                repository,
                actor,
                &edge.from_node_id,
                Some((ResourceType::Node, &edge.from_node_id)),
                Scope::Write,
            )?;
            let created = repository.create_edge(edge.clone())?;
            Ok(to_summary(&created))
        }
        RemoveEdge { id, from_node_id } => {
            authorize(
                repository,
                actor,
                from_node_id,
                Some((ResourceType::Node, from_node_id)),
                Scope::Write,
            )?;
            repository.remove_edge(id)?;
            Ok(Json::Null)
        }
        SetAgentDelegation(delegation) => {
            authorize(
                repository,
                actor,
                &delegation.sponsor_node_id,
                None,
                Scope::Admin,
            )?;
            let set = repository.set_delegation(delegation.clone())?;
            Ok(to_summary(&set))
        }

        CreateArtifact(artifact) => {
            authorize(repository, actor, &artifact.node_id, Some((ResourceType::Node, &artifact.node_id)), Scope::Write)?;
            validate_non_empty(&artifact.title, "title")?;
            validate_non_empty(&artifact.about, "about")?;
            let created = repository.create_artifact(artifact.clone())?;
            Ok(to_summary(&created))
        }
        UpdateArtifact {
            artifact_id,
            snapshot,
            message,
        } => {
            let existing = repository
                .get_artifact(artifact_id)
                .ok_or_else(|| PrismError::not_found("artifact", artifact_id.clone()))?;
            authorize(
                repository,
                actor,
                &existing.node_id,
                Some((ResourceType::Artifact, artifact_id)),
                Scope::Write,
            )?;
            validate_non_empty(&snapshot.title, "title")?;
            let (updated, revision) =
                repository.update_artifact(artifact_id, snapshot.clone(), &actor.node_id, message.clone())?;
            Ok(serde_json::json!({ "artifact": to_summary(&updated), "revision": to_summary(&revision) }))
        }
        UpdateArtifactStatus { artifact_id, status } => {
            let existing = repository
                .get_artifact(artifact_id)
                .ok_or_else(|| PrismError::not_found("artifact", artifact_id.clone()))?;
            authorize(
                repository,
                actor,
                &existing.node_id,
                Some((ResourceType::Artifact, artifact_id)),
                Scope::Write,
            )?;
            let updated = repository.update_artifact_status(artifact_id, *status)?;
            Ok(to_summary(&updated))
        }
        DeleteArtifact { artifact_id } => {
            let existing = repository
                .get_artifact(artifact_id)
                .ok_or_else(|| PrismError::not_found("artifact", artifact_id.clone()))?;
            authorize(
                repository,
                actor,
                &existing.node_id,
                Some((ResourceType::Artifact, artifact_id)),
                Scope::Admin,
            )?;
            let archived = repository.update_artifact_status(artifact_id, ArtifactStatus::Archived)?;
            Ok(to_summary(&archived))
        }

        CreateEpisode(episode) => {
            authorize(repository, actor, &episode.node_id, Some((ResourceType::Node, &episode.node_id)), Scope::Write)?;
            let created = repository.create_episode(episode.clone())?;
            Ok(to_summary(&created))
        }
        UpdateEpisode(episode) => {
            let existing = repository
                .get_episode(&episode.id)
                .ok_or_else(|| PrismError::not_found("episode", episode.id.clone()))?;
            authorize(
                repository,
                actor,
                &existing.node_id,
                Some((ResourceType::Episode, &episode.id)),
                Scope::Write,
            )?;
            let updated = repository.update_episode(episode.clone())?;
            Ok(to_summary(&updated))
        }
        UpdateEpisodeStatus { episode_id, status } => {
            let existing = repository
                .get_episode(episode_id)
                .ok_or_else(|| PrismError::not_found("episode", episode_id.clone()))?;
            authorize(
                repository,
                actor,
                &existing.node_id,
                Some((ResourceType::Episode, episode_id)),
                Scope::Write,
            )?;
            let updated = repository.update_episode_status(episode_id, *status)?;
            Ok(to_summary(&updated))
        }
        DeleteEpisode { episode_id } => {
            let existing = repository
                .get_episode(episode_id)
                .ok_or_else(|| PrismError::not_found("episode", episode_id.clone()))?;
            authorize(
                repository,
                actor,
                &existing.node_id,
                Some((ResourceType::Episode, episode_id)),
                Scope::Admin,
            )?;
            let abandoned = repository.update_episode_status(episode_id, EpisodeStatus::Abandoned)?;
            Ok(to_summary(&abandoned))
        }

        CreateVariable(variable) => {
            authorize(repository, actor, &variable.node_id, Some((ResourceType::Node, &variable.node_id)), Scope::Write)?;
            let created = repository.create_variable(variable.clone())?;
            Ok(to_summary(&created))
        }
        UpdateVariable(variable) => {
            let existing = repository
                .get_variable(&variable.id)
                .ok_or_else(|| PrismError::not_found("variable", variable.id.clone()))?;
            authorize(
                repository,
                actor,
                &existing.node_id,
                Some((ResourceType::Variable, &variable.id)),
                Scope::Write,
            )?;
            let updated = repository.update_variable(variable.clone())?;
            Ok(to_summary(&updated))
        }
        DeleteVariable { variable_id } => {
            let _ = variable_id;
            Err(PrismError::Validation("variable delete is not supported".into()))
        }

        CreateSurface(surface) => {
            authorize(repository, actor, &surface.node_id, Some((ResourceType::Node, &surface.node_id)), Scope::Write)?;
            let created = repository.create_surface(surface.clone())?;
            Ok(to_summary(&created))
        }
        UpdateSurface(surface) => {
            let existing = repository
                .get_surface(&surface.id)
                .ok_or_else(|| PrismError::not_found("surface", surface.id.clone()))?;
            authorize(
                repository,
                actor,
                &existing.node_id,
                Some((ResourceType::Surface, &surface.id)),
                Scope::Write,
            )?;
            let updated = repository.update_surface(surface.clone())?;
            Ok(to_summary(&updated))
        }
        UpdateSurfaceStatus { surface_id, status } => {
            let existing = repository
                .get_surface(surface_id)
                .ok_or_else(|| PrismError::not_found("surface", surface_id.clone()))?;
            authorize(
                repository,
                actor,
                &existing.node_id,
                Some((ResourceType::Surface, surface_id)),
                Scope::Write,
            )?;
            let updated = repository.update_surface_status(surface_id, *status)?;
            Ok(to_summary(&updated))
        }
        DeleteSurface { surface_id } => {
            let existing = repository
                .get_surface(surface_id)
                .ok_or_else(|| PrismError::not_found("surface", surface_id.clone()))?;
            authorize(
                repository,
                actor,
                &existing.node_id,
                Some((ResourceType::Surface, surface_id)),
                Scope::Admin,
            )?;
            let archived = repository.update_surface_status(surface_id, SurfaceStatus::Archived)?;
            Ok(to_summary(&archived))
        }

        CreatePolicy(policy) => {
            authorize(repository, actor, &policy.node_id, None, Scope::Write)?;
            validate_non_empty(&policy.implementation, "implementation")?;
            let created = repository.create_policy(policy.clone())?;
            Ok(to_summary(&created))
        }
        UpdatePolicy(policy) => {
            let existing = repository
                .get_policy(&policy.id)
                .ok_or_else(|| PrismError::not_found("policy", policy.id.clone()))?;
            authorize(repository, actor, &existing.node_id, None, Scope::Write)?;
            validate_non_empty(&policy.implementation, "implementation")?;
            let updated = repository.update_policy(policy.clone())?;
            Ok(to_summary(&updated))
        }
        UpdatePolicyStatus { policy_id, enabled } => {
            let existing = repository
                .get_policy(policy_id)
                .ok_or_else(|| PrismError::not_found("policy", policy_id.clone()))?;
            authorize(repository, actor, &existing.node_id, None, Scope::Write)?;
            let updated = repository.update_policy_status(policy_id, *enabled)?;
            Ok(to_summary(&updated))
        }
        DeletePolicy { policy_id } => {
            let existing = repository
                .get_policy(policy_id)
                .ok_or_else(|| PrismError::not_found("policy", policy_id.clone()))?;
            authorize(repository, actor, &existing.node_id, None, Scope::Admin)?;
            let disabled = repository.update_policy_status(policy_id, false)?;
            Ok(to_summary(&disabled))
        }

        CreateEntity(entity) => {
            authorize(repository, actor, &entity.node_id, Some((ResourceType::Node, &entity.node_id)), Scope::Write)?;
            let created = repository.create_entity(entity.clone())?;
            Ok(to_summary(&created))
        }
        AppendEntityEvent { entity_id, event } => {
            let existing = repository
                .get_entity(entity_id)
                .ok_or_else(|| PrismError::not_found("entity", entity_id.clone()))?;
            authorize(
                repository,
                actor,
                &existing.node_id,
                Some((ResourceType::Entity, entity_id)),
                Scope::Write,
            )?;
            let record = repository.append_entity_event(entity_id, event.clone())?;
            Ok(to_summary(&record))
        }

        CreateGrant(grant) => {
            if grant.grantor_node_id != actor.node_id {
                return Err(PrismError::Authorization(
                    "a grant's grantor must be the actor issuing it".into(),
                ));
            }
            if actor.kind != NodeKind::Subject {
                return Err(PrismError::Authorization(
                    "only a subject node may issue a grant".into(),
                ));
            }
            if let Some(owner) = resource_owner(repository, grant.resource_type, &grant.resource_id) {
                if owner != actor.node_id {
                    return Err(PrismError::Authorization(
                        "only a resource's owner may grant access to it".into(),
                    ));
                }
            }
            let created = repository.create_grant(grant.clone())?;
            Ok(to_summary(&created))
        }
        RevokeGrant { grant_id, reason } => {
            let existing = repository
                .get_grant(grant_id)
                .ok_or_else(|| PrismError::not_found("grant", grant_id.clone()))?;
            if existing.grantor_node_id != actor.node_id {
                return Err(PrismError::Authorization(
                    "only the grantor may revoke a grant".into(),
                ));
            }
            let revoked = repository.revoke_grant(
                grant_id,
                Revocation {
                    revoked_at: Utc::now(),
                    revoked_by: actor.node_id.clone(),
                    reason: reason.clone(),
                },
            )?;
            Ok(to_summary(&revoked))
        }

        CreateActionRun {
            node_id,
            proposed_by,
            action,
        } => {
            let run = actions::propose(repository, action_registry, node_id, proposed_by.clone(), action.clone())?;
            Ok(to_summary(&run))
        }
        ApproveActionRun { action_run_id } => {
            let run = repository
                .get_action_run(action_run_id)
                .ok_or_else(|| PrismError::not_found("action_run", action_run_id.clone()))?;
            if actor.kind == NodeKind::Subject && actor.node_id != run.node_id {
                return Err(PrismError::Authorization(
                    "a subject may only approve action runs on resources it owns".into(),
                ));
            }
            let approver = actions::approver_for(actor.kind, &actor.node_id).ok_or_else(|| {
                PrismError::Authorization("object nodes may never approve an action run".into())
            })?;
            let approved = actions::approve(repository, action_run_id, approver)?;
            Ok(to_summary(&approved))
        }
        RejectActionRun { action_run_id, reason } => {
            let run = repository
                .get_action_run(action_run_id)
                .ok_or_else(|| PrismError::not_found("action_run", action_run_id.clone()))?;
            if actor.kind == NodeKind::Object {
                return Err(PrismError::Authorization(
                    "object nodes may never reject an action run".into(),
                ));
            }
            if actor.kind == NodeKind::Subject && actor.node_id != run.node_id {
                return Err(PrismError::Authorization(
                    "a subject may only reject action runs on resources it owns".into(),
                ));
            }
            let rejected = actions::reject(repository, action_run_id, &actor.node_id, reason.clone())?;
            Ok(to_summary(&rejected))
        }
        ExecuteActionRun { action_run_id } => {
            let run = repository
                .get_action_run(action_run_id)
                .ok_or_else(|| PrismError::not_found("action_run", action_run_id.clone()))?;
            if actor.kind == NodeKind::Object {
                return Err(PrismError::Authorization(
                    "object nodes may never execute an action run".into(),
                ));
            }
            let _ = &run;
            let executed = actions::execute(repository, action_registry, config, action_run_id)?;
            Ok(to_summary(&executed))
        }

        UpdateObservationTags { observation_id, tags } => {
            let existing = repository
                .get_observation(observation_id)
                .ok_or_else(|| PrismError::not_found("observation", observation_id.clone()))?;
            authorize(repository, actor, &existing.node_id, None, Scope::Write)?;
            let updated = repository.set_observation_tags(observation_id, tags.clone())?;
            Ok(to_summary(&updated))
        }
        RouteObservation { observation_id, to_node_id } => {
            let existing = repository
                .get_observation(observation_id)
                .ok_or_else(|| PrismError::not_found("observation", observation_id.clone()))?;
            authorize(repository, actor, &existing.node_id, None, Scope::Write)?;
            if repository.get_node(to_node_id).is_none() {
                return Err(PrismError::not_found("node", to_node_id.clone()));
            }
            let mut routed = existing.clone();
            routed.id = new_id();
            routed.node_id = to_node_id.clone();
            routed.timestamp = Utc::now();
            if config.force_synthetic_origin_on_route {
                routed.provenance = crate::types::Provenance {
                    source_id: Some(existing.node_id.clone()),
                    origin: crate::types::ObservationOrigin::Synthetic,
                    method: "route_observation".into(),
                };
            }
            let created = repository.append_observation(routed)?;
            Ok(to_summary(&created))
        }
    }
}

fn validate_non_empty(value: &str, field: &str) -> PrismResult<()> {
    if value.trim().is_empty() {
        return Err(PrismError::Validation(alloc::format!("{field} must not be empty")));
    }
    Ok(())
}

fn resource_owner(repository: &dyn CanonRepository, resource_type: ResourceType, resource_id: &str) -> Option<String> {
    match resource_type {
        ResourceType::Node => Some(resource_id.to_string()),
        ResourceType::Artifact => repository.get_artifact(resource_id).map(|a| a.node_id),
        ResourceType::Surface => repository.get_surface(resource_id).map(|s| s.node_id),
        ResourceType::Entity => repository.get_entity(resource_id).map(|e| e.node_id),
        ResourceType::Variable => repository.get_variable(resource_id).map(|v| v.node_id),
        ResourceType::Episode => repository.get_episode(resource_id).map(|e| e.node_id),
    }
}

fn to_summary<T: serde::Serialize>(value: &T) -> Json {
    serde_json::to_value(value).unwrap_or(Json::Null)
}

/// Audit detail sanitization: nested objects carrying an `id` collapse to
/// `{id}`, strings over 1000 bytes truncate, arrays become a length marker.
fn sanitize(value: &Json) -> Json {
    sanitize_at_depth(value, 0)
}

fn sanitize_at_depth(value: &Json, depth: u8) -> Json {
    match value {
        Json::Object(map) => {
            if depth > 0 {
                if let Some(id) = map.get("id") {
                    let mut collapsed = Map::new();
                    collapsed.insert("id".to_string(), id.clone());
                    return Json::Object(collapsed);
                }
            }
            let mut out = Map::new();
            for (key, v) in map {
                out.insert(key.clone(), sanitize_at_depth(v, depth + 1));
            }
            Json::Object(out)
        }
        Json::Array(items) => Json::String(alloc::format!("[Array({})]", items.len())),
        Json::String(s) if s.len() > 1000 => Json::String(alloc::format!("{}...", &s[..1000])),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::InMemoryCanonRepository;
    use crate::types::{ArtifactStatus, NodeKind};

    fn sample_node(repo: &mut InMemoryCanonRepository, id: &str, kind: NodeKind) {
        let now = Utc::now();
        repo.create_node(Node {
            id: id.to_string(),
            kind,
            name: "test".into(),
            description: None,
            created_at: now,
            updated_at: now,
        })
        .unwrap();
    }

    fn prism<'a>(action_registry: &'a ActionRegistry, config: &'a Config) -> Prism<'a> {
        Prism::new(action_registry, config)
    }

    #[test]
    fn audit_entry_recorded_on_success() {
        let mut repo = InMemoryCanonRepository::new();
        sample_node(&mut repo, "n1", NodeKind::Subject);
        let config = Config::default();
        let registry = ActionRegistry::new();
        let p = prism(&registry, &config);

        let now = Utc::now();
        let op = Operation {
            actor: ActorInput {
                node_id: "n1".into(),
                method: ActorMethod::Manual,
            },
            caused_by: None,
            payload: OperationPayload::CreateArtifact(crate::types::Artifact {
                id: "a1".into(),
                node_id: "n1".into(),
                title: "v1".into(),
                about: "about".into(),
                notes: None,
                page: Json::Null,
                status: ArtifactStatus::Draft,
                trunk_version: 0,
                entity_refs: None,
                created_at: now,
                updated_at: now,
            }),
        };
        let result = p.execute(&mut repo, op);
        assert!(result.success);
        assert!(result.audit.success);
        assert_eq!(repo.query_audit(&Default::default()).len(), 1);
    }

    #[test]
    fn object_node_never_mutates() {
        let mut repo = InMemoryCanonRepository::new();
        sample_node(&mut repo, "o1", NodeKind::Object);
        let config = Config::default();
        let registry = ActionRegistry::new();
        let p = prism(&registry, &config);

        let now = Utc::now();
        let op = Operation {
            actor: ActorInput {
                node_id: "o1".into(),
                method: ActorMethod::Manual,
            },
            caused_by: None,
            payload: OperationPayload::CreateArtifact(crate::types::Artifact {
                id: "a1".into(),
                node_id: "o1".into(),
                title: "v1".into(),
                about: "about".into(),
                notes: None,
                page: Json::Null,
                status: ArtifactStatus::Draft,
                trunk_version: 0,
                entity_refs: None,
                created_at: now,
                updated_at: now,
            }),
        };
        let result = p.execute(&mut repo, op);
        assert!(!result.success);
        assert!(repo.get_artifact("a1").is_none());
    }

    #[test]
    fn agent_without_delegation_is_refused() {
        let mut repo = InMemoryCanonRepository::new();
        sample_node(&mut repo, "n1", NodeKind::Subject);
        sample_node(&mut repo, "agent1", NodeKind::Agent);
        let config = Config::default();
        let registry = ActionRegistry::new();
        let p = prism(&registry, &config);

        let now = Utc::now();
        let op = Operation {
            actor: ActorInput {
                node_id: "agent1".into(),
                method: ActorMethod::Auto,
            },
            caused_by: None,
            payload: OperationPayload::CreateArtifact(crate::types::Artifact {
                id: "a1".into(),
                node_id: "n1".into(),
                title: "v1".into(),
                about: "about".into(),
                notes: None,
                page: Json::Null,
                status: ArtifactStatus::Draft,
                trunk_version: 0,
                entity_refs: None,
                created_at: now,
                updated_at: now,
            }),
        };
        let result = p.execute(&mut repo, op);
        assert!(!result.success);
    }

    #[test]
    fn batch_rolls_back_on_failure() {
        let mut repo = InMemoryCanonRepository::new();
        sample_node(&mut repo, "n1", NodeKind::Subject);
        let config = Config::default();
        let registry = ActionRegistry::new();
        let p = prism(&registry, &config);

        let now = Utc::now();
        let good = Operation {
            actor: ActorInput {
                node_id: "n1".into(),
                method: ActorMethod::Manual,
            },
            caused_by: None,
            payload: OperationPayload::CreateArtifact(crate::types::Artifact {
                id: "a1".into(),
                node_id: "n1".into(),
                title: "v1".into(),
                about: "about".into(),
                notes: None,
                page: Json::Null,
                status: ArtifactStatus::Draft,
                trunk_version: 0,
                entity_refs: None,
                created_at: now,
                updated_at: now,
            }),
        };
        let bad = Operation {
            actor: ActorInput {
                node_id: "n1".into(),
                method: ActorMethod::Manual,
            },
            caused_by: None,
            payload: OperationPayload::UpdateArtifactStatus {
                artifact_id: "missing".into(),
                status: ArtifactStatus::Archived,
            },
        };

        let results = p.execute_batch(&mut repo, alloc::vec![good, bad]);
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.audit.details.rolled_back || !r.success));
        assert!(repo.get_artifact("a1").is_none());
    }

    #[test]
    fn sanitizes_nested_id_objects_and_arrays() {
        let value = serde_json::json!({
            "id": "top",
            "nested": {"id": "inner", "name": "should be dropped"},
            "items": [1, 2, 3],
        });
        let sanitized = sanitize(&value);
        assert_eq!(sanitized["nested"], serde_json::json!({"id": "inner"}));
        assert_eq!(sanitized["items"], Json::String("[Array(3)]".into()));
    }
}
