// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Omnilith Project

//! Canon Repository: the storage-agnostic interface between the kernel and
//! whatever backs it, plus an in-memory reference implementation used by
//! the kernel's own tests and doctests.
//!
//! The [`CanonRepository`] trait groups operations by entity kind. Single
//! lookups return `Option`; bulk queries return empty collections rather
//! than erroring. Paginated `list` queries are ordered `(updated_at desc,
//! id asc)` unless the method's own contract says otherwise. Mutating
//! operations that can be grouped behind `transaction` observe
//! all-or-nothing atomicity.
//!
//! Production adapters (relational, networked) are external collaborators;
//! [`InMemoryCanonRepository`] exists only so the kernel's own tests and
//! doctests have a concrete store to exercise.

use alloc::string::{String, ToString};
use alloc::vec::Vec;

use chrono::{DateTime, Utc};
use hashbrown::HashMap;

use crate::error::{PrismError, PrismResult};
use crate::types::*;

/// Typed CRUD/append surface the kernel requires from storage.
///
/// Implementations MUST be `Send + Sync` so a repository can be shared
/// across runtime-loop tasks when wrapped in `Arc`.
pub trait CanonRepository: Send + Sync {
    // -- Nodes --------------------------------------------------------
    fn create_node(&mut self, node: Node) -> PrismResult<Node>;
    fn get_node(&self, id: &str) -> Option<Node>;
    fn update_node(&mut self, node: Node) -> PrismResult<Node>;
    /// Remove a node. Callers must have already verified it owns no extant
    /// entities — the repository itself does not check this.
    fn delete_node(&mut self, id: &str) -> PrismResult<()>;

    // -- Edges ----------------------------------------------------------
    fn create_edge(&mut self, edge: Edge) -> PrismResult<Edge>;
    fn remove_edge(&mut self, id: &str) -> PrismResult<()>;
    fn list_edges_for_node(&self, node_id: &str) -> Vec<Edge>;

    // -- Agent delegations ------------------------------------------------
    fn set_delegation(&mut self, delegation: AgentDelegation) -> PrismResult<AgentDelegation>;
    fn get_delegation(&self, agent_node_id: &str) -> Option<AgentDelegation>;

    // -- Observations (append-only) --------------------------------------
    fn append_observation(&mut self, observation: Observation) -> PrismResult<Observation>;
    fn get_observation(&self, id: &str) -> Option<Observation>;
    fn query_observations(&self, filter: &ObservationFilter) -> Vec<Observation>;
    /// Overwrite an observation's `tags` field — the one mutation allowed
    /// on an otherwise append-only record.
    fn set_observation_tags(
        &mut self,
        id: &str,
        tags: alloc::collections::BTreeSet<String>,
    ) -> PrismResult<Observation>;

    // -- Artifacts + revisions --------------------------------------------
    fn create_artifact(&mut self, artifact: Artifact) -> PrismResult<Artifact>;
    fn get_artifact(&self, id: &str) -> Option<Artifact>;
    /// Apply `snapshot` as a new trunk version of `artifact_id`, creating a
    /// gap-free [`Revision`] in the same atomic step.
    fn update_artifact(
        &mut self,
        artifact_id: &str,
        snapshot: ArtifactSnapshot,
        author_node_id: &str,
        message: Option<String>,
    ) -> PrismResult<(Artifact, Revision)>;
    fn update_artifact_status(
        &mut self,
        artifact_id: &str,
        status: ArtifactStatus,
    ) -> PrismResult<Artifact>;
    fn list_revisions(&self, artifact_id: &str) -> Vec<Revision>;

    // -- Variables --------------------------------------------------------
    fn create_variable(&mut self, variable: Variable) -> PrismResult<Variable>;
    fn get_variable(&self, id: &str) -> Option<Variable>;
    fn update_variable(&mut self, variable: Variable) -> PrismResult<Variable>;
    /// Every variable owned by `node_id`, independent of episode
    /// membership.
    fn list_variables_for_node(&self, node_id: &str) -> Vec<Variable>;

    // -- Episodes -----------------------------------------------------------
    fn create_episode(&mut self, episode: Episode) -> PrismResult<Episode>;
    fn get_episode(&self, id: &str) -> Option<Episode>;
    fn update_episode(&mut self, episode: Episode) -> PrismResult<Episode>;
    fn update_episode_status(&mut self, id: &str, status: EpisodeStatus) -> PrismResult<Episode>;
    fn list_active_episodes(&self, node_id: &str) -> Vec<Episode>;

    // -- Policies -----------------------------------------------------------
    fn create_policy(&mut self, policy: Policy) -> PrismResult<Policy>;
    fn get_policy(&self, id: &str) -> Option<Policy>;
    fn update_policy(&mut self, policy: Policy) -> PrismResult<Policy>;
    fn update_policy_status(&mut self, id: &str, enabled: bool) -> PrismResult<Policy>;
    /// All enabled policies owned by `node_id`, ascending priority, ties
    /// broken by id.
    fn list_enabled_policies(&self, node_id: &str) -> Vec<Policy>;

    // -- Surfaces -----------------------------------------------------------
    fn create_surface(&mut self, surface: Surface) -> PrismResult<Surface>;
    fn get_surface(&self, id: &str) -> Option<Surface>;
    fn update_surface(&mut self, surface: Surface) -> PrismResult<Surface>;
    fn update_surface_status(&mut self, id: &str, status: SurfaceStatus) -> PrismResult<Surface>;

    // -- Entities + events --------------------------------------------------
    fn create_entity(&mut self, entity: Entity) -> PrismResult<Entity>;
    fn get_entity(&self, id: &str) -> Option<Entity>;
    fn append_entity_event(
        &mut self,
        entity_id: &str,
        event: EntityEvent,
    ) -> PrismResult<EntityEventRecord>;
    fn list_entity_events(&self, entity_id: &str) -> Vec<EntityEventRecord>;

    // -- ActionRuns -----------------------------------------------------------
    fn create_action_run(&mut self, action_run: ActionRun) -> PrismResult<ActionRun>;
    fn get_action_run(&self, id: &str) -> Option<ActionRun>;
    fn update_action_run(&mut self, action_run: ActionRun) -> PrismResult<ActionRun>;

    // -- Grants -----------------------------------------------------------
    fn create_grant(&mut self, grant: Grant) -> PrismResult<Grant>;
    fn get_grant(&self, id: &str) -> Option<Grant>;
    fn revoke_grant(&mut self, id: &str, revocation: Revocation) -> PrismResult<Grant>;
    fn list_grants_for_grantee(&self, grantee_node_id: &str) -> Vec<Grant>;

    // -- Audit (append-only) --------------------------------------------------
    fn append_audit(&mut self, entry: AuditEntry) -> PrismResult<AuditEntry>;
    fn query_audit(&self, filter: &AuditFilter) -> Vec<AuditEntry>;

    // -- Transactions -----------------------------------------------------------
    /// Run `f` against `self`; if `f` returns `Err`, any writes it made are
    /// rolled back before the error is returned. The in-memory reference
    /// implementation achieves this with a snapshot-and-restore; a
    /// networked adapter would use its backend's native transaction.
    fn transaction(
        &mut self,
        f: &mut dyn FnMut(&mut dyn CanonRepository) -> PrismResult<()>,
    ) -> PrismResult<()>;
}

// ---------------------------------------------------------------------------
// InMemoryCanonRepository
// ---------------------------------------------------------------------------

/// A volatile, heap-allocated [`CanonRepository`] implementation backed by
/// [`hashbrown::HashMap`]s. All data lives in process memory and is lost
/// when the repository is dropped — suitable for tests and demos, not
/// production persistence.
#[derive(Debug, Default, Clone)]
pub struct InMemoryCanonRepository {
    nodes: HashMap<String, Node>,
    edges: HashMap<String, Edge>,
    delegations: HashMap<String, AgentDelegation>,
    observations: HashMap<String, Observation>,
    artifacts: HashMap<String, Artifact>,
    revisions: HashMap<String, Vec<Revision>>,
    variables: HashMap<String, Variable>,
    episodes: HashMap<String, Episode>,
    policies: HashMap<String, Policy>,
    surfaces: HashMap<String, Surface>,
    entities: HashMap<String, Entity>,
    entity_events: HashMap<String, Vec<EntityEventRecord>>,
    action_runs: HashMap<String, ActionRun>,
    grants: HashMap<String, Grant>,
    audit: Vec<AuditEntry>,
}

impl InMemoryCanonRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CanonRepository for InMemoryCanonRepository {
    fn create_node(&mut self, node: Node) -> PrismResult<Node> {
        if self.nodes.contains_key(&node.id) {
            return Err(PrismError::Conflict(alloc::format!("node {} already exists", node.id)));
        }
        self.nodes.insert(node.id.clone(), node.clone());
        Ok(node)
    }

    fn get_node(&self, id: &str) -> Option<Node> {
        self.nodes.get(id).cloned()
    }

    fn update_node(&mut self, node: Node) -> PrismResult<Node> {
        if !self.nodes.contains_key(&node.id) {
            return Err(PrismError::not_found("node", node.id));
        }
        self.nodes.insert(node.id.clone(), node.clone());
        Ok(node)
    }

    fn delete_node(&mut self, id: &str) -> PrismResult<()> {
        self.nodes
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| PrismError::not_found("node", id.to_string()))
    }

    fn create_edge(&mut self, edge: Edge) -> PrismResult<Edge> {
        self.edges.insert(edge.id.clone(), edge.clone());
        Ok(edge)
    }

    fn remove_edge(&mut self, id: &str) -> PrismResult<()> {
        self.edges
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| PrismError::not_found("edge", id.to_string()))
    }

    fn list_edges_for_node(&self, node_id: &str) -> Vec<Edge> {
        self.edges
            .values()
            .filter(|e| e.from_node_id == node_id || e.to_node_id == node_id)
            .cloned()
            .collect()
    }

    fn set_delegation(&mut self, delegation: AgentDelegation) -> PrismResult<AgentDelegation> {
        self.delegations
            .insert(delegation.agent_node_id.clone(), delegation.clone());
        Ok(delegation)
    }

    fn get_delegation(&self, agent_node_id: &str) -> Option<AgentDelegation> {
        self.delegations.get(agent_node_id).cloned()
    }

    fn append_observation(&mut self, observation: Observation) -> PrismResult<Observation> {
        self.observations
            .insert(observation.id.clone(), observation.clone());
        Ok(observation)
    }

    fn get_observation(&self, id: &str) -> Option<Observation> {
        self.observations.get(id).cloned()
    }

    fn query_observations(&self, filter: &ObservationFilter) -> Vec<Observation> {
        let mut results: Vec<Observation> = self
            .observations
            .values()
            .filter(|o| {
                if let Some(ref node_id) = filter.node_id {
                    if &o.node_id != node_id {
                        return false;
                    }
                }
                if let Some(ref t) = filter.observation_type {
                    if &o.observation_type != t {
                        return false;
                    }
                }
                if let Some(ref prefix) = filter.type_prefix {
                    if !o.observation_type.starts_with(prefix.as_str()) {
                        return false;
                    }
                }
                if let Some(ref tags) = filter.tags {
                    let has_all = tags.iter().all(|t| {
                        o.tags.as_ref().map(|ot| ot.contains(t)).unwrap_or(false)
                    });
                    if !has_all {
                        return false;
                    }
                }
                if let Some(since) = filter.since {
                    if o.timestamp < since {
                        return false;
                    }
                }
                if let Some(until) = filter.until {
                    if o.timestamp > until {
                        return false;
                    }
                }
                true
            })
            .cloned()
            .collect();

        // Deterministic ordering: timestamp descending, id ascending on ties.
        results.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| a.id.cmp(&b.id)));
        if let Some(limit) = filter.limit {
            results.truncate(limit);
        }
        results
    }

    fn set_observation_tags(
        &mut self,
        id: &str,
        tags: alloc::collections::BTreeSet<String>,
    ) -> PrismResult<Observation> {
        let observation = self
            .observations
            .get_mut(id)
            .ok_or_else(|| PrismError::not_found("observation", id.to_string()))?;
        observation.tags = Some(tags);
        Ok(observation.clone())
    }

    fn create_artifact(&mut self, artifact: Artifact) -> PrismResult<Artifact> {
        self.artifacts.insert(artifact.id.clone(), artifact.clone());
        self.revisions.entry(artifact.id.clone()).or_default();
        Ok(artifact)
    }

    fn get_artifact(&self, id: &str) -> Option<Artifact> {
        self.artifacts.get(id).cloned()
    }

    fn update_artifact(
        &mut self,
        artifact_id: &str,
        snapshot: ArtifactSnapshot,
        author_node_id: &str,
        message: Option<String>,
    ) -> PrismResult<(Artifact, Revision)> {
        let artifact = self
            .artifacts
            .get_mut(artifact_id)
            .ok_or_else(|| PrismError::not_found("artifact", artifact_id.to_string()))?;

        artifact.title = snapshot.title.clone();
        artifact.about = snapshot.about.clone();
        artifact.notes = snapshot.notes.clone();
        artifact.page = snapshot.page.clone();
        artifact.status = snapshot.status;
        artifact.trunk_version += 1;
        artifact.updated_at = Utc::now();

        let version = artifact.trunk_version;
        let updated = artifact.clone();

        let revision = Revision {
            id: new_id(),
            artifact_id: artifact_id.to_string(),
            version,
            snapshot,
            author_node_id: author_node_id.to_string(),
            message,
            created_at: updated.updated_at,
        };
        self.revisions
            .entry(artifact_id.to_string())
            .or_default()
            .push(revision.clone());

        Ok((updated, revision))
    }

    fn update_artifact_status(
        &mut self,
        artifact_id: &str,
        status: ArtifactStatus,
    ) -> PrismResult<Artifact> {
        let artifact = self
            .artifacts
            .get_mut(artifact_id)
            .ok_or_else(|| PrismError::not_found("artifact", artifact_id.to_string()))?;
        artifact.status = status;
        artifact.updated_at = Utc::now();
        Ok(artifact.clone())
    }

    fn list_revisions(&self, artifact_id: &str) -> Vec<Revision> {
        self.revisions.get(artifact_id).cloned().unwrap_or_default()
    }

    fn create_variable(&mut self, variable: Variable) -> PrismResult<Variable> {
        self.variables.insert(variable.id.clone(), variable.clone());
        Ok(variable)
    }

    fn get_variable(&self, id: &str) -> Option<Variable> {
        self.variables.get(id).cloned()
    }

    fn update_variable(&mut self, variable: Variable) -> PrismResult<Variable> {
        if !self.variables.contains_key(&variable.id) {
            return Err(PrismError::not_found("variable", variable.id));
        }
        self.variables.insert(variable.id.clone(), variable.clone());
        Ok(variable)
    }

    fn list_variables_for_node(&self, node_id: &str) -> Vec<Variable> {
        self.variables
            .values()
            .filter(|v| v.node_id == node_id)
            .cloned()
            .collect()
    }

    fn create_episode(&mut self, episode: Episode) -> PrismResult<Episode> {
        self.episodes.insert(episode.id.clone(), episode.clone());
        Ok(episode)
    }

    fn get_episode(&self, id: &str) -> Option<Episode> {
        self.episodes.get(id).cloned()
    }

    fn update_episode(&mut self, episode: Episode) -> PrismResult<Episode> {
        if !self.episodes.contains_key(&episode.id) {
            return Err(PrismError::not_found("episode", episode.id));
        }
        self.episodes.insert(episode.id.clone(), episode.clone());
        Ok(episode)
    }

    fn update_episode_status(&mut self, id: &str, status: EpisodeStatus) -> PrismResult<Episode> {
        let episode = self
            .episodes
            .get_mut(id)
            .ok_or_else(|| PrismError::not_found("episode", id.to_string()))?;
        episode.status = status;
        episode.updated_at = Utc::now();
        Ok(episode.clone())
    }

    fn list_active_episodes(&self, node_id: &str) -> Vec<Episode> {
        self.episodes
            .values()
            .filter(|e| e.node_id == node_id && e.status == EpisodeStatus::Active)
            .cloned()
            .collect()
    }

    fn create_policy(&mut self, policy: Policy) -> PrismResult<Policy> {
        self.policies.insert(policy.id.clone(), policy.clone());
        Ok(policy)
    }

    fn get_policy(&self, id: &str) -> Option<Policy> {
        self.policies.get(id).cloned()
    }

    fn update_policy(&mut self, policy: Policy) -> PrismResult<Policy> {
        if !self.policies.contains_key(&policy.id) {
            return Err(PrismError::not_found("policy", policy.id));
        }
        self.policies.insert(policy.id.clone(), policy.clone());
        Ok(policy)
    }

    fn update_policy_status(&mut self, id: &str, enabled: bool) -> PrismResult<Policy> {
        let policy = self
            .policies
            .get_mut(id)
            .ok_or_else(|| PrismError::not_found("policy", id.to_string()))?;
        policy.enabled = enabled;
        policy.updated_at = Utc::now();
        Ok(policy.clone())
    }

    fn list_enabled_policies(&self, node_id: &str) -> Vec<Policy> {
        let mut policies: Vec<Policy> = self
            .policies
            .values()
            .filter(|p| p.node_id == node_id && p.enabled)
            .cloned()
            .collect();
        policies.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.id.cmp(&b.id)));
        policies
    }

    fn create_surface(&mut self, surface: Surface) -> PrismResult<Surface> {
        self.surfaces.insert(surface.id.clone(), surface.clone());
        Ok(surface)
    }

    fn get_surface(&self, id: &str) -> Option<Surface> {
        self.surfaces.get(id).cloned()
    }

    fn update_surface(&mut self, surface: Surface) -> PrismResult<Surface> {
        if !self.surfaces.contains_key(&surface.id) {
            return Err(PrismError::not_found("surface", surface.id));
        }
        self.surfaces.insert(surface.id.clone(), surface.clone());
        Ok(surface)
    }

    fn update_surface_status(&mut self, id: &str, status: SurfaceStatus) -> PrismResult<Surface> {
        let surface = self
            .surfaces
            .get_mut(id)
            .ok_or_else(|| PrismError::not_found("surface", id.to_string()))?;
        surface.status = status;
        surface.updated_at = Utc::now();
        Ok(surface.clone())
    }

    fn create_entity(&mut self, entity: Entity) -> PrismResult<Entity> {
        self.entities.insert(entity.id.clone(), entity.clone());
        self.entity_events.entry(entity.id.clone()).or_default();
        Ok(entity)
    }

    fn get_entity(&self, id: &str) -> Option<Entity> {
        self.entities.get(id).cloned()
    }

    fn append_entity_event(
        &mut self,
        entity_id: &str,
        event: EntityEvent,
    ) -> PrismResult<EntityEventRecord> {
        if !self.entities.contains_key(entity_id) {
            return Err(PrismError::not_found("entity", entity_id.to_string()));
        }
        let record = EntityEventRecord {
            id: new_id(),
            entity_id: entity_id.to_string(),
            event_type: event.event_type,
            data: event.data,
            created_at: Utc::now(),
        };
        self.entity_events
            .entry(entity_id.to_string())
            .or_default()
            .push(record.clone());
        if let Some(entity) = self.entities.get_mut(entity_id) {
            entity.updated_at = record.created_at;
        }
        Ok(record)
    }

    fn list_entity_events(&self, entity_id: &str) -> Vec<EntityEventRecord> {
        self.entity_events.get(entity_id).cloned().unwrap_or_default()
    }

    fn create_action_run(&mut self, action_run: ActionRun) -> PrismResult<ActionRun> {
        self.action_runs
            .insert(action_run.id.clone(), action_run.clone());
        Ok(action_run)
    }

    fn get_action_run(&self, id: &str) -> Option<ActionRun> {
        self.action_runs.get(id).cloned()
    }

    fn update_action_run(&mut self, action_run: ActionRun) -> PrismResult<ActionRun> {
        if !self.action_runs.contains_key(&action_run.id) {
            return Err(PrismError::not_found("action_run", action_run.id));
        }
        self.action_runs
            .insert(action_run.id.clone(), action_run.clone());
        Ok(action_run)
    }

    fn create_grant(&mut self, grant: Grant) -> PrismResult<Grant> {
        self.grants.insert(grant.id.clone(), grant.clone());
        Ok(grant)
    }

    fn get_grant(&self, id: &str) -> Option<Grant> {
        self.grants.get(id).cloned()
    }

    fn revoke_grant(&mut self, id: &str, revocation: Revocation) -> PrismResult<Grant> {
        let grant = self
            .grants
            .get_mut(id)
            .ok_or_else(|| PrismError::not_found("grant", id.to_string()))?;
        grant.revoked = Some(revocation);
        Ok(grant.clone())
    }

    fn list_grants_for_grantee(&self, grantee_node_id: &str) -> Vec<Grant> {
        self.grants
            .values()
            .filter(|g| g.grantee_node_id == grantee_node_id)
            .cloned()
            .collect()
    }

    fn append_audit(&mut self, entry: AuditEntry) -> PrismResult<AuditEntry> {
        self.audit.push(entry.clone());
        Ok(entry)
    }

    fn query_audit(&self, filter: &AuditFilter) -> Vec<AuditEntry> {
        let mut results: Vec<AuditEntry> = self
            .audit
            .iter()
            .filter(|entry| {
                if let Some(ref node_id) = filter.node_id {
                    if &entry.node_id != node_id {
                        return false;
                    }
                }
                if let Some(ref resource_id) = filter.resource_id {
                    if entry.resource_id.as_ref() != Some(resource_id) {
                        return false;
                    }
                }
                if let Some(ref op) = filter.operation_type {
                    if &entry.operation_type != op {
                        return false;
                    }
                }
                if let Some(ref batch_id) = filter.batch_id {
                    if entry.caused_by.as_ref().and_then(|c| c.batch_id.as_ref()) != Some(batch_id) {
                        return false;
                    }
                }
                if let Some(ref observation_id) = filter.observation_id {
                    if entry.caused_by.as_ref().and_then(|c| c.observation_id.as_ref())
                        != Some(observation_id)
                    {
                        return false;
                    }
                }
                if let Some(ref policy_id) = filter.policy_id {
                    if entry.caused_by.as_ref().and_then(|c| c.policy_id.as_ref()) != Some(policy_id) {
                        return false;
                    }
                }
                if let Some(ref action_run_id) = filter.action_run_id {
                    if entry.caused_by.as_ref().and_then(|c| c.action_run_id.as_ref())
                        != Some(action_run_id)
                    {
                        return false;
                    }
                }
                if let Some(success) = filter.success {
                    if entry.success != success {
                        return false;
                    }
                }
                if let Some(since) = filter.since {
                    if entry.timestamp < since {
                        return false;
                    }
                }
                if let Some(until) = filter.until {
                    if entry.timestamp > until {
                        return false;
                    }
                }
                true
            })
            .cloned()
            .collect();

        results.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| a.id.cmp(&b.id)));
        if let Some(limit) = filter.limit {
            results.truncate(limit);
        }
        results
    }

    fn transaction(
        &mut self,
        f: &mut dyn FnMut(&mut dyn CanonRepository) -> PrismResult<()>,
    ) -> PrismResult<()> {
        let snapshot = self.clone();
        match f(self) {
            Ok(()) => Ok(()),
            Err(err) => {
                *self = snapshot;
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_node(id: &str, kind: NodeKind) -> Node {
        let now = Utc::now();
        Node {
            id: id.to_string(),
            kind,
            name: "test".into(),
            description: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn create_and_get_node_roundtrips() {
        let mut repo = InMemoryCanonRepository::new();
        let node = sample_node("n1", NodeKind::Subject);
        repo.create_node(node.clone()).unwrap();
        assert_eq!(repo.get_node("n1").unwrap().id, node.id);
    }

    #[test]
    fn duplicate_node_create_conflicts() {
        let mut repo = InMemoryCanonRepository::new();
        repo.create_node(sample_node("n1", NodeKind::Subject)).unwrap();
        let err = repo.create_node(sample_node("n1", NodeKind::Agent)).unwrap_err();
        assert!(matches!(err, PrismError::Conflict(_)));
    }

    #[test]
    fn observation_query_orders_by_timestamp_desc_then_id() {
        let mut repo = InMemoryCanonRepository::new();
        let base = Utc::now();
        for (i, id) in ["o-b", "o-a"].iter().enumerate() {
            repo.append_observation(Observation {
                id: id.to_string(),
                node_id: "n1".into(),
                observation_type: "health.sleep".into(),
                timestamp: base + chrono::Duration::seconds(i as i64),
                payload: serde_json::Value::Null,
                provenance: Provenance {
                    source_id: None,
                    origin: ObservationOrigin::Organic,
                    method: "manual".into(),
                },
                tags: None,
            })
            .unwrap();
        }
        let results = repo.query_observations(&ObservationFilter::default());
        // o-a has the later timestamp, so it sorts first.
        assert_eq!(results[0].id, "o-a");
        assert_eq!(results[1].id, "o-b");
    }

    #[test]
    fn transaction_rolls_back_on_error() {
        let mut repo = InMemoryCanonRepository::new();
        repo.create_node(sample_node("n1", NodeKind::Subject)).unwrap();
        let result = repo.transaction(&mut |tx| {
            tx.create_node(sample_node("n2", NodeKind::Subject))?;
            Err(PrismError::Validation("boom".into()))
        });
        assert!(result.is_err());
        assert!(repo.get_node("n2").is_none());
        assert!(repo.get_node("n1").is_some());
    }

    #[test]
    fn update_artifact_creates_gap_free_revision() {
        let mut repo = InMemoryCanonRepository::new();
        let now = Utc::now();
        let artifact = Artifact {
            id: "a1".into(),
            node_id: "n1".into(),
            title: "v1".into(),
            about: String::new(),
            notes: None,
            page: serde_json::Value::Null,
            status: ArtifactStatus::Draft,
            trunk_version: 0,
            entity_refs: None,
            created_at: now,
            updated_at: now,
        };
        repo.create_artifact(artifact).unwrap();
        let (updated, rev1) = repo
            .update_artifact(
                "a1",
                ArtifactSnapshot {
                    title: "v2".into(),
                    about: String::new(),
                    notes: None,
                    page: serde_json::Value::Null,
                    status: ArtifactStatus::Draft,
                },
                "n1",
                None,
            )
            .unwrap();
        assert_eq!(updated.trunk_version, 1);
        assert_eq!(rev1.version, 1);
        let (updated2, rev2) = repo
            .update_artifact(
                "a1",
                ArtifactSnapshot {
                    title: "v3".into(),
                    about: String::new(),
                    notes: None,
                    page: serde_json::Value::Null,
                    status: ArtifactStatus::Draft,
                },
                "n1",
                None,
            )
            .unwrap();
        assert_eq!(updated2.trunk_version, 2);
        assert_eq!(rev2.version, 2);
        assert_eq!(repo.list_revisions("a1").len(), 2);
    }
}
