// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Omnilith Project

//! Shared data types for the Omnilith protocol.
//!
//! All identifiers are opaque UUID strings, all timestamps are UTC
//! `DateTime`s serialising to ISO-8601 with millisecond resolution, and all
//! payloads are schemaless [`serde_json::Value`]s — the protocol's tagged
//! union of scalar, list, map, and null.

use alloc::collections::BTreeSet;
use alloc::string::String;
use alloc::vec::Vec;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use uuid::Uuid;

/// Mint a fresh opaque identifier.
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

// ---------------------------------------------------------------------------
// Node
// ---------------------------------------------------------------------------

/// The unit of ownership and authority in the protocol. A node's `kind` is
/// fixed at creation and never changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// A human or principal.
    Subject,
    /// Delegated automation acting on behalf of a subject.
    Agent,
    /// A passive entity that may never initiate mutations.
    Object,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub kind: NodeKind,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Edge
// ---------------------------------------------------------------------------

/// A directed, typed relation between two nodes. Carries no intrinsic
/// permission — edges are metadata consulted by policies, never by the
/// commit boundary's authorization gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub id: String,
    pub from_node_id: String,
    pub to_node_id: String,
    #[serde(rename = "type")]
    pub edge_type: String,
    pub metadata: Option<Json>,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// AgentDelegation
// ---------------------------------------------------------------------------

/// Authority a subject grants an agent node. One active delegation per
/// agent; an expired delegation is treated as absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelegationConstraints {
    pub expires_at: Option<DateTime<Utc>>,
    pub max_risk_level: Option<RiskLevel>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDelegation {
    pub agent_node_id: String,
    pub sponsor_node_id: String,
    pub granted_at: DateTime<Utc>,
    pub scopes: BTreeSet<String>,
    pub constraints: Option<DelegationConstraints>,
}

impl AgentDelegation {
    /// Whether this delegation is currently in force.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        match self.constraints.as_ref().and_then(|c| c.expires_at) {
            Some(expiry) => now <= expiry,
            None => true,
        }
    }

    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.contains(scope)
    }

    pub fn max_risk_level(&self) -> Option<RiskLevel> {
        self.constraints.as_ref().and_then(|c| c.max_risk_level)
    }
}

// ---------------------------------------------------------------------------
// Observation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObservationOrigin {
    Organic,
    Synthetic,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Provenance {
    pub source_id: Option<String>,
    pub origin: ObservationOrigin,
    pub method: String,
}

/// An immutable fact ingested for a node. Append-only: never mutated or
/// deleted, except for `tags` via the `tag_observation` effect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    pub id: String,
    pub node_id: String,
    #[serde(rename = "type")]
    pub observation_type: String,
    pub timestamp: DateTime<Utc>,
    pub payload: Json,
    pub provenance: Provenance,
    pub tags: Option<BTreeSet<String>>,
}

/// Filter accepted by observation queries.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObservationFilter {
    pub node_id: Option<String>,
    #[serde(rename = "type")]
    pub observation_type: Option<String>,
    pub type_prefix: Option<String>,
    pub tags: Option<BTreeSet<String>>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

// ---------------------------------------------------------------------------
// Artifact & Revision
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactStatus {
    Draft,
    Active,
    Published,
    Archived,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub id: String,
    pub node_id: String,
    pub title: String,
    pub about: String,
    pub notes: Option<String>,
    /// Structured block document, left as opaque JSON — block/page
    /// validation is an external collaborator.
    pub page: Json,
    pub status: ArtifactStatus,
    pub trunk_version: u64,
    pub entity_refs: Option<Vec<String>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Immutable per-version snapshot of an artifact's mutable content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactSnapshot {
    pub title: String,
    pub about: String,
    pub notes: Option<String>,
    pub page: Json,
    pub status: ArtifactStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Revision {
    pub id: String,
    pub artifact_id: String,
    pub version: u64,
    pub snapshot: ArtifactSnapshot,
    pub author_node_id: String,
    pub message: Option<String>,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Variable & ComputeSpec
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariableKind {
    Continuous,
    Ordinal,
    Categorical,
    Boolean,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Range {
    pub min: Option<f64>,
    pub max: Option<f64>,
}

/// Describes how a variable's current value is derived from observations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum ComputeSpec {
    MovingAverage {
        observation_type: String,
        field: String,
        window_count: usize,
    },
    Latest {
        observation_type: String,
        field: String,
    },
    Count {
        observation_type: String,
        window_hours: i64,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Variable {
    pub id: String,
    pub node_id: String,
    pub name: String,
    pub kind: VariableKind,
    pub unit: Option<String>,
    pub viable_range: Option<Range>,
    pub preferred_range: Option<Range>,
    pub compute_specs: Vec<ComputeSpec>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A lazily computed estimate of a variable's current value. `None` means
/// unknown — there is never enough data yet to compute a value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariableEstimate {
    pub value: Json,
    pub confidence: f64,
    pub derived_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Episode
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EpisodeKind {
    Regulatory,
    Exploratory,
    Other(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EpisodeStatus {
    Planned,
    Active,
    Completed,
    Abandoned,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Episode {
    pub id: String,
    pub node_id: String,
    pub kind: EpisodeKind,
    pub status: EpisodeStatus,
    pub variable_ids: Vec<String>,
    pub starts_at: DateTime<Utc>,
    pub ends_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Surface
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SurfaceStatus {
    Draft,
    Active,
    Archived,
}

/// A named, owned view or dashboard configuration. Opaque beyond its own
/// lifecycle — surface rendering is an external collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Surface {
    pub id: String,
    pub node_id: String,
    pub name: String,
    pub description: Option<String>,
    pub config: Json,
    pub status: SurfaceStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Entity & EntityEvent
// ---------------------------------------------------------------------------

/// A node-owned entity that accrues an append-only event stream via the
/// `create_entity_event` effect and Prism's `appendEvent` operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    pub node_id: String,
    pub entity_type: String,
    pub data: Json,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A persisted event appended to an [`Entity`]'s stream. Immutable once
/// written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityEventRecord {
    pub id: String,
    pub entity_id: String,
    pub event_type: String,
    pub data: Json,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Policy
// ---------------------------------------------------------------------------

/// An observation-type pattern: exact match, the bare `*` wildcard, or a
/// `prefix.*` wildcard.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Trigger(pub String);

impl Trigger {
    /// `matches(t, x)` iff `t == x`, `t == "*"`, or `t` ends in `*` and `x`
    /// starts with `t`'s prefix. Case-sensitive, byte-exact.
    pub fn matches(&self, observation_type: &str) -> bool {
        let t = self.0.as_str();
        if t == observation_type || t == "*" {
            return true;
        }
        if let Some(prefix) = t.strip_suffix('*') {
            return observation_type.starts_with(prefix);
        }
        false
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    pub id: String,
    pub node_id: String,
    pub name: String,
    /// Lower sorts first.
    pub priority: i64,
    pub enabled: bool,
    pub triggers: Vec<Trigger>,
    /// Source text of a `(ctx) -> Effect[]` expression.
    pub implementation: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Policy {
    pub fn matches_observation_type(&self, observation_type: &str) -> bool {
        self.enabled && self.triggers.iter().any(|t| t.matches(observation_type))
    }
}

// ---------------------------------------------------------------------------
// Effect
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionIntent {
    pub action_type: String,
    pub params: Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: Json,
}

/// Tagged union of intent emitted by a policy. Built-in variants are fixed;
/// extension effects use the namespaced `pack:<pack>:<name>` form and carry
/// an opaque payload validated against the registry's recorded schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Effect {
    #[serde(rename = "log")]
    Log { level: LogLevel, message: String },
    #[serde(rename = "tag_observation")]
    TagObservation { tags: BTreeSet<String> },
    #[serde(rename = "route_observation")]
    RouteObservation { to_node_id: String },
    #[serde(rename = "suppress")]
    Suppress { reason: String },
    #[serde(rename = "propose_action")]
    ProposeAction {
        action: ActionIntent,
        reason: Option<String>,
    },
    #[serde(rename = "create_entity_event")]
    CreateEntityEvent {
        entity_id: String,
        event: EntityEvent,
    },
    /// `pack:<pack>:<name>` namespaced extension effect.
    #[serde(rename = "extension")]
    Extension {
        pack: String,
        name: String,
        payload: Json,
    },
}

impl Effect {
    /// The fully qualified type string used to look up a handler in the
    /// effect registry.
    pub fn type_name(&self) -> String {
        match self {
            Effect::Log { .. } => "log".into(),
            Effect::TagObservation { .. } => "tag_observation".into(),
            Effect::RouteObservation { .. } => "route_observation".into(),
            Effect::Suppress { .. } => "suppress".into(),
            Effect::ProposeAction { .. } => "propose_action".into(),
            Effect::CreateEntityEvent { .. } => "create_entity_event".into(),
            Effect::Extension { pack, name, .. } => alloc::format!("pack:{pack}:{name}"),
        }
    }

    pub fn is_suppress(&self) -> bool {
        matches!(self, Effect::Suppress { .. })
    }
}

// ---------------------------------------------------------------------------
// ActionRun
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low = 0,
    Medium = 1,
    High = 2,
    Critical = 3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionRunStatus {
    Pending,
    Approved,
    Rejected,
    Executed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalMethod {
    Auto,
    Manual,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Approval {
    pub approved_by: String,
    pub method: ApprovalMethod,
    pub approved_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rejection {
    pub rejected_by: String,
    pub reason: Option<String>,
    pub rejected_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<Json>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProposedBy {
    pub policy_id: Option<String>,
    pub observation_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRun {
    pub id: String,
    pub node_id: String,
    pub proposed_by: ProposedBy,
    pub action: ActionIntent,
    pub risk_level: RiskLevel,
    pub status: ActionRunStatus,
    pub approval: Option<Approval>,
    pub rejection: Option<Rejection>,
    pub execution: Option<Execution>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Grant
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    Node,
    Artifact,
    Surface,
    Entity,
    Variable,
    Episode,
}

/// Canonical scope values. Stored as plain strings on `Grant::scopes`; this
/// enum is the closed set used when constructing grants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    Read,
    Write,
    Admin,
    Observe,
    Propose,
    Approve,
}

impl Scope {
    pub fn as_str(self) -> &'static str {
        match self {
            Scope::Read => "read",
            Scope::Write => "write",
            Scope::Admin => "admin",
            Scope::Observe => "observe",
            Scope::Propose => "propose",
            Scope::Approve => "approve",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Revocation {
    pub revoked_at: DateTime<Utc>,
    pub revoked_by: String,
    pub reason: Option<String>,
}

/// `*` is accepted as `resource_id` to mean "all resources of this type".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Grant {
    pub id: String,
    pub grantee_node_id: String,
    pub resource_type: ResourceType,
    pub resource_id: String,
    pub scopes: BTreeSet<String>,
    pub grantor_node_id: String,
    pub granted_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub revoked: Option<Revocation>,
}

impl Grant {
    /// Active means not revoked and not expired.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        if self.revoked.is_some() {
            return false;
        }
        match self.expires_at {
            Some(expiry) => now <= expiry,
            None => true,
        }
    }

    pub fn covers_resource(&self, resource_type: ResourceType, resource_id: &str) -> bool {
        self.resource_type == resource_type
            && (self.resource_id == "*" || self.resource_id == resource_id)
    }

    pub fn has_scope(&self, scope: Scope) -> bool {
        self.scopes.contains(scope.as_str())
    }
}

// ---------------------------------------------------------------------------
// AuditEntry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActorMethod {
    Manual,
    Auto,
    Api,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Actor {
    pub node_id: String,
    pub kind: NodeKind,
    pub sponsor_id: Option<String>,
    pub method: ActorMethod,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CausedBy {
    pub observation_id: Option<String>,
    pub policy_id: Option<String>,
    pub action_run_id: Option<String>,
    pub batch_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditDetails {
    pub duration_ms: i64,
    /// Either the sanitized result summary or an error type tag, never both.
    pub result_summary: Option<Json>,
    pub error_type: Option<String>,
    pub rolled_back: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub node_id: String,
    pub actor: Actor,
    pub operation_type: String,
    pub resource_type: String,
    pub resource_id: Option<String>,
    pub details: AuditDetails,
    pub caused_by: Option<CausedBy>,
    pub success: bool,
    pub error: Option<String>,
}

/// Filter for querying the audit stream.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditFilter {
    pub node_id: Option<String>,
    pub resource_id: Option<String>,
    pub operation_type: Option<String>,
    pub batch_id: Option<String>,
    pub observation_id: Option<String>,
    pub policy_id: Option<String>,
    pub action_run_id: Option<String>,
    pub success: Option<bool>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

pub type AuditPage = Vec<AuditEntry>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trigger_exact_match() {
        assert!(Trigger("health.sleep".into()).matches("health.sleep"));
        assert!(!Trigger("health.sleep".into()).matches("health.sleeping"));
    }

    #[test]
    fn trigger_wildcard_match() {
        assert!(Trigger("health.*".into()).matches("health.sleep"));
        assert!(Trigger("health.*".into()).matches("health."));
        assert!(!Trigger("health.*".into()).matches("finance.spend"));
    }

    #[test]
    fn trigger_global_wildcard() {
        assert!(Trigger("*".into()).matches("anything.at.all"));
    }

    #[test]
    fn trigger_case_sensitive() {
        assert!(!Trigger("Health.*".into()).matches("health.sleep"));
    }

    #[test]
    fn grant_wildcard_resource() {
        let grant = Grant {
            id: "g1".into(),
            grantee_node_id: "n1".into(),
            resource_type: ResourceType::Artifact,
            resource_id: "*".into(),
            scopes: BTreeSet::from(["read".to_string()]),
            grantor_node_id: "owner".into(),
            granted_at: Utc::now(),
            expires_at: None,
            revoked: None,
        };
        assert!(grant.covers_resource(ResourceType::Artifact, "a-123"));
        assert!(!grant.covers_resource(ResourceType::Node, "a-123"));
        assert!(grant.has_scope(Scope::Read));
        assert!(!grant.has_scope(Scope::Write));
        assert!(grant.is_active(Utc::now()));
    }

    #[test]
    fn grant_expiry() {
        let past = Utc::now() - chrono::Duration::hours(1);
        let grant = Grant {
            id: "g1".into(),
            grantee_node_id: "n1".into(),
            resource_type: ResourceType::Node,
            resource_id: "n2".into(),
            scopes: BTreeSet::new(),
            grantor_node_id: "owner".into(),
            granted_at: past,
            expires_at: Some(past),
            revoked: None,
        };
        assert!(!grant.is_active(Utc::now()));
    }

    #[test]
    fn delegation_expiry_treated_as_absent() {
        let past = Utc::now() - chrono::Duration::hours(1);
        let delegation = AgentDelegation {
            agent_node_id: "agent-1".into(),
            sponsor_node_id: "subject-1".into(),
            granted_at: past,
            scopes: BTreeSet::from(["approve".to_string()]),
            constraints: Some(DelegationConstraints {
                expires_at: Some(past),
                max_risk_level: Some(RiskLevel::High),
            }),
        };
        assert!(!delegation.is_active(Utc::now()));
    }

    #[test]
    fn risk_level_ordering() {
        assert!(RiskLevel::Low < RiskLevel::Medium);
        assert!(RiskLevel::Medium < RiskLevel::High);
        assert!(RiskLevel::High < RiskLevel::Critical);
    }

    #[test]
    fn effect_type_name() {
        let e = Effect::RouteObservation { to_node_id: "n1".into() };
        assert_eq!(e.type_name(), "route_observation");
        let e = Effect::Extension {
            pack: "fitness".into(),
            name: "recalc".into(),
            payload: Json::Null,
        };
        assert_eq!(e.type_name(), "pack:fitness:recalc");
    }
}
