// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Omnilith Project

//! Observation ingestion: validates and appends an incoming fact. Ingestion
//! does not go through the Prism commit boundary — observations are
//! append-only and carry no authorization gate of their own, only the
//! existence checks below.

use alloc::string::{String, ToString};

use chrono::Utc;

use crate::error::{PrismError, PrismResult};
use crate::repository::CanonRepository;
use crate::types::{new_id, Observation, Provenance};

/// Request to ingest a single observation.
pub struct IngestRequest {
    pub node_id: String,
    pub observation_type: String,
    pub payload: serde_json::Value,
    pub provenance: Provenance,
    pub tags: Option<alloc::collections::BTreeSet<String>>,
}

/// Validate and append `request` as a new [`Observation`].
///
/// Validation: the target node must exist; `provenance.source_id`, when
/// present, must name an existing node; `observation_type` must be
/// non-empty after trimming.
pub fn ingest(repository: &mut dyn CanonRepository, request: IngestRequest) -> PrismResult<Observation> {
    if request.observation_type.trim().is_empty() {
        return Err(PrismError::Validation("observation type must not be empty".into()));
    }
    if repository.get_node(&request.node_id).is_none() {
        return Err(PrismError::not_found("node", request.node_id));
    }
    if let Some(source_id) = &request.provenance.source_id {
        if repository.get_node(source_id).is_none() {
            return Err(PrismError::not_found("node", source_id.to_string()));
        }
    }

    let observation = Observation {
        id: new_id(),
        node_id: request.node_id,
        observation_type: request.observation_type,
        timestamp: Utc::now(),
        payload: request.payload,
        provenance: request.provenance,
        tags: request.tags,
    };
    repository.append_observation(observation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::InMemoryCanonRepository;
    use crate::types::{Node, NodeKind, ObservationOrigin};

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

    fn provenance() -> Provenance {
        Provenance {
            source_id: None,
            origin: ObservationOrigin::Organic,
            method: "manual".into(),
        }
    }

    #[test]
    fn ingests_valid_observation() {
        let mut repo = InMemoryCanonRepository::new();
        let node_id = sample_node(&mut repo);
        let result = ingest(
            &mut repo,
            IngestRequest {
                node_id: node_id.clone(),
                observation_type: "health.sleep".into(),
                payload: serde_json::json!({"hours": 7.5}),
                provenance: provenance(),
                tags: None,
            },
        )
        .unwrap();
        assert_eq!(result.node_id, node_id);
        assert!(repo.get_observation(&result.id).is_some());
    }

    #[test]
    fn rejects_unknown_node() {
        let mut repo = InMemoryCanonRepository::new();
        let err = ingest(
            &mut repo,
            IngestRequest {
                node_id: "missing".into(),
                observation_type: "health.sleep".into(),
                payload: serde_json::Value::Null,
                provenance: provenance(),
                tags: None,
            },
        )
        .unwrap_err();
        assert!(matches!(err, PrismError::NotFound { .. }));
    }

    #[test]
    fn rejects_empty_type() {
        let mut repo = InMemoryCanonRepository::new();
        let node_id = sample_node(&mut repo);
        let err = ingest(
            &mut repo,
            IngestRequest {
                node_id,
                observation_type: "   ".into(),
                payload: serde_json::Value::Null,
                provenance: provenance(),
                tags: None,
            },
        )
        .unwrap_err();
        assert!(matches!(err, PrismError::Validation(_)));
    }

    #[test]
    fn rejects_unknown_source_node() {
        let mut repo = InMemoryCanonRepository::new();
        let node_id = sample_node(&mut repo);
        let err = ingest(
            &mut repo,
            IngestRequest {
                node_id,
                observation_type: "health.sleep".into(),
                payload: serde_json::Value::Null,
                provenance: Provenance {
                    source_id: Some("ghost".into()),
                    origin: ObservationOrigin::Synthetic,
                    method: "import".into(),
                },
                tags: None,
            },
        )
        .unwrap_err();
        assert!(matches!(err, PrismError::NotFound { .. }));
    }
}
