// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Omnilith Project

//! Criterion benchmark suite for the Omnilith runtime kernel.
//!
//! Benchmarks cover the core pipeline operations:
//!
//! - Prism commit (authorize + dispatch + audit) for a single operation
//! - Prism batch commit with a mid-batch rollback
//! - Policy evaluation across a node's enabled policies
//! - The full runtime loop: ingest → evaluate → execute
//! - Audit query over an accumulated log
//!
//! Run with: `cargo bench --bench prism_benchmark`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use chrono::Utc;
use omnilith_core::config::Config;
use omnilith_core::ingestion::IngestRequest;
use omnilith_core::prism::{ActorInput, Operation, OperationPayload, Prism};
use omnilith_core::registry::{ActionRegistry, EffectRegistry};
use omnilith_core::repository::{CanonRepository, InMemoryCanonRepository};
use omnilith_core::runtime::{ProcessOptions, RuntimeLoop};
use omnilith_core::types::{
    ActorMethod, ArtifactStatus, AuditFilter, Node, NodeKind, ObservationOrigin, Policy,
    Provenance, Trigger,
};

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

fn node(id: &str) -> Node {
    let now = Utc::now();
    Node {
        id: id.to_string(),
        kind: NodeKind::Subject,
        name: "bench-node".into(),
        description: None,
        created_at: now,
        updated_at: now,
    }
}

fn artifact(id: &str, node_id: &str) -> omnilith_core::types::Artifact {
    let now = Utc::now();
    omnilith_core::types::Artifact {
        id: id.to_string(),
        node_id: node_id.to_string(),
        title: "bench artifact".into(),
        about: "about".into(),
        notes: None,
        page: serde_json::Value::Null,
        status: ArtifactStatus::Draft,
        trunk_version: 0,
        entity_refs: None,
        created_at: now,
        updated_at: now,
    }
}

fn policy(node_id: &str, priority: i64, implementation: &str) -> Policy {
    let now = Utc::now();
    Policy {
        id: format!("p-{priority}"),
        node_id: node_id.to_string(),
        name: "bench policy".into(),
        priority,
        enabled: true,
        triggers: vec![Trigger("health.*".into())],
        implementation: implementation.to_string(),
        created_at: now,
        updated_at: now,
    }
}

fn provenance() -> Provenance {
    Provenance {
        source_id: None,
        origin: ObservationOrigin::Organic,
        method: "bench".into(),
    }
}

// ---------------------------------------------------------------------------
// Prism single-operation commit benchmark
// ---------------------------------------------------------------------------

/// Benchmark `Prism::execute` for a single `create_artifact` operation,
/// which exercises the full pipeline: actor resolution, authorization,
/// transactional dispatch, and audit append.
fn prism_execute_benchmark(criterion: &mut Criterion) {
    let mut group = criterion.benchmark_group("prism_execute");

    let config = Config::default();
    let action_registry = ActionRegistry::new();
    let prism = Prism::new(&action_registry, &config);

    group.bench_function("create_artifact", |bencher| {
        bencher.iter(|| {
            let mut repo = InMemoryCanonRepository::new();
            repo.create_node(node("n1")).unwrap();
            let op = Operation {
                actor: ActorInput {
                    node_id: "n1".into(),
                    method: ActorMethod::Manual,
                },
                caused_by: None,
                payload: OperationPayload::CreateArtifact(artifact("a1", "n1")),
            };
            let result = prism.execute(black_box(&mut repo), black_box(op));
            black_box(result);
        });
    });

    group.finish();
}

// ---------------------------------------------------------------------------
// Prism batch commit benchmark
// ---------------------------------------------------------------------------

/// Benchmark `Prism::execute_batch` with a failing operation midway through,
/// measuring rollback cost alongside the per-operation audit bookkeeping.
fn prism_batch_benchmark(criterion: &mut Criterion) {
    let mut group = criterion.benchmark_group("prism_batch");

    let config = Config::default();
    let action_registry = ActionRegistry::new();
    let prism = Prism::new(&action_registry, &config);

    for size in [2usize, 8, 32] {
        group.bench_with_input(BenchmarkId::new("rollback_midway", size), &size, |bencher, &size| {
            bencher.iter(|| {
                let mut repo = InMemoryCanonRepository::new();
                repo.create_node(node("n1")).unwrap();

                let mut operations = Vec::with_capacity(size);
                for i in 0..size {
                    let payload = if i == size / 2 {
                        OperationPayload::UpdateArtifactStatus {
                            artifact_id: "missing".into(),
                            status: ArtifactStatus::Archived,
                        }
                    } else {
                        OperationPayload::CreateArtifact(artifact(&format!("a{i}"), "n1"))
                    };
                    operations.push(Operation {
                        actor: ActorInput {
                            node_id: "n1".into(),
                            method: ActorMethod::Manual,
                        },
                        caused_by: None,
                        payload,
                    });
                }

                let results = prism.execute_batch(black_box(&mut repo), black_box(operations));
                black_box(results);
            });
        });
    }

    group.finish();
}

// ---------------------------------------------------------------------------
// Runtime loop benchmark
// ---------------------------------------------------------------------------

/// Benchmark the full `process_observation` pipeline with a growing number
/// of enabled policies on the target node.
fn runtime_loop_benchmark(criterion: &mut Criterion) {
    let mut group = criterion.benchmark_group("runtime_loop");

    let config = Config::default();
    let registry = EffectRegistry::new();
    let action_registry = ActionRegistry::new();
    let prism = Prism::new(&action_registry, &config);
    let runtime = RuntimeLoop::new(&registry, &prism);

    for policy_count in [1usize, 5, 20] {
        group.bench_with_input(
            BenchmarkId::new("process_observation", policy_count),
            &policy_count,
            |bencher, &policy_count| {
                bencher.iter(|| {
                    let mut repo = InMemoryCanonRepository::new();
                    repo.create_node(node("n1")).unwrap();
                    for i in 0..policy_count {
                        repo.create_policy(policy(
                            "n1",
                            i as i64,
                            "(ctx) => [tag_observation([\"reviewed\"])]",
                        ))
                        .unwrap();
                    }

                    let request = IngestRequest {
                        node_id: "n1".into(),
                        observation_type: "health.sleep".into(),
                        payload: serde_json::json!({"hours": 8}),
                        provenance: provenance(),
                        tags: None,
                    };
                    let summary = runtime.process_observation(
                        black_box(&mut repo),
                        black_box(&config),
                        black_box(request),
                        ProcessOptions::default(),
                    );
                    black_box(summary);
                });
            },
        );
    }

    group.finish();
}

// ---------------------------------------------------------------------------
// Audit query benchmark
// ---------------------------------------------------------------------------

/// Benchmark querying the audit log after accumulating a batch of entries.
fn audit_query_benchmark(criterion: &mut Criterion) {
    let mut group = criterion.benchmark_group("audit_query");

    let config = Config::default();
    let action_registry = ActionRegistry::new();
    let prism = Prism::new(&action_registry, &config);

    let mut repo = InMemoryCanonRepository::new();
    repo.create_node(node("n1")).unwrap();
    for i in 0..500 {
        let op = Operation {
            actor: ActorInput {
                node_id: "n1".into(),
                method: ActorMethod::Manual,
            },
            caused_by: None,
            payload: OperationPayload::CreateArtifact(artifact(&format!("a{i}"), "n1")),
        };
        prism.execute(&mut repo, op);
    }

    group.bench_function("query_by_node", |bencher| {
        let filter = AuditFilter {
            node_id: Some("n1".into()),
            ..Default::default()
        };
        bencher.iter(|| {
            let entries = repo.query_audit(black_box(&filter));
            black_box(entries);
        });
    });

    group.bench_function("query_empty_filter", |bencher| {
        let filter = AuditFilter::default();
        bencher.iter(|| {
            let entries = repo.query_audit(black_box(&filter));
            black_box(entries);
        });
    });

    group.finish();
}

// ---------------------------------------------------------------------------
// Criterion harness
// ---------------------------------------------------------------------------

criterion_group!(
    benches,
    prism_execute_benchmark,
    prism_batch_benchmark,
    runtime_loop_benchmark,
    audit_query_benchmark,
);

criterion_main!(benches);
