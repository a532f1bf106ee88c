// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Omnilith Project

//! A minimal end-to-end walk through the observation → policy → effect
//! loop: create a subject node and a policy, ingest an observation, let the
//! runtime loop evaluate and execute, then inspect the resulting audit
//! trail directly through the Canon Repository.
//!
//! Run with: `cargo run --example basic_loop`

use chrono::Utc;

use omnilith_core::actions::{self, Approver};
use omnilith_core::config::Config;
use omnilith_core::ingestion::IngestRequest;
use omnilith_core::prism::Prism;
use omnilith_core::registry::{ActionRegistry, EffectRegistry};
use omnilith_core::repository::{CanonRepository, InMemoryCanonRepository};
use omnilith_core::runtime::{ProcessOptions, RuntimeLoop};
use omnilith_core::types::{
    AuditFilter, Node, NodeKind, ObservationOrigin, Policy, Provenance, RiskLevel, Trigger,
};

fn main() {
    let mut repo = InMemoryCanonRepository::new();
    let config = Config::default();
    let registry = EffectRegistry::new();

    // A real embedder registers handlers for every action type it wants to
    // allow policies to propose. Here "send_reminder" is declared low risk
    // so a policy-initiated proposal auto-approves.
    let mut action_registry = ActionRegistry::new();
    action_registry.register(
        "send_reminder",
        RiskLevel::Low,
        Box::new(|intent, _ctx| {
            println!("  [handler] sending reminder: {}", intent.params);
            Ok(serde_json::json!({"sent": true}))
        }),
        None,
    );

    let now = Utc::now();
    let subject = Node {
        id: "subject-1".into(),
        kind: NodeKind::Subject,
        name: "primary subject".into(),
        description: None,
        created_at: now,
        updated_at: now,
    };
    repo.create_node(subject).unwrap();

    // One policy: tag every health.* observation as reviewed, log it, and
    // propose a low-risk reminder action.
    repo.create_policy(Policy {
        id: "p-sleep".into(),
        node_id: "subject-1".into(),
        name: "sleep review".into(),
        priority: 0,
        enabled: true,
        triggers: vec![Trigger("health.*".into())],
        implementation: r#"(ctx) => [
            tag_observation(["reviewed"]),
            log("info", "sleep of " + ctx.observation.payload.hours + "h reviewed"),
            propose_action("send_reminder", {"hours": ctx.observation.payload.hours})
        ]"#
        .into(),
        created_at: now,
        updated_at: now,
    })
    .unwrap();

    let prism = Prism::new(&action_registry, &config);
    let runtime = RuntimeLoop::new(&registry, &prism);

    let summary = runtime
        .process_observation(
            &mut repo,
            &config,
            IngestRequest {
                node_id: "subject-1".into(),
                observation_type: "health.sleep".into(),
                payload: serde_json::json!({"hours": 7.5}),
                provenance: Provenance {
                    source_id: None,
                    origin: ObservationOrigin::Organic,
                    method: "manual".into(),
                },
                tags: None,
            },
            ProcessOptions::default(),
        )
        .expect("ingestion and evaluation should succeed");

    println!(
        "evaluated {} polic{}, {} effect(s), {} executed ({} ok / {} failed)",
        summary.evaluation.policies_evaluated,
        if summary.evaluation.policies_evaluated == 1 { "y" } else { "ies" },
        summary.evaluation.total_effects,
        summary.execution.total_executed,
        summary.execution.success_count,
        summary.execution.failure_count,
    );

    let stored = repo.get_observation(&summary.observation.id).unwrap();
    println!("observation tags: {:?}", stored.tags);

    // The proposed action run auto-approved (low risk, policy-initiated);
    // execute it directly through the ActionRun lifecycle. `create_action_run`
    // has no resource id of its own before creation, so the new run's id is
    // read back out of the audit entry's sanitized result summary instead.
    let runs: Vec<String> = repo
        .query_audit(&AuditFilter {
            node_id: Some("subject-1".into()),
            operation_type: Some("create_action_run".into()),
            ..Default::default()
        })
        .into_iter()
        .filter_map(|entry| entry.details.result_summary)
        .filter_map(|summary| summary.get("id").and_then(|v| v.as_str()).map(str::to_string))
        .collect();

    for run_id in runs {
        if let Some(run) = repo.get_action_run(&run_id) {
            println!("action run {} status: {:?}", run.id, run.status);
            if run.status == omnilith_core::types::ActionRunStatus::Approved {
                let executed = actions::execute(&mut repo, &action_registry, &config, &run_id)
                    .expect("execute should succeed");
                println!("action run {} executed: {:?}", executed.id, executed.status);
            } else if run.status == omnilith_core::types::ActionRunStatus::Pending {
                let approved = actions::approve(&mut repo, &run_id, Approver::Subject { node_id: "subject-1" })
                    .expect("approval should succeed");
                let executed = actions::execute(&mut repo, &action_registry, &config, &approved.id)
                    .expect("execute should succeed");
                println!("action run {} executed: {:?}", executed.id, executed.status);
            }
        }
    }

    println!(
        "audit entries for subject-1: {}",
        repo.query_audit(&AuditFilter {
            node_id: Some("subject-1".into()),
            ..Default::default()
        })
        .len()
    );
}
