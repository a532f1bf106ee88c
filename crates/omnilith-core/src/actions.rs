// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Omnilith Project

//! ActionRun Lifecycle: proposal, approval/rejection, and execution of
//! actions a policy asked for via `propose_action`.
//!
//! Risk is escalation-only: an action's declared risk level (from the
//! [`ActionRegistry`]) is compared against an approving agent's delegated
//! `max_risk_level`, never loosened. A low-risk, policy-initiated run may
//! auto-approve; anything else needs an explicit `approve`/`reject` Prism
//! operation from an authorized actor.

use alloc::string::{String, ToString};

use chrono::Utc;

use crate::config::Config;
use crate::error::{PrismError, PrismResult};
use crate::registry::{ActionRegistry, HandlerContext};
use crate::repository::CanonRepository;
use crate::types::{
    new_id, ActionIntent, ActionRun, ActionRunStatus, Approval, ApprovalMethod, Execution,
    NodeKind, ProposedBy, Rejection, RiskLevel,
};

/// Risk level a run is assigned when its action type has no registered
/// handler at proposal time. Conservative: unknown actions are never
/// treated as safe to auto-approve.
const UNREGISTERED_ACTION_RISK: RiskLevel = RiskLevel::High;

/// Threshold at or below which a policy-initiated proposal auto-approves.
const AUTO_APPROVE_MAX_RISK: RiskLevel = RiskLevel::Low;

/// Create a new [`ActionRun`] for `intent`, resolving its risk level from
/// the action registry and auto-approving when the risk is low enough and
/// the proposal came from a policy (never from a directly authored Prism
/// operation — those go through explicit approval regardless of risk).
pub fn propose(
    repository: &mut dyn CanonRepository,
    registry: &ActionRegistry,
    node_id: &str,
    proposed_by: ProposedBy,
    intent: ActionIntent,
) -> PrismResult<ActionRun> {
    let risk_level = registry
        .risk_level(&intent.action_type)
        .unwrap_or(UNREGISTERED_ACTION_RISK);

    let now = Utc::now();
    let auto_approve = proposed_by.policy_id.is_some() && risk_level <= AUTO_APPROVE_MAX_RISK;

    let mut run = ActionRun {
        id: new_id(),
        node_id: node_id.to_string(),
        proposed_by,
        action: intent,
        risk_level,
        status: ActionRunStatus::Pending,
        approval: None,
        rejection: None,
        execution: None,
        created_at: now,
        updated_at: now,
    };

    if auto_approve {
        run.status = ActionRunStatus::Approved;
        run.approval = Some(Approval {
            approved_by: node_id.to_string(),
            method: ApprovalMethod::Auto,
            approved_at: now,
        });
    }

    repository.create_action_run(run)
}

/// Who is attempting to approve/reject a run, and with what authority.
pub enum Approver<'a> {
    /// The subject who owns the node the run belongs to, or holds an active
    /// `approve` grant on it.
    Subject { node_id: &'a str },
    /// A delegated agent, subject to its delegation's scope and
    /// `max_risk_level` ceiling. An agent can never approve a `Critical`
    /// run, no matter its delegation.
    Agent { node_id: &'a str },
}

/// Approve a pending run. Object nodes can never approve — they are
/// represented by the absence of an `Approver` variant, not a runtime
/// check, since only subjects and agents reach this function through
/// Prism's actor resolution.
pub fn approve(
    repository: &mut dyn CanonRepository,
    run_id: &str,
    approver: Approver<'_>,
) -> PrismResult<ActionRun> {
    let mut run = repository
        .get_action_run(run_id)
        .ok_or_else(|| PrismError::not_found("action_run", run_id.to_string()))?;

    if run.status != ActionRunStatus::Pending {
        return Err(PrismError::Conflict(alloc::format!(
            "action run {run_id} is not pending"
        )));
    }

    let (approver_node_id, method) = match approver {
        Approver::Subject { node_id } => (node_id, ApprovalMethod::Manual),
        Approver::Agent { node_id } => {
            if run.risk_level == RiskLevel::Critical {
                return Err(PrismError::Authorization(
                    "a delegated agent may never approve a critical-risk action".into(),
                ));
            }
            let delegation = repository
                .get_delegation(node_id)
                .ok_or_else(|| PrismError::Authorization(alloc::format!("{node_id} has no delegation")))?;
            if !delegation.is_active(Utc::now()) {
                return Err(PrismError::Authorization(alloc::format!(
                    "{node_id}'s delegation has expired"
                )));
            }
            if !delegation.has_scope("approve") {
                return Err(PrismError::Authorization(alloc::format!(
                    "{node_id}'s delegation lacks the approve scope"
                )));
            }
            if let Some(max_risk) = delegation.max_risk_level() {
                if run.risk_level > max_risk {
                    return Err(PrismError::Authorization(alloc::format!(
                        "{node_id}'s delegation caps risk at {max_risk:?}, run is {:?}",
                        run.risk_level
                    )));
                }
            }
            (node_id, ApprovalMethod::Manual)
        }
    };

    let now = Utc::now();
    run.status = ActionRunStatus::Approved;
    run.approval = Some(Approval {
        approved_by: approver_node_id.to_string(),
        method,
        approved_at: now,
    });
    run.updated_at = now;
    repository.update_action_run(run)
}

/// Reject a pending run.
pub fn reject(
    repository: &mut dyn CanonRepository,
    run_id: &str,
    rejected_by: &str,
    reason: Option<String>,
) -> PrismResult<ActionRun> {
    let mut run = repository
        .get_action_run(run_id)
        .ok_or_else(|| PrismError::not_found("action_run", run_id.to_string()))?;

    if run.status != ActionRunStatus::Pending {
        return Err(PrismError::Conflict(alloc::format!(
            "action run {run_id} is not pending"
        )));
    }

    let now = Utc::now();
    run.status = ActionRunStatus::Rejected;
    run.rejection = Some(Rejection {
        rejected_by: rejected_by.to_string(),
        reason,
        rejected_at: now,
    });
    run.updated_at = now;
    repository.update_action_run(run)
}

/// Execute an approved run through its registered handler, enforcing
/// `config.action_timeout_ms`. A missing handler fails the run with a
/// `NO_HANDLER` error rather than leaving it stuck `Approved` forever.
pub fn execute(
    repository: &mut dyn CanonRepository,
    registry: &ActionRegistry,
    config: &Config,
    run_id: &str,
) -> PrismResult<ActionRun> {
    let mut run = repository
        .get_action_run(run_id)
        .ok_or_else(|| PrismError::not_found("action_run", run_id.to_string()))?;

    if run.status != ActionRunStatus::Approved {
        return Err(PrismError::Conflict(alloc::format!(
            "action run {run_id} is not approved"
        )));
    }

    let started_at = Utc::now();
    let handler_ctx = HandlerContext {
        node_id: &run.node_id,
        action_run_id: Some(run_id),
        observation_id: run.proposed_by.observation_id.as_deref(),
    };

    let handler = registry.get(&run.action.action_type);
    let outcome = match handler {
        None => Err(PrismError::ActionExecution {
            action_run_id: run_id.to_string(),
            reason: "NO_HANDLER".into(),
        }),
        Some(handler) => {
            let clock_started = std::time::Instant::now();
            let result = handler(&run.action, &handler_ctx);
            let elapsed_ms = clock_started.elapsed().as_millis() as i64;
            if elapsed_ms > config.action_timeout_ms {
                Err(PrismError::Timeout {
                    context: alloc::format!("action run {run_id} execution"),
                    elapsed_ms,
                    budget_ms: config.action_timeout_ms,
                })
            } else {
                result
            }
        }
    };

    let completed_at = Utc::now();
    match outcome {
        Ok(payload) => {
            run.status = ActionRunStatus::Executed;
            run.execution = Some(Execution {
                started_at,
                completed_at: Some(completed_at),
                result: Some(payload),
                error: None,
            });
        }
        Err(err) => {
            run.status = ActionRunStatus::Failed;
            run.execution = Some(Execution {
                started_at,
                completed_at: Some(completed_at),
                result: None,
                error: Some(err.to_string()),
            });
        }
    }
    run.updated_at = completed_at;
    repository.update_action_run(run)
}

/// Resolve the [`NodeKind`] backing an approval attempt, used by Prism when
/// constructing an [`Approver`] from an actor — objects never reach this
/// far since Prism's authorization gate rejects them before the lifecycle
/// functions are called.
pub fn approver_for(node_kind: NodeKind, node_id: &str) -> Option<Approver<'_>> {
    match node_kind {
        NodeKind::Subject => Some(Approver::Subject { node_id }),
        NodeKind::Agent => Some(Approver::Agent { node_id }),
        NodeKind::Object => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::InMemoryCanonRepository;
    use crate::types::{AgentDelegation, DelegationConstraints, Node};
    use alloc::boxed::Box;
    use alloc::collections::BTreeSet;

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

    #[test]
    fn low_risk_policy_proposal_auto_approves() {
        let mut repo = InMemoryCanonRepository::new();
        sample_node(&mut repo, "n1", NodeKind::Subject);
        let mut registry = ActionRegistry::new();
        registry.register("log_note", RiskLevel::Low, Box::new(|_intent, _ctx| Ok(serde_json::Value::Null)), None);

        let run = propose(
            &mut repo,
            &registry,
            "n1",
            ProposedBy {
                policy_id: Some("p1".into()),
                observation_id: None,
            },
            ActionIntent {
                action_type: "log_note".into(),
                params: serde_json::Value::Null,
            },
        )
        .unwrap();

        assert_eq!(run.status, ActionRunStatus::Approved);
        assert_eq!(run.approval.unwrap().method, ApprovalMethod::Auto);
    }

    #[test]
    fn unregistered_action_type_is_high_risk_and_not_auto_approved() {
        let mut repo = InMemoryCanonRepository::new();
        sample_node(&mut repo, "n1", NodeKind::Subject);
        let registry = ActionRegistry::new();

        let run = propose(
            &mut repo,
            &registry,
            "n1",
            ProposedBy {
                policy_id: Some("p1".into()),
                observation_id: None,
            },
            ActionIntent {
                action_type: "unknown_action".into(),
                params: serde_json::Value::Null,
            },
        )
        .unwrap();

        assert_eq!(run.risk_level, RiskLevel::High);
        assert_eq!(run.status, ActionRunStatus::Pending);
    }

    #[test]
    fn agent_cannot_approve_critical_risk() {
        let mut repo = InMemoryCanonRepository::new();
        sample_node(&mut repo, "n1", NodeKind::Subject);
        sample_node(&mut repo, "agent1", NodeKind::Agent);
        repo.set_delegation(AgentDelegation {
            agent_node_id: "agent1".into(),
            sponsor_node_id: "n1".into(),
            granted_at: Utc::now(),
            scopes: BTreeSet::from(["approve".to_string()]),
            constraints: Some(DelegationConstraints {
                expires_at: None,
                max_risk_level: Some(RiskLevel::Critical),
            }),
        })
        .unwrap();

        let registry = ActionRegistry::new();
        let run = propose(
            &mut repo,
            &registry,
            "n1",
            ProposedBy {
                policy_id: None,
                observation_id: None,
            },
            ActionIntent {
                action_type: "wire_transfer".into(),
                params: serde_json::Value::Null,
            },
        )
        .unwrap();
        let mut run = run;
        run.risk_level = RiskLevel::Critical;
        repo.update_action_run(run.clone()).unwrap();

        let err = approve(&mut repo, &run.id, Approver::Agent { node_id: "agent1" }).unwrap_err();
        assert!(matches!(err, PrismError::Authorization(_)));
    }

    #[test]
    fn execute_with_no_handler_fails_run() {
        let mut repo = InMemoryCanonRepository::new();
        sample_node(&mut repo, "n1", NodeKind::Subject);
        let registry = ActionRegistry::new();
        let config = Config::default();

        let run = propose(
            &mut repo,
            &registry,
            "n1",
            ProposedBy {
                policy_id: None,
                observation_id: None,
            },
            ActionIntent {
                action_type: "unregistered".into(),
                params: serde_json::Value::Null,
            },
        )
        .unwrap();
        approve(&mut repo, &run.id, Approver::Subject { node_id: "n1" }).unwrap();

        let executed = execute(&mut repo, &registry, &config, &run.id).unwrap();
        assert_eq!(executed.status, ActionRunStatus::Failed);
        assert!(executed.execution.unwrap().error.unwrap().contains("NO_HANDLER"));
    }

    #[test]
    fn execute_success_records_result() {
        let mut repo = InMemoryCanonRepository::new();
        sample_node(&mut repo, "n1", NodeKind::Subject);
        let mut registry = ActionRegistry::new();
        registry.register(
            "send_email",
            RiskLevel::Medium,
            Box::new(|_intent, _ctx| Ok(serde_json::json!({"sent": true}))),
            None,
        );
        let config = Config::default();

        let run = propose(
            &mut repo,
            &registry,
            "n1",
            ProposedBy {
                policy_id: None,
                observation_id: None,
            },
            ActionIntent {
                action_type: "send_email".into(),
                params: serde_json::Value::Null,
            },
        )
        .unwrap();
        approve(&mut repo, &run.id, Approver::Subject { node_id: "n1" }).unwrap();

        let executed = execute(&mut repo, &registry, &config, &run.id).unwrap();
        assert_eq!(executed.status, ActionRunStatus::Executed);
        assert_eq!(executed.execution.unwrap().result.unwrap()["sent"], true);
    }
}
