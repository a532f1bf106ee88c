// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Omnilith Project

//! Error taxonomy shared across the kernel.
//!
//! Every fallible operation in the crate returns one of these variants.
//! [`PrismError::error_type`] feeds the `errorType` tag recorded on a failed
//! [`crate::types::AuditEntry`].

use alloc::string::String;

// `thiserror` is only pulled in by the `std` feature (see Cargo.toml); the
// derive supplies `Display` and `std::error::Error` there. Without `std`,
// `Display` and `core::error::Error` are implemented by hand below so the
// crate stays buildable with `--no-default-features`.
#[cfg(feature = "std")]
use thiserror::Error;

/// Unified error type returned by Canon, policy, effect, action, and Prism
/// operations.
#[cfg_attr(feature = "std", derive(Error))]
#[derive(Debug)]
pub enum PrismError {
    #[cfg_attr(feature = "std", error("validation failed: {0}"))]
    Validation(String),

    #[cfg_attr(feature = "std", error("authorization denied: {0}"))]
    Authorization(String),

    #[cfg_attr(feature = "std", error("not found: {kind} {id}"))]
    NotFound { kind: String, id: String },

    #[cfg_attr(feature = "std", error("conflict: {0}"))]
    Conflict(String),

    #[cfg_attr(feature = "std", error("policy compilation failed for policy {policy_id}: {reason}"))]
    Compilation { policy_id: String, reason: String },

    #[cfg_attr(feature = "std", error("invalid effect produced by policy {policy_id}: {reason}"))]
    InvalidEffect { policy_id: String, reason: String },

    #[cfg_attr(feature = "std", error("policy {policy_id} execution error: {reason}"))]
    PolicyExecution { policy_id: String, reason: String },

    #[cfg_attr(feature = "std", error("timeout after {elapsed_ms}ms (budget {budget_ms}ms) in {context}"))]
    Timeout {
        context: String,
        elapsed_ms: i64,
        budget_ms: i64,
    },

    #[cfg_attr(feature = "std", error("effect execution error for '{effect_type}': {reason}"))]
    EffectExecution { effect_type: String, reason: String },

    #[cfg_attr(feature = "std", error("action execution error for action run {action_run_id}: {reason}"))]
    ActionExecution { action_run_id: String, reason: String },
}

#[cfg(not(feature = "std"))]
impl core::fmt::Display for PrismError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            PrismError::Validation(reason) => write!(f, "validation failed: {reason}"),
            PrismError::Authorization(reason) => write!(f, "authorization denied: {reason}"),
            PrismError::NotFound { kind, id } => write!(f, "not found: {kind} {id}"),
            PrismError::Conflict(reason) => write!(f, "conflict: {reason}"),
            PrismError::Compilation { policy_id, reason } => {
                write!(f, "policy compilation failed for policy {policy_id}: {reason}")
            }
            PrismError::InvalidEffect { policy_id, reason } => {
                write!(f, "invalid effect produced by policy {policy_id}: {reason}")
            }
            PrismError::PolicyExecution { policy_id, reason } => {
                write!(f, "policy {policy_id} execution error: {reason}")
            }
            PrismError::Timeout { context, elapsed_ms, budget_ms } => {
                write!(f, "timeout after {elapsed_ms}ms (budget {budget_ms}ms) in {context}")
            }
            PrismError::EffectExecution { effect_type, reason } => {
                write!(f, "effect execution error for '{effect_type}': {reason}")
            }
            PrismError::ActionExecution { action_run_id, reason } => {
                write!(f, "action execution error for action run {action_run_id}: {reason}")
            }
        }
    }
}

#[cfg(not(feature = "std"))]
impl core::error::Error for PrismError {}

impl PrismError {
    pub fn not_found(kind: impl Into<String>, id: impl Into<String>) -> Self {
        PrismError::NotFound {
            kind: kind.into(),
            id: id.into(),
        }
    }

    /// Short machine-readable tag recorded in `AuditDetails::error_type`.
    pub fn error_type(&self) -> &'static str {
        match self {
            PrismError::Validation(_) => "validation_error",
            PrismError::Authorization(_) => "authorization_error",
            PrismError::NotFound { .. } => "not_found_error",
            PrismError::Conflict(_) => "conflict_error",
            PrismError::Compilation { .. } => "compilation_error",
            PrismError::InvalidEffect { .. } => "invalid_effect_error",
            PrismError::PolicyExecution { .. } => "policy_execution_error",
            PrismError::Timeout { .. } => "timeout_error",
            PrismError::EffectExecution { .. } => "effect_execution_error",
            PrismError::ActionExecution { .. } => "action_execution_error",
        }
    }
}

pub type PrismResult<T> = Result<T, PrismError>;
