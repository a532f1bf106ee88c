// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Omnilith Project

//! Engine-level configuration.
//!
//! [`Config`] tunes the runtime loop, policy evaluator, and effect executor
//! at construction time. All fields have sensible defaults so
//! `Config::default()` is always a valid starting point.

use serde::{Deserialize, Serialize};

/// Top-level configuration for the runtime loop and Prism commit boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Wall-clock budget for a single policy evaluation, in milliseconds.
    /// Defaults to 5000 (5s).
    pub policy_timeout_ms: i64,

    /// Wall-clock budget for a single action execution, in milliseconds.
    /// Defaults to 30000 (30s).
    pub action_timeout_ms: i64,

    /// When `true`, `route_observation` forces the copied observation's
    /// provenance to `synthetic` regardless of the source's original
    /// provenance. Defaults to `false` (preserve provenance verbatim).
    pub force_synthetic_origin_on_route: bool,

    /// Hard upper bound on the number of observations returned by any
    /// single query, regardless of the caller-supplied limit. Defaults to
    /// 1000.
    pub observation_query_hard_cap: usize,

    /// Default time window, in hours, applied to an observation query that
    /// specifies no explicit window. Defaults to 24.
    pub default_query_window_hours: i64,

    /// Window, in hours, of recent observations pre-fetched into a policy
    /// context when building it for evaluation. Defaults to 168 (7 days).
    pub context_recent_observation_window_hours: i64,

    /// Default cap applied to the recent-observation pre-fetch inside a
    /// policy context, independent of any per-query limit. Defaults to
    /// 1000.
    pub context_recent_observation_cap: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            policy_timeout_ms: 5_000,
            action_timeout_ms: 30_000,
            force_synthetic_origin_on_route: false,
            observation_query_hard_cap: 1000,
            default_query_window_hours: 24,
            context_recent_observation_window_hours: 24 * 7,
            context_recent_observation_cap: 1000,
        }
    }
}
