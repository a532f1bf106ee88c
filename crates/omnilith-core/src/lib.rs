// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Omnilith Project

//! # omnilith-core
//!
//! Runtime kernel for the Omnilith protocol: a personal-scale
//! regulatory/observational loop built around **observation → policy →
//! effect**, gated by a single transactional, audited commit boundary
//! ([`prism::Prism`]) and an approval-gated [`actions`] lifecycle for
//! effects that reach outside canon.
//!
//! This crate is `no_std`-compatible (requires `alloc`). Enable the `std`
//! feature (on by default) for the Prism commit boundary, the runtime loop,
//! and config loading, all of which need wall-clock time and heap-backed
//! collections beyond what `alloc` alone guarantees.
//!
//! ## Architecture
//!
//! ```text
//! RuntimeLoop
//!   ├── ingestion::ingest        — validate + append an incoming observation
//!   ├── policy::PolicyEvaluator  — run matching policies in priority order
//!   ├── effects::EffectExecutor  — dispatch the resulting effects in order
//!   └── prism::Prism             — the sole transactional, audited mutator
//!                                  of canon; every canon-mutating effect
//!                                  and every operator-facing mutation
//!                                  passes through it
//! actions                       — ActionRun propose/approve/reject/execute
//! repository::CanonRepository   — the storage contract canon lives behind
//! ```
//!
//! ## Quick start
//!
//! ```rust
//! use omnilith_core::{
//!     config::Config,
//!     ingestion::IngestRequest,
//!     prism::Prism,
//!     registry::{ActionRegistry, EffectRegistry},
//!     repository::{CanonRepository, InMemoryCanonRepository},
//!     runtime::{ProcessOptions, RuntimeLoop},
//!     types::{Node, NodeKind, ObservationOrigin, Policy, Provenance, Trigger},
//! };
//! use chrono::Utc;
//!
//! let mut repo = InMemoryCanonRepository::new();
//! let now = Utc::now();
//! let node = Node {
//!     id: "subject-1".into(),
//!     kind: NodeKind::Subject,
//!     name: "me".into(),
//!     description: None,
//!     created_at: now,
//!     updated_at: now,
//! };
//! repo.create_node(node).unwrap();
//! repo.create_policy(Policy {
//!     id: "p1".into(),
//!     node_id: "subject-1".into(),
//!     name: "tag sleep".into(),
//!     priority: 0,
//!     enabled: true,
//!     triggers: vec![Trigger("health.*".into())],
//!     implementation: "(ctx) => [tag_observation([\"reviewed\"])]".into(),
//!     created_at: now,
//!     updated_at: now,
//! }).unwrap();
//!
//! let config = Config::default();
//! let registry = EffectRegistry::new();
//! let action_registry = ActionRegistry::new();
//! let prism = Prism::new(&action_registry, &config);
//! let runtime = RuntimeLoop::new(&registry, &prism);
//!
//! let summary = runtime.process_observation(
//!     &mut repo,
//!     &config,
//!     IngestRequest {
//!         node_id: "subject-1".into(),
//!         observation_type: "health.sleep".into(),
//!         payload: serde_json::json!({"hours": 8}),
//!         provenance: Provenance { source_id: None, origin: ObservationOrigin::Organic, method: "manual".into() },
//!         tags: None,
//!     },
//!     ProcessOptions::default(),
//! ).unwrap();
//!
//! assert_eq!(summary.evaluation.policies_evaluated, 1);
//! ```

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

pub mod config;
pub mod error;
pub mod registry;
pub mod repository;
pub mod types;

#[cfg(feature = "std")]
pub mod actions;
#[cfg(feature = "std")]
pub mod effects;
#[cfg(feature = "std")]
pub mod ingestion;
#[cfg(feature = "std")]
pub mod policy;
#[cfg(feature = "std")]
pub mod prism;
#[cfg(feature = "std")]
pub mod runtime;

// Config loader — TOML file and environment variable loading.
// Only compiled when the "config-loader" feature is enabled.
#[cfg(feature = "config-loader")]
pub mod config_loader;

// Re-export the most commonly used items at the crate root so consumers can
// write `use omnilith_core::Prism;` instead of the fully qualified path.
pub use error::{PrismError, PrismResult};
pub use repository::{CanonRepository, InMemoryCanonRepository};

#[cfg(feature = "std")]
pub use prism::Prism;
#[cfg(feature = "std")]
pub use runtime::{ProcessOptions, RuntimeLoop, RuntimeSummary};

// Re-export the async runtime loop at the crate root for ergonomic imports.
#[cfg(feature = "async")]
pub use runtime::r#async::AsyncRuntimeLoop;

// Re-export config loader types at the crate root.
#[cfg(feature = "config-loader")]
pub use config_loader::{load_config, load_config_from_env, ConfigError, OmnilithConfig};
