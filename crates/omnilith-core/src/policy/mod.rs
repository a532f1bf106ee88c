// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Omnilith Project

//! Policy compilation, context assembly, and evaluation.

pub mod compiler;
pub mod context;
pub mod evaluator;

pub use compiler::{CompiledPolicy, PolicyCompiler};
pub use context::{CanonAccessor, PolicyContext, PolicyContextBuilder};
pub use evaluator::{EvaluationOutcome, PolicyEvaluator, PolicyResult};
