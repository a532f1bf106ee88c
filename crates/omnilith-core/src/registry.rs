// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Omnilith Project

//! Process-wide registries keyed by fully qualified type string.
//!
//! Built-in effect and action types are installed once at startup by the
//! embedder; pack-provided types register at pack load and can be
//! unregistered at pack unload. Lookups are constant-time `HashMap` gets.

use alloc::boxed::Box;
use alloc::string::String;

use hashbrown::HashMap;
use serde_json::Value as Json;

use crate::error::PrismResult;
use crate::types::{ActionIntent, Effect, RiskLevel};

/// Runtime context handed to an effect or action handler. Handlers do not
/// get direct repository access in this reference implementation — they
/// receive the same `PolicyContext` snapshot a policy saw, kept narrow on
/// purpose so handler side effects stay auditable through Prism operations
/// rather than bypassing them.
pub struct HandlerContext<'a> {
    pub node_id: &'a str,
    pub action_run_id: Option<&'a str>,
    pub observation_id: Option<&'a str>,
}

/// A registered effect handler. Returns `Ok(())` on success; any `Err`
/// becomes the effect's recorded failure without aborting sibling effects
/// (the executor's `continueOnError` default).
pub type EffectHandler = Box<dyn Fn(&Json, &HandlerContext<'_>) -> PrismResult<()> + Send + Sync>;

/// A registered action handler. Returns the action's result payload.
pub type ActionHandler =
    Box<dyn Fn(&ActionIntent, &HandlerContext<'_>) -> PrismResult<Json> + Send + Sync>;

/// Effect Registry: effect type string → handler. Built-in effect type
/// identifiers are fixed: `log, tag_observation, route_observation,
/// suppress, propose_action, create_entity_event`. These are handled
/// directly by the effect executor and are never looked up here; the
/// registry exists for `pack:<pack>:<name>` extension effects plus the
/// schema used to validate their emitted shape.
#[derive(Default)]
pub struct EffectRegistry {
    handlers: HashMap<String, EffectHandler>,
    schemas: HashMap<String, Json>,
}

impl EffectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an extension effect's handler and optional payload schema.
    pub fn register(&mut self, type_name: impl Into<String>, handler: EffectHandler, schema: Option<Json>) {
        let type_name = type_name.into();
        self.handlers.insert(type_name.clone(), handler);
        if let Some(schema) = schema {
            self.schemas.insert(type_name, schema);
        }
    }

    /// Remove a previously registered extension effect (pack unload).
    pub fn unregister(&mut self, type_name: &str) {
        self.handlers.remove(type_name);
        self.schemas.remove(type_name);
    }

    pub fn get(&self, type_name: &str) -> Option<&EffectHandler> {
        self.handlers.get(type_name)
    }

    pub fn schema(&self, type_name: &str) -> Option<&Json> {
        self.schemas.get(type_name)
    }

    pub fn is_registered(&self, type_name: &str) -> bool {
        self.handlers.contains_key(type_name)
    }

    /// Whether `effect` can be dispatched: built-ins always can; extension
    /// effects require a registered handler. Used by the policy compiler
    /// to fail compilation fast on a missing handler rather than letting
    /// it surface only at execution time.
    pub fn can_dispatch(&self, effect: &Effect) -> bool {
        match effect {
            Effect::Extension { .. } => self.is_registered(&effect.type_name()),
            _ => true,
        }
    }
}

/// Action Registry: action type string → handler + declared risk level +
/// optional parameter schema.
#[derive(Default)]
pub struct ActionRegistry {
    handlers: HashMap<String, ActionHandler>,
    risk_levels: HashMap<String, RiskLevel>,
    schemas: HashMap<String, Json>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        action_type: impl Into<String>,
        risk_level: RiskLevel,
        handler: ActionHandler,
        schema: Option<Json>,
    ) {
        let action_type = action_type.into();
        self.handlers.insert(action_type.clone(), handler);
        self.risk_levels.insert(action_type.clone(), risk_level);
        if let Some(schema) = schema {
            self.schemas.insert(action_type, schema);
        }
    }

    pub fn unregister(&mut self, action_type: &str) {
        self.handlers.remove(action_type);
        self.risk_levels.remove(action_type);
        self.schemas.remove(action_type);
    }

    pub fn get(&self, action_type: &str) -> Option<&ActionHandler> {
        self.handlers.get(action_type)
    }

    /// Risk level declared for `action_type`. Escalation-only — an agent's
    /// delegated `max_risk_level` is compared against this value, never
    /// the other way around.
    pub fn risk_level(&self, action_type: &str) -> Option<RiskLevel> {
        self.risk_levels.get(action_type).copied()
    }

    pub fn schema(&self, action_type: &str) -> Option<&Json> {
        self.schemas.get(action_type)
    }

    pub fn is_registered(&self, action_type: &str) -> bool {
        self.handlers.contains_key(action_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::boxed::Box;

    #[test]
    fn effect_registry_round_trips() {
        let mut registry = EffectRegistry::new();
        assert!(!registry.is_registered("pack:fitness:recalc"));
        registry.register(
            "pack:fitness:recalc",
            Box::new(|_params, _ctx| Ok(())),
            Some(Json::Null),
        );
        assert!(registry.is_registered("pack:fitness:recalc"));
        registry.unregister("pack:fitness:recalc");
        assert!(!registry.is_registered("pack:fitness:recalc"));
    }

    #[test]
    fn built_in_effects_always_dispatchable() {
        let registry = EffectRegistry::new();
        let effect = Effect::Log {
            level: crate::types::LogLevel::Info,
            message: "hi".into(),
        };
        assert!(registry.can_dispatch(&effect));
    }

    #[test]
    fn extension_effect_requires_registration() {
        let registry = EffectRegistry::new();
        let effect = Effect::Extension {
            pack: "fitness".into(),
            name: "recalc".into(),
            payload: Json::Null,
        };
        assert!(!registry.can_dispatch(&effect));
    }

    #[test]
    fn action_registry_tracks_risk_level() {
        let mut registry = ActionRegistry::new();
        registry.register(
            "send_email",
            RiskLevel::Medium,
            Box::new(|_intent, _ctx| Ok(Json::Null)),
            None,
        );
        assert_eq!(registry.risk_level("send_email"), Some(RiskLevel::Medium));
        assert_eq!(registry.risk_level("unknown"), None);
    }
}
