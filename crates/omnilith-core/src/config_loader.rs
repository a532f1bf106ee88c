// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Omnilith Project

//! Configuration loader for the runtime kernel.
//!
//! Supports two load strategies:
//!
//! 1. **TOML file** — [`load_config`] reads and deserialises a TOML file
//!    into an [`OmnilithConfig`] struct.
//! 2. **Environment variables** — [`load_config_from_env`] reads
//!    `OMNILITH_`-prefixed environment variables.
//!
//! Both loaders are only available when the `config-loader` feature is
//! active, which implies `std`.
//!
//! # File format
//!
//! ```toml
//! policy_timeout_ms                = 5000
//! action_timeout_ms                = 30000
//! force_synthetic_origin_on_route   = false
//! observation_query_hard_cap        = 1000
//! ```
//!
//! # Environment variables
//!
//! | Variable                                     | Type    | Default |
//! |-----------------------------------------------|---------|---------|
//! | `OMNILITH_POLICY_TIMEOUT_MS`                   | integer | 5000    |
//! | `OMNILITH_ACTION_TIMEOUT_MS`                   | integer | 30000   |
//! | `OMNILITH_FORCE_SYNTHETIC_ORIGIN_ON_ROUTE`     | boolean | false   |
//! | `OMNILITH_OBSERVATION_QUERY_HARD_CAP`          | integer | 1000    |

#![cfg(feature = "config-loader")]

use std::fmt;
use std::fs;
use std::num::ParseIntError;

use serde::{Deserialize, Serialize};

use crate::config::Config;

// ---------------------------------------------------------------------------
// OmnilithConfig
// ---------------------------------------------------------------------------

/// Flat configuration struct for loading from TOML files or environment
/// variables, kept distinct from the engine-internal [`Config`] so the
/// serialisation surface can evolve independently.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OmnilithConfig {
    #[serde(default = "default_policy_timeout_ms")]
    pub policy_timeout_ms: i64,

    #[serde(default = "default_action_timeout_ms")]
    pub action_timeout_ms: i64,

    #[serde(default)]
    pub force_synthetic_origin_on_route: bool,

    #[serde(default = "default_observation_query_hard_cap")]
    pub observation_query_hard_cap: usize,
}

fn default_policy_timeout_ms() -> i64 {
    5_000
}
fn default_action_timeout_ms() -> i64 {
    30_000
}
fn default_observation_query_hard_cap() -> usize {
    1000
}

impl Default for OmnilithConfig {
    fn default() -> Self {
        Self {
            policy_timeout_ms: default_policy_timeout_ms(),
            action_timeout_ms: default_action_timeout_ms(),
            force_synthetic_origin_on_route: false,
            observation_query_hard_cap: default_observation_query_hard_cap(),
        }
    }
}

impl From<OmnilithConfig> for Config {
    fn from(loaded: OmnilithConfig) -> Self {
        Self {
            policy_timeout_ms: loaded.policy_timeout_ms,
            action_timeout_ms: loaded.action_timeout_ms,
            force_synthetic_origin_on_route: loaded.force_synthetic_origin_on_route,
            observation_query_hard_cap: loaded.observation_query_hard_cap,
            ..Config::default()
        }
    }
}

// ---------------------------------------------------------------------------
// ConfigError
// ---------------------------------------------------------------------------

/// Errors that can occur while loading or parsing kernel configuration.
#[derive(Debug)]
pub enum ConfigError {
    FileRead { path: String, source: std::io::Error },
    TomlParse { source: toml::de::Error },
    ParseField { field: String, value: String, reason: String },
    InvalidRange { field: String, value: String, reason: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::FileRead { path, source } => {
                write!(f, "Failed to read config file \"{path}\": {source}")
            }
            ConfigError::TomlParse { source } => write!(f, "Failed to parse TOML config: {source}"),
            ConfigError::ParseField { field, value, reason } => {
                write!(f, "Field \"{field}\": cannot parse \"{value}\" — {reason}")
            }
            ConfigError::InvalidRange { field, value, reason } => {
                write!(f, "Field \"{field}\": value \"{value}\" out of range — {reason}")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::FileRead { source, .. } => Some(source),
            ConfigError::TomlParse { source } => Some(source),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// TOML loader
// ---------------------------------------------------------------------------

/// Load an [`OmnilithConfig`] from a TOML file.
pub fn load_config(path: &str) -> Result<OmnilithConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::FileRead {
        path: path.to_owned(),
        source,
    })?;

    toml::from_str::<OmnilithConfig>(&content).map_err(|source| ConfigError::TomlParse { source })
}

// ---------------------------------------------------------------------------
// Environment variable loader
// ---------------------------------------------------------------------------

/// Load an [`OmnilithConfig`] from `OMNILITH_`-prefixed environment
/// variables. Unset variables fall back to their defaults.
pub fn load_config_from_env() -> Result<OmnilithConfig, ConfigError> {
    let policy_timeout_ms = read_env_i64("OMNILITH_POLICY_TIMEOUT_MS", default_policy_timeout_ms())?;
    if policy_timeout_ms <= 0 {
        return Err(ConfigError::InvalidRange {
            field: "OMNILITH_POLICY_TIMEOUT_MS".into(),
            value: policy_timeout_ms.to_string(),
            reason: "must be > 0".into(),
        });
    }

    let action_timeout_ms = read_env_i64("OMNILITH_ACTION_TIMEOUT_MS", default_action_timeout_ms())?;
    if action_timeout_ms <= 0 {
        return Err(ConfigError::InvalidRange {
            field: "OMNILITH_ACTION_TIMEOUT_MS".into(),
            value: action_timeout_ms.to_string(),
            reason: "must be > 0".into(),
        });
    }

    let force_synthetic_origin_on_route =
        read_env_bool("OMNILITH_FORCE_SYNTHETIC_ORIGIN_ON_ROUTE", false)?;

    let observation_query_hard_cap = read_env_usize(
        "OMNILITH_OBSERVATION_QUERY_HARD_CAP",
        default_observation_query_hard_cap(),
    )?;

    Ok(OmnilithConfig {
        policy_timeout_ms,
        action_timeout_ms,
        force_synthetic_origin_on_route,
        observation_query_hard_cap,
    })
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

fn read_env_i64(key: &str, default: i64) -> Result<i64, ConfigError> {
    match std::env::var(key) {
        Ok(val) => val.trim().parse::<i64>().map_err(|source: ParseIntError| ConfigError::ParseField {
            field: key.to_owned(),
            value: val,
            reason: source.to_string(),
        }),
        Err(_) => Ok(default),
    }
}

fn read_env_usize(key: &str, default: usize) -> Result<usize, ConfigError> {
    match std::env::var(key) {
        Ok(val) => val.trim().parse::<usize>().map_err(|source: ParseIntError| ConfigError::ParseField {
            field: key.to_owned(),
            value: val,
            reason: source.to_string(),
        }),
        Err(_) => Ok(default),
    }
}

fn read_env_bool(key: &str, default: bool) -> Result<bool, ConfigError> {
    match std::env::var(key) {
        Ok(val) => match val.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(true),
            "false" | "0" | "no" | "off" => Ok(false),
            other => Err(ConfigError::ParseField {
                field: key.to_owned(),
                value: other.to_owned(),
                reason: "expected one of: true/false, 1/0, yes/no, on/off".into(),
            }),
        },
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_config_defaults() {
        let loaded = OmnilithConfig::default();
        let config: Config = loaded.into();
        assert_eq!(config.policy_timeout_ms, 5_000);
        assert_eq!(config.action_timeout_ms, 30_000);
    }

    #[test]
    fn toml_parse_roundtrip() {
        let toml_src = "policy_timeout_ms = 2500\naction_timeout_ms = 15000\n";
        let parsed: OmnilithConfig = toml::from_str(toml_src).unwrap();
        assert_eq!(parsed.policy_timeout_ms, 2500);
        assert_eq!(parsed.action_timeout_ms, 15000);
        assert!(!parsed.force_synthetic_origin_on_route);
    }
}
