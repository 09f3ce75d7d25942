//! Configuration management for Turnstile.
//!
//! Settings are layered: serde defaults, then an optional YAML file, then
//! `TURNSTILE_*` environment variables (nested keys separated by `__`, e.g.
//! `TURNSTILE_POLICY__CAPACITY=20`).

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;

use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use serde_yaml::Value;

use crate::error::{Result, TurnstileError};

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "TURNSTILE";

/// Main configuration for the Turnstile service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_addr")]
    pub addr: SocketAddr,

    /// `tracing` filter directive, overridden by `RUST_LOG` when set
    #[serde(default = "default_log_filter")]
    pub log_filter: String,

    /// Emit JSON log lines instead of human-readable ones
    #[serde(default)]
    pub log_json: bool,

    /// Interval between idle-state sweeps, in seconds. Zero disables sweeping.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Flat policy map handed to the limiter factory
    #[serde(default)]
    pub policy: HashMap<String, String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: default_addr(),
            log_filter: default_log_filter(),
            log_json: false,
            sweep_interval_secs: default_sweep_interval(),
            policy: HashMap::new(),
        }
    }
}

fn default_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

fn default_log_filter() -> String {
    "info".to_string()
}

fn default_sweep_interval() -> u64 {
    60
}

impl ServerConfig {
    /// Load configuration from an optional YAML file plus the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).format(FileFormat::Yaml).required(true));
        }
        Self::finish(builder)
    }

    /// Load configuration from YAML text plus the environment.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        Self::finish(Config::builder().add_source(File::from_str(yaml, FileFormat::Yaml)))
    }

    fn finish(builder: config::ConfigBuilder<config::builder::DefaultState>) -> Result<Self> {
        builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()
            .and_then(Config::try_deserialize)
            .map_err(|e| TurnstileError::Configuration(e.to_string()))
    }
}

/// Read a policy map from a YAML file.
pub fn load_policy_file(path: &Path) -> Result<HashMap<String, String>> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
        TurnstileError::Configuration(format!("cannot read {}: {}", path.display(), e))
    })?;
    policy_from_yaml(&contents)
}

/// Parse a policy map from YAML text.
///
/// The document must be a mapping of scalar values. Numbers and booleans are
/// kept in their textual form so the factory validates them uniformly.
pub fn policy_from_yaml(yaml: &str) -> Result<HashMap<String, String>> {
    let document: Value =
        serde_yaml::from_str(yaml).map_err(|e| TurnstileError::Configuration(e.to_string()))?;
    let Value::Mapping(mapping) = document else {
        return Err(TurnstileError::Configuration(
            "policy file must contain a mapping".to_string(),
        ));
    };

    mapping
        .into_iter()
        .map(|(key, value)| {
            let key = scalar(key)
                .ok_or_else(|| TurnstileError::Configuration("policy keys must be scalars".to_string()))?;
            let value = scalar(value).ok_or_else(|| TurnstileError::field(&key, "must be a scalar"))?;
            Ok((key, value))
        })
        .collect()
}

fn scalar(value: Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
