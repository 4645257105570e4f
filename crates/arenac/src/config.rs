use std::env;
use std::{fs, io, path::Path};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::codegen::{AssembleOptions, EmissionPolicy};
use crate::plan::MemoryOptions;
use crate::registry::DEFAULT_HEADER;

pub const ENV_EAGER: &str = "ARENAC_EAGER";
pub const ENV_ARENA_LIMIT: &str = "ARENAC_ARENA_LIMIT";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("alignment {0} is not a power of two")]
    InvalidAlignment(usize),
    #[error("max_pending must be at least 1")]
    InvalidMaxPending,
    #[error("{field} '{value}' is not a valid C identifier")]
    InvalidIdentifier { field: &'static str, value: String },
    #[error("environment variable {var}='{value}' is invalid")]
    InvalidEnv { var: &'static str, value: String },
}

/// Settings of one compilation, loadable from JSON with every field optional.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodegenConfig {
    /// Prefix of the generated entry point; defaults to the sanitized graph name.
    pub model_name: Option<String>,
    pub arena_limit: Option<usize>,
    pub alignment: usize,
    pub emission: EmissionPolicy,
    pub max_pending: Option<usize>,
    pub runtime_header: String,
    pub context_var: String,
}

impl Default for CodegenConfig {
    fn default() -> Self {
        Self {
            model_name: None,
            arena_limit: None,
            alignment: 4,
            emission: EmissionPolicy::Lazy,
            max_pending: None,
            runtime_header: DEFAULT_HEADER.to_string(),
            context_var: "ctx".to_string(),
        }
    }
}

fn parse_bool(value: &str) -> bool {
    let normalized = value.trim().to_ascii_lowercase();
    matches!(normalized.as_str(), "1" | "true" | "yes" | "on")
}

fn is_identifier(value: &str) -> bool {
    let mut chars = value.chars();
    matches!(chars.next(), Some(ch) if ch.is_ascii_alphabetic() || ch == '_')
        && chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
}

impl CodegenConfig {
    pub fn from_json_str(src: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(src)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_json<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.alignment.is_power_of_two() {
            return Err(ConfigError::InvalidAlignment(self.alignment));
        }
        if self.max_pending == Some(0) {
            return Err(ConfigError::InvalidMaxPending);
        }
        if let Some(name) = &self.model_name {
            if !is_identifier(name) {
                return Err(ConfigError::InvalidIdentifier {
                    field: "model_name",
                    value: name.clone(),
                });
            }
        }
        if !is_identifier(&self.context_var) {
            return Err(ConfigError::InvalidIdentifier {
                field: "context_var",
                value: self.context_var.clone(),
            });
        }
        Ok(())
    }

    /// Applies `ARENAC_EAGER` and `ARENAC_ARENA_LIMIT` from the process environment.
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_overrides_from(|var| env::var(var).ok())
    }

    pub fn with_overrides_from<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        match lookup(ENV_EAGER) {
            Some(value) if !value.trim().is_empty() => {
                if parse_bool(&value) {
                    self.emission = EmissionPolicy::Eager;
                }
            }
            _ => {}
        }
        if let Some(value) = lookup(ENV_ARENA_LIMIT) {
            let limit = value
                .trim()
                .parse::<usize>()
                .map_err(|_| ConfigError::InvalidEnv {
                    var: ENV_ARENA_LIMIT,
                    value: value.clone(),
                })?;
            self.arena_limit = Some(limit);
        }
        Ok(self)
    }

    pub fn memory_options(&self) -> MemoryOptions {
        MemoryOptions {
            arena_limit: self.arena_limit,
            alignment: self.alignment,
        }
    }

    pub fn assemble_options(&self) -> AssembleOptions {
        AssembleOptions {
            policy: self.emission,
            max_pending: self.max_pending,
        }
    }
}
