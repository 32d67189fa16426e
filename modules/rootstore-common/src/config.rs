use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::info;

use crate::error::RootStoreError;
use crate::state::RootState;
use crate::utils::random_identifier;

/// Store configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Name used in log fields. Random when unset.
    pub name: String,
    /// Log every dispatched action at info level instead of trace.
    pub trace_actions: bool,
    /// Optional JSON file holding the initial root state.
    pub preloaded_state_path: Option<PathBuf>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            name: random_identifier(),
            trace_actions: false,
            preloaded_state_path: None,
        }
    }
}

impl StoreConfig {
    /// Load configuration from environment variables. Every variable is
    /// optional.
    pub fn from_env() -> Result<Self, RootStoreError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, RootStoreError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let trace_actions = match lookup("ROOTSTORE_TRACE_ACTIONS") {
            None => false,
            Some(raw) => parse_bool(&raw).ok_or_else(|| {
                RootStoreError::Config(format!(
                    "ROOTSTORE_TRACE_ACTIONS must be a boolean, got {raw:?}"
                ))
            })?,
        };

        Ok(Self {
            name: lookup("ROOTSTORE_NAME")
                .filter(|name| !name.is_empty())
                .unwrap_or_else(random_identifier),
            trace_actions,
            preloaded_state_path: lookup("ROOTSTORE_PRELOADED_STATE")
                .filter(|path| !path.is_empty())
                .map(PathBuf::from),
        })
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_trace_actions(mut self, trace_actions: bool) -> Self {
        self.trace_actions = trace_actions;
        self
    }

    pub fn with_preloaded_state_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.preloaded_state_path = Some(path.into());
        self
    }

    /// Read the preloaded state file, if one is configured.
    pub fn load_preloaded_state(&self) -> Result<Option<RootState>> {
        let Some(path) = self.preloaded_state_path.as_deref() else {
            return Ok(None);
        };
        let state = load_state_file(path)?;
        info!(store = %self.name, path = %path.display(), slices = state.len(), "Loaded preloaded state");
        Ok(Some(state))
    }
}

fn load_state_file(path: &Path) -> Result<RootState> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read preloaded state: {}", path.display()))?;
    let value: serde_json::Value = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse preloaded state: {}", path.display()))?;
    RootState::from_value(value)
        .with_context(|| format!("Invalid preloaded state: {}", path.display()))
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}
