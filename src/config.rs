//! Process launch configuration parsing and validation.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::{AppError, Result};

/// Engine executable used when no command is configured.
pub const DEFAULT_COMMAND: &str = "magma";

/// Arguments always passed to the engine, ahead of any configured extras.
///
/// `-x` selects the tagged-line output protocol, `-n` skips the user start-up
/// file and `-b` suppresses the banner.
pub const DEFAULT_ARGS: &[&str] = &["-x", "-n", "-b"];

fn default_status_buffer() -> usize {
    64
}

fn default_event_buffer() -> usize {
    32
}

/// Launch descriptor for an engine process.
///
/// Every field is optional; an empty TOML document yields a configuration
/// that runs [`DEFAULT_COMMAND`] with [`DEFAULT_ARGS`] in the inherited
/// environment.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ProcessConfig {
    /// Executable to launch. Any command on the current `PATH` is accepted.
    #[serde(default)]
    pub command: Option<String>,
    /// Extra arguments appended after [`DEFAULT_ARGS`].
    #[serde(default)]
    pub args: Vec<String>,
    /// Replacement environment. When absent the parent environment is
    /// inherited; when present the child sees exactly these variables.
    #[serde(default)]
    pub env: Option<BTreeMap<String, String>>,
    /// Capacity of the session-wide status channel.
    #[serde(default = "default_status_buffer")]
    pub status_buffer: usize,
    /// Capacity of each per-response event channel.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            command: None,
            args: Vec::new(),
            env: None,
            status_buffer: default_status_buffer(),
            event_buffer: default_event_buffer(),
        }
    }
}

impl ProcessConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse and validate configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Executable that [`Process::start`](crate::proc::Process::start) launches.
    #[must_use]
    pub fn executable(&self) -> &str {
        self.command.as_deref().unwrap_or(DEFAULT_COMMAND)
    }

    /// Full argument list: [`DEFAULT_ARGS`] followed by the configured extras.
    #[must_use]
    pub fn arguments(&self) -> Vec<String> {
        DEFAULT_ARGS
            .iter()
            .map(|arg| (*arg).to_owned())
            .chain(self.args.iter().cloned())
            .collect()
    }

    /// Check the configuration for values the process core cannot use.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` for an empty command, an empty environment
    /// variable name, or a zero channel capacity.
    pub fn validate(&self) -> Result<()> {
        if self
            .command
            .as_deref()
            .is_some_and(|command| command.trim().is_empty())
        {
            return Err(AppError::Config("command must not be empty".into()));
        }

        if let Some(env) = &self.env {
            if env.keys().any(|key| key.is_empty() || key.contains('=')) {
                return Err(AppError::Config(
                    "env variable names must be non-empty and must not contain '='".into(),
                ));
            }
        }

        if self.status_buffer == 0 || self.event_buffer == 0 {
            return Err(AppError::Config(
                "status_buffer and event_buffer must be greater than zero".into(),
            ));
        }

        Ok(())
    }
}
