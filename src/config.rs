//! Daemon configuration.
//!
//! Sources, highest priority first:
//! 1. `SCRUBBUDDY_*` environment variables
//! 2. `scrubbuddy.toml` in the working directory
//! 3. Built-in defaults
//!
//! Every field is optional; an empty environment yields a daemon that waits
//! for `workspace.select` and `auth.signIn` over IPC.

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const CONFIG_FILE_NAME: &str = "scrubbuddy.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("configuration error: {0}")]
    Figment(#[from] figment::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Config {
    /// Opened at startup as if `workspace.select` had been called.
    #[serde(default)]
    pub workspace: Option<PathBuf>,
    /// `tracing` filter directive, overridden by `RUST_LOG`.
    #[serde(default = "default_log")]
    pub log: String,
    /// Signed in at startup once the workspace is open.
    #[serde(default)]
    pub default_user: Option<String>,
}

fn default_log() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workspace: None,
            log: default_log(),
            default_user: None,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        Self::figment().extract().map_err(ConfigError::from)
    }

    pub fn figment() -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        let local = PathBuf::from(CONFIG_FILE_NAME);
        if local.exists() {
            figment = figment.merge(Toml::file(local));
        }
        figment.merge(Env::prefixed("SCRUBBUDDY_"))
    }
}
