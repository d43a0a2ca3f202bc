//! Core configuration management for `ethercore.toml`.
//!
//! # Sections
//!
//! | Section      | Purpose                                               |
//! |--------------|-------------------------------------------------------|
//! | `[provider]` | Execution environment and node endpoints              |
//! | `[compile]`  | Compile-on-save toggle, compiler binary override      |
//!
//! The configuration is externally owned: the core observes it (initial
//! value and changes, via [`watch`]) and never mutates it. The initial
//! delivery is handled through the exact same path as a later change.

mod error;
mod handle;
pub mod watch;

pub use error::ConfigError;
pub use handle::ConfigHandle;

use crate::log;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

// ============================================================================
// root configuration
// ============================================================================

/// Root configuration structure representing ethercore.toml
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Absolute path to the config file (internal use only)
    #[serde(skip)]
    pub config_path: PathBuf,

    /// Workspace root directory (internal use only)
    #[serde(skip)]
    pub root: PathBuf,

    /// Provider settings (execution environment, endpoints)
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Compile settings
    #[serde(default)]
    pub compile: CompileConfig,
}

/// Which environment compiles and runs contracts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionEnv {
    /// In-process sandbox; no node connection is made.
    #[default]
    Local,
    /// External node reached through the configured endpoints.
    Network,
}

/// `[provider]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Execution environment gate for every network subscription.
    pub execution: ExecutionEnv,

    /// HTTP JSON-RPC endpoint.
    pub rpc_address: String,

    /// Streaming websocket endpoint. Preferred over `rpc_address` for the
    /// provider connection when both are configured.
    pub websocket_address: Option<String>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            execution: ExecutionEnv::Local,
            rpc_address: "http://localhost:8545".into(),
            websocket_address: None,
        }
    }
}

/// `[compile]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompileConfig {
    /// Compile every source save while connected to a provider.
    pub on_save: bool,

    /// Compiler binary override; `solc` is located on PATH otherwise.
    pub solc_path: Option<String>,
}

impl Default for CompileConfig {
    fn default() -> Self {
        Self {
            on_save: true,
            solc_path: None,
        }
    }
}

impl CoreConfig {
    /// Load configuration from a file, falling back to defaults when the
    /// file does not exist.
    pub fn load(path: &Path, root: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            log!("config"; "no {} found, using defaults", path.display());
            let mut config = Self::default();
            config.config_path = path.to_path_buf();
            config.root = root.to_path_buf();
            return Ok(config);
        }

        let content =
            fs::read_to_string(path).map_err(|err| ConfigError::Io(path.to_path_buf(), err))?;
        let mut config = Self::parse(&content)?;
        config.config_path = path.to_path_buf();
        config.root = root.to_path_buf();
        Ok(config)
    }

    /// Parse and validate configuration from TOML content, warning about
    /// unknown fields.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let (config, ignored) = Self::parse_with_ignored(content)?;

        if !ignored.is_empty() {
            log!("warning"; "unknown config fields, ignoring:");
            for field in &ignored {
                eprintln!("- {field}");
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Parse TOML content, collecting any unknown fields.
    fn parse_with_ignored(content: &str) -> Result<(Self, Vec<String>), ConfigError> {
        let mut ignored = Vec::new();
        let deserializer = toml::Deserializer::new(content);
        let config = serde_ignored::deserialize(deserializer, |path: serde_ignored::Path| {
            ignored.push(path.to_string());
        })?;
        Ok((config, ignored))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let rpc = url::Url::parse(&self.provider.rpc_address).map_err(|err| {
            ConfigError::Validation(format!(
                "provider.rpc_address `{}` is not a valid URL: {err}",
                self.provider.rpc_address
            ))
        })?;
        if !matches!(rpc.scheme(), "http" | "https") {
            return Err(ConfigError::Validation(format!(
                "provider.rpc_address must be http(s), got `{}`",
                rpc.scheme()
            )));
        }

        if let Some(ws) = &self.provider.websocket_address {
            let ws = url::Url::parse(ws).map_err(|err| {
                ConfigError::Validation(format!(
                    "provider.websocket_address `{ws}` is not a valid URL: {err}"
                ))
            })?;
            if !matches!(ws.scheme(), "ws" | "wss") {
                return Err(ConfigError::Validation(format!(
                    "provider.websocket_address must be ws(s), got `{}`",
                    ws.scheme()
                )));
            }
        }

        Ok(())
    }

    /// Whether the network-provider environment is selected.
    pub fn wants_network(&self) -> bool {
        self.provider.execution == ExecutionEnv::Network
    }

    /// Compiler binary path override, with `~` expanded.
    pub fn solc_override(&self) -> Option<PathBuf> {
        self.compile
            .solc_path
            .as_deref()
            .map(|path| PathBuf::from(shellexpand::tilde(path).as_ref()))
    }
}

// =============================================================================
// Tests
// =============================================================================
