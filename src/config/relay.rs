//! Relay configuration
//!
//! Optional TOML file whose values sit underneath the command line flags.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::server::ServerConfig;

pub const DEFAULT_BIND: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8080;

/// Errors that can occur during config operations
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Read(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Settings read from a config file or the command line
///
/// Every field is optional so that two layers can be merged; unset fields
/// fall back to the defaults above.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RelayConfig {
    /// Address to bind to
    pub bind: Option<String>,
    /// Port to listen on
    pub port: Option<u16>,
    /// Include recipient counts in push/broadcast replies
    pub report_delivery: Option<bool>,
}

impl RelayConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Layer `other` on top of `self`; values set in `other` win
    pub fn overlay(self, other: RelayConfig) -> Self {
        Self {
            bind: other.bind.or(self.bind),
            port: other.port.or(self.port),
            report_delivery: other.report_delivery.or(self.report_delivery),
        }
    }

    pub fn into_server_config(self) -> ServerConfig {
        ServerConfig::new(
            self.bind.unwrap_or_else(|| DEFAULT_BIND.to_string()),
            self.port.unwrap_or(DEFAULT_PORT),
        )
        .with_report_delivery(self.report_delivery.unwrap_or(false))
    }
}
