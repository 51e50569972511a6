use std::fs;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

use crate::domain::{AddrManConfig, NetworkMagic};
use crate::ports::ConfigProvider;

// ============================================================================
// StaticConfigProvider - Hardcoded config for testing/development
// ============================================================================

/// Static configuration provider with hardcoded values.
///
/// Useful for testing and development. For production, use `TomlConfigProvider`.
#[derive(Debug, Clone, Default)]
pub struct StaticConfigProvider {
    config: AddrManConfig,
    seeds: Vec<SocketAddr>,
    source: Option<IpAddr>,
    peers_file: Option<PathBuf>,
}

impl StaticConfigProvider {
    /// Create with default policy, no seeds and no peers file.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_config(mut self, config: AddrManConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn with_seeds(mut self, seeds: Vec<SocketAddr>, source: Option<IpAddr>) -> Self {
        self.seeds = seeds;
        self.source = source;
        self
    }

    #[must_use]
    pub fn with_peers_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.peers_file = Some(path.into());
        self
    }
}

impl ConfigProvider for StaticConfigProvider {
    fn addrman_config(&self) -> AddrManConfig {
        self.config.clone()
    }

    fn bootstrap_seeds(&self) -> Vec<SocketAddr> {
        self.seeds.clone()
    }

    fn bootstrap_source(&self) -> Option<IpAddr> {
        self.source
    }

    fn peers_file(&self) -> Option<PathBuf> {
        self.peers_file.clone()
    }
}

// ============================================================================
// TomlConfigProvider - Production Config Loading
// ============================================================================

/// Errors that can occur during config loading.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {error}")]
    Io { path: String, error: String },

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("unknown network {0:?} (expected mainnet, testnet or regtest)")]
    UnknownNetwork(String),

    #[error("invalid bootstrap source {0:?}")]
    InvalidSource(String),
}

/// Configuration file structure.
#[derive(Debug, Deserialize, Default)]
struct ConfigFile {
    #[serde(default)]
    addrman: AddrManSection,
    #[serde(default)]
    bootstrap: BootstrapSection,
}

#[derive(Debug, Deserialize, Default)]
struct AddrManSection {
    network: Option<String>,
    allow_non_routable: Option<bool>,
    consistency_checks: Option<bool>,
    peers_file: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct BootstrapSection {
    #[serde(default)]
    seeds: Vec<String>,
    source: Option<String>,
}

/// TOML-based configuration provider.
///
/// # Config File Format
///
/// ```toml
/// [addrman]
/// network = "mainnet"
/// allow_non_routable = false
/// consistency_checks = false
/// peers_file = "/var/lib/node/peers.dat"
///
/// [bootstrap]
/// seeds = ["203.0.113.10:8333", "[2001:db8::1]:8333"]
/// source = "203.0.113.10"
/// ```
///
/// Every key is optional; missing keys fall back to `AddrManConfig::default()`.
#[derive(Debug, Clone)]
pub struct TomlConfigProvider {
    config: AddrManConfig,
    seeds: Vec<SocketAddr>,
    source: Option<IpAddr>,
    peers_file: Option<PathBuf>,
}

impl TomlConfigProvider {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns error if file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io {
            path: path.as_ref().display().to_string(),
            error: e.to_string(),
        })?;

        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;

        let defaults = AddrManConfig::default();
        let section = file.addrman;
        let network_magic = match section.network {
            Some(name) => {
                NetworkMagic::from_name(&name).ok_or(ConfigError::UnknownNetwork(name))?
            }
            None => defaults.network_magic,
        };
        let config = AddrManConfig {
            allow_non_routable: section
                .allow_non_routable
                .unwrap_or(defaults.allow_non_routable),
            consistency_checks: section
                .consistency_checks
                .unwrap_or(defaults.consistency_checks),
            network_magic,
        };

        // Malformed seeds are skipped rather than failing the whole file.
        let seeds = file
            .bootstrap
            .seeds
            .iter()
            .filter_map(|seed| match seed.parse::<SocketAddr>() {
                Ok(addr) => Some(addr),
                Err(_) => {
                    warn!("[qc-01] Ignoring malformed bootstrap seed {:?}", seed);
                    None
                }
            })
            .collect();

        let source = file
            .bootstrap
            .source
            .map(|s| s.parse::<IpAddr>().map_err(|_| ConfigError::InvalidSource(s)))
            .transpose()?;

        Ok(Self {
            config,
            seeds,
            source,
            peers_file: section.peers_file,
        })
    }
}

impl ConfigProvider for TomlConfigProvider {
    fn addrman_config(&self) -> AddrManConfig {
        self.config.clone()
    }

    fn bootstrap_seeds(&self) -> Vec<SocketAddr> {
        self.seeds.clone()
    }

    fn bootstrap_source(&self) -> Option<IpAddr> {
        self.source
    }

    fn peers_file(&self) -> Option<PathBuf> {
        self.peers_file.clone()
    }
}
