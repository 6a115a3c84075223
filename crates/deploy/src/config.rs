//! Project configuration as written in `Chainrig.toml`.
//!
//! The file is layered with `CHAINRIG_*` environment variables, nested keys
//! separated by `__` (e.g. `CHAINRIG_NETWORKS__BASE__URL`).

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::{Deserialize, Serialize};

use crate::{ConfigError, ProxyKind, explorer::ExplorerConfig};

/// The default name for the project configuration file.
pub const CONFIG_FILENAME: &str = "Chainrig.toml";

/// Prefix of environment variables overriding the configuration file.
pub const ENV_PREFIX: &str = "CHAINRIG_";

/// Network settings as written in the configuration file.
///
/// Durations are in milliseconds, mirroring the usual framework config keys.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// JSON-RPC endpoint.
    pub url: Option<String>,
    /// File holding the hex-encoded signing key.
    pub key_file: Option<PathBuf>,
    /// Environment variable holding the hex-encoded signing key.
    pub key_env: Option<String>,
    /// Expected chain id; checked on connect when set.
    pub chain_id: Option<u64>,
    /// Fixed gas limit per transaction.
    pub gas: Option<u64>,
    /// Fixed gas price in wei.
    pub gas_price: Option<u128>,
    pub network_check_timeout: Option<u64>,
    pub timeout_blocks: Option<u64>,
    pub confirmations: Option<u64>,
    /// `0` waits forever.
    pub confirmation_timeout: Option<u64>,
    pub polling_interval: Option<u64>,
}

/// Settings applied to every network that doesn't override them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Defaults {
    pub key_file: Option<PathBuf>,
    pub key_env: Option<String>,
}

/// Names of the proxy artifacts used to wrap implementations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyArtifacts {
    pub uups: String,
    pub transparent: String,
}

impl Default for ProxyArtifacts {
    fn default() -> Self {
        Self {
            uups: "ERC1967Proxy".to_string(),
            transparent: "TransparentUpgradeableProxy".to_string(),
        }
    }
}

impl ProxyArtifacts {
    /// The artifact name of the proxy contract for `kind`.
    pub fn for_kind(&self, kind: ProxyKind) -> &str {
        match kind {
            ProxyKind::Uups => &self.uups,
            ProxyKind::Transparent => &self.transparent,
        }
    }
}

/// Root of `Chainrig.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Directory holding compiled contract artifacts.
    #[serde(default = "default_artifacts_dir")]
    pub artifacts: PathBuf,
    /// Directory holding deployment records.
    #[serde(default = "default_records_dir")]
    pub records: PathBuf,
    #[serde(default)]
    pub defaults: Defaults,
    #[serde(default)]
    pub proxy_artifacts: ProxyArtifacts,
    #[serde(default)]
    pub networks: BTreeMap<String, NetworkConfig>,
    #[serde(default)]
    pub etherscan: ExplorerConfig,
}

fn default_artifacts_dir() -> PathBuf {
    PathBuf::from("artifacts")
}

fn default_records_dir() -> PathBuf {
    PathBuf::from("deployments")
}

impl ProjectConfig {
    /// Load the configuration from a file, layered with `CHAINRIG_*` env overrides.
    ///
    /// If `path` is a directory, `Chainrig.toml` inside it is used.
    pub fn load_from_file(path: &Path) -> Result<(Self, PathBuf), ConfigError> {
        let config_path = if path.is_dir() {
            path.join(CONFIG_FILENAME)
        } else {
            path.to_path_buf()
        };

        let figment = Figment::new()
            .merge(Toml::file_exact(&config_path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));
        let config = Self::from_figment(figment)?;

        let base_dir = config_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();

        tracing::debug!(path = %config_path.display(), networks = config.networks.len(), "Configuration loaded");
        Ok((config, base_dir))
    }

    /// Extract the configuration from an arbitrary figment.
    pub fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        figment.extract().map_err(|e| ConfigError::Load(Box::new(e)))
    }

    /// Parse the configuration from a TOML string, without env overrides.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Self::from_figment(Figment::new().merge(Toml::string(content)))
    }
}
