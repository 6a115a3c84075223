//! Network registry: resolved, immutable connection profiles.

use std::{
    collections::{BTreeMap, HashMap},
    path::Path,
    time::Duration,
};

use url::Url;

use crate::{
    ConfigError,
    config::{NetworkConfig, ProjectConfig},
    secret::{KeySource, SigningKey},
};

const DEFAULT_NETWORK_CHECK_TIMEOUT_MS: u64 = 999_999;
const DEFAULT_TIMEOUT_BLOCKS: u64 = 200;
const DEFAULT_CONFIRMATIONS: u64 = 1;
const DEFAULT_POLLING_INTERVAL_MS: u64 = 1_000;

/// Fixed gas parameters. Unset values are queried from the node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GasPolicy {
    pub gas_limit: Option<u64>,
    pub gas_price: Option<u128>,
}

/// How long to wait on the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutPolicy {
    /// Maximum time to wait for the endpoint to answer on connect.
    pub network_check_timeout: Duration,
    /// Blocks to wait for a receipt before giving up.
    pub timeout_blocks: u64,
    /// Confirmation depth required before a transaction is final.
    pub confirmations: u64,
    /// Wall-clock bound on a confirmation; `None` waits forever.
    pub confirmation_timeout: Option<Duration>,
    pub polling_interval: Duration,
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self {
            network_check_timeout: Duration::from_millis(DEFAULT_NETWORK_CHECK_TIMEOUT_MS),
            timeout_blocks: DEFAULT_TIMEOUT_BLOCKS,
            confirmations: DEFAULT_CONFIRMATIONS,
            confirmation_timeout: None,
            polling_interval: Duration::from_millis(DEFAULT_POLLING_INTERVAL_MS),
        }
    }
}

/// Everything needed to talk to one network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkProfile {
    pub name: String,
    pub endpoint: Url,
    pub signing_key: SigningKey,
    pub chain_id: Option<u64>,
    pub gas: GasPolicy,
    pub timeouts: TimeoutPolicy,
}

impl NetworkProfile {
    /// The endpoint without path or query, safe to log.
    pub fn endpoint_host(&self) -> String {
        redact_endpoint(&self.endpoint)
    }
}

/// Strip path and query from an endpoint. Provider URLs carry API keys there.
pub fn redact_endpoint(url: &Url) -> String {
    match (url.host_str(), url.port()) {
        (Some(host), Some(port)) => format!("{}://{}:{}", url.scheme(), host, port),
        (Some(host), None) => format!("{}://{}", url.scheme(), host),
        _ => format!("{}://", url.scheme()),
    }
}

/// Immutable mapping from network name to profile.
#[derive(Debug, Clone, Default)]
pub struct NetworkRegistry {
    profiles: BTreeMap<String, NetworkProfile>,
}

impl NetworkRegistry {
    /// Build the registry, reading every referenced signing key once.
    ///
    /// Relative key paths are resolved against `base_dir`.
    pub fn from_config(config: &ProjectConfig, base_dir: &Path) -> Result<Self, ConfigError> {
        let mut keys: HashMap<KeySource, SigningKey> = HashMap::new();
        let mut profiles = BTreeMap::new();

        for (name, network) in &config.networks {
            let source = key_source(name, network, config, base_dir)?;

            let signing_key = match keys.get(&source) {
                Some(key) => key.clone(),
                None => {
                    let key = source.read().map_err(|reason| ConfigError::MissingSecret {
                        network: name.clone(),
                        source_desc: source.to_string(),
                        reason,
                    })?;
                    keys.insert(source, key.clone());
                    key
                }
            };

            let profile = build_profile(name, network, signing_key)?;
            tracing::debug!(
                network = %name,
                endpoint = %profile.endpoint_host(),
                chain_id = ?profile.chain_id,
                "Network profile loaded"
            );
            profiles.insert(name.clone(), profile);
        }

        Ok(Self { profiles })
    }

    /// Build a registry from already-resolved profiles.
    pub fn from_profiles(profiles: impl IntoIterator<Item = NetworkProfile>) -> Self {
        Self {
            profiles: profiles.into_iter().map(|p| (p.name.clone(), p)).collect(),
        }
    }

    /// Look up a profile by network name.
    pub fn get(&self, name: &str) -> Result<&NetworkProfile, ConfigError> {
        self.profiles
            .get(name)
            .ok_or_else(|| ConfigError::UnknownNetwork(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.profiles.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

fn key_source(
    name: &str,
    network: &NetworkConfig,
    config: &ProjectConfig,
    base_dir: &Path,
) -> Result<KeySource, ConfigError> {
    let (key_file, key_env) = match (&network.key_file, &network.key_env) {
        (None, None) => (&config.defaults.key_file, &config.defaults.key_env),
        explicit => explicit,
    };

    match (key_file, key_env) {
        (Some(_), Some(_)) => Err(ConfigError::InvalidProfile {
            network: name.to_string(),
            reason: "both key_file and key_env are set".to_string(),
        }),
        (Some(path), None) => Ok(KeySource::File(base_dir.join(path))),
        (None, Some(var)) => Ok(KeySource::Env(var.clone())),
        (None, None) => Err(ConfigError::InvalidProfile {
            network: name.to_string(),
            reason: "no signing key configured".to_string(),
        }),
    }
}

fn build_profile(
    name: &str,
    network: &NetworkConfig,
    signing_key: SigningKey,
) -> Result<NetworkProfile, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidProfile {
        network: name.to_string(),
        reason,
    };

    let url = network
        .url
        .as_deref()
        .filter(|u| !u.trim().is_empty())
        .ok_or_else(|| invalid("missing endpoint url".to_string()))?;
    let endpoint = Url::parse(url).map_err(|e| invalid(format!("invalid endpoint url: {e}")))?;

    if network.polling_interval == Some(0) {
        return Err(invalid("polling_interval must be positive".to_string()));
    }
    if network.network_check_timeout == Some(0) {
        return Err(invalid("network_check_timeout must be positive".to_string()));
    }

    let defaults = TimeoutPolicy::default();
    let timeouts = TimeoutPolicy {
        network_check_timeout: network
            .network_check_timeout
            .map(Duration::from_millis)
            .unwrap_or(defaults.network_check_timeout),
        timeout_blocks: network.timeout_blocks.unwrap_or(defaults.timeout_blocks),
        confirmations: network
            .confirmations
            .unwrap_or(defaults.confirmations)
            .max(1),
        confirmation_timeout: network
            .confirmation_timeout
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis),
        polling_interval: network
            .polling_interval
            .map(Duration::from_millis)
            .unwrap_or(defaults.polling_interval),
    };

    Ok(NetworkProfile {
        name: name.to_string(),
        endpoint,
        signing_key,
        chain_id: network.chain_id,
        gas: GasPolicy {
            gas_limit: network.gas,
            gas_price: network.gas_price,
        },
        timeouts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempdir::TempDir;

    const DEV_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    fn write_secret(dir: &TempDir) {
        std::fs::write(dir.path().join(".secret"), DEV_KEY).unwrap();
    }

    #[test]
    fn test_resolves_profiles_with_defaults() {
        let dir = TempDir::new("chainrig-registry").unwrap();
        write_secret(&dir);

        let config = ProjectConfig::from_toml_str(
            r#"
            [defaults]
            key_file = ".secret"

            [networks.base]
            url = "https://base-mainnet.example/v2/secret-api-key"
            chain_id = 8453
            gas = 12400000
            gas_price = 12384160
            timeout_blocks = 200

            [networks.local]
            url = "http://0.0.0.0:8545/"
            confirmation_timeout = 0
            "#,
        )
        .unwrap();

        let registry = NetworkRegistry::from_config(&config, dir.path()).unwrap();
        assert_eq!(registry.len(), 2);

        let base = registry.get("base").unwrap();
        assert_eq!(base.chain_id, Some(8453));
        assert_eq!(base.gas.gas_limit, Some(12_400_000));
        assert_eq!(base.gas.gas_price, Some(12_384_160));
        assert_eq!(base.endpoint_host(), "https://base-mainnet.example");

        let local = registry.get("local").unwrap();
        assert_eq!(local.timeouts, TimeoutPolicy::default());
        assert_eq!(local.endpoint_host(), "http://0.0.0.0:8545");
        assert_eq!(local.signing_key, base.signing_key);
    }

    #[test]
    fn test_unknown_network() {
        let registry = NetworkRegistry::default();
        for name in ["mainnet", "", "Base"] {
            assert!(matches!(
                registry.get(name),
                Err(ConfigError::UnknownNetwork(n)) if n == name
            ));
        }
    }

    #[test]
    fn test_missing_secret() {
        let dir = TempDir::new("chainrig-registry").unwrap();
        let config = ProjectConfig::from_toml_str(
            r#"
            [networks.sepolia]
            url = "https://eth-sepolia.example/v2/"
            key_file = "missing.secret"
            "#,
        )
        .unwrap();

        let err = NetworkRegistry::from_config(&config, dir.path()).unwrap_err();
        assert!(matches!(err, ConfigError::MissingSecret { network, .. } if network == "sepolia"));
    }

    #[test]
    fn test_missing_endpoint_is_invalid() {
        let dir = TempDir::new("chainrig-registry").unwrap();
        write_secret(&dir);
        let config = ProjectConfig::from_toml_str(
            r#"
            [networks.bsc]
            key_file = ".secret"
            gas_price = 1000000000
            "#,
        )
        .unwrap();

        let err = NetworkRegistry::from_config(&config, dir.path()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidProfile { network, .. } if network == "bsc"));
    }

    #[test]
    fn test_missing_key_is_invalid() {
        let dir = TempDir::new("chainrig-registry").unwrap();
        let config = ProjectConfig::from_toml_str(
            r#"
            [networks.avalanche]
            url = "https://rpc.ankr.com/avalanche"
            "#,
        )
        .unwrap();

        let err = NetworkRegistry::from_config(&config, dir.path()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidProfile { .. }));
    }

    #[test]
    fn test_both_key_sources_is_invalid() {
        let dir = TempDir::new("chainrig-registry").unwrap();
        write_secret(&dir);
        let config = ProjectConfig::from_toml_str(
            r#"
            [networks.avalanche]
            url = "https://rpc.ankr.com/avalanche"
            key_file = ".secret"
            key_env = "CHAINRIG_TEST_UNUSED_KEY"
            "#,
        )
        .unwrap();

        let err = NetworkRegistry::from_config(&config, dir.path()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidProfile { .. }));
    }

    #[test]
    fn test_bad_url_is_invalid() {
        let dir = TempDir::new("chainrig-registry").unwrap();
        write_secret(&dir);
        let config = ProjectConfig::from_toml_str(
            r#"
            [networks.fxTestnet]
            url = "not a url"
            key_file = ".secret"
            "#,
        )
        .unwrap();

        let err = NetworkRegistry::from_config(&config, dir.path()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidProfile { .. }));
    }

    #[test]
    fn test_zero_intervals_are_invalid() {
        let dir = TempDir::new("chainrig-registry").unwrap();
        write_secret(&dir);

        for setting in ["polling_interval = 0", "network_check_timeout = 0"] {
            let config = ProjectConfig::from_toml_str(&format!(
                r#"
                [networks.local]
                url = "http://127.0.0.1:8545"
                key_file = ".secret"
                {setting}
                "#
            ))
            .unwrap();

            let err = NetworkRegistry::from_config(&config, dir.path()).unwrap_err();
            assert!(
                matches!(err, ConfigError::InvalidProfile { ref reason, .. } if reason.contains("must be positive")),
                "{setting}: {err}"
            );
        }
    }

    #[test]
    fn test_key_from_env() {
        let dir = TempDir::new("chainrig-registry").unwrap();
        // SAFETY: the variable name is unique to this test.
        unsafe { std::env::set_var("CHAINRIG_TEST_REGISTRY_KEY", DEV_KEY) };

        let config = ProjectConfig::from_toml_str(
            r#"
            [networks.zetaAthenTestnet]
            url = "https://zetachain-athens-evm.example/v1/rpc/public"
            key_env = "CHAINRIG_TEST_REGISTRY_KEY"
            gas_price = 17
            "#,
        )
        .unwrap();

        let registry = NetworkRegistry::from_config(&config, dir.path()).unwrap();
        let profile = registry.get("zetaAthenTestnet").unwrap();
        assert_eq!(profile.signing_key, SigningKey::new(DEV_KEY));
        assert_eq!(profile.gas.gas_price, Some(17));
    }
}
