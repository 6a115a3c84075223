//! Block-explorer settings and the Etherscan-compatible proxy linking API.

use std::{collections::BTreeMap, fmt, time::Duration};

use alloy_core::primitives::Address;
use serde::{Deserialize, Serialize};

/// Explorer settings from the `[etherscan]` table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExplorerConfig {
    /// API key per network name.
    #[serde(default)]
    pub api_key: BTreeMap<String, String>,
    /// Chains missing from the built-in table.
    #[serde(default)]
    pub custom_chains: Vec<CustomChain>,
}

/// Explorer descriptor for a chain the built-in table doesn't know.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomChain {
    pub network: String,
    pub chain_id: u64,
    pub urls: ExplorerUrls,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExplorerUrls {
    pub api_url: String,
    pub browser_url: String,
}

/// A fully resolved explorer for one network.
#[derive(Clone, PartialEq, Eq)]
pub struct ExplorerEndpoint {
    pub network: String,
    pub chain_id: u64,
    pub api_url: String,
    pub browser_url: String,
    pub api_key: Option<String>,
}

impl fmt::Debug for ExplorerEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExplorerEndpoint")
            .field("network", &self.network)
            .field("chain_id", &self.chain_id)
            .field("api_url", &self.api_url)
            .field("browser_url", &self.browser_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl ExplorerEndpoint {
    /// Browser link to an address page.
    pub fn address_url(&self, address: Address) -> String {
        format!("{}/address/{}", self.browser_url.trim_end_matches('/'), address)
    }
}

/// Explorers known without configuration: (network, chain id, api url, browser url).
const KNOWN_EXPLORERS: &[(&str, u64, &str, &str)] = &[
    ("mainnet", 1, "https://api.etherscan.io/api", "https://etherscan.io"),
    ("sepolia", 11155111, "https://api-sepolia.etherscan.io/api", "https://sepolia.etherscan.io"),
    ("optimisticEthereum", 10, "https://api-optimistic.etherscan.io/api", "https://optimistic.etherscan.io"),
    ("arbitrumOne", 42161, "https://api.arbiscan.io/api", "https://arbiscan.io"),
    ("bsc", 56, "https://api.bscscan.com/api", "https://bscscan.com"),
    ("bscTestnet", 97, "https://api-testnet.bscscan.com/api", "https://testnet.bscscan.com"),
    ("avalanche", 43114, "https://api.snowtrace.io/api", "https://snowtrace.io"),
    ("avalancheFujiTestnet", 43113, "https://api-testnet.snowtrace.io/api", "https://testnet.snowtrace.io"),
    ("base", 8453, "https://api.basescan.org/api", "https://basescan.org"),
    ("baseGoerli", 84531, "https://api-goerli.basescan.org/api", "https://goerli.basescan.org"),
    ("baseSepolia", 84532, "https://api-sepolia.basescan.org/api", "https://sepolia.basescan.org"),
];

impl ExplorerConfig {
    /// Resolve the explorer for a network. Custom chains take precedence.
    pub fn resolve(&self, network: &str) -> Option<ExplorerEndpoint> {
        let api_key = self
            .api_key
            .get(network)
            .filter(|k| !k.trim().is_empty())
            .cloned();

        if let Some(custom) = self.custom_chains.iter().find(|c| c.network == network) {
            return Some(ExplorerEndpoint {
                network: network.to_string(),
                chain_id: custom.chain_id,
                api_url: custom.urls.api_url.clone(),
                browser_url: custom.urls.browser_url.clone(),
                api_key,
            });
        }

        KNOWN_EXPLORERS
            .iter()
            .find(|(name, ..)| *name == network)
            .map(|(_, chain_id, api_url, browser_url)| ExplorerEndpoint {
                network: network.to_string(),
                chain_id: *chain_id,
                api_url: api_url.to_string(),
                browser_url: browser_url.to_string(),
                api_key,
            })
    }
}

/// Errors from the explorer API.
#[derive(Debug, thiserror::Error)]
pub enum ExplorerError {
    #[error("no API key configured for {0}")]
    MissingApiKey(String),

    #[error("explorer request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("explorer rejected the request: {message} ({result})")]
    Rejected { message: String, result: String },
}

/// Status of a proxy verification request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProxyVerificationStatus {
    Pending,
    Verified(String),
}

/// Etherscan-style envelope: `{"status": "1", "message": "OK", "result": ...}`.
#[derive(Debug, Deserialize)]
struct ExplorerResponse {
    status: String,
    message: String,
    result: String,
}

/// Client for the Etherscan-compatible contract API.
pub struct ExplorerClient {
    client: reqwest::Client,
    endpoint: ExplorerEndpoint,
    api_key: String,
}

impl fmt::Debug for ExplorerClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExplorerClient")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

const EXPLORER_TIMEOUT: Duration = Duration::from_secs(30);

impl ExplorerClient {
    pub fn new(endpoint: ExplorerEndpoint) -> Result<Self, ExplorerError> {
        let api_key = endpoint
            .api_key
            .clone()
            .ok_or_else(|| ExplorerError::MissingApiKey(endpoint.network.clone()))?;
        let client = reqwest::Client::builder()
            .timeout(EXPLORER_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            endpoint,
            api_key,
        })
    }

    pub fn endpoint(&self) -> &ExplorerEndpoint {
        &self.endpoint
    }

    /// Ask the explorer to link a proxy to its implementation. Returns the request GUID.
    pub async fn verify_proxy(
        &self,
        proxy: Address,
        expected_implementation: Option<Address>,
    ) -> Result<String, ExplorerError> {
        let mut form = vec![("address", proxy.to_string())];
        if let Some(implementation) = expected_implementation {
            form.push(("expectedimplementation", implementation.to_string()));
        }

        let response: ExplorerResponse = self
            .client
            .post(&self.endpoint.api_url)
            .query(&[
                ("module", "contract"),
                ("action", "verifyproxycontract"),
                ("apikey", self.api_key.as_str()),
            ])
            .form(&form)
            .send()
            .await?
            .json()
            .await?;

        tracing::debug!(network = %self.endpoint.network, status = %response.status, message = %response.message, "verifyproxycontract response");

        if response.status != "1" {
            return Err(ExplorerError::Rejected {
                message: response.message,
                result: response.result,
            });
        }
        Ok(response.result)
    }

    /// Poll the status of a proxy verification request.
    pub async fn check_proxy_verification(
        &self,
        guid: &str,
    ) -> Result<ProxyVerificationStatus, ExplorerError> {
        let response: ExplorerResponse = self
            .client
            .get(&self.endpoint.api_url)
            .query(&[
                ("module", "contract"),
                ("action", "checkproxyverification"),
                ("guid", guid),
                ("apikey", self.api_key.as_str()),
            ])
            .send()
            .await?
            .json()
            .await?;

        parse_verification_status(response)
    }
}

fn parse_verification_status(
    response: ExplorerResponse,
) -> Result<ProxyVerificationStatus, ExplorerError> {
    if response.status == "1" {
        return Ok(ProxyVerificationStatus::Verified(response.result));
    }
    if response.result.to_lowercase().contains("pending") {
        return Ok(ProxyVerificationStatus::Pending);
    }
    Err(ExplorerError::Rejected {
        message: response.message,
        result: response.result,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_core::primitives::address;

    fn config() -> ExplorerConfig {
        ExplorerConfig {
            api_key: BTreeMap::from([
                ("base".to_string(), "BASESCAN".to_string()),
                ("baseSepolia".to_string(), "BASESCAN".to_string()),
                ("bsc".to_string(), "".to_string()),
            ]),
            custom_chains: vec![CustomChain {
                network: "baseSepolia".to_string(),
                chain_id: 84532,
                urls: ExplorerUrls {
                    api_url: "https://custom.example/api".to_string(),
                    browser_url: "https://custom.example/".to_string(),
                },
            }],
        }
    }

    #[test]
    fn test_custom_chain_takes_precedence() {
        let explorer = config().resolve("baseSepolia").unwrap();
        assert_eq!(explorer.chain_id, 84532);
        assert_eq!(explorer.api_url, "https://custom.example/api");
        assert_eq!(explorer.api_key.as_deref(), Some("BASESCAN"));
    }

    #[test]
    fn test_known_chain() {
        let explorer = config().resolve("base").unwrap();
        assert_eq!(explorer.chain_id, 8453);
        assert_eq!(explorer.browser_url, "https://basescan.org");
    }

    #[test]
    fn test_blank_api_key_is_none() {
        let explorer = config().resolve("bsc").unwrap();
        assert_eq!(explorer.api_key, None);
        assert!(matches!(
            ExplorerClient::new(explorer),
            Err(ExplorerError::MissingApiKey(n)) if n == "bsc"
        ));
    }

    #[test]
    fn test_unknown_network() {
        assert!(config().resolve("fxTestnet").is_none());
    }

    #[test]
    fn test_debug_hides_api_key() {
        let explorer = config().resolve("baseSepolia").unwrap();
        let client = ExplorerClient::new(explorer.clone()).unwrap();

        for debug in [format!("{explorer:?}"), format!("{client:?}")] {
            assert!(!debug.contains("BASESCAN"), "{debug}");
            assert!(debug.contains("baseSepolia"));
        }
    }

    #[test]
    fn test_address_url_trims_slash() {
        let explorer = config().resolve("baseSepolia").unwrap();
        let proxy = address!("0xF32D39ff9f6Aa7a7A64d7a4F00a54826Ef791a55");
        assert_eq!(
            explorer.address_url(proxy).to_lowercase(),
            "https://custom.example/address/0xf32d39ff9f6aa7a7a64d7a4f00a54826ef791a55"
        );
    }

    #[test]
    fn test_verification_status() {
        let pending = ExplorerResponse {
            status: "0".to_string(),
            message: "NOTOK".to_string(),
            result: "Pending in queue".to_string(),
        };
        assert_eq!(
            parse_verification_status(pending).unwrap(),
            ProxyVerificationStatus::Pending
        );

        let failed = ExplorerResponse {
            status: "0".to_string(),
            message: "NOTOK".to_string(),
            result: "A corresponding implementation contract was unfortunately not detected"
                .to_string(),
        };
        assert!(parse_verification_status(failed).is_err());
    }
}
