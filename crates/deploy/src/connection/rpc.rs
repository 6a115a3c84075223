//! JSON-RPC implementation of [`Connection`] on an alloy provider with a local wallet.

use std::time::{Duration, Instant};

use alloy_core::{
    dyn_abi::DynSolValue,
    primitives::{Address, B256, Bytes, TxHash, U256, b256, keccak256},
};
use alloy_network::{Ethereum, EthereumWallet, ReceiptResponse, TransactionBuilder};
use alloy_provider::{DynProvider, Provider, ProviderBuilder};
use alloy_rpc_types_eth::{TransactionReceipt, TransactionRequest};
use alloy_transport::{RpcError, TransportError, TransportErrorKind};
use backon::{ConstantBuilder, Retryable};

use super::{Connection, Connector, DeployedInstance, TxReceipt};
use crate::{
    ConnectionError, NetworkProfile, ProxyKind, TransactionError,
    plan::{EncodedCall, ProxyDeployment, ProxyUpgrade},
    registry::{GasPolicy, TimeoutPolicy},
};

/// ERC-1967 implementation slot: `keccak256("eip1967.proxy.implementation") - 1`.
const IMPLEMENTATION_SLOT: B256 =
    b256!("360894a13ba1a3210667c828492db98dca3e2076cc3735a920a3ca505d382bbc");

/// ERC-1967 admin slot: `keccak256("eip1967.proxy.admin") - 1`.
const ADMIN_SLOT: B256 = b256!("b53127684a568b3173ae13b9f8a6016e243e63b6e8ee1178d6a717850b5d6103");

/// Headroom added on top of `eth_estimateGas`.
const GAS_ESTIMATE_MARGIN_PERCENT: u64 = 20;

/// Opens [`RpcConnection`]s over HTTP(S).
#[derive(Debug, Clone, Copy, Default)]
pub struct RpcConnector;

impl Connector for RpcConnector {
    type Connection = RpcConnection;

    async fn connect(&self, profile: &NetworkProfile) -> Result<RpcConnection, ConnectionError> {
        let scheme = profile.endpoint.scheme();
        if scheme != "http" && scheme != "https" {
            return Err(ConnectionError::UnsupportedEndpoint(scheme.to_string()));
        }

        let signer = profile.signing_key.signer()?;
        let address = signer.address();
        let endpoint = profile.endpoint_host();

        tracing::info!(
            network = %profile.name,
            endpoint = %endpoint,
            signer = %address,
            "Connecting..."
        );

        // Recommended fillers supply the chain id and the pending nonce of every
        // transaction; the wallet signs it.
        let provider = ProviderBuilder::new()
            .wallet(EthereumWallet::from(signer))
            .connect_http(profile.endpoint.clone())
            .erased();
        provider
            .client()
            .set_poll_interval(profile.timeouts.polling_interval);

        let chain_id = await_chain_id(&provider, &endpoint, &profile.timeouts).await?;

        if let Some(expected) = profile.chain_id {
            if expected != chain_id {
                return Err(ConnectionError::ChainIdMismatch {
                    expected,
                    actual: chain_id,
                });
            }
        }

        tracing::info!(network = %profile.name, chain_id, "Connected");

        Ok(RpcConnection {
            provider,
            network: profile.name.clone(),
            signer: address,
            chain_id,
            gas: profile.gas,
            timeouts: profile.timeouts,
        })
    }
}

/// Poll `eth_chainId` until the endpoint answers or the network check timeout elapses.
///
/// Only transport failures are retried. An endpoint that answers with a
/// rejection fails immediately.
async fn await_chain_id(
    provider: &DynProvider<Ethereum>,
    endpoint: &str,
    timeouts: &TimeoutPolicy,
) -> Result<u64, ConnectionError> {
    let interval = timeouts.polling_interval;
    let attempts = (timeouts.network_check_timeout.as_millis() / interval.as_millis().max(1)).max(1);

    let fetch = || async move { provider.get_chain_id().await };
    let retrying = fetch
        .retry(
            ConstantBuilder::default()
                .with_delay(interval)
                .with_max_times(attempts as usize),
        )
        .sleep(tokio::time::sleep)
        .when(is_transient)
        .notify(|err: &TransportError, after: Duration| {
            tracing::debug!(error = %err, retry_in = ?after, "Endpoint not ready");
        });

    match tokio::time::timeout(timeouts.network_check_timeout, retrying).await {
        Ok(Ok(chain_id)) => Ok(chain_id),
        Ok(Err(err)) => Err(refused(endpoint, err)),
        Err(_) => Err(ConnectionError::Unreachable {
            endpoint: endpoint.to_string(),
            reason: format!(
                "no answer within {}ms",
                timeouts.network_check_timeout.as_millis()
            ),
        }),
    }
}

/// Whether the endpoint may still come up: no answer at all, or an overloaded server.
fn is_transient(err: &TransportError) -> bool {
    match err {
        RpcError::Transport(TransportErrorKind::HttpError(http)) => {
            http.status == 429 || http.status >= 500
        }
        RpcError::Transport(_) => true,
        _ => false,
    }
}

fn refused(endpoint: &str, err: TransportError) -> ConnectionError {
    match err {
        RpcError::Transport(TransportErrorKind::HttpError(http))
            if matches!(http.status, 401 | 403) =>
        {
            ConnectionError::Authentication(format!(
                "{endpoint} answered {}: {}",
                http.status,
                http.body.trim()
            ))
        }
        other => ConnectionError::Unreachable {
            endpoint: endpoint.to_string(),
            reason: other.to_string(),
        },
    }
}

/// A node-side rejection of a submission (bad nonce, execution revert during estimation, ...).
fn rejected(err: TransportError) -> TransactionError {
    match err {
        RpcError::ErrorResp(payload) => TransactionError::Rejected(payload.message.to_string()),
        other => other.into(),
    }
}

/// Constructor-argument-appended creation code for a proxy.
pub(crate) fn proxy_init_code(proxy_code: &Bytes, constructor_args: DynSolValue) -> Bytes {
    let mut code = proxy_code.to_vec();
    code.extend_from_slice(&constructor_args.abi_encode_params());
    code.into()
}

/// Encode a call from its canonical signature and arguments.
pub(crate) fn encode_with_signature(signature: &str, args: Vec<DynSolValue>) -> Bytes {
    let mut data = keccak256(signature.as_bytes())[..4].to_vec();
    data.extend_from_slice(&DynSolValue::Tuple(args).abi_encode_params());
    data.into()
}

/// A live connection: one endpoint, one wallet.
pub struct RpcConnection {
    provider: DynProvider<Ethereum>,
    network: String,
    signer: Address,
    chain_id: u64,
    gas: GasPolicy,
    timeouts: TimeoutPolicy,
}

impl std::fmt::Debug for RpcConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcConnection")
            .field("network", &self.network)
            .field("signer", &self.signer)
            .field("chain_id", &self.chain_id)
            .finish_non_exhaustive()
    }
}

impl RpcConnection {
    async fn gas_price(&self) -> Result<u128, TransactionError> {
        match self.gas.gas_price {
            Some(price) => Ok(price),
            None => Ok(self.provider.get_gas_price().await?),
        }
    }

    async fn gas_limit(&self, tx: &TransactionRequest) -> Result<u64, TransactionError> {
        if let Some(limit) = self.gas.gas_limit {
            return Ok(limit);
        }
        // Estimation runs the call; an execution error here means it would revert.
        let estimate = self
            .provider
            .estimate_gas(tx.clone())
            .await
            .map_err(rejected)?;
        Ok(estimate + estimate * GAS_ESTIMATE_MARGIN_PERCENT / 100)
    }

    /// Sign, submit and wait for one legacy transaction.
    async fn send_transaction(
        &self,
        label: &str,
        tx: TransactionRequest,
    ) -> Result<TransactionReceipt, TransactionError> {
        let tx = tx.with_from(self.signer);
        let gas_price = self.gas_price().await?;
        let gas_limit = self.gas_limit(&tx).await?;
        let tx = tx.with_gas_price(gas_price).with_gas_limit(gas_limit);

        let pending = self
            .provider
            .send_transaction(tx)
            .await
            .map_err(rejected)?;
        let tx_hash = *pending.tx_hash();

        tracing::info!(
            network = %self.network,
            tx = label,
            tx_hash = %tx_hash,
            gas_limit,
            gas_price,
            "Transaction submitted, waiting for confirmation..."
        );

        let receipt = self.wait_for_receipt(tx_hash).await?;
        tracing::info!(
            network = %self.network,
            tx = label,
            tx_hash = %tx_hash,
            block = ?receipt.block_number,
            gas_used = receipt.gas_used,
            "Transaction confirmed"
        );
        Ok(receipt)
    }

    /// Wait until `tx_hash` is mined and buried under the configured confirmation depth.
    ///
    /// Gives up once `timeout_blocks` blocks pass without a receipt, or when the
    /// confirmation timeout elapses.
    async fn wait_for_receipt(&self, tx_hash: TxHash) -> Result<TransactionReceipt, TransactionError> {
        let start = Instant::now();
        let start_block = self.provider.get_block_number().await?;

        loop {
            let receipt = self.provider.get_transaction_receipt(tx_hash).await?;
            let current = self.provider.get_block_number().await?;
            let waited_blocks = current.saturating_sub(start_block);

            match receipt {
                Some(receipt) if !ReceiptResponse::status(&receipt) => {
                    return Err(TransactionError::Reverted { tx_hash });
                }
                Some(receipt) => {
                    let mined = receipt.block_number.unwrap_or(current);
                    let depth = current.saturating_sub(mined) + 1;
                    if depth >= self.timeouts.confirmations {
                        return Ok(receipt);
                    }
                    tracing::trace!(tx_hash = %tx_hash, depth, "Waiting for confirmations...");
                }
                None if waited_blocks > self.timeouts.timeout_blocks => {
                    return Err(TransactionError::Timeout {
                        tx_hash,
                        waited_blocks,
                    });
                }
                None => {}
            }

            if let Some(limit) = self.timeouts.confirmation_timeout {
                if start.elapsed() > limit {
                    return Err(TransactionError::Timeout {
                        tx_hash,
                        waited_blocks,
                    });
                }
            }

            tokio::time::sleep(self.timeouts.polling_interval).await;
        }
    }

    async fn deploy_contract(
        &self,
        label: &str,
        code: Bytes,
    ) -> Result<(Address, TransactionReceipt), TransactionError> {
        let receipt = self
            .send_transaction(label, TransactionRequest::default().with_deploy_code(code))
            .await?;
        let address = receipt.contract_address.ok_or_else(|| {
            TransactionError::Rejected(format!(
                "receipt {} has no contract address",
                receipt.transaction_hash
            ))
        })?;

        tracing::info!(
            network = %self.network,
            contract = label,
            address = %address,
            tx_hash = %receipt.transaction_hash,
            "Contract deployed"
        );
        Ok((address, receipt))
    }

    /// Read an address stored in a storage slot.
    async fn storage_address(&self, address: Address, slot: B256) -> Result<Address, TransactionError> {
        let word = self
            .provider
            .get_storage_at(address, U256::from_be_bytes(slot.0))
            .await?;
        Ok(Address::from_word(B256::from(word)))
    }
}

impl Connection for RpcConnection {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    fn signer(&self) -> Address {
        self.signer
    }

    async fn deploy_proxy(
        &mut self,
        deployment: &ProxyDeployment,
    ) -> Result<DeployedInstance, TransactionError> {
        let (implementation, _) = self
            .deploy_contract(
                &format!("{} implementation", deployment.factory),
                deployment.implementation_code.clone(),
            )
            .await?;

        let init_data = DynSolValue::Bytes(deployment.init_data.to_vec());
        let constructor_args = match deployment.kind {
            ProxyKind::Uups => {
                DynSolValue::Tuple(vec![DynSolValue::Address(implementation), init_data])
            }
            ProxyKind::Transparent => DynSolValue::Tuple(vec![
                DynSolValue::Address(implementation),
                DynSolValue::Address(self.signer),
                init_data,
            ]),
        };

        let (proxy, receipt) = self
            .deploy_contract(
                &format!("{} proxy", deployment.kind),
                proxy_init_code(&deployment.proxy_code, constructor_args),
            )
            .await?;

        Ok(DeployedInstance {
            address: proxy,
            implementation,
            proxy_kind: deployment.kind,
            deployment_tx_hash: receipt.transaction_hash,
        })
    }

    async fn upgrade_proxy(
        &mut self,
        upgrade: &ProxyUpgrade,
    ) -> Result<DeployedInstance, TransactionError> {
        let current = self
            .storage_address(upgrade.proxy, IMPLEMENTATION_SLOT)
            .await?;
        if current.is_zero() {
            return Err(TransactionError::NotAProxy(upgrade.proxy));
        }

        // Resolve the upgrade target before anything is sent.
        let (target, data) = match upgrade.kind {
            ProxyKind::Uups => (upgrade.proxy, None),
            ProxyKind::Transparent => {
                let admin = self.storage_address(upgrade.proxy, ADMIN_SLOT).await?;
                if admin.is_zero() {
                    return Err(TransactionError::NotAProxy(upgrade.proxy));
                }
                (admin, Some(upgrade.proxy))
            }
        };
        tracing::info!(
            proxy = %upgrade.proxy,
            current_implementation = %current,
            target = %target,
            "Upgrading proxy"
        );

        let (implementation, _) = self
            .deploy_contract(
                &format!("{} implementation", upgrade.factory),
                upgrade.implementation_code.clone(),
            )
            .await?;

        let (label, calldata) = match data {
            None => (
                "upgradeToAndCall",
                encode_with_signature(
                    "upgradeToAndCall(address,bytes)",
                    vec![
                        DynSolValue::Address(implementation),
                        DynSolValue::Bytes(Vec::new()),
                    ],
                ),
            ),
            Some(proxy) => (
                "upgradeAndCall",
                encode_with_signature(
                    "upgradeAndCall(address,address,bytes)",
                    vec![
                        DynSolValue::Address(proxy),
                        DynSolValue::Address(implementation),
                        DynSolValue::Bytes(Vec::new()),
                    ],
                ),
            ),
        };

        let receipt = self
            .send_transaction(
                label,
                TransactionRequest::default()
                    .with_to(target)
                    .with_input(calldata),
            )
            .await?;

        Ok(DeployedInstance {
            address: upgrade.proxy,
            implementation,
            proxy_kind: upgrade.kind,
            deployment_tx_hash: receipt.transaction_hash,
        })
    }

    async fn verify_proxy(&self, instance: &DeployedInstance) -> Result<(), TransactionError> {
        let actual = self
            .storage_address(instance.address, IMPLEMENTATION_SLOT)
            .await?;
        if actual.is_zero() {
            return Err(TransactionError::NotAProxy(instance.address));
        }
        if actual != instance.implementation {
            return Err(TransactionError::ImplementationMismatch {
                proxy: instance.address,
                expected: instance.implementation,
                actual,
            });
        }
        Ok(())
    }

    async fn call(
        &mut self,
        instance: &DeployedInstance,
        call: &EncodedCall,
    ) -> Result<TxReceipt, TransactionError> {
        let receipt = self
            .send_transaction(
                &call.function,
                TransactionRequest::default()
                    .with_to(instance.address)
                    .with_input(call.calldata.clone()),
            )
            .await?;
        Ok(TxReceipt {
            tx_hash: receipt.transaction_hash,
            block_number: receipt.block_number.unwrap_or_default(),
            gas_used: receipt.gas_used,
        })
    }
}
