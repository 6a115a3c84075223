//! The seam between the sequencer and a blockchain.
//!
//! [`Connector`] opens a [`Connection`] for a [`NetworkProfile`]. Every
//! connection method submits at most one logical deployment operation and
//! only returns once it is confirmed (or has definitively failed).

use std::future::Future;

use alloy_core::primitives::{Address, B256};
use serde::{Deserialize, Serialize};

use crate::{
    ConnectionError, NetworkProfile, ProxyKind, TransactionError,
    plan::{EncodedCall, ProxyDeployment, ProxyUpgrade},
};

mod rpc;
pub use rpc::{RpcConnection, RpcConnector};

/// A proxy living on-chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployedInstance {
    /// Address of the proxy; every call targets it.
    pub address: Address,
    /// Implementation the proxy delegates to.
    pub implementation: Address,
    pub proxy_kind: ProxyKind,
    /// Transaction that deployed (or upgraded) the proxy.
    pub deployment_tx_hash: B256,
}

/// A confirmed transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxReceipt {
    pub tx_hash: B256,
    pub block_number: u64,
    pub gas_used: u64,
}

/// Opens connections to networks.
pub trait Connector {
    type Connection: Connection;

    /// Open a connection for `profile`.
    fn connect(
        &self,
        profile: &NetworkProfile,
    ) -> impl Future<Output = Result<Self::Connection, ConnectionError>> + Send;
}

/// An open, authenticated connection with a single signer.
pub trait Connection: Send + Sync {
    /// Chain id reported by the endpoint.
    fn chain_id(&self) -> u64;

    /// Address of the signer.
    fn signer(&self) -> Address;

    /// Deploy the implementation and a proxy in front of it.
    ///
    /// Returns as soon as the proxy creation is confirmed; checking its
    /// implementation slot is left to [`Connection::verify_proxy`].
    fn deploy_proxy(
        &mut self,
        deployment: &ProxyDeployment,
    ) -> impl Future<Output = Result<DeployedInstance, TransactionError>> + Send;

    /// Deploy a new implementation and point the proxy at it.
    fn upgrade_proxy(
        &mut self,
        upgrade: &ProxyUpgrade,
    ) -> impl Future<Output = Result<DeployedInstance, TransactionError>> + Send;

    /// Read the proxy's ERC-1967 implementation slot and compare it with `instance`.
    fn verify_proxy(
        &self,
        instance: &DeployedInstance,
    ) -> impl Future<Output = Result<(), TransactionError>> + Send;

    /// Call a function on a deployed instance.
    fn call(
        &mut self,
        instance: &DeployedInstance,
        call: &EncodedCall,
    ) -> impl Future<Output = Result<TxReceipt, TransactionError>> + Send;
}
