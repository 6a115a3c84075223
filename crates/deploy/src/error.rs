//! Error taxonomy for configuration, planning, connection and deployment.

use std::path::PathBuf;

use alloy_core::primitives::{Address, B256};

/// Problems with the network configuration. Always raised before any network I/O.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("unknown network: {0}")]
    UnknownNetwork(String),

    #[error("missing secret for network {network}: {source_desc} ({reason})")]
    MissingSecret {
        network: String,
        source_desc: String,
        reason: String,
    },

    #[error("invalid profile for network {network}: {reason}")]
    InvalidProfile { network: String, reason: String },

    #[error("failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),
}

/// Problems with a deployment plan or the artifacts it references.
#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse plan {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("failed to parse artifact {path}: {source}")]
    Artifact {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid plan: {0}")]
    Invalid(String),

    #[error("unknown contract factory: {0}")]
    UnknownFactory(String),

    #[error("factory {factory} has no function {function} taking {arity} argument(s)")]
    UnknownFunction {
        factory: String,
        function: String,
        arity: usize,
    },

    #[error("step {step}: unresolved placeholder ${{{name}}}")]
    UnresolvedPlaceholder { step: usize, name: String },

    #[error("step {step}: argument {index} ({ty}) is invalid: {reason}")]
    InvalidArgument {
        step: usize,
        index: usize,
        ty: String,
        reason: String,
    },
}

/// Failure to open a connection to a network.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("unsupported endpoint scheme: {0}")]
    UnsupportedEndpoint(String),

    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("endpoint {endpoint} unreachable: {reason}")]
    Unreachable { endpoint: String, reason: String },

    #[error("chain id mismatch: expected {expected}, endpoint reports {actual}")]
    ChainIdMismatch { expected: u64, actual: u64 },
}

/// Failure of a single on-chain submission.
#[derive(Debug, thiserror::Error)]
pub enum TransactionError {
    #[error("transaction {tx_hash} reverted")]
    Reverted { tx_hash: B256 },

    #[error("transaction {tx_hash} not confirmed after {waited_blocks} block(s)")]
    Timeout { tx_hash: B256, waited_blocks: u64 },

    #[error("transaction rejected: {0}")]
    Rejected(String),

    #[error("{0} is not an upgradeable proxy")]
    NotAProxy(Address),

    #[error("proxy {proxy} points at {actual}, expected {expected}")]
    ImplementationMismatch {
        proxy: Address,
        expected: Address,
        actual: Address,
    },

    #[error(transparent)]
    Rpc(#[from] alloy_transport::TransportError),
}

/// Failures reading or writing deployment records.
#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("record i/o error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt record at {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("another deployment holds the lock at {0}")]
    Locked(PathBuf),
}

/// Top-level error of a deployment run.
#[derive(Debug, thiserror::Error)]
pub enum DeploymentError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error(transparent)]
    Record(#[from] RecordError),

    #[error("failed to connect to {network}: {source}")]
    Connection {
        network: String,
        #[source]
        source: ConnectionError,
    },

    #[error("proxy deployment timed out: {0}")]
    DeploymentTimeout(#[source] TransactionError),

    #[error("proxy deployment reverted: {0}")]
    DeploymentReverted(#[source] TransactionError),

    #[error("proxy deployment failed: {0}")]
    Deployment(#[source] TransactionError),

    #[error(
        "proxy {address} on {network} (implementation {implementation}) is recorded \
         but failed its check: {cause}"
    )]
    ProxyUnverified {
        network: String,
        address: Address,
        implementation: Address,
        #[source]
        cause: TransactionError,
    },

    #[error(
        "initialization step {step} ({function}) failed on {address}: {cause}; \
         steps before {step} are on-chain, rerun with --resume to continue"
    )]
    InitializationFailed {
        step: usize,
        function: String,
        address: Address,
        #[source]
        cause: TransactionError,
    },

    #[error("plan already deployed on {network} at {address}; use an upgrade_proxy step to change it")]
    AlreadyDeployed { network: String, address: Address },

    #[error(
        "partial deployment on {network}: {completed} step(s) done{}; rerun with --resume",
        .address.map(|a| format!(" at {a}")).unwrap_or_default()
    )]
    PartialDeployment {
        network: String,
        address: Option<Address>,
        completed: usize,
    },

    #[error("plan changed since the recorded partial deployment on {network}; refusing to resume")]
    PlanChanged { network: String },
}

impl DeploymentError {
    /// Classify a failure of the proxy deploy/upgrade step.
    pub(crate) fn from_deploy_step(err: TransactionError) -> Self {
        match err {
            TransactionError::Timeout { .. } => Self::DeploymentTimeout(err),
            TransactionError::Reverted { .. } => Self::DeploymentReverted(err),
            other => Self::Deployment(other),
        }
    }
}
