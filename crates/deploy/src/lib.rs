//! chainrig-deploy - Upgradeable proxy deployment for EVM networks.
//!
//! This crate resolves network profiles from the project configuration,
//! compiles deployment plans against contract artifacts and drives them
//! on-chain step by step, recording progress as it goes.

mod deployer;
pub use deployer::Deployer;

mod error;
pub use error::{
    ConfigError, ConnectionError, DeploymentError, PlanError, RecordError, TransactionError,
};

pub mod artifacts;
pub mod config;
pub mod connection;
pub mod explorer;
pub mod plan;
pub mod record;
pub mod registry;
mod secret;
mod sequencer;

pub use artifacts::{ArtifactStore, ContractFactory};
pub use config::{CONFIG_FILENAME, ENV_PREFIX, NetworkConfig, ProjectConfig, ProxyArtifacts};
pub use connection::{
    Connection, Connector, DeployedInstance, RpcConnection, RpcConnector, TxReceipt,
};
pub use explorer::{
    ExplorerClient, ExplorerConfig, ExplorerEndpoint, ExplorerError, ProxyVerificationStatus,
};
pub use plan::{
    CompiledPlan, CompiledStep, DeploymentPlan, EncodedCall, PlanStep, ProxyDeployment, ProxyKind,
    ProxyUpgrade,
};
pub use record::{DeploymentRecord, RecordLock, RecordStore, StepRecord};
pub use registry::{GasPolicy, NetworkProfile, NetworkRegistry, TimeoutPolicy, redact_endpoint};
pub use secret::{KeySource, SigningKey};
pub use sequencer::Sequencer;
