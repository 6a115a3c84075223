use std::path::{Path, PathBuf};

use crate::{
    ConfigError, DeployedInstance, DeploymentError, PlanError,
    artifacts::ArtifactStore,
    config::ProjectConfig,
    connection::Connector,
    explorer::ExplorerEndpoint,
    plan::{CompiledPlan, DeploymentPlan},
    record::{DeploymentRecord, RecordStore},
    registry::NetworkRegistry,
    sequencer::Sequencer,
};

/// Entry point tying a project configuration to plans, artifacts and records.
///
/// Relative paths in the configuration resolve against the directory holding
/// the configuration file.
#[derive(Debug, Clone)]
pub struct Deployer {
    config: ProjectConfig,
    base_dir: PathBuf,
}

impl Deployer {
    /// Load the configuration from a file (or a directory containing `Chainrig.toml`).
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let (config, base_dir) = ProjectConfig::load_from_file(path)?;
        Ok(Self { config, base_dir })
    }

    pub fn from_config(config: ProjectConfig, base_dir: impl Into<PathBuf>) -> Self {
        Self {
            config,
            base_dir: base_dir.into(),
        }
    }

    pub fn config(&self) -> &ProjectConfig {
        &self.config
    }

    fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    /// Build the network registry, reading every signing key.
    pub fn registry(&self) -> Result<NetworkRegistry, ConfigError> {
        NetworkRegistry::from_config(&self.config, &self.base_dir)
    }

    pub fn artifacts(&self) -> Result<ArtifactStore, PlanError> {
        ArtifactStore::open(&self.resolve_path(&self.config.artifacts))
    }

    pub fn records(&self) -> RecordStore {
        RecordStore::new(self.resolve_path(&self.config.records))
    }

    /// Explorer endpoint for `network`, if one is known.
    pub fn explorer(&self, network: &str) -> Option<ExplorerEndpoint> {
        self.config.etherscan.resolve(network)
    }

    /// Load and compile a plan for `network`.
    pub fn compile(&self, plan_path: &Path, network: &str) -> Result<CompiledPlan, PlanError> {
        let plan = DeploymentPlan::load_from_file(plan_path)?;
        let artifacts = self.artifacts()?;
        plan.compile(network, &artifacts, &self.config.proxy_artifacts)
    }

    /// The record of `plan_path` on `network`, if any step ever completed there.
    pub fn status(
        &self,
        plan_path: &Path,
        network: &str,
    ) -> Result<Option<DeploymentRecord>, DeploymentError> {
        let plan = DeploymentPlan::load_from_file(plan_path)?;
        Ok(self.records().load(network, &plan.name)?)
    }

    /// Run the plan at `plan_path` on `network`.
    ///
    /// Configuration and plan errors are raised before `connector` is used.
    pub async fn run<C: Connector>(
        &self,
        connector: &C,
        plan_path: &Path,
        network: &str,
        resume: bool,
    ) -> Result<DeployedInstance, DeploymentError> {
        let registry = self.registry()?;
        let profile = registry.get(network)?;

        let plan = self.compile(plan_path, network)?;
        tracing::info!(
            network,
            plan = %plan.name,
            factory = %plan.factory,
            proxy_kind = %plan.proxy_kind,
            fingerprint = %plan.fingerprint,
            "Plan compiled"
        );

        Sequencer::new(self.records())
            .with_resume(resume)
            .deploy(connector, &plan, profile)
            .await
    }
}
