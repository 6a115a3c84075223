//! Drives a compiled plan against a network, one confirmed step at a time.

use crate::{
    ConnectionError, DeployedInstance, DeploymentError, NetworkProfile, PlanError,
    connection::{Connection, Connector},
    plan::{CompiledPlan, CompiledStep},
    record::{DeploymentRecord, RecordStore},
};

/// Where a run starts, decided from the existing record.
#[derive(Debug)]
enum Start {
    Fresh,
    Resume {
        next_step: usize,
        instance: DeployedInstance,
    },
}

/// Executes deployment plans and keeps their records current.
///
/// Steps run strictly in order. The first failure stops the run; nothing is
/// retried and confirmed steps are never rolled back. The record is saved after
/// every confirmed step, so a failed or interrupted run can be inspected and
/// resumed.
#[derive(Debug, Clone)]
pub struct Sequencer {
    records: RecordStore,
    resume: bool,
}

impl Sequencer {
    pub fn new(records: RecordStore) -> Self {
        Self {
            records,
            resume: false,
        }
    }

    /// Continue a partial deployment from its next step instead of refusing it.
    pub fn with_resume(mut self, resume: bool) -> Self {
        self.resume = resume;
        self
    }

    pub fn records(&self) -> &RecordStore {
        &self.records
    }

    /// Run `plan` on the network described by `profile`.
    pub async fn deploy<C: Connector>(
        &self,
        connector: &C,
        plan: &CompiledPlan,
        profile: &NetworkProfile,
    ) -> Result<DeployedInstance, DeploymentError> {
        let network = plan.network.as_str();
        let total = plan.steps.len();

        let lock = self.records.lock(network)?;
        let (mut record, first_step, mut instance) =
            match self.records.load(network, &plan.name)? {
                None => (
                    DeploymentRecord::new(network, &plan.name, &plan.fingerprint, total),
                    0,
                    None,
                ),
                Some(mut record) => match self.start_from(plan, &record)? {
                    Start::Fresh => {
                        record.restart(&plan.fingerprint, total);
                        (record, 0, None)
                    }
                    Start::Resume {
                        next_step,
                        instance,
                    } => (record, next_step, Some(instance)),
                },
            };

        match &instance {
            Some(instance) => tracing::info!(
                network,
                plan = %plan.name,
                address = %instance.address,
                next_step = first_step,
                steps = total,
                "Resuming deployment"
            ),
            None => tracing::info!(network, plan = %plan.name, steps = total, "Starting deployment"),
        }

        let mut connection = connector.connect(profile).await.map_err(|source| {
            DeploymentError::Connection {
                network: network.to_string(),
                source,
            }
        })?;

        let chain_id = connection.chain_id();
        if first_step > 0 {
            if let Some(recorded) = record.chain_id.filter(|&id| id != chain_id) {
                return Err(DeploymentError::Connection {
                    network: network.to_string(),
                    source: ConnectionError::ChainIdMismatch {
                        expected: recorded,
                        actual: chain_id,
                    },
                });
            }
        }
        record.chain_id = Some(chain_id);

        if let Some(recorded) = instance.as_ref().filter(|_| first_step > 0) {
            verify(&connection, network, recorded).await?;
        }

        for (index, step) in plan.steps.iter().enumerate().skip(first_step) {
            tracing::info!(
                network,
                step = index,
                of = total,
                action = %step.label(),
                "Executing step"
            );

            let tx_hash = match step {
                CompiledStep::DeployProxy(deployment) => {
                    let deployed = connection
                        .deploy_proxy(deployment)
                        .await
                        .map_err(DeploymentError::from_deploy_step)?;
                    tracing::info!(
                        network,
                        address = %deployed.address,
                        implementation = %deployed.implementation,
                        kind = %deployed.proxy_kind,
                        "Proxy deployed"
                    );
                    let tx_hash = deployed.deployment_tx_hash;
                    record.instance = Some(deployed.clone());
                    instance = Some(deployed);
                    tx_hash
                }
                CompiledStep::UpgradeProxy(upgrade) => {
                    let upgraded = connection
                        .upgrade_proxy(upgrade)
                        .await
                        .map_err(DeploymentError::from_deploy_step)?;
                    tracing::info!(
                        network,
                        address = %upgraded.address,
                        implementation = %upgraded.implementation,
                        "Proxy upgraded"
                    );
                    let tx_hash = upgraded.deployment_tx_hash;
                    record.instance = Some(upgraded.clone());
                    instance = Some(upgraded);
                    tx_hash
                }
                CompiledStep::Call(call) => {
                    let target = instance.as_ref().ok_or_else(|| {
                        PlanError::Invalid(format!("step {index} runs before the proxy exists"))
                    })?;
                    let receipt = connection.call(target, call).await.map_err(|cause| {
                        tracing::error!(
                            network,
                            step = index,
                            function = %call.function,
                            error = %cause,
                            "Initialization call failed, aborting remaining steps"
                        );
                        DeploymentError::InitializationFailed {
                            step: index,
                            function: step.function_name().to_string(),
                            address: target.address,
                            cause,
                        }
                    })?;
                    receipt.tx_hash
                }
            };

            record.push_step(index, step.label(), tx_hash);
            self.records.save(&record)?;

            // The proxy is recorded before its slot is checked, so a failed
            // check still leaves its address on disk.
            if let (CompiledStep::DeployProxy(_) | CompiledStep::UpgradeProxy(_), Some(deployed)) =
                (step, &instance)
            {
                verify(&connection, network, deployed).await?;
            }
        }

        drop(lock);

        let instance = instance.ok_or_else(|| {
            PlanError::Invalid("plan neither deploys nor upgrades a proxy".to_string())
        })?;
        tracing::info!(
            network,
            plan = %plan.name,
            address = %instance.address,
            "Deployment complete"
        );
        Ok(instance)
    }

    /// Decide how to treat an existing record. Never redeploys a proxy silently.
    fn start_from(
        &self,
        plan: &CompiledPlan,
        record: &DeploymentRecord,
    ) -> Result<Start, DeploymentError> {
        // The instance is recorded with step 0; without it nothing is on-chain.
        let Some(instance) = record.instance.clone() else {
            return Ok(Start::Fresh);
        };
        let network = plan.network.clone();
        let partial = !record.is_complete();

        if partial && self.resume {
            if record.plan_fingerprint != plan.fingerprint {
                return Err(DeploymentError::PlanChanged { network });
            }
            return Ok(Start::Resume {
                next_step: record.completed(),
                instance,
            });
        }

        if !plan.deploys_fresh_proxy() {
            return Ok(Start::Fresh);
        }

        if partial {
            return Err(DeploymentError::PartialDeployment {
                network,
                address: Some(instance.address),
                completed: record.completed(),
            });
        }

        Err(DeploymentError::AlreadyDeployed {
            network,
            address: instance.address,
        })
    }
}

/// Confirm on-chain that `instance` is a proxy delegating to its recorded implementation.
async fn verify<C: Connection>(
    connection: &C,
    network: &str,
    instance: &DeployedInstance,
) -> Result<(), DeploymentError> {
    connection.verify_proxy(instance).await.map_err(|cause| {
        tracing::error!(
            network,
            address = %instance.address,
            implementation = %instance.implementation,
            error = %cause,
            "Proxy check failed"
        );
        DeploymentError::ProxyUnverified {
            network: network.to_string(),
            address: instance.address,
            implementation: instance.implementation,
            cause,
        }
    })
}
