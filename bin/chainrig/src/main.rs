//! chainrig deploys upgradeable proxies and drives their initialization across EVM networks.

mod cli;

use std::{path::Path, time::Duration};

use alloy_core::primitives::Address;
use anyhow::{Context, Result};
use chainrig_deploy::{
    Deployer, DeploymentError, ExplorerClient, ProxyVerificationStatus, RpcConnector,
    redact_endpoint,
};
use clap::Parser;
use comfy_table::{Table, presets::UTF8_FULL};
use tokio::signal;
use url::Url;

use cli::{Cli, Command};

const VERIFICATION_POLL_INTERVAL: Duration = Duration::from_secs(5);
const VERIFICATION_MAX_POLLS: usize = 60;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize the logger.
    tracing_subscriber::fmt()
        .with_max_level(cli.verbosity)
        .init();

    let deployer = Deployer::load_from_file(&cli.config).context(format!(
        "Failed to load configuration from {}",
        cli.config.display()
    ))?;

    match cli.command {
        Command::Run {
            plan,
            network,
            resume,
        } => run(&deployer, &plan, &network, resume).await,
        Command::Networks => {
            networks(&deployer);
            Ok(())
        }
        Command::Status { plan, network } => status(&deployer, &plan, &network),
        Command::VerifyProxy {
            address,
            network,
            implementation,
            wait,
        } => verify_proxy(&deployer, address, &network, implementation, wait).await,
    }
}

async fn run(deployer: &Deployer, plan: &Path, network: &str, resume: bool) -> Result<()> {
    tracing::info!(
        plan = %plan.display(),
        network,
        resume,
        "Running deployment plan..."
    );

    let result = tokio::select! {
        result = deployer.run(&RpcConnector, plan, network, resume) => result,
        _ = signal::ctrl_c() => {
            tracing::warn!(network, "Interrupted");
            report_progress(deployer, plan, network);
            anyhow::bail!("Deployment on {network} interrupted");
        }
    };

    let instance = match result {
        Ok(instance) => instance,
        Err(err) => {
            if matches!(
                err,
                DeploymentError::InitializationFailed { .. }
                    | DeploymentError::ProxyUnverified { .. }
                    | DeploymentError::PartialDeployment { .. }
                    | DeploymentError::PlanChanged { .. }
            ) {
                report_progress(deployer, plan, network);
            }
            return Err(err).context(format!("Deployment on {network} failed"));
        }
    };

    tracing::info!(
        network,
        address = %instance.address,
        implementation = %instance.implementation,
        tx_hash = %instance.deployment_tx_hash,
        "Proxy ready"
    );
    if let Some(explorer) = deployer.explorer(network) {
        tracing::info!(url = %explorer.address_url(instance.address), "Explorer");
    }

    Ok(())
}

/// Log where the run stopped, from the record on disk.
fn report_progress(deployer: &Deployer, plan: &Path, network: &str) {
    match deployer.status(plan, network) {
        Ok(Some(record)) => tracing::warn!(
            record = %deployer.records().record_path(network, &record.plan).display(),
            address = ?record.instance.as_ref().map(|i| i.address),
            last_completed_step = ?record.last_completed_step(),
            completed = record.completed(),
            total = record.total_steps,
            "Partial deployment recorded"
        ),
        Ok(None) => tracing::warn!(network, "Nothing was recorded on-chain"),
        Err(err) => tracing::error!(error = %err, "Failed to read deployment record"),
    }
}

fn networks(deployer: &Deployer) {
    let config = deployer.config();

    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_header(vec![
        "Network", "Endpoint", "Chain ID", "Gas", "Gas price", "Key", "Explorer",
    ]);

    for (name, network) in &config.networks {
        let endpoint = network
            .url
            .as_deref()
            .and_then(|u| Url::parse(u).ok())
            .map(|u| redact_endpoint(&u))
            .unwrap_or_else(|| "-".to_string());

        let key = match (&network.key_file, &network.key_env) {
            (None, None) => match (&config.defaults.key_file, &config.defaults.key_env) {
                (Some(path), _) => format!("file {} (default)", path.display()),
                (None, Some(var)) => format!("env {var} (default)"),
                (None, None) => "-".to_string(),
            },
            (Some(path), _) => format!("file {}", path.display()),
            (None, Some(var)) => format!("env {var}"),
        };

        let explorer = config
            .etherscan
            .resolve(name)
            .map(|e| e.browser_url)
            .unwrap_or_else(|| "-".to_string());

        table.add_row(vec![
            name.clone(),
            endpoint,
            display_or_dash(network.chain_id),
            display_or_dash(network.gas),
            display_or_dash(network.gas_price),
            key,
            explorer,
        ]);
    }

    println!("{table}");
}

fn display_or_dash<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "-".to_string())
}

fn status(deployer: &Deployer, plan: &Path, network: &str) -> Result<()> {
    let Some(record) = deployer.status(plan, network)? else {
        println!("No deployment of {} recorded on {network}", plan.display());
        return Ok(());
    };

    println!(
        "{} on {} ({}/{} steps{})",
        record.plan,
        record.network,
        record.completed(),
        record.total_steps,
        if record.is_complete() { ", complete" } else { "" }
    );
    if let Some(instance) = &record.instance {
        println!("  proxy:          {}", instance.address);
        println!("  implementation: {}", instance.implementation);
        println!("  kind:           {}", instance.proxy_kind);
        if let Some(explorer) = deployer.explorer(network) {
            println!("  explorer:       {}", explorer.address_url(instance.address));
        }
    }
    println!("  fingerprint:    {}", record.plan_fingerprint);
    println!("  updated at:     {}", record.updated_at);

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_header(vec!["Step", "Action", "Transaction"]);
    for step in &record.completed_steps {
        table.add_row(vec![
            step.index.to_string(),
            step.label.clone(),
            step.tx_hash.to_string(),
        ]);
    }
    println!("{table}");

    Ok(())
}

async fn verify_proxy(
    deployer: &Deployer,
    address: Address,
    network: &str,
    implementation: Option<Address>,
    wait: bool,
) -> Result<()> {
    let endpoint = deployer
        .explorer(network)
        .with_context(|| format!("No block explorer known for network {network}"))?;
    let client = ExplorerClient::new(endpoint)?;

    let guid = client.verify_proxy(address, implementation).await?;
    tracing::info!(network, proxy = %address, guid = %guid, "Proxy verification submitted");

    if !wait {
        return Ok(());
    }

    for _ in 0..VERIFICATION_MAX_POLLS {
        tokio::time::sleep(VERIFICATION_POLL_INTERVAL).await;
        match client.check_proxy_verification(&guid).await? {
            ProxyVerificationStatus::Pending => {
                tracing::debug!(guid = %guid, "Verification pending...");
            }
            ProxyVerificationStatus::Verified(message) => {
                tracing::info!(
                    proxy = %address,
                    url = %client.endpoint().address_url(address),
                    "{message}"
                );
                return Ok(());
            }
        }
    }

    anyhow::bail!("Proxy verification {guid} still pending")
}
