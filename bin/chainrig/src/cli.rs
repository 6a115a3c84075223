use std::path::PathBuf;

use alloy_core::primitives::Address;
use chainrig_deploy::CONFIG_FILENAME;
use clap::{Parser, Subcommand};
use tracing::level_filters::LevelFilter;

#[derive(Parser)]
#[command(name = "chainrig")]
#[command(
    author,
    version,
    about = "Deploy and initialize upgradeable proxies across EVM networks"
)]
pub struct Cli {
    /// The verbosity level.
    #[arg(
        short,
        long,
        env = "CHAINRIG_VERBOSITY",
        default_value_t = LevelFilter::INFO,
        global = true
    )]
    pub verbosity: LevelFilter,

    /// Path to the project configuration (a file, or a directory holding Chainrig.toml).
    #[arg(
        long,
        alias = "conf",
        env = "CHAINRIG_CONFIG",
        default_value = CONFIG_FILENAME,
        global = true
    )]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Deploy (or upgrade) the proxy of a plan and run its initialization calls.
    Run {
        /// Path to the plan file.
        plan: PathBuf,

        /// Name of the target network, as declared in the configuration.
        #[arg(short, long, env = "CHAINRIG_NETWORK")]
        network: String,

        /// Continue a partial deployment from its next step.
        ///
        /// Refused if the plan changed since the partial deployment was recorded.
        #[arg(long, default_value_t = false)]
        resume: bool,
    },

    /// List the configured networks.
    Networks,

    /// Show the deployment record of a plan on a network.
    Status {
        /// Path to the plan file.
        plan: PathBuf,

        #[arg(short, long, env = "CHAINRIG_NETWORK")]
        network: String,
    },

    /// Ask the network's block explorer to link a proxy to its implementation.
    VerifyProxy {
        /// Address of the proxy.
        address: Address,

        #[arg(short, long, env = "CHAINRIG_NETWORK")]
        network: String,

        /// Implementation the explorer should find behind the proxy.
        #[arg(long)]
        implementation: Option<Address>,

        /// Poll until the explorer reports the result.
        #[arg(long, default_value_t = false)]
        wait: bool,
    },
}
