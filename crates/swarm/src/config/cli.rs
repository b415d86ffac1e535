use clap::{Parser, Subcommand};
use utils::version;

use crate::config::args::{CleanupArgs, DeployArgs, RenderArgs};

#[derive(Parser)]
#[command(about, long_about, version = &**version::VERSION)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Deploy a validator / fullnode testnet onto the cluster
    Deploy(Box<DeployArgs>),
    /// Render the pod manifests without touching a cluster
    Render(RenderArgs),
    /// Delete every pod this tool manages
    Cleanup(CleanupArgs),
}
