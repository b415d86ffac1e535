use std::path::PathBuf;

use clap::Parser;

use crate::domain::builder::ClusterBuilderParams;

/// How to reach the cluster and which nodes may run testnet pods.
#[derive(Clone, Debug, Parser)]
pub struct ConnectionArgs {
    #[arg(
        long,
        env = "KUBECONFIG",
        value_hint = clap::ValueHint::FilePath,
        help = "Path to kubeconfig file (defaults to cluster config or ~/.kube/config)"
    )]
    pub kubeconfig: Option<PathBuf>,

    #[arg(
        long,
        env = "TESTNET_NAMESPACE",
        default_value = "default",
        help = "Kubernetes namespace the testnet pods live in"
    )]
    pub namespace: String,

    #[arg(
        long,
        default_value = "testnet/node-pool=testnet",
        help = "Label selector for nodes eligible to run testnet pods"
    )]
    pub node_selector: String,
}

#[derive(Clone, Debug, Parser)]
pub struct DeployArgs {
    #[command(flatten)]
    pub connection: ConnectionArgs,

    #[command(flatten)]
    pub params: ClusterBuilderParams,

    #[arg(long, help = "Image tag to deploy for validators and fullnodes")]
    pub image_tag: String,

    #[arg(
        long,
        default_value_t = false,
        action = clap::ArgAction::Set,
        help = "Wipe per-node chain data before deploying"
    )]
    pub clean_data: bool,
}

#[derive(Clone, Debug, Parser)]
pub struct RenderArgs {
    #[command(flatten)]
    pub params: ClusterBuilderParams,

    #[arg(long, help = "Image tag to render into the manifests")]
    pub image_tag: String,

    #[arg(
        long,
        default_value = "10.0.0.1",
        help = "Seed peer address rendered into the manifests"
    )]
    pub seed_peer_ip: String,

    #[arg(
        long,
        value_hint = clap::ValueHint::DirPath,
        help = "Write one manifest file per pod instead of printing a multi-doc stream"
    )]
    pub out_dir: Option<PathBuf>,
}

#[derive(Clone, Debug, Parser)]
pub struct CleanupArgs {
    #[command(flatten)]
    pub connection: ConnectionArgs,
}
