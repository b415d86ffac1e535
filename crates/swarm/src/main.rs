use anyhow::anyhow;
use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use utils::version;

use swarm::builder::render_manifest_set;
use swarm::builder::ClusterBuilder;
use swarm::config::CleanupArgs;
use swarm::config::Cli;
use swarm::config::Commands;
use swarm::config::DeployArgs;
use swarm::config::RenderArgs;
use swarm::k8s::ClusterSwarm;
use swarm::k8s::ClusterSwarmKube;
use swarm::kube_client;

/// Sets up global panic hooks.
fn setup_global_hooks() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        default_hook(panic_info);
        tracing::error!("Thread panicked: {}", panic_info);
    }));
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_global_hooks();

    let cli = Cli::parse();

    match cli.command {
        Commands::Deploy(deploy_args) => run_deploy(*deploy_args).await,
        Commands::Render(render_args) => run_render(render_args),
        Commands::Cleanup(cleanup_args) => run_cleanup(cleanup_args).await,
    }
}

async fn run_deploy(deploy_args: DeployArgs) -> Result<()> {
    utils::logging::init();

    tracing::info!("Starting testnet deployment {}", &**version::VERSION);

    let client = kube_client::init_kube_client(deploy_args.connection.kubeconfig.clone())
        .await
        .map_err(|e| anyhow!("{e:?}"))?;
    let cluster_swarm = ClusterSwarmKube::new(
        client,
        deploy_args.connection.namespace.clone(),
        deploy_args.connection.node_selector.clone(),
    );
    let builder = ClusterBuilder::new(deploy_args.image_tag.clone(), cluster_swarm);

    let cluster = builder
        .setup_cluster(&deploy_args.params, deploy_args.clean_data)
        .await
        .map_err(|e| anyhow!("{e:?}"))?;

    println!("{}", serde_json::to_string_pretty(&cluster)?);
    Ok(())
}

fn run_render(render_args: RenderArgs) -> Result<()> {
    utils::logging::init();

    let manifests = render_manifest_set(
        &render_args.params,
        &render_args.image_tag,
        &render_args.seed_peer_ip,
    )
    .map_err(|e| anyhow!("{e:?}"))?;

    match render_args.out_dir {
        Some(out_dir) => {
            std::fs::create_dir_all(&out_dir)
                .with_context(|| format!("create output directory {}", out_dir.display()))?;
            for rendered in &manifests {
                let path = out_dir.join(format!("{}.yaml", rendered.pod_name));
                std::fs::write(&path, &rendered.manifest)
                    .with_context(|| format!("write manifest {}", path.display()))?;
            }
            tracing::info!("Wrote {} manifests to {}", manifests.len(), out_dir.display());
        }
        None => {
            for rendered in &manifests {
                println!("---");
                print!("{}", rendered.manifest);
            }
        }
    }
    Ok(())
}

async fn run_cleanup(cleanup_args: CleanupArgs) -> Result<()> {
    utils::logging::init();

    let client = kube_client::init_kube_client(cleanup_args.connection.kubeconfig.clone())
        .await
        .map_err(|e| anyhow!("{e:?}"))?;
    let cluster_swarm = ClusterSwarmKube::new(
        client,
        cleanup_args.connection.namespace.clone(),
        cleanup_args.connection.node_selector.clone(),
    );

    cluster_swarm.cleanup().await.map_err(|e| anyhow!("{e:?}"))?;
    tracing::info!("Removed all managed pods");
    Ok(())
}
