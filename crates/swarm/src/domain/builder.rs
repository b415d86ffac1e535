//! Orchestrates a full validator / fullnode set deployment.

use core::error::Error;

use clap::Parser;
use error_stack::Report;
use error_stack::ResultExt;
use futures::future::try_join_all;
use tracing::info;

use crate::domain::cluster::Cluster;
use crate::domain::cluster::Instance;
use crate::domain::instance::fullnode_pod_name;
use crate::domain::instance::validator_pod_name;
use crate::domain::instance::ApplicationConfig;
use crate::domain::instance::FullnodeConfig;
use crate::domain::instance::InstanceConfig;
use crate::domain::instance::ValidatorConfig;
use crate::domain::instance::ValidatorGroup;
use crate::domain::instance::DEFAULT_FULLNODE_SEED;
use crate::domain::instance::DEFAULT_SEED;
use crate::domain::manifest;
use crate::domain::manifest::TemplateError;
use crate::infrastructure::k8s::ClusterSwarm;

#[derive(Debug, derive_more::Display)]
pub enum ClusterError {
    #[display("At least one validator is required")]
    NoValidators,
    #[display("Cluster needs {required} schedulable nodes, only {available} available")]
    InsufficientCapacity { required: u32, available: usize },
    #[display("Failed to deploy cluster")]
    DeployFailed,
}

impl Error for ClusterError {}

#[derive(Clone, Debug, Parser)]
pub struct ClusterBuilderParams {
    #[arg(long, default_value_t = 30, help = "Number of validator pods to deploy")]
    pub num_validators: u32,

    #[arg(long, default_value_t = 1, help = "Fullnode pods per validator")]
    pub fullnodes_per_validator: u32,

    #[arg(
        long,
        value_delimiter = ',',
        help = "Extra node config overrides, key=value"
    )]
    pub cfg: Vec<String>,
}

impl ClusterBuilderParams {
    pub fn cfg_overrides(&self) -> Vec<String> {
        // Default overrides
        let mut overrides = vec!["prune_window=50000".to_string()];

        // overrides from the command line
        overrides.extend(self.cfg.iter().cloned());

        overrides
    }

    /// Total pod count of the deployment; every pod takes a node of its own.
    pub fn instance_count(&self) -> u32 {
        self.num_validators + self.num_validators * self.fullnodes_per_validator
    }
}

pub struct ClusterBuilder<S> {
    image_tag: String,
    cluster_swarm: S,
}

impl<S: ClusterSwarm> ClusterBuilder<S> {
    pub fn new(image_tag: String, cluster_swarm: S) -> Self {
        Self {
            image_tag,
            cluster_swarm,
        }
    }

    pub async fn setup_cluster(
        &self,
        params: &ClusterBuilderParams,
        clean_data: bool,
    ) -> Result<Cluster, Report<ClusterError>> {
        if params.num_validators == 0 {
            return Err(Report::new(ClusterError::NoValidators));
        }

        self.cluster_swarm
            .cleanup()
            .await
            .change_context(ClusterError::DeployFailed)
            .attach_printable("cleanup on startup failed")?;

        let available = self
            .cluster_swarm
            .list_nodes()
            .await
            .change_context(ClusterError::DeployFailed)?
            .len();
        let required = params.instance_count();
        if available < required as usize {
            return Err(Report::new(ClusterError::InsufficientCapacity {
                required,
                available,
            }));
        }

        info!(
            "Deploying with {} tag for validators and fullnodes",
            self.image_tag
        );
        let (validators, fullnodes) = self
            .spawn_validator_and_fullnode_set(
                params.num_validators,
                params.fullnodes_per_validator,
                &params.cfg_overrides(),
                clean_data,
            )
            .await?;
        let cluster = Cluster::new(validators, fullnodes);

        info!(
            "Deployed {} validators and {} fullnodes",
            cluster.validator_instances().len(),
            cluster.fullnode_instances().len(),
        );
        Ok(cluster)
    }

    /// Creates a set of validators and fullnodes with the given parameters
    pub async fn spawn_validator_and_fullnode_set(
        &self,
        num_validators: u32,
        fullnodes_per_validator: u32,
        config_overrides: &[String],
        clean_data: bool,
    ) -> Result<(Vec<Instance>, Vec<Instance>), Report<ClusterError>> {
        if num_validators == 0 {
            return Err(Report::new(ClusterError::NoValidators));
        }

        // Pin every pod to its node up front; the seed peer address must be
        // known before the first manifest renders.
        let validator_nodes = try_join_all((0..num_validators).map(|i| async move {
            let pod_name = validator_pod_name(i);
            self.cluster_swarm.allocate_node(&pod_name).await
        }))
        .await
        .change_context(ClusterError::DeployFailed)?;

        let fullnode_nodes = try_join_all((0..num_validators).flat_map(|validator_index| {
            (0..fullnodes_per_validator).map(move |fullnode_index| async move {
                let pod_name = fullnode_pod_name(validator_index, fullnode_index);
                self.cluster_swarm.allocate_node(&pod_name).await
            })
        }))
        .await
        .change_context(ClusterError::DeployFailed)?;

        if clean_data {
            try_join_all(
                validator_nodes
                    .iter()
                    .chain(fullnode_nodes.iter())
                    .map(|node| self.cluster_swarm.clean_data(&node.name)),
            )
            .await
            .change_context(ClusterError::DeployFailed)?;
        }

        let seed_peer_ip = validator_nodes[0].internal_ip.clone();

        let validators = try_join_all((0..num_validators).map(|i| {
            let seed_peer_ip = seed_peer_ip.clone();
            async move {
                let config = validator_instance_config(
                    i,
                    num_validators,
                    fullnodes_per_validator,
                    &self.image_tag,
                    config_overrides,
                    &seed_peer_ip,
                );
                self.cluster_swarm.spawn_instance(&config).await
            }
        }))
        .await
        .change_context(ClusterError::DeployFailed)?;

        let fullnodes = try_join_all((0..num_validators).flat_map(|validator_index| {
            let validator_nodes = &validator_nodes;
            (0..fullnodes_per_validator).map(move |fullnode_index| {
                let seed_peer_ip = validator_nodes[validator_index as usize].internal_ip.clone();
                async move {
                    let config = fullnode_instance_config(
                        validator_index,
                        fullnode_index,
                        num_validators,
                        fullnodes_per_validator,
                        &self.image_tag,
                        config_overrides,
                        &seed_peer_ip,
                    );
                    self.cluster_swarm.spawn_instance(&config).await
                }
            })
        }))
        .await
        .change_context(ClusterError::DeployFailed)?;

        Ok((validators, fullnodes))
    }
}

fn validator_instance_config(
    validator_index: u32,
    num_validators: u32,
    fullnodes_per_validator: u32,
    image_tag: &str,
    config_overrides: &[String],
    seed_peer_ip: &str,
) -> InstanceConfig {
    InstanceConfig {
        validator_group: ValidatorGroup::new_for_index(validator_index),
        application_config: ApplicationConfig::Validator(ValidatorConfig {
            num_validators,
            num_fullnodes: fullnodes_per_validator,
            image_tag: image_tag.to_string(),
            config_overrides: config_overrides.to_vec(),
            seed: DEFAULT_SEED.to_string(),
            seed_peer_ip: seed_peer_ip.to_string(),
        }),
    }
}

fn fullnode_instance_config(
    validator_index: u32,
    fullnode_index: u32,
    num_validators: u32,
    fullnodes_per_validator: u32,
    image_tag: &str,
    config_overrides: &[String],
    seed_peer_ip: &str,
) -> InstanceConfig {
    InstanceConfig {
        validator_group: ValidatorGroup::new_for_index(validator_index),
        application_config: ApplicationConfig::Fullnode(FullnodeConfig {
            fullnode_index,
            num_fullnodes_per_validator: fullnodes_per_validator,
            num_validators,
            image_tag: image_tag.to_string(),
            config_overrides: config_overrides.to_vec(),
            seed: DEFAULT_SEED.to_string(),
            seed_peer_ip: seed_peer_ip.to_string(),
            fullnode_seed: DEFAULT_FULLNODE_SEED.to_string(),
        }),
    }
}

/// A manifest rendered offline, without a cluster to pin pods to.
#[derive(Debug, Clone)]
pub struct RenderedManifest {
    pub pod_name: String,
    pub manifest: String,
}

/// Render and verify the full manifest set of a deployment. Pods are pinned
/// to synthetic `node-{ordinal}` names; an external scheduler or a later
/// patch supplies real ones.
pub fn render_manifest_set(
    params: &ClusterBuilderParams,
    image_tag: &str,
    seed_peer_ip: &str,
) -> Result<Vec<RenderedManifest>, Report<TemplateError>> {
    let overrides = params.cfg_overrides();
    let mut manifests = Vec::new();
    let mut ordinal = 0_u32;

    for validator_index in 0..params.num_validators {
        let config = validator_instance_config(
            validator_index,
            params.num_validators,
            params.fullnodes_per_validator,
            image_tag,
            &overrides,
            seed_peer_ip,
        );
        manifests.push(render_one(&config, ordinal)?);
        ordinal += 1;
    }
    for validator_index in 0..params.num_validators {
        for fullnode_index in 0..params.fullnodes_per_validator {
            let config = fullnode_instance_config(
                validator_index,
                fullnode_index,
                params.num_validators,
                params.fullnodes_per_validator,
                image_tag,
                &overrides,
                seed_peer_ip,
            );
            manifests.push(render_one(&config, ordinal)?);
            ordinal += 1;
        }
    }
    Ok(manifests)
}

fn render_one(
    config: &InstanceConfig,
    ordinal: u32,
) -> Result<RenderedManifest, Report<TemplateError>> {
    let manifest = config.rendered_manifest(&format!("node-{ordinal}"))?;
    manifest::verify_manifest(config.template().name(), &manifest)?;
    Ok(RenderedManifest {
        pod_name: config.pod_name(),
        manifest,
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::collections::HashSet;
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::infrastructure::k8s::KubeNode;
    use crate::infrastructure::k8s::KubernetesError;

    struct MockSwarm {
        nodes: Vec<KubeNode>,
        allocations: Mutex<HashMap<String, KubeNode>>,
        spawned: Mutex<Vec<InstanceConfig>>,
        cleaned: Mutex<Vec<String>>,
        cleanups: AtomicUsize,
    }

    impl MockSwarm {
        fn with_capacity(capacity: usize) -> Self {
            Self {
                nodes: (0..capacity)
                    .map(|i| KubeNode {
                        name: format!("node-{i}"),
                        internal_ip: format!("10.0.0.{i}"),
                    })
                    .collect(),
                allocations: Mutex::new(HashMap::new()),
                spawned: Mutex::new(Vec::new()),
                cleaned: Mutex::new(Vec::new()),
                cleanups: AtomicUsize::new(0),
            }
        }

        fn node_for(&self, pod_name: &str) -> KubeNode {
            self.allocations.lock().unwrap()[pod_name].clone()
        }
    }

    #[async_trait]
    impl ClusterSwarm for MockSwarm {
        async fn allocate_node(
            &self,
            pod_name: &str,
        ) -> Result<KubeNode, error_stack::Report<KubernetesError>> {
            let mut allocations = self.allocations.lock().unwrap();
            if let Some(node) = allocations.get(pod_name) {
                return Ok(node.clone());
            }
            let used: HashSet<&str> = allocations.values().map(|n| n.name.as_str()).collect();
            let node = self
                .nodes
                .iter()
                .find(|node| !used.contains(node.name.as_str()))
                .cloned()
                .ok_or_else(|| {
                    error_stack::Report::new(KubernetesError::NodesExhausted {
                        pod_name: pod_name.to_string(),
                    })
                })?;
            allocations.insert(pod_name.to_string(), node.clone());
            Ok(node)
        }

        async fn list_nodes(&self) -> Result<Vec<KubeNode>, error_stack::Report<KubernetesError>> {
            Ok(self.nodes.clone())
        }

        async fn spawn_instance(
            &self,
            config: &InstanceConfig,
        ) -> Result<Instance, error_stack::Report<KubernetesError>> {
            let node = self.allocate_node(&config.pod_name()).await?;
            self.spawned.lock().unwrap().push(config.clone());
            Ok(Instance {
                pod_name: config.pod_name(),
                ip: node.internal_ip,
                group: config.validator_group,
            })
        }

        async fn delete_instance(
            &self,
            _pod_name: &str,
        ) -> Result<(), error_stack::Report<KubernetesError>> {
            Ok(())
        }

        async fn clean_data(
            &self,
            node_name: &str,
        ) -> Result<(), error_stack::Report<KubernetesError>> {
            self.cleaned.lock().unwrap().push(node_name.to_string());
            Ok(())
        }

        async fn cleanup(&self) -> Result<(), error_stack::Report<KubernetesError>> {
            self.cleanups.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn params(num_validators: u32, fullnodes_per_validator: u32) -> ClusterBuilderParams {
        ClusterBuilderParams {
            num_validators,
            fullnodes_per_validator,
            cfg: vec![],
        }
    }

    #[test_log::test(tokio::test)]
    async fn deploys_the_expected_pod_set() {
        let builder = ClusterBuilder::new("nightly".to_string(), MockSwarm::with_capacity(4));
        let cluster = builder.setup_cluster(&params(2, 1), false).await.unwrap();

        let validator_names: Vec<_> = cluster
            .validator_instances()
            .iter()
            .map(|i| i.pod_name.as_str())
            .collect();
        let fullnode_names: Vec<_> = cluster
            .fullnode_instances()
            .iter()
            .map(|i| i.pod_name.as_str())
            .collect();
        assert_eq!(validator_names, vec!["val-0", "val-1"]);
        assert_eq!(fullnode_names, vec!["fn-0-0", "fn-1-0"]);
        assert_eq!(builder.cluster_swarm.cleanups.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn seed_peers_follow_the_allocated_nodes() {
        let builder = ClusterBuilder::new("nightly".to_string(), MockSwarm::with_capacity(6));
        builder.setup_cluster(&params(2, 2), false).await.unwrap();

        let swarm = &builder.cluster_swarm;
        let validator_seed_ip = swarm.node_for("val-0").internal_ip;
        let spawned = swarm.spawned.lock().unwrap();
        for config in spawned.iter() {
            match &config.application_config {
                ApplicationConfig::Validator(v) => {
                    assert_eq!(v.seed_peer_ip, validator_seed_ip);
                }
                ApplicationConfig::Fullnode(f) => {
                    let own_validator =
                        swarm.node_for(&validator_pod_name(config.validator_group.index()));
                    assert_eq!(f.seed_peer_ip, own_validator.internal_ip);
                }
            }
        }
        assert_eq!(spawned.len(), 6);
    }

    #[tokio::test]
    async fn insufficient_capacity_is_rejected_up_front() {
        let builder = ClusterBuilder::new("nightly".to_string(), MockSwarm::with_capacity(2));
        let err = builder.setup_cluster(&params(2, 1), false).await.unwrap_err();
        assert!(matches!(
            err.current_context(),
            ClusterError::InsufficientCapacity {
                required: 4,
                available: 2
            }
        ));
        assert!(builder.cluster_swarm.spawned.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn zero_validators_is_rejected() {
        let builder = ClusterBuilder::new("nightly".to_string(), MockSwarm::with_capacity(4));
        let err = builder.setup_cluster(&params(0, 1), false).await.unwrap_err();
        assert!(matches!(err.current_context(), ClusterError::NoValidators));
    }

    #[tokio::test]
    async fn clean_data_wipes_every_allocated_node() {
        let builder = ClusterBuilder::new("nightly".to_string(), MockSwarm::with_capacity(4));
        builder.setup_cluster(&params(2, 1), true).await.unwrap();

        let cleaned: HashSet<_> = builder
            .cluster_swarm
            .cleaned
            .lock()
            .unwrap()
            .iter()
            .cloned()
            .collect();
        let allocated: HashSet<_> = builder
            .cluster_swarm
            .allocations
            .lock()
            .unwrap()
            .values()
            .map(|node| node.name.clone())
            .collect();
        assert_eq!(cleaned, allocated);
        assert_eq!(cleaned.len(), 4);
    }

    #[test]
    fn cfg_overrides_keep_the_default_prune_window() {
        let params =
            ClusterBuilderParams::try_parse_from(["swarm", "--cfg", "a=1,b=2"]).unwrap();
        assert_eq!(
            params.cfg_overrides(),
            vec!["prune_window=50000", "a=1", "b=2"]
        );

        let defaults = ClusterBuilderParams::try_parse_from(["swarm"]).unwrap();
        assert_eq!(defaults.num_validators, 30);
        assert_eq!(defaults.fullnodes_per_validator, 1);
        assert_eq!(defaults.cfg_overrides(), vec!["prune_window=50000"]);
    }

    #[test]
    fn rendered_set_covers_every_pod_once() {
        let set = render_manifest_set(&params(2, 2), "nightly", "10.0.0.1").unwrap();
        let names: Vec<_> = set.iter().map(|m| m.pod_name.as_str()).collect();
        assert_eq!(
            names,
            vec!["val-0", "val-1", "fn-0-0", "fn-0-1", "fn-1-0", "fn-1-1"]
        );
        for manifest in &set {
            assert!(manifest::unresolved_tokens(&manifest.manifest).is_empty());
        }
    }
}
