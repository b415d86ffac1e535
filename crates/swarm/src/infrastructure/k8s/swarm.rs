//! Cluster swarm backend: pins each testnet pod to its own worker node and
//! drives pod creation through the Kubernetes API.
//!
//! Pods run with `hostNetwork`, so a node can hold at most one testnet pod
//! and node allocation is exclusive.

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use error_stack::Report;
use error_stack::ResultExt;
use k8s_openapi::api::core::v1::Container;
use k8s_openapi::api::core::v1::HostPathVolumeSource;
use k8s_openapi::api::core::v1::Node;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::api::core::v1::PodSpec;
use k8s_openapi::api::core::v1::Toleration;
use k8s_openapi::api::core::v1::Volume;
use k8s_openapi::api::core::v1::VolumeMount;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::DeleteParams;
use kube::api::ListParams;
use kube::api::PostParams;
use kube::runtime::wait::await_condition;
use kube::runtime::wait::conditions;
use kube::runtime::wait::Condition;
use kube::Api;
use kube::Client;
use tracing::info;
use tracing::warn;
use utils::retry;

use crate::domain::cluster::Instance;
use crate::domain::instance::InstanceConfig;
use crate::infrastructure::k8s::types::KubeNode;
use crate::infrastructure::k8s::types::KubernetesError;

/// Label selector matching every pod this tool manages.
pub const MANAGED_LABEL: &str = "testnet/node=true";

const CLEANER_IMAGE: &str = "busybox:1.36";
const DATA_PATH: &str = "/data";
const POD_START_TIMEOUT: Duration = Duration::from_secs(300);
const POD_DELETE_TIMEOUT: Duration = Duration::from_secs(60);
const DATA_CLEAN_TIMEOUT: Duration = Duration::from_secs(120);
const CLEANUP_TIMEOUT: Duration = Duration::from_secs(120);

/// Operations the cluster builder needs from a Kubernetes backend.
#[async_trait]
pub trait ClusterSwarm: Send + Sync {
    /// Reserve a worker node for the named pod. Repeated calls with the same
    /// pod name return the same node.
    async fn allocate_node(&self, pod_name: &str) -> Result<KubeNode, Report<KubernetesError>>;

    /// Candidate worker nodes, sorted by name.
    async fn list_nodes(&self) -> Result<Vec<KubeNode>, Report<KubernetesError>>;

    /// Render the instance's manifest, submit it, and wait until the pod is
    /// Running. An existing pod of the same name is replaced.
    async fn spawn_instance(
        &self,
        config: &InstanceConfig,
    ) -> Result<Instance, Report<KubernetesError>>;

    /// Delete the named pod and wait until it is gone. Deleting an absent
    /// pod is not an error.
    async fn delete_instance(&self, pod_name: &str) -> Result<(), Report<KubernetesError>>;

    /// Wipe the chain data directory on a worker node.
    async fn clean_data(&self, node_name: &str) -> Result<(), Report<KubernetesError>>;

    /// Delete every managed pod in the namespace.
    async fn cleanup(&self) -> Result<(), Report<KubernetesError>>;
}

pub struct ClusterSwarmKube {
    client: Client,
    namespace: String,
    node_selector: String,
    allocations: Mutex<HashMap<String, KubeNode>>,
}

impl ClusterSwarmKube {
    /// `node_selector` is the label selector nodes must match to be eligible
    /// for testnet pods.
    pub fn new(client: Client, namespace: String, node_selector: String) -> Self {
        Self {
            client,
            namespace,
            node_selector,
            allocations: Mutex::new(HashMap::new()),
        }
    }

    fn pod_api(&self) -> Api<Pod> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    async fn candidate_nodes(&self) -> Result<Vec<KubeNode>, Report<KubernetesError>> {
        let api: Api<Node> = Api::all(self.client.clone());
        let nodes = api
            .list(&ListParams::default().labels(&self.node_selector))
            .await
            .map_err(|e| {
                Report::new(KubernetesError::NodeListFailed {
                    message: e.to_string(),
                })
            })?;
        let mut candidates: Vec<KubeNode> = nodes
            .into_iter()
            .filter(node_is_ready)
            .filter_map(kube_node_from)
            .collect();
        candidates.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(candidates)
    }
}

#[async_trait]
impl ClusterSwarm for ClusterSwarmKube {
    async fn allocate_node(&self, pod_name: &str) -> Result<KubeNode, Report<KubernetesError>> {
        if let Some(node) = self.allocations.lock().unwrap().get(pod_name) {
            return Ok(node.clone());
        }

        let candidates = self.candidate_nodes().await?;

        let mut allocations = self.allocations.lock().unwrap();
        if let Some(node) = allocations.get(pod_name) {
            return Ok(node.clone());
        }
        let used: HashSet<&str> = allocations.values().map(|n| n.name.as_str()).collect();
        let node = candidates
            .iter()
            .find(|candidate| !used.contains(candidate.name.as_str()))
            .cloned()
            .ok_or_else(|| {
                Report::new(KubernetesError::NodesExhausted {
                    pod_name: pod_name.to_string(),
                })
            })?;
        allocations.insert(pod_name.to_string(), node.clone());
        Ok(node)
    }

    async fn list_nodes(&self) -> Result<Vec<KubeNode>, Report<KubernetesError>> {
        self.candidate_nodes().await
    }

    #[tracing::instrument(skip(self, config), fields(pod_name = %config.pod_name()))]
    async fn spawn_instance(
        &self,
        config: &InstanceConfig,
    ) -> Result<Instance, Report<KubernetesError>> {
        let pod_name = config.pod_name();
        let node = self.allocate_node(&pod_name).await?;
        let pod = config
            .pod_spec(&node.name)
            .change_context(KubernetesError::SpawnFailed {
                pod_name: pod_name.clone(),
                message: "manifest rendering failed".to_string(),
            })?;

        let api = self.pod_api();
        self.delete_instance(&pod_name).await?;
        retry::retry_async(retry::fixed_retry_strategy(5000, 5), || {
            let api = api.clone();
            let pod = pod.clone();
            async move { api.create(&PostParams::default(), &pod).await }
        })
        .await
        .map_err(|e| {
            Report::new(KubernetesError::SpawnFailed {
                pod_name: pod_name.clone(),
                message: e.to_string(),
            })
        })?;

        let running = await_condition(api.clone(), &pod_name, conditions::is_pod_running());
        tokio::time::timeout(POD_START_TIMEOUT, running)
            .await
            .map_err(|_| {
                Report::new(KubernetesError::PodStartTimeout {
                    pod_name: pod_name.clone(),
                })
            })?
            .change_context(KubernetesError::SpawnFailed {
                pod_name: pod_name.clone(),
                message: "watching pod phase failed".to_string(),
            })?;

        let started = api.get(&pod_name).await.map_err(|e| {
            Report::new(KubernetesError::SpawnFailed {
                pod_name: pod_name.clone(),
                message: e.to_string(),
            })
        })?;
        let ip = started
            .status
            .and_then(|status| status.pod_ip)
            .unwrap_or_else(|| node.internal_ip.clone());

        info!("Spawned pod {} on node {}", pod_name, node.name);
        Ok(Instance {
            pod_name,
            ip,
            group: config.validator_group,
        })
    }

    async fn delete_instance(&self, pod_name: &str) -> Result<(), Report<KubernetesError>> {
        let api = self.pod_api();
        match api.delete(pod_name, &DeleteParams::default()).await {
            Ok(deleted) => {
                // Wait until the pod is fully gone so the name can be reused.
                if let Some(uid) = deleted.left().and_then(|pod| pod.metadata.uid) {
                    let gone = await_condition(api, pod_name, conditions::is_deleted(&uid));
                    tokio::time::timeout(POD_DELETE_TIMEOUT, gone)
                        .await
                        .map_err(|_| {
                            Report::new(KubernetesError::CleanupFailed {
                                message: format!("pod {pod_name} was not removed in time"),
                            })
                        })?
                        .change_context(KubernetesError::CleanupFailed {
                            message: format!("watching deletion of pod {pod_name} failed"),
                        })?;
                }
                Ok(())
            }
            Err(kube::Error::Api(err)) if err.code == 404 => Ok(()),
            Err(e) => Err(Report::new(KubernetesError::CleanupFailed {
                message: e.to_string(),
            })),
        }
    }

    #[tracing::instrument(skip(self))]
    async fn clean_data(&self, node_name: &str) -> Result<(), Report<KubernetesError>> {
        let pod_name = cleaner_pod_name(node_name);
        let api = self.pod_api();

        self.delete_instance(&pod_name).await?;
        api.create(&PostParams::default(), &cleaner_pod(node_name))
            .await
            .map_err(|e| {
                Report::new(KubernetesError::DataCleanFailed {
                    node_name: node_name.to_string(),
                    message: e.to_string(),
                })
            })?;

        let done = await_condition(api, &pod_name, pod_succeeded());
        tokio::time::timeout(DATA_CLEAN_TIMEOUT, done)
            .await
            .map_err(|_| {
                Report::new(KubernetesError::DataCleanFailed {
                    node_name: node_name.to_string(),
                    message: "cleaner pod did not finish in time".to_string(),
                })
            })?
            .change_context(KubernetesError::DataCleanFailed {
                node_name: node_name.to_string(),
                message: "watching cleaner pod failed".to_string(),
            })?;

        self.delete_instance(&pod_name).await?;
        info!("Wiped {} on node {}", DATA_PATH, node_name);
        Ok(())
    }

    async fn cleanup(&self) -> Result<(), Report<KubernetesError>> {
        let api = self.pod_api();
        let selector = ListParams::default().labels(MANAGED_LABEL);
        api.delete_collection(&DeleteParams::default(), &selector)
            .await
            .map_err(|e| {
                Report::new(KubernetesError::CleanupFailed {
                    message: e.to_string(),
                })
            })?;

        let deadline = tokio::time::Instant::now() + CLEANUP_TIMEOUT;
        loop {
            let remaining = api
                .list(&selector)
                .await
                .map_err(|e| {
                    Report::new(KubernetesError::CleanupFailed {
                        message: e.to_string(),
                    })
                })?
                .items
                .len();
            if remaining == 0 {
                break;
            }
            if tokio::time::Instant::now() > deadline {
                return Err(Report::new(KubernetesError::CleanupFailed {
                    message: format!("{remaining} managed pods still terminating"),
                }));
            }
            warn!("Waiting for {} managed pods to terminate", remaining);
            tokio::time::sleep(Duration::from_secs(2)).await;
        }

        self.allocations.lock().unwrap().clear();
        Ok(())
    }
}

fn cleaner_pod_name(node_name: &str) -> String {
    format!("clean-{node_name}")
}

/// Short-lived pod that wipes the hostPath data directory on its node.
fn cleaner_pod(node_name: &str) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(cleaner_pod_name(node_name)),
            labels: Some(
                [("testnet/node".to_string(), "true".to_string())]
                    .into_iter()
                    .collect(),
            ),
            ..Default::default()
        },
        spec: Some(PodSpec {
            node_name: Some(node_name.to_string()),
            restart_policy: Some("Never".to_string()),
            tolerations: Some(vec![Toleration {
                key: Some("testnet/node-pool".to_string()),
                operator: Some("Exists".to_string()),
                effect: Some("NoSchedule".to_string()),
                ..Default::default()
            }]),
            containers: vec![Container {
                name: "clean".to_string(),
                image: Some(CLEANER_IMAGE.to_string()),
                command: Some(vec![
                    "sh".to_string(),
                    "-c".to_string(),
                    format!("rm -rf {DATA_PATH}/*"),
                ]),
                volume_mounts: Some(vec![VolumeMount {
                    name: "data".to_string(),
                    mount_path: DATA_PATH.to_string(),
                    ..Default::default()
                }]),
                ..Default::default()
            }],
            volumes: Some(vec![Volume {
                name: "data".to_string(),
                host_path: Some(HostPathVolumeSource {
                    path: DATA_PATH.to_string(),
                    type_: Some("DirectoryOrCreate".to_string()),
                }),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        status: None,
    }
}

fn pod_succeeded() -> impl Condition<Pod> {
    |obj: Option<&Pod>| {
        obj.and_then(|pod| pod.status.as_ref())
            .and_then(|status| status.phase.as_ref())
            .is_some_and(|phase| phase == "Succeeded")
    }
}

fn node_is_ready(node: &Node) -> bool {
    node.status
        .as_ref()
        .and_then(|status| status.conditions.as_ref())
        .is_some_and(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
}

fn kube_node_from(node: Node) -> Option<KubeNode> {
    let name = node.metadata.name?;
    let internal_ip = node
        .status?
        .addresses?
        .into_iter()
        .find(|address| address.type_ == "InternalIP")?
        .address;
    Some(KubeNode { name, internal_ip })
}
