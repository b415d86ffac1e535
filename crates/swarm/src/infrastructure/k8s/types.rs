use core::error::Error;

/// A schedulable worker node a testnet pod can be pinned to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KubeNode {
    pub name: String,
    pub internal_ip: String,
}

/// Errors that can occur during Kubernetes operations.
#[derive(Debug, derive_more::Display)]
pub enum KubernetesError {
    #[display("Failed to connect to Kubernetes API: {message}")]
    ConnectionFailed { message: String },
    #[display("Failed to list candidate nodes: {message}")]
    NodeListFailed { message: String },
    #[display("No schedulable node left for pod {pod_name}")]
    NodesExhausted { pod_name: String },
    #[display("Failed to spawn pod {pod_name}: {message}")]
    SpawnFailed { pod_name: String, message: String },
    #[display("Pod {pod_name} did not reach Running phase in time")]
    PodStartTimeout { pod_name: String },
    #[display("Failed to delete pods: {message}")]
    CleanupFailed { message: String },
    #[display("Failed to wipe data on node {node_name}: {message}")]
    DataCleanFailed { node_name: String, message: String },
}

impl Error for KubernetesError {}
