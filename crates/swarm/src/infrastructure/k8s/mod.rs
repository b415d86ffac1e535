//! Kubernetes integration module.
//!
//! The main components are:
//! - [`ClusterSwarm`]: the operations the cluster builder needs from a
//!   Kubernetes backend
//! - [`ClusterSwarmKube`]: the kube-client implementation of it
//! - [`KubeNode`]: a worker node a pod can be pinned to

pub mod swarm;
pub mod types;

pub use swarm::ClusterSwarm;
pub use swarm::ClusterSwarmKube;
pub use swarm::MANAGED_LABEL;
pub use types::KubeNode;
pub use types::KubernetesError;
