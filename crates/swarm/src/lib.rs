pub mod config;
pub mod domain;
pub mod infrastructure;

// Re-export main modules
pub use domain::builder;
pub use domain::cluster;
pub use domain::instance;
pub use domain::manifest;
pub use infrastructure::k8s;
pub use infrastructure::kube_client;
