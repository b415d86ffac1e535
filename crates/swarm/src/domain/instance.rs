//! Typed configuration for the pods a testnet deployment is made of.
//!
//! An [`InstanceConfig`] is the single producer of placeholder bindings for
//! the manifest templates: every token value a rendered pod carries is
//! derived from one of these structs.

use error_stack::Report;
use k8s_openapi::api::core::v1::Pod;
use serde::Serialize;

use crate::domain::manifest::Template;
use crate::domain::manifest::TemplateError;
use crate::domain::manifest::TemplateVars;

/// Shared key-derivation seed baked into every node config unless a
/// deployment overrides it.
pub const DEFAULT_SEED: &str = "1337133713371337133713371337133713371337133713371337133713371337";
/// Seed for the fullnode network, distinct from the validator network seed.
pub const DEFAULT_FULLNODE_SEED: &str =
    "beefbeefbeefbeefbeefbeefbeefbeefbeefbeefbeefbeefbeefbeefbeefbeef";

pub fn validator_pod_name(validator_index: u32) -> String {
    format!("val-{validator_index}")
}

pub fn fullnode_pod_name(validator_index: u32, fullnode_index: u32) -> String {
    format!("fn-{validator_index}-{fullnode_index}")
}

/// Index of the validator a pod belongs to; a validator and its fullnodes
/// share a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ValidatorGroup(u32);

impl ValidatorGroup {
    pub fn new_for_index(index: u32) -> Self {
        Self(index)
    }

    pub fn index(&self) -> u32 {
        self.0
    }
}

#[derive(Debug, Clone)]
pub struct ValidatorConfig {
    pub num_validators: u32,
    pub num_fullnodes: u32,
    pub image_tag: String,
    pub config_overrides: Vec<String>,
    pub seed: String,
    pub seed_peer_ip: String,
}

#[derive(Debug, Clone)]
pub struct FullnodeConfig {
    pub fullnode_index: u32,
    pub num_fullnodes_per_validator: u32,
    pub num_validators: u32,
    pub image_tag: String,
    pub config_overrides: Vec<String>,
    pub seed: String,
    pub seed_peer_ip: String,
    pub fullnode_seed: String,
}

#[derive(Debug, Clone)]
pub enum ApplicationConfig {
    Validator(ValidatorConfig),
    Fullnode(FullnodeConfig),
}

#[derive(Debug, Clone)]
pub struct InstanceConfig {
    pub validator_group: ValidatorGroup,
    pub application_config: ApplicationConfig,
}

impl InstanceConfig {
    pub fn pod_name(&self) -> String {
        let validator_index = self.validator_group.index();
        match &self.application_config {
            ApplicationConfig::Validator(_) => validator_pod_name(validator_index),
            ApplicationConfig::Fullnode(fullnode_config) => {
                fullnode_pod_name(validator_index, fullnode_config.fullnode_index)
            }
        }
    }

    pub fn template(&self) -> Template {
        match &self.application_config {
            ApplicationConfig::Validator(_) => Template::validator(),
            ApplicationConfig::Fullnode(_) => Template::fullnode(),
        }
    }

    /// Bind every placeholder the instance's template needs. `node_name` is
    /// the worker node the pod gets pinned to.
    pub fn template_vars(&self, node_name: &str) -> TemplateVars {
        let validator_index = self.validator_group.index();
        match &self.application_config {
            ApplicationConfig::Validator(config) => TemplateVars::new()
                .set("validator_index", validator_index)
                .set("node_name", node_name)
                .set("image_tag", &config.image_tag)
                .set("num_validators", config.num_validators)
                .set("num_fullnodes", config.num_fullnodes)
                .set("cfg_seed", &config.seed)
                .set("cfg_seed_peer_ip", &config.seed_peer_ip)
                .set("cfg_overrides", config.config_overrides.join(",")),
            ApplicationConfig::Fullnode(config) => TemplateVars::new()
                .set("validator_index", validator_index)
                .set("fullnode_index", config.fullnode_index)
                .set("node_name", node_name)
                .set("image_tag", &config.image_tag)
                .set("num_validators", config.num_validators)
                .set("num_fullnodes", config.num_fullnodes_per_validator)
                .set("cfg_seed", &config.seed)
                .set("cfg_seed_peer_ip", &config.seed_peer_ip)
                .set("cfg_fullnode_seed", &config.fullnode_seed)
                .set("cfg_overrides", config.config_overrides.join(",")),
        }
    }

    /// The manifest for this instance, rendered but kept as YAML text.
    pub fn rendered_manifest(&self, node_name: &str) -> Result<String, Report<TemplateError>> {
        self.template().render(&self.template_vars(node_name))
    }

    /// The verified Pod object for this instance.
    pub fn pod_spec(&self, node_name: &str) -> Result<Pod, Report<TemplateError>> {
        self.template().render_pod(&self.template_vars(node_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator_instance(index: u32) -> InstanceConfig {
        InstanceConfig {
            validator_group: ValidatorGroup::new_for_index(index),
            application_config: ApplicationConfig::Validator(ValidatorConfig {
                num_validators: 4,
                num_fullnodes: 1,
                image_tag: "nightly".to_string(),
                config_overrides: vec!["prune_window=50000".to_string(), "mempool=8192".to_string()],
                seed: DEFAULT_SEED.to_string(),
                seed_peer_ip: "10.0.0.1".to_string(),
            }),
        }
    }

    fn fullnode_instance(validator_index: u32, fullnode_index: u32) -> InstanceConfig {
        InstanceConfig {
            validator_group: ValidatorGroup::new_for_index(validator_index),
            application_config: ApplicationConfig::Fullnode(FullnodeConfig {
                fullnode_index,
                num_fullnodes_per_validator: 2,
                num_validators: 4,
                image_tag: "nightly".to_string(),
                config_overrides: vec![],
                seed: DEFAULT_SEED.to_string(),
                seed_peer_ip: "10.0.0.1".to_string(),
                fullnode_seed: DEFAULT_FULLNODE_SEED.to_string(),
            }),
        }
    }

    #[test]
    fn pod_names_follow_the_naming_scheme() {
        assert_eq!(validator_instance(0).pod_name(), "val-0");
        assert_eq!(validator_instance(17).pod_name(), "val-17");
        assert_eq!(fullnode_instance(3, 1).pod_name(), "fn-3-1");
    }

    #[test]
    fn validator_vars_bind_joined_overrides() {
        let vars = validator_instance(2).template_vars("node-a");
        assert_eq!(vars.get("validator_index"), Some("2"));
        assert_eq!(vars.get("node_name"), Some("node-a"));
        assert_eq!(vars.get("cfg_overrides"), Some("prune_window=50000,mempool=8192"));
        assert_eq!(vars.get("fullnode_index"), None);
    }

    #[test]
    fn fullnode_vars_bind_both_seeds() {
        let vars = fullnode_instance(1, 0).template_vars("node-b");
        assert_eq!(vars.get("cfg_seed"), Some(DEFAULT_SEED));
        assert_eq!(vars.get("cfg_fullnode_seed"), Some(DEFAULT_FULLNODE_SEED));
        assert_eq!(vars.get("num_fullnodes"), Some("2"));
    }

    #[test]
    fn pod_spec_pins_the_given_node() {
        let pod = validator_instance(0).pod_spec("node-xyz").unwrap();
        assert_eq!(
            pod.spec.and_then(|spec| spec.node_name).as_deref(),
            Some("node-xyz")
        );
    }

    #[test]
    fn empty_overrides_render_as_empty_value() {
        let pod = fullnode_instance(0, 0).pod_spec("node-a").unwrap();
        let env = pod.spec.expect("pod spec").containers[0]
            .env
            .clone()
            .expect("env");
        let overrides = env
            .iter()
            .find(|e| e.name == "CFG_OVERRIDES")
            .expect("CFG_OVERRIDES");
        assert_eq!(overrides.value.as_deref(), Some(""));
    }
}
