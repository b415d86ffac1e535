//! Model of a deployed testnet: which pods run where.

use std::fmt;

use serde::Serialize;

use crate::domain::instance::ValidatorGroup;

/// A running pod of the deployed testnet.
#[derive(Debug, Clone, Serialize)]
pub struct Instance {
    pub pod_name: String,
    pub ip: String,
    pub group: ValidatorGroup,
}

impl fmt::Display for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.pod_name, self.ip)
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Cluster {
    validators: Vec<Instance>,
    fullnodes: Vec<Instance>,
}

impl Cluster {
    pub fn new(validators: Vec<Instance>, fullnodes: Vec<Instance>) -> Self {
        Self {
            validators,
            fullnodes,
        }
    }

    pub fn validator_instances(&self) -> &[Instance] {
        &self.validators
    }

    pub fn fullnode_instances(&self) -> &[Instance] {
        &self.fullnodes
    }

    pub fn all_instances(&self) -> impl Iterator<Item = &Instance> {
        self.validators.iter().chain(self.fullnodes.iter())
    }
}
