use serde::{Deserialize, Serialize};

use crate::meta::Condition;
use crate::pod::PodTemplate;
use crate::selector::LabelSelector;

// --- Deployment strategy ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum DeploymentStrategy {
    RollingUpdate {
        #[serde(default = "default_max_surge")]
        max_surge: u32,
        #[serde(default = "default_max_unavailable")]
        max_unavailable: u32,
    },
    Recreate,
}

fn default_max_surge() -> u32 {
    1
}
fn default_max_unavailable() -> u32 {
    0
}

impl Default for DeploymentStrategy {
    fn default() -> Self {
        DeploymentStrategy::RollingUpdate {
            max_surge: 1,
            max_unavailable: 0,
        }
    }
}

// --- Deployment status ---

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeploymentStatus {
    pub replicas: u32,
    pub ready_replicas: u32,
    pub available_replicas: u32,
    pub updated_replicas: u32,
    /// Last generation observed by the controller
    #[serde(default)]
    pub observed_generation: u64,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

// --- Deployment spec ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeploymentSpec {
    pub replicas: u32,
    /// Label selector for matching pods; defaults to the template labels when empty
    #[serde(default)]
    pub selector: LabelSelector,
    pub template: PodTemplate,
    #[serde(default)]
    pub strategy: DeploymentStrategy,
    #[serde(default)]
    pub paused: bool,
}

// --- Deployment ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Deployment {
    pub spec: DeploymentSpec,
    #[serde(default)]
    pub status: DeploymentStatus,
}
