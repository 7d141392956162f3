use serde::{Deserialize, Serialize};

use crate::meta::Condition;
use crate::pod::PodTemplate;
use crate::selector::LabelSelector;

// --- ReplicaSet status ---

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReplicaSetStatus {
    pub replicas: u32,
    pub ready_replicas: u32,
    pub available_replicas: u32,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

// --- ReplicaSet spec ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReplicaSetSpec {
    pub replicas: u32,
    #[serde(default)]
    pub selector: LabelSelector,
    pub template: PodTemplate,
}

// --- ReplicaSet ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReplicaSet {
    pub spec: ReplicaSetSpec,
    #[serde(default)]
    pub status: ReplicaSetStatus,
}
