use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::meta::Condition;
use crate::pod::PodTemplate;
use crate::selector::LabelSelector;

// --- DaemonSet status ---

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DaemonSetStatus {
    pub desired_number_scheduled: u32,
    pub current_number_scheduled: u32,
    pub number_ready: u32,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

// --- DaemonSet spec ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DaemonSetSpec {
    #[serde(default)]
    pub selector: LabelSelector,
    pub template: PodTemplate,
    /// Only schedule on nodes matching these labels
    #[serde(default)]
    pub node_selector: BTreeMap<String, String>,
}

// --- DaemonSet ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DaemonSet {
    pub spec: DaemonSetSpec,
    #[serde(default)]
    pub status: DaemonSetStatus,
}
