use serde::{Deserialize, Serialize};

use crate::meta::Condition;
use crate::pod::PodTemplate;
use crate::selector::LabelSelector;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatefulSetStatus {
    pub replicas: u32,
    pub ready_replicas: u32,
    /// Lowest ordinal not yet created, i.e. the next pod to bring up.
    #[serde(default)]
    pub next_ordinal: u32,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

/// Ordered, stably-named replicas: pods are `<name>-0`, `<name>-1`, …
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatefulSetSpec {
    pub replicas: u32,
    #[serde(default)]
    pub selector: LabelSelector,
    pub template: PodTemplate,
    /// Governing headless service name (informational).
    #[serde(default)]
    pub service_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatefulSet {
    pub spec: StatefulSetSpec,
    #[serde(default)]
    pub status: StatefulSetStatus,
}
