use serde::{Deserialize, Serialize};

use crate::meta::Condition;
use crate::pod::{Resources, TaintEffect};
use crate::time::SimTime;

// --- Taint ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Taint {
    pub key: String,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub effect: TaintEffect,
}

// --- Node spec ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeSpec {
    /// Allocatable capacity advertised by the node.
    pub capacity: Resources,
    #[serde(default = "default_max_pods")]
    pub max_pods: u32,
    #[serde(default)]
    pub taints: Vec<Taint>,
    /// If true, the scheduler will not place new pods on this node.
    #[serde(default)]
    pub unschedulable: bool,
}

fn default_max_pods() -> u32 {
    pkg_constants::engine::DEFAULT_NODE_MAX_PODS
}

impl NodeSpec {
    pub fn new(capacity: Resources) -> Self {
        Self {
            capacity,
            max_pods: default_max_pods(),
            taints: Vec::new(),
            unschedulable: false,
        }
    }
}

// --- Node status ---

/// Fault injected into a node by the incident engine.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum NodeFault {
    /// Kubelet stops reporting; the node goes NotReady.
    NotReady,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeStatus {
    #[serde(default)]
    pub ready: bool,
    /// Sum of requests of non-terminal pods bound to this node.
    #[serde(default)]
    pub allocated: Resources,
    /// Capacity minus allocated.
    #[serde(default)]
    pub allocatable: Resources,
    #[serde(default)]
    pub usage: Resources,
    #[serde(default)]
    pub pod_count: u32,
    #[serde(default)]
    pub fault: Option<NodeFault>,
    #[serde(default)]
    pub not_ready_since: Option<SimTime>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

// --- Node ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Node {
    pub spec: NodeSpec,
    #[serde(default)]
    pub status: NodeStatus,
}

impl Node {
    pub fn new(capacity: Resources) -> Self {
        Self {
            spec: NodeSpec::new(capacity),
            status: NodeStatus::default(),
        }
    }

    pub fn is_schedulable(&self) -> bool {
        self.status.ready && !self.spec.unschedulable
    }
}
