use serde::{Deserialize, Serialize};

use crate::time::SimTime;

/// Cluster-wide counts and aggregate utilization.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ClusterSummary {
    pub namespaces: u32,
    pub nodes: u32,
    pub ready_nodes: u32,
    pub pods: u32,
    pub running_pods: u32,
    pub pending_pods: u32,
    pub failed_pods: u32,
    pub deployments: u32,
    pub services: u32,
    pub cpu_capacity_millis: u64,
    pub cpu_requested_millis: u64,
    pub cpu_usage_millis: u64,
    pub memory_capacity_bytes: u64,
    pub memory_requested_bytes: u64,
    pub memory_usage_bytes: u64,
    pub cpu_utilization_percent: f64,
    pub memory_utilization_percent: f64,
}

/// Payload of the tick-completed notification.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TickStats {
    pub tick: u64,
    pub sim_time: SimTime,
    pub pods_scheduled: u32,
    pub pods_unschedulable: u32,
    pub pods_created: u32,
    pub pods_deleted: u32,
    pub container_restarts: u32,
    pub oom_kills: u32,
    pub pods_evicted: u32,
    pub summary: ClusterSummary,
}
