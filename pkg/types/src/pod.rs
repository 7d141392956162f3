use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::{Add, AddAssign};

use crate::meta::Condition;
use crate::quantity;
use crate::time::SimTime;

// --- Resource quantities ---

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct Resources {
    /// CPU in millicores (1000 = 1 core)
    #[serde(default, deserialize_with = "quantity::de_cpu")]
    pub cpu_millis: u64,
    /// Memory in bytes
    #[serde(default, deserialize_with = "quantity::de_memory")]
    pub memory_bytes: u64,
}

impl Resources {
    pub const fn new(cpu_millis: u64, memory_bytes: u64) -> Self {
        Self {
            cpu_millis,
            memory_bytes,
        }
    }

    pub fn saturating_sub(self, other: Resources) -> Resources {
        Resources {
            cpu_millis: self.cpu_millis.saturating_sub(other.cpu_millis),
            memory_bytes: self.memory_bytes.saturating_sub(other.memory_bytes),
        }
    }

    /// True when both dimensions of `self` fit inside `available`.
    pub fn fits_within(&self, available: &Resources) -> bool {
        self.cpu_millis <= available.cpu_millis && self.memory_bytes <= available.memory_bytes
    }
}

impl Add for Resources {
    type Output = Resources;

    fn add(self, rhs: Resources) -> Resources {
        Resources {
            cpu_millis: self.cpu_millis.saturating_add(rhs.cpu_millis),
            memory_bytes: self.memory_bytes.saturating_add(rhs.memory_bytes),
        }
    }
}

impl AddAssign for Resources {
    fn add_assign(&mut self, rhs: Resources) {
        *self = *self + rhs;
    }
}

impl std::iter::Sum for Resources {
    fn sum<I: Iterator<Item = Resources>>(iter: I) -> Resources {
        iter.fold(Resources::default(), |acc, r| acc + r)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ResourceRequirements {
    #[serde(default)]
    pub requests: Resources,
    #[serde(default)]
    pub limits: Resources,
}

impl ResourceRequirements {
    /// Limits, falling back per dimension to the request when no limit is set.
    pub fn effective_limits(&self) -> Resources {
        Resources {
            cpu_millis: if self.limits.cpu_millis > 0 {
                self.limits.cpu_millis
            } else {
                self.requests.cpu_millis
            },
            memory_bytes: if self.limits.memory_bytes > 0 {
                self.limits.memory_bytes
            } else {
                self.requests.memory_bytes
            },
        }
    }
}

// --- Probes ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Probe {
    #[serde(default)]
    pub initial_delay_secs: u64,
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
}

fn default_failure_threshold() -> u32 {
    pkg_constants::engine::DEFAULT_PROBE_FAILURE_THRESHOLD
}

impl Default for Probe {
    fn default() -> Self {
        Self {
            initial_delay_secs: 0,
            failure_threshold: default_failure_threshold(),
        }
    }
}

// --- Container spec ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    #[serde(default)]
    pub resources: ResourceRequirements,
    #[serde(default)]
    pub liveness_probe: Option<Probe>,
    #[serde(default)]
    pub readiness_probe: Option<Probe>,
}

// --- Scheduling constraints ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Toleration {
    /// Empty key with `Exists` tolerates every taint.
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub operator: TolerationOperator,
    #[serde(default)]
    pub value: String,
    /// `None` tolerates every effect.
    #[serde(default)]
    pub effect: Option<TaintEffect>,
}

impl Toleration {
    pub fn tolerates(&self, taint: &crate::node::Taint) -> bool {
        if self.effect.is_some_and(|e| e != taint.effect) {
            return false;
        }
        match self.operator {
            TolerationOperator::Exists => self.key.is_empty() || self.key == taint.key,
            TolerationOperator::Equal => self.key == taint.key && self.value == taint.value,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub enum TolerationOperator {
    #[default]
    Equal,
    Exists,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub enum TaintEffect {
    #[default]
    NoSchedule,
    PreferNoSchedule,
    NoExecute,
}

/// Soft node preference; `weight` is 1..=100.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PreferredTerm {
    pub weight: u32,
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeAffinity {
    /// Node labels that must all be present with these values.
    #[serde(default)]
    pub required: BTreeMap<String, String>,
    #[serde(default)]
    pub preferred: Vec<PreferredTerm>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub enum RestartPolicy {
    #[default]
    Always,
    OnFailure,
    Never,
}

// --- Pod spec ---

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PodSpec {
    pub containers: Vec<ContainerSpec>,
    /// The node this pod is assigned to (set by the scheduler or pinned by a DaemonSet)
    #[serde(default)]
    pub node_name: Option<String>,
    #[serde(default)]
    pub node_selector: BTreeMap<String, String>,
    #[serde(default)]
    pub affinity: NodeAffinity,
    #[serde(default)]
    pub tolerations: Vec<Toleration>,
    #[serde(default)]
    pub restart_policy: RestartPolicy,
}

impl PodSpec {
    pub fn total_requests(&self) -> Resources {
        self.containers.iter().map(|c| c.resources.requests).sum()
    }

    pub fn total_limits(&self) -> Resources {
        self.containers
            .iter()
            .map(|c| c.resources.effective_limits())
            .sum()
    }
}

/// Pod template embedded in workload controllers.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PodTemplate {
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    pub spec: PodSpec,
}

// --- Pod status ---

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum PodPhase {
    #[default]
    Pending,
    Scheduled,
    ContainerCreating,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl PodPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, PodPhase::Succeeded | PodPhase::Failed)
    }
}

impl std::fmt::Display for PodPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PodPhase::Pending => write!(f, "Pending"),
            PodPhase::Scheduled => write!(f, "Scheduled"),
            PodPhase::ContainerCreating => write!(f, "ContainerCreating"),
            PodPhase::Running => write!(f, "Running"),
            PodPhase::Succeeded => write!(f, "Succeeded"),
            PodPhase::Failed => write!(f, "Failed"),
            PodPhase::Unknown => write!(f, "Unknown"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "state")]
pub enum ContainerState {
    Waiting {
        reason: String,
        /// Earliest time the container may (re)start.
        #[serde(default)]
        until: Option<SimTime>,
    },
    Running {
        started_at: SimTime,
    },
    Terminated {
        reason: String,
        exit_code: i32,
    },
}

impl Default for ContainerState {
    fn default() -> Self {
        ContainerState::Waiting {
            reason: "ContainerCreating".to_string(),
            until: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ContainerStatus {
    pub name: String,
    #[serde(default)]
    pub state: ContainerState,
    #[serde(default)]
    pub ready: bool,
    #[serde(default)]
    pub restart_count: u32,
    /// Instantaneous simulated usage.
    #[serde(default)]
    pub usage: Resources,
    #[serde(default)]
    pub liveness_failures: u32,
    #[serde(default)]
    pub readiness_failures: u32,
    /// Steady-state load as a fraction of requests.
    #[serde(default)]
    pub base_load: f64,
    #[serde(default)]
    pub last_termination_reason: Option<String>,
}

/// Fault injected into a pod by the incident engine.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PodFault {
    /// Containers crash as soon as they run.
    CrashLoop,
    /// Containers never leave Waiting.
    ImagePull,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PodStatus {
    #[serde(default)]
    pub phase: PodPhase,
    /// Human-readable reason for the current status (e.g. Unschedulable, CrashLoopBackOff).
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub container_statuses: Vec<ContainerStatus>,
    /// Multiplier applied to every container's load (1.0 = nominal).
    #[serde(default = "default_load_factor")]
    pub load_factor: f64,
    #[serde(default)]
    pub memory_leak_bytes_per_sec: u64,
    #[serde(default)]
    pub fault: Option<PodFault>,
    #[serde(default)]
    pub scheduled_at: Option<SimTime>,
    #[serde(default)]
    pub start_time: Option<SimTime>,
    /// Job pods succeed at this time.
    #[serde(default)]
    pub completes_at: Option<SimTime>,
}

fn default_load_factor() -> f64 {
    1.0
}

impl Default for PodStatus {
    fn default() -> Self {
        Self {
            phase: PodPhase::Pending,
            reason: None,
            message: None,
            conditions: Vec::new(),
            container_statuses: Vec::new(),
            load_factor: default_load_factor(),
            memory_leak_bytes_per_sec: 0,
            fault: None,
            scheduled_at: None,
            start_time: None,
            completes_at: None,
        }
    }
}

// --- Pod ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Pod {
    pub spec: PodSpec,
    #[serde(default)]
    pub status: PodStatus,
}

impl Pod {
    pub fn new(spec: PodSpec) -> Self {
        Self {
            spec,
            status: PodStatus::default(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.phase.is_terminal()
    }

    /// Running with every container ready.
    pub fn is_ready(&self) -> bool {
        self.status.phase == PodPhase::Running
            && !self.status.container_statuses.is_empty()
            && self.status.container_statuses.iter().all(|c| c.ready)
    }

    pub fn restart_count(&self) -> u32 {
        self.status
            .container_statuses
            .iter()
            .map(|c| c.restart_count)
            .sum()
    }

    pub fn usage(&self) -> Resources {
        self.status.container_statuses.iter().map(|c| c.usage).sum()
    }
}
