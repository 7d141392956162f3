use serde::{Deserialize, Serialize};

use crate::meta::Condition;
use crate::resource::ResourceKind;
use crate::time::SimTime;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScaleTargetRef {
    pub kind: ResourceKind,
    pub name: String,
}

// --- HPA status ---

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct HPAStatus {
    pub current_replicas: u32,
    pub desired_replicas: u32,
    #[serde(default)]
    pub current_cpu_utilization_percent: Option<u32>,
    #[serde(default)]
    pub last_scale_up_time: Option<SimTime>,
    #[serde(default)]
    pub last_scale_down_time: Option<SimTime>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

// --- HPA spec ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HPASpec {
    pub scale_target_ref: ScaleTargetRef,
    #[serde(default = "default_min_replicas")]
    pub min_replicas: u32,
    pub max_replicas: u32,
    /// Target average CPU utilization (percentage of requests, e.g. 80 = 80%)
    #[serde(default = "default_target_cpu")]
    pub target_cpu_utilization_percent: u32,
    #[serde(default = "default_max_scale_up_step")]
    pub max_scale_up_step: u32,
    #[serde(default = "default_max_scale_down_step")]
    pub max_scale_down_step: u32,
    #[serde(default = "default_scale_up_cooldown")]
    pub scale_up_cooldown_secs: u64,
    #[serde(default = "default_scale_down_cooldown")]
    pub scale_down_cooldown_secs: u64,
}

fn default_min_replicas() -> u32 {
    1
}
fn default_target_cpu() -> u32 {
    80
}
fn default_max_scale_up_step() -> u32 {
    pkg_constants::engine::HPA_MAX_SCALE_UP_STEP
}
fn default_max_scale_down_step() -> u32 {
    pkg_constants::engine::HPA_MAX_SCALE_DOWN_STEP
}
fn default_scale_up_cooldown() -> u64 {
    pkg_constants::engine::HPA_SCALE_UP_COOLDOWN_SECS
}
fn default_scale_down_cooldown() -> u64 {
    pkg_constants::engine::HPA_SCALE_DOWN_COOLDOWN_SECS
}

impl HPASpec {
    pub fn new(target_kind: ResourceKind, target_name: &str, min: u32, max: u32, target_cpu: u32) -> Self {
        Self {
            scale_target_ref: ScaleTargetRef {
                kind: target_kind,
                name: target_name.to_string(),
            },
            min_replicas: min,
            max_replicas: max,
            target_cpu_utilization_percent: target_cpu,
            max_scale_up_step: default_max_scale_up_step(),
            max_scale_down_step: default_max_scale_down_step(),
            scale_up_cooldown_secs: default_scale_up_cooldown(),
            scale_down_cooldown_secs: default_scale_down_cooldown(),
        }
    }
}

// --- HPA ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HorizontalPodAutoscaler {
    pub spec: HPASpec,
    #[serde(default)]
    pub status: HPAStatus,
}
