use serde::{Deserialize, Serialize};

use crate::meta::Condition;
use crate::pod::Resources;
use crate::quantity;

/// Hard limits for a namespace. Unset fields are unlimited.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct QuotaLimits {
    /// Maximum number of pods allowed
    #[serde(default)]
    pub pods: Option<u32>,
    #[serde(default, deserialize_with = "quantity::de_opt_cpu")]
    pub requests_cpu_millis: Option<u64>,
    #[serde(default, deserialize_with = "quantity::de_opt_memory")]
    pub requests_memory_bytes: Option<u64>,
    #[serde(default, deserialize_with = "quantity::de_opt_cpu")]
    pub limits_cpu_millis: Option<u64>,
    #[serde(default, deserialize_with = "quantity::de_opt_memory")]
    pub limits_memory_bytes: Option<u64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct QuotaUsage {
    pub pods: u32,
    pub requests: Resources,
    pub limits: Resources,
}

impl QuotaLimits {
    /// Human-readable descriptions of every limit `used` exceeds.
    pub fn violations(&self, used: &QuotaUsage) -> Vec<String> {
        let mut out = Vec::new();
        if let Some(max) = self.pods
            && used.pods > max
        {
            out.push(format!("pods: used {} > hard {}", used.pods, max));
        }
        let checks = [
            ("requests.cpu", used.requests.cpu_millis, self.requests_cpu_millis),
            ("requests.memory", used.requests.memory_bytes, self.requests_memory_bytes),
            ("limits.cpu", used.limits.cpu_millis, self.limits_cpu_millis),
            ("limits.memory", used.limits.memory_bytes, self.limits_memory_bytes),
        ];
        for (name, value, hard) in checks {
            if let Some(hard) = hard
                && value > hard
            {
                out.push(format!("{}: used {} > hard {}", name, value, hard));
            }
        }
        out
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceQuotaSpec {
    pub hard: QuotaLimits,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceQuotaStatus {
    #[serde(default)]
    pub used: QuotaUsage,
    #[serde(default)]
    pub violations: Vec<String>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

/// Resource quota for a namespace: limits pod count, CPU and memory.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceQuota {
    pub spec: ResourceQuotaSpec,
    #[serde(default)]
    pub status: ResourceQuotaStatus,
}
