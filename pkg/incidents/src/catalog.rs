use pkg_types::config::IncidentConfig;
use pkg_types::incident::{CascadeRule, FaultEffect, IncidentDefinition, Severity};
use pkg_types::resource::ResourceKind;
use std::collections::BTreeMap;
use tracing::warn;

fn cascade(child: &str, probability: f64, delay_secs: f64) -> CascadeRule {
    CascadeRule {
        child_definition: child.to_string(),
        probability,
        delay_secs,
        severity: None,
    }
}

fn steps(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn definition(id: &str, title: &str, severity: u8, effect: FaultEffect) -> IncidentDefinition {
    IncidentDefinition {
        id: id.to_string(),
        title: title.to_string(),
        description: String::new(),
        severity: Severity::new(severity),
        effect,
        target_kind: None,
        investigation_steps: Vec::new(),
        auto_resolve_secs: None,
        cascades: Vec::new(),
        weight: 1.0,
        min_difficulty: 1.0,
    }
}

/// The incidents every simulation knows about.
pub fn builtin_definitions() -> Vec<IncidentDefinition> {
    vec![
        IncidentDefinition {
            description: "A container exits right after starting and is restarted with growing backoff."
                .to_string(),
            investigation_steps: steps(&[
                "Check pod status and restart count",
                "Read the container's last termination reason",
                "Inspect recent rollout changes",
            ]),
            cascades: vec![cascade("service-degraded", 0.3, 20.0)],
            weight: 3.0,
            ..definition("pod-crashloop", "Pod stuck in CrashLoopBackOff", 2, FaultEffect::CrashLoop)
        },
        IncidentDefinition {
            description: "The image reference cannot be pulled; containers never start.".to_string(),
            investigation_steps: steps(&["Describe the pod", "Verify the image tag exists"]),
            weight: 1.5,
            ..definition("image-pull-backoff", "ImagePullBackOff", 1, FaultEffect::ImagePull)
        },
        IncidentDefinition {
            description: "Request volume multiplies the pod's CPU load.".to_string(),
            investigation_steps: steps(&["Check pod CPU usage", "Review autoscaler activity"]),
            auto_resolve_secs: Some(120),
            cascades: vec![cascade("latency-alert", 0.4, 15.0)],
            weight: 2.5,
            ..definition("cpu-spike", "CPU spike", 2, FaultEffect::CpuSpike { factor: 3.0 })
        },
        IncidentDefinition {
            description: "Memory grows steadily until the container hits its limit.".to_string(),
            investigation_steps: steps(&[
                "Graph container memory over time",
                "Compare usage against the memory limit",
                "Find the leaking build",
            ]),
            cascades: vec![cascade("pod-crashloop", 0.25, 30.0)],
            weight: 2.0,
            min_difficulty: 2.0,
            ..definition(
                "memory-leak",
                "Memory leak",
                3,
                FaultEffect::MemoryLeak {
                    bytes_per_sec: 2 * 1024 * 1024,
                },
            )
        },
        IncidentDefinition {
            description: "The kubelet stops reporting; pods are evicted after the grace period."
                .to_string(),
            investigation_steps: steps(&[
                "Check node conditions",
                "Confirm which pods were evicted",
                "Cordon and drain the node",
            ]),
            cascades: vec![
                cascade("cpu-spike", 0.5, 10.0),
                cascade("service-degraded", 0.4, 45.0),
            ],
            weight: 1.0,
            min_difficulty: 3.0,
            ..definition("node-failure", "Node NotReady", 4, FaultEffect::NodeNotReady)
        },
        IncidentDefinition {
            description: "A bad rollout scaled the deployment to zero replicas.".to_string(),
            investigation_steps: steps(&["Check rollout history", "Restore the replica count"]),
            cascades: vec![cascade("service-degraded", 0.6, 5.0)],
            weight: 1.0,
            min_difficulty: 2.0,
            ..definition("bad-rollout", "Deployment scaled to zero", 3, FaultEffect::ScaleToZero)
        },
        IncidentDefinition {
            description: "Error rate on a service crossed its alert threshold.".to_string(),
            target_kind: Some(ResourceKind::Deployment),
            investigation_steps: steps(&["Check service endpoints", "Review backing pods"]),
            auto_resolve_secs: Some(90),
            weight: 1.5,
            ..definition("service-degraded", "Service degraded", 2, FaultEffect::NoEffect)
        },
        IncidentDefinition {
            description: "p99 latency is above the objective.".to_string(),
            investigation_steps: steps(&["Check latency dashboards"]),
            auto_resolve_secs: Some(45),
            weight: 2.0,
            ..definition("latency-alert", "High latency", 1, FaultEffect::NoEffect)
        },
        IncidentDefinition {
            description: "A co-located workload saturates the node's CPU.".to_string(),
            investigation_steps: steps(&[
                "Find the busiest pod on the node",
                "Set CPU limits or move the workload",
            ]),
            auto_resolve_secs: Some(180),
            cascades: vec![cascade("node-failure", 0.2, 60.0)],
            weight: 1.0,
            min_difficulty: 4.0,
            ..definition("noisy-neighbor", "Noisy neighbor", 3, FaultEffect::CpuSpike { factor: 5.0 })
        },
        IncidentDefinition {
            description: "The control plane is shedding load; several nodes may follow.".to_string(),
            investigation_steps: steps(&[
                "Check control plane health",
                "Identify affected nodes",
                "Fail over",
            ]),
            auto_resolve_secs: Some(300),
            cascades: vec![
                cascade("node-failure", 0.7, 10.0),
                cascade("bad-rollout", 0.3, 30.0),
            ],
            weight: 0.5,
            min_difficulty: 8.0,
            ..definition("control-plane-outage", "Control plane outage", 5, FaultEffect::NoEffect)
        },
    ]
}

/// Definitions keyed by id: the built-in catalog unless replaced, with
/// configured definitions overriding built-ins of the same id.
pub fn load(config: &IncidentConfig) -> BTreeMap<String, IncidentDefinition> {
    let mut definitions = BTreeMap::new();
    if !config.replace_builtin {
        for def in builtin_definitions() {
            definitions.insert(def.id.clone(), def);
        }
    }
    for def in &config.definitions {
        definitions.insert(def.id.clone(), def.clone());
    }
    for def in definitions.values() {
        for rule in &def.cascades {
            if !definitions.contains_key(&rule.child_definition) {
                warn!(
                    "Incident {}: cascade to unknown definition {}",
                    def.id, rule.child_definition
                );
            }
        }
    }
    definitions
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_cascades_resolve() {
        let defs = load(&IncidentConfig::default());
        assert_eq!(defs.len(), 10);
        for def in defs.values() {
            for rule in &def.cascades {
                assert!(defs.contains_key(&rule.child_definition), "{}", rule.child_definition);
            }
        }
    }

    #[test]
    fn config_overrides_and_replaces() {
        let custom = definition("cpu-spike", "Custom spike", 5, FaultEffect::NoEffect);
        let merged = load(&IncidentConfig {
            definitions: vec![custom.clone()],
            ..Default::default()
        });
        assert_eq!(merged.len(), 10);
        assert_eq!(merged["cpu-spike"].title, "Custom spike");

        let replaced = load(&IncidentConfig {
            definitions: vec![custom],
            replace_builtin: true,
            ..Default::default()
        });
        assert_eq!(replaced.keys().collect::<Vec<_>>(), vec!["cpu-spike"]);
    }
}
