use anyhow::{Context, bail};
use pkg_constants::labels::PRE_FAULT_REPLICAS;
use pkg_state::ClusterStore;
use pkg_types::incident::{FaultEffect, IncidentTarget};
use pkg_types::meta::EventSeverity;
use pkg_types::node::NodeFault;
use pkg_types::pod::PodFault;
use pkg_types::resource::Resource;
use tracing::{debug, info};

/// Apply `effect` to the incident's target.
pub fn apply(store: &ClusterStore, effect: &FaultEffect, target: &IncidentTarget) -> anyhow::Result<()> {
    if *effect == FaultEffect::NoEffect {
        return Ok(());
    }
    let current = store
        .get(&target.uid)
        .with_context(|| format!("fault target {} not found", target.name))?;
    check_kind(effect, &current)?;

    let message = format!("{:?} injected", effect);
    let effect = effect.clone();
    store.update(&target.uid, |r| match effect {
        FaultEffect::NoEffect => {}
        FaultEffect::CrashLoop => set_pod_fault(r, Some(PodFault::CrashLoop)),
        FaultEffect::ImagePull => set_pod_fault(r, Some(PodFault::ImagePull)),
        FaultEffect::CpuSpike { factor } => {
            if let Some(p) = r.as_pod_mut() {
                p.status.load_factor = factor.max(0.0);
            }
        }
        FaultEffect::MemoryLeak { bytes_per_sec } => {
            if let Some(p) = r.as_pod_mut() {
                p.status.memory_leak_bytes_per_sec = bytes_per_sec;
            }
        }
        FaultEffect::NodeNotReady => {
            if let Some(n) = r.as_node_mut() {
                n.status.fault = Some(NodeFault::NotReady);
            }
        }
        FaultEffect::ScaleToZero => {
            let previous = r.as_deployment().map(|d| d.spec.replicas);
            if let Some(previous) = previous {
                r.metadata
                    .annotations
                    .entry(PRE_FAULT_REPLICAS.to_string())
                    .or_insert_with(|| previous.to_string());
            }
            if let Some(d) = r.as_deployment_mut() {
                d.spec.replicas = 0;
            }
        }
    });
    store.record_event(&target.uid, EventSeverity::Warning, "FaultInjected", &message);
    info!("Fault applied to {}", current.key());
    Ok(())
}

/// Undo `effect`. A target that no longer exists is not an error.
pub fn revert(store: &ClusterStore, effect: &FaultEffect, target: &IncidentTarget) -> anyhow::Result<()> {
    if *effect == FaultEffect::NoEffect {
        return Ok(());
    }
    let Some(current) = store.get(&target.uid) else {
        debug!("Fault target {} gone, nothing to revert", target.name);
        return Ok(());
    };
    check_kind(effect, &current)?;

    let effect = effect.clone();
    store.update(&target.uid, |r| match effect {
        FaultEffect::NoEffect => {}
        FaultEffect::CrashLoop | FaultEffect::ImagePull => set_pod_fault(r, None),
        FaultEffect::CpuSpike { .. } => {
            if let Some(p) = r.as_pod_mut() {
                p.status.load_factor = 1.0;
            }
        }
        FaultEffect::MemoryLeak { .. } => {
            if let Some(p) = r.as_pod_mut() {
                p.status.memory_leak_bytes_per_sec = 0;
            }
        }
        FaultEffect::NodeNotReady => {
            if let Some(n) = r.as_node_mut() {
                n.status.fault = None;
            }
        }
        FaultEffect::ScaleToZero => {
            let previous = r
                .metadata
                .annotations
                .remove(PRE_FAULT_REPLICAS)
                .and_then(|v| v.parse::<u32>().ok());
            if let (Some(previous), Some(d)) = (previous, r.as_deployment_mut()) {
                d.spec.replicas = previous;
            }
        }
    });
    store.record_event(&target.uid, EventSeverity::Normal, "FaultCleared", "");
    info!("Fault reverted on {}", current.key());
    Ok(())
}

fn check_kind(effect: &FaultEffect, res: &Resource) -> anyhow::Result<()> {
    match effect.target_kind() {
        Some(kind) if kind != res.kind() => {
            bail!("{:?} cannot target {}", effect, res.key())
        }
        _ => Ok(()),
    }
}

fn set_pod_fault(res: &mut Resource, fault: Option<PodFault>) {
    if let Some(p) = res.as_pod_mut() {
        p.status.fault = fault;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pkg_types::deployment::{Deployment, DeploymentSpec};
    use pkg_types::meta::ObjectMeta;
    use pkg_types::node::Node;
    use pkg_types::pod::{Pod, PodSpec, Resources};
    use pkg_types::resource::{Object, ResourceKind};

    fn target(store: &ClusterStore, res: Resource) -> IncidentTarget {
        let kind = res.kind();
        let name = res.name().to_string();
        let namespace = res.namespace().to_string();
        let uid = store.add(res).unwrap();
        IncidentTarget {
            kind,
            uid,
            name,
            namespace,
        }
    }

    #[test]
    fn scale_to_zero_restores_replicas() {
        let store = ClusterStore::new();
        let t = target(
            &store,
            Resource::new(
                ObjectMeta::new("web", "default"),
                Object::Deployment(Deployment {
                    spec: DeploymentSpec {
                        replicas: 4,
                        selector: Default::default(),
                        template: Default::default(),
                        strategy: Default::default(),
                        paused: false,
                    },
                    status: Default::default(),
                }),
            ),
        );

        apply(&store, &FaultEffect::ScaleToZero, &t).unwrap();
        let d = store.get(&t.uid).unwrap();
        assert_eq!(d.as_deployment().unwrap().spec.replicas, 0);
        assert_eq!(d.metadata.annotations.get(PRE_FAULT_REPLICAS).map(String::as_str), Some("4"));

        revert(&store, &FaultEffect::ScaleToZero, &t).unwrap();
        let d = store.get(&t.uid).unwrap();
        assert_eq!(d.as_deployment().unwrap().spec.replicas, 4);
        assert!(!d.metadata.annotations.contains_key(PRE_FAULT_REPLICAS));
    }

    #[test]
    fn pod_and_node_faults_toggle() {
        let store = ClusterStore::new();
        let pod = target(
            &store,
            Resource::new(
                ObjectMeta::new("api", "default"),
                Object::Pod(Pod::new(PodSpec::default())),
            ),
        );
        let node = target(
            &store,
            Resource::new(
                ObjectMeta::new("worker-1", ""),
                Object::Node(Node::new(Resources::new(4000, 8 << 30))),
            ),
        );

        apply(&store, &FaultEffect::CpuSpike { factor: 3.0 }, &pod).unwrap();
        apply(&store, &FaultEffect::NodeNotReady, &node).unwrap();
        assert_eq!(store.get(&pod.uid).unwrap().as_pod().unwrap().status.load_factor, 3.0);
        assert_eq!(
            store.get(&node.uid).unwrap().as_node().unwrap().status.fault,
            Some(NodeFault::NotReady)
        );

        revert(&store, &FaultEffect::CpuSpike { factor: 3.0 }, &pod).unwrap();
        revert(&store, &FaultEffect::NodeNotReady, &node).unwrap();
        assert_eq!(store.get(&pod.uid).unwrap().as_pod().unwrap().status.load_factor, 1.0);
        assert_eq!(store.get(&node.uid).unwrap().as_node().unwrap().status.fault, None);
    }

    #[test]
    fn wrong_kind_is_rejected_and_missing_target_reverts_cleanly() {
        let store = ClusterStore::new();
        let pod = target(
            &store,
            Resource::new(
                ObjectMeta::new("api", "default"),
                Object::Pod(Pod::new(PodSpec::default())),
            ),
        );
        assert!(apply(&store, &FaultEffect::NodeNotReady, &pod).is_err());

        store.remove(&pod.uid);
        assert!(revert(&store, &FaultEffect::CrashLoop, &pod).is_ok());
        assert_eq!(pod.kind, ResourceKind::Pod);
    }
}
