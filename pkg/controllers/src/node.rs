use pkg_constants::engine::NODE_PRESSURE_RATIO;
use pkg_state::ClusterStore;
use pkg_types::meta::{EventSeverity, set_condition};
use pkg_types::node::NodeStatus;
use pkg_types::pod::{PodPhase, Resources};
use pkg_types::resource::{Resource, ResourceKind};
use std::collections::HashMap;
use tracing::{info, warn};

use crate::context::TickContext;

/// Recomputes node allocation, usage, readiness and pressure conditions
/// from the pods bound to each node.
pub struct NodeController {
    store: ClusterStore,
}

#[derive(Default)]
struct Tally {
    allocated: Resources,
    usage: Resources,
    pods: u32,
}

impl NodeController {
    pub fn new(store: ClusterStore) -> Self {
        Self { store }
    }

    pub fn reconcile(&self, ctx: &mut TickContext<'_>) -> anyhow::Result<()> {
        let mut tallies: HashMap<String, Tally> = HashMap::new();
        for pod in self.store.list_kind(ResourceKind::Pod) {
            let Some(p) = pod.as_pod() else { continue };
            // Pending pods are not bound yet, even when pinned.
            if p.is_terminal() || p.status.phase == PodPhase::Pending {
                continue;
            }
            let Some(node_name) = &p.spec.node_name else {
                continue;
            };
            let t = tallies.entry(node_name.clone()).or_default();
            t.allocated += p.spec.total_requests();
            t.usage += p.usage();
            t.pods += 1;
        }

        for node in self.store.list_kind(ResourceKind::Node) {
            let tally = tallies.remove(node.name()).unwrap_or_default();
            self.refresh(&node, tally, ctx);
        }
        Ok(())
    }

    fn refresh(&self, node: &Resource, tally: Tally, ctx: &mut TickContext<'_>) {
        let Some(n) = node.as_node() else { return };
        let now = ctx.now;
        let cap = n.spec.capacity;
        let ready = n.status.fault.is_none();

        let mut status = NodeStatus {
            ready,
            allocated: tally.allocated,
            allocatable: cap.saturating_sub(tally.allocated),
            usage: tally.usage,
            pod_count: tally.pods,
            fault: n.status.fault,
            not_ready_since: if ready {
                None
            } else {
                n.status.not_ready_since.or(Some(now))
            },
            conditions: n.status.conditions.clone(),
        };

        let pressure = |used: u64, capacity: u64| {
            capacity > 0 && used as f64 >= capacity as f64 * NODE_PRESSURE_RATIO
        };
        let mem_pressure = pressure(tally.allocated.memory_bytes, cap.memory_bytes)
            || pressure(tally.usage.memory_bytes, cap.memory_bytes);
        let cpu_pressure = pressure(tally.allocated.cpu_millis, cap.cpu_millis)
            || pressure(tally.usage.cpu_millis, cap.cpu_millis);
        let pid_pressure = tally.pods >= n.spec.max_pods;

        let (reason, message) = if ready {
            ("KubeletReady", "node is healthy")
        } else {
            ("NodeStatusUnknown", "node stopped posting status")
        };
        set_condition(&mut status.conditions, "Ready", ready, reason, message, now);
        set_condition(
            &mut status.conditions,
            "MemoryPressure",
            mem_pressure,
            if mem_pressure { "NodeHasMemoryPressure" } else { "NodeHasSufficientMemory" },
            "",
            now,
        );
        set_condition(
            &mut status.conditions,
            "CPUPressure",
            cpu_pressure,
            if cpu_pressure { "NodeHasCPUPressure" } else { "NodeHasSufficientCPU" },
            "",
            now,
        );
        set_condition(
            &mut status.conditions,
            "PIDPressure",
            pid_pressure,
            if pid_pressure { "NodeHasPIDPressure" } else { "NodeHasSufficientPID" },
            "",
            now,
        );

        if status == n.status {
            return;
        }
        let became = (n.status.ready, ready);
        self.store.update(node.uid(), |r| {
            if let Some(n) = r.as_node_mut() {
                n.status = status;
            }
        });
        match became {
            (true, false) => {
                warn!("Node {} is NotReady", node.name());
                self.store
                    .record_event(node.uid(), EventSeverity::Warning, "NodeNotReady", "Node is not ready");
            }
            (false, true) => {
                info!("Node {} is Ready", node.name());
                self.store
                    .record_event(node.uid(), EventSeverity::Normal, "NodeReady", "Node is ready");
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{ctx_parts, make_node, make_pod};
    use pkg_types::node::NodeFault;

    #[test]
    fn tallies_bound_pods() {
        let store = ClusterStore::new();
        let node_uid = store.add(make_node("worker-1", 1000, 1024)).unwrap();
        let mut pod = make_pod("web", 500, 256);
        if let Some(p) = pod.as_pod_mut() {
            p.spec.node_name = Some("worker-1".to_string());
            p.status.phase = PodPhase::Running;
        }
        store.add(pod).unwrap();
        let mut pinned = make_pod("pinned", 300, 256);
        if let Some(p) = pinned.as_pod_mut() {
            p.spec.node_name = Some("worker-1".to_string());
        }
        store.add(pinned).unwrap();
        store.add(make_pod("pending", 500, 256)).unwrap();

        let (mut rng, mut stats) = ctx_parts();
        let mut ctx = TickContext {
            now: Default::default(),
            dt: std::time::Duration::from_millis(100),
            rng: &mut rng,
            stats: &mut stats,
        };
        NodeController::new(store.clone()).reconcile(&mut ctx).unwrap();

        let node = store.get(&node_uid).unwrap();
        let n = node.as_node().unwrap();
        assert!(n.status.ready);
        assert_eq!(n.status.pod_count, 1);
        assert_eq!(n.status.allocated.cpu_millis, 500);
        assert_eq!(n.status.allocatable.cpu_millis, 500);
        assert!(pkg_types::meta::condition_is_true(&n.status.conditions, "Ready"));
    }

    #[test]
    fn fault_makes_node_not_ready() {
        let store = ClusterStore::new();
        let node_uid = store.add(make_node("worker-1", 1000, 1024)).unwrap();
        store.update(&node_uid, |r| {
            if let Some(n) = r.as_node_mut() {
                n.status.fault = Some(NodeFault::NotReady);
            }
        });
        let (mut rng, mut stats) = ctx_parts();
        let mut ctx = TickContext {
            now: pkg_types::time::SimTime::from_secs(3),
            dt: std::time::Duration::from_millis(100),
            rng: &mut rng,
            stats: &mut stats,
        };
        NodeController::new(store.clone()).reconcile(&mut ctx).unwrap();
        let node = store.get(&node_uid).unwrap();
        let n = node.as_node().unwrap();
        assert!(!n.status.ready);
        assert_eq!(n.status.not_ready_since, Some(pkg_types::time::SimTime::from_secs(3)));
    }
}
