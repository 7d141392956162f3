use pkg_scheduler::{NodeView, Placement, Scheduler};
use pkg_state::ClusterStore;
use pkg_types::meta::{EventSeverity, set_condition};
use pkg_types::pod::PodPhase;
use pkg_types::resource::{Resource, ResourceKind};
use tracing::{info, warn};

use crate::context::TickContext;

/// Binds pending pods to nodes. Unplaceable pods stay `Pending` with a
/// `PodScheduled=False` condition and are retried every tick.
pub struct SchedulingController {
    store: ClusterStore,
    scheduler: Scheduler,
}

impl SchedulingController {
    pub fn new(store: ClusterStore) -> Self {
        Self {
            store,
            scheduler: Scheduler::new(),
        }
    }

    pub fn reconcile(&self, ctx: &mut TickContext<'_>) -> anyhow::Result<()> {
        let mut pending: Vec<Resource> = self
            .store
            .list_kind(ResourceKind::Pod)
            .into_iter()
            .filter(|r| r.is_active_pod() && r.pod_phase() == Some(PodPhase::Pending))
            .collect();
        if pending.is_empty() {
            return Ok(());
        }
        pending.sort_by(|a, b| {
            a.metadata
                .creation_timestamp
                .cmp(&b.metadata.creation_timestamp)
                .then_with(|| a.key().cmp(&b.key()))
        });

        let mut nodes: Vec<NodeView> = self
            .store
            .list_kind(ResourceKind::Node)
            .iter()
            .filter_map(NodeView::from_resource)
            .collect();

        for pod in pending {
            let Some(p) = pod.as_pod() else { continue };
            // Pinned pods (DaemonSet) skip node selection, not the filters.
            let placement = match p.spec.node_name.as_deref() {
                Some(node) => self.scheduler.schedule_on(&pod.key(), &p.spec, node, &mut nodes),
                None => self.scheduler.schedule(&pod.key(), &p.spec, &mut nodes),
            };
            match placement {
                Placement::Bound { node, .. } => self.bind(&pod, &node, ctx),
                Placement::Unschedulable { message } => self.mark_unschedulable(&pod, &message, ctx),
            }
        }
        Ok(())
    }

    fn bind(&self, pod: &Resource, node: &str, ctx: &mut TickContext<'_>) {
        let now = ctx.now;
        let message = format!("assigned to {}", node);
        self.store.update(pod.uid(), |r| {
            if let Some(p) = r.as_pod_mut() {
                p.spec.node_name = Some(node.to_string());
                p.status.phase = PodPhase::Scheduled;
                p.status.scheduled_at = Some(now);
                p.status.reason = None;
                p.status.message = None;
                set_condition(&mut p.status.conditions, "PodScheduled", true, "Scheduled", &message, now);
            }
        });
        self.store
            .record_event(pod.uid(), EventSeverity::Normal, "Scheduled", &format!("Successfully {}", message));
        info!("Scheduled pod {} → node {}", pod.key(), node);
        ctx.stats.pods_scheduled += 1;
    }

    fn mark_unschedulable(&self, pod: &Resource, message: &str, ctx: &mut TickContext<'_>) {
        ctx.stats.pods_unschedulable += 1;
        let already = pod.as_pod().is_some_and(|p| {
            p.status
                .conditions
                .iter()
                .any(|c| c.condition_type == "PodScheduled" && !c.status && c.message == message)
        });
        if already {
            return;
        }
        let now = ctx.now;
        self.store.update(pod.uid(), |r| {
            if let Some(p) = r.as_pod_mut() {
                p.status.reason = Some("Unschedulable".to_string());
                p.status.message = Some(message.to_string());
                set_condition(&mut p.status.conditions, "PodScheduled", false, "Unschedulable", message, now);
            }
        });
        self.store
            .record_event(pod.uid(), EventSeverity::Warning, "FailedScheduling", message);
        warn!("Pod {} unschedulable: {}", pod.key(), message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeController;
    use crate::testutil::{ctx_parts, make_node, make_pod};
    use pkg_types::node::Taint;
    use pkg_types::pod::TaintEffect;
    use pkg_types::time::SimTime;
    use std::time::Duration;

    #[test]
    fn places_pod_on_only_node() {
        let store = ClusterStore::new();
        store.add(make_node("worker-1", 4000, 8192)).unwrap();
        let pod_uid = store.add(make_pod("web", 100, 128)).unwrap();

        let (mut rng, mut stats) = ctx_parts();
        let mut ctx = TickContext {
            now: SimTime::from_millis(100),
            dt: Duration::from_millis(100),
            rng: &mut rng,
            stats: &mut stats,
        };
        NodeController::new(store.clone()).reconcile(&mut ctx).unwrap();
        SchedulingController::new(store.clone()).reconcile(&mut ctx).unwrap();

        let pod = store.get(&pod_uid).unwrap();
        let p = pod.as_pod().unwrap();
        assert_eq!(p.spec.node_name.as_deref(), Some("worker-1"));
        assert_eq!(p.status.phase, PodPhase::Scheduled);
        assert_eq!(ctx.stats.pods_scheduled, 1);
    }

    #[test]
    fn unschedulable_pod_is_kept_pending() {
        let store = ClusterStore::new();
        store.add(make_node("worker-1", 500, 8192)).unwrap();
        let pod_uid = store.add(make_pod("big", 2000, 128)).unwrap();

        let (mut rng, mut stats) = ctx_parts();
        let mut ctx = TickContext {
            now: SimTime::from_millis(100),
            dt: Duration::from_millis(100),
            rng: &mut rng,
            stats: &mut stats,
        };
        let nodes = NodeController::new(store.clone());
        let sched = SchedulingController::new(store.clone());
        for _ in 0..3 {
            nodes.reconcile(&mut ctx).unwrap();
            sched.reconcile(&mut ctx).unwrap();
        }

        let pod = store.get(&pod_uid).unwrap();
        let p = pod.as_pod().unwrap();
        assert_eq!(p.status.phase, PodPhase::Pending);
        let cond = p
            .status
            .conditions
            .iter()
            .find(|c| c.condition_type == "PodScheduled")
            .unwrap();
        assert!(!cond.status);
        assert_eq!(cond.message, "0/1 nodes are available: 1 Insufficient cpu.");
        // One warning event despite three attempts.
        assert_eq!(
            pod.events.iter().filter(|e| e.reason == "FailedScheduling").count(),
            1
        );
    }

    fn pin(mut pod: Resource, node: &str) -> Resource {
        if let Some(p) = pod.as_pod_mut() {
            p.spec.node_name = Some(node.to_string());
        }
        pod
    }

    #[test]
    fn pinned_pod_respects_capacity_and_taints() {
        let store = ClusterStore::new();
        store.add(make_node("worker-1", 500, 8192)).unwrap();
        let tainted = store.add(make_node("worker-2", 4000, 8192)).unwrap();
        store.update(&tainted, |r| {
            r.as_node_mut().unwrap().spec.taints.push(Taint {
                key: "dedicated".to_string(),
                value: "gpu".to_string(),
                effect: TaintEffect::NoSchedule,
            });
        });
        let big = store.add(pin(make_pod("big", 2000, 128), "worker-1")).unwrap();
        let intruder = store.add(pin(make_pod("intruder", 100, 128), "worker-2")).unwrap();
        let ghost = store.add(pin(make_pod("ghost", 100, 128), "worker-9")).unwrap();

        let (mut rng, mut stats) = ctx_parts();
        let mut ctx = TickContext {
            now: SimTime::from_millis(100),
            dt: Duration::from_millis(100),
            rng: &mut rng,
            stats: &mut stats,
        };
        let nodes = NodeController::new(store.clone());
        let sched = SchedulingController::new(store.clone());
        for _ in 0..2 {
            nodes.reconcile(&mut ctx).unwrap();
            sched.reconcile(&mut ctx).unwrap();
        }

        let message = |uid: &str| {
            let pod = store.get(uid).unwrap();
            let p = pod.as_pod().unwrap();
            assert_eq!(p.status.phase, PodPhase::Pending);
            p.status
                .conditions
                .iter()
                .find(|c| c.condition_type == "PodScheduled" && !c.status)
                .map(|c| c.message.clone())
                .unwrap()
        };
        assert_eq!(message(&big), "0/1 nodes are available: 1 Insufficient cpu.");
        assert_eq!(message(&intruder), "0/1 nodes are available: 1 untolerated taint.");
        assert_eq!(message(&ghost), "0/1 nodes are available: node worker-9 not found.");
        assert_eq!(ctx.stats.pods_scheduled, 0);

        let node = store.get_by_name(ResourceKind::Node, "", "worker-1").unwrap();
        assert_eq!(node.as_node().unwrap().status.allocated.cpu_millis, 0);
    }

    #[test]
    fn pinned_pod_reserves_capacity_for_later_pods() {
        let store = ClusterStore::new();
        store.add(make_node("worker-1", 1000, 8192)).unwrap();
        let pinned = store.add(pin(make_pod("agent", 800, 128), "worker-1")).unwrap();
        let later = store.add(make_pod("web", 500, 128)).unwrap();

        let (mut rng, mut stats) = ctx_parts();
        let mut ctx = TickContext {
            now: SimTime::from_millis(100),
            dt: Duration::from_millis(100),
            rng: &mut rng,
            stats: &mut stats,
        };
        NodeController::new(store.clone()).reconcile(&mut ctx).unwrap();
        SchedulingController::new(store.clone()).reconcile(&mut ctx).unwrap();

        assert_eq!(store.get(&pinned).unwrap().pod_phase(), Some(PodPhase::Scheduled));
        let web = store.get(&later).unwrap();
        assert_eq!(web.pod_phase(), Some(PodPhase::Pending));
        assert!(web.as_pod().unwrap().spec.node_name.is_none());
    }
}
