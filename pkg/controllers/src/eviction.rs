use pkg_state::ClusterStore;
use pkg_state::store::RemoveOutcome;
use pkg_types::meta::{EventSeverity, set_condition};
use pkg_types::pod::{PodPhase, PodStatus};
use pkg_types::resource::{Resource, ResourceKind};
use pkg_types::time::SimTime;
use std::collections::HashSet;
use std::time::Duration;
use tracing::info;

use crate::context::TickContext;

/// Evicts pods from nodes that stayed NotReady past the grace period, and
/// from nodes that no longer exist.
///
/// Controller-owned pods are deleted so their controller recreates them;
/// bare pods are reset to `Pending` for rescheduling.
pub struct EvictionController {
    store: ClusterStore,
    grace_period: Duration,
}

impl EvictionController {
    pub fn new(store: ClusterStore, grace_period: Duration) -> Self {
        Self {
            store,
            grace_period,
        }
    }

    pub fn reconcile(&self, ctx: &mut TickContext<'_>) -> anyhow::Result<()> {
        let mut live: HashSet<String> = HashSet::new();
        let mut failed: HashSet<String> = HashSet::new();
        for node in self.store.list_kind(ResourceKind::Node) {
            let Some(n) = node.as_node() else { continue };
            live.insert(node.name().to_string());
            if let Some(since) = n.status.not_ready_since
                && !n.status.ready
                && ctx.now.since(since) >= self.grace_period
            {
                failed.insert(node.name().to_string());
            }
        }

        for pod in self.store.list_kind(ResourceKind::Pod) {
            if !pod.is_active_pod() {
                continue;
            }
            let Some(node_name) = pod.as_pod().and_then(|p| p.spec.node_name.clone()) else {
                continue;
            };
            let reason = if !live.contains(&node_name) {
                "NodeLost"
            } else if failed.contains(&node_name) {
                "NodeNotReady"
            } else {
                continue;
            };
            info!(
                "Evicting pod {} (was on node {}: {})",
                pod.key(),
                node_name,
                reason
            );
            self.evict(&pod, reason, ctx);
        }
        Ok(())
    }

    fn evict(&self, pod: &Resource, reason: &str, ctx: &mut TickContext<'_>) {
        ctx.stats.pods_evicted += 1;
        if evict_pod(&self.store, pod, reason, ctx.now) {
            ctx.stats.pods_deleted += 1;
        }
    }
}

/// Evict one pod. Controller-owned pods are deleted, bare pods go back to
/// `Pending` with no node. Returns true if the pod was deleted.
pub fn evict_pod(store: &ClusterStore, pod: &Resource, reason: &str, now: SimTime) -> bool {
    if pod.metadata.controller_ref().is_some() {
        return store.remove(pod.uid()) != RemoveOutcome::NotFound;
    }
    let message = format!("evicted: {}", reason);
    store.update(pod.uid(), |r| {
        if let Some(p) = r.as_pod_mut() {
            p.spec.node_name = None;
            let mut status = PodStatus {
                phase: PodPhase::Pending,
                reason: Some("Evicted".to_string()),
                message: Some(message.clone()),
                conditions: std::mem::take(&mut p.status.conditions),
                ..Default::default()
            };
            set_condition(&mut status.conditions, "Ready", false, "Evicted", "", now);
            set_condition(&mut status.conditions, "PodScheduled", false, reason, &message, now);
            p.status = status;
        }
    });
    store.record_event(pod.uid(), EventSeverity::Warning, "Evicted", reason);
    false
}
