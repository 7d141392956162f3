use pkg_state::ClusterStore;
use pkg_state::store::RemoveOutcome;
use pkg_types::replicaset::ReplicaSetStatus;
use pkg_types::resource::{Resource, ResourceKind};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use crate::context::TickContext;
use crate::pods::{create_pod, is_ready_pod, owned_pods, sort_newest_first};

/// Controller that reconciles ReplicaSets into Pods.
/// Keeps the number of non-terminal owned pods at `spec.replicas`.
pub struct ReplicaSetController {
    store: ClusterStore,
}

impl ReplicaSetController {
    pub fn new(store: ClusterStore) -> Self {
        Self { store }
    }

    pub fn reconcile(&self, ctx: &mut TickContext<'_>) -> anyhow::Result<()> {
        for rs in self.store.list_kind(ResourceKind::ReplicaSet) {
            if rs.metadata.is_terminating() {
                continue;
            }
            if let Err(e) = self.reconcile_one(&rs, ctx) {
                warn!("ReplicaSet {}: reconcile failed: {}", rs.key(), e);
            }
        }
        Ok(())
    }

    fn reconcile_one(&self, rs: &Resource, ctx: &mut TickContext<'_>) -> anyhow::Result<()> {
        let Some(spec) = rs.as_replicaset().map(|r| r.spec.clone()) else {
            return Ok(());
        };

        let pods = owned_pods(&self.store, rs.uid());
        // Finished pods never come back; clear them so replacements take their place.
        for pod in pods.iter().filter(|p| p.as_pod().is_some_and(|p| p.is_terminal())) {
            if matches!(self.store.remove(pod.uid()), RemoveOutcome::Removed(_)) {
                ctx.stats.pods_deleted += 1;
                debug!("RS {}: removed finished pod {}", rs.name(), pod.name());
            }
        }

        let mut active: Vec<Resource> = pods.into_iter().filter(|p| p.is_active_pod()).collect();
        let current = active.len() as u32;

        if current < spec.replicas {
            for i in current..spec.replicas {
                let pod = create_pod(
                    &self.store,
                    ctx.rng,
                    rs.name(),
                    rs,
                    &spec.template,
                    &BTreeMap::new(),
                )?;
                ctx.stats.pods_created += 1;
                info!(
                    "RS {}: created pod {} ({}/{})",
                    rs.name(),
                    pod.name(),
                    i + 1,
                    spec.replicas
                );
            }
        } else if current > spec.replicas {
            sort_newest_first(&mut active);
            let excess = (current - spec.replicas) as usize;
            for pod in active.iter().take(excess) {
                self.store.remove(pod.uid());
                ctx.stats.pods_deleted += 1;
                info!("RS {}: deleted pod {}", rs.name(), pod.name());
            }
        }

        let active: Vec<Resource> = owned_pods(&self.store, rs.uid())
            .into_iter()
            .filter(|p| p.is_active_pod())
            .collect();
        let ready = active.iter().filter(|p| is_ready_pod(p)).count() as u32;
        let status = ReplicaSetStatus {
            replicas: active.len() as u32,
            ready_replicas: ready,
            available_replicas: ready,
            conditions: rs
                .as_replicaset()
                .map(|r| r.status.conditions.clone())
                .unwrap_or_default(),
        };
        if rs.as_replicaset().is_some_and(|r| r.status != status) {
            self.store.update(rs.uid(), |r| {
                if let Some(rs) = r.as_replicaset_mut() {
                    rs.status = status;
                }
            });
        }
        Ok(())
    }
}
