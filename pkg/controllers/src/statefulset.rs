use pkg_constants::labels::STATEFULSET_POD_ORDINAL;
use pkg_state::ClusterStore;
use pkg_types::resource::{Resource, ResourceKind};
use pkg_types::statefulset::StatefulSetStatus;
use std::collections::BTreeMap;
use tracing::{info, warn};

use crate::context::TickContext;
use crate::pods::{is_ready_pod, owned_pods, pod_from_template};

/// Controller that gives StatefulSet pods stable ordinal identities.
/// Scales up one ordinal at a time, each only after every lower ordinal
/// is Ready; scales down from the highest ordinal.
pub struct StatefulSetController {
    store: ClusterStore,
}

impl StatefulSetController {
    pub fn new(store: ClusterStore) -> Self {
        Self { store }
    }

    pub fn reconcile(&self, ctx: &mut TickContext<'_>) -> anyhow::Result<()> {
        for sts in self.store.list_kind(ResourceKind::StatefulSet) {
            if sts.metadata.is_terminating() {
                continue;
            }
            if let Err(e) = self.reconcile_one(&sts, ctx) {
                warn!("StatefulSet {}: reconcile failed: {}", sts.key(), e);
            }
        }
        Ok(())
    }

    fn reconcile_one(&self, sts: &Resource, ctx: &mut TickContext<'_>) -> anyhow::Result<()> {
        let Some(spec) = sts.as_statefulset().map(|s| s.spec.clone()) else {
            return Ok(());
        };

        let mut by_ordinal: BTreeMap<u32, Resource> = BTreeMap::new();
        for pod in owned_pods(&self.store, sts.uid()) {
            if pod.as_pod().is_some_and(|p| p.is_terminal()) {
                // Freed so the same ordinal is recreated.
                self.store.remove(pod.uid());
                ctx.stats.pods_deleted += 1;
                continue;
            }
            if pod.metadata.is_terminating() {
                continue;
            }
            if let Some(ordinal) = ordinal_of(sts.name(), &pod) {
                by_ordinal.insert(ordinal, pod);
            }
        }

        let highest = by_ordinal.keys().next_back().copied();
        if let Some(ordinal) = highest
            && ordinal >= spec.replicas
        {
            if let Some(pod) = by_ordinal.remove(&ordinal) {
                self.store.remove(pod.uid());
                ctx.stats.pods_deleted += 1;
                info!("StatefulSet {}: removed pod {}", sts.name(), pod.name());
            }
        } else {
            for ordinal in 0..spec.replicas {
                match by_ordinal.get(&ordinal) {
                    Some(pod) if is_ready_pod(pod) => continue,
                    Some(_) => break,
                    None => {
                        let name = format!("{}-{}", sts.name(), ordinal);
                        let labels = BTreeMap::from([(
                            STATEFULSET_POD_ORDINAL.to_string(),
                            ordinal.to_string(),
                        )]);
                        let pod = pod_from_template(name, sts, &spec.template, &labels);
                        let uid = self.store.add(pod)?;
                        ctx.stats.pods_created += 1;
                        info!(
                            "StatefulSet {}: created pod {}-{} ({}/{})",
                            sts.name(),
                            sts.name(),
                            ordinal,
                            ordinal + 1,
                            spec.replicas
                        );
                        if let Some(pod) = self.store.get(&uid) {
                            by_ordinal.insert(ordinal, pod);
                        }
                        break;
                    }
                }
            }
        }

        let status = StatefulSetStatus {
            replicas: by_ordinal.len() as u32,
            ready_replicas: by_ordinal.values().filter(|p| is_ready_pod(p)).count() as u32,
            next_ordinal: (0..spec.replicas)
                .find(|o| !by_ordinal.contains_key(o))
                .unwrap_or(spec.replicas),
            conditions: sts
                .as_statefulset()
                .map(|s| s.status.conditions.clone())
                .unwrap_or_default(),
        };
        if sts.as_statefulset().is_some_and(|s| s.status != status) {
            self.store.update(sts.uid(), |r| {
                if let Some(s) = r.as_statefulset_mut() {
                    s.status = status;
                }
            });
        }
        Ok(())
    }
}

/// Ordinal from the pod label, falling back to the `<set>-<n>` name.
fn ordinal_of(set: &str, pod: &Resource) -> Option<u32> {
    if let Some(label) = pod.metadata.labels.get(STATEFULSET_POD_ORDINAL) {
        return label.parse().ok();
    }
    pod.name()
        .strip_prefix(set)
        .and_then(|rest| rest.strip_prefix('-'))
        .and_then(|n| n.parse().ok())
}
