use pkg_state::ClusterStore;
use pkg_types::pod::PodPhase;
use pkg_types::resource::ResourceKind;
use rand::Rng;
use tracing::{debug, warn};

use crate::context::TickContext;

/// Randomly deletes a controller-owned running pod so its controller has
/// to replace it.
pub struct ChaosController {
    store: ClusterStore,
    kill_probability: f64,
}

impl ChaosController {
    pub fn new(store: ClusterStore, kill_probability: f64) -> Self {
        Self {
            store,
            kill_probability: kill_probability.clamp(0.0, 1.0),
        }
    }

    /// One chaos round. Returns the name of the killed pod, if any.
    pub fn reconcile(&self, ctx: &mut TickContext<'_>) -> anyhow::Result<Option<String>> {
        if self.kill_probability <= 0.0 || !ctx.rng.random_bool(self.kill_probability) {
            return Ok(None);
        }
        let candidates: Vec<_> = self
            .store
            .list_kind(ResourceKind::Pod)
            .into_iter()
            .filter(|p| {
                p.is_active_pod()
                    && p.pod_phase() == Some(PodPhase::Running)
                    && p.metadata.controller_ref().is_some()
            })
            .collect();
        if candidates.is_empty() {
            debug!("Chaos: no eligible pods");
            return Ok(None);
        }
        let victim = &candidates[ctx.rng.random_range(0..candidates.len())];
        self.store.remove(victim.uid());
        ctx.stats.pods_deleted += 1;
        warn!("Chaos: killed pod {}", victim.key());
        Ok(Some(victim.name().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{ctx_parts, make_pod};
    use pkg_types::meta::OwnerReference;
    use pkg_types::time::SimTime;
    use std::time::Duration;

    fn running_pod(store: &ClusterStore, name: &str, owned: bool) -> String {
        let mut pod = make_pod(name, 100, 128);
        if owned {
            pod.metadata.owner_references.push(OwnerReference {
                kind: ResourceKind::ReplicaSet,
                name: "web".to_string(),
                uid: "rs-uid".to_string(),
                controller: true,
            });
        }
        pod.as_pod_mut().unwrap().status.phase = PodPhase::Running;
        store.add(pod).unwrap()
    }

    #[test]
    fn only_kills_owned_running_pods() {
        let store = ClusterStore::new();
        let bare = running_pod(&store, "bare", false);
        let owned = running_pod(&store, "owned", true);
        let ctl = ChaosController::new(store.clone(), 1.0);
        let (mut rng, mut stats) = ctx_parts();
        let mut ctx = TickContext {
            now: SimTime::ZERO,
            dt: Duration::from_millis(100),
            rng: &mut rng,
            stats: &mut stats,
        };

        assert_eq!(ctl.reconcile(&mut ctx).unwrap().as_deref(), Some("owned"));
        assert!(!store.contains(&owned));
        assert!(store.contains(&bare));
        assert_eq!(ctl.reconcile(&mut ctx).unwrap(), None);
    }

    #[test]
    fn zero_probability_is_inert() {
        let store = ClusterStore::new();
        let owned = running_pod(&store, "owned", true);
        let ctl = ChaosController::new(store.clone(), 0.0);
        let (mut rng, mut stats) = ctx_parts();
        let mut ctx = TickContext {
            now: SimTime::ZERO,
            dt: Duration::from_millis(100),
            rng: &mut rng,
            stats: &mut stats,
        };
        assert_eq!(ctl.reconcile(&mut ctx).unwrap(), None);
        assert!(store.contains(&owned));
    }
}
