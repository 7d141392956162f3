use pkg_constants::labels::POD_TEMPLATE_HASH;
use pkg_state::ClusterStore;
use pkg_types::deployment::{Deployment, DeploymentStatus, DeploymentStrategy};
use pkg_types::meta::{ObjectMeta, set_condition};
use pkg_types::pod::PodTemplate;
use pkg_types::replicaset::{ReplicaSet, ReplicaSetSpec, ReplicaSetStatus};
use pkg_types::resource::{Object, Resource, ResourceKind};
use pkg_types::selector::LabelSelector;
use std::collections::BTreeMap;
use tracing::{info, warn};

use crate::context::TickContext;
use crate::pods::{is_ready_pod, owned_of_kind, owned_pods};

/// Controller that reconciles Deployments into ReplicaSets.
/// Handles rolling updates and recreate strategies.
pub struct DeploymentController {
    store: ClusterStore,
}

/// An owned ReplicaSet with its live pod counts.
struct OwnedRs {
    res: Resource,
    replicas: u32,
    pods: u32,
    ready: u32,
}

impl DeploymentController {
    pub fn new(store: ClusterStore) -> Self {
        Self { store }
    }

    pub fn reconcile(&self, ctx: &mut TickContext<'_>) -> anyhow::Result<()> {
        for deploy in self.store.list_kind(ResourceKind::Deployment) {
            if deploy.metadata.is_terminating() {
                continue;
            }
            if let Err(e) = self.reconcile_one(&deploy, ctx) {
                warn!("Deployment {}: reconcile failed: {}", deploy.key(), e);
            }
        }
        Ok(())
    }

    fn reconcile_one(&self, res: &Resource, ctx: &mut TickContext<'_>) -> anyhow::Result<()> {
        let Some(deploy) = res.as_deployment().cloned() else {
            return Ok(());
        };
        if deploy.spec.paused {
            return Ok(());
        }

        let full_hash = template_hash(&deploy.spec.template);
        let hash = &full_hash[..8];
        let (mut current, mut old) = self.owned_replicasets(res.uid(), hash);
        let desired = deploy.spec.replicas;

        match deploy.spec.strategy {
            DeploymentStrategy::RollingUpdate {
                max_surge,
                max_unavailable,
            } => {
                let (surge, unavailable) = if max_surge == 0 && max_unavailable == 0 {
                    (1, 0)
                } else {
                    (max_surge, max_unavailable)
                };
                let old_specced: u32 = old.iter().map(|o| o.replicas).sum();

                let new_rs = match current.take() {
                    Some(rs) => rs,
                    None => {
                        // First rollout goes straight to full size.
                        let initial = if old_specced == 0 { desired } else { 0 };
                        self.create_replicaset(res, &deploy, hash, initial)?
                    }
                };

                // Scale up the new RS within the surge budget.
                let total = new_rs.replicas + old_specced;
                let target = if new_rs.replicas >= desired {
                    desired
                } else {
                    let room = (desired + surge).saturating_sub(total);
                    (new_rs.replicas + room).min(desired)
                };
                if target != new_rs.replicas {
                    self.scale(res, &new_rs.res, target);
                }

                // Scale down old ReplicaSets, oldest first, as availability allows.
                let total_ready: u32 = new_rs.ready + old.iter().map(|o| o.ready.min(o.replicas)).sum::<u32>();
                let min_available = desired.saturating_sub(unavailable);
                let mut allowance = total_ready.saturating_sub(min_available);
                // Unready old pods cost no availability.
                for o in old.iter_mut() {
                    let unready = o.replicas.saturating_sub(o.ready);
                    if unready > 0 {
                        let next = o.replicas - unready;
                        self.scale(res, &o.res, next);
                        o.replicas = next;
                    }
                }
                for o in old.iter_mut() {
                    if allowance == 0 {
                        break;
                    }
                    let cut = o.replicas.min(allowance);
                    if cut > 0 {
                        self.scale(res, &o.res, o.replicas - cut);
                        o.replicas -= cut;
                        allowance -= cut;
                    }
                }
                current = Some(new_rs);
            }
            DeploymentStrategy::Recreate => {
                for o in old.iter_mut() {
                    if o.replicas > 0 {
                        self.scale(res, &o.res, 0);
                        o.replicas = 0;
                    }
                }
                // New pods only once every old pod is gone.
                if old.iter().all(|o| o.pods == 0) {
                    let rs = match current.take() {
                        Some(rs) => rs,
                        None => self.create_replicaset(res, &deploy, hash, desired)?,
                    };
                    if rs.replicas != desired {
                        self.scale(res, &rs.res, desired);
                    }
                    current = Some(rs);
                }
            }
        }

        self.update_status(res, &deploy, current.as_ref(), &old, ctx);
        Ok(())
    }

    /// Split owned ReplicaSets into the one matching `hash` and the rest (oldest first).
    fn owned_replicasets(&self, uid: &str, hash: &str) -> (Option<OwnedRs>, Vec<OwnedRs>) {
        let mut owned: Vec<OwnedRs> = owned_of_kind(&self.store, uid, ResourceKind::ReplicaSet)
            .into_iter()
            .map(|res| {
                let pods: Vec<Resource> = owned_pods(&self.store, res.uid())
                    .into_iter()
                    .filter(|p| p.is_active_pod())
                    .collect();
                OwnedRs {
                    replicas: res.as_replicaset().map(|r| r.spec.replicas).unwrap_or(0),
                    pods: pods.len() as u32,
                    ready: pods.iter().filter(|p| is_ready_pod(p)).count() as u32,
                    res,
                }
            })
            .collect();
        owned.sort_by(|a, b| {
            a.res
                .metadata
                .creation_timestamp
                .cmp(&b.res.metadata.creation_timestamp)
                .then_with(|| a.res.name().cmp(b.res.name()))
        });
        let idx = owned
            .iter()
            .position(|o| o.res.metadata.labels.get(POD_TEMPLATE_HASH).map(String::as_str) == Some(hash));
        let current = idx.map(|i| owned.remove(i));
        (current, owned)
    }

    fn create_replicaset(
        &self,
        owner: &Resource,
        deploy: &Deployment,
        hash: &str,
        replicas: u32,
    ) -> anyhow::Result<OwnedRs> {
        let mut template = deploy.spec.template.clone();
        template
            .labels
            .insert(POD_TEMPLATE_HASH.to_string(), hash.to_string());
        let mut selector = deploy.spec.selector.clone();
        if selector.is_empty() {
            selector = LabelSelector::from_labels(deploy.spec.template.labels.clone());
        }
        selector
            .match_labels
            .insert(POD_TEMPLATE_HASH.to_string(), hash.to_string());

        let labels = BTreeMap::from([(POD_TEMPLATE_HASH.to_string(), hash.to_string())]);
        let mut meta = ObjectMeta::new(format!("{}-{}", owner.name(), hash), owner.namespace())
            .with_labels(labels)
            .with_owner(owner.controller_ref());
        meta.labels.extend(deploy.spec.template.labels.clone());

        let rs = Resource::new(
            meta,
            Object::ReplicaSet(ReplicaSet {
                spec: ReplicaSetSpec {
                    replicas,
                    selector,
                    template,
                },
                status: ReplicaSetStatus::default(),
            }),
        );
        let uid = self.store.add(rs)?;
        let res = self
            .store
            .get(&uid)
            .ok_or_else(|| anyhow::anyhow!("replicaset {} vanished after create", uid))?;
        info!(
            "Deployment {}: created new RS {} (hash={}, replicas={})",
            owner.name(),
            res.name(),
            hash,
            replicas
        );
        Ok(OwnedRs {
            res,
            replicas,
            pods: 0,
            ready: 0,
        })
    }

    fn scale(&self, owner: &Resource, rs: &Resource, replicas: u32) {
        self.store.update(rs.uid(), |r| {
            if let Some(rs) = r.as_replicaset_mut() {
                rs.spec.replicas = replicas;
            }
        });
        info!(
            "Deployment {}: scaled RS {} to {}",
            owner.name(),
            rs.name(),
            replicas
        );
    }

    fn update_status(
        &self,
        res: &Resource,
        deploy: &Deployment,
        current: Option<&OwnedRs>,
        old: &[OwnedRs],
        ctx: &TickContext<'_>,
    ) {
        let desired = deploy.spec.replicas;
        let updated = current.map(|c| c.pods).unwrap_or(0);
        let pods = updated + old.iter().map(|o| o.pods).sum::<u32>();
        let ready = current.map(|c| c.ready).unwrap_or(0) + old.iter().map(|o| o.ready).sum::<u32>();
        let max_unavailable = match deploy.spec.strategy {
            DeploymentStrategy::RollingUpdate {
                max_unavailable, ..
            } => max_unavailable,
            DeploymentStrategy::Recreate => 0,
        };

        let mut status = DeploymentStatus {
            replicas: pods,
            ready_replicas: ready,
            available_replicas: ready,
            updated_replicas: updated,
            observed_generation: res.metadata.generation,
            conditions: deploy.status.conditions.clone(),
        };
        let available = ready >= desired.saturating_sub(max_unavailable);
        set_condition(
            &mut status.conditions,
            "Available",
            available,
            if available {
                "MinimumReplicasAvailable"
            } else {
                "MinimumReplicasUnavailable"
            },
            "",
            ctx.now,
        );
        let progressing = updated < desired || old.iter().any(|o| o.pods > 0);
        set_condition(
            &mut status.conditions,
            "Progressing",
            progressing,
            if progressing {
                "ReplicaSetUpdating"
            } else {
                "NewReplicaSetAvailable"
            },
            "",
            ctx.now,
        );

        if status != deploy.status {
            self.store.update(res.uid(), |r| {
                if let Some(d) = r.as_deployment_mut() {
                    d.status = status;
                }
            });
        }
    }
}

/// Compute a simple hash of the pod template for change detection.
/// ReplicaSet names and the pod-template-hash label use the first 8 chars.
pub fn template_hash(template: &PodTemplate) -> String {
    let json = serde_json::to_string(template).unwrap_or_default();
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in json.bytes() {
        hash = hash.wrapping_mul(31).wrapping_add(byte as u64);
    }
    format!("{:016x}", hash)
}
