use pkg_constants::engine::HPA_TOLERANCE;
use pkg_state::ClusterStore;
use pkg_state::watch::ClusterEvent;
use pkg_types::hpa::{HPASpec, HPAStatus};
use pkg_types::meta::set_condition;
use pkg_types::resource::{Resource, ResourceKind};
use pkg_types::time::SimTime;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::context::TickContext;
use crate::pods::is_ready_pod;

/// Horizontal Pod Autoscaler controller.
/// Scales Deployments, ReplicaSets and StatefulSets on mean CPU utilization
/// of their ready pods.
pub struct HPAController {
    store: ClusterStore,
}

/// Replica count for the target, or `None` when the kind cannot be scaled.
pub fn target_replicas(res: &Resource) -> Option<u32> {
    match res.kind() {
        ResourceKind::Deployment => res.as_deployment().map(|d| d.spec.replicas),
        ResourceKind::ReplicaSet => res.as_replicaset().map(|r| r.spec.replicas),
        ResourceKind::StatefulSet => res.as_statefulset().map(|s| s.spec.replicas),
        _ => None,
    }
}

/// Set `spec.replicas` on a scalable resource. Returns false for other kinds.
pub fn set_target_replicas(res: &mut Resource, replicas: u32) -> bool {
    if let Some(d) = res.as_deployment_mut() {
        d.spec.replicas = replicas;
    } else if let Some(r) = res.as_replicaset_mut() {
        r.spec.replicas = replicas;
    } else if let Some(s) = res.as_statefulset_mut() {
        s.spec.replicas = replicas;
    } else {
        return false;
    }
    true
}

/// Replica count the autoscaler asks for, before cooldowns.
///
/// `utilization` and the spec target are percentages. Inside the tolerance
/// band the count is unchanged; otherwise `ceil(current × ratio)`, limited by
/// the per-step bounds and then clamped to `[min, max]`.
pub fn desired_replicas(spec: &HPASpec, current: u32, utilization: f64) -> u32 {
    let target = f64::from(spec.target_cpu_utilization_percent.max(1));
    let ratio = utilization / target;
    let mut desired = if (ratio - 1.0).abs() <= HPA_TOLERANCE {
        current
    } else {
        (f64::from(current) * ratio).ceil().max(0.0) as u32
    };
    if desired > current {
        desired = desired.min(current.saturating_add(spec.max_scale_up_step.max(1)));
    } else if desired < current {
        desired = desired.max(current.saturating_sub(spec.max_scale_down_step.max(1)));
    }
    desired.max(spec.min_replicas).min(spec.max_replicas)
}

fn cooled_down(last: Option<SimTime>, now: SimTime, cooldown_secs: u64) -> bool {
    last.is_none_or(|t| now.since(t) >= Duration::from_secs(cooldown_secs))
}

impl HPAController {
    pub fn new(store: ClusterStore) -> Self {
        Self { store }
    }

    pub fn reconcile(&self, ctx: &mut TickContext<'_>) -> anyhow::Result<()> {
        for hpa in self.store.list_kind(ResourceKind::HorizontalPodAutoscaler) {
            if hpa.metadata.is_terminating() {
                continue;
            }
            if let Err(e) = self.reconcile_one(&hpa, ctx) {
                warn!("HPA {}: reconcile failed: {}", hpa.key(), e);
            }
        }
        Ok(())
    }

    fn reconcile_one(&self, res: &Resource, ctx: &mut TickContext<'_>) -> anyhow::Result<()> {
        let Some(hpa) = res.as_hpa().cloned() else {
            return Ok(());
        };
        let spec = &hpa.spec;
        let mut status = hpa.status.clone();
        let now = ctx.now;

        let target = self.store.get_by_name(
            spec.scale_target_ref.kind,
            res.namespace(),
            &spec.scale_target_ref.name,
        );
        let Some((target, current)) = target.and_then(|t| target_replicas(&t).map(|r| (t, r))) else {
            let message = format!(
                "target {} {} not found",
                spec.scale_target_ref.kind, spec.scale_target_ref.name
            );
            if set_condition(&mut status.conditions, "AbleToScale", false, "FailedGetScale", &message, now) {
                warn!("HPA {}: {}", res.name(), message);
            }
            self.write_status(res, &hpa.status, status);
            return Ok(());
        };
        set_condition(&mut status.conditions, "AbleToScale", true, "SucceededGetScale", "", now);

        // Mean of per-pod usage/requests over ready pods.
        let ratios: Vec<f64> = self
            .store
            .descendants(target.uid())
            .iter()
            .filter(|p| is_ready_pod(p))
            .filter_map(|p| {
                let pod = p.as_pod()?;
                let requested = pod.spec.total_requests().cpu_millis;
                (requested > 0).then(|| pod.usage().cpu_millis as f64 / requested as f64)
            })
            .collect();
        status.current_replicas = current;
        if ratios.is_empty() {
            status.current_cpu_utilization_percent = None;
            set_condition(&mut status.conditions, "ScalingActive", false, "NoReadyPods", "", now);
            self.write_status(res, &hpa.status, status);
            return Ok(());
        }
        set_condition(&mut status.conditions, "ScalingActive", true, "ValidMetricFound", "", now);

        let utilization = ratios.iter().sum::<f64>() / ratios.len() as f64 * 100.0;
        status.current_cpu_utilization_percent = Some(utilization.round() as u32);
        let desired = desired_replicas(spec, current, utilization);
        status.desired_replicas = desired;
        debug!(
            "HPA {}: utilization {:.0}% (target {}%), {} -> {}",
            res.name(),
            utilization,
            spec.target_cpu_utilization_percent,
            current,
            desired
        );

        let allowed = if desired > current {
            cooled_down(status.last_scale_up_time, now, spec.scale_up_cooldown_secs)
        } else if desired < current {
            cooled_down(status.last_scale_down_time, now, spec.scale_down_cooldown_secs)
        } else {
            false
        };
        if allowed {
            self.store.update(target.uid(), |r| {
                set_target_replicas(r, desired);
            });
            if desired > current {
                status.last_scale_up_time = Some(now);
            } else {
                status.last_scale_down_time = Some(now);
            }
            status.current_replicas = desired;
            info!(
                "HPA {}: scaled {} {} from {} to {} (cpu {:.0}%)",
                res.name(),
                target.kind(),
                target.name(),
                current,
                desired,
                utilization
            );
            self.store.bus().emit(ClusterEvent::Scaled {
                hpa: res.name().to_string(),
                namespace: res.namespace().to_string(),
                target_kind: target.kind(),
                target: target.name().to_string(),
                from: current,
                to: desired,
            });
        }
        self.write_status(res, &hpa.status, status);
        Ok(())
    }

    fn write_status(&self, res: &Resource, before: &HPAStatus, status: HPAStatus) {
        if *before == status {
            return;
        }
        self.store.update(res.uid(), |r| {
            if let Some(h) = r.as_hpa_mut() {
                h.status = status;
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{ctx_parts, make_pod, make_template};
    use pkg_state::watch::Topic;
    use pkg_types::hpa::HorizontalPodAutoscaler;
    use pkg_types::meta::ObjectMeta;
    use pkg_types::pod::{ContainerState, ContainerStatus, PodPhase, Resources};
    use pkg_types::replicaset::{ReplicaSet, ReplicaSetSpec};
    use pkg_types::resource::Object;
    use pkg_types::selector::LabelSelector;

    fn make_rs(store: &ClusterStore, replicas: u32) -> Resource {
        let rs = Resource::new(
            ObjectMeta::new("web", "default"),
            Object::ReplicaSet(ReplicaSet {
                spec: ReplicaSetSpec {
                    replicas,
                    selector: LabelSelector::default(),
                    template: make_template("web"),
                },
                status: Default::default(),
            }),
        );
        let uid = store.add(rs).unwrap();
        store.get(&uid).unwrap()
    }

    /// Ready pod requesting 100m and using `cpu` millicores.
    fn busy_pod(store: &ClusterStore, owner: &Resource, name: &str, cpu: u64) {
        let mut pod = make_pod(name, 100, 128);
        pod.metadata.owner_references.push(owner.controller_ref());
        let p = pod.as_pod_mut().unwrap();
        p.status.phase = PodPhase::Running;
        p.status.container_statuses = vec![ContainerStatus {
            name: "app".to_string(),
            state: ContainerState::Running {
                started_at: SimTime::ZERO,
            },
            ready: true,
            usage: Resources::new(cpu, 0),
            ..Default::default()
        }];
        store.add(pod).unwrap();
    }

    fn make_hpa(store: &ClusterStore, min: u32, max: u32) -> String {
        let hpa = Resource::new(
            ObjectMeta::new("web", "default"),
            Object::HorizontalPodAutoscaler(HorizontalPodAutoscaler {
                spec: HPASpec::new(ResourceKind::ReplicaSet, "web", min, max, 50),
                status: Default::default(),
            }),
        );
        store.add(hpa).unwrap()
    }

    fn run(ctl: &HPAController, secs: u64) {
        let (mut rng, mut stats) = ctx_parts();
        let mut ctx = TickContext {
            now: SimTime::from_secs(secs),
            dt: Duration::from_millis(100),
            rng: &mut rng,
            stats: &mut stats,
        };
        ctl.reconcile(&mut ctx).unwrap();
    }

    fn replicas(store: &ClusterStore, uid: &str) -> u32 {
        target_replicas(&store.get(uid).unwrap()).unwrap()
    }

    #[test]
    fn desired_respects_tolerance_steps_and_bounds() {
        let spec = HPASpec::new(ResourceKind::Deployment, "web", 2, 10, 50);
        // Within 10% of target: unchanged.
        assert_eq!(desired_replicas(&spec, 4, 54.0), 4);
        // 4 × 2.0 = 8, but at most +4 per step.
        assert_eq!(desired_replicas(&spec, 4, 100.0), 8);
        assert_eq!(desired_replicas(&spec, 3, 200.0), 7);
        // Down by at most 2, and never below min.
        assert_eq!(desired_replicas(&spec, 6, 5.0), 4);
        assert_eq!(desired_replicas(&spec, 3, 5.0), 2);
        // Clamped to max last.
        assert_eq!(desired_replicas(&spec, 9, 150.0), 10);
        // A target with max below min stays within max.
        let odd = HPASpec::new(ResourceKind::Deployment, "web", 5, 3, 50);
        assert_eq!(desired_replicas(&odd, 4, 50.0), 3);
    }

    #[test]
    fn scales_up_and_emits_event_then_waits_for_cooldown() {
        let store = ClusterStore::new();
        let rs = make_rs(&store, 2);
        busy_pod(&store, &rs, "web-a", 100);
        busy_pod(&store, &rs, "web-b", 100);
        make_hpa(&store, 1, 10);
        let mut sub = store.bus().subscribe(Topic::Autoscaler);
        let ctl = HPAController::new(store.clone());

        run(&ctl, 5);
        assert_eq!(replicas(&store, rs.uid()), 4);
        let events = sub.drain();
        assert_eq!(events.len(), 1);
        assert!(matches!(
            events[0].event,
            ClusterEvent::Scaled { from: 2, to: 4, .. }
        ));

        // Still hot, but inside the 15s scale-up cooldown.
        run(&ctl, 10);
        assert_eq!(replicas(&store, rs.uid()), 4);
        run(&ctl, 20);
        assert_eq!(replicas(&store, rs.uid()), 8);
    }

    #[test]
    fn scale_down_uses_long_cooldown() {
        let store = ClusterStore::new();
        let rs = make_rs(&store, 6);
        busy_pod(&store, &rs, "web-a", 5);
        let ctl = HPAController::new(store.clone());
        make_hpa(&store, 1, 10);

        run(&ctl, 5);
        assert_eq!(replicas(&store, rs.uid()), 4);
        run(&ctl, 100);
        assert_eq!(replicas(&store, rs.uid()), 4);
        run(&ctl, 305);
        assert_eq!(replicas(&store, rs.uid()), 2);
    }

    #[test]
    fn missing_target_reports_unable_to_scale() {
        let store = ClusterStore::new();
        let uid = make_hpa(&store, 1, 5);
        let ctl = HPAController::new(store.clone());
        run(&ctl, 5);
        let hpa = store.get(&uid).unwrap();
        let status = &hpa.as_hpa().unwrap().status;
        assert!(!pkg_types::meta::condition_is_true(&status.conditions, "AbleToScale"));
    }
}
