use pkg_state::ClusterStore;
use pkg_types::daemonset::{DaemonSetSpec, DaemonSetStatus};
use pkg_types::node::Node;
use pkg_types::pod::TaintEffect;
use pkg_types::resource::{Resource, ResourceKind};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{info, warn};

use crate::context::TickContext;
use crate::pods::{is_ready_pod, owned_pods, pod_from_template, random_suffix};

/// Controller that ensures exactly one Pod runs on each eligible node
/// for every DaemonSet.
pub struct DaemonSetController {
    store: ClusterStore,
}

impl DaemonSetController {
    pub fn new(store: ClusterStore) -> Self {
        Self { store }
    }

    pub fn reconcile(&self, ctx: &mut TickContext<'_>) -> anyhow::Result<()> {
        let nodes = self.store.list_kind(ResourceKind::Node);
        for ds in self.store.list_kind(ResourceKind::DaemonSet) {
            if ds.metadata.is_terminating() {
                continue;
            }
            if let Err(e) = self.reconcile_one(&ds, &nodes, ctx) {
                warn!("DaemonSet {}: reconcile failed: {}", ds.key(), e);
            }
        }
        Ok(())
    }

    fn reconcile_one(
        &self,
        ds: &Resource,
        nodes: &[Resource],
        ctx: &mut TickContext<'_>,
    ) -> anyhow::Result<()> {
        let Some(spec) = ds.as_daemonset().map(|d| d.spec.clone()) else {
            return Ok(());
        };

        // Filter eligible nodes (Ready + selector + tolerated NoSchedule taints)
        let eligible: BTreeSet<&str> = nodes
            .iter()
            .filter(|n| n.as_node().is_some_and(|node| is_eligible(&spec, n, node)))
            .map(|n| n.name())
            .collect();

        let mut covered: BTreeSet<String> = BTreeSet::new();
        for pod in owned_pods(&self.store, ds.uid()) {
            if !pod.is_active_pod() {
                if pod.as_pod().is_some_and(|p| p.is_terminal()) {
                    self.store.remove(pod.uid());
                    ctx.stats.pods_deleted += 1;
                }
                continue;
            }
            let node = pod.as_pod().and_then(|p| p.spec.node_name.clone());
            match node {
                Some(node) if eligible.contains(node.as_str()) && !covered.contains(&node) => {
                    covered.insert(node);
                }
                other => {
                    self.store.remove(pod.uid());
                    ctx.stats.pods_deleted += 1;
                    info!(
                        "DaemonSet {}: removed pod {} from node {}",
                        ds.name(),
                        pod.name(),
                        other.as_deref().unwrap_or("<none>")
                    );
                }
            }
        }

        let missing: Vec<&str> = eligible
            .iter()
            .filter(|n| !covered.contains(**n))
            .copied()
            .collect();
        for node in missing {
            let name = format!("{}-{}", ds.name(), random_suffix(ctx.rng, 5));
            let mut pod = pod_from_template(name, ds, &spec.template, &BTreeMap::new());
            if let Some(p) = pod.as_pod_mut() {
                p.spec.node_name = Some(node.to_string());
            }
            self.store.add(pod)?;
            ctx.stats.pods_created += 1;
            covered.insert(node.to_string());
            info!("DaemonSet {}: created pod on node {}", ds.name(), node);
        }

        let ready = owned_pods(&self.store, ds.uid())
            .iter()
            .filter(|p| is_ready_pod(p))
            .count() as u32;
        let status = DaemonSetStatus {
            desired_number_scheduled: eligible.len() as u32,
            current_number_scheduled: covered.len() as u32,
            number_ready: ready,
            conditions: ds
                .as_daemonset()
                .map(|d| d.status.conditions.clone())
                .unwrap_or_default(),
        };
        if ds.as_daemonset().is_some_and(|d| d.status != status) {
            self.store.update(ds.uid(), |r| {
                if let Some(d) = r.as_daemonset_mut() {
                    d.status = status;
                }
            });
        }
        Ok(())
    }
}

fn is_eligible(spec: &DaemonSetSpec, res: &Resource, node: &Node) -> bool {
    if !node.status.ready || res.metadata.is_terminating() {
        return false;
    }
    let selector_ok = spec
        .node_selector
        .iter()
        .chain(spec.template.spec.node_selector.iter())
        .all(|(k, v)| res.metadata.labels.get(k) == Some(v));
    let tolerated = node
        .spec
        .taints
        .iter()
        .filter(|t| t.effect != TaintEffect::PreferNoSchedule)
        .all(|t| spec.template.spec.tolerations.iter().any(|tol| tol.tolerates(t)));
    selector_ok && tolerated
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{ctx_parts, make_node, make_template};
    use pkg_types::daemonset::DaemonSet;
    use pkg_types::meta::ObjectMeta;
    use pkg_types::node::Taint;
    use pkg_types::resource::Object;
    use pkg_types::selector::LabelSelector;
    use pkg_types::time::SimTime;
    use std::time::Duration;

    fn ready_node(store: &ClusterStore, name: &str) -> String {
        let mut node = make_node(name, 4000, 8192);
        node.as_node_mut().unwrap().status.ready = true;
        store.add(node).unwrap()
    }

    fn make_ds(store: &ClusterStore, name: &str) -> String {
        let template = make_template(name);
        let ds = Resource::new(
            ObjectMeta::new(name, "kube-system"),
            Object::DaemonSet(DaemonSet {
                spec: DaemonSetSpec {
                    selector: LabelSelector::from_labels(template.labels.clone()),
                    template,
                    node_selector: BTreeMap::new(),
                },
                status: Default::default(),
            }),
        );
        store.add(ds).unwrap()
    }

    fn tick(ctl: &DaemonSetController) {
        let (mut rng, mut stats) = ctx_parts();
        let mut ctx = TickContext {
            now: SimTime::ZERO,
            dt: Duration::from_millis(100),
            rng: &mut rng,
            stats: &mut stats,
        };
        ctl.reconcile(&mut ctx).unwrap();
    }

    fn nodes_of(store: &ClusterStore, uid: &str) -> Vec<String> {
        let mut nodes: Vec<String> = owned_pods(store, uid)
            .iter()
            .filter_map(|p| p.as_pod().and_then(|p| p.spec.node_name.clone()))
            .collect();
        nodes.sort();
        nodes
    }

    #[test]
    fn one_pod_per_eligible_node() {
        let store = ClusterStore::new();
        ready_node(&store, "node-a");
        ready_node(&store, "node-b");
        let tainted = ready_node(&store, "node-c");
        store.update(&tainted, |r| {
            r.as_node_mut().unwrap().spec.taints.push(Taint {
                key: "dedicated".to_string(),
                value: "gpu".to_string(),
                effect: TaintEffect::NoSchedule,
            });
        });
        let uid = make_ds(&store, "fluentd");
        let ctl = DaemonSetController::new(store.clone());

        tick(&ctl);
        tick(&ctl);
        assert_eq!(nodes_of(&store, &uid), vec!["node-a", "node-b"]);
        let ds = store.get(&uid).unwrap();
        let status = &ds.as_daemonset().unwrap().status;
        assert_eq!(status.desired_number_scheduled, 2);
        assert_eq!(status.current_number_scheduled, 2);
    }

    #[test]
    fn removes_pods_from_lost_or_unready_nodes() {
        let store = ClusterStore::new();
        let a = ready_node(&store, "node-a");
        let b = ready_node(&store, "node-b");
        let uid = make_ds(&store, "fluentd");
        let ctl = DaemonSetController::new(store.clone());
        tick(&ctl);
        assert_eq!(nodes_of(&store, &uid).len(), 2);

        store.remove(&a);
        store.update(&b, |r| r.as_node_mut().unwrap().status.ready = false);
        tick(&ctl);
        assert!(nodes_of(&store, &uid).is_empty());

        store.update(&b, |r| r.as_node_mut().unwrap().status.ready = true);
        tick(&ctl);
        assert_eq!(nodes_of(&store, &uid), vec!["node-b"]);
    }
}
