use pkg_types::node::Taint;
use pkg_types::pod::{PodSpec, Resources, TaintEffect};
use pkg_types::resource::Resource;
use std::collections::BTreeMap;
use tracing::debug;

/// Label every node implicitly carries with its own name.
pub const HOSTNAME_LABEL: &str = "kubernetes.io/hostname";

/// Scheduling-relevant view of a node. Built once per tick and updated as
/// pods are placed so later placements in the same tick see the allocation.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeView {
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub ready: bool,
    pub unschedulable: bool,
    pub taints: Vec<Taint>,
    pub capacity: Resources,
    /// Remaining after requests of pods already bound.
    pub allocatable: Resources,
    pub max_pods: u32,
    pub pod_count: u32,
}

impl NodeView {
    pub fn from_resource(res: &Resource) -> Option<Self> {
        let node = res.as_node()?;
        let mut labels = res.metadata.labels.clone();
        labels
            .entry(HOSTNAME_LABEL.to_string())
            .or_insert_with(|| res.metadata.name.clone());
        Some(Self {
            name: res.metadata.name.clone(),
            labels,
            ready: node.status.ready,
            unschedulable: node.spec.unschedulable,
            taints: node.spec.taints.clone(),
            capacity: node.spec.capacity,
            allocatable: node.spec.capacity.saturating_sub(node.status.allocated),
            max_pods: node.spec.max_pods,
            pod_count: node.status.pod_count,
        })
    }

    fn bind(&mut self, requests: Resources) {
        self.allocatable = self.allocatable.saturating_sub(requests);
        self.pod_count += 1;
    }
}

/// Why a node was filtered out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Rejection {
    NotReady,
    Unschedulable,
    NodeSelector,
    Affinity,
    Taint,
    TooManyPods,
    InsufficientCpu,
    InsufficientMemory,
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Rejection::NotReady => "node(s) not ready",
            Rejection::Unschedulable => "node(s) were unschedulable",
            Rejection::NodeSelector => "node(s) didn't match node selector",
            Rejection::Affinity => "node(s) didn't match required affinity",
            Rejection::Taint => "untolerated taint",
            Rejection::TooManyPods => "Too many pods",
            Rejection::InsufficientCpu => "Insufficient cpu",
            Rejection::InsufficientMemory => "Insufficient memory",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Placement {
    Bound { node: String, score: f64 },
    Unschedulable { message: String },
}

/// Filtering and scoring scheduler. Among feasible nodes the one with the
/// most headroom after placement (plus preferred-affinity weight) wins; ties
/// go to the lexicographically smallest node name.
#[derive(Debug, Default, Clone, Copy)]
pub struct Scheduler;

impl Scheduler {
    pub fn new() -> Self {
        Self
    }

    /// Pick a node for the pod and record the allocation on it.
    pub fn schedule(&self, pod_name: &str, spec: &PodSpec, nodes: &mut [NodeView]) -> Placement {
        let placement = self.select(spec, nodes);
        match &placement {
            Placement::Bound { node, score } => {
                if let Some(view) = nodes.iter_mut().find(|n| &n.name == node) {
                    view.bind(spec.total_requests());
                }
                debug!("Pod {} -> node {} (score {:.3})", pod_name, node, score);
            }
            Placement::Unschedulable { message } => {
                debug!("Pod {} unschedulable: {}", pod_name, message);
            }
        }
        placement
    }

    /// Place a pod that already names its node. The named node still has to
    /// pass every filter; the allocation is recorded on it when it does.
    pub fn schedule_on(
        &self,
        pod_name: &str,
        spec: &PodSpec,
        node_name: &str,
        nodes: &mut [NodeView],
    ) -> Placement {
        let Some(view) = nodes.iter_mut().find(|n| n.name == node_name) else {
            return Placement::Unschedulable {
                message: format!("0/1 nodes are available: node {} not found.", node_name),
            };
        };
        match self.is_node_eligible(view, spec) {
            Ok(()) => {
                let score = self.score(view, spec);
                view.bind(spec.total_requests());
                debug!("Pod {} -> pinned node {}", pod_name, node_name);
                Placement::Bound {
                    node: node_name.to_string(),
                    score,
                }
            }
            Err(reason) => {
                let message = unschedulable_message(1, &BTreeMap::from([(reason, 1)]));
                debug!("Pod {} cannot run on {}: {}", pod_name, node_name, message);
                Placement::Unschedulable { message }
            }
        }
    }

    /// Pick a node without mutating anything.
    pub fn select(&self, spec: &PodSpec, nodes: &[NodeView]) -> Placement {
        let mut order: Vec<&NodeView> = nodes.iter().collect();
        order.sort_by(|a, b| a.name.cmp(&b.name));

        let mut rejections: BTreeMap<Rejection, usize> = BTreeMap::new();
        let mut best: Option<(&NodeView, f64)> = None;
        for node in order {
            if let Err(reason) = self.is_node_eligible(node, spec) {
                *rejections.entry(reason).or_default() += 1;
                continue;
            }
            let score = self.score(node, spec);
            // Strictly greater keeps the earliest name on ties.
            if best.is_none_or(|(_, s)| score > s + f64::EPSILON) {
                best = Some((node, score));
            }
        }

        match best {
            Some((node, score)) => Placement::Bound {
                node: node.name.clone(),
                score,
            },
            None => Placement::Unschedulable {
                message: unschedulable_message(nodes.len(), &rejections),
            },
        }
    }

    /// Check if a node is eligible to run this pod.
    pub fn is_node_eligible(&self, node: &NodeView, spec: &PodSpec) -> Result<(), Rejection> {
        // 1. Node must be Ready
        if !node.ready {
            return Err(Rejection::NotReady);
        }

        // 2. Node must not be cordoned
        if node.unschedulable {
            return Err(Rejection::Unschedulable);
        }

        // 3. Node selector and required affinity (all labels must match)
        let label_match = |required: &BTreeMap<String, String>| {
            required.iter().all(|(k, v)| node.labels.get(k) == Some(v))
        };
        if !label_match(&spec.node_selector) {
            return Err(Rejection::NodeSelector);
        }
        if !label_match(&spec.affinity.required) {
            return Err(Rejection::Affinity);
        }

        // 4. Taints & tolerations
        if untolerated(node, spec).any(|t| t.effect != TaintEffect::PreferNoSchedule) {
            return Err(Rejection::Taint);
        }

        // 5. Resource availability
        if node.pod_count >= node.max_pods {
            return Err(Rejection::TooManyPods);
        }
        let requests = spec.total_requests();
        if requests.cpu_millis > node.allocatable.cpu_millis {
            return Err(Rejection::InsufficientCpu);
        }
        if requests.memory_bytes > node.allocatable.memory_bytes {
            return Err(Rejection::InsufficientMemory);
        }

        Ok(())
    }

    /// Mean fractional CPU/memory headroom after placement, plus preferred
    /// affinity weight, minus the PreferNoSchedule penalty.
    pub fn score(&self, node: &NodeView, spec: &PodSpec) -> f64 {
        let requests = spec.total_requests();
        let headroom = |alloc: u64, req: u64, cap: u64| {
            if cap == 0 {
                0.0
            } else {
                alloc.saturating_sub(req) as f64 / cap as f64
            }
        };
        let cpu = headroom(
            node.allocatable.cpu_millis,
            requests.cpu_millis,
            node.capacity.cpu_millis,
        );
        let mem = headroom(
            node.allocatable.memory_bytes,
            requests.memory_bytes,
            node.capacity.memory_bytes,
        );
        let preferred: f64 = spec
            .affinity
            .preferred
            .iter()
            .filter(|t| node.labels.get(&t.key) == Some(&t.value))
            .map(|t| t.weight as f64 / 100.0)
            .sum();
        let soft_taints = untolerated(node, spec)
            .filter(|t| t.effect == TaintEffect::PreferNoSchedule)
            .count();
        (cpu + mem) / 2.0 + preferred
            - soft_taints as f64 * pkg_constants::engine::PREFER_NO_SCHEDULE_PENALTY
    }
}

fn untolerated<'a>(node: &'a NodeView, spec: &'a PodSpec) -> impl Iterator<Item = &'a Taint> + 'a {
    node.taints
        .iter()
        .filter(move |taint| !spec.tolerations.iter().any(|t| t.tolerates(taint)))
}

/// "0/3 nodes are available: 2 Insufficient cpu, 1 untolerated taint."
fn unschedulable_message(total: usize, rejections: &BTreeMap<Rejection, usize>) -> String {
    if total == 0 {
        return "0/0 nodes are available: no nodes registered.".to_string();
    }
    let mut counts: Vec<(&Rejection, &usize)> = rejections.iter().collect();
    counts.sort_by(|a, b| b.1.cmp(a.1).then(a.0.cmp(b.0)));
    let reasons: Vec<String> = counts
        .into_iter()
        .map(|(reason, n)| format!("{} {}", n, reason))
        .collect();
    format!("0/{} nodes are available: {}.", total, reasons.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pkg_types::pod::{
        ContainerSpec, PreferredTerm, ResourceRequirements, Toleration, TolerationOperator,
    };

    fn make_node(name: &str, cpu: u64, mem: u64) -> NodeView {
        NodeView {
            name: name.to_string(),
            labels: BTreeMap::from([(HOSTNAME_LABEL.to_string(), name.to_string())]),
            ready: true,
            unschedulable: false,
            taints: vec![],
            capacity: Resources::new(cpu, mem),
            allocatable: Resources::new(cpu, mem),
            max_pods: 110,
            pod_count: 0,
        }
    }

    fn make_pod(cpu: u64, mem: u64) -> PodSpec {
        PodSpec {
            containers: vec![ContainerSpec {
                name: "app".to_string(),
                image: "nginx:latest".to_string(),
                resources: ResourceRequirements {
                    requests: Resources::new(cpu, mem),
                    limits: Resources::default(),
                },
                liveness_probe: None,
                readiness_probe: None,
            }],
            ..Default::default()
        }
    }

    const MI: u64 = 1 << 20;

    #[test]
    fn test_single_node_placement() {
        let scheduler = Scheduler::new();
        let mut nodes = vec![make_node("worker-1", 4000, 8192 * MI)];
        let placement = scheduler.schedule("web", &make_pod(100, 128 * MI), &mut nodes);
        assert!(matches!(placement, Placement::Bound { ref node, .. } if node == "worker-1"));
        assert_eq!(nodes[0].allocatable.cpu_millis, 3900);
        assert_eq!(nodes[0].pod_count, 1);
    }

    #[test]
    fn test_pinned_placement_runs_filters() {
        let scheduler = Scheduler::new();
        let mut down = make_node("worker-2", 4000, 8192 * MI);
        down.ready = false;
        let mut nodes = vec![make_node("worker-1", 500, 8192 * MI), down];

        let placement = scheduler.schedule_on("agent", &make_pod(2000, 128 * MI), "worker-1", &mut nodes);
        assert_eq!(
            placement,
            Placement::Unschedulable {
                message: "0/1 nodes are available: 1 Insufficient cpu.".to_string()
            }
        );
        let placement = scheduler.schedule_on("agent", &make_pod(100, 128 * MI), "worker-2", &mut nodes);
        assert!(matches!(placement, Placement::Unschedulable { .. }));
        assert_eq!(nodes[1].pod_count, 0);

        let placement = scheduler.schedule_on("agent", &make_pod(400, 128 * MI), "worker-1", &mut nodes);
        assert!(matches!(placement, Placement::Bound { ref node, .. } if node == "worker-1"));
        assert_eq!(nodes[0].allocatable.cpu_millis, 100);
        assert_eq!(nodes[0].pod_count, 1);
    }

    #[test]
    fn test_tie_breaks_on_name() {
        let scheduler = Scheduler::new();
        let nodes = vec![
            make_node("node-c", 2000, 4096 * MI),
            make_node("node-a", 2000, 4096 * MI),
            make_node("node-b", 2000, 4096 * MI),
        ];
        let placement = scheduler.select(&make_pod(100, 128 * MI), &nodes);
        assert!(matches!(placement, Placement::Bound { ref node, .. } if node == "node-a"));
    }

    #[test]
    fn test_prefers_headroom() {
        let scheduler = Scheduler::new();
        let mut busy = make_node("node-a", 4000, 8192 * MI);
        busy.allocatable = Resources::new(1000, 2048 * MI);
        let nodes = vec![busy, make_node("node-b", 4000, 8192 * MI)];
        let placement = scheduler.select(&make_pod(100, 128 * MI), &nodes);
        assert!(matches!(placement, Placement::Bound { ref node, .. } if node == "node-b"));
    }

    #[test]
    fn test_never_exceeds_capacity() {
        let scheduler = Scheduler::new();
        let mut nodes = vec![make_node("node-a", 1000, 1024 * MI)];
        let spec = make_pod(400, 128 * MI);
        let bound = (0..5)
            .filter(|i| {
                matches!(
                    scheduler.schedule(&format!("p{}", i), &spec, &mut nodes),
                    Placement::Bound { .. }
                )
            })
            .count();
        assert_eq!(bound, 2);
        match scheduler.select(&spec, &nodes) {
            Placement::Unschedulable { message } => {
                assert_eq!(message, "0/1 nodes are available: 1 Insufficient cpu.")
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_taints_and_tolerations() {
        let scheduler = Scheduler::new();
        let mut tainted = make_node("node-a", 4000, 8192 * MI);
        tainted.taints.push(Taint {
            key: "dedicated".to_string(),
            value: "gpu".to_string(),
            effect: TaintEffect::NoSchedule,
        });
        let mut spec = make_pod(100, 128 * MI);
        assert_eq!(
            scheduler.is_node_eligible(&tainted, &spec),
            Err(Rejection::Taint)
        );

        spec.tolerations.push(Toleration {
            key: "dedicated".to_string(),
            operator: TolerationOperator::Equal,
            value: "gpu".to_string(),
            effect: None,
        });
        assert_eq!(scheduler.is_node_eligible(&tainted, &spec), Ok(()));
    }

    #[test]
    fn test_prefer_no_schedule_is_a_penalty() {
        let scheduler = Scheduler::new();
        let mut soft = make_node("node-a", 4000, 8192 * MI);
        soft.taints.push(Taint {
            key: "spot".to_string(),
            value: String::new(),
            effect: TaintEffect::PreferNoSchedule,
        });
        let nodes = vec![soft, make_node("node-b", 4000, 8192 * MI)];
        let placement = scheduler.select(&make_pod(100, 128 * MI), &nodes);
        assert!(matches!(placement, Placement::Bound { ref node, .. } if node == "node-b"));
    }

    #[test]
    fn test_selector_and_affinity() {
        let scheduler = Scheduler::new();
        let mut ssd = make_node("node-b", 4000, 8192 * MI);
        ssd.labels.insert("disk".to_string(), "ssd".to_string());
        let nodes = vec![make_node("node-a", 4000, 8192 * MI), ssd];

        let mut spec = make_pod(100, 128 * MI);
        spec.node_selector
            .insert("disk".to_string(), "ssd".to_string());
        assert!(matches!(scheduler.select(&spec, &nodes), Placement::Bound { ref node, .. } if node == "node-b"));

        let mut spec = make_pod(100, 128 * MI);
        spec.affinity.preferred.push(PreferredTerm {
            weight: 50,
            key: "disk".to_string(),
            value: "ssd".to_string(),
        });
        assert!(matches!(scheduler.select(&spec, &nodes), Placement::Bound { ref node, .. } if node == "node-b"));
    }

    #[test]
    fn test_no_eligible_nodes() {
        let scheduler = Scheduler::new();
        let mut down = make_node("node-1", 4000, 8192 * MI);
        down.ready = false;
        let mut cordoned = make_node("node-2", 4000, 8192 * MI);
        cordoned.unschedulable = true;
        let mut small = make_node("node-3", 50, 8192 * MI);
        small.pod_count = 0;
        match scheduler.select(&make_pod(100, 128 * MI), &[down, cordoned, small]) {
            Placement::Unschedulable { message } => {
                assert!(message.starts_with("0/3 nodes are available: "));
                assert!(message.contains("1 Insufficient cpu"));
                assert!(message.contains("1 node(s) not ready"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
