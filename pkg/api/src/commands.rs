use pkg_constants::labels::{RESTARTED_AT, UNSCHEDULABLE_TAINT};
use pkg_constants::store::DEFAULT_NAMESPACE;
use pkg_controllers::eviction::evict_pod;
use pkg_controllers::hpa::{set_target_replicas, target_replicas};
use pkg_state::ClusterStore;
use pkg_state::store::RemoveOutcome;
use pkg_types::meta::ObjectMeta;
use pkg_types::node::Taint;
use pkg_types::pod::TaintEffect;
use pkg_types::resource::{Object, Resource, ResourceKind};
use pkg_types::time::sim_epoch;
use serde::Serialize;
use tracing::{info, warn};

/// Outcome of a user command. Failures are ordinary results, not errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandResult {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
}

impl CommandResult {
    fn ok(message: impl Into<String>, uid: Option<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            uid,
        }
    }

    fn fail(message: impl Into<String>) -> Self {
        let message = message.into();
        warn!("Command failed: {}", message);
        Self {
            success: false,
            message,
            uid: None,
        }
    }
}

/// Operator actions against the cluster store. Commands edit specs, labels
/// and annotations only; status belongs to the control loops.
#[derive(Clone)]
pub struct Commands {
    store: ClusterStore,
}

impl Commands {
    pub fn new(store: ClusterStore) -> Self {
        Self { store }
    }

    pub fn create(&self, kind: &str, name: &str, namespace: &str, spec: serde_json::Value) -> CommandResult {
        let kind = match ResourceKind::parse(kind) {
            Ok(k) => k,
            Err(e) => return CommandResult::fail(e.to_string()),
        };
        let namespace = scope(kind, namespace);
        let object = match Object::from_spec(kind, spec) {
            Ok(o) => o,
            Err(e) => return CommandResult::fail(format!("invalid {} spec: {}", kind, e)),
        };
        match self
            .store
            .add(Resource::new(ObjectMeta::new(name, namespace), object))
        {
            Ok(uid) => {
                info!("Created {} {}", kind, display_name(namespace, name));
                CommandResult::ok(format!("{} {} created", kind, name), Some(uid))
            }
            Err(e) => CommandResult::fail(e.to_string()),
        }
    }

    pub fn delete(&self, kind: &str, name: &str, namespace: &str) -> CommandResult {
        let res = match self.find(kind, name, namespace) {
            Ok(r) => r,
            Err(failed) => return failed,
        };
        let uid = res.uid().to_string();
        match self.store.remove(&uid) {
            RemoveOutcome::Removed(count) => {
                info!("Deleted {} ({} resources)", res.key(), count);
                CommandResult::ok(
                    format!("{} {} deleted ({} resources)", res.kind(), name, count),
                    Some(uid),
                )
            }
            RemoveOutcome::Terminating => CommandResult::ok(
                format!("{} {} terminating, waiting on finalizers", res.kind(), name),
                Some(uid),
            ),
            RemoveOutcome::NotFound => CommandResult::fail(format!("{} {} not found", res.kind(), name)),
        }
    }

    pub fn scale(&self, kind: &str, name: &str, namespace: &str, replicas: u32) -> CommandResult {
        let res = match self.find(kind, name, namespace) {
            Ok(r) => r,
            Err(failed) => return failed,
        };
        let Some(from) = target_replicas(&res) else {
            return CommandResult::fail(format!("{} cannot be scaled", res.kind()));
        };
        if from == replicas {
            return CommandResult::ok(
                format!("{} {} already at {} replicas", res.kind(), name, replicas),
                Some(res.uid().to_string()),
            );
        }
        self.store.update(res.uid(), |r| {
            set_target_replicas(r, replicas);
        });
        info!("Scaled {} from {} to {}", res.key(), from, replicas);
        CommandResult::ok(
            format!("{} {} scaled from {} to {}", res.kind(), name, from, replicas),
            Some(res.uid().to_string()),
        )
    }

    /// Create the resource, or merge `spec` into the existing one.
    pub fn apply(&self, kind: &str, name: &str, namespace: &str, spec: serde_json::Value) -> CommandResult {
        let Ok(parsed) = ResourceKind::parse(kind) else {
            return self.create(kind, name, namespace, spec);
        };
        let Some(existing) = self
            .store
            .get_by_name(parsed, scope(parsed, namespace), name)
        else {
            return self.create(kind, name, namespace, spec);
        };
        match self.store.merge_spec(existing.uid(), &spec) {
            Ok(Some(updated)) => {
                let changed = updated.metadata.generation != existing.metadata.generation;
                info!("Applied {} (changed={})", updated.key(), changed);
                CommandResult::ok(
                    format!(
                        "{} {} {}",
                        parsed,
                        name,
                        if changed { "configured" } else { "unchanged" }
                    ),
                    Some(updated.uid().to_string()),
                )
            }
            Ok(None) => CommandResult::fail(format!("{} {} not found", parsed, name)),
            Err(e) => CommandResult::fail(format!("invalid {} spec: {}", parsed, e)),
        }
    }

    /// Mark a node unschedulable.
    pub fn cordon(&self, node: &str) -> CommandResult {
        self.update_node(node, "cordoned", |spec_taints, unschedulable| {
            *unschedulable = true;
            if !spec_taints.iter().any(|t| t.key == UNSCHEDULABLE_TAINT) {
                spec_taints.push(Taint {
                    key: UNSCHEDULABLE_TAINT.to_string(),
                    value: "true".to_string(),
                    effect: TaintEffect::NoSchedule,
                });
            }
        })
    }

    pub fn uncordon(&self, node: &str) -> CommandResult {
        self.update_node(node, "uncordoned", |spec_taints, unschedulable| {
            *unschedulable = false;
            spec_taints.retain(|t| t.key != UNSCHEDULABLE_TAINT);
        })
    }

    /// Cordon the node, then evict every pod still running on it.
    pub fn drain(&self, node: &str) -> CommandResult {
        let cordoned = self.cordon(node);
        if !cordoned.success {
            return cordoned;
        }
        let now = self.store.now();
        let mut evicted = 0u32;
        for pod in self.store.list_kind(ResourceKind::Pod) {
            let on_node = pod
                .as_pod()
                .is_some_and(|p| p.spec.node_name.as_deref() == Some(node));
            if on_node && pod.is_active_pod() {
                info!("Evicting pod {} from node {}", pod.key(), node);
                evict_pod(&self.store, &pod, "NodeDrain", now);
                evicted += 1;
            }
        }
        info!("Drain complete for node {}: {} pods evicted", node, evicted);
        CommandResult::ok(
            format!("node {} drained, {} pods evicted", node, evicted),
            cordoned.uid,
        )
    }

    /// Stamp a restart annotation into the pod template, rolling every pod.
    pub fn rollout_restart(&self, kind: &str, name: &str, namespace: &str) -> CommandResult {
        let res = match self.find(kind, name, namespace) {
            Ok(r) => r,
            Err(failed) => return failed,
        };
        if res.kind() != ResourceKind::Deployment {
            return CommandResult::fail(format!("rollout restart is not supported for {}", res.kind()));
        }
        let stamp = self.store.now().to_datetime(sim_epoch()).to_rfc3339();
        self.store.update(res.uid(), |r| {
            if let Some(d) = r.as_deployment_mut() {
                d.spec
                    .template
                    .annotations
                    .insert(RESTARTED_AT.to_string(), stamp.clone());
            }
        });
        info!("Rollout restart of {} at {}", res.key(), stamp);
        CommandResult::ok(
            format!("deployment {} restarted", name),
            Some(res.uid().to_string()),
        )
    }

    /// Progress of a rollout. `success` is true only once it has finished.
    pub fn rollout_status(&self, kind: &str, name: &str, namespace: &str) -> CommandResult {
        let res = match self.find(kind, name, namespace) {
            Ok(r) => r,
            Err(failed) => return failed,
        };
        let uid = Some(res.uid().to_string());
        let pending = |message: String| CommandResult {
            success: false,
            message,
            uid: uid.clone(),
        };
        match &res.object {
            Object::Deployment(d) => {
                let (spec, status) = (&d.spec, &d.status);
                if status.observed_generation < res.metadata.generation {
                    pending("Waiting for deployment spec update to be observed".to_string())
                } else if status.updated_replicas < spec.replicas {
                    pending(format!(
                        "Waiting for deployment \"{}\" rollout to finish: {} of {} new replicas have been updated",
                        name, status.updated_replicas, spec.replicas
                    ))
                } else if status.replicas > status.updated_replicas {
                    pending(format!(
                        "Waiting for deployment \"{}\" rollout to finish: {} old replicas are pending termination",
                        name,
                        status.replicas - status.updated_replicas
                    ))
                } else if status.available_replicas < status.updated_replicas {
                    pending(format!(
                        "Waiting for deployment \"{}\" rollout to finish: {} of {} updated replicas are available",
                        name, status.available_replicas, status.updated_replicas
                    ))
                } else {
                    CommandResult::ok(format!("deployment \"{}\" successfully rolled out", name), uid.clone())
                }
            }
            Object::StatefulSet(s) => {
                if s.status.ready_replicas < s.spec.replicas {
                    pending(format!(
                        "Waiting for {} pods to be ready ({} of {})",
                        s.spec.replicas - s.status.ready_replicas,
                        s.status.ready_replicas,
                        s.spec.replicas
                    ))
                } else {
                    CommandResult::ok(
                        format!("statefulset \"{}\" rolled out: {} pods ready", name, s.status.ready_replicas),
                        uid.clone(),
                    )
                }
            }
            Object::DaemonSet(ds) => {
                let status = &ds.status;
                if status.number_ready < status.desired_number_scheduled {
                    pending(format!(
                        "Waiting for daemon set \"{}\" rollout to finish: {} of {} pods are available",
                        name, status.number_ready, status.desired_number_scheduled
                    ))
                } else {
                    CommandResult::ok(format!("daemon set \"{}\" successfully rolled out", name), uid.clone())
                }
            }
            _ => CommandResult::fail(format!("rollout status is not supported for {}", res.kind())),
        }
    }

    fn find(&self, kind: &str, name: &str, namespace: &str) -> Result<Resource, CommandResult> {
        let kind = ResourceKind::parse(kind).map_err(|e| CommandResult::fail(e.to_string()))?;
        let namespace = scope(kind, namespace);
        self.store
            .get_by_name(kind, namespace, name)
            .ok_or_else(|| {
                CommandResult::fail(format!("{} {} not found", kind, display_name(namespace, name)))
            })
    }

    fn update_node<F>(&self, node: &str, verb: &str, mutate: F) -> CommandResult
    where
        F: FnOnce(&mut Vec<Taint>, &mut bool),
    {
        let Some(res) = self.store.get_by_name(ResourceKind::Node, "", node) else {
            return CommandResult::fail(format!("Node not found: {}", node));
        };
        self.store.update(res.uid(), |r| {
            if let Some(n) = r.as_node_mut() {
                mutate(&mut n.spec.taints, &mut n.spec.unschedulable);
            }
        });
        info!("Node {} {}", node, verb);
        CommandResult::ok(format!("node {} {}", node, verb), Some(res.uid().to_string()))
    }
}

/// Cluster-scoped kinds live outside namespaces; an empty namespace means `default`.
fn scope(kind: ResourceKind, namespace: &str) -> &str {
    if !kind.is_namespaced() {
        ""
    } else if namespace.is_empty() {
        DEFAULT_NAMESPACE
    } else {
        namespace
    }
}

fn display_name(namespace: &str, name: &str) -> String {
    if namespace.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", namespace, name)
    }
}
