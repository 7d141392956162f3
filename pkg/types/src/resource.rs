use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

use crate::daemonset::DaemonSet;
use crate::deployment::Deployment;
use crate::hpa::HorizontalPodAutoscaler;
use crate::job::{CronJob, Job};
use crate::meta::{Condition, ObjectMeta, ResourceEvent};
use crate::namespace::Namespace;
use crate::node::Node;
use crate::pod::{Pod, PodPhase};
use crate::quota::ResourceQuota;
use crate::replicaset::ReplicaSet;
use crate::service::Service;
use crate::statefulset::StatefulSet;

/// Every kind the simulator understands.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ResourceKind {
    Namespace,
    Node,
    Pod,
    Deployment,
    ReplicaSet,
    StatefulSet,
    DaemonSet,
    Job,
    CronJob,
    Service,
    HorizontalPodAutoscaler,
    ResourceQuota,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 12] = [
        ResourceKind::Namespace,
        ResourceKind::Node,
        ResourceKind::Pod,
        ResourceKind::Deployment,
        ResourceKind::ReplicaSet,
        ResourceKind::StatefulSet,
        ResourceKind::DaemonSet,
        ResourceKind::Job,
        ResourceKind::CronJob,
        ResourceKind::Service,
        ResourceKind::HorizontalPodAutoscaler,
        ResourceKind::ResourceQuota,
    ];

    pub fn is_namespaced(self) -> bool {
        !matches!(self, ResourceKind::Namespace | ResourceKind::Node)
    }

    pub fn api_version(self) -> &'static str {
        match self {
            ResourceKind::Namespace
            | ResourceKind::Node
            | ResourceKind::Pod
            | ResourceKind::Service
            | ResourceKind::ResourceQuota => "v1",
            ResourceKind::Deployment
            | ResourceKind::ReplicaSet
            | ResourceKind::StatefulSet
            | ResourceKind::DaemonSet => "apps/v1",
            ResourceKind::Job | ResourceKind::CronJob => "batch/v1",
            ResourceKind::HorizontalPodAutoscaler => "autoscaling/v2",
        }
    }

    /// Resolve a user-facing kind string, accepting plurals and short names.
    pub fn parse(s: &str) -> Result<ResourceKind> {
        let kind = match s.trim().to_ascii_lowercase().as_str() {
            "namespace" | "namespaces" | "ns" => ResourceKind::Namespace,
            "node" | "nodes" | "no" => ResourceKind::Node,
            "pod" | "pods" | "po" => ResourceKind::Pod,
            "deployment" | "deployments" | "deploy" => ResourceKind::Deployment,
            "replicaset" | "replicasets" | "rs" => ResourceKind::ReplicaSet,
            "statefulset" | "statefulsets" | "sts" => ResourceKind::StatefulSet,
            "daemonset" | "daemonsets" | "ds" => ResourceKind::DaemonSet,
            "job" | "jobs" => ResourceKind::Job,
            "cronjob" | "cronjobs" | "cj" => ResourceKind::CronJob,
            "service" | "services" | "svc" => ResourceKind::Service,
            "horizontalpodautoscaler" | "horizontalpodautoscalers" | "hpa" => {
                ResourceKind::HorizontalPodAutoscaler
            }
            "resourcequota" | "resourcequotas" | "quota" => ResourceKind::ResourceQuota,
            other => bail!("unknown resource kind '{}'", other),
        };
        Ok(kind)
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

/// Kind-specific spec and status, tagged by `kind`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind")]
pub enum Object {
    Namespace(Namespace),
    Node(Node),
    Pod(Pod),
    Deployment(Deployment),
    ReplicaSet(ReplicaSet),
    StatefulSet(StatefulSet),
    DaemonSet(DaemonSet),
    Job(Job),
    CronJob(CronJob),
    Service(Service),
    HorizontalPodAutoscaler(HorizontalPodAutoscaler),
    ResourceQuota(ResourceQuota),
}

macro_rules! spec_of {
    ($obj:expr, $($variant:ident),*) => {
        match $obj {
            Object::Namespace(_) => serde_json::Value::Null,
            $(Object::$variant(o) => serde_json::to_value(&o.spec).unwrap_or_default(),)*
        }
    };
}

impl Object {
    pub fn kind(&self) -> ResourceKind {
        match self {
            Object::Namespace(_) => ResourceKind::Namespace,
            Object::Node(_) => ResourceKind::Node,
            Object::Pod(_) => ResourceKind::Pod,
            Object::Deployment(_) => ResourceKind::Deployment,
            Object::ReplicaSet(_) => ResourceKind::ReplicaSet,
            Object::StatefulSet(_) => ResourceKind::StatefulSet,
            Object::DaemonSet(_) => ResourceKind::DaemonSet,
            Object::Job(_) => ResourceKind::Job,
            Object::CronJob(_) => ResourceKind::CronJob,
            Object::Service(_) => ResourceKind::Service,
            Object::HorizontalPodAutoscaler(_) => ResourceKind::HorizontalPodAutoscaler,
            Object::ResourceQuota(_) => ResourceKind::ResourceQuota,
        }
    }

    /// The spec as JSON, used for merge patches and change detection.
    pub fn spec_json(&self) -> serde_json::Value {
        spec_of!(
            self,
            Node,
            Pod,
            Deployment,
            ReplicaSet,
            StatefulSet,
            DaemonSet,
            Job,
            CronJob,
            Service,
            HorizontalPodAutoscaler,
            ResourceQuota
        )
    }

    /// Replace the spec from JSON, keeping the status. Fails if the JSON does
    /// not describe a valid spec for this kind.
    pub fn set_spec_json(&mut self, spec: serde_json::Value) -> Result<()> {
        match self {
            Object::Namespace(_) => {}
            Object::Node(o) => o.spec = serde_json::from_value(spec)?,
            Object::Pod(o) => o.spec = serde_json::from_value(spec)?,
            Object::Deployment(o) => o.spec = serde_json::from_value(spec)?,
            Object::ReplicaSet(o) => o.spec = serde_json::from_value(spec)?,
            Object::StatefulSet(o) => o.spec = serde_json::from_value(spec)?,
            Object::DaemonSet(o) => o.spec = serde_json::from_value(spec)?,
            Object::Job(o) => o.spec = serde_json::from_value(spec)?,
            Object::CronJob(o) => o.spec = serde_json::from_value(spec)?,
            Object::Service(o) => o.spec = serde_json::from_value(spec)?,
            Object::HorizontalPodAutoscaler(o) => o.spec = serde_json::from_value(spec)?,
            Object::ResourceQuota(o) => o.spec = serde_json::from_value(spec)?,
        }
        Ok(())
    }

    /// Build an object of `kind` from a spec document with an empty status.
    pub fn from_spec(kind: ResourceKind, spec: serde_json::Value) -> Result<Object> {
        let spec = if spec.is_null() {
            serde_json::Value::Object(Default::default())
        } else {
            spec
        };
        let doc = serde_json::json!({ "kind": kind, "spec": spec });
        Ok(serde_json::from_value(doc)?)
    }

    pub fn spec_eq(&self, other: &Object) -> bool {
        match (self, other) {
            (Object::Namespace(_), Object::Namespace(_)) => true,
            (Object::Node(a), Object::Node(b)) => a.spec == b.spec,
            (Object::Pod(a), Object::Pod(b)) => a.spec == b.spec,
            (Object::Deployment(a), Object::Deployment(b)) => a.spec == b.spec,
            (Object::ReplicaSet(a), Object::ReplicaSet(b)) => a.spec == b.spec,
            (Object::StatefulSet(a), Object::StatefulSet(b)) => a.spec == b.spec,
            (Object::DaemonSet(a), Object::DaemonSet(b)) => a.spec == b.spec,
            (Object::Job(a), Object::Job(b)) => a.spec == b.spec,
            (Object::CronJob(a), Object::CronJob(b)) => a.spec == b.spec,
            (Object::Service(a), Object::Service(b)) => a.spec == b.spec,
            (Object::HorizontalPodAutoscaler(a), Object::HorizontalPodAutoscaler(b)) => {
                a.spec == b.spec
            }
            (Object::ResourceQuota(a), Object::ResourceQuota(b)) => a.spec == b.spec,
            _ => false,
        }
    }

    /// Short phase string shown in listings.
    pub fn phase(&self) -> String {
        match self {
            Object::Namespace(_) => "Active".to_string(),
            Object::Node(n) => if n.status.ready { "Ready" } else { "NotReady" }.to_string(),
            Object::Pod(p) => p.status.phase.to_string(),
            Object::Deployment(d) => {
                if d.status.available_replicas >= d.spec.replicas {
                    "Available".to_string()
                } else {
                    "Progressing".to_string()
                }
            }
            Object::ReplicaSet(r) => ready_phase(r.status.ready_replicas, r.spec.replicas),
            Object::StatefulSet(s) => ready_phase(s.status.ready_replicas, s.spec.replicas),
            Object::DaemonSet(d) => {
                ready_phase(d.status.number_ready, d.status.desired_number_scheduled)
            }
            Object::Job(j) => j.status.condition.to_string(),
            Object::CronJob(c) => if c.spec.suspend { "Suspended" } else { "Active" }.to_string(),
            Object::Service(_) => "Active".to_string(),
            Object::HorizontalPodAutoscaler(_) => "Active".to_string(),
            Object::ResourceQuota(q) => {
                if q.status.violations.is_empty() {
                    "Ok".to_string()
                } else {
                    "Exceeded".to_string()
                }
            }
        }
    }

    pub fn conditions(&self) -> &[Condition] {
        match self {
            Object::Namespace(o) => &o.status.conditions,
            Object::Node(o) => &o.status.conditions,
            Object::Pod(o) => &o.status.conditions,
            Object::Deployment(o) => &o.status.conditions,
            Object::ReplicaSet(o) => &o.status.conditions,
            Object::StatefulSet(o) => &o.status.conditions,
            Object::DaemonSet(o) => &o.status.conditions,
            Object::Job(o) => &o.status.conditions,
            Object::CronJob(o) => &o.status.conditions,
            Object::Service(o) => &o.status.conditions,
            Object::HorizontalPodAutoscaler(o) => &o.status.conditions,
            Object::ResourceQuota(o) => &o.status.conditions,
        }
    }
}

fn ready_phase(ready: u32, desired: u32) -> String {
    if ready >= desired {
        "Ready".to_string()
    } else {
        "Progressing".to_string()
    }
}

/// The unit of simulated state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Resource {
    #[serde(default)]
    pub api_version: String,
    pub metadata: ObjectMeta,
    #[serde(flatten)]
    pub object: Object,
    /// Newest last; capped by the store.
    #[serde(default)]
    pub events: Vec<ResourceEvent>,
}

macro_rules! accessors {
    ($($variant:ident => $as_ref:ident, $as_mut:ident;)*) => {
        $(
            pub fn $as_ref(&self) -> Option<&$variant> {
                match &self.object {
                    Object::$variant(o) => Some(o),
                    _ => None,
                }
            }

            pub fn $as_mut(&mut self) -> Option<&mut $variant> {
                match &mut self.object {
                    Object::$variant(o) => Some(o),
                    _ => None,
                }
            }
        )*
    };
}

impl Resource {
    pub fn new(metadata: ObjectMeta, object: Object) -> Self {
        Self {
            api_version: object.kind().api_version().to_string(),
            metadata,
            object,
            events: Vec::new(),
        }
    }

    pub fn kind(&self) -> ResourceKind {
        self.object.kind()
    }

    pub fn uid(&self) -> &str {
        &self.metadata.uid
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn namespace(&self) -> &str {
        &self.metadata.namespace
    }

    pub fn phase(&self) -> String {
        self.object.phase()
    }

    /// `kind/namespace/name` (or `kind/name` when cluster-scoped).
    pub fn key(&self) -> String {
        if self.metadata.namespace.is_empty() {
            format!("{}/{}", self.kind(), self.metadata.name)
        } else {
            format!(
                "{}/{}/{}",
                self.kind(),
                self.metadata.namespace,
                self.metadata.name
            )
        }
    }

    /// An owner reference pointing at this resource as controller.
    pub fn controller_ref(&self) -> crate::meta::OwnerReference {
        crate::meta::OwnerReference {
            kind: self.kind(),
            name: self.metadata.name.clone(),
            uid: self.metadata.uid.clone(),
            controller: true,
        }
    }

    /// A pod that has not finished and is not being deleted.
    pub fn is_active_pod(&self) -> bool {
        self.as_pod().is_some_and(|p| !p.is_terminal()) && !self.metadata.is_terminating()
    }

    pub fn pod_phase(&self) -> Option<PodPhase> {
        self.as_pod().map(|p| p.status.phase)
    }

    accessors! {
        Node => as_node, as_node_mut;
        Pod => as_pod, as_pod_mut;
        Deployment => as_deployment, as_deployment_mut;
        ReplicaSet => as_replicaset, as_replicaset_mut;
        StatefulSet => as_statefulset, as_statefulset_mut;
        DaemonSet => as_daemonset, as_daemonset_mut;
        Job => as_job, as_job_mut;
        CronJob => as_cronjob, as_cronjob_mut;
        Service => as_service, as_service_mut;
        HorizontalPodAutoscaler => as_hpa, as_hpa_mut;
        ResourceQuota => as_quota, as_quota_mut;
    }
}
