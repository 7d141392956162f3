//! Starter cluster used when the config file carries no manifests.

use pkg_types::deployment::{Deployment, DeploymentSpec};
use pkg_types::meta::ObjectMeta;
use pkg_types::node::Node;
use pkg_types::pod::{ContainerSpec, PodSpec, PodTemplate, ResourceRequirements, Resources};
use pkg_types::resource::{Object, Resource};
use pkg_types::selector::LabelSelector;
use std::collections::BTreeMap;

const MI: u64 = 1 << 20;

fn node(name: &str) -> Resource {
    Resource::new(
        ObjectMeta::new(name, ""),
        Object::Node(Node::new(Resources::new(4000, 8192 * MI))),
    )
}

fn deployment(name: &str, image: &str, replicas: u32, cpu_millis: u64, memory_mi: u64) -> Resource {
    let labels = BTreeMap::from([("app".to_string(), name.to_string())]);
    let spec = PodSpec {
        containers: vec![ContainerSpec {
            name: name.to_string(),
            image: image.to_string(),
            resources: ResourceRequirements {
                requests: Resources::new(cpu_millis, memory_mi * MI),
                limits: Resources::new(cpu_millis * 2, memory_mi * 2 * MI),
            },
            liveness_probe: None,
            readiness_probe: None,
        }],
        ..Default::default()
    };
    Resource::new(
        ObjectMeta::new(name, "default").with_labels(labels.clone()),
        Object::Deployment(Deployment {
            spec: DeploymentSpec {
                replicas,
                selector: LabelSelector::from_labels(labels.clone()),
                template: PodTemplate {
                    labels,
                    annotations: BTreeMap::new(),
                    spec,
                },
                strategy: Default::default(),
                paused: false,
            },
            status: Default::default(),
        }),
    )
}

pub fn default_cluster() -> Vec<Resource> {
    vec![
        node("worker-1"),
        node("worker-2"),
        node("worker-3"),
        deployment("web", "nginx:1.25", 3, 250, 256),
        deployment("api", "ghcr.io/acme/api:2.4.1", 2, 500, 512),
    ]
}
