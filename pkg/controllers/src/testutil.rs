//! Fixtures shared by the controller tests.

use pkg_types::meta::ObjectMeta;
use pkg_types::node::Node;
use pkg_types::pod::{ContainerSpec, Pod, PodSpec, PodTemplate, ResourceRequirements, Resources};
use pkg_types::resource::{Object, Resource};
use pkg_types::stats::TickStats;
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::collections::BTreeMap;

pub const MI: u64 = 1 << 20;

pub fn make_node(name: &str, cpu_millis: u64, memory_mi: u64) -> Resource {
    Resource::new(
        ObjectMeta::new(name, ""),
        Object::Node(Node::new(Resources::new(cpu_millis, memory_mi * MI))),
    )
}

pub fn make_spec(cpu_millis: u64, memory_mi: u64) -> PodSpec {
    PodSpec {
        containers: vec![ContainerSpec {
            name: "app".to_string(),
            image: "nginx:1.25".to_string(),
            resources: ResourceRequirements {
                requests: Resources::new(cpu_millis, memory_mi * MI),
                limits: Resources::default(),
            },
            liveness_probe: None,
            readiness_probe: None,
        }],
        ..Default::default()
    }
}

pub fn make_pod(name: &str, cpu_millis: u64, memory_mi: u64) -> Resource {
    Resource::new(
        ObjectMeta::new(name, "default"),
        Object::Pod(Pod::new(make_spec(cpu_millis, memory_mi))),
    )
}

pub fn make_template(app: &str) -> PodTemplate {
    PodTemplate {
        labels: BTreeMap::from([("app".to_string(), app.to_string())]),
        annotations: BTreeMap::new(),
        spec: make_spec(100, 128),
    }
}

pub fn ctx_parts() -> (StdRng, TickStats) {
    (StdRng::seed_from_u64(7), TickStats::default())
}
