//! Helpers shared by the workload controllers for building and finding pods.

use anyhow::Result;
use pkg_state::ClusterStore;
use pkg_types::meta::ObjectMeta;
use pkg_types::pod::{Pod, PodTemplate};
use pkg_types::resource::{Object, Resource, ResourceKind};
use rand::Rng;
use rand::rngs::StdRng;
use std::collections::BTreeMap;

/// Alphabet used for generated name suffixes (no vowels, no ambiguous digits).
const SUFFIX_ALPHABET: &[u8] = b"bcdfghjklmnpqrstvwxz2456789";

pub fn random_suffix(rng: &mut StdRng, len: usize) -> String {
    (0..len)
        .map(|_| SUFFIX_ALPHABET[rng.random_range(0..SUFFIX_ALPHABET.len())] as char)
        .collect()
}

/// A pod stamped from `template`, controlled by `owner`.
pub fn pod_from_template(
    name: String,
    owner: &Resource,
    template: &PodTemplate,
    extra_labels: &BTreeMap<String, String>,
) -> Resource {
    let mut labels = template.labels.clone();
    labels.extend(extra_labels.iter().map(|(k, v)| (k.clone(), v.clone())));
    let mut meta = ObjectMeta::new(name, owner.namespace()).with_labels(labels);
    meta.annotations = template.annotations.clone();
    meta.owner_references.push(owner.controller_ref());
    Resource::new(meta, Object::Pod(Pod::new(template.spec.clone())))
}

/// Add a pod named `<prefix>-<random>`, retrying on the rare name clash.
pub fn create_pod(
    store: &ClusterStore,
    rng: &mut StdRng,
    prefix: &str,
    owner: &Resource,
    template: &PodTemplate,
    extra_labels: &BTreeMap<String, String>,
) -> Result<Resource> {
    let mut attempt = 0;
    loop {
        let name = format!("{}-{}", prefix, random_suffix(rng, 5));
        if store
            .get_by_name(ResourceKind::Pod, owner.namespace(), &name)
            .is_some()
            && attempt < 8
        {
            attempt += 1;
            continue;
        }
        let pod = pod_from_template(name, owner, template, extra_labels);
        let uid = store.add(pod)?;
        return store
            .get(&uid)
            .ok_or_else(|| anyhow::anyhow!("pod {} vanished after create", uid));
    }
}

/// Pods directly controlled by `owner_uid`, including finished and terminating ones.
pub fn owned_pods(store: &ClusterStore, owner_uid: &str) -> Vec<Resource> {
    store
        .children(owner_uid)
        .into_iter()
        .filter(|r| r.kind() == ResourceKind::Pod && r.metadata.is_controlled_by(owner_uid))
        .collect()
}

/// Children of `kind` controlled by `owner_uid`.
pub fn owned_of_kind(store: &ClusterStore, owner_uid: &str, kind: ResourceKind) -> Vec<Resource> {
    store
        .children(owner_uid)
        .into_iter()
        .filter(|r| r.kind() == kind && r.metadata.is_controlled_by(owner_uid))
        .collect()
}

/// Newest first, by creation time then name.
pub fn sort_newest_first(pods: &mut [Resource]) {
    pods.sort_by(|a, b| {
        b.metadata
            .creation_timestamp
            .cmp(&a.metadata.creation_timestamp)
            .then_with(|| b.name().cmp(a.name()))
    });
}

pub fn is_ready_pod(res: &Resource) -> bool {
    res.is_active_pod() && res.as_pod().is_some_and(|p| p.is_ready())
}
