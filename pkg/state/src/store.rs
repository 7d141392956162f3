use anyhow::{Result, bail};
use chrono::{DateTime, Utc};
use pkg_types::meta::{EventSeverity, ResourceEvent};
use pkg_types::quota::{QuotaLimits, QuotaUsage};
use pkg_types::resource::{Resource, ResourceKind};
use pkg_types::selector::LabelSelector;
use pkg_types::stats::ClusterSummary;
use pkg_types::time::{SimTime, sim_epoch};
use pkg_types::validate::validate_resource;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, warn};

use crate::watch::{ChangeType, ClusterEvent, EventBus};

type NameKey = (ResourceKind, String, String);

/// Result of `ClusterStore::remove`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOutcome {
    /// Hard-deleted, with the number of resources removed (including descendants).
    Removed(usize),
    /// Finalizers are pending; the resource is marked for deletion.
    Terminating,
    NotFound,
}

/// Advisory quota verdict for a namespace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaCheck {
    pub allowed: bool,
    pub violations: Vec<String>,
    pub used: QuotaUsage,
    /// Merged hard limits of every quota in the namespace (tightest wins).
    pub hard: Option<QuotaLimits>,
}

/// Point-in-time copy of the store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Snapshot {
    pub timestamp: DateTime<Utc>,
    pub resource_count: usize,
    pub resources: BTreeMap<String, serde_json::Value>,
}

// --- Queries ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldOp {
    Eq,
    NotEq,
}

/// `path=value` or `path!=value` over the JSON form of a resource
/// (for example `spec.node_name=worker-1` or `metadata.namespace!=kube-system`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSelector {
    pub path: String,
    pub op: FieldOp,
    pub value: String,
}

impl FieldSelector {
    pub fn parse(text: &str) -> Result<Self> {
        let (path, op, value) = if let Some((p, v)) = text.split_once("!=") {
            (p, FieldOp::NotEq, v)
        } else if let Some((p, v)) = text.split_once("==").or_else(|| text.split_once('=')) {
            (p, FieldOp::Eq, v)
        } else {
            bail!("invalid field selector '{}'", text);
        };
        let path = path.trim();
        if path.is_empty() {
            bail!("invalid field selector '{}': empty path", text);
        }
        Ok(Self {
            path: path.to_string(),
            op,
            value: value.trim().to_string(),
        })
    }

    fn matches(&self, json: &serde_json::Value) -> bool {
        let found = self
            .path
            .split('.')
            .try_fold(json, |v, part| v.get(part))
            .map(|v| match v {
                serde_json::Value::String(s) => s.clone(),
                serde_json::Value::Null => String::new(),
                other => other.to_string(),
            })
            .unwrap_or_default();
        match self.op {
            FieldOp::Eq => found == self.value,
            FieldOp::NotEq => found != self.value,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortKey {
    #[default]
    Name,
    CreationTime,
    Kind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, Default)]
pub struct Query {
    pub kind: Option<ResourceKind>,
    pub namespace: Option<String>,
    pub selector: Option<LabelSelector>,
    pub fields: Vec<FieldSelector>,
    pub phase: Option<String>,
    pub name_contains: Option<String>,
    pub sort: SortKey,
    pub order: SortOrder,
    pub limit: Option<usize>,
}

impl Query {
    pub fn kind(kind: ResourceKind) -> Self {
        Self {
            kind: Some(kind),
            ..Default::default()
        }
    }

    pub fn in_namespace(mut self, namespace: &str) -> Self {
        self.namespace = Some(namespace.to_string());
        self
    }

    pub fn with_selector(mut self, selector: LabelSelector) -> Self {
        self.selector = Some(selector);
        self
    }

    pub fn with_field(mut self, field: FieldSelector) -> Self {
        self.fields.push(field);
        self
    }

    pub fn with_phase(mut self, phase: &str) -> Self {
        self.phase = Some(phase.to_string());
        self
    }

    pub fn name_contains(mut self, needle: &str) -> Self {
        self.name_contains = Some(needle.to_string());
        self
    }

    pub fn sorted(mut self, sort: SortKey, order: SortOrder) -> Self {
        self.sort = sort;
        self.order = order;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    fn matches(&self, res: &Resource) -> bool {
        if self.kind.is_some_and(|k| k != res.kind()) {
            return false;
        }
        if let Some(ns) = &self.namespace
            && res.namespace() != ns
        {
            return false;
        }
        if let Some(sel) = &self.selector
            && !sel.matches(&res.metadata.labels)
        {
            return false;
        }
        if let Some(phase) = &self.phase
            && !res.phase().eq_ignore_ascii_case(phase)
        {
            return false;
        }
        if let Some(needle) = &self.name_contains
            && !res.name().contains(needle.as_str())
        {
            return false;
        }
        if !self.fields.is_empty() {
            let json = serde_json::to_value(res).unwrap_or_default();
            if !self.fields.iter().all(|f| f.matches(&json)) {
                return false;
            }
        }
        true
    }
}

// --- Store ---

#[derive(Default)]
struct Inner {
    resources: HashMap<String, Resource>,
    by_kind: HashMap<ResourceKind, BTreeSet<String>>,
    by_namespace: HashMap<String, BTreeSet<String>>,
    by_name: BTreeMap<NameKey, String>,
    by_label: HashMap<(String, String), BTreeSet<String>>,
    /// owner uid -> dependent uids
    children: HashMap<String, BTreeSet<String>>,
    /// dependent uid -> owner uids
    parents: HashMap<String, BTreeSet<String>>,
    version: u64,
    now: SimTime,
}

impl Inner {
    fn name_key(res: &Resource) -> NameKey {
        (
            res.kind(),
            res.metadata.namespace.clone(),
            res.metadata.name.clone(),
        )
    }

    fn index(&mut self, res: &Resource) {
        let uid = res.metadata.uid.clone();
        self.by_kind
            .entry(res.kind())
            .or_default()
            .insert(uid.clone());
        if !res.metadata.namespace.is_empty() {
            self.by_namespace
                .entry(res.metadata.namespace.clone())
                .or_default()
                .insert(uid.clone());
        }
        self.by_name.insert(Self::name_key(res), uid.clone());
        for (k, v) in &res.metadata.labels {
            self.by_label
                .entry((k.clone(), v.clone()))
                .or_default()
                .insert(uid.clone());
        }
    }

    fn unindex(&mut self, res: &Resource) {
        let uid = &res.metadata.uid;
        remove_from(&mut self.by_kind, &res.kind(), uid);
        if !res.metadata.namespace.is_empty() {
            remove_from(&mut self.by_namespace, &res.metadata.namespace, uid);
        }
        let key = Self::name_key(res);
        if self.by_name.get(&key) == Some(uid) {
            self.by_name.remove(&key);
        }
        for (k, v) in &res.metadata.labels {
            remove_from(&mut self.by_label, &(k.clone(), v.clone()), uid);
        }
    }

    /// Re-derive owner edges of `uid` from its owner references. Owners that
    /// are not present yet are skipped until `adopt` runs for them.
    fn relink(&mut self, uid: &str) {
        self.unlink_parents(uid);
        let owners: Vec<String> = match self.resources.get(uid) {
            Some(res) => res
                .metadata
                .owner_references
                .iter()
                .map(|o| o.uid.clone())
                .filter(|o| o != uid && self.resources.contains_key(o))
                .collect(),
            None => return,
        };
        for owner in owners {
            self.children
                .entry(owner.clone())
                .or_default()
                .insert(uid.to_string());
            self.parents
                .entry(uid.to_string())
                .or_default()
                .insert(owner);
        }
    }

    /// Link resources that named `owner` before it existed.
    fn adopt(&mut self, owner: &str) {
        let orphans: Vec<String> = self
            .resources
            .iter()
            .filter(|(uid, res)| {
                uid.as_str() != owner
                    && res.metadata.owner_references.iter().any(|o| o.uid == owner)
            })
            .map(|(uid, _)| uid.clone())
            .collect();
        for uid in orphans {
            self.children
                .entry(owner.to_string())
                .or_default()
                .insert(uid.clone());
            self.parents
                .entry(uid)
                .or_default()
                .insert(owner.to_string());
        }
    }

    fn unlink_parents(&mut self, uid: &str) {
        if let Some(owners) = self.parents.remove(uid) {
            for owner in owners {
                remove_from(&mut self.children, &owner, &uid.to_string());
            }
        }
    }

    fn unlink_all(&mut self, uid: &str) {
        self.unlink_parents(uid);
        if let Some(kids) = self.children.remove(uid) {
            for kid in kids {
                remove_from(&mut self.parents, &kid, &uid.to_string());
            }
        }
    }

    fn next_version(&mut self) -> u64 {
        self.version += 1;
        self.version
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.now.to_datetime(sim_epoch())
    }

    fn sorted(&self, uids: impl IntoIterator<Item = String>) -> Vec<Resource> {
        let mut out: Vec<Resource> = uids
            .into_iter()
            .filter_map(|u| self.resources.get(&u).cloned())
            .collect();
        out.sort_by(|a, b| {
            (a.kind(), a.namespace(), a.name()).cmp(&(b.kind(), b.namespace(), b.name()))
        });
        out
    }

    fn subtree_has_finalizers(&self, uid: &str) -> bool {
        let mut stack = vec![uid.to_string()];
        let mut seen = HashSet::new();
        while let Some(u) = stack.pop() {
            if !seen.insert(u.clone()) {
                continue;
            }
            if self
                .resources
                .get(&u)
                .is_some_and(|r| !r.metadata.finalizers.is_empty())
            {
                return true;
            }
            if let Some(kids) = self.children.get(&u) {
                stack.extend(kids.iter().cloned());
            }
        }
        false
    }
}

fn remove_from<K: std::hash::Hash + Eq>(
    map: &mut HashMap<K, BTreeSet<String>>,
    key: &K,
    uid: &String,
) {
    if let Some(set) = map.get_mut(key) {
        set.remove(uid);
        if set.is_empty() {
            map.remove(key);
        }
    }
}

fn push_event(res: &mut Resource, time: DateTime<Utc>, severity: EventSeverity, reason: &str, message: &str) {
    res.events.push(ResourceEvent {
        time,
        severity,
        reason: reason.to_string(),
        message: message.to_string(),
    });
    let cap = pkg_constants::store::RESOURCE_EVENT_CAPACITY;
    if res.events.len() > cap {
        let excess = res.events.len() - cap;
        res.events.drain(..excess);
    }
}

fn change_event(change: ChangeType, res: &Resource) -> ClusterEvent {
    ClusterEvent::Resource {
        change,
        kind: res.kind(),
        uid: res.metadata.uid.clone(),
        name: res.metadata.name.clone(),
        namespace: res.metadata.namespace.clone(),
    }
}

/// RFC 7386 JSON merge patch.
fn merge_patch(target: &mut serde_json::Value, patch: &serde_json::Value) {
    match patch {
        serde_json::Value::Object(patch_map) => {
            if !target.is_object() {
                *target = serde_json::Value::Object(Default::default());
            }
            if let serde_json::Value::Object(target_map) = target {
                for (k, v) in patch_map {
                    if v.is_null() {
                        target_map.remove(k);
                    } else {
                        merge_patch(
                            target_map.entry(k.clone()).or_insert(serde_json::Value::Null),
                            v,
                        );
                    }
                }
            }
        }
        other => *target = other.clone(),
    }
}

/// In-memory resource graph with secondary indices and owner edges.
/// Cheap to clone; every clone shares the same state and bus.
///
/// Mutation closures passed to `update` run under the store lock and must
/// not call back into the store.
#[derive(Clone)]
pub struct ClusterStore {
    inner: Arc<RwLock<Inner>>,
    bus: EventBus,
}

impl Default for ClusterStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ClusterStore {
    pub fn new() -> Self {
        Self::with_bus(EventBus::default())
    }

    pub fn with_bus(bus: EventBus) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner::default())),
            bus,
        }
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    // --- Time and batching ---

    pub fn set_time(&self, now: SimTime) {
        self.write().now = now;
    }

    pub fn now(&self) -> SimTime {
        self.read().now
    }

    pub fn begin_batch(&self) {
        self.bus.begin_batch();
    }

    pub fn end_batch(&self) {
        self.bus.end_batch();
    }

    // --- Mutation ---

    /// Insert a resource. An empty uid gets a fresh one; an existing uid is
    /// replaced. Invalid resources and name collisions are errors.
    pub fn add(&self, res: Resource) -> Result<String> {
        validate_resource(&res)?;
        let uid = res.metadata.uid.clone();
        let mut inner = self.write();
        let (uid, event) = if !uid.is_empty() && inner.resources.contains_key(&uid) {
            match self.replace_locked(&mut inner, res) {
                Some((_, event)) => (uid, event),
                None => return Ok(uid),
            }
        } else {
            let (res, event) = self.insert_locked(&mut inner, res)?;
            (res.metadata.uid, event)
        };
        drop(inner);

        self.bus.emit(event);
        Ok(uid)
    }

    fn insert_locked(&self, inner: &mut Inner, mut res: Resource) -> Result<(Resource, ClusterEvent)> {
        if let Some(existing) = inner.by_name.get(&Inner::name_key(&res)) {
            bail!("{} already exists (uid {})", res.key(), existing);
        }
        if res.metadata.uid.is_empty() {
            res.metadata.uid = uuid::Uuid::new_v4().to_string();
        }
        if res.api_version.is_empty() {
            res.api_version = res.kind().api_version().to_string();
        }
        if res.metadata.creation_timestamp.is_none() {
            res.metadata.creation_timestamp = Some(inner.timestamp());
        }
        res.metadata.generation = res.metadata.generation.max(1);
        res.metadata.resource_version = inner.next_version();

        let uid = res.metadata.uid.clone();
        inner.index(&res);
        let event = change_event(ChangeType::Added, &res);
        debug!("Added {}", res.key());
        inner.resources.insert(uid.clone(), res.clone());
        inner.relink(&uid);
        inner.adopt(&uid);
        Ok((res, event))
    }

    fn replace_locked(&self, inner: &mut Inner, res: Resource) -> Option<(Resource, ClusterEvent)> {
        let before = inner.resources.get(&res.metadata.uid)?.clone();
        let mut after = res;
        if after.events.is_empty() {
            after.events = before.events.clone();
        }
        self.commit(inner, before, after)
    }

    /// Mutate a resource in place. uid and kind are preserved; indices and
    /// owner edges follow the new metadata.
    pub fn update<F>(&self, uid: &str, f: F) -> Option<Resource>
    where
        F: FnOnce(&mut Resource),
    {
        let mut inner = self.write();
        let before = inner.resources.get(uid)?.clone();
        let mut after = before.clone();
        f(&mut after);
        let result = self.commit(&mut inner, before, after);
        drop(inner);
        if let Some((_, event)) = &result {
            self.bus.emit(event.clone());
        }
        result.map(|(res, _)| res)
    }

    fn commit(
        &self,
        inner: &mut Inner,
        before: Resource,
        mut after: Resource,
    ) -> Option<(Resource, ClusterEvent)> {
        after.metadata.uid = before.metadata.uid.clone();
        if after.kind() != before.kind() {
            warn!("Refusing kind change on {}", before.key());
            after.object = before.object.clone();
        }
        let renamed = Inner::name_key(&after) != Inner::name_key(&before);
        if renamed
            && (validate_resource(&after).is_err()
                || inner.by_name.contains_key(&Inner::name_key(&after)))
        {
            warn!("Refusing rename of {} to {}", before.key(), after.key());
            after.metadata.name = before.metadata.name.clone();
            after.metadata.namespace = before.metadata.namespace.clone();
        }
        after.metadata.creation_timestamp = before.metadata.creation_timestamp;

        if !after.object.spec_eq(&before.object) {
            after.metadata.generation = before.metadata.generation + 1;
        }
        after.metadata.resource_version = inner.next_version();

        let old_phase = before.phase();
        let new_phase = after.phase();
        if old_phase != new_phase {
            let time = inner.timestamp();
            push_event(
                &mut after,
                time,
                EventSeverity::Normal,
                "PhaseChanged",
                &format!("{} -> {}", old_phase, new_phase),
            );
        }

        let uid = after.metadata.uid.clone();
        if renamed || after.metadata.labels != before.metadata.labels {
            inner.unindex(&before);
            inner.index(&after);
        }
        let owners_changed = after.metadata.owner_references != before.metadata.owner_references;
        let event = change_event(ChangeType::Modified, &after);
        inner.resources.insert(uid.clone(), after.clone());
        if owners_changed {
            inner.relink(&uid);
        }
        Some((after, event))
    }

    /// Full update of an existing resource, or insert when the uid is unknown.
    pub fn replace(&self, res: Resource) -> Result<Option<Resource>> {
        validate_resource(&res)?;
        let mut inner = self.write();
        let result = if inner.resources.contains_key(&res.metadata.uid) {
            self.replace_locked(&mut inner, res)
        } else {
            Some(self.insert_locked(&mut inner, res)?)
        };
        drop(inner);

        Ok(result.map(|(res, event)| {
            self.bus.emit(event);
            res
        }))
    }

    /// Apply a JSON merge patch to the typed spec. A patch that does not
    /// yield a valid spec is rejected and nothing changes.
    pub fn merge_spec(&self, uid: &str, patch: &serde_json::Value) -> Result<Option<Resource>> {
        let Some(current) = self.get(uid) else {
            return Ok(None);
        };
        let mut spec = current.object.spec_json();
        merge_patch(&mut spec, patch);
        let mut object = current.object.clone();
        object
            .set_spec_json(spec)
            .map_err(|e| anyhow::anyhow!("invalid spec patch for {}: {}", current.key(), e))?;
        Ok(self.update(uid, move |r| r.object = object))
    }

    /// Append to the resource's own event log. Does not notify.
    pub fn record_event(&self, uid: &str, severity: EventSeverity, reason: &str, message: &str) {
        let mut inner = self.write();
        let time = inner.timestamp();
        if let Some(res) = inner.resources.get_mut(uid) {
            push_event(res, time, severity, reason, message);
        }
    }

    /// Delete a resource and, depth-first, everything it owns. Anything in
    /// the subtree holding finalizers is only marked for deletion.
    pub fn remove(&self, uid: &str) -> RemoveOutcome {
        let mut events = Vec::new();
        let outcome = {
            let mut inner = self.write();
            if !inner.resources.contains_key(uid) {
                return RemoveOutcome::NotFound;
            }
            let mut visited = HashSet::new();
            let (removed, pending) = Self::remove_rec(&mut inner, uid, &mut visited, &mut events);
            if pending {
                RemoveOutcome::Terminating
            } else {
                RemoveOutcome::Removed(removed)
            }
        };
        for event in events {
            self.bus.emit(event);
        }
        outcome
    }

    /// Returns (hard-removed count, whether `uid` itself is still pending).
    fn remove_rec(
        inner: &mut Inner,
        uid: &str,
        visited: &mut HashSet<String>,
        events: &mut Vec<ClusterEvent>,
    ) -> (usize, bool) {
        if !visited.insert(uid.to_string()) {
            return (0, false);
        }
        let kids: Vec<String> = inner
            .children
            .get(uid)
            .map(|k| k.iter().cloned().collect())
            .unwrap_or_default();
        let mut removed = 0;
        let mut child_pending = false;
        for kid in kids {
            let (n, pending) = Self::remove_rec(inner, &kid, visited, events);
            removed += n;
            child_pending |= pending;
        }

        let Some(res) = inner.resources.get(uid) else {
            return (removed, false);
        };
        if child_pending || !res.metadata.finalizers.is_empty() {
            if !res.metadata.is_terminating() {
                let time = inner.timestamp();
                let version = inner.next_version();
                if let Some(res) = inner.resources.get_mut(uid) {
                    res.metadata.deletion_timestamp = Some(time);
                    res.metadata.resource_version = version;
                    events.push(change_event(ChangeType::Modified, res));
                }
            }
            return (removed, true);
        }

        if let Some(res) = inner.resources.remove(uid) {
            inner.unindex(&res);
            inner.unlink_all(uid);
            debug!("Removed {}", res.key());
            events.push(change_event(ChangeType::Deleted, &res));
            removed += 1;
        }
        (removed, false)
    }

    /// Drop one finalizer. When the last one clears on a terminating
    /// resource the pending removal completes, and terminating owners that
    /// were only waiting on it follow.
    pub fn remove_finalizer(&self, uid: &str, finalizer: &str) -> bool {
        let (terminating, owners) = {
            let mut inner = self.write();
            let version = inner.next_version();
            let Some(res) = inner.resources.get_mut(uid) else {
                return false;
            };
            let before = res.metadata.finalizers.len();
            res.metadata.finalizers.retain(|f| f != finalizer);
            if res.metadata.finalizers.len() == before {
                return false;
            }
            res.metadata.resource_version = version;
            let ready = res.metadata.finalizers.is_empty() && res.metadata.is_terminating();
            let event = change_event(ChangeType::Modified, res);
            let owners: Vec<String> = inner
                .parents
                .get(uid)
                .map(|p| p.iter().cloned().collect())
                .unwrap_or_default();
            drop(inner);
            self.bus.emit(event);
            (ready, owners)
        };
        if terminating && self.remove(uid) != RemoveOutcome::Terminating {
            for owner in owners {
                let waiting = {
                    let inner = self.read();
                    inner.resources.get(&owner).is_some_and(|o| {
                        o.metadata.is_terminating()
                            && o.metadata.finalizers.is_empty()
                            && !inner.subtree_has_finalizers(&owner)
                    })
                };
                if waiting {
                    self.remove(&owner);
                }
            }
        }
        true
    }

    // --- Lookups ---

    pub fn get(&self, uid: &str) -> Option<Resource> {
        self.read().resources.get(uid).cloned()
    }

    pub fn contains(&self, uid: &str) -> bool {
        self.read().resources.contains_key(uid)
    }

    pub fn get_by_name(&self, kind: ResourceKind, namespace: &str, name: &str) -> Option<Resource> {
        let inner = self.read();
        let uid = inner
            .by_name
            .get(&(kind, namespace.to_string(), name.to_string()))?;
        inner.resources.get(uid).cloned()
    }

    /// All resources of a kind, ordered by namespace then name.
    pub fn list_kind(&self, kind: ResourceKind) -> Vec<Resource> {
        let inner = self.read();
        inner
            .by_name
            .range((kind, String::new(), String::new())..)
            .take_while(|(k, _)| k.0 == kind)
            .filter_map(|(_, uid)| inner.resources.get(uid).cloned())
            .collect()
    }

    pub fn list_namespace(&self, namespace: &str) -> Vec<Resource> {
        let inner = self.read();
        let uids = inner
            .by_namespace
            .get(namespace)
            .cloned()
            .unwrap_or_default();
        inner.sorted(uids)
    }

    pub fn list_by_label(&self, key: &str, value: &str) -> Vec<Resource> {
        let inner = self.read();
        let uids = inner
            .by_label
            .get(&(key.to_string(), value.to_string()))
            .cloned()
            .unwrap_or_default();
        inner.sorted(uids)
    }

    /// Namespaces that exist as objects or hold at least one resource.
    pub fn namespaces(&self) -> Vec<String> {
        let inner = self.read();
        let mut names: BTreeSet<String> = inner.by_namespace.keys().cloned().collect();
        names.extend(
            inner
                .by_name
                .range((ResourceKind::Namespace, String::new(), String::new())..)
                .take_while(|(k, _)| k.0 == ResourceKind::Namespace)
                .map(|(k, _)| k.2.clone()),
        );
        names.into_iter().collect()
    }

    pub fn len(&self) -> usize {
        self.read().resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn query(&self, q: &Query) -> Vec<Resource> {
        let inner = self.read();
        let candidates: Vec<String> = match (&q.kind, &q.namespace) {
            (Some(kind), _) => inner.by_kind.get(kind).cloned().unwrap_or_default().into_iter().collect(),
            (None, Some(ns)) => inner
                .by_namespace
                .get(ns)
                .cloned()
                .unwrap_or_default()
                .into_iter()
                .collect(),
            (None, None) => inner.resources.keys().cloned().collect(),
        };
        let mut out: Vec<Resource> = candidates
            .iter()
            .filter_map(|u| inner.resources.get(u))
            .filter(|r| q.matches(r))
            .cloned()
            .collect();
        drop(inner);

        out.sort_by(|a, b| {
            let ord = match q.sort {
                SortKey::Name => (a.name(), a.namespace()).cmp(&(b.name(), b.namespace())),
                SortKey::CreationTime => a
                    .metadata
                    .creation_timestamp
                    .cmp(&b.metadata.creation_timestamp)
                    .then_with(|| a.name().cmp(b.name())),
                SortKey::Kind => (a.kind(), a.name()).cmp(&(b.kind(), b.name())),
            };
            match q.order {
                SortOrder::Asc => ord,
                SortOrder::Desc => ord.reverse(),
            }
        });
        if let Some(limit) = q.limit {
            out.truncate(limit);
        }
        out
    }

    // --- Graph traversal ---

    pub fn children(&self, uid: &str) -> Vec<Resource> {
        let inner = self.read();
        let uids = inner.children.get(uid).cloned().unwrap_or_default();
        inner.sorted(uids)
    }

    pub fn parents(&self, uid: &str) -> Vec<Resource> {
        let inner = self.read();
        let uids = inner.parents.get(uid).cloned().unwrap_or_default();
        inner.sorted(uids)
    }

    /// Everything reachable through owner edges, breadth-first.
    pub fn descendants(&self, uid: &str) -> Vec<Resource> {
        let inner = self.read();
        let mut out = Vec::new();
        let mut seen: HashSet<String> = HashSet::from([uid.to_string()]);
        let mut queue: VecDeque<String> = VecDeque::from([uid.to_string()]);
        while let Some(u) = queue.pop_front() {
            for kid in inner.children.get(&u).into_iter().flatten() {
                if seen.insert(kid.clone()) {
                    if let Some(res) = inner.resources.get(kid) {
                        out.push(res.clone());
                    }
                    queue.push_back(kid.clone());
                }
            }
        }
        out
    }

    /// Controller owners from the immediate one up to the root.
    pub fn owner_chain(&self, uid: &str) -> Vec<Resource> {
        let inner = self.read();
        let mut out = Vec::new();
        let mut seen: HashSet<String> = HashSet::from([uid.to_string()]);
        let mut current = inner.resources.get(uid);
        while let Some(res) = current {
            let Some(owner) = res.metadata.controller_ref() else {
                break;
            };
            if !seen.insert(owner.uid.clone()) {
                break;
            }
            current = inner.resources.get(&owner.uid);
            if let Some(o) = current {
                out.push(o.clone());
            }
        }
        out
    }

    // --- Quota ---

    /// Sum of requests and limits of active pods in a namespace.
    pub fn quota_usage(&self, namespace: &str) -> QuotaUsage {
        let inner = self.read();
        let mut usage = QuotaUsage::default();
        for uid in inner.by_namespace.get(namespace).into_iter().flatten() {
            let Some(res) = inner.resources.get(uid) else {
                continue;
            };
            if !res.is_active_pod() {
                continue;
            }
            if let Some(pod) = res.as_pod() {
                usage.pods += 1;
                usage.requests += pod.spec.total_requests();
                usage.limits += pod.spec.total_limits();
            }
        }
        usage
    }

    pub fn check_quota(&self, namespace: &str) -> QuotaCheck {
        let used = self.quota_usage(namespace);
        let quotas: Vec<QuotaLimits> = self
            .query(&Query::kind(ResourceKind::ResourceQuota).in_namespace(namespace))
            .into_iter()
            .filter_map(|r| r.as_quota().map(|q| q.spec.hard.clone()))
            .collect();
        if quotas.is_empty() {
            return QuotaCheck {
                allowed: true,
                violations: Vec::new(),
                used,
                hard: None,
            };
        }
        let violations: Vec<String> = quotas.iter().flat_map(|q| q.violations(&used)).collect();
        let tightest = |a: Option<u64>, b: Option<u64>| match (a, b) {
            (Some(x), Some(y)) => Some(x.min(y)),
            (x, y) => x.or(y),
        };
        let hard = quotas.into_iter().reduce(|acc, q| QuotaLimits {
            pods: match (acc.pods, q.pods) {
                (Some(x), Some(y)) => Some(x.min(y)),
                (x, y) => x.or(y),
            },
            requests_cpu_millis: tightest(acc.requests_cpu_millis, q.requests_cpu_millis),
            requests_memory_bytes: tightest(acc.requests_memory_bytes, q.requests_memory_bytes),
            limits_cpu_millis: tightest(acc.limits_cpu_millis, q.limits_cpu_millis),
            limits_memory_bytes: tightest(acc.limits_memory_bytes, q.limits_memory_bytes),
        });
        QuotaCheck {
            allowed: violations.is_empty(),
            violations,
            used,
            hard,
        }
    }

    // --- Summary ---

    pub fn summary(&self) -> ClusterSummary {
        let inner = self.read();
        let mut s = ClusterSummary::default();
        for res in inner.resources.values() {
            match res.kind() {
                ResourceKind::Namespace => s.namespaces += 1,
                ResourceKind::Deployment => s.deployments += 1,
                ResourceKind::Service => s.services += 1,
                ResourceKind::Node => {
                    if let Some(node) = res.as_node() {
                        s.nodes += 1;
                        if node.status.ready {
                            s.ready_nodes += 1;
                        }
                        s.cpu_capacity_millis += node.spec.capacity.cpu_millis;
                        s.memory_capacity_bytes += node.spec.capacity.memory_bytes;
                    }
                }
                ResourceKind::Pod => {
                    if let Some(pod) = res.as_pod() {
                        s.pods += 1;
                        match pod.status.phase {
                            pkg_types::pod::PodPhase::Running => s.running_pods += 1,
                            pkg_types::pod::PodPhase::Pending => s.pending_pods += 1,
                            pkg_types::pod::PodPhase::Failed => s.failed_pods += 1,
                            _ => {}
                        }
                        if !pod.is_terminal() {
                            let req = pod.spec.total_requests();
                            let usage = pod.usage();
                            s.cpu_requested_millis += req.cpu_millis;
                            s.memory_requested_bytes += req.memory_bytes;
                            s.cpu_usage_millis += usage.cpu_millis;
                            s.memory_usage_bytes += usage.memory_bytes;
                        }
                    }
                }
                _ => {}
            }
        }
        let pct = |used: u64, cap: u64| {
            if cap == 0 {
                0.0
            } else {
                used as f64 / cap as f64 * 100.0
            }
        };
        s.cpu_utilization_percent = pct(s.cpu_usage_millis, s.cpu_capacity_millis);
        s.memory_utilization_percent = pct(s.memory_usage_bytes, s.memory_capacity_bytes);
        s
    }

    // --- Snapshot / restore ---

    pub fn snapshot(&self) -> Snapshot {
        let inner = self.read();
        let resources: BTreeMap<String, serde_json::Value> = inner
            .resources
            .iter()
            .filter_map(|(uid, res)| serde_json::to_value(res).ok().map(|v| (uid.clone(), v)))
            .collect();
        Snapshot {
            timestamp: inner.timestamp(),
            resource_count: resources.len(),
            resources,
        }
    }

    /// Replace all state with the snapshot's resources. Owner edges are
    /// rebuilt after every resource is in place, so ordering does not matter.
    pub fn restore(&self, snapshot: &Snapshot) -> Result<()> {
        let mut parsed = Vec::with_capacity(snapshot.resources.len());
        for (uid, value) in &snapshot.resources {
            let mut res: Resource = serde_json::from_value(value.clone())
                .map_err(|e| anyhow::anyhow!("snapshot entry {} is invalid: {}", uid, e))?;
            validate_resource(&res)?;
            if res.metadata.uid.is_empty() {
                res.metadata.uid = uid.clone();
            }
            parsed.push(res);
        }

        let mut inner = self.write();
        let now = inner.now;
        *inner = Inner {
            now,
            ..Default::default()
        };
        for res in parsed {
            if inner.by_name.contains_key(&Inner::name_key(&res)) {
                bail!("snapshot contains duplicate {}", res.key());
            }
            inner.version = inner.version.max(res.metadata.resource_version);
            inner.index(&res);
            inner.resources.insert(res.metadata.uid.clone(), res);
        }
        let uids: Vec<String> = inner.resources.keys().cloned().collect();
        for uid in uids {
            inner.relink(&uid);
        }
        debug!("Restored {} resources", inner.resources.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watch::Topic;
    use pkg_types::meta::ObjectMeta;
    use pkg_types::namespace::Namespace;
    use pkg_types::node::Node;
    use pkg_types::pod::{ContainerSpec, Pod, PodPhase, PodSpec, ResourceRequirements, Resources};
    use pkg_types::quota::{ResourceQuota, ResourceQuotaSpec};
    use pkg_types::resource::Object;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn make_pod(name: &str, ns: &str, cpu: u64) -> Resource {
        let spec = PodSpec {
            containers: vec![ContainerSpec {
                name: "app".to_string(),
                image: "nginx".to_string(),
                resources: ResourceRequirements {
                    requests: Resources::new(cpu, 64 << 20),
                    limits: Resources::default(),
                },
                liveness_probe: None,
                readiness_probe: None,
            }],
            ..Default::default()
        };
        Resource::new(ObjectMeta::new(name, ns), Object::Pod(Pod::new(spec)))
    }

    fn make_node(name: &str) -> Resource {
        Resource::new(
            ObjectMeta::new(name, ""),
            Object::Node(Node::new(Resources::new(4000, 8 << 30))),
        )
    }

    fn owned_by(mut res: Resource, owner: &Resource) -> Resource {
        res.metadata.owner_references.push(owner.controller_ref());
        res
    }

    #[test]
    fn add_assigns_identity_and_indexes() {
        let store = ClusterStore::new();
        let mut pod = make_pod("web", "default", 100);
        pod.metadata.labels = labels(&[("app", "web")]);
        let uid = store.add(pod).unwrap();
        assert!(!uid.is_empty());

        let got = store.get(&uid).unwrap();
        assert_eq!(got.metadata.generation, 1);
        assert!(got.metadata.creation_timestamp.is_some());
        assert_eq!(store.list_kind(ResourceKind::Pod).len(), 1);
        assert_eq!(store.list_namespace("default").len(), 1);
        assert_eq!(store.list_by_label("app", "web").len(), 1);
        assert!(store.get_by_name(ResourceKind::Pod, "default", "web").is_some());
    }

    #[test]
    fn add_rejects_invalid_and_collisions() {
        let store = ClusterStore::new();
        assert!(store.add(make_pod("Bad_Name", "default", 100)).is_err());
        assert!(store.add(make_pod("web", "", 100)).is_err());
        store.add(make_pod("web", "default", 100)).unwrap();
        assert!(store.add(make_pod("web", "default", 100)).is_err());
        // Same name in another namespace is fine.
        assert!(store.add(make_pod("web", "other", 100)).is_ok());
    }

    #[test]
    fn label_and_name_indices_follow_updates() {
        let store = ClusterStore::new();
        let mut pod = make_pod("web", "default", 100);
        pod.metadata.labels = labels(&[("tier", "front")]);
        let uid = store.add(pod).unwrap();

        store.update(&uid, |r| {
            r.metadata.labels = labels(&[("tier", "back")]);
        });
        assert!(store.list_by_label("tier", "front").is_empty());
        assert_eq!(store.list_by_label("tier", "back").len(), 1);

        store.update(&uid, |r| r.metadata.name = "api".to_string());
        assert!(store.get_by_name(ResourceKind::Pod, "default", "web").is_none());
        assert_eq!(
            store.get_by_name(ResourceKind::Pod, "default", "api").unwrap().uid(),
            uid
        );
    }

    #[test]
    fn generation_bumps_only_on_spec_change() {
        let store = ClusterStore::new();
        let uid = store.add(make_pod("web", "default", 100)).unwrap();
        let rv0 = store.get(&uid).unwrap().metadata.resource_version;

        let after = store
            .update(&uid, |r| {
                if let Some(p) = r.as_pod_mut() {
                    p.status.phase = PodPhase::Running;
                }
            })
            .unwrap();
        assert_eq!(after.metadata.generation, 1);
        assert!(after.metadata.resource_version > rv0);
        assert_eq!(after.events.last().unwrap().reason, "PhaseChanged");

        let after = store
            .update(&uid, |r| {
                if let Some(p) = r.as_pod_mut() {
                    p.spec.node_name = Some("n1".to_string());
                }
            })
            .unwrap();
        assert_eq!(after.metadata.generation, 2);
        assert!(store.update("missing", |_| {}).is_none());
    }

    #[test]
    fn owner_edges_are_symmetric() {
        let store = ClusterStore::new();
        let parent = make_pod("parent", "default", 100);
        let parent_uid = store.add(parent).unwrap();
        let parent = store.get(&parent_uid).unwrap();
        let child_uid = store
            .add(owned_by(make_pod("child", "default", 100), &parent))
            .unwrap();

        assert_eq!(store.children(&parent_uid)[0].uid(), child_uid);
        assert_eq!(store.parents(&child_uid)[0].uid(), parent_uid);
        assert_eq!(store.owner_chain(&child_uid)[0].uid(), parent_uid);

        store.update(&child_uid, |r| r.metadata.owner_references.clear());
        assert!(store.children(&parent_uid).is_empty());
        assert!(store.parents(&child_uid).is_empty());
    }

    #[test]
    fn dependent_added_before_owner_is_adopted() {
        let store = ClusterStore::new();
        let mut owner = make_pod("owner", "default", 100);
        owner.metadata.uid = "owner-uid".to_string();
        let child_uid = store
            .add(owned_by(make_pod("early", "default", 100), &owner))
            .unwrap();
        assert!(store.parents(&child_uid).is_empty());

        let owner_uid = store.add(owner).unwrap();
        assert_eq!(owner_uid, "owner-uid");
        assert_eq!(store.children(&owner_uid)[0].uid(), child_uid);
        assert_eq!(store.parents(&child_uid)[0].uid(), owner_uid);

        assert_eq!(store.remove(&owner_uid), RemoveOutcome::Removed(2));
        assert!(store.get(&child_uid).is_none());
    }

    #[test]
    fn concurrent_adds_with_same_uid_converge() {
        let store = ClusterStore::new();
        let results: Vec<Result<String>> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let store = store.clone();
                    scope.spawn(move || {
                        let mut pod = make_pod("web", "default", 100);
                        pod.metadata.uid = "web-uid".to_string();
                        store.add(pod)
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert!(results.iter().all(|r| r.as_deref().ok() == Some("web-uid")));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn remove_cascades_to_descendants() {
        let store = ClusterStore::new();
        let root_uid = store.add(make_pod("root", "default", 100)).unwrap();
        let root = store.get(&root_uid).unwrap();
        let mid_uid = store.add(owned_by(make_pod("mid", "default", 100), &root)).unwrap();
        let mid = store.get(&mid_uid).unwrap();
        store.add(owned_by(make_pod("leaf", "default", 100), &mid)).unwrap();

        assert_eq!(store.descendants(&root_uid).len(), 2);
        assert_eq!(store.remove(&root_uid), RemoveOutcome::Removed(3));
        assert!(store.is_empty());
        assert!(store.list_namespace("default").is_empty());
        assert_eq!(store.remove(&root_uid), RemoveOutcome::NotFound);
    }

    #[test]
    fn finalizers_soft_delete() {
        let store = ClusterStore::new();
        let root_uid = store.add(make_pod("root", "default", 100)).unwrap();
        let root = store.get(&root_uid).unwrap();
        let mut child = owned_by(make_pod("child", "default", 100), &root);
        child.metadata.finalizers.push("example.com/cleanup".to_string());
        let child_uid = store.add(child).unwrap();

        assert_eq!(store.remove(&root_uid), RemoveOutcome::Terminating);
        assert!(store.get(&root_uid).unwrap().metadata.is_terminating());
        assert!(store.get(&child_uid).unwrap().metadata.is_terminating());

        assert!(store.remove_finalizer(&child_uid, "example.com/cleanup"));
        assert!(store.get(&child_uid).is_none());
        assert!(store.get(&root_uid).is_none());
    }

    #[test]
    fn query_filters_and_sorts() {
        let store = ClusterStore::new();
        for (name, tier) in [("b-web", "front"), ("a-web", "front"), ("db", "back")] {
            let mut pod = make_pod(name, "default", 100);
            pod.metadata.labels = labels(&[("tier", tier)]);
            store.add(pod).unwrap();
        }
        store.add(make_node("worker-1")).unwrap();

        let q = Query::kind(ResourceKind::Pod)
            .with_selector(LabelSelector::parse("tier in (front)").unwrap());
        let names: Vec<String> = store.query(&q).iter().map(|r| r.name().to_string()).collect();
        assert_eq!(names, vec!["a-web", "b-web"]);

        let q = Query::kind(ResourceKind::Pod)
            .name_contains("web")
            .sorted(SortKey::Name, SortOrder::Desc)
            .limit(1);
        assert_eq!(store.query(&q)[0].name(), "b-web");

        let q = Query::default().with_field(FieldSelector::parse("metadata.namespace!=default").unwrap());
        assert_eq!(store.query(&q)[0].name(), "worker-1");

        let q = Query::kind(ResourceKind::Pod).with_phase("pending");
        assert_eq!(store.query(&q).len(), 3);
    }

    #[test]
    fn quota_counts_active_pods() {
        let store = ClusterStore::new();
        store.add(make_pod("a", "team", 300)).unwrap();
        let done = store.add(make_pod("b", "team", 300)).unwrap();
        store.update(&done, |r| {
            if let Some(p) = r.as_pod_mut() {
                p.status.phase = PodPhase::Succeeded;
            }
        });
        let quota = ResourceQuota {
            spec: ResourceQuotaSpec {
                hard: QuotaLimits {
                    requests_cpu_millis: Some(200),
                    ..Default::default()
                },
            },
            status: Default::default(),
        };
        store
            .add(Resource::new(ObjectMeta::new("compute", "team"), Object::ResourceQuota(quota)))
            .unwrap();

        let usage = store.quota_usage("team");
        assert_eq!(usage.pods, 1);
        assert_eq!(usage.requests.cpu_millis, 300);
        let check = store.check_quota("team");
        assert!(!check.allowed);
        assert_eq!(check.violations.len(), 1);
        assert!(store.check_quota("elsewhere").allowed);
    }

    #[test]
    fn snapshot_restore_rebuilds_edges() {
        let store = ClusterStore::new();
        store
            .add(Resource::new(ObjectMeta::new("team", ""), Object::Namespace(Namespace::default())))
            .unwrap();
        let parent_uid = store.add(make_pod("parent", "team", 100)).unwrap();
        let parent = store.get(&parent_uid).unwrap();
        let child_uid = store.add(owned_by(make_pod("child", "team", 100), &parent)).unwrap();

        let snap = store.snapshot();
        assert_eq!(snap.resource_count, 3);

        let fresh = ClusterStore::new();
        fresh.restore(&snap).unwrap();
        assert_eq!(fresh.len(), 3);
        assert_eq!(fresh.children(&parent_uid)[0].uid(), child_uid);
        assert_eq!(fresh.parents(&child_uid)[0].uid(), parent_uid);
        assert_eq!(fresh.namespaces(), vec!["team".to_string()]);
        assert_eq!(fresh.snapshot().resources, snap.resources);
    }

    #[test]
    fn merge_spec_validates() {
        let store = ClusterStore::new();
        let uid = store.add(make_node("worker-1")).unwrap();
        let res = store
            .merge_spec(&uid, &serde_json::json!({"unschedulable": true}))
            .unwrap()
            .unwrap();
        assert!(res.as_node().unwrap().spec.unschedulable);
        assert_eq!(res.metadata.generation, 2);

        assert!(store
            .merge_spec(&uid, &serde_json::json!({"max_pods": "many"}))
            .is_err());
        assert!(store.merge_spec("nope", &serde_json::json!({})).unwrap().is_none());
    }

    #[test]
    fn mutations_notify_and_batch() {
        let store = ClusterStore::new();
        let mut sub = store.bus().subscribe(Topic::Kind(ResourceKind::Pod));
        store.begin_batch();
        let uid = store.add(make_pod("web", "default", 100)).unwrap();
        store.update(&uid, |r| {
            r.metadata.labels.insert("a".to_string(), "b".to_string());
        });
        store.end_batch();
        let events = sub.drain();
        assert_eq!(events.len(), 1);
        assert!(matches!(
            events[0].event,
            ClusterEvent::Resource { change: ChangeType::Added, .. }
        ));

        store.remove(&uid);
        assert!(matches!(
            sub.try_next().unwrap().event,
            ClusterEvent::Resource { change: ChangeType::Deleted, .. }
        ));
    }

    #[test]
    fn record_event_is_capped() {
        let store = ClusterStore::new();
        let uid = store.add(make_pod("web", "default", 100)).unwrap();
        for i in 0..60 {
            store.record_event(&uid, EventSeverity::Warning, "BackOff", &format!("#{}", i));
        }
        let res = store.get(&uid).unwrap();
        assert_eq!(res.events.len(), pkg_constants::store::RESOURCE_EVENT_CAPACITY);
        assert_eq!(res.events.last().unwrap().message, "#59");
    }
}
