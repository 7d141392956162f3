use pkg_types::incident::IncidentEvent;
use pkg_types::resource::ResourceKind;
use pkg_types::stats::TickStats;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock, RwLockWriteGuard};
use tokio::sync::broadcast;

/// Kind of resource change.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ChangeType {
    Added,
    Modified,
    Deleted,
}

/// Everything observable on the bus.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ClusterEvent {
    Resource {
        change: ChangeType,
        kind: ResourceKind,
        uid: String,
        name: String,
        namespace: String,
    },
    TickCompleted(TickStats),
    Scaled {
        hpa: String,
        namespace: String,
        target_kind: ResourceKind,
        target: String,
        from: u32,
        to: u32,
    },
    QuotaExceeded {
        namespace: String,
        quota: String,
        violations: Vec<String>,
    },
    Incident(IncidentEvent),
}

impl ClusterEvent {
    fn resource_uid(&self) -> Option<(&str, ChangeType)> {
        match self {
            ClusterEvent::Resource { uid, change, .. } => Some((uid.as_str(), *change)),
            _ => None,
        }
    }
}

/// A single event on the bus with its sequence number.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WatchEvent {
    pub seq: u64,
    pub event: ClusterEvent,
}

/// Subscription filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topic {
    /// Resource lifecycle of every kind.
    Resources,
    /// Resource lifecycle of one kind.
    Kind(ResourceKind),
    Tick,
    Autoscaler,
    Quota,
    Incidents,
    All,
}

impl Topic {
    pub fn matches(&self, event: &ClusterEvent) -> bool {
        match (self, event) {
            (Topic::All, _) => true,
            (Topic::Resources, ClusterEvent::Resource { .. }) => true,
            (Topic::Kind(k), ClusterEvent::Resource { kind, .. }) => k == kind,
            (Topic::Tick, ClusterEvent::TickCompleted(_)) => true,
            (Topic::Autoscaler, ClusterEvent::Scaled { .. }) => true,
            (Topic::Quota, ClusterEvent::QuotaExceeded { .. }) => true,
            (Topic::Incidents, ClusterEvent::Incident(_)) => true,
            _ => false,
        }
    }
}

/// Topic-filtered receiver.
pub struct Subscription {
    topic: Topic,
    receiver: broadcast::Receiver<WatchEvent>,
}

impl Subscription {
    /// Next buffered event for this topic without waiting. Lagged events are skipped.
    pub fn try_next(&mut self) -> Option<WatchEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(ev) if self.topic.matches(&ev.event) => return Some(ev),
                Ok(_) => continue,
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }

    /// Drain everything currently buffered for this topic.
    pub fn drain(&mut self) -> Vec<WatchEvent> {
        std::iter::from_fn(|| self.try_next()).collect()
    }

    /// Wait for the next event on this topic; `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<WatchEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(ev) if self.topic.matches(&ev.event) => return Some(ev),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// In-memory notification bus with monotonic sequence numbers, a capped
/// replay buffer and live broadcast to subscribers.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<RwLock<EventBusInner>>,
    sender: broadcast::Sender<WatchEvent>,
}

struct EventBusInner {
    seq: u64,
    /// Ring buffer of recent events (capped)
    events: VecDeque<WatchEvent>,
    max_events: usize,
    batch_depth: u32,
    pending: Vec<ClusterEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(pkg_constants::store::EVENT_LOG_CAPACITY)
    }
}

impl EventBus {
    pub fn new(max_events: usize) -> Self {
        let (sender, _) = broadcast::channel(pkg_constants::store::EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(RwLock::new(EventBusInner {
                seq: 0,
                events: VecDeque::with_capacity(max_events.min(1024)),
                max_events: max_events.max(1),
                batch_depth: 0,
                pending: Vec::new(),
            })),
            sender,
        }
    }

    fn lock(&self) -> RwLockWriteGuard<'_, EventBusInner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Publish an event, or buffer it while a batch is open.
    pub fn emit(&self, event: ClusterEvent) {
        let mut inner = self.lock();
        if inner.batch_depth > 0 {
            inner.pending.push(event);
            return;
        }
        self.publish(&mut inner, event);
    }

    fn publish(&self, inner: &mut EventBusInner, event: ClusterEvent) {
        inner.seq += 1;
        let event = WatchEvent {
            seq: inner.seq,
            event,
        };
        if inner.events.len() >= inner.max_events {
            inner.events.pop_front();
        }
        inner.events.push_back(event.clone());
        // No receivers is fine.
        let _ = self.sender.send(event);
    }

    /// Start buffering. Batches nest; only the outermost `end_batch` flushes.
    pub fn begin_batch(&self) {
        self.lock().batch_depth += 1;
    }

    /// Close a batch and flush the coalesced events in order.
    pub fn end_batch(&self) {
        let mut inner = self.lock();
        if inner.batch_depth == 0 {
            return;
        }
        inner.batch_depth -= 1;
        if inner.batch_depth > 0 {
            return;
        }
        let pending = std::mem::take(&mut inner.pending);
        for event in coalesce(pending) {
            self.publish(&mut inner, event);
        }
    }

    pub fn in_batch(&self) -> bool {
        self.lock().batch_depth > 0
    }

    pub fn current_seq(&self) -> u64 {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).seq
    }

    /// Get all buffered events since the given sequence number.
    pub fn events_since(&self, from_seq: u64) -> Vec<WatchEvent> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner
            .events
            .iter()
            .filter(|e| e.seq > from_seq)
            .cloned()
            .collect()
    }

    pub fn subscribe(&self, topic: Topic) -> Subscription {
        Subscription {
            topic,
            receiver: self.sender.subscribe(),
        }
    }
}

/// Drop redundant `Modified` notifications: those followed by another event
/// for the same uid, and those for a uid `Added` earlier in the batch.
fn coalesce(events: Vec<ClusterEvent>) -> Vec<ClusterEvent> {
    let mut last_index: HashMap<&str, usize> = HashMap::new();
    let mut first_added: HashMap<&str, usize> = HashMap::new();
    for (i, ev) in events.iter().enumerate() {
        if let Some((uid, change)) = ev.resource_uid() {
            last_index.insert(uid, i);
            if change == ChangeType::Added {
                first_added.entry(uid).or_insert(i);
            }
        }
    }
    let keep: Vec<bool> = events
        .iter()
        .enumerate()
        .map(|(i, ev)| match ev.resource_uid() {
            Some((uid, ChangeType::Modified)) => {
                let superseded = last_index.get(uid).is_some_and(|&last| last > i);
                let after_add = first_added.get(uid).is_some_and(|&added| added < i);
                !superseded && !after_add
            }
            _ => true,
        })
        .collect();
    events
        .into_iter()
        .zip(keep)
        .filter_map(|(ev, keep)| keep.then_some(ev))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn res(change: ChangeType, uid: &str) -> ClusterEvent {
        ClusterEvent::Resource {
            change,
            kind: ResourceKind::Pod,
            uid: uid.to_string(),
            name: uid.to_string(),
            namespace: "default".to_string(),
        }
    }

    #[test]
    fn sequence_and_replay() {
        let bus = EventBus::new(2);
        bus.emit(res(ChangeType::Added, "a"));
        bus.emit(res(ChangeType::Added, "b"));
        bus.emit(res(ChangeType::Added, "c"));
        assert_eq!(bus.current_seq(), 3);
        let replay = bus.events_since(0);
        assert_eq!(replay.len(), 2);
        assert_eq!(replay[0].seq, 2);
        assert_eq!(bus.events_since(2).len(), 1);
    }

    #[test]
    fn batch_coalesces_modified() {
        let bus = EventBus::default();
        let mut sub = bus.subscribe(Topic::Resources);
        bus.begin_batch();
        bus.emit(res(ChangeType::Modified, "x"));
        bus.emit(res(ChangeType::Added, "y"));
        bus.emit(res(ChangeType::Modified, "x"));
        bus.emit(res(ChangeType::Modified, "y"));
        bus.emit(res(ChangeType::Modified, "z"));
        assert!(sub.try_next().is_none());
        bus.end_batch();

        let got: Vec<(String, ChangeType)> = sub
            .drain()
            .into_iter()
            .filter_map(|e| match e.event {
                ClusterEvent::Resource { uid, change, .. } => Some((uid, change)),
                _ => None,
            })
            .collect();
        assert_eq!(
            got,
            vec![
                ("y".to_string(), ChangeType::Added),
                ("x".to_string(), ChangeType::Modified),
                ("z".to_string(), ChangeType::Modified),
            ]
        );
    }

    #[test]
    fn topic_filtering() {
        let bus = EventBus::default();
        let mut quota = bus.subscribe(Topic::Quota);
        let mut nodes = bus.subscribe(Topic::Kind(ResourceKind::Node));
        bus.emit(res(ChangeType::Added, "p"));
        bus.emit(ClusterEvent::QuotaExceeded {
            namespace: "team-a".to_string(),
            quota: "compute".to_string(),
            violations: vec!["pods: used 3 > hard 2".to_string()],
        });
        assert_eq!(quota.drain().len(), 1);
        assert!(nodes.try_next().is_none());
    }

    #[test]
    fn nested_batches_flush_once() {
        let bus = EventBus::default();
        bus.begin_batch();
        bus.begin_batch();
        bus.emit(res(ChangeType::Added, "a"));
        bus.end_batch();
        assert_eq!(bus.current_seq(), 0);
        bus.end_batch();
        assert_eq!(bus.current_seq(), 1);
        assert!(!bus.in_batch());
    }
}
