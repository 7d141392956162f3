use pkg_types::incident::{CascadeRule, IncidentId};
use pkg_types::time::SimTime;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// A follow-on incident waiting for its fire time.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct CascadeTimer {
    pub fire_at: SimTime,
    pub parent: IncidentId,
    pub rule: CascadeRule,
    sequence: u64,
}

impl Eq for CascadeTimer {}

impl PartialOrd for CascadeTimer {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CascadeTimer {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: earliest fire time (then earliest push) must compare greatest.
        other
            .fire_at
            .cmp(&self.fire_at)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

/// Min-heap of cascade timers keyed by simulated fire time.
#[derive(Debug, Default)]
pub(crate) struct CascadeQueue {
    heap: BinaryHeap<CascadeTimer>,
    next_sequence: u64,
}

impl CascadeQueue {
    pub fn schedule(&mut self, fire_at: SimTime, parent: IncidentId, rule: CascadeRule) {
        self.next_sequence += 1;
        self.heap.push(CascadeTimer {
            fire_at,
            parent,
            rule,
            sequence: self.next_sequence,
        });
    }

    /// Pop every timer due at or before `now`, earliest first.
    pub fn drain_due(&mut self, now: SimTime) -> Vec<CascadeTimer> {
        let mut due = Vec::new();
        while self.heap.peek().is_some_and(|t| t.fire_at <= now) {
            if let Some(timer) = self.heap.pop() {
                due.push(timer);
            }
        }
        due
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }
}
