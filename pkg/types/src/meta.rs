use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::resource::ResourceKind;
use crate::time::SimTime;

// --- Owner references ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OwnerReference {
    pub kind: ResourceKind,
    pub name: String,
    pub uid: String,
    /// True for the managing controller; at most one per object.
    #[serde(default)]
    pub controller: bool,
}

// --- Object metadata ---

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ObjectMeta {
    pub name: String,
    /// Empty for cluster-scoped kinds.
    #[serde(default)]
    pub namespace: String,
    /// Assigned by the store when empty.
    #[serde(default)]
    pub uid: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    #[serde(default)]
    pub owner_references: Vec<OwnerReference>,
    #[serde(default)]
    pub finalizers: Vec<String>,
    /// Bumped on every spec change.
    #[serde(default)]
    pub generation: u64,
    /// Bumped on every mutation.
    #[serde(default)]
    pub resource_version: u64,
    #[serde(default)]
    pub creation_timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub deletion_timestamp: Option<DateTime<Utc>>,
}

impl ObjectMeta {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            ..Default::default()
        }
    }

    pub fn with_labels(mut self, labels: BTreeMap<String, String>) -> Self {
        self.labels = labels;
        self
    }

    pub fn with_owner(mut self, owner: OwnerReference) -> Self {
        self.owner_references.push(owner);
        self
    }

    /// The owner reference flagged as controller, if any.
    pub fn controller_ref(&self) -> Option<&OwnerReference> {
        self.owner_references.iter().find(|o| o.controller)
    }

    pub fn is_controlled_by(&self, uid: &str) -> bool {
        self.controller_ref().is_some_and(|o| o.uid == uid)
    }

    pub fn is_terminating(&self) -> bool {
        self.deletion_timestamp.is_some()
    }
}

// --- Conditions ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Condition {
    #[serde(rename = "type")]
    pub condition_type: String,
    pub status: bool,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub last_transition: SimTime,
}

/// Insert or update a condition. The transition time only moves when the
/// status flips. Returns true if anything changed.
pub fn set_condition(
    conditions: &mut Vec<Condition>,
    condition_type: &str,
    status: bool,
    reason: &str,
    message: &str,
    now: SimTime,
) -> bool {
    match conditions
        .iter_mut()
        .find(|c| c.condition_type == condition_type)
    {
        Some(c) => {
            if c.status == status && c.reason == reason && c.message == message {
                return false;
            }
            if c.status != status {
                c.last_transition = now;
            }
            c.status = status;
            c.reason = reason.to_string();
            c.message = message.to_string();
            true
        }
        None => {
            conditions.push(Condition {
                condition_type: condition_type.to_string(),
                status,
                reason: reason.to_string(),
                message: message.to_string(),
                last_transition: now,
            });
            true
        }
    }
}

pub fn condition_is_true(conditions: &[Condition], condition_type: &str) -> bool {
    conditions
        .iter()
        .any(|c| c.condition_type == condition_type && c.status)
}

// --- Per-resource event log ---

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum EventSeverity {
    Normal,
    Warning,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceEvent {
    pub time: DateTime<Utc>,
    pub severity: EventSeverity,
    pub reason: String,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_condition_tracks_transitions() {
        let mut conds = Vec::new();
        assert!(set_condition(&mut conds, "Ready", false, "Starting", "", SimTime::from_secs(1)));
        assert!(!set_condition(&mut conds, "Ready", false, "Starting", "", SimTime::from_secs(2)));
        assert_eq!(conds[0].last_transition, SimTime::from_secs(1));
        assert!(set_condition(&mut conds, "Ready", true, "Ok", "", SimTime::from_secs(3)));
        assert_eq!(conds[0].last_transition, SimTime::from_secs(3));
        assert!(condition_is_true(&conds, "Ready"));
    }
}
