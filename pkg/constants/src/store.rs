//! Cluster store and notification bus constants.

/// Number of recent notifications kept for `events_since` replay.
pub const EVENT_LOG_CAPACITY: usize = 4096;

/// Capacity of the broadcast channel feeding live subscribers.
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Per-resource event log length.
pub const RESOURCE_EVENT_CAPACITY: usize = 50;

/// Namespace used when a namespaced resource omits one through the command surface.
pub const DEFAULT_NAMESPACE: &str = "default";
