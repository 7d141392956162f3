//! Control-loop engine cadences and pod lifecycle tuning.

/// Default fixed timestep of the control loop, in milliseconds.
pub const DEFAULT_TICK_MS: u64 = 100;

/// How often the autoscaler evaluates, in simulated seconds.
pub const AUTOSCALE_INTERVAL_SECS: u64 = 5;

/// How often liveness/readiness probes are evaluated, in simulated seconds.
pub const PROBE_INTERVAL_SECS: u64 = 2;

/// How often namespace quota usage is recomputed, in simulated seconds.
pub const QUOTA_INTERVAL_SECS: u64 = 5;

/// A node that stays NotReady this long has its pods evicted.
pub const EVICTION_GRACE_SECS: u64 = 40;

/// Requests or usage at this fraction of capacity raise a pressure condition.
pub const NODE_PRESSURE_RATIO: f64 = 0.9;

/// Default pod capacity of a node when none is declared.
pub const DEFAULT_NODE_MAX_PODS: u32 = 110;

/// Image pull / sandbox creation takes between these bounds (simulated ms).
pub const CONTAINER_CREATE_MIN_MS: u64 = 2_000;
pub const CONTAINER_CREATE_MAX_MS: u64 = 4_000;

/// A container fails a probe once usage exceeds this fraction of its limit.
pub const PROBE_FAILURE_RATIO: f64 = 0.95;

/// Default consecutive probe failures before action is taken.
pub const DEFAULT_PROBE_FAILURE_THRESHOLD: u32 = 3;

/// First restart backoff; doubles per restart up to `BACKOFF_MAX_SECS`.
pub const BACKOFF_BASE_SECS: u64 = 10;
pub const BACKOFF_MAX_SECS: u64 = 300;

/// Default per-container, per-tick probability of a spontaneous crash.
pub const DEFAULT_RANDOM_FAILURE_RATE: f64 = 0.000_05;

/// Per-container steady-state load is sampled in this range (fraction of requests).
pub const BASE_LOAD_MIN: f64 = 0.3;
pub const BASE_LOAD_MAX: f64 = 0.7;

/// Exponential smoothing factor applied to usage each tick.
pub const USAGE_SMOOTHING: f64 = 0.2;

/// Job pods finish after `mean * [JOB_DURATION_MIN_FACTOR, JOB_DURATION_MAX_FACTOR]`.
pub const JOB_DURATION_MIN_FACTOR: f64 = 0.5;
pub const JOB_DURATION_MAX_FACTOR: f64 = 1.5;

/// Default mean Job pod duration, in simulated seconds.
pub const DEFAULT_JOB_DURATION_SECS: u64 = 30;

/// Autoscaler dead band around the target utilization.
pub const HPA_TOLERANCE: f64 = 0.1;

/// Default autoscaler cooldowns (short up, long down).
pub const HPA_SCALE_UP_COOLDOWN_SECS: u64 = 15;
pub const HPA_SCALE_DOWN_COOLDOWN_SECS: u64 = 300;

/// Default maximum replica change per autoscaler evaluation.
pub const HPA_MAX_SCALE_UP_STEP: u32 = 4;
pub const HPA_MAX_SCALE_DOWN_STEP: u32 = 2;

/// Default chaos cadence, in simulated seconds.
pub const CHAOS_INTERVAL_SECS: u64 = 30;

/// Scoring penalty applied to nodes with an untolerated PreferNoSchedule taint.
pub const PREFER_NO_SCHEDULE_PENALTY: f64 = 0.1;

/// Real time a single `advance` call may contribute, in milliseconds.
pub const MAX_FRAME_MS: u64 = 250;

/// Accepted range of the simulation speed multiplier.
pub const MIN_TIME_SCALE: f64 = 0.1;
pub const MAX_TIME_SCALE: f64 = 100.0;

/// Upper bound on fixed ticks executed by one `advance` call.
pub const MAX_TICKS_PER_ADVANCE: u32 = 64;

/// Default interval between incident engine updates, in simulated milliseconds.
pub const DEFAULT_INCIDENT_INTERVAL_MS: u64 = 1_000;
