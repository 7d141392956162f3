use pkg_constants::engine::{
    BACKOFF_BASE_SECS, BACKOFF_MAX_SECS, BASE_LOAD_MAX, BASE_LOAD_MIN, CONTAINER_CREATE_MAX_MS,
    CONTAINER_CREATE_MIN_MS, JOB_DURATION_MAX_FACTOR, JOB_DURATION_MIN_FACTOR, PROBE_FAILURE_RATIO,
    USAGE_SMOOTHING,
};
use pkg_state::ClusterStore;
use pkg_types::meta::{EventSeverity, set_condition};
use pkg_types::pod::{
    ContainerSpec, ContainerState, ContainerStatus, Pod, PodFault, PodPhase, Resources,
    RestartPolicy,
};
use pkg_types::resource::{Object, Resource, ResourceKind};
use pkg_types::time::SimTime;
use rand::Rng;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::context::TickContext;

/// Restart backoff after `restarts` previous restarts.
pub fn crash_backoff(restarts: u32) -> Duration {
    let secs = BACKOFF_BASE_SECS.saturating_mul(1u64 << restarts.min(16));
    Duration::from_secs(secs.min(BACKOFF_MAX_SECS))
}

/// Why a container went down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CrashReason {
    OomKilled,
    LivenessFailed,
    Error,
}

impl CrashReason {
    fn as_str(self) -> &'static str {
        match self {
            CrashReason::OomKilled => "OOMKilled",
            CrashReason::LivenessFailed => "LivenessProbeFailed",
            CrashReason::Error => "Error",
        }
    }

    fn exit_code(self) -> i32 {
        match self {
            CrashReason::OomKilled => 137,
            CrashReason::LivenessFailed => 143,
            CrashReason::Error => 1,
        }
    }
}

/// Things that happened to a pod during one pass, reported after the store update.
#[derive(Default)]
struct Outcome {
    crashes: Vec<(String, CrashReason)>,
    started: bool,
    finished: Option<PodPhase>,
}

/// Drives bound pods through ContainerCreating → Running, simulates resource
/// usage, crashes (OOM, liveness, random, injected) with exponential
/// restart backoff, and completes Job pods.
pub struct PodLifecycleController {
    store: ClusterStore,
    random_failure_rate: f64,
}

impl PodLifecycleController {
    pub fn new(store: ClusterStore, random_failure_rate: f64) -> Self {
        Self {
            store,
            random_failure_rate: random_failure_rate.clamp(0.0, 1.0),
        }
    }

    /// Per-tick pass. `probe` additionally evaluates liveness/readiness.
    pub fn reconcile(&self, ctx: &mut TickContext<'_>, probe: bool) -> anyhow::Result<()> {
        for res in self.store.list_kind(ResourceKind::Pod) {
            if !res.is_active_pod() {
                continue;
            }
            let Some(pod) = res.as_pod() else { continue };
            if pod.spec.node_name.is_none() || pod.status.phase == PodPhase::Pending {
                continue;
            }
            let job_duration = self.job_duration(&res);
            let mut next = pod.clone();
            let outcome = self.step(&mut next, job_duration, probe, ctx);
            if next == *pod {
                continue;
            }
            self.store.update(res.uid(), |r| r.object = Object::Pod(next));
            self.report(&res, outcome, ctx);
        }
        Ok(())
    }

    /// Estimated duration when the pod belongs to a Job.
    fn job_duration(&self, res: &Resource) -> Option<Duration> {
        let owner = res.metadata.controller_ref()?;
        if owner.kind != ResourceKind::Job {
            return None;
        }
        let job = self.store.get(&owner.uid)?;
        Some(Duration::from_secs(job.as_job()?.spec.estimated_duration_secs))
    }

    fn step(
        &self,
        pod: &mut Pod,
        job_duration: Option<Duration>,
        probe: bool,
        ctx: &mut TickContext<'_>,
    ) -> Outcome {
        let now = ctx.now;
        let mut outcome = Outcome::default();

        if pod.status.phase == PodPhase::Scheduled {
            self.start_creating(pod, ctx);
        }

        // Containers reconciled by position against the spec.
        let specs = pod.spec.containers.clone();
        for (spec, status) in specs.iter().zip(pod.status.container_statuses.iter_mut()) {
            match status.state.clone() {
                ContainerState::Waiting { reason, until } => {
                    if pod.status.fault == Some(PodFault::ImagePull) && reason == "ContainerCreating" {
                        status.state = ContainerState::Waiting {
                            reason: "ImagePullBackOff".to_string(),
                            until: None,
                        };
                        continue;
                    }
                    if reason == "ImagePullBackOff" && pod.status.fault != Some(PodFault::ImagePull) {
                        status.state = ContainerState::Waiting {
                            reason: "ContainerCreating".to_string(),
                            until: Some(now),
                        };
                    }
                    if until.is_some_and(|t| t <= now) {
                        status.state = ContainerState::Running { started_at: now };
                        status.usage = Resources::default();
                        if reason == "ContainerCreating" {
                            outcome.started = true;
                        }
                    }
                }
                ContainerState::Running { started_at } => {
                    simulate_usage(spec, status, pod.status.load_factor, pod.status.memory_leak_bytes_per_sec, now.since(started_at), ctx);
                    if let Some(reason) = self.crash_check(spec, status, pod.status.fault, ctx) {
                        outcome.crashes.push((spec.name.clone(), reason));
                    }
                }
                ContainerState::Terminated { .. } => {}
            }
        }

        if probe {
            for (spec, status) in specs.iter().zip(pod.status.container_statuses.iter_mut()) {
                if let Some(reason) = evaluate_probes(spec, status)
                    && !outcome.crashes.iter().any(|(c, _)| c == &spec.name)
                {
                    outcome.crashes.push((spec.name.clone(), reason));
                }
            }
        }

        for (name, reason) in &outcome.crashes {
            self.crash(pod, name, *reason, now);
        }
        if pod.status.phase == PodPhase::Failed {
            outcome.finished = Some(PodPhase::Failed);
            return outcome;
        }

        let all_running = !pod.status.container_statuses.is_empty()
            && pod
                .status
                .container_statuses
                .iter()
                .all(|c| matches!(c.state, ContainerState::Running { .. }));
        if all_running && pod.status.phase == PodPhase::ContainerCreating {
            pod.status.phase = PodPhase::Running;
            pod.status.start_time = Some(now);
            if let Some(mean) = job_duration {
                let factor = ctx
                    .rng
                    .random_range(JOB_DURATION_MIN_FACTOR..=JOB_DURATION_MAX_FACTOR);
                pod.status.completes_at = Some(now + mean.mul_f64(factor));
            }
        }

        if pod.status.phase == PodPhase::Running
            && all_running
            && pod.status.completes_at.is_some_and(|t| t <= now)
        {
            complete(pod, now);
            outcome.finished = Some(PodPhase::Succeeded);
            return outcome;
        }

        update_readiness(pod, now);
        outcome
    }

    fn start_creating(&self, pod: &mut Pod, ctx: &mut TickContext<'_>) {
        let now = ctx.now;
        pod.status.phase = PodPhase::ContainerCreating;
        pod.status.container_statuses = pod
            .spec
            .containers
            .iter()
            .map(|c| {
                let delay = ctx
                    .rng
                    .random_range(CONTAINER_CREATE_MIN_MS..=CONTAINER_CREATE_MAX_MS);
                ContainerStatus {
                    name: c.name.clone(),
                    state: ContainerState::Waiting {
                        reason: "ContainerCreating".to_string(),
                        until: Some(now + Duration::from_millis(delay)),
                    },
                    base_load: ctx.rng.random_range(BASE_LOAD_MIN..=BASE_LOAD_MAX),
                    ..Default::default()
                }
            })
            .collect();
        set_condition(&mut pod.status.conditions, "Ready", false, "ContainersNotReady", "", now);
    }

    fn crash_check(
        &self,
        spec: &ContainerSpec,
        status: &ContainerStatus,
        fault: Option<PodFault>,
        ctx: &mut TickContext<'_>,
    ) -> Option<CrashReason> {
        let limits = spec.resources.effective_limits();
        if limits.memory_bytes > 0 && status.usage.memory_bytes > limits.memory_bytes {
            return Some(CrashReason::OomKilled);
        }
        if fault == Some(PodFault::CrashLoop) {
            return Some(CrashReason::Error);
        }
        if self.random_failure_rate > 0.0 && ctx.rng.random_bool(self.random_failure_rate) {
            return Some(CrashReason::Error);
        }
        None
    }

    fn crash(&self, pod: &mut Pod, container: &str, reason: CrashReason, now: SimTime) {
        let never = pod.spec.restart_policy == RestartPolicy::Never;
        let Some(status) = pod
            .status
            .container_statuses
            .iter_mut()
            .find(|c| c.name == container)
        else {
            return;
        };
        status.ready = false;
        status.usage = Resources::default();
        status.liveness_failures = 0;
        status.readiness_failures = 0;
        status.last_termination_reason = Some(reason.as_str().to_string());
        if never {
            status.state = ContainerState::Terminated {
                reason: reason.as_str().to_string(),
                exit_code: reason.exit_code(),
            };
            pod.status.phase = PodPhase::Failed;
            pod.status.reason = Some(reason.as_str().to_string());
            set_condition(&mut pod.status.conditions, "Ready", false, "PodFailed", "", now);
            return;
        }
        let backoff = crash_backoff(status.restart_count);
        status.restart_count += 1;
        status.state = ContainerState::Waiting {
            reason: "CrashLoopBackOff".to_string(),
            until: Some(now + backoff),
        };
    }

    fn report(&self, res: &Resource, outcome: Outcome, ctx: &mut TickContext<'_>) {
        for (container, reason) in outcome.crashes {
            ctx.stats.container_restarts += 1;
            if reason == CrashReason::OomKilled {
                ctx.stats.oom_kills += 1;
            }
            let message = format!("container {} terminated: {}", container, reason.as_str());
            self.store
                .record_event(res.uid(), EventSeverity::Warning, reason.as_str(), &message);
            debug!("Pod {}: {}", res.key(), message);
        }
        if outcome.started {
            self.store
                .record_event(res.uid(), EventSeverity::Normal, "Started", "Started containers");
        }
        match outcome.finished {
            Some(PodPhase::Failed) => warn!("Pod {} failed", res.key()),
            Some(PodPhase::Succeeded) => info!("Pod {} completed", res.key()),
            _ => {}
        }
    }
}

/// Smoothed random walk toward `requests × base_load × load_factor`, plus leaked memory.
fn simulate_usage(
    spec: &ContainerSpec,
    status: &mut ContainerStatus,
    load_factor: f64,
    leak_per_sec: u64,
    running_for: Duration,
    ctx: &mut TickContext<'_>,
) {
    let basis = {
        let req = spec.resources.requests;
        let lim = spec.resources.effective_limits();
        Resources::new(
            if req.cpu_millis > 0 { req.cpu_millis } else { lim.cpu_millis },
            if req.memory_bytes > 0 { req.memory_bytes } else { lim.memory_bytes },
        )
    };
    let noise = ctx.rng.random_range(-0.1..=0.1);
    let level = status.base_load * load_factor.max(0.0) * (1.0 + noise);
    let cpu_target = basis.cpu_millis as f64 * level;
    let mem_target = basis.memory_bytes as f64 * status.base_load * (1.0 + noise / 2.0)
        + leak_per_sec as f64 * running_for.as_secs_f64();

    let smooth = |current: u64, target: f64| {
        let current = current as f64;
        (current + (target - current) * USAGE_SMOOTHING).max(0.0).round() as u64
    };
    status.usage.cpu_millis = smooth(status.usage.cpu_millis, cpu_target);
    // Leaked memory is not reclaimed by smoothing.
    let leaked = (leak_per_sec as f64 * running_for.as_secs_f64()) as u64;
    status.usage.memory_bytes = smooth(status.usage.memory_bytes, mem_target).max(leaked);
}

/// Update probe failure counters. Returns a crash reason when liveness gives up.
fn evaluate_probes(spec: &ContainerSpec, status: &mut ContainerStatus) -> Option<CrashReason> {
    if !matches!(status.state, ContainerState::Running { .. }) {
        return None;
    }
    let limits = spec.resources.effective_limits();
    let over = |used: u64, limit: u64| limit > 0 && used as f64 > limit as f64 * PROBE_FAILURE_RATIO;
    let failing = over(status.usage.cpu_millis, limits.cpu_millis)
        || over(status.usage.memory_bytes, limits.memory_bytes);

    if spec.readiness_probe.is_some() {
        status.readiness_failures = if failing { status.readiness_failures + 1 } else { 0 };
    }
    if let Some(liveness) = &spec.liveness_probe {
        status.liveness_failures = if failing { status.liveness_failures + 1 } else { 0 };
        if status.liveness_failures >= liveness.failure_threshold.max(1) {
            return Some(CrashReason::LivenessFailed);
        }
    }
    None
}

fn update_readiness(pod: &mut Pod, now: SimTime) {
    let specs = &pod.spec.containers;
    for (spec, status) in specs.iter().zip(pod.status.container_statuses.iter_mut()) {
        status.ready = match (&status.state, &spec.readiness_probe) {
            (ContainerState::Running { .. }, None) => true,
            (ContainerState::Running { started_at }, Some(probe)) => {
                now.since(*started_at) >= Duration::from_secs(probe.initial_delay_secs)
                    && status.readiness_failures < probe.failure_threshold.max(1)
            }
            _ => false,
        };
    }
    let ready = pod.status.phase == PodPhase::Running
        && !pod.status.container_statuses.is_empty()
        && pod.status.container_statuses.iter().all(|c| c.ready);
    let (reason, message) = if ready {
        ("PodReady", "")
    } else {
        ("ContainersNotReady", "containers with unready status")
    };
    set_condition(&mut pod.status.conditions, "Ready", ready, reason, message, now);
}

fn complete(pod: &mut Pod, now: SimTime) {
    pod.status.phase = PodPhase::Succeeded;
    pod.status.reason = Some("Completed".to_string());
    for status in &mut pod.status.container_statuses {
        status.state = ContainerState::Terminated {
            reason: "Completed".to_string(),
            exit_code: 0,
        };
        status.ready = false;
        status.usage = Resources::default();
    }
    set_condition(&mut pod.status.conditions, "Ready", false, "PodCompleted", "", now);
}
