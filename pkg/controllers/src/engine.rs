use pkg_constants::engine::{
    AUTOSCALE_INTERVAL_SECS, PROBE_INTERVAL_SECS, QUOTA_INTERVAL_SECS,
};
use pkg_state::ClusterStore;
use pkg_state::watch::ClusterEvent;
use pkg_types::config::EngineConfig;
use pkg_types::rng::sim_rng;
use pkg_types::stats::TickStats;
use pkg_types::time::SimTime;
use rand::rngs::StdRng;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::chaos::ChaosController;
use crate::context::TickContext;
use crate::cronjob::CronJobController;
use crate::daemonset::DaemonSetController;
use crate::deployment::DeploymentController;
use crate::eviction::EvictionController;
use crate::hpa::HPAController;
use crate::job::JobController;
use crate::lifecycle::PodLifecycleController;
use crate::node::NodeController;
use crate::quota::QuotaController;
use crate::replicaset::ReplicaSetController;
use crate::scheduling::SchedulingController;
use crate::service::ServiceController;
use crate::statefulset::StatefulSetController;

/// Last run of each slower-cadence loop.
#[derive(Default)]
struct Cadence {
    autoscale: SimTime,
    probe: SimTime,
    quota: SimTime,
    chaos: SimTime,
}

/// Runs every control loop once per fixed tick, in dependency order:
/// node health, scheduling, pod lifecycle, workload controllers, then the
/// autoscaler, quota and service loops on their own cadences.
pub struct ControlLoopEngine {
    store: ClusterStore,
    config: EngineConfig,
    rng: StdRng,
    now: SimTime,
    ticks: u64,
    paused: bool,
    cadence: Cadence,

    nodes: NodeController,
    eviction: EvictionController,
    scheduling: SchedulingController,
    lifecycle: PodLifecycleController,
    deployments: DeploymentController,
    replicasets: ReplicaSetController,
    statefulsets: StatefulSetController,
    daemonsets: DaemonSetController,
    jobs: JobController,
    cronjobs: CronJobController,
    autoscaler: HPAController,
    quota: QuotaController,
    services: ServiceController,
    chaos: ChaosController,
}

impl ControlLoopEngine {
    pub fn new(store: ClusterStore, config: EngineConfig, seed: Option<u64>) -> Self {
        info!(
            "Control loop engine starting (failure rate={}, eviction grace={}s, chaos={})",
            config.random_failure_rate, config.eviction_grace_secs, config.chaos.enabled
        );
        Self {
            nodes: NodeController::new(store.clone()),
            eviction: EvictionController::new(
                store.clone(),
                Duration::from_secs(config.eviction_grace_secs),
            ),
            scheduling: SchedulingController::new(store.clone()),
            lifecycle: PodLifecycleController::new(store.clone(), config.random_failure_rate),
            deployments: DeploymentController::new(store.clone()),
            replicasets: ReplicaSetController::new(store.clone()),
            statefulsets: StatefulSetController::new(store.clone()),
            daemonsets: DaemonSetController::new(store.clone()),
            jobs: JobController::new(store.clone()),
            cronjobs: CronJobController::new(store.clone()),
            autoscaler: HPAController::new(store.clone()),
            quota: QuotaController::new(store.clone()),
            services: ServiceController::new(store.clone()),
            chaos: ChaosController::new(store.clone(), config.chaos.pod_kill_probability),
            rng: sim_rng(seed),
            now: store.now(),
            ticks: 0,
            paused: false,
            cadence: Cadence::default(),
            config,
            store,
        }
    }

    pub fn store(&self) -> &ClusterStore {
        &self.store
    }

    pub fn now(&self) -> SimTime {
        self.now
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn pause(&mut self) {
        if !self.paused {
            info!("Control loop engine paused at {}", self.now);
        }
        self.paused = true;
    }

    pub fn resume(&mut self) {
        if self.paused {
            info!("Control loop engine resumed at {}", self.now);
        }
        self.paused = false;
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Advance simulated time by `dt` and run one pass of every loop.
    /// Returns `None` while paused.
    pub fn tick(&mut self, dt: Duration) -> Option<TickStats> {
        if self.paused {
            return None;
        }
        self.now += dt;
        self.ticks += 1;
        let now = self.now;
        self.store.set_time(now);
        self.store.begin_batch();

        let mut stats = TickStats {
            tick: self.ticks,
            sim_time: now,
            ..Default::default()
        };
        let probe = due(&mut self.cadence.probe, now, PROBE_INTERVAL_SECS);
        let autoscale = due(&mut self.cadence.autoscale, now, AUTOSCALE_INTERVAL_SECS);
        let quota = due(&mut self.cadence.quota, now, QUOTA_INTERVAL_SECS);
        let chaos = self.config.chaos.enabled
            && due(&mut self.cadence.chaos, now, self.config.chaos.interval_secs.max(1));

        {
            let mut ctx = TickContext {
                now,
                dt,
                rng: &mut self.rng,
                stats: &mut stats,
            };
            step("node", self.nodes.reconcile(&mut ctx));
            step("eviction", self.eviction.reconcile(&mut ctx));
            step("scheduler", self.scheduling.reconcile(&mut ctx));
            step("lifecycle", self.lifecycle.reconcile(&mut ctx, probe));
            step("deployment", self.deployments.reconcile(&mut ctx));
            step("replicaset", self.replicasets.reconcile(&mut ctx));
            step("statefulset", self.statefulsets.reconcile(&mut ctx));
            step("daemonset", self.daemonsets.reconcile(&mut ctx));
            step("job", self.jobs.reconcile(&mut ctx));
            step("cronjob", self.cronjobs.reconcile(&mut ctx));
            if autoscale {
                step("autoscaler", self.autoscaler.reconcile(&mut ctx));
            }
            if quota {
                step("quota", self.quota.reconcile(&mut ctx));
            }
            step("service", self.services.reconcile(&mut ctx));
            if chaos {
                step("chaos", self.chaos.reconcile(&mut ctx).map(|_| ()));
            }
        }

        stats.summary = self.store.summary();
        self.store.end_batch();
        self.store
            .bus()
            .emit(ClusterEvent::TickCompleted(stats.clone()));
        debug!(
            "Tick {} at {}: scheduled={} created={} deleted={} restarts={}",
            stats.tick,
            now,
            stats.pods_scheduled,
            stats.pods_created,
            stats.pods_deleted,
            stats.container_restarts
        );
        Some(stats)
    }
}

/// True when `interval_secs` has passed since `*last`; records the run.
fn due(last: &mut SimTime, now: SimTime, interval_secs: u64) -> bool {
    if now.since(*last) >= Duration::from_secs(interval_secs) {
        *last = now;
        true
    } else {
        false
    }
}

fn step(name: &str, result: anyhow::Result<()>) {
    if let Err(e) = result {
        warn!("{} loop failed: {}", name, e);
    }
}
