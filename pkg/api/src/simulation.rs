use anyhow::Context;
use pkg_constants::engine::{
    DEFAULT_INCIDENT_INTERVAL_MS, DEFAULT_TICK_MS, MAX_FRAME_MS, MAX_TICKS_PER_ADVANCE,
    MAX_TIME_SCALE, MIN_TIME_SCALE,
};
use pkg_constants::store::DEFAULT_NAMESPACE;
use pkg_controllers::ControlLoopEngine;
use pkg_incidents::IncidentEngine;
use pkg_state::ClusterStore;
use pkg_state::store::Snapshot;
use pkg_types::config::{EngineConfig, IncidentConfig, SimConfigFile};
use pkg_types::resource::Resource;
use pkg_types::rng::derive_seed;
use pkg_types::stats::TickStats;
use pkg_types::time::SimTime;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::commands::Commands;
use crate::predicates::PredicateSet;

/// Resolved driver settings.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationConfig {
    pub tick: Duration,
    pub time_scale: f64,
    pub incident_interval: Duration,
    pub seed: Option<u64>,
    pub engine: EngineConfig,
    pub incidents: IncidentConfig,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_millis(DEFAULT_TICK_MS),
            time_scale: 1.0,
            incident_interval: Duration::from_millis(DEFAULT_INCIDENT_INTERVAL_MS),
            seed: None,
            engine: EngineConfig::default(),
            incidents: IncidentConfig::default(),
        }
    }
}

impl SimulationConfig {
    pub fn from_file(file: &SimConfigFile) -> Self {
        let defaults = Self::default();
        Self {
            tick: file
                .tick_ms
                .filter(|ms| *ms > 0)
                .map_or(defaults.tick, Duration::from_millis),
            time_scale: file.time_scale.unwrap_or(defaults.time_scale),
            incident_interval: file
                .incident_interval_ms
                .filter(|ms| *ms > 0)
                .map_or(defaults.incident_interval, Duration::from_millis),
            seed: file.seed,
            engine: file.engine.clone(),
            incidents: file.incidents.clone(),
        }
    }
}

/// Owns the store and both engines and turns real elapsed time into fixed
/// simulation ticks.
///
/// Real time is scaled by the time-scale, clamped per frame, and
/// accumulated; each whole tick runs the control loops once, and the
/// incident engine is fed every `incident_interval` of simulated time.
pub struct Simulation {
    store: ClusterStore,
    engine: ControlLoopEngine,
    incidents: IncidentEngine,
    commands: Commands,
    predicates: PredicateSet,
    tick: Duration,
    time_scale: f64,
    incident_interval: Duration,
    accumulator: Duration,
    incident_accumulator: Duration,
    paused: bool,
    last_stats: Option<TickStats>,
}

impl Simulation {
    pub fn new(config: SimulationConfig) -> Self {
        Self::with_store(ClusterStore::new(), config)
    }

    pub fn with_store(store: ClusterStore, config: SimulationConfig) -> Self {
        let engine = ControlLoopEngine::new(store.clone(), config.engine, derive_seed(config.seed, 1));
        let incidents = IncidentEngine::new(store.clone(), config.incidents, derive_seed(config.seed, 2));
        let mut sim = Self {
            commands: Commands::new(store.clone()),
            predicates: PredicateSet::new(),
            tick: if config.tick.is_zero() {
                Duration::from_millis(DEFAULT_TICK_MS)
            } else {
                config.tick
            },
            time_scale: 1.0,
            incident_interval: if config.incident_interval.is_zero() {
                Duration::from_millis(DEFAULT_INCIDENT_INTERVAL_MS)
            } else {
                config.incident_interval
            },
            accumulator: Duration::ZERO,
            incident_accumulator: Duration::ZERO,
            paused: false,
            last_stats: None,
            store,
            engine,
            incidents,
        };
        sim.set_time_scale(config.time_scale);
        sim
    }

    /// Add manifests before the first tick. Namespaced resources without a
    /// namespace land in `default`.
    pub fn bootstrap(&mut self, manifests: &[Resource]) -> anyhow::Result<usize> {
        for manifest in manifests {
            let mut res = manifest.clone();
            if res.kind().is_namespaced() && res.metadata.namespace.is_empty() {
                res.metadata.namespace = DEFAULT_NAMESPACE.to_string();
            }
            let key = res.key();
            self.store
                .add(res)
                .with_context(|| format!("bootstrap {}", key))?;
        }
        info!("Bootstrapped {} resources", manifests.len());
        Ok(manifests.len())
    }

    /// Feed `real_dt` of wall-clock time. Returns the number of ticks run.
    pub fn advance(&mut self, real_dt: Duration) -> u32 {
        if self.paused {
            return 0;
        }
        let frame = real_dt.min(Duration::from_millis(MAX_FRAME_MS));
        self.accumulator += frame.mul_f64(self.time_scale);

        let mut ticks = 0;
        while self.accumulator >= self.tick && ticks < MAX_TICKS_PER_ADVANCE {
            self.accumulator -= self.tick;
            self.run_tick();
            ticks += 1;
        }
        if ticks == MAX_TICKS_PER_ADVANCE && self.accumulator >= self.tick {
            debug!("Dropping {:?} of backlog", self.accumulator);
            self.accumulator = Duration::ZERO;
        }
        ticks
    }

    /// Run exactly one tick, ignoring real time. `None` while paused.
    pub fn step(&mut self) -> Option<TickStats> {
        if self.paused {
            return None;
        }
        self.run_tick()
    }

    /// Run ticks until `duration` of simulated time has passed.
    pub fn run_for(&mut self, duration: Duration) -> u64 {
        let target = self.now() + duration;
        let mut ticks = 0;
        while !self.paused && self.now() < target {
            self.run_tick();
            ticks += 1;
        }
        ticks
    }

    fn run_tick(&mut self) -> Option<TickStats> {
        let stats = self.engine.tick(self.tick)?;
        self.incident_accumulator += self.tick;
        while self.incident_accumulator >= self.incident_interval {
            self.incident_accumulator -= self.incident_interval;
            self.incidents.update(self.incident_interval);
        }
        for name in self.predicates.evaluate(&self.store) {
            info!("Condition met: {}", name);
        }
        self.last_stats = Some(stats.clone());
        Some(stats)
    }

    pub fn pause(&mut self) {
        if !self.paused {
            info!("Simulation paused at {}", self.now());
        }
        self.paused = true;
        self.engine.pause();
        self.incidents.pause();
    }

    /// Resume without catching up on the time spent paused.
    pub fn resume(&mut self) {
        if self.paused {
            info!("Simulation resumed at {}", self.now());
        }
        self.paused = false;
        self.accumulator = Duration::ZERO;
        self.engine.resume();
        self.incidents.resume();
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn time_scale(&self) -> f64 {
        self.time_scale
    }

    pub fn set_time_scale(&mut self, scale: f64) {
        if !scale.is_finite() {
            warn!("Ignoring time scale {}", scale);
            return;
        }
        let clamped = scale.clamp(MIN_TIME_SCALE, MAX_TIME_SCALE);
        if clamped != scale {
            warn!("Time scale {} clamped to {}", scale, clamped);
        }
        self.time_scale = clamped;
    }

    pub fn tick_interval(&self) -> Duration {
        self.tick
    }

    pub fn now(&self) -> SimTime {
        self.engine.now()
    }

    pub fn store(&self) -> &ClusterStore {
        &self.store
    }

    pub fn commands(&self) -> &Commands {
        &self.commands
    }

    pub fn engine(&self) -> &ControlLoopEngine {
        &self.engine
    }

    pub fn incidents(&self) -> &IncidentEngine {
        &self.incidents
    }

    pub fn incidents_mut(&mut self) -> &mut IncidentEngine {
        &mut self.incidents
    }

    pub fn predicates(&self) -> &PredicateSet {
        &self.predicates
    }

    pub fn predicates_mut(&mut self) -> &mut PredicateSet {
        &mut self.predicates
    }

    pub fn last_stats(&self) -> Option<&TickStats> {
        self.last_stats.as_ref()
    }

    pub fn snapshot(&self) -> Snapshot {
        self.store.snapshot()
    }
}
