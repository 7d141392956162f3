use anyhow::{Context, bail};
use pkg_constants::incident::{
    COMBO_MAX_MULTIPLIER, COMBO_STEP, COMBO_WINDOW_SECS, MAX_CASCADE_DEPTH, MAX_DIFFICULTY,
    MIN_DIFFICULTY, SEVERITY_REWARDS, SPEED_BONUS_RATIO, SPEED_BONUS_SECS,
};
use pkg_constants::store::DEFAULT_NAMESPACE;
use pkg_state::ClusterStore;
use pkg_state::watch::ClusterEvent;
use pkg_types::config::IncidentConfig;
use pkg_types::incident::{
    Incident, IncidentDefinition, IncidentEvent, IncidentId, IncidentState, IncidentTarget,
    InvestigationStep, ResolutionReward, ScriptedIncident, Severity,
};
use pkg_types::pod::PodPhase;
use pkg_types::resource::{Resource, ResourceKind};
use pkg_types::rng::sim_rng;
use pkg_types::time::SimTime;
use rand::Rng;
use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::catalog;
use crate::effects;
use crate::timers::CascadeQueue;

#[derive(Debug, Default)]
struct ComboTracker {
    streak: u32,
    last_resolved_at: Option<SimTime>,
}

/// Spawns incidents against cluster resources, runs them through
/// `Created -> Active -> Investigating -> Resolved`, and fires delayed
/// cascade follow-ons on simulated time.
///
/// The engine keeps its own clock, advanced by [`IncidentEngine::update`];
/// it never touches the control loops directly, only the store.
pub struct IncidentEngine {
    store: ClusterStore,
    config: IncidentConfig,
    definitions: BTreeMap<String, IncidentDefinition>,
    incidents: BTreeMap<IncidentId, Incident>,
    next_id: IncidentId,
    rng: StdRng,
    now: SimTime,
    difficulty: f64,
    paused: bool,
    scripted: VecDeque<ScriptedIncident>,
    timers: CascadeQueue,
    combo: ComboTracker,
}

impl IncidentEngine {
    pub fn new(store: ClusterStore, config: IncidentConfig, seed: Option<u64>) -> Self {
        let definitions = catalog::load(&config);
        let mut scripted = config.scripted.clone();
        scripted.sort_by(|a, b| a.trigger_at_secs.total_cmp(&b.trigger_at_secs));
        let difficulty = config.initial_difficulty.clamp(MIN_DIFFICULTY, MAX_DIFFICULTY);
        info!(
            "Incident engine starting ({} definitions, {} scripted, difficulty {:.1})",
            definitions.len(),
            scripted.len(),
            difficulty
        );
        Self {
            store,
            definitions,
            incidents: BTreeMap::new(),
            next_id: 1,
            rng: sim_rng(seed),
            now: SimTime::ZERO,
            difficulty: if difficulty.is_finite() { difficulty } else { MIN_DIFFICULTY },
            paused: false,
            scripted: scripted.into(),
            timers: CascadeQueue::default(),
            combo: ComboTracker::default(),
            config,
        }
    }

    pub fn now(&self) -> SimTime {
        self.now
    }

    pub fn definitions(&self) -> &BTreeMap<String, IncidentDefinition> {
        &self.definitions
    }

    pub fn get(&self, id: IncidentId) -> Option<&Incident> {
        self.incidents.get(&id)
    }

    pub fn incidents(&self) -> impl Iterator<Item = &Incident> {
        self.incidents.values()
    }

    /// Active or Investigating incidents.
    pub fn open_incidents(&self) -> Vec<&Incident> {
        self.incidents
            .values()
            .filter(|i| i.state.is_open())
            .collect()
    }

    pub fn pending_cascades(&self) -> usize {
        self.timers.len()
    }

    pub fn combo_streak(&self) -> u32 {
        self.combo.streak
    }

    pub fn difficulty(&self) -> f64 {
        self.difficulty
    }

    /// Raise the difficulty. Lowering is ignored.
    pub fn set_difficulty(&mut self, difficulty: f64) {
        let difficulty = difficulty.clamp(MIN_DIFFICULTY, MAX_DIFFICULTY);
        if difficulty > self.difficulty {
            info!(
                "Incident difficulty {:.1} -> {:.1}",
                self.difficulty, difficulty
            );
            self.difficulty = difficulty;
        }
    }

    pub fn pause(&mut self) {
        self.paused = true;
    }

    pub fn resume(&mut self) {
        self.paused = false;
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Advance the engine clock by `dt`: fire due scripted entries and
    /// cascade timers, auto-resolve timed-out incidents, then roll for a
    /// random spawn. Returns the ids spawned by this update.
    pub fn update(&mut self, dt: Duration) -> Vec<IncidentId> {
        if self.paused {
            return Vec::new();
        }
        self.now += dt;
        self.ramp_difficulty();

        let mut spawned = Vec::new();
        self.fire_scripted(&mut spawned);
        self.fire_cascades(&mut spawned);
        self.auto_resolve();
        if let Some(id) = self.spawn_random() {
            spawned.push(id);
        }
        spawned
    }

    /// Spawn `definition_id` now. Without `target_uid` a random eligible
    /// target of the definition's kind is picked.
    pub fn spawn(&mut self, definition_id: &str, target_uid: Option<&str>) -> anyhow::Result<IncidentId> {
        let def = self
            .definitions
            .get(definition_id)
            .cloned()
            .with_context(|| format!("unknown incident definition {}", definition_id))?;
        let target = match target_uid {
            Some(uid) => {
                let res = self
                    .store
                    .get(uid)
                    .with_context(|| format!("target {} not found", uid))?;
                if let Some(kind) = def.target_kind()
                    && kind != res.kind()
                {
                    bail!("incident {} targets {}, not {}", def.id, kind, res.key());
                }
                Some(target_of(&res))
            }
            None => match def.target_kind() {
                Some(kind) => Some(
                    self.pick_target(kind)
                        .with_context(|| format!("no eligible {} for incident {}", kind, def.id))?,
                ),
                None => None,
            },
        };
        let severity = def.severity;
        Ok(self.create(def, target, None, severity))
    }

    /// Active -> Investigating. Already investigating is a no-op.
    pub fn start_investigation(&mut self, id: IncidentId) -> anyhow::Result<()> {
        let incident = self
            .incidents
            .get_mut(&id)
            .with_context(|| format!("incident {} not found", id))?;
        match incident.state {
            IncidentState::Active => {
                incident.state = IncidentState::Investigating;
                self.emit(IncidentEvent::Investigating { id });
                Ok(())
            }
            IncidentState::Investigating => Ok(()),
            state => bail!("incident {} is {}", id, state),
        }
    }

    /// Mark investigation step `index` done; an Active incident moves to
    /// Investigating.
    pub fn complete_step(&mut self, id: IncidentId, index: usize) -> anyhow::Result<()> {
        let now = self.now;
        let incident = self
            .incidents
            .get_mut(&id)
            .with_context(|| format!("incident {} not found", id))?;
        if !incident.state.is_open() {
            bail!("incident {} is {}", id, incident.state);
        }
        let step = incident
            .investigation_steps
            .get_mut(index)
            .with_context(|| format!("incident {} has no step {}", id, index))?;
        if !step.completed {
            step.completed = true;
            step.completed_at = Some(now);
        }
        let began = incident.state == IncidentState::Active;
        if began {
            incident.state = IncidentState::Investigating;
        }
        if began {
            self.emit(IncidentEvent::Investigating { id });
        }
        self.emit(IncidentEvent::StepCompleted { id, step: index });
        Ok(())
    }

    /// Resolve an open incident, revert its fault and score it.
    /// Cascade children are left as they are.
    pub fn resolve(&mut self, id: IncidentId) -> anyhow::Result<ResolutionReward> {
        let incident = self
            .incidents
            .get(&id)
            .with_context(|| format!("incident {} not found", id))?;
        if !incident.state.is_open() {
            bail!("incident {} is {}", id, incident.state);
        }
        self.close(id, false)
            .with_context(|| format!("incident {} produced no reward", id))
    }

    fn create(
        &mut self,
        def: IncidentDefinition,
        target: Option<IncidentTarget>,
        parent: Option<IncidentId>,
        severity: Severity,
    ) -> IncidentId {
        let id = self.next_id;
        self.next_id += 1;
        let depth = parent
            .and_then(|p| self.incidents.get(&p))
            .map_or(0, |p| p.cascade_depth + 1);

        let mut incident = Incident {
            id,
            definition_id: def.id.clone(),
            title: def.title.clone(),
            severity,
            state: IncidentState::Created,
            target,
            investigation_steps: def
                .investigation_steps
                .iter()
                .map(|description| InvestigationStep {
                    description: description.clone(),
                    completed: false,
                    completed_at: None,
                })
                .collect(),
            cascade_parent: parent,
            cascade_children: Vec::new(),
            cascade_depth: depth,
            created_at: self.now,
            activated_at: None,
            resolved_at: None,
            auto_resolved: false,
            reward: None,
        };
        self.emit(IncidentEvent::Created {
            id,
            definition_id: def.id.clone(),
            severity,
            target: incident.target.clone(),
        });
        info!(
            "Incident {} ({}) opened: {} severity={} target={}",
            id,
            def.id,
            def.title,
            severity.level(),
            incident.target.as_ref().map_or("-", |t| t.name.as_str())
        );

        if let Some(target) = &incident.target
            && let Err(e) = effects::apply(&self.store, &def.effect, target)
        {
            warn!("Incident {}: fault not applied: {}", id, e);
        }
        incident.state = IncidentState::Active;
        incident.activated_at = Some(self.now);
        self.emit(IncidentEvent::Activated { id });

        for rule in &def.cascades {
            if self.rng.random_bool(probability(rule.probability)) {
                let delay = Duration::try_from_secs_f64(rule.delay_secs.max(0.0)).unwrap_or_default();
                debug!(
                    "Incident {}: cascade {} armed in {:?}",
                    id, rule.child_definition, delay
                );
                self.timers.schedule(self.now + delay, id, rule.clone());
            }
        }
        self.incidents.insert(id, incident);

        if let Some(parent_id) = parent
            && let Some(p) = self.incidents.get_mut(&parent_id)
        {
            p.cascade_children.push(id);
            self.emit(IncidentEvent::Cascade {
                parent: parent_id,
                child: id,
            });
        }
        id
    }

    fn close(&mut self, id: IncidentId, auto: bool) -> Option<ResolutionReward> {
        let incident = self.incidents.get(&id)?;
        let severity = incident.severity;
        let activated_at = incident.activated_at;
        if let Some(target) = &incident.target
            && let Some(def) = self.definitions.get(&incident.definition_id)
            && let Err(e) = effects::revert(&self.store, &def.effect, target)
        {
            warn!("Incident {}: fault not reverted: {}", id, e);
        }

        let reward = if auto {
            None
        } else {
            Some(self.score(severity, activated_at))
        };
        let now = self.now;
        let incident = self.incidents.get_mut(&id)?;
        incident.state = IncidentState::Resolved;
        incident.resolved_at = Some(now);
        incident.auto_resolved = auto;
        incident.reward = reward;
        info!(
            "Incident {} ({}) resolved{}{}",
            id,
            incident.definition_id,
            if auto { " automatically" } else { "" },
            reward.map_or(String::new(), |r| format!(", reward {}", r.total))
        );
        self.emit(IncidentEvent::Resolved { id, auto, reward });
        reward
    }

    fn score(&mut self, severity: Severity, activated_at: Option<SimTime>) -> ResolutionReward {
        let base = SEVERITY_REWARDS[usize::from(severity.level() - 1)];
        let in_window = self
            .combo
            .last_resolved_at
            .is_some_and(|t| self.now.since(t) <= Duration::from_secs(COMBO_WINDOW_SECS));
        self.combo.streak = if in_window { self.combo.streak + 1 } else { 1 };
        self.combo.last_resolved_at = Some(self.now);

        let combo_multiplier =
            (1.0 + COMBO_STEP * f64::from(self.combo.streak - 1)).min(COMBO_MAX_MULTIPLIER);
        let fast = activated_at
            .is_some_and(|a| self.now.since(a) < Duration::from_secs(SPEED_BONUS_SECS));
        let speed_bonus = if fast {
            (f64::from(base) * SPEED_BONUS_RATIO).round() as u32
        } else {
            0
        };
        ResolutionReward {
            base,
            combo_multiplier,
            speed_bonus,
            total: (f64::from(base) * combo_multiplier).round() as u32 + speed_bonus,
        }
    }

    fn ramp_difficulty(&mut self) {
        let ramp = self.config.difficulty_ramp_secs;
        if ramp == 0 {
            return;
        }
        let ramped = self.config.initial_difficulty + self.now.as_secs_f64() / ramp as f64;
        self.set_difficulty(ramped);
    }

    /// Open-incident ceiling for random spawns.
    fn ceiling(&self) -> usize {
        (1 + (self.difficulty / 2.0).floor() as usize).min(self.config.max_active)
    }

    fn max_severity(&self) -> u8 {
        (1 + (self.difficulty / 2.0).floor() as u8).min(Severity::MAX.level())
    }

    fn fire_scripted(&mut self, spawned: &mut Vec<IncidentId>) {
        let elapsed = self.now.as_secs_f64();
        while self
            .scripted
            .front()
            .is_some_and(|s| s.trigger_at_secs <= elapsed)
        {
            let Some(entry) = self.scripted.pop_front() else { break };
            match self.spawn_scripted(&entry) {
                Ok(id) => spawned.push(id),
                Err(e) => warn!("Scripted incident {} skipped: {}", entry.definition_id, e),
            }
        }
    }

    fn spawn_scripted(&mut self, entry: &ScriptedIncident) -> anyhow::Result<IncidentId> {
        let Some(name) = &entry.target_name else {
            return self.spawn(&entry.definition_id, None);
        };
        let kind = self
            .definitions
            .get(&entry.definition_id)
            .and_then(|d| d.target_kind())
            .with_context(|| format!("{} takes no target", entry.definition_id))?;
        let namespace = match &entry.target_namespace {
            Some(ns) => ns.as_str(),
            None if kind.is_namespaced() => DEFAULT_NAMESPACE,
            None => "",
        };
        let res = self
            .store
            .get_by_name(kind, namespace, name)
            .with_context(|| format!("{} {} not found", kind, name))?;
        self.spawn(&entry.definition_id, Some(res.uid()))
    }

    fn fire_cascades(&mut self, spawned: &mut Vec<IncidentId>) {
        for timer in self.timers.drain_due(self.now) {
            let Some(parent) = self.incidents.get(&timer.parent) else {
                continue;
            };
            if parent.is_resolved() {
                debug!(
                    "Incident {}: parent resolved, cascade {} dropped",
                    timer.parent, timer.rule.child_definition
                );
                continue;
            }
            if parent.cascade_depth + 1 > MAX_CASCADE_DEPTH {
                debug!("Incident {}: cascade depth limit reached", timer.parent);
                continue;
            }
            let parent_target = parent.target.clone();
            let Some(def) = self.definitions.get(&timer.rule.child_definition).cloned() else {
                warn!(
                    "Incident {}: unknown cascade definition {}",
                    timer.parent, timer.rule.child_definition
                );
                continue;
            };
            let target = match def.target_kind() {
                None => None,
                Some(kind) => {
                    let inherited = parent_target
                        .filter(|t| t.kind == kind && self.store.contains(&t.uid));
                    match inherited.or_else(|| self.pick_target(kind)) {
                        Some(t) => Some(t),
                        None => {
                            debug!("Incident {}: no {} for cascade {}", timer.parent, kind, def.id);
                            continue;
                        }
                    }
                }
            };
            let severity = timer.rule.severity.unwrap_or(def.severity);
            spawned.push(self.create(def, target, Some(timer.parent), severity));
        }
    }

    fn auto_resolve(&mut self) {
        let now = self.now;
        let due: Vec<IncidentId> = self
            .incidents
            .values()
            .filter(|i| i.state.is_open())
            .filter(|i| {
                let Some(secs) = self
                    .definitions
                    .get(&i.definition_id)
                    .and_then(|d| d.auto_resolve_secs)
                else {
                    return false;
                };
                i.activated_at
                    .is_some_and(|a| now.since(a) >= Duration::from_secs(secs))
            })
            .map(|i| i.id)
            .collect();
        for id in due {
            self.close(id, true);
        }
    }

    fn spawn_random(&mut self) -> Option<IncidentId> {
        if !self.config.enabled {
            return None;
        }
        let open = self.incidents.values().filter(|i| i.state.is_open()).count();
        if open >= self.ceiling() {
            return None;
        }
        if !self.rng.random_bool(probability(self.config.spawn_chance)) {
            return None;
        }

        let difficulty = self.difficulty;
        let max_severity = self.max_severity();
        let bias = self.config.difficulty_bias;
        let pool: Vec<&IncidentDefinition> = self
            .definitions
            .values()
            .filter(|d| {
                d.min_difficulty <= difficulty && d.severity.level() <= max_severity && d.weight > 0.0
            })
            .collect();
        let def = (*pool
            .choose_weighted(&mut self.rng, |d| spawn_weight(d, difficulty, bias))
            .ok()?)
        .clone();

        let target = match def.target_kind() {
            Some(kind) => match self.pick_target(kind) {
                Some(t) => Some(t),
                None => {
                    debug!("No eligible {} for incident {}", kind, def.id);
                    return None;
                }
            },
            None => None,
        };
        let severity = def.severity;
        Some(self.create(def, target, None, severity))
    }

    fn pick_target(&mut self, kind: ResourceKind) -> Option<IncidentTarget> {
        let candidates: Vec<Resource> = self
            .store
            .list_kind(kind)
            .into_iter()
            .filter(is_eligible_target)
            .collect();
        candidates.choose(&mut self.rng).map(target_of)
    }

    fn emit(&self, event: IncidentEvent) {
        self.store.bus().emit(ClusterEvent::Incident(event));
    }
}

/// Pods must be running, nodes ready; anything else just has to exist.
fn is_eligible_target(res: &Resource) -> bool {
    if res.metadata.is_terminating() {
        return false;
    }
    match res.kind() {
        ResourceKind::Pod => res.is_active_pod() && res.pod_phase() == Some(PodPhase::Running),
        ResourceKind::Node => res.as_node().is_some_and(|n| n.status.ready),
        _ => true,
    }
}

fn target_of(res: &Resource) -> IncidentTarget {
    IncidentTarget {
        kind: res.kind(),
        uid: res.uid().to_string(),
        name: res.name().to_string(),
        namespace: res.namespace().to_string(),
    }
}

/// Severe incidents grow more likely as difficulty rises.
fn spawn_weight(def: &IncidentDefinition, difficulty: f64, bias: f64) -> f64 {
    let severity = f64::from(def.severity.level() - 1);
    (def.weight * (1.0 + bias * severity * difficulty / 10.0)).max(0.0)
}

fn probability(p: f64) -> f64 {
    if p.is_finite() { p.clamp(0.0, 1.0) } else { 0.0 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pkg_state::watch::Topic;
    use pkg_types::incident::{CascadeRule, FaultEffect};
    use pkg_types::meta::ObjectMeta;
    use pkg_types::pod::{Pod, PodFault, PodSpec};
    use pkg_types::resource::Object;

    const SEC: Duration = Duration::from_secs(1);

    fn def(id: &str, severity: u8) -> IncidentDefinition {
        IncidentDefinition {
            id: id.to_string(),
            title: id.to_string(),
            description: String::new(),
            severity: Severity::new(severity),
            effect: FaultEffect::NoEffect,
            target_kind: None,
            investigation_steps: vec!["look".to_string(), "fix".to_string()],
            auto_resolve_secs: None,
            cascades: Vec::new(),
            weight: 1.0,
            min_difficulty: 1.0,
        }
    }

    fn cascade_to(child: &str, delay_secs: f64) -> CascadeRule {
        CascadeRule {
            child_definition: child.to_string(),
            probability: 1.0,
            delay_secs,
            severity: None,
        }
    }

    fn engine_with(store: ClusterStore, definitions: Vec<IncidentDefinition>) -> IncidentEngine {
        IncidentEngine::new(
            store,
            IncidentConfig {
                enabled: false,
                replace_builtin: true,
                difficulty_ramp_secs: 0,
                definitions,
                ..Default::default()
            },
            Some(11),
        )
    }

    fn advance(engine: &mut IncidentEngine, secs: u64) {
        for _ in 0..secs {
            engine.update(SEC);
        }
    }

    #[test]
    fn auto_resolves_after_timeout_without_reward() {
        let timed = IncidentDefinition {
            auto_resolve_secs: Some(60),
            ..def("timed", 3)
        };
        let mut engine = engine_with(ClusterStore::new(), vec![timed]);
        let id = engine.spawn("timed", None).unwrap();
        assert_eq!(engine.get(id).unwrap().state, IncidentState::Active);

        advance(&mut engine, 59);
        assert!(engine.get(id).unwrap().state.is_open());
        advance(&mut engine, 2);
        let incident = engine.get(id).unwrap();
        assert_eq!(incident.state, IncidentState::Resolved);
        assert!(incident.auto_resolved);
        assert_eq!(incident.reward, None);
    }

    #[test]
    fn cascade_spawns_one_linked_child_after_delay() {
        let parent = IncidentDefinition {
            cascades: vec![cascade_to("child", 5.0)],
            ..def("parent", 2)
        };
        let mut engine = engine_with(ClusterStore::new(), vec![parent, def("child", 1)]);
        let root = engine.spawn("parent", None).unwrap();

        advance(&mut engine, 4);
        assert!(engine.get(root).unwrap().cascade_children.is_empty());
        advance(&mut engine, 1);
        let children = engine.get(root).unwrap().cascade_children.clone();
        assert_eq!(children.len(), 1);
        let child = engine.get(children[0]).unwrap();
        assert_eq!(child.cascade_parent, Some(root));
        assert_eq!(child.cascade_depth, 1);

        advance(&mut engine, 10);
        assert_eq!(engine.incidents().count(), 2);
    }

    #[test]
    fn cascade_dropped_once_parent_resolves() {
        let parent = IncidentDefinition {
            cascades: vec![cascade_to("child", 5.0)],
            ..def("parent", 2)
        };
        let mut engine = engine_with(ClusterStore::new(), vec![parent, def("child", 1)]);
        let root = engine.spawn("parent", None).unwrap();
        advance(&mut engine, 2);
        engine.resolve(root).unwrap();
        advance(&mut engine, 10);

        assert_eq!(engine.incidents().count(), 1);
        assert_eq!(engine.pending_cascades(), 0);
    }

    #[test]
    fn cascade_depth_is_bounded() {
        let looping = IncidentDefinition {
            cascades: vec![cascade_to("loop", 1.0)],
            ..def("loop", 1)
        };
        let mut engine = engine_with(ClusterStore::new(), vec![looping]);
        engine.spawn("loop", None).unwrap();
        advance(&mut engine, 20);

        let depths: Vec<u32> = engine.incidents().map(|i| i.cascade_depth).collect();
        assert_eq!(depths, vec![0, 1, 2, MAX_CASCADE_DEPTH]);
    }

    #[test]
    fn pause_suspends_timers() {
        let parent = IncidentDefinition {
            cascades: vec![cascade_to("child", 5.0)],
            ..def("parent", 2)
        };
        let mut engine = engine_with(ClusterStore::new(), vec![parent, def("child", 1)]);
        let root = engine.spawn("parent", None).unwrap();
        advance(&mut engine, 2);

        engine.pause();
        advance(&mut engine, 30);
        assert_eq!(engine.now(), SimTime::from_secs(2));
        assert!(engine.get(root).unwrap().cascade_children.is_empty());

        engine.resume();
        advance(&mut engine, 3);
        assert_eq!(engine.get(root).unwrap().cascade_children.len(), 1);
    }

    #[test]
    fn combo_grows_inside_window_and_resets_after() {
        let mut engine = engine_with(ClusterStore::new(), vec![def("outage", 3)]);
        let a = engine.spawn("outage", None).unwrap();
        let b = engine.spawn("outage", None).unwrap();
        let c = engine.spawn("outage", None).unwrap();

        advance(&mut engine, 10);
        let first = engine.resolve(a).unwrap();
        assert_eq!(first.base, 50);
        assert_eq!(first.combo_multiplier, 1.0);
        assert_eq!(first.speed_bonus, 25);
        assert_eq!(first.total, 75);

        advance(&mut engine, 10);
        let second = engine.resolve(b).unwrap();
        assert_eq!(second.combo_multiplier, 1.25);
        assert_eq!(engine.combo_streak(), 2);

        advance(&mut engine, 70);
        let third = engine.resolve(c).unwrap();
        assert_eq!(third.combo_multiplier, 1.0);
        assert_eq!(third.speed_bonus, 0);
        assert_eq!(third.total, 50);
    }

    #[test]
    fn investigation_flow() {
        let store = ClusterStore::new();
        let mut sub = store.bus().subscribe(Topic::Incidents);
        let mut engine = engine_with(store, vec![def("outage", 2)]);
        let id = engine.spawn("outage", None).unwrap();

        engine.complete_step(id, 0).unwrap();
        assert_eq!(engine.get(id).unwrap().state, IncidentState::Investigating);
        assert!(engine.get(id).unwrap().investigation_steps[0].completed);
        assert!(engine.complete_step(id, 9).is_err());
        engine.start_investigation(id).unwrap();

        engine.resolve(id).unwrap();
        assert!(engine.resolve(id).is_err());
        assert!(engine.start_investigation(id).is_err());
        assert!(engine.resolve(999).is_err());

        let kinds: Vec<_> = sub
            .drain()
            .into_iter()
            .filter_map(|e| match e.event {
                ClusterEvent::Incident(ev) => Some(ev),
                _ => None,
            })
            .collect();
        assert!(matches!(kinds[0], IncidentEvent::Created { .. }));
        assert!(matches!(kinds[1], IncidentEvent::Activated { .. }));
        assert!(matches!(kinds[2], IncidentEvent::Investigating { .. }));
        assert!(matches!(kinds[3], IncidentEvent::StepCompleted { step: 0, .. }));
        assert!(matches!(
            kinds.last(),
            Some(IncidentEvent::Resolved { auto: false, reward: Some(_), .. })
        ));
    }

    #[test]
    fn fault_applied_on_spawn_and_reverted_on_resolve() {
        let store = ClusterStore::new();
        let mut pod = Resource::new(
            ObjectMeta::new("api-0", "default"),
            Object::Pod(Pod::new(PodSpec::default())),
        );
        if let Some(p) = pod.as_pod_mut() {
            p.status.phase = PodPhase::Running;
        }
        let uid = store.add(pod).unwrap();
        let crash = IncidentDefinition {
            effect: FaultEffect::CrashLoop,
            ..def("crash", 2)
        };
        let mut engine = engine_with(store.clone(), vec![crash]);

        let id = engine.spawn("crash", None).unwrap();
        assert_eq!(engine.get(id).unwrap().target.as_ref().unwrap().uid, uid);
        let fault = |s: &ClusterStore| s.get(&uid).unwrap().as_pod().unwrap().status.fault;
        assert_eq!(fault(&store), Some(PodFault::CrashLoop));

        engine.resolve(id).unwrap();
        assert_eq!(fault(&store), None);
    }

    #[test]
    fn no_target_means_no_spawn() {
        let crash = IncidentDefinition {
            effect: FaultEffect::CrashLoop,
            ..def("crash", 2)
        };
        let mut engine = engine_with(ClusterStore::new(), vec![crash]);
        assert!(engine.spawn("crash", None).is_err());
        assert!(engine.spawn("missing", None).is_err());
        assert_eq!(engine.incidents().count(), 0);
    }

    #[test]
    fn random_spawns_respect_ceiling_and_severity() {
        let store = ClusterStore::new();
        let mut engine = IncidentEngine::new(
            store,
            IncidentConfig {
                spawn_chance: 1.0,
                difficulty_ramp_secs: 0,
                ..Default::default()
            },
            Some(3),
        );
        let mut total = 0;
        for _ in 0..40 {
            total += engine.update(SEC).len();
            assert!(engine.open_incidents().len() <= 1);
        }
        assert!(total >= 1);
        assert!(engine.incidents().all(|i| i.severity == Severity::MIN));
    }

    #[test]
    fn difficulty_ramps_and_never_drops() {
        let mut engine = IncidentEngine::new(
            ClusterStore::new(),
            IncidentConfig {
                enabled: false,
                difficulty_ramp_secs: 10,
                ..Default::default()
            },
            Some(1),
        );
        advance(&mut engine, 25);
        assert!((engine.difficulty() - 3.5).abs() < 1e-9);
        engine.set_difficulty(2.0);
        assert!((engine.difficulty() - 3.5).abs() < 1e-9);
        engine.set_difficulty(50.0);
        assert_eq!(engine.difficulty(), MAX_DIFFICULTY);
    }

    #[test]
    fn scripted_entries_fire_once_at_their_offset() {
        let mut engine = IncidentEngine::new(
            ClusterStore::new(),
            IncidentConfig {
                enabled: false,
                replace_builtin: true,
                difficulty_ramp_secs: 0,
                definitions: vec![def("drill", 1)],
                scripted: vec![ScriptedIncident {
                    definition_id: "drill".to_string(),
                    trigger_at_secs: 3.0,
                    target_name: None,
                    target_namespace: None,
                }],
                ..Default::default()
            },
            Some(1),
        );
        advance(&mut engine, 2);
        assert_eq!(engine.incidents().count(), 0);
        let fired = engine.update(SEC);
        assert_eq!(fired.len(), 1);
        advance(&mut engine, 5);
        assert_eq!(engine.incidents().count(), 1);
    }
}
