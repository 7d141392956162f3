use serde::{Deserialize, Serialize};

use crate::incident::{IncidentDefinition, ScriptedIncident};
use crate::resource::Resource;

/// Simulator configuration file (YAML).
///
/// Example `k3sim.yaml`:
/// ```yaml
/// tick-ms: 100
/// time-scale: 2.0
/// seed: 42
/// engine:
///   random-failure-rate: 0.0
///   chaos:
///     enabled: true
///     pod-kill-probability: 0.3
/// incidents:
///   spawn-chance: 0.02
///   scripted:
///     - definition_id: pod-crashloop
///       trigger_at_secs: 30
/// manifests:
///   - kind: Node
///     metadata: { name: worker-1 }
///     spec: { capacity: { cpu_millis: "4", memory_bytes: 8Gi } }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SimConfigFile {
    #[serde(default, alias = "tick-ms")]
    pub tick_ms: Option<u64>,
    #[serde(default, alias = "time-scale")]
    pub time_scale: Option<f64>,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default, alias = "incident-interval-ms")]
    pub incident_interval_ms: Option<u64>,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub incidents: IncidentConfig,
    /// Resources created before the first tick.
    #[serde(default)]
    pub manifests: Vec<Resource>,
}

/// Control-loop tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    /// Per-container, per-tick crash probability; 0 disables.
    #[serde(default = "default_random_failure_rate", alias = "random-failure-rate")]
    pub random_failure_rate: f64,
    #[serde(default = "default_eviction_grace", alias = "eviction-grace-secs")]
    pub eviction_grace_secs: u64,
    #[serde(default)]
    pub chaos: ChaosConfig,
}

fn default_random_failure_rate() -> f64 {
    pkg_constants::engine::DEFAULT_RANDOM_FAILURE_RATE
}
fn default_eviction_grace() -> u64 {
    pkg_constants::engine::EVICTION_GRACE_SECS
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            random_failure_rate: default_random_failure_rate(),
            eviction_grace_secs: default_eviction_grace(),
            chaos: ChaosConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChaosConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_chaos_interval", alias = "interval-secs")]
    pub interval_secs: u64,
    #[serde(default, alias = "pod-kill-probability")]
    pub pod_kill_probability: f64,
}

fn default_chaos_interval() -> u64 {
    pkg_constants::engine::CHAOS_INTERVAL_SECS
}

impl Default for ChaosConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: default_chaos_interval(),
            pod_kill_probability: 0.0,
        }
    }
}

/// Incident spawning and difficulty tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IncidentConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_spawn_chance", alias = "spawn-chance")]
    pub spawn_chance: f64,
    /// Hard cap on simultaneously open incidents, below the difficulty ceiling.
    #[serde(default = "default_max_active", alias = "max-active")]
    pub max_active: usize,
    /// Simulated seconds per difficulty level; 0 disables the ramp.
    #[serde(default = "default_ramp", alias = "difficulty-ramp-secs")]
    pub difficulty_ramp_secs: u64,
    #[serde(default = "default_bias", alias = "difficulty-bias")]
    pub difficulty_bias: f64,
    #[serde(default = "default_initial_difficulty", alias = "initial-difficulty")]
    pub initial_difficulty: f64,
    #[serde(default)]
    pub scripted: Vec<ScriptedIncident>,
    #[serde(default)]
    pub definitions: Vec<IncidentDefinition>,
    /// Use only `definitions`, dropping the built-in catalog.
    #[serde(default, alias = "replace-builtin")]
    pub replace_builtin: bool,
}

fn default_true() -> bool {
    true
}
fn default_spawn_chance() -> f64 {
    pkg_constants::incident::DEFAULT_SPAWN_CHANCE
}
fn default_max_active() -> usize {
    pkg_constants::incident::DEFAULT_MAX_ACTIVE
}
fn default_ramp() -> u64 {
    pkg_constants::incident::DEFAULT_DIFFICULTY_RAMP_SECS
}
fn default_bias() -> f64 {
    pkg_constants::incident::DEFAULT_DIFFICULTY_BIAS
}
fn default_initial_difficulty() -> f64 {
    pkg_constants::incident::MIN_DIFFICULTY
}

impl Default for IncidentConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            spawn_chance: default_spawn_chance(),
            max_active: default_max_active(),
            difficulty_ramp_secs: default_ramp(),
            difficulty_bias: default_bias(),
            initial_difficulty: default_initial_difficulty(),
            scripted: Vec::new(),
            definitions: Vec::new(),
            replace_builtin: false,
        }
    }
}

/// Load a YAML config file, returning the default if the file doesn't exist.
pub fn load_config_file<T: serde::de::DeserializeOwned + Default>(path: &str) -> anyhow::Result<T> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(T::default());
        }
        Err(e) => return Err(anyhow::anyhow!("failed to read {}: {}", path, e)),
    };
    let config: T = serde_yaml::from_str(&content)
        .map_err(|e| anyhow::anyhow!("invalid config {}: {}", path, e))?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::ResourceKind;

    #[test]
    fn missing_file_gives_defaults() {
        let cfg: SimConfigFile = load_config_file("/nonexistent/k3sim.yaml").unwrap();
        assert!(cfg.tick_ms.is_none());
        assert!(cfg.incidents.enabled);
        assert_eq!(cfg.engine.eviction_grace_secs, 40);
    }

    #[test]
    fn kebab_and_nested_sections() {
        let yaml = r#"
tick-ms: 50
seed: 9
engine:
  random-failure-rate: 0.0
  chaos:
    enabled: true
    pod-kill-probability: 0.5
incidents:
  spawn-chance: 0.2
  scripted:
    - definition_id: node-failure
      trigger_at_secs: 10
manifests:
  - kind: Namespace
    metadata:
      name: team-a
"#;
        let cfg: SimConfigFile = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.tick_ms, Some(50));
        assert_eq!(cfg.seed, Some(9));
        assert_eq!(cfg.engine.random_failure_rate, 0.0);
        assert!(cfg.engine.chaos.enabled);
        assert_eq!(cfg.engine.chaos.interval_secs, 30);
        assert_eq!(cfg.incidents.spawn_chance, 0.2);
        assert_eq!(cfg.incidents.scripted[0].definition_id, "node-failure");
        assert_eq!(cfg.manifests[0].kind(), ResourceKind::Namespace);
    }
}
