use serde::{Deserialize, Serialize};

use crate::resource::ResourceKind;
use crate::time::SimTime;

pub type IncidentId = u64;

/// Severity 1 (minor) ..= 5 (critical).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct Severity(u8);

impl Severity {
    pub const MIN: Severity = Severity(1);
    pub const MAX: Severity = Severity(5);

    /// Clamps into 1..=5.
    pub fn new(level: u8) -> Self {
        Severity(level.clamp(1, 5))
    }

    pub fn level(self) -> u8 {
        self.0.clamp(1, 5)
    }
}

impl Default for Severity {
    fn default() -> Self {
        Severity::MIN
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum IncidentState {
    Created,
    Active,
    Investigating,
    Resolved,
}

impl IncidentState {
    pub fn is_open(self) -> bool {
        matches!(self, IncidentState::Active | IncidentState::Investigating)
    }
}

impl std::fmt::Display for IncidentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IncidentState::Created => write!(f, "Created"),
            IncidentState::Active => write!(f, "Active"),
            IncidentState::Investigating => write!(f, "Investigating"),
            IncidentState::Resolved => write!(f, "Resolved"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IncidentTarget {
    pub kind: ResourceKind,
    pub uid: String,
    pub name: String,
    #[serde(default)]
    pub namespace: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InvestigationStep {
    pub description: String,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub completed_at: Option<SimTime>,
}

/// What an incident does to its target while it is open.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub enum FaultEffect {
    /// Purely informational incident.
    #[default]
    NoEffect,
    CrashLoop,
    ImagePull,
    CpuSpike {
        factor: f64,
    },
    MemoryLeak {
        bytes_per_sec: u64,
    },
    NodeNotReady,
    ScaleToZero,
}

impl FaultEffect {
    /// Kind of resource the effect acts on, if it needs one.
    pub fn target_kind(&self) -> Option<ResourceKind> {
        match self {
            FaultEffect::NoEffect => None,
            FaultEffect::CrashLoop
            | FaultEffect::ImagePull
            | FaultEffect::CpuSpike { .. }
            | FaultEffect::MemoryLeak { .. } => Some(ResourceKind::Pod),
            FaultEffect::NodeNotReady => Some(ResourceKind::Node),
            FaultEffect::ScaleToZero => Some(ResourceKind::Deployment),
        }
    }
}

/// A probabilistic, delayed follow-on incident.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CascadeRule {
    pub child_definition: String,
    pub probability: f64,
    pub delay_secs: f64,
    /// Overrides the child definition's severity.
    #[serde(default)]
    pub severity: Option<Severity>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IncidentDefinition {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub severity: Severity,
    #[serde(default)]
    pub effect: FaultEffect,
    /// Overrides the effect's natural target kind.
    #[serde(default)]
    pub target_kind: Option<ResourceKind>,
    #[serde(default)]
    pub investigation_steps: Vec<String>,
    #[serde(default)]
    pub auto_resolve_secs: Option<u64>,
    #[serde(default)]
    pub cascades: Vec<CascadeRule>,
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default = "default_min_difficulty")]
    pub min_difficulty: f64,
}

fn default_weight() -> f64 {
    1.0
}
fn default_min_difficulty() -> f64 {
    1.0
}

impl IncidentDefinition {
    pub fn target_kind(&self) -> Option<ResourceKind> {
        self.target_kind.or_else(|| self.effect.target_kind())
    }
}

/// Entry in the scripted queue; fires once when elapsed time passes `trigger_at_secs`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScriptedIncident {
    pub definition_id: String,
    pub trigger_at_secs: f64,
    /// Target by name; a random eligible target when absent.
    #[serde(default)]
    pub target_name: Option<String>,
    #[serde(default)]
    pub target_namespace: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ResolutionReward {
    pub base: u32,
    pub combo_multiplier: f64,
    pub speed_bonus: u32,
    pub total: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Incident {
    pub id: IncidentId,
    pub definition_id: String,
    pub title: String,
    pub severity: Severity,
    pub state: IncidentState,
    #[serde(default)]
    pub target: Option<IncidentTarget>,
    #[serde(default)]
    pub investigation_steps: Vec<InvestigationStep>,
    #[serde(default)]
    pub cascade_parent: Option<IncidentId>,
    #[serde(default)]
    pub cascade_children: Vec<IncidentId>,
    #[serde(default)]
    pub cascade_depth: u32,
    pub created_at: SimTime,
    #[serde(default)]
    pub activated_at: Option<SimTime>,
    #[serde(default)]
    pub resolved_at: Option<SimTime>,
    #[serde(default)]
    pub auto_resolved: bool,
    #[serde(default)]
    pub reward: Option<ResolutionReward>,
}

impl Incident {
    pub fn is_resolved(&self) -> bool {
        self.state == IncidentState::Resolved
    }
}

/// Incident lifecycle notifications.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum IncidentEvent {
    Created {
        id: IncidentId,
        definition_id: String,
        severity: Severity,
        target: Option<IncidentTarget>,
    },
    Activated {
        id: IncidentId,
    },
    Investigating {
        id: IncidentId,
    },
    StepCompleted {
        id: IncidentId,
        step: usize,
    },
    Cascade {
        parent: IncidentId,
        child: IncidentId,
    },
    Resolved {
        id: IncidentId,
        auto: bool,
        reward: Option<ResolutionReward>,
    },
}
