//! Incident and cascade engine tuning.

/// Cascade chains never grow deeper than this (root is depth 0).
pub const MAX_CASCADE_DEPTH: u32 = 3;

/// Reward per severity level 1..=5.
pub const SEVERITY_REWARDS: [u32; 5] = [10, 25, 50, 100, 200];

/// Resolutions closer together than this keep the combo streak alive.
pub const COMBO_WINDOW_SECS: u64 = 60;

/// Each extra resolution in a streak adds this much to the multiplier.
pub const COMBO_STEP: f64 = 0.25;

/// Upper bound of the combo multiplier.
pub const COMBO_MAX_MULTIPLIER: f64 = 3.0;

/// Resolutions faster than this (from activation) earn the speed bonus.
pub const SPEED_BONUS_SECS: u64 = 30;

/// Speed bonus as a fraction of the base reward.
pub const SPEED_BONUS_RATIO: f64 = 0.5;

/// Difficulty is kept inside this range.
pub const MIN_DIFFICULTY: f64 = 1.0;
pub const MAX_DIFFICULTY: f64 = 10.0;

/// Default probability that a random incident spawns on an update.
pub const DEFAULT_SPAWN_CHANCE: f64 = 0.05;

/// Default simulated seconds per difficulty level.
pub const DEFAULT_DIFFICULTY_RAMP_SECS: u64 = 120;

/// Default weight shift toward severe incidents as difficulty rises.
pub const DEFAULT_DIFFICULTY_BIAS: f64 = 0.5;

/// Hard cap on concurrently active random incidents.
pub const DEFAULT_MAX_ACTIVE: usize = 5;
