//! Scripted and random fault incidents with delayed cascades.

pub mod catalog;
pub mod effects;
pub mod engine;
mod timers;

pub use catalog::builtin_definitions;
pub use engine::IncidentEngine;
