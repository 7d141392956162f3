//! Control loops that drive the simulated cluster toward its desired state.

pub mod chaos;
pub mod context;
pub mod cronjob;
pub mod daemonset;
pub mod deployment;
pub mod engine;
pub mod eviction;
pub mod hpa;
pub mod job;
pub mod lifecycle;
pub mod node;
pub mod pods;
pub mod quota;
pub mod replicaset;
pub mod scheduling;
pub mod service;
pub mod statefulset;

#[cfg(test)]
mod testutil;

pub use context::TickContext;
pub use engine::ControlLoopEngine;
