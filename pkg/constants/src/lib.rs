//! Centralized constants for the k3sim project.
//!
//! All simulation tuning values and well-known keys live here.
//! Change a value in one place and it applies everywhere.

pub mod engine;
pub mod incident;
pub mod labels;
pub mod store;
