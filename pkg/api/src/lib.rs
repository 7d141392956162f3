//! Operator-facing surface of the simulator: commands, the fixed-timestep
//! driver, and guarded predicates.

pub mod commands;
pub mod predicates;
pub mod simulation;

pub use commands::{CommandResult, Commands};
pub use predicates::PredicateSet;
pub use simulation::{Simulation, SimulationConfig};
