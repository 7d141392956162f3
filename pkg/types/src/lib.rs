pub mod config;
pub mod daemonset;
pub mod deployment;
pub mod hpa;
pub mod incident;
pub mod job;
pub mod meta;
pub mod namespace;
pub mod node;
pub mod pod;
pub mod quantity;
pub mod quota;
pub mod replicaset;
pub mod resource;
pub mod rng;
pub mod selector;
pub mod service;
pub mod statefulset;
pub mod stats;
pub mod time;
pub mod validate;
