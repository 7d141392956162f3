pub mod store;
pub mod watch;

pub use store::ClusterStore;
pub use watch::EventBus;
