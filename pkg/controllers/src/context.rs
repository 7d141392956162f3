use pkg_types::stats::TickStats;
use pkg_types::time::SimTime;
use rand::rngs::StdRng;
use std::time::Duration;

/// Per-tick state handed to every controller.
pub struct TickContext<'a> {
    pub now: SimTime,
    pub dt: Duration,
    pub rng: &'a mut StdRng,
    pub stats: &'a mut TickStats,
}

impl TickContext<'_> {
    /// True once `interval` has passed since `last`.
    pub fn due(&self, last: SimTime, interval: Duration) -> bool {
        self.now.since(last) >= interval
    }
}
