use pkg_state::ClusterStore;
use std::panic::{AssertUnwindSafe, catch_unwind};
use tracing::{debug, warn};

type Check = Box<dyn Fn(&ClusterStore) -> anyhow::Result<bool> + Send>;

struct Predicate {
    name: String,
    check: Check,
    satisfied: bool,
}

/// Externally supplied conditions over the cluster, evaluated after each
/// tick. A predicate that errors or panics counts as not satisfied.
#[derive(Default)]
pub struct PredicateSet {
    predicates: Vec<Predicate>,
}

impl PredicateSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `check` under `name`, replacing any predicate of that name.
    pub fn add<F>(&mut self, name: &str, check: F)
    where
        F: Fn(&ClusterStore) -> anyhow::Result<bool> + Send + 'static,
    {
        self.remove(name);
        self.predicates.push(Predicate {
            name: name.to_string(),
            check: Box::new(check),
            satisfied: false,
        });
    }

    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.predicates.len();
        self.predicates.retain(|p| p.name != name);
        self.predicates.len() != before
    }

    pub fn len(&self) -> usize {
        self.predicates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }

    pub fn is_satisfied(&self, name: &str) -> bool {
        self.predicates
            .iter()
            .any(|p| p.name == name && p.satisfied)
    }

    /// Evaluate every predicate. Returns the names that became satisfied
    /// on this evaluation.
    pub fn evaluate(&mut self, store: &ClusterStore) -> Vec<String> {
        let mut newly = Vec::new();
        for p in &mut self.predicates {
            let now = guarded(&p.name, &p.check, store);
            if now && !p.satisfied {
                debug!("Predicate {} satisfied", p.name);
                newly.push(p.name.clone());
            }
            p.satisfied = now;
        }
        newly
    }
}

fn guarded(name: &str, check: &Check, store: &ClusterStore) -> bool {
    match catch_unwind(AssertUnwindSafe(|| check(store))) {
        Ok(Ok(satisfied)) => satisfied,
        Ok(Err(e)) => {
            warn!("Predicate {} failed: {}", name, e);
            false
        }
        Err(_) => {
            warn!("Predicate {} panicked", name);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pkg_types::resource::ResourceKind;

    #[test]
    fn errors_and_panics_count_as_unsatisfied() {
        let store = ClusterStore::new();
        let mut set = PredicateSet::new();
        set.add("no-pods", |s| Ok(s.list_kind(ResourceKind::Pod).is_empty()));
        set.add("broken", |_| anyhow::bail!("lookup failed"));
        set.add("panics", |_| panic!("boom"));

        let newly = set.evaluate(&store);
        assert_eq!(newly, vec!["no-pods".to_string()]);
        assert!(set.is_satisfied("no-pods"));
        assert!(!set.is_satisfied("broken"));
        assert!(!set.is_satisfied("panics"));

        assert!(set.evaluate(&store).is_empty());
        assert!(set.remove("panics"));
        assert_eq!(set.len(), 2);
    }
}
