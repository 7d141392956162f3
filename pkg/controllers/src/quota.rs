use pkg_state::ClusterStore;
use pkg_state::watch::ClusterEvent;
use pkg_types::meta::set_condition;
use pkg_types::quota::ResourceQuotaStatus;
use pkg_types::resource::{Resource, ResourceKind};
use tracing::{info, warn};

use crate::context::TickContext;

/// Recomputes namespace usage for every ResourceQuota and reports when a
/// namespace goes over. Advisory: nothing is evicted or rejected.
pub struct QuotaController {
    store: ClusterStore,
}

impl QuotaController {
    pub fn new(store: ClusterStore) -> Self {
        Self { store }
    }

    pub fn reconcile(&self, ctx: &mut TickContext<'_>) -> anyhow::Result<()> {
        for quota in self.store.list_kind(ResourceKind::ResourceQuota) {
            if quota.metadata.is_terminating() {
                continue;
            }
            self.reconcile_one(&quota, ctx);
        }
        Ok(())
    }

    fn reconcile_one(&self, res: &Resource, ctx: &TickContext<'_>) {
        let Some(quota) = res.as_quota() else { return };
        let used = self.store.quota_usage(res.namespace());
        let violations = quota.spec.hard.violations(&used);

        let mut status = ResourceQuotaStatus {
            used,
            violations: violations.clone(),
            conditions: quota.status.conditions.clone(),
        };
        let exceeded = !violations.is_empty();
        set_condition(
            &mut status.conditions,
            "Exceeded",
            exceeded,
            if exceeded { "QuotaExceeded" } else { "WithinQuota" },
            &violations.join("; "),
            ctx.now,
        );

        if exceeded && quota.status.violations.is_empty() {
            warn!(
                "Quota {}/{} exceeded: {}",
                res.namespace(),
                res.name(),
                violations.join(", ")
            );
            self.store.bus().emit(ClusterEvent::QuotaExceeded {
                namespace: res.namespace().to_string(),
                quota: res.name().to_string(),
                violations,
            });
        } else if !exceeded && !quota.status.violations.is_empty() {
            info!("Quota {}/{} back within limits", res.namespace(), res.name());
        }

        if status != quota.status {
            self.store.update(res.uid(), |r| {
                if let Some(q) = r.as_quota_mut() {
                    q.status = status;
                }
            });
        }
    }
}
