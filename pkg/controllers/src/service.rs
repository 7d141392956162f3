use pkg_state::ClusterStore;
use pkg_state::store::Query;
use pkg_types::meta::set_condition;
use pkg_types::resource::{Resource, ResourceKind};
use pkg_types::selector::LabelSelector;
use pkg_types::service::ServiceStatus;
use tracing::debug;

use crate::context::TickContext;
use crate::pods::is_ready_pod;

/// Keeps each Service's endpoint list in step with the ready pods its
/// selector matches.
pub struct ServiceController {
    store: ClusterStore,
}

impl ServiceController {
    pub fn new(store: ClusterStore) -> Self {
        Self { store }
    }

    pub fn reconcile(&self, ctx: &mut TickContext<'_>) -> anyhow::Result<()> {
        for svc in self.store.list_kind(ResourceKind::Service) {
            if svc.metadata.is_terminating() {
                continue;
            }
            self.reconcile_one(&svc, ctx);
        }
        Ok(())
    }

    fn reconcile_one(&self, res: &Resource, ctx: &TickContext<'_>) {
        let Some(svc) = res.as_service() else { return };

        // No selector, no endpoints.
        let pods: Vec<Resource> = if svc.spec.selector.is_empty() {
            Vec::new()
        } else {
            let query = Query::kind(ResourceKind::Pod)
                .in_namespace(res.namespace())
                .with_selector(LabelSelector::from_labels(svc.spec.selector.clone()));
            self.store
                .query(&query)
                .into_iter()
                .filter(|p| p.is_active_pod())
                .collect()
        };

        let mut endpoints: Vec<String> = pods
            .iter()
            .filter(|p| is_ready_pod(p))
            .map(|p| p.name().to_string())
            .collect();
        endpoints.sort();
        let not_ready = (pods.len() - endpoints.len()) as u32;

        let mut status = ServiceStatus {
            endpoints,
            not_ready_endpoints: not_ready,
            conditions: svc.status.conditions.clone(),
        };
        let has_endpoints = !status.endpoints.is_empty();
        set_condition(
            &mut status.conditions,
            "EndpointsReady",
            has_endpoints,
            if has_endpoints { "ReadyEndpoints" } else { "NoReadyEndpoints" },
            "",
            ctx.now,
        );

        if status != svc.status {
            debug!(
                "Service {}: {} ready, {} not ready",
                res.key(),
                status.endpoints.len(),
                status.not_ready_endpoints
            );
            self.store.update(res.uid(), |r| {
                if let Some(s) = r.as_service_mut() {
                    s.status = status;
                }
            });
        }
    }
}
