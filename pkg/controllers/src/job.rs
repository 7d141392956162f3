use pkg_constants::labels::JOB_NAME;
use pkg_state::ClusterStore;
use pkg_types::job::JobCondition;
use pkg_types::meta::{EventSeverity, set_condition};
use pkg_types::pod::{PodPhase, RestartPolicy};
use pkg_types::resource::{Resource, ResourceKind};
use std::collections::BTreeMap;
use tracing::{info, warn};

use crate::context::TickContext;
use crate::pods::{create_pod, owned_pods};

/// Controller that manages Job lifecycle: creates Pods to completion.
pub struct JobController {
    store: ClusterStore,
}

impl JobController {
    pub fn new(store: ClusterStore) -> Self {
        Self { store }
    }

    pub fn reconcile(&self, ctx: &mut TickContext<'_>) -> anyhow::Result<()> {
        for job in self.store.list_kind(ResourceKind::Job) {
            if job.metadata.is_terminating() {
                continue;
            }
            if let Err(e) = self.reconcile_one(&job, ctx) {
                warn!("Job {}: reconcile failed: {}", job.key(), e);
            }
        }
        Ok(())
    }

    fn reconcile_one(&self, res: &Resource, ctx: &mut TickContext<'_>) -> anyhow::Result<()> {
        let Some(job) = res.as_job().cloned() else {
            return Ok(());
        };
        // Skip completed or failed jobs
        if job.status.condition.is_finished() {
            return Ok(());
        }

        let mut status = job.status.clone();
        if status.start_time.is_none() {
            status.start_time = Some(ctx.now);
        }

        let pods = owned_pods(&self.store, res.uid());
        let count = |phase: PodPhase| pods.iter().filter(|p| p.pod_phase() == Some(phase)).count() as u32;
        let succeeded = count(PodPhase::Succeeded);
        let failed = count(PodPhase::Failed);
        let active: Vec<&Resource> = pods.iter().filter(|p| p.is_active_pod()).collect();
        let mut active_count = active.len() as u32;

        if failed > job.spec.backoff_limit {
            for pod in &active {
                self.store.remove(pod.uid());
                ctx.stats.pods_deleted += 1;
            }
            active_count = 0;
            status.condition = JobCondition::Failed;
            status.completion_time = Some(ctx.now);
            set_condition(
                &mut status.conditions,
                "Failed",
                true,
                "BackoffLimitExceeded",
                "Job has reached the specified backoff limit",
                ctx.now,
            );
            warn!(
                "Job {}: failed ({} failures > backoff limit {})",
                res.name(),
                failed,
                job.spec.backoff_limit
            );
            self.store.record_event(
                res.uid(),
                EventSeverity::Warning,
                "BackoffLimitExceeded",
                "Job has reached the specified backoff limit",
            );
        } else if succeeded >= job.spec.completions {
            status.condition = JobCondition::Complete;
            status.completion_time = Some(ctx.now);
            set_condition(&mut status.conditions, "Complete", true, "Completed", "", ctx.now);
            info!(
                "Job {}: completed ({}/{})",
                res.name(),
                succeeded,
                job.spec.completions
            );
        } else {
            let remaining = job.spec.completions - succeeded;
            let want = job.spec.parallelism.max(1).min(remaining);
            let mut template = job.spec.template.clone();
            if template.spec.restart_policy == RestartPolicy::Always {
                template.spec.restart_policy = RestartPolicy::Never;
            }
            let labels = BTreeMap::from([(JOB_NAME.to_string(), res.name().to_string())]);
            while active_count < want {
                let pod = create_pod(&self.store, ctx.rng, res.name(), res, &template, &labels)?;
                ctx.stats.pods_created += 1;
                active_count += 1;
                info!("Job {}: created pod {}", res.name(), pod.name());
            }
        }

        status.active = active_count;
        status.succeeded = succeeded;
        status.failed = failed;
        if status != job.status {
            self.store.update(res.uid(), |r| {
                if let Some(j) = r.as_job_mut() {
                    j.status = status;
                }
            });
        }
        Ok(())
    }
}
