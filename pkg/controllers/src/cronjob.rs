use pkg_constants::labels::CRONJOB_NAME;
use pkg_state::ClusterStore;
use pkg_types::job::{ConcurrencyPolicy, Job, JobCondition, JobStatus};
use pkg_types::meta::{EventSeverity, ObjectMeta};
use pkg_types::resource::{Object, Resource, ResourceKind};
use pkg_types::time::{SimTime, sim_epoch};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{info, warn};

use crate::context::TickContext;
use crate::pods::owned_of_kind;

/// Controller that creates Jobs on a cron schedule.
pub struct CronJobController {
    store: ClusterStore,
}

impl CronJobController {
    pub fn new(store: ClusterStore) -> Self {
        Self { store }
    }

    pub fn reconcile(&self, ctx: &mut TickContext<'_>) -> anyhow::Result<()> {
        for cj in self.store.list_kind(ResourceKind::CronJob) {
            if cj.metadata.is_terminating() {
                continue;
            }
            if let Err(e) = self.reconcile_one(&cj, ctx) {
                warn!("CronJob {}: reconcile failed: {}", cj.key(), e);
            }
        }
        Ok(())
    }

    fn reconcile_one(&self, res: &Resource, ctx: &mut TickContext<'_>) -> anyhow::Result<()> {
        let Some(cj) = res.as_cronjob().cloned() else {
            return Ok(());
        };
        let mut status = cj.status.clone();

        let mut jobs = owned_of_kind(&self.store, res.uid(), ResourceKind::Job);
        jobs.sort_by(|a, b| {
            a.metadata
                .creation_timestamp
                .cmp(&b.metadata.creation_timestamp)
                .then_with(|| a.name().cmp(b.name()))
        });
        let is_active = |j: &Resource| {
            !j.metadata.is_terminating()
                && j.as_job().is_some_and(|j| !j.status.condition.is_finished())
        };

        // Skip suspended CronJobs
        if !cj.spec.suspend {
            match schedule_interval(&cj.spec.schedule) {
                None => {
                    if !cj.status.conditions.iter().any(|c| c.reason == "InvalidSchedule") {
                        warn!(
                            "CronJob {}: unparseable schedule {:?}",
                            res.name(),
                            cj.spec.schedule
                        );
                        pkg_types::meta::set_condition(
                            &mut status.conditions,
                            "ScheduleValid",
                            false,
                            "InvalidSchedule",
                            &cj.spec.schedule,
                            ctx.now,
                        );
                    }
                }
                // First sight anchors the schedule.
                Some(_) if status.last_schedule_time.is_none() => {
                    status.last_schedule_time = Some(ctx.now);
                }
                Some(interval) => {
                    let due = status
                        .last_schedule_time
                        .is_some_and(|last| ctx.due(last, interval));
                    if due {
                        status.last_schedule_time = Some(ctx.now);
                        let active: Vec<&Resource> = jobs.iter().filter(|j| is_active(*j)).collect();
                        match cj.spec.concurrency_policy {
                            ConcurrencyPolicy::Forbid if !active.is_empty() => {
                                info!(
                                    "CronJob {}: skipping run, {} job(s) still active",
                                    res.name(),
                                    active.len()
                                );
                                self.store.record_event(
                                    res.uid(),
                                    EventSeverity::Normal,
                                    "JobAlreadyActive",
                                    "Not starting job because prior execution is running",
                                );
                            }
                            policy => {
                                if policy == ConcurrencyPolicy::Replace {
                                    for job in &active {
                                        self.store.remove(job.uid());
                                        info!("CronJob {}: replaced job {}", res.name(), job.name());
                                    }
                                }
                                self.spawn_job(res, ctx.now, interval)?;
                            }
                        }
                    }
                }
            }
        }

        // Trim finished Jobs beyond the history limits, oldest first.
        let jobs: Vec<Resource> = owned_of_kind(&self.store, res.uid(), ResourceKind::Job);
        for (cond, limit) in [
            (JobCondition::Complete, cj.spec.successful_jobs_history_limit),
            (JobCondition::Failed, cj.spec.failed_jobs_history_limit),
        ] {
            let done = finished_jobs(&jobs, cond);
            let excess = done.len().saturating_sub(limit as usize);
            for job in done.into_iter().take(excess) {
                self.store.remove(job.uid());
                info!("CronJob {}: pruned {} job {}", res.name(), cond, job.name());
            }
        }

        let mut active_jobs: Vec<String> = owned_of_kind(&self.store, res.uid(), ResourceKind::Job)
            .iter()
            .filter(|j| is_active(*j))
            .map(|j| j.name().to_string())
            .collect();
        active_jobs.sort();
        status.active_jobs = active_jobs;

        if status != cj.status {
            self.store.update(res.uid(), |r| {
                if let Some(c) = r.as_cronjob_mut() {
                    c.status = status;
                }
            });
        }
        Ok(())
    }

    fn spawn_job(&self, cron: &Resource, now: SimTime, interval: Duration) -> anyhow::Result<()> {
        let Some(cj) = cron.as_cronjob() else {
            return Ok(());
        };
        let unix = now.to_datetime(sim_epoch()).timestamp();
        let stamp = if interval >= Duration::from_secs(60) {
            unix / 60
        } else {
            unix
        };
        let name = format!("{}-{}", cron.name(), stamp);
        if self
            .store
            .get_by_name(ResourceKind::Job, cron.namespace(), &name)
            .is_some()
        {
            warn!("CronJob {}: job {} already exists", cron.name(), name);
            return Ok(());
        }

        let labels = BTreeMap::from([(CRONJOB_NAME.to_string(), cron.name().to_string())]);
        let meta = ObjectMeta::new(name, cron.namespace())
            .with_labels(labels)
            .with_owner(cron.controller_ref());
        let job = Resource::new(
            meta,
            Object::Job(Job {
                spec: cj.spec.job_template.clone(),
                status: JobStatus::default(),
            }),
        );
        let uid = self.store.add(job)?;
        info!(
            "CronJob {}: spawned job {} (schedule={})",
            cron.name(),
            self.store.get(&uid).map(|j| j.name().to_string()).unwrap_or_default(),
            cj.spec.schedule
        );
        Ok(())
    }
}

/// Jobs that ended in `cond`, oldest first.
fn finished_jobs(jobs: &[Resource], cond: JobCondition) -> Vec<&Resource> {
    let mut done: Vec<&Resource> = jobs
        .iter()
        .filter(|j| j.as_job().is_some_and(|j| j.status.condition == cond))
        .collect();
    done.sort_by(|a, b| {
        a.metadata
            .creation_timestamp
            .cmp(&b.metadata.creation_timestamp)
            .then_with(|| a.name().cmp(b.name()))
    });
    done
}

/// Fixed interval for a schedule expression.
///
/// Supports `@every <n>s|m|h`, `@hourly`, `@daily`, and the five-field forms
/// `* * * * *`, `*/N * * * *`, `M * * * *`, `0 */N * * *` and `M H * * *`.
/// Everything else, including counts whose seconds overflow `u64`, is `None`.
pub fn schedule_interval(schedule: &str) -> Option<Duration> {
    const MINUTE: u64 = 60;
    const HOUR: u64 = 60 * MINUTE;
    const DAY: u64 = 24 * HOUR;

    let schedule = schedule.trim();
    if let Some(every) = schedule.strip_prefix("@every") {
        let every = every.trim();
        let (num, unit) = every.split_at(every.char_indices().last()?.0);
        let n: u64 = num.trim().parse().ok().filter(|n| *n > 0)?;
        let secs = match unit {
            "s" => n,
            "m" => n.checked_mul(MINUTE)?,
            "h" => n.checked_mul(HOUR)?,
            _ => return None,
        };
        return Some(Duration::from_secs(secs));
    }
    match schedule {
        "@hourly" => return Some(Duration::from_secs(HOUR)),
        "@daily" | "@midnight" => return Some(Duration::from_secs(DAY)),
        _ => {}
    }

    let fields: Vec<&str> = schedule.split_whitespace().collect();
    let [minute, hour, dom, month, dow] = fields.as_slice() else {
        return None;
    };
    if [dom, month, dow].iter().any(|f| **f != "*") {
        return None;
    }
    let step = |field: &str| -> Option<u64> {
        field
            .strip_prefix("*/")
            .and_then(|n| n.parse().ok())
            .filter(|n| *n > 0)
    };
    let fixed = |field: &str, max: u64| -> Option<u64> { field.parse().ok().filter(|n| *n < max) };

    match (*minute, *hour) {
        ("*", "*") => Some(Duration::from_secs(MINUTE)),
        (m, "*") if step(m).is_some() => step(m)
            .and_then(|n| n.checked_mul(MINUTE))
            .map(Duration::from_secs),
        (m, "*") if fixed(m, 60).is_some() => Some(Duration::from_secs(HOUR)),
        ("0", h) if step(h).is_some() => step(h)
            .and_then(|n| n.checked_mul(HOUR))
            .map(Duration::from_secs),
        (m, h) if fixed(m, 60).is_some() && fixed(h, 24).is_some() => Some(Duration::from_secs(DAY)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{ctx_parts, make_template};
    use pkg_types::job::{CronJob, CronJobSpec, JobSpec};

    fn make_cron(store: &ClusterStore, name: &str, schedule: &str, policy: ConcurrencyPolicy) -> String {
        let cj = Resource::new(
            ObjectMeta::new(name, "default"),
            Object::CronJob(CronJob {
                spec: CronJobSpec {
                    schedule: schedule.to_string(),
                    job_template: JobSpec {
                        template: make_template(name),
                        completions: 1,
                        parallelism: 1,
                        backoff_limit: 0,
                        estimated_duration_secs: 5,
                    },
                    concurrency_policy: policy,
                    suspend: false,
                    successful_jobs_history_limit: 2,
                    failed_jobs_history_limit: 1,
                },
                status: Default::default(),
            }),
        );
        store.add(cj).unwrap()
    }

    fn tick(store: &ClusterStore, ctl: &CronJobController, secs: u64) {
        store.set_time(SimTime::from_secs(secs));
        let (mut rng, mut stats) = ctx_parts();
        let mut ctx = TickContext {
            now: SimTime::from_secs(secs),
            dt: Duration::from_millis(100),
            rng: &mut rng,
            stats: &mut stats,
        };
        ctl.reconcile(&mut ctx).unwrap();
    }

    fn jobs(store: &ClusterStore, uid: &str) -> Vec<Resource> {
        owned_of_kind(store, uid, ResourceKind::Job)
    }

    fn finish_all(store: &ClusterStore, uid: &str, cond: JobCondition) {
        for job in jobs(store, uid) {
            store.update(job.uid(), |r| r.as_job_mut().unwrap().status.condition = cond);
        }
    }

    #[test]
    fn parses_supported_schedules() {
        assert_eq!(schedule_interval("@every 30s"), Some(Duration::from_secs(30)));
        assert_eq!(schedule_interval("@every 5m"), Some(Duration::from_secs(300)));
        assert_eq!(schedule_interval("@hourly"), Some(Duration::from_secs(3600)));
        assert_eq!(schedule_interval("* * * * *"), Some(Duration::from_secs(60)));
        assert_eq!(schedule_interval("*/15 * * * *"), Some(Duration::from_secs(900)));
        assert_eq!(schedule_interval("30 * * * *"), Some(Duration::from_secs(3600)));
        assert_eq!(schedule_interval("0 */6 * * *"), Some(Duration::from_secs(6 * 3600)));
        assert_eq!(schedule_interval("15 3 * * *"), Some(Duration::from_secs(86_400)));
        assert_eq!(schedule_interval("0 0 * * 1"), None);
        assert_eq!(schedule_interval("every now and then"), None);
        assert_eq!(schedule_interval("@every 0s"), None);
    }

    #[test]
    fn oversized_schedules_are_rejected() {
        assert_eq!(schedule_interval("@every 18446744073709551615h"), None);
        assert_eq!(schedule_interval("@every 307445734561825861m"), None);
        assert_eq!(schedule_interval("*/18446744073709551615 * * * *"), None);
        assert_eq!(schedule_interval("0 */5124095576030432 * * *"), None);
        assert_eq!(
            schedule_interval("@every 18446744073709551615s"),
            Some(Duration::from_secs(u64::MAX))
        );
    }

    #[test]
    fn spawns_on_interval_with_minute_stamp() {
        let store = ClusterStore::new();
        let uid = make_cron(&store, "backup", "* * * * *", ConcurrencyPolicy::Allow);
        let ctl = CronJobController::new(store.clone());

        tick(&store, &ctl, 0);
        assert!(jobs(&store, &uid).is_empty());
        tick(&store, &ctl, 30);
        assert!(jobs(&store, &uid).is_empty());
        tick(&store, &ctl, 60);
        let spawned = jobs(&store, &uid);
        assert_eq!(spawned.len(), 1);
        let expected_minute = (1_704_067_200 + 60) / 60;
        assert_eq!(spawned[0].name(), format!("backup-{}", expected_minute));
        assert_eq!(
            store.get(&uid).unwrap().as_cronjob().unwrap().status.active_jobs,
            vec![spawned[0].name().to_string()]
        );
    }

    #[test]
    fn forbid_skips_while_active_and_replace_swaps() {
        let store = ClusterStore::new();
        let forbid = make_cron(&store, "forbid", "@every 10s", ConcurrencyPolicy::Forbid);
        let replace = make_cron(&store, "replace", "@every 10s", ConcurrencyPolicy::Replace);
        let ctl = CronJobController::new(store.clone());

        tick(&store, &ctl, 0);
        tick(&store, &ctl, 10);
        assert_eq!(jobs(&store, &forbid).len(), 1);
        assert_eq!(jobs(&store, &replace).len(), 1);
        let first = jobs(&store, &replace)[0].uid().to_string();

        tick(&store, &ctl, 20);
        assert_eq!(jobs(&store, &forbid).len(), 1);
        let replaced = jobs(&store, &replace);
        assert_eq!(replaced.len(), 1);
        assert_ne!(replaced[0].uid(), first);
    }

    #[test]
    fn trims_history_oldest_first() {
        let store = ClusterStore::new();
        let uid = make_cron(&store, "report", "@every 10s", ConcurrencyPolicy::Allow);
        let ctl = CronJobController::new(store.clone());

        tick(&store, &ctl, 0);
        for i in 1..=4 {
            tick(&store, &ctl, i * 10);
            finish_all(&store, &uid, JobCondition::Complete);
        }
        tick(&store, &ctl, 45);
        let mut names: Vec<String> = jobs(&store, &uid).iter().map(|j| j.name().to_string()).collect();
        names.sort();
        let base = 1_704_067_200u64;
        assert_eq!(
            names,
            vec![format!("report-{}", base + 30), format!("report-{}", base + 40)]
        );
    }

    #[test]
    fn suspended_cron_does_nothing() {
        let store = ClusterStore::new();
        let uid = make_cron(&store, "paused", "@every 10s", ConcurrencyPolicy::Allow);
        store.update(&uid, |r| r.as_cronjob_mut().unwrap().spec.suspend = true);
        let ctl = CronJobController::new(store.clone());
        for s in [0, 10, 20] {
            tick(&store, &ctl, s);
        }
        assert!(jobs(&store, &uid).is_empty());
    }
}
