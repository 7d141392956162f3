use serde::{Deserialize, Serialize};

use crate::meta::Condition;
use crate::pod::PodTemplate;
use crate::time::SimTime;

// --- Job status ---

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum JobCondition {
    #[default]
    Running,
    Complete,
    Failed,
}

impl JobCondition {
    pub fn is_finished(self) -> bool {
        matches!(self, JobCondition::Complete | JobCondition::Failed)
    }
}

impl std::fmt::Display for JobCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobCondition::Running => write!(f, "Running"),
            JobCondition::Complete => write!(f, "Complete"),
            JobCondition::Failed => write!(f, "Failed"),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobStatus {
    pub active: u32,
    pub succeeded: u32,
    pub failed: u32,
    pub condition: JobCondition,
    #[serde(default)]
    pub start_time: Option<SimTime>,
    #[serde(default)]
    pub completion_time: Option<SimTime>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

// --- Job spec ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobSpec {
    pub template: PodTemplate,
    /// Number of successful completions required
    #[serde(default = "default_completions")]
    pub completions: u32,
    /// Max pods running in parallel
    #[serde(default = "default_parallelism")]
    pub parallelism: u32,
    /// Failed pods tolerated; one more marks the job as Failed
    #[serde(default = "default_backoff_limit")]
    pub backoff_limit: u32,
    /// Mean simulated run time of one pod
    #[serde(default = "default_estimated_duration")]
    pub estimated_duration_secs: u64,
}

fn default_completions() -> u32 {
    1
}
fn default_parallelism() -> u32 {
    1
}
fn default_backoff_limit() -> u32 {
    6
}
fn default_estimated_duration() -> u64 {
    pkg_constants::engine::DEFAULT_JOB_DURATION_SECS
}

// --- Job ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Job {
    pub spec: JobSpec,
    #[serde(default)]
    pub status: JobStatus,
}

// --- CronJob ---

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum ConcurrencyPolicy {
    #[default]
    Allow,
    Forbid,
    Replace,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CronJobStatus {
    #[serde(default)]
    pub last_schedule_time: Option<SimTime>,
    /// Uids of jobs that are still running
    #[serde(default)]
    pub active_jobs: Vec<String>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CronJobSpec {
    /// Cron schedule string (e.g. "*/5 * * * *" or "@every 30s")
    pub schedule: String,
    /// Job template to create
    pub job_template: JobSpec,
    #[serde(default)]
    pub concurrency_policy: ConcurrencyPolicy,
    /// If true, skip execution
    #[serde(default)]
    pub suspend: bool,
    #[serde(default = "default_successful_history")]
    pub successful_jobs_history_limit: u32,
    #[serde(default = "default_failed_history")]
    pub failed_jobs_history_limit: u32,
}

fn default_successful_history() -> u32 {
    3
}
fn default_failed_history() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CronJob {
    pub spec: CronJobSpec,
    #[serde(default)]
    pub status: CronJobStatus,
}
