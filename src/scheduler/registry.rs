use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;

use crate::api::latency::{LatencyStats, Percentiles};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Idle,
    Running,
    Committed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Committed,
    Failed,
}

/// Per-job status as reported by `/health`.
#[derive(Debug, Clone, Serialize)]
pub struct JobStatus {
    pub name: String,
    pub state: JobState,
    pub last_outcome: Option<Outcome>,
    pub last_error: Option<String>,
    /// Nanosecond epoch of the last cycle start (0 = never ran).
    pub last_started_at: i64,
    pub last_finished_at: i64,
    pub cycles: u64,
    pub failures: u64,
    pub consecutive_failures: u64,
}

impl JobStatus {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: JobState::Idle,
            last_outcome: None,
            last_error: None,
            last_started_at: 0,
            last_finished_at: 0,
            cycles: 0,
            failures: 0,
            consecutive_failures: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobLatency {
    pub name: String,
    #[serde(flatten)]
    pub percentiles: Percentiles,
}

/// Shared job state. Written by the scheduler tasks, read by the API.
#[derive(Default)]
pub struct JobRegistry {
    jobs: DashMap<String, JobStatus>,
    latency: DashMap<String, LatencyStats>,
}

impl JobRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn register(&self, name: &str) {
        self.jobs
            .entry(name.to_string())
            .or_insert_with(|| JobStatus::new(name));
        self.latency.entry(name.to_string()).or_default();
    }

    /// Idle → Running.
    pub fn start(&self, name: &str, now: i64) {
        let mut status = self
            .jobs
            .entry(name.to_string())
            .or_insert_with(|| JobStatus::new(name));
        status.state = JobState::Running;
        status.last_started_at = now;
    }

    /// Running → Committed | Failed.
    pub fn finish(&self, name: &str, result: Result<(), String>, now: i64, elapsed: Duration) {
        if let Some(mut status) = self.jobs.get_mut(name) {
            status.cycles += 1;
            status.last_finished_at = now;
            match result {
                Ok(()) => {
                    status.state = JobState::Committed;
                    status.last_outcome = Some(Outcome::Committed);
                    status.last_error = None;
                    status.consecutive_failures = 0;
                }
                Err(e) => {
                    status.state = JobState::Failed;
                    status.last_outcome = Some(Outcome::Failed);
                    status.last_error = Some(e);
                    status.failures += 1;
                    status.consecutive_failures += 1;
                }
            }
        }
        if let Some(stats) = self.latency.get(name) {
            stats.record(elapsed);
        }
    }

    /// Committed | Failed → Idle.
    pub fn idle(&self, name: &str) {
        if let Some(mut status) = self.jobs.get_mut(name) {
            status.state = JobState::Idle;
        }
    }

    pub fn status(&self, name: &str) -> Option<JobStatus> {
        self.jobs.get(name).map(|s| s.clone())
    }

    /// All jobs, sorted by name.
    pub fn snapshot(&self) -> Vec<JobStatus> {
        let mut all: Vec<JobStatus> = self.jobs.iter().map(|e| e.value().clone()).collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    pub fn latency(&self) -> Vec<JobLatency> {
        let mut all: Vec<JobLatency> = self
            .latency
            .iter()
            .map(|e| JobLatency {
                name: e.key().clone(),
                percentiles: e.value().percentiles(),
            })
            .collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }
}
