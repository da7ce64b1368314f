use std::sync::atomic::{AtomicU64, Ordering};

use crate::scheduler::job::Job;

/// Receives terminal job outcomes
pub trait MetricsSink: Send + Sync {
    fn track_job_completion(&self, job: &Job);
    fn track_job_failure(&self, job: &Job);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn track_job_completion(&self, _job: &Job) {}
    fn track_job_failure(&self, _job: &Job) {}
}

/// Counts completions and failures, plus total execution time of completed jobs
#[derive(Debug, Default)]
pub struct JobCounters {
    completed: AtomicU64,
    failed: AtomicU64,
    execution_time_ms: AtomicU64,
}

impl JobCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn execution_time_ms(&self) -> u64 {
        self.execution_time_ms.load(Ordering::Relaxed)
    }
}

impl MetricsSink for JobCounters {
    fn track_job_completion(&self, job: &Job) {
        self.completed.fetch_add(1, Ordering::Relaxed);
        if let Some(result) = &job.result {
            self.execution_time_ms
                .fetch_add(result.execution_time_ms, Ordering::Relaxed);
        }
    }

    fn track_job_failure(&self, _job: &Job) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }
}
