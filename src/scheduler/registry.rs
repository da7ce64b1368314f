use std::collections::HashMap;

use chrono::Utc;
use uuid::Uuid;

use crate::cluster::NodeId;
use crate::scheduler::job::{Job, JobResult, JobStatus};
use crate::scheduler::policy::{DependencyFailurePolicy, FailureKind, RetryDecision, RetryPolicy};
use crate::scheduler::queue::{QueueEntry, ReadyQueue};

/// Result of scanning the ready queue
#[derive(Debug, PartialEq, Eq)]
pub enum Dequeue {
    /// Nothing is waiting
    Empty,
    /// Entries are waiting, but none has all dependencies completed
    Blocked,
    /// Highest-ordered dependency-eligible job
    Ready(QueueEntry),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Readiness {
    Ready,
    Waiting,
    Doomed(Uuid),
}

/// Job records plus the queue that orders the pending ones.
///
/// This is the single source of truth for job state. Every status transition
/// goes through a method here so the invariants hold in one place:
/// `assigned_node` is set exactly while a job is running, terminal states are
/// never left, and `retry_count` never exceeds `max_retries`.
#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: HashMap<Uuid, Job>,
    /// Ids in submission order
    order: Vec<Uuid>,
    queue: ReadyQueue,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a job as queued and enqueue it at its submission time.
    ///
    /// An id that is already known keeps its existing record, which is
    /// returned unchanged; nothing is enqueued for it.
    pub fn submit(&mut self, mut job: Job) -> Job {
        if let Some(existing) = self.jobs.get(&job.id) {
            tracing::warn!(job_id = %job.id, status = %existing.status, "Job id already submitted, keeping existing record");
            return existing.clone();
        }
        job.status = JobStatus::Queued;
        job.assigned_node = None;
        job.attempt = 0;
        self.queue.push(job.id, job.priority, job.submitted_at);
        self.jobs.insert(job.id, job.clone());
        self.order.push(job.id);
        job
    }

    pub fn contains(&self, id: &Uuid) -> bool {
        self.jobs.contains_key(id)
    }

    pub fn get(&self, id: &Uuid) -> Option<&Job> {
        self.jobs.get(id)
    }

    /// All jobs in the order they were submitted
    pub fn all_jobs(&self) -> Vec<&Job> {
        self.order.iter().filter_map(|id| self.jobs.get(id)).collect()
    }

    pub fn jobs_with_status(&self, status: JobStatus) -> Vec<&Job> {
        self.jobs.values().filter(|j| j.status == status).collect()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Number of ordering entries waiting, including stale ones
    pub fn queued_entries(&self) -> usize {
        self.queue.len()
    }

    /// Cancel a queued or running job. Returns the job if it was cancelled.
    pub fn cancel(&mut self, id: &Uuid) -> Option<Job> {
        let job = self.jobs.get_mut(id)?;
        if !matches!(job.status, JobStatus::Queued | JobStatus::Running) {
            return None;
        }
        if job.assigned_node.is_some() {
            job.executed_on = job.assigned_node.take();
        }
        job.status = JobStatus::Cancelled;
        job.completed_at = Some(Utc::now());
        Some(job.clone())
    }

    /// Pop the highest-ordered job that is dependency-eligible.
    ///
    /// Entries for jobs that are no longer queued are dropped. Entries still
    /// waiting on dependencies are put back unchanged. Under
    /// [`DependencyFailurePolicy::CancelDependents`] a job whose dependency
    /// failed or was cancelled is cancelled here instead of parked.
    pub fn pop_ready(&mut self, on_dependency_failure: DependencyFailurePolicy) -> Dequeue {
        let mut parked = Vec::new();
        let mut found = None;

        while let Some(entry) = self.queue.pop() {
            let readiness = match self.jobs.get(&entry.job_id) {
                Some(job) if job.status == JobStatus::Queued => self.readiness(job),
                Some(job) => {
                    tracing::debug!(job_id = %job.id, status = %job.status, "Dropping stale queue entry");
                    continue;
                }
                None => continue,
            };

            match (readiness, on_dependency_failure) {
                (Readiness::Ready, _) => {
                    found = Some(entry);
                    break;
                }
                (Readiness::Doomed(dep), DependencyFailurePolicy::CancelDependents) => {
                    if let Some(job) = self.jobs.get_mut(&entry.job_id) {
                        job.status = JobStatus::Cancelled;
                        job.completed_at = Some(Utc::now());
                        tracing::warn!(job_id = %job.id, dependency = %dep, "Dependency cannot complete, job cancelled");
                    }
                }
                _ => parked.push(entry),
            }
        }

        let blocked = !parked.is_empty();
        for entry in parked {
            self.queue.reinsert(entry);
        }

        match found {
            Some(entry) => Dequeue::Ready(entry),
            None if blocked => Dequeue::Blocked,
            None => Dequeue::Empty,
        }
    }

    /// Put an entry back with its original ordering key
    pub fn reinsert(&mut self, entry: QueueEntry) {
        self.queue.reinsert(entry);
    }

    /// Mark a queued job as running on `node_id`.
    ///
    /// Returns a snapshot of the job for the dispatch attempt, or `None` if the
    /// job is no longer queued.
    pub fn assign(&mut self, id: &Uuid, node_id: &str) -> Option<Job> {
        let job = self.jobs.get_mut(id)?;
        if job.status != JobStatus::Queued {
            return None;
        }
        job.status = JobStatus::Running;
        job.assigned_node = Some(node_id.to_string());
        job.started_at = Some(Utc::now());
        job.attempt += 1;
        Some(job.clone())
    }

    /// Running jobs as `(job id, node, attempt)`
    pub fn running(&self) -> Vec<(Uuid, NodeId, u64)> {
        self.jobs
            .values()
            .filter(|j| j.status == JobStatus::Running)
            .filter_map(|j| j.assigned_node.clone().map(|n| (j.id, n, j.attempt)))
            .collect()
    }

    /// Record a successful attempt. Ignored unless `attempt` is the job's
    /// current running attempt.
    pub fn complete(&mut self, id: &Uuid, attempt: u64, result: JobResult) -> Option<Job> {
        let job = self.current_mut(id, attempt)?;
        job.status = JobStatus::Completed;
        job.executed_on = job.assigned_node.take();
        job.completed_at = Some(Utc::now());
        job.result = Some(result);
        Some(job.clone())
    }

    /// Record a failed attempt and apply the retry policy.
    ///
    /// Requeued jobs go back to the queue at their own priority with a fresh
    /// timestamp and lose any previous result. Ignored unless `attempt` is the
    /// job's current running attempt.
    pub fn record_failure(
        &mut self,
        id: &Uuid,
        attempt: u64,
        kind: FailureKind,
        result: Option<JobResult>,
        policy: &RetryPolicy,
    ) -> Option<(RetryDecision, Job)> {
        let job = self.current_mut(id, attempt)?;
        let decision = policy.decide(kind, job.retry_count, job.max_retries);
        job.executed_on = job.assigned_node.take();

        match decision {
            RetryDecision::Requeue => {
                job.retry_count += 1;
                job.status = JobStatus::Queued;
                job.started_at = None;
                job.result = None;
            }
            RetryDecision::Finalize => {
                job.status = JobStatus::Failed;
                job.completed_at = Some(Utc::now());
                if result.is_some() {
                    job.result = result;
                }
            }
        }

        let snapshot = job.clone();
        if decision == RetryDecision::Requeue {
            self.queue.push_now(snapshot.id, snapshot.priority);
        }
        Some((decision, snapshot))
    }

    /// Whether every job has reached a terminal status
    pub fn all_terminal(&self) -> bool {
        self.jobs.values().all(|j| j.status.is_terminal())
    }

    fn current_mut(&mut self, id: &Uuid, attempt: u64) -> Option<&mut Job> {
        match self.jobs.get_mut(id) {
            Some(job) if job.status == JobStatus::Running && job.attempt == attempt => Some(job),
            Some(job) => {
                tracing::debug!(
                    job_id = %id,
                    status = %job.status,
                    attempt,
                    current_attempt = job.attempt,
                    "Ignoring outcome of a superseded dispatch attempt"
                );
                None
            }
            None => None,
        }
    }

    fn readiness(&self, job: &Job) -> Readiness {
        let mut waiting = false;
        for dep in &job.dependencies {
            match self.jobs.get(dep).map(|d| d.status) {
                Some(JobStatus::Completed) => {}
                Some(JobStatus::Failed) | Some(JobStatus::Cancelled) => {
                    return Readiness::Doomed(*dep)
                }
                _ => waiting = true,
            }
        }
        if waiting {
            Readiness::Waiting
        } else {
            Readiness::Ready
        }
    }
}
