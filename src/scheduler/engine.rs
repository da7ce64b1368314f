use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, Notify, OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::cluster::{Node, NodeSelector, NodeSource};
use crate::config::SchedulerConfig;
use crate::error::{Result, SchedulerError};
use crate::metrics::MetricsSink;
use crate::remote::{ConnectionPool, HandleFactory};
use crate::scheduler::assigner::NodeAssigner;
use crate::scheduler::dispatch::{DispatchOutcome, Dispatcher};
use crate::scheduler::job::{Job, JobStatus};
use crate::scheduler::policy::RetryDecision;
use crate::scheduler::recovery::recover_stranded;
use crate::scheduler::registry::{Dequeue, JobRegistry};

/// What one pass of the scheduling loop did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tick {
    /// A job was handed to a dispatch task
    Assigned,
    /// The popped job was no longer queued by the time it was assigned
    Skipped,
    Empty,
    /// Only dependency-blocked jobs are waiting
    Blocked,
    /// The next job fits no active node
    NoCapacity,
    /// Every dispatch slot is in use
    Saturated,
}

struct Inner {
    config: SchedulerConfig,
    registry: Mutex<JobRegistry>,
    assigner: NodeAssigner,
    dispatcher: Dispatcher,
    metrics: Arc<dyn MetricsSink>,
    slots: Arc<Semaphore>,
    wake: Notify,
}

/// Job scheduler for a cluster of remote worker nodes.
///
/// Owns the job registry and runs one scheduling loop that:
///
/// 1. Pops the highest-priority dependency-eligible job
/// 2. Asks the [`NodeAssigner`] for a best-fit node
/// 3. Marks the job running, soft-reserves the node's resources and spawns a
///    dispatch task, all under the registry lock
/// 4. Reclaims jobs stranded on nodes that left the active set
///
/// Dispatch tasks run concurrently, bounded by `max_in_flight`; when all
/// slots are taken the loop stops dequeuing until one frees up. Outcomes flow
/// back into the registry, which applies the retry policy.
pub struct Scheduler {
    inner: Arc<Inner>,
    loop_task: std::sync::Mutex<Option<(JoinHandle<()>, CancellationToken)>>,
}

impl Scheduler {
    pub fn new(
        config: SchedulerConfig,
        nodes: Arc<dyn NodeSource>,
        selector: Arc<dyn NodeSelector>,
        connections: Arc<dyn HandleFactory>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        let pool = Arc::new(ConnectionPool::new(connections));
        let dispatcher = Dispatcher::new(pool, &config.remote, config.dispatch_grace());
        let slots = Arc::new(Semaphore::new(config.max_in_flight.max(1)));

        Self {
            inner: Arc::new(Inner {
                registry: Mutex::new(JobRegistry::new()),
                assigner: NodeAssigner::new(nodes, selector),
                dispatcher,
                metrics,
                slots,
                wake: Notify::new(),
                config,
            }),
            loop_task: std::sync::Mutex::new(None),
        }
    }

    /// Queue a job. It keeps its id, priority and dependencies as given.
    ///
    /// Submitting an id that is already known is a no-op returning the
    /// current record; a finished job is never queued again.
    pub async fn submit(&self, job: Job) -> Job {
        let job = {
            let mut registry = self.inner.registry.lock().await;
            if registry.contains(&job.id) {
                return registry.submit(job);
            }
            registry.submit(job)
        };
        tracing::info!(
            job_id = %job.id,
            name = %job.name,
            priority = job.priority,
            dependencies = job.dependencies.len(),
            "Job submitted"
        );
        self.inner.wake.notify_one();
        job
    }

    pub async fn get(&self, id: &Uuid) -> Option<Job> {
        self.inner.registry.lock().await.get(id).cloned()
    }

    /// Like [`Scheduler::get`], but an unknown id is an error
    pub async fn job(&self, id: &Uuid) -> Result<Job> {
        self.get(id)
            .await
            .ok_or_else(|| SchedulerError::JobNotFound(id.to_string()))
    }

    /// Snapshot of every job, oldest submission first
    pub async fn list(&self) -> Vec<Job> {
        self.inner
            .registry
            .lock()
            .await
            .all_jobs()
            .into_iter()
            .cloned()
            .collect()
    }

    /// Cancel a queued or running job.
    ///
    /// A running job's remote execution is not interrupted; its eventual
    /// outcome is discarded. Returns `None` if the job is unknown or already
    /// terminal.
    pub async fn cancel(&self, id: &Uuid) -> Option<Job> {
        let cancelled = self.inner.registry.lock().await.cancel(id);
        if let Some(job) = &cancelled {
            tracing::info!(job_id = %job.id, "Job cancelled");
            self.inner.wake.notify_one();
        }
        cancelled
    }

    /// Whether every submitted job has reached a terminal status
    pub async fn all_terminal(&self) -> bool {
        self.inner.registry.lock().await.all_terminal()
    }

    pub async fn count_with_status(&self, status: JobStatus) -> usize {
        self.inner.registry.lock().await.jobs_with_status(status).len()
    }

    /// Dispatch tasks currently holding a slot
    pub fn in_flight(&self) -> usize {
        self.inner.config.max_in_flight.max(1) - self.inner.slots.available_permits()
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        self.inner.dispatcher.pool()
    }

    /// Nudge the loop, e.g. after the node set changed
    pub fn wake(&self) {
        self.inner.wake.notify_one();
    }

    pub fn is_running(&self) -> bool {
        self.loop_task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    /// Spawn the scheduling loop. Calling it again while running is a no-op.
    pub fn start(&self) {
        let mut slot = self.loop_task.lock().unwrap_or_else(|e| e.into_inner());
        if slot.is_some() {
            tracing::warn!("Scheduler already running");
            return;
        }

        let token = CancellationToken::new();
        let inner = self.inner.clone();
        let loop_token = token.clone();
        let handle = tokio::spawn(async move {
            inner.run(loop_token).await;
        });
        *slot = Some((handle, token));
        tracing::info!(max_in_flight = self.inner.config.max_in_flight, "Scheduler started");
    }

    /// Stop the loop and wait for it to exit. In-flight dispatches keep running.
    pub async fn stop(&self) {
        let running = self
            .loop_task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();

        if let Some((handle, token)) = running {
            token.cancel();
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Scheduler loop panicked");
            }
            tracing::info!(in_flight = self.in_flight(), "Scheduler stopped");
        }
    }
}

impl Inner {
    async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let mut last_recovery = Instant::now();

        while !shutdown.is_cancelled() {
            let mut wait = match self.tick().await {
                Ok(Tick::Assigned) | Ok(Tick::Skipped) => None,
                Ok(Tick::Empty) => {
                    last_recovery = Instant::now();
                    match self.recover().await {
                        0 => Some(self.config.empty_backoff()),
                        _ => None,
                    }
                }
                Ok(Tick::Blocked) => Some(self.config.dependency_backoff()),
                Ok(Tick::NoCapacity) | Ok(Tick::Saturated) => {
                    Some(self.config.no_capacity_backoff())
                }
                Err(e) => {
                    tracing::error!(error = %e, "Scheduler iteration failed");
                    Some(self.config.empty_backoff())
                }
            };

            // Parked or unplaceable jobs must not keep stranded ones from being reclaimed
            if last_recovery.elapsed() >= self.config.recovery_interval() {
                last_recovery = Instant::now();
                if self.recover().await > 0 {
                    wait = None;
                }
            }

            if let Some(wait) = wait {
                self.pause(wait, &shutdown).await;
            }
        }
        tracing::debug!("Scheduler loop exited");
    }

    async fn pause(&self, wait: Duration, shutdown: &CancellationToken) {
        tokio::select! {
            _ = shutdown.cancelled() => {}
            _ = self.wake.notified() => {}
            _ = tokio::time::sleep(wait) => {}
        }
    }

    async fn tick(self: &Arc<Self>) -> Result<Tick> {
        let permit = match self.slots.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(TryAcquireError::NoPermits) => return Ok(Tick::Saturated),
            Err(TryAcquireError::Closed) => {
                return Err(SchedulerError::Internal("dispatch slots closed".to_string()))
            }
        };

        let (entry, job) = {
            let mut registry = self.registry.lock().await;
            let entry = match registry.pop_ready(self.config.dependency_failure) {
                Dequeue::Empty => return Ok(Tick::Empty),
                Dequeue::Blocked => return Ok(Tick::Blocked),
                Dequeue::Ready(entry) => entry,
            };
            let job = registry.get(&entry.job_id).cloned().ok_or_else(|| {
                SchedulerError::JobNotFound(entry.job_id.to_string())
            })?;
            (entry, job)
        };

        let node = match self.assigner.find_node(&job).await {
            Ok(node) => node,
            Err(e) => {
                self.registry.lock().await.reinsert(entry);
                return match e {
                    SchedulerError::ResourceUnavailable(_) => {
                        tracing::debug!(job_id = %job.id, "No active node fits job, requeued");
                        Ok(Tick::NoCapacity)
                    }
                    other => Err(other),
                };
            }
        };

        let mut registry = self.registry.lock().await;
        let Some(assigned) = registry.assign(&job.id, &node.id) else {
            tracing::debug!(job_id = %job.id, "Job left the queue before assignment");
            return Ok(Tick::Skipped);
        };
        if let Err(e) = self
            .assigner
            .reserve(&node.id, &assigned.resource_requirements)
            .await
        {
            tracing::warn!(job_id = %job.id, node_id = %node.id, error = %e, "Soft reservation failed");
        }
        tracing::info!(
            job_id = %assigned.id,
            node_id = %node.id,
            attempt = assigned.attempt,
            retry_count = assigned.retry_count,
            "Job assigned"
        );

        let inner = Arc::clone(self);
        tokio::spawn(async move {
            inner.run_dispatch(node, assigned, permit).await;
        });
        drop(registry);

        Ok(Tick::Assigned)
    }

    async fn run_dispatch(self: Arc<Self>, node: Node, job: Job, permit: OwnedSemaphorePermit) {
        let outcome = self.dispatcher.dispatch(&node, &job).await;
        self.apply_outcome(&job, outcome).await;
        drop(permit);
        self.wake.notify_one();
    }

    async fn apply_outcome(&self, job: &Job, outcome: DispatchOutcome) {
        let mut registry = self.registry.lock().await;

        match outcome {
            DispatchOutcome::Completed(result) => {
                let Some(done) = registry.complete(&job.id, job.attempt, result) else {
                    return;
                };
                drop(registry);
                tracing::info!(
                    job_id = %done.id,
                    execution_time_ms = done.result.as_ref().map(|r| r.execution_time_ms),
                    "Job completed"
                );
                self.metrics.track_job_completion(&done);
            }
            DispatchOutcome::Failed { kind, result } => {
                let Some((decision, updated)) = registry.record_failure(
                    &job.id,
                    job.attempt,
                    kind,
                    result,
                    &self.config.retry_policy,
                ) else {
                    return;
                };
                drop(registry);
                match decision {
                    RetryDecision::Requeue => tracing::info!(
                        job_id = %updated.id,
                        failure = %kind,
                        retry_count = updated.retry_count,
                        max_retries = updated.max_retries,
                        "Job attempt failed, retrying"
                    ),
                    RetryDecision::Finalize => {
                        tracing::warn!(
                            job_id = %updated.id,
                            failure = %kind,
                            exit_code = updated.result.as_ref().map(|r| r.exit_code),
                            "Job failed"
                        );
                        self.metrics.track_job_failure(&updated);
                    }
                }
            }
        }
    }

    /// Reclaim stranded jobs; returns how many went back to the queue
    async fn recover(&self) -> usize {
        let active = match self.assigner.active_node_ids().await {
            Ok(active) => active,
            Err(e) => {
                tracing::error!(error = %e, "Could not read active nodes for recovery");
                return 0;
            }
        };

        let recovered = {
            let mut registry = self.registry.lock().await;
            recover_stranded(&mut registry, &active, &self.config.retry_policy)
        };

        let mut requeued = 0;
        for (decision, job) in &recovered {
            match decision {
                RetryDecision::Requeue => requeued += 1,
                RetryDecision::Finalize => self.metrics.track_job_failure(job),
            }
        }
        requeued
    }
}
