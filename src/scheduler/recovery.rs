use std::collections::HashSet;

use crate::cluster::NodeId;
use crate::scheduler::dispatch::TRANSPORT_FAILURE_EXIT_CODE;
use crate::scheduler::job::{Job, JobResult};
use crate::scheduler::policy::{FailureKind, RetryDecision, RetryPolicy};
use crate::scheduler::registry::JobRegistry;

/// Reclaim running jobs whose node is no longer in `active`.
///
/// Each stranded job is treated as a [`FailureKind::NodeLost`] failure of its
/// current attempt: requeued with `retry_count + 1` while budget remains,
/// failed otherwise. A node that is only briefly unreachable is handled the
/// same way as one that is gone for good.
pub fn recover_stranded(
    registry: &mut JobRegistry,
    active: &HashSet<NodeId>,
    policy: &RetryPolicy,
) -> Vec<(RetryDecision, Job)> {
    let stranded: Vec<_> = registry
        .running()
        .into_iter()
        .filter(|(_, node, _)| !active.contains(node))
        .collect();

    stranded
        .into_iter()
        .filter_map(|(job_id, node_id, attempt)| {
            let diagnostic = JobResult::new(
                TRANSPORT_FAILURE_EXIT_CODE,
                "",
                format!("node {} left the active set while the job was running", node_id),
            );
            let (decision, job) = registry.record_failure(
                &job_id,
                attempt,
                FailureKind::NodeLost,
                Some(diagnostic),
                policy,
            )?;
            match decision {
                RetryDecision::Requeue => tracing::warn!(
                    job_id = %job_id,
                    node_id = %node_id,
                    retry_count = job.retry_count,
                    "Stranded job requeued"
                ),
                RetryDecision::Finalize => tracing::error!(
                    job_id = %job_id,
                    node_id = %node_id,
                    "Stranded job out of retries, marked failed"
                ),
            }
            Some((decision, job))
        })
        .collect()
}
