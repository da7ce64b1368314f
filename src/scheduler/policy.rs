//! Failure handling policy.
//!
//! Every failed dispatch attempt is classified into a [`FailureKind`] and the
//! [`RetryPolicy`] table maps that kind to a [`Disposition`]. All retryable
//! kinds draw from the job's single `retry_count`/`max_retries` budget.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The remote channel could not be opened, died mid-call, or timed out
    Transport,
    /// The job ran and exited non-zero
    NonZeroExit,
    /// The job exited zero but its output held no usable result object
    ResultParse,
    /// The job's node left the active set while the job was running
    NodeLost,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::Transport => write!(f, "transport"),
            FailureKind::NonZeroExit => write!(f, "non_zero_exit"),
            FailureKind::ResultParse => write!(f, "result_parse"),
            FailureKind::NodeLost => write!(f, "node_lost"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    /// Requeue while the retry budget lasts, then fail
    Retry,
    /// Fail immediately
    Fail,
}

/// What a failed attempt turns into for a specific job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Requeue,
    Finalize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub transport: Disposition,
    pub non_zero_exit: Disposition,
    pub result_parse: Disposition,
    pub node_lost: Disposition,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            transport: Disposition::Retry,
            non_zero_exit: Disposition::Retry,
            result_parse: Disposition::Fail,
            node_lost: Disposition::Retry,
        }
    }
}

impl RetryPolicy {
    pub fn disposition(&self, kind: FailureKind) -> Disposition {
        match kind {
            FailureKind::Transport => self.transport,
            FailureKind::NonZeroExit => self.non_zero_exit,
            FailureKind::ResultParse => self.result_parse,
            FailureKind::NodeLost => self.node_lost,
        }
    }

    pub fn decide(&self, kind: FailureKind, retry_count: u32, max_retries: u32) -> RetryDecision {
        match self.disposition(kind) {
            Disposition::Retry if retry_count < max_retries => RetryDecision::Requeue,
            _ => RetryDecision::Finalize,
        }
    }

    pub fn with(mut self, kind: FailureKind, disposition: Disposition) -> Self {
        match kind {
            FailureKind::Transport => self.transport = disposition,
            FailureKind::NonZeroExit => self.non_zero_exit = disposition,
            FailureKind::ResultParse => self.result_parse = disposition,
            FailureKind::NodeLost => self.node_lost = disposition,
        }
        self
    }
}

/// What happens to a queued job whose dependency can no longer complete
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyFailurePolicy {
    /// Leave the dependent queued indefinitely
    #[default]
    Park,
    /// Cancel the dependent once any dependency failed or was cancelled
    CancelDependents,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_table() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.disposition(FailureKind::Transport), Disposition::Retry);
        assert_eq!(policy.disposition(FailureKind::NonZeroExit), Disposition::Retry);
        assert_eq!(policy.disposition(FailureKind::ResultParse), Disposition::Fail);
        assert_eq!(policy.disposition(FailureKind::NodeLost), Disposition::Retry);
    }

    #[test]
    fn retry_until_budget_is_spent() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.decide(FailureKind::NonZeroExit, 0, 2), RetryDecision::Requeue);
        assert_eq!(policy.decide(FailureKind::NonZeroExit, 1, 2), RetryDecision::Requeue);
        assert_eq!(policy.decide(FailureKind::NonZeroExit, 2, 2), RetryDecision::Finalize);
        assert_eq!(policy.decide(FailureKind::Transport, 0, 0), RetryDecision::Finalize);
    }

    #[test]
    fn parse_failures_are_never_retried_by_default() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.decide(FailureKind::ResultParse, 0, 5), RetryDecision::Finalize);
    }

    #[test]
    fn table_entries_can_be_overridden() {
        let policy = RetryPolicy::default()
            .with(FailureKind::NonZeroExit, Disposition::Fail)
            .with(FailureKind::ResultParse, Disposition::Retry);
        assert_eq!(policy.decide(FailureKind::NonZeroExit, 0, 3), RetryDecision::Finalize);
        assert_eq!(policy.decide(FailureKind::ResultParse, 0, 3), RetryDecision::Requeue);
    }

    #[test]
    fn dependency_policy_defaults_to_park() {
        assert_eq!(DependencyFailurePolicy::default(), DependencyFailurePolicy::Park);
    }
}
