use std::path::PathBuf;
use std::time::Duration;

use crate::scheduler::policy::{DependencyFailurePolicy, RetryPolicy};

/// Sandbox flags for worker-side container execution.
///
/// The image, cpu and memory limits come from each job's resource
/// requirements; these settings apply to every container.
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Disable network access in container
    pub network_disabled: bool,
    /// Drop all capabilities and forbid privilege escalation
    pub drop_capabilities: bool,
    /// Mount the container root filesystem read-only
    pub read_only_rootfs: bool,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            network_disabled: true,
            drop_capabilities: true,
            read_only_rootfs: true,
        }
    }
}

/// How the master reaches worker nodes.
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    /// Command run on the worker; the serialized job is appended as one
    /// single-quoted argument
    pub worker_entry_point: String,
    /// ssh client binary
    pub ssh_program: PathBuf,
    /// Directory holding per-node private keys named `<node_id>_id_rsa`
    pub key_dir: PathBuf,
    /// Directory for ssh control sockets
    pub control_dir: PathBuf,
    pub connect_timeout_secs: u64,
    pub keepalive_secs: u64,
    /// How long an idle control master stays up
    pub control_persist_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            worker_entry_point: "fleetsched execute-job".to_string(),
            ssh_program: PathBuf::from("ssh"),
            key_dir: PathBuf::from("keys"),
            control_dir: std::env::temp_dir().join("fleetsched-ssh"),
            connect_timeout_secs: 10,
            keepalive_secs: 30,
            control_persist_secs: 600,
        }
    }
}

impl RemoteConfig {
    pub fn key_path(&self, node_id: &str) -> PathBuf {
        self.key_dir.join(format!("{}_id_rsa", node_id))
    }

    pub fn control_path(&self, node_id: &str) -> PathBuf {
        let safe: String = node_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.control_dir.join(format!("{}.sock", safe))
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Poll interval while the queue is empty
    pub empty_backoff_ms: u64,
    /// Back-off when every queued job is waiting on dependencies
    pub dependency_backoff_ms: u64,
    /// Back-off when no active node fits the next job, or all dispatch slots are taken
    pub no_capacity_backoff_ms: u64,
    /// Stranded-job check interval while the queue is not empty
    pub recovery_interval_ms: u64,
    /// Added to each job's own timeout for the remote call
    pub dispatch_grace_secs: u64,
    /// Maximum concurrently running dispatches
    pub max_in_flight: usize,
    pub retry_policy: RetryPolicy,
    pub dependency_failure: DependencyFailurePolicy,
    pub remote: RemoteConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            empty_backoff_ms: 1000,
            dependency_backoff_ms: 500,
            no_capacity_backoff_ms: 1000,
            recovery_interval_ms: 1000,
            dispatch_grace_secs: 10,
            max_in_flight: 64,
            retry_policy: RetryPolicy::default(),
            dependency_failure: DependencyFailurePolicy::default(),
            remote: RemoteConfig::default(),
        }
    }
}

impl SchedulerConfig {
    pub fn empty_backoff(&self) -> Duration {
        Duration::from_millis(self.empty_backoff_ms)
    }

    pub fn dependency_backoff(&self) -> Duration {
        Duration::from_millis(self.dependency_backoff_ms)
    }

    pub fn no_capacity_backoff(&self) -> Duration {
        Duration::from_millis(self.no_capacity_backoff_ms)
    }

    pub fn recovery_interval(&self) -> Duration {
        Duration::from_millis(self.recovery_interval_ms)
    }

    pub fn dispatch_grace(&self) -> Duration {
        Duration::from_secs(self.dispatch_grace_secs)
    }

    /// Use the same interval for every back-off and the recovery check
    pub fn with_poll_interval_ms(mut self, ms: u64) -> Self {
        self.empty_backoff_ms = ms;
        self.dependency_backoff_ms = ms;
        self.no_capacity_backoff_ms = ms;
        self.recovery_interval_ms = ms;
        self
    }

    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight.max(1);
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn with_dependency_failure(mut self, policy: DependencyFailurePolicy) -> Self {
        self.dependency_failure = policy;
        self
    }

    pub fn with_remote(mut self, remote: RemoteConfig) -> Self {
        self.remote = remote;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::policy::{Disposition, FailureKind};

    #[test]
    fn sandbox_config_default() {
        let cfg = SandboxConfig::default();
        assert!(cfg.network_disabled);
        assert!(cfg.drop_capabilities);
        assert!(cfg.read_only_rootfs);
    }

    #[test]
    fn scheduler_config_default() {
        let cfg = SchedulerConfig::default();
        assert_eq!(cfg.empty_backoff(), Duration::from_secs(1));
        assert_eq!(cfg.dependency_backoff(), Duration::from_millis(500));
        assert_eq!(cfg.no_capacity_backoff(), Duration::from_secs(1));
        assert_eq!(cfg.dispatch_grace(), Duration::from_secs(10));
        assert_eq!(cfg.max_in_flight, 64);
        assert_eq!(cfg.dependency_failure, DependencyFailurePolicy::Park);
        assert_eq!(
            cfg.retry_policy.disposition(FailureKind::ResultParse),
            Disposition::Fail
        );
    }

    #[test]
    fn poll_interval_sets_every_backoff() {
        let cfg = SchedulerConfig::default().with_poll_interval_ms(20);
        assert_eq!(cfg.empty_backoff_ms, 20);
        assert_eq!(cfg.dependency_backoff_ms, 20);
        assert_eq!(cfg.no_capacity_backoff_ms, 20);
        assert_eq!(cfg.recovery_interval_ms, 20);
    }

    #[test]
    fn max_in_flight_is_at_least_one() {
        let cfg = SchedulerConfig::default().with_max_in_flight(0);
        assert_eq!(cfg.max_in_flight, 1);
    }

    #[test]
    fn remote_paths_are_per_node() {
        let cfg = RemoteConfig {
            key_dir: PathBuf::from("/etc/fleet/keys"),
            control_dir: PathBuf::from("/run/fleet"),
            ..Default::default()
        };
        assert_eq!(cfg.key_path("gpu-01"), PathBuf::from("/etc/fleet/keys/gpu-01_id_rsa"));
        assert_eq!(cfg.control_path("rack/3"), PathBuf::from("/run/fleet/rack_3.sock"));
    }

    #[test]
    fn default_entry_point() {
        assert_eq!(
            RemoteConfig::default().worker_entry_point,
            "fleetsched execute-job"
        );
    }
}
