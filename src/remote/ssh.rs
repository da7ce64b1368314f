use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use crate::cluster::{Node, NodeId};
use crate::config::RemoteConfig;
use crate::error::{Result, SchedulerError};
use crate::remote::{ExecOutput, HandleFactory, RemoteHandle};
use crate::scheduler::dispatch::parse_result;

/// ssh exits with 255 when the connection itself fails. A remote command can
/// exit 255 too; its output then still ends with a result object.
const SSH_TRANSPORT_EXIT: i32 = 255;

/// Remote handle backed by the system `ssh` client.
///
/// Commands share one multiplexed control master per node (`ControlMaster=auto`),
/// so the TCP/SSH handshake happens on first use and later commands reuse it
/// while the control socket stays up. A fresh handle counts as active; it goes
/// inactive after a transport failure, or once a command has gone through and
/// the control socket has since disappeared.
#[derive(Debug)]
pub struct SshHandle {
    node_id: NodeId,
    program: PathBuf,
    destination: String,
    port: u16,
    key_path: PathBuf,
    control_path: PathBuf,
    connect_timeout_secs: u64,
    keepalive_secs: u64,
    control_persist_secs: u64,
    used: AtomicBool,
    broken: AtomicBool,
}

impl SshHandle {
    pub fn new(node: &Node, config: &RemoteConfig) -> Self {
        Self {
            node_id: node.id.clone(),
            program: config.ssh_program.clone(),
            destination: format!("{}@{}", node.ssh_user, node.address),
            port: node.ssh_port,
            key_path: config.key_path(&node.id),
            control_path: config.control_path(&node.id),
            connect_timeout_secs: config.connect_timeout_secs,
            keepalive_secs: config.keepalive_secs,
            control_persist_secs: config.control_persist_secs,
            used: AtomicBool::new(false),
            broken: AtomicBool::new(false),
        }
    }

    /// Full argument list passed to `ssh` for `command`
    pub fn command_args(&self, command: &str) -> Vec<String> {
        vec![
            "-p".to_string(),
            self.port.to_string(),
            "-i".to_string(),
            self.key_path.display().to_string(),
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            "StrictHostKeyChecking=accept-new".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.connect_timeout_secs),
            "-o".to_string(),
            format!("ServerAliveInterval={}", self.keepalive_secs),
            "-o".to_string(),
            "ControlMaster=auto".to_string(),
            "-o".to_string(),
            format!("ControlPath={}", self.control_path.display()),
            "-o".to_string(),
            format!("ControlPersist={}", self.control_persist_secs),
            self.destination.clone(),
            "--".to_string(),
            command.to_string(),
        ]
    }

    fn transport_error(&self, message: impl Into<String>) -> SchedulerError {
        self.broken.store(true, Ordering::SeqCst);
        SchedulerError::RemoteConnection {
            node: self.node_id.clone(),
            message: message.into(),
        }
    }
}

#[async_trait]
impl RemoteHandle for SshHandle {
    async fn exec(&self, command: &str, timeout: Duration) -> Result<ExecOutput> {
        tracing::debug!(node_id = %self.node_id, destination = %self.destination, "Running remote command");

        let child = Command::new(&self.program)
            .args(self.command_args(command))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(timeout, child).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(self.transport_error(e.to_string())),
            Err(_) => {
                self.broken.store(true, Ordering::SeqCst);
                return Err(SchedulerError::RemoteTimeout {
                    node: self.node_id.clone(),
                    after: timeout,
                });
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        match output.status.code() {
            Some(SSH_TRANSPORT_EXIT) if parse_result(&stdout).is_err() => {
                Err(self.transport_error(stderr.trim().to_string()))
            }
            Some(exit_code) => {
                self.used.store(true, Ordering::SeqCst);
                Ok(ExecOutput {
                    exit_code,
                    stdout,
                    stderr,
                })
            }
            None => Err(self.transport_error("ssh terminated by signal")),
        }
    }

    fn is_active(&self) -> bool {
        if self.broken.load(Ordering::SeqCst) {
            return false;
        }
        !self.used.load(Ordering::SeqCst) || self.control_path.exists()
    }
}

/// Builds [`SshHandle`]s using the node's address, ssh user/port and the
/// per-node key under the configured key directory
#[derive(Debug, Clone)]
pub struct SshHandleFactory {
    config: RemoteConfig,
}

impl SshHandleFactory {
    pub fn new(config: RemoteConfig) -> Self {
        Self { config }
    }
}

impl HandleFactory for SshHandleFactory {
    fn create(&self, node: &Node) -> Result<Arc<dyn RemoteHandle>> {
        std::fs::create_dir_all(&self.config.control_dir)?;
        Ok(Arc::new(SshHandle::new(node, &self.config)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(dir: &std::path::Path) -> RemoteConfig {
        RemoteConfig {
            key_dir: dir.join("keys"),
            control_dir: dir.join("ctl"),
            ..Default::default()
        }
    }

    #[test]
    fn args_target_node_with_its_own_key() {
        let dir = tempfile::tempdir().unwrap();
        let node = Node::new("worker-1", "10.1.2.3").with_ssh("runner", 2222);
        let handle = SshHandle::new(&node, &test_config(dir.path()));

        let args = handle.command_args("uptime");
        assert_eq!(&args[..2], &["-p".to_string(), "2222".to_string()]);
        assert_eq!(args[3], dir.path().join("keys/worker-1_id_rsa").display().to_string());
        assert!(args.contains(&"ControlMaster=auto".to_string()));
        assert!(args.contains(&"BatchMode=yes".to_string()));
        assert_eq!(args[args.len() - 3], "runner@10.1.2.3");
        assert_eq!(args[args.len() - 2], "--");
        assert_eq!(args[args.len() - 1], "uptime");
    }

    #[test]
    fn fresh_handle_is_active() {
        let dir = tempfile::tempdir().unwrap();
        let factory = SshHandleFactory::new(test_config(dir.path()));
        let handle = factory.create(&Node::new("n1", "127.0.0.1")).unwrap();

        assert!(handle.is_active());
        assert!(dir.path().join("ctl").is_dir());
    }

    #[test]
    fn used_handle_needs_its_control_socket() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        std::fs::create_dir_all(&config.control_dir).unwrap();
        let handle = SshHandle::new(&Node::new("n1", "127.0.0.1"), &config);
        handle.used.store(true, Ordering::SeqCst);
        assert!(!handle.is_active());

        std::fs::write(config.control_path("n1"), b"").unwrap();
        assert!(handle.is_active());

        let _ = handle.transport_error("connection reset");
        assert!(!handle.is_active());
    }
}
