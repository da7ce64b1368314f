//! Remote execution channel to worker nodes.
//!
//! - [`RemoteHandle`]: runs one command on a node with a timeout
//! - [`HandleFactory`]: builds a handle from a node's address and credentials
//! - [`ConnectionPool`]: caches one handle per node id and replaces stale ones
//! - [`ssh`]: the OpenSSH-backed implementation used in production

pub mod pool;
pub mod ssh;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::cluster::Node;
use crate::error::Result;

pub use pool::ConnectionPool;
pub use ssh::{SshHandle, SshHandleFactory};

/// Captured output of a remote command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

#[async_trait]
pub trait RemoteHandle: Send + Sync {
    /// Run `command` on the node. Transport problems and timeouts are errors;
    /// a command that ran and exited non-zero is not.
    async fn exec(&self, command: &str, timeout: Duration) -> Result<ExecOutput>;

    /// Whether the underlying transport is still usable
    fn is_active(&self) -> bool;
}

pub trait HandleFactory: Send + Sync {
    /// Build a handle for `node`. Must not connect eagerly.
    fn create(&self, node: &Node) -> Result<Arc<dyn RemoteHandle>>;
}
