use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Remote connection to node {node} failed: {message}")]
    RemoteConnection { node: String, message: String },

    #[error("Remote command on node {node} timed out after {after:?}")]
    RemoteTimeout { node: String, after: Duration },

    #[error("No active node can satisfy the requirements of job {0}")]
    ResourceUnavailable(Uuid),

    #[error("Failed to parse result: {0}")]
    ResultParse(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
