use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cluster::NodeId;

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_IMAGE: &str = "alpine:latest";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Completed, failed and cancelled jobs never change status again
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Queued => write!(f, "queued"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
            JobStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// What a job needs from the node that runs it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceRequirements {
    pub cpu_cores: f64,
    pub memory_mb: u64,
    pub docker_image: String,
    /// Execution timeout in seconds
    pub timeout: u64,
}

impl Default for ResourceRequirements {
    fn default() -> Self {
        Self {
            cpu_cores: 1.0,
            memory_mb: 256,
            docker_image: DEFAULT_IMAGE.to_string(),
            timeout: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl ResourceRequirements {
    pub fn new(cpu_cores: f64, memory_mb: u64) -> Self {
        Self {
            cpu_cores,
            memory_mb,
            ..Default::default()
        }
    }

    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.docker_image = image.into();
        self
    }

    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout = timeout_secs;
        self
    }
}

/// Outcome of one execution attempt as reported by the worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub execution_time_ms: u64,
}

impl JobResult {
    pub fn new(exit_code: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: stdout.into(),
            stderr: stderr.into(),
            execution_time_ms: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub name: String,
    pub command: String,
    pub resource_requirements: ResourceRequirements,
    /// Higher runs first
    pub priority: i32,
    pub dependencies: Vec<Uuid>,
    pub submitted_at: DateTime<Utc>,
    pub status: JobStatus,
    /// Present iff the job is running
    pub assigned_node: Option<NodeId>,
    /// Node of the most recent dispatch attempt, kept after the job leaves it
    pub executed_on: Option<NodeId>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub result: Option<JobResult>,
    /// Bumped on every assignment; outcomes from older attempts are discarded.
    #[serde(skip)]
    pub(crate) attempt: u64,
}

impl Job {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self::with_id(Uuid::new_v4(), name, command)
    }

    pub fn with_id(id: Uuid, name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            command: command.into(),
            resource_requirements: ResourceRequirements::default(),
            priority: 0,
            dependencies: Vec::new(),
            submitted_at: Utc::now(),
            status: JobStatus::Queued,
            assigned_node: None,
            executed_on: None,
            started_at: None,
            completed_at: None,
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            result: None,
            attempt: 0,
        }
    }

    pub fn with_requirements(mut self, requirements: ResourceRequirements) -> Self {
        self.resource_requirements = requirements;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_dependencies(mut self, dependencies: Vec<Uuid>) -> Self {
        self.dependencies = dependencies;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Transfer representation handed to the worker entry point
    pub fn to_wire(&self) -> WireJob {
        WireJob {
            id: self.id,
            name: self.name.clone(),
            command: self.command.clone(),
            resource_requirements: self.resource_requirements.clone(),
            priority: self.priority,
            dependencies: self.dependencies.clone(),
            retry_count: self.retry_count,
            max_retries: self.max_retries,
        }
    }
}

/// Job as it travels to the worker: scheduling state stays on the master.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireJob {
    pub id: Uuid,
    #[serde(default)]
    pub name: String,
    pub command: String,
    pub resource_requirements: ResourceRequirements,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub dependencies: Vec<Uuid>,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub max_retries: u32,
}
