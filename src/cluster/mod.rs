//! Cluster membership as seen by the scheduler.
//!
//! The scheduler does not own node health tracking or placement heuristics.
//! It consumes them through two seams:
//!
//! - [`NodeSource`]: the current set of healthy nodes, plus the soft
//!   reservation hook applied when a job is assigned
//! - [`NodeSelector`]: picks one best-fit node for a job's requirements
//!
//! [`NodeRegistry`] and [`BestFitSelector`] are the in-process reference
//! implementations used by the `master` command and the tests.

pub mod membership;
pub mod selector;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::scheduler::job::ResourceRequirements;

pub use membership::NodeRegistry;
pub use selector::BestFitSelector;

pub type NodeId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    #[default]
    Active,
    Offline,
    Draining,
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeStatus::Active => write!(f, "active"),
            NodeStatus::Offline => write!(f, "offline"),
            NodeStatus::Draining => write!(f, "draining"),
        }
    }
}

/// Resources snapshot reported by a worker node.
///
/// `cpu_available` and `memory_available_mb` double as a soft reservation
/// cache: the scheduler decrements them on assignment and only a fresh report
/// from the node restores them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct NodeResources {
    pub cpu_total: f64,
    pub cpu_available: f64,
    pub memory_total_mb: u64,
    pub memory_available_mb: i64,
    #[serde(default)]
    pub disk_total_gb: f64,
    #[serde(default)]
    pub disk_free_gb: f64,
    #[serde(default)]
    pub gpu_available: bool,
    #[serde(default)]
    pub cached_images: Vec<String>,
}

impl NodeResources {
    pub fn new(cpu: f64, memory_mb: u64) -> Self {
        Self {
            cpu_total: cpu,
            cpu_available: cpu,
            memory_total_mb: memory_mb,
            memory_available_mb: memory_mb as i64,
            ..Default::default()
        }
    }

    pub fn fits(&self, req: &ResourceRequirements) -> bool {
        self.cpu_available >= req.cpu_cores && self.memory_available_mb >= req.memory_mb as i64
    }

    /// Apply the optimistic decrement for an assigned job. May go negative.
    pub fn reserve(&mut self, req: &ResourceRequirements) {
        self.cpu_available -= req.cpu_cores;
        self.memory_available_mb -= req.memory_mb as i64;
    }
}

fn default_ssh_user() -> String {
    "worker".to_string()
}

fn default_ssh_port() -> u16 {
    22
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    /// Host name or IP the remote channel connects to
    pub address: String,
    #[serde(default = "default_ssh_user")]
    pub ssh_user: String,
    #[serde(default = "default_ssh_port")]
    pub ssh_port: u16,
    #[serde(default)]
    pub status: NodeStatus,
    #[serde(default)]
    pub resources: Option<NodeResources>,
}

impl Node {
    pub fn new(id: impl Into<NodeId>, address: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
            ssh_user: default_ssh_user(),
            ssh_port: default_ssh_port(),
            status: NodeStatus::Active,
            resources: None,
        }
    }

    pub fn with_resources(mut self, resources: NodeResources) -> Self {
        self.resources = Some(resources);
        self
    }

    pub fn with_ssh(mut self, user: impl Into<String>, port: u16) -> Self {
        self.ssh_user = user.into();
        self.ssh_port = port;
        self
    }
}

/// Source of the currently healthy node set.
#[async_trait]
pub trait NodeSource: Send + Sync {
    /// Nodes currently considered healthy.
    async fn active_nodes(&self) -> Result<Vec<Node>>;

    /// Soft-reserve `req` on the node's cached resources.
    async fn reserve(&self, node_id: &str, req: &ResourceRequirements) -> Result<()>;
}

/// Placement heuristic: one node for the given requirements, or none.
pub trait NodeSelector: Send + Sync {
    fn select(&self, nodes: &[Node], req: &ResourceRequirements) -> Option<Node>;
}
