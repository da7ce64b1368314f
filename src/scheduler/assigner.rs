use std::collections::HashSet;
use std::sync::Arc;

use crate::cluster::{Node, NodeId, NodeSelector, NodeSource};
use crate::error::{Result, SchedulerError};
use crate::scheduler::job::{Job, ResourceRequirements};

/// Picks nodes for jobs using the membership source and placement heuristic
#[derive(Clone)]
pub struct NodeAssigner {
    source: Arc<dyn NodeSource>,
    selector: Arc<dyn NodeSelector>,
}

impl NodeAssigner {
    pub fn new(source: Arc<dyn NodeSource>, selector: Arc<dyn NodeSelector>) -> Self {
        Self { source, selector }
    }

    /// Best-fit active node for `job`.
    ///
    /// Fails with [`SchedulerError::ResourceUnavailable`] when no active node
    /// fits right now; callers requeue and try again later.
    pub async fn find_node(&self, job: &Job) -> Result<Node> {
        let nodes = self.source.active_nodes().await?;
        self.selector
            .select(&nodes, &job.resource_requirements)
            .ok_or(SchedulerError::ResourceUnavailable(job.id))
    }

    /// Apply the soft reservation for a job assigned to `node_id`
    pub async fn reserve(&self, node_id: &str, req: &ResourceRequirements) -> Result<()> {
        self.source.reserve(node_id, req).await
    }

    pub async fn active_node_ids(&self) -> Result<HashSet<NodeId>> {
        Ok(self
            .source
            .active_nodes()
            .await?
            .into_iter()
            .map(|n| n.id)
            .collect())
    }
}
