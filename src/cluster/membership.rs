use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Instant;

use async_trait::async_trait;

use crate::cluster::{Node, NodeId, NodeResources, NodeSource, NodeStatus};
use crate::error::{Result, SchedulerError};
use crate::scheduler::job::ResourceRequirements;

/// Membership entry for one worker node
#[derive(Debug, Clone)]
struct NodeEntry {
    node: Node,
    last_heartbeat: Instant,
}

impl NodeEntry {
    fn new(node: Node) -> Self {
        Self {
            node,
            last_heartbeat: Instant::now(),
        }
    }

    fn is_alive(&self, timeout_ms: Option<u64>) -> bool {
        match timeout_ms {
            Some(timeout_ms) => self.last_heartbeat.elapsed().as_millis() < timeout_ms as u128,
            None => true,
        }
    }
}

/// In-memory node membership keyed by node id.
///
/// A node is active while its status is [`NodeStatus::Active`] and, when a
/// heartbeat timeout is configured, it has reported within that window.
/// Heartbeats carry the node's authoritative resources report, which replaces
/// whatever soft reservations the scheduler applied since the last one.
#[derive(Debug, Default)]
pub struct NodeRegistry {
    nodes: RwLock<HashMap<NodeId, NodeEntry>>,
    heartbeat_timeout_ms: Option<u64>,
}

impl NodeRegistry {
    /// Registry whose nodes never expire; membership changes only explicitly.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_heartbeat_timeout(timeout_ms: u64) -> Self {
        Self {
            nodes: RwLock::new(HashMap::new()),
            heartbeat_timeout_ms: Some(timeout_ms),
        }
    }

    /// Register a node, replacing any previous entry with the same id
    pub fn register(&self, node: Node) {
        tracing::info!(node_id = %node.id, address = %node.address, "Node registered");
        self.write().insert(node.id.clone(), NodeEntry::new(node));
    }

    /// Record a heartbeat, optionally with a fresh resources report
    pub fn heartbeat(&self, node_id: &str, resources: Option<NodeResources>) -> Result<()> {
        let mut nodes = self.write();
        let entry = nodes
            .get_mut(node_id)
            .ok_or_else(|| SchedulerError::NodeNotFound(node_id.to_string()))?;
        entry.last_heartbeat = Instant::now();
        if let Some(resources) = resources {
            entry.node.resources = Some(resources);
        }
        if entry.node.status == NodeStatus::Offline {
            tracing::info!(node_id, "Node back online");
            entry.node.status = NodeStatus::Active;
        }
        Ok(())
    }

    pub fn set_status(&self, node_id: &str, status: NodeStatus) -> Result<()> {
        let mut nodes = self.write();
        let entry = nodes
            .get_mut(node_id)
            .ok_or_else(|| SchedulerError::NodeNotFound(node_id.to_string()))?;
        tracing::info!(node_id, status = %status, "Node status changed");
        entry.node.status = status;
        Ok(())
    }

    pub fn remove(&self, node_id: &str) -> Option<Node> {
        let removed = self.write().remove(node_id).map(|e| e.node);
        if removed.is_some() {
            tracing::info!(node_id, "Node removed");
        }
        removed
    }

    pub fn get(&self, node_id: &str) -> Option<Node> {
        self.read().get(node_id).map(|e| e.node.clone())
    }

    /// Active nodes, sorted by id for stable iteration
    pub fn active(&self) -> Vec<Node> {
        let mut nodes: Vec<Node> = self
            .read()
            .values()
            .filter(|e| e.node.status == NodeStatus::Active && e.is_alive(self.heartbeat_timeout_ms))
            .map(|e| e.node.clone())
            .collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        nodes
    }

    /// Ids of nodes that are registered but have missed their heartbeat window
    pub fn expired(&self) -> Vec<NodeId> {
        self.read()
            .values()
            .filter(|e| !e.is_alive(self.heartbeat_timeout_ms))
            .map(|e| e.node.id.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<NodeId, NodeEntry>> {
        self.nodes.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<NodeId, NodeEntry>> {
        self.nodes.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl NodeSource for NodeRegistry {
    async fn active_nodes(&self) -> Result<Vec<Node>> {
        Ok(self.active())
    }

    async fn reserve(&self, node_id: &str, req: &ResourceRequirements) -> Result<()> {
        let mut nodes = self.write();
        let entry = nodes
            .get_mut(node_id)
            .ok_or_else(|| SchedulerError::NodeNotFound(node_id.to_string()))?;
        if let Some(resources) = entry.node.resources.as_mut() {
            resources.reserve(req);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str) -> Node {
        Node::new(id, "10.0.0.1").with_resources(NodeResources::new(4.0, 4096))
    }

    #[test]
    fn registered_nodes_are_active() {
        let registry = NodeRegistry::new();
        registry.register(node("b"));
        registry.register(node("a"));

        let ids: Vec<_> = registry.active().into_iter().map(|n| n.id).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn offline_and_removed_nodes_are_not_active() {
        let registry = NodeRegistry::new();
        registry.register(node("a"));
        registry.register(node("b"));

        registry.set_status("a", NodeStatus::Offline).unwrap();
        registry.remove("b");

        assert!(registry.active().is_empty());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn heartbeat_timeout_expires_nodes() {
        let registry = NodeRegistry::with_heartbeat_timeout(50);
        registry.register(node("a"));
        assert_eq!(registry.active().len(), 1);

        std::thread::sleep(std::time::Duration::from_millis(80));
        assert!(registry.active().is_empty());
        assert_eq!(registry.expired(), vec!["a".to_string()]);

        registry.heartbeat("a", None).unwrap();
        assert_eq!(registry.active().len(), 1);
    }

    #[test]
    fn heartbeat_for_unknown_node_fails() {
        let registry = NodeRegistry::new();
        let err = registry.heartbeat("ghost", None).unwrap_err();
        assert!(matches!(err, SchedulerError::NodeNotFound(id) if id == "ghost"));
    }

    #[tokio::test]
    async fn reservation_is_corrected_only_by_report() {
        let registry = NodeRegistry::new();
        registry.register(node("a"));

        let req = ResourceRequirements::new(1.5, 1024);
        registry.reserve("a", &req).await.unwrap();
        registry.reserve("a", &req).await.unwrap();

        let resources = registry.get("a").unwrap().resources.unwrap();
        assert_eq!(resources.cpu_available, 1.0);
        assert_eq!(resources.memory_available_mb, 2048);

        registry
            .heartbeat("a", Some(NodeResources::new(4.0, 4096)))
            .unwrap();
        let resources = registry.get("a").unwrap().resources.unwrap();
        assert_eq!(resources.cpu_available, 4.0);
        assert_eq!(resources.memory_available_mb, 4096);
    }
}
