use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::cluster::{Node, NodeId};
use crate::error::Result;
use crate::remote::{HandleFactory, RemoteHandle};

/// One cached remote handle per node.
///
/// Keyed by node id rather than address, so a known node whose address
/// changes keeps its handle until evicted. Liveness is checked lazily on
/// lookup. Concurrent dispatches to the same node share a handle.
pub struct ConnectionPool {
    factory: Arc<dyn HandleFactory>,
    handles: Mutex<HashMap<NodeId, Arc<dyn RemoteHandle>>>,
}

impl ConnectionPool {
    pub fn new(factory: Arc<dyn HandleFactory>) -> Self {
        Self {
            factory,
            handles: Mutex::new(HashMap::new()),
        }
    }

    /// Cached handle for `node` if its transport is active, otherwise a new one
    pub async fn get_connection(&self, node: &Node) -> Result<Arc<dyn RemoteHandle>> {
        let mut handles = self.handles.lock().await;

        if let Some(handle) = handles.get(&node.id) {
            if handle.is_active() {
                return Ok(handle.clone());
            }
            tracing::debug!(node_id = %node.id, "Evicting stale connection");
            handles.remove(&node.id);
        }

        let handle = self.factory.create(node)?;
        tracing::debug!(node_id = %node.id, address = %node.address, "Created connection");
        handles.insert(node.id.clone(), handle.clone());
        Ok(handle)
    }

    /// Drop the cached handle for a node. Returns true if one was cached.
    pub async fn evict(&self, node_id: &str) -> bool {
        self.handles.lock().await.remove(node_id).is_some()
    }

    pub async fn len(&self) -> usize {
        self.handles.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.handles.lock().await.is_empty()
    }
}
