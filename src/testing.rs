//! In-process replica fleet for tests
//!
//! `FakeCluster` serves the node HTTP contract (`POST /replace`, `GET /get`)
//! from axum servers on ephemeral ports. Writes land on the receiving node
//! at once and reach the other nodes after a configurable replication
//! delay. Nodes can be cut off from replication to simulate a convergence
//! defect.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

use crate::client::PatchOp;
use crate::history::VersionToken;
use crate::topology::{NodeConfig, Topology};

type NodeStore = Arc<Mutex<BTreeMap<String, Value>>>;

/// Fake fleet shape.
#[derive(Debug, Clone)]
pub struct FakeClusterOptions {
    pub nodes: usize,
    /// Delay before a write reaches nodes other than the one that took it
    pub replication_delay: Duration,
    /// Indexes of nodes that never receive replicated writes
    pub isolated: Vec<usize>,
}

impl Default for FakeClusterOptions {
    fn default() -> Self {
        FakeClusterOptions {
            nodes: 3,
            replication_delay: Duration::from_millis(10),
            isolated: Vec::new(),
        }
    }
}

struct ClusterState {
    stores: Vec<NodeStore>,
    replication_delay: Duration,
    isolated: Vec<usize>,
}

impl ClusterState {
    fn replicate(self: &Arc<Self>, from: usize, key: String, value: String) {
        for (idx, store) in self.stores.iter().enumerate() {
            if idx == from || self.isolated.contains(&idx) {
                continue;
            }
            let store = store.clone();
            let key = key.clone();
            let value = value.clone();
            let delay = self.replication_delay;
            if delay.is_zero() {
                apply(&store, key, value);
            } else {
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    apply(&store, key, value);
                });
            }
        }
    }
}

// Last-writer-wins on version tokens; anything else just overwrites.
fn apply(store: &NodeStore, key: String, value: String) {
    let mut store = store.lock();
    let newer = match (
        store.get(&key).and_then(Value::as_str).and_then(VersionToken::parse),
        VersionToken::parse(&value),
    ) {
        (Some(current), Some(incoming)) => incoming > current,
        _ => true,
    };
    if newer {
        store.insert(key, Value::String(value));
    }
}

#[derive(Clone)]
struct FakeNode {
    index: usize,
    cluster: Arc<ClusterState>,
}

async fn handle_replace(
    State(node): State<FakeNode>,
    Json(patch): Json<Vec<PatchOp>>,
) -> StatusCode {
    let mut accepted = Vec::with_capacity(patch.len());
    for op in patch {
        match (op.op.as_str(), op.path.strip_prefix('/')) {
            ("add", Some(key)) if !key.is_empty() => accepted.push((key.to_string(), op.value)),
            _ => return StatusCode::BAD_REQUEST,
        }
    }
    for (key, value) in accepted {
        apply(&node.cluster.stores[node.index], key.clone(), value.clone());
        node.cluster.replicate(node.index, key, value);
    }
    StatusCode::OK
}

async fn handle_get(State(node): State<FakeNode>) -> Json<BTreeMap<String, Value>> {
    Json(node.cluster.stores[node.index].lock().clone())
}

fn router(state: FakeNode) -> Router {
    Router::new()
        .route("/replace", post(handle_replace))
        .route("/get", get(handle_get))
        .with_state(state)
}

/// A running fake fleet.
pub struct FakeCluster {
    addrs: Vec<SocketAddr>,
    state: Arc<ClusterState>,
    shutdown_txs: Vec<Option<oneshot::Sender<()>>>,
}

impl FakeCluster {
    /// Start `nodes` instantly-replicating fake nodes.
    pub async fn start(nodes: usize) -> Self {
        Self::with_options(FakeClusterOptions {
            nodes,
            replication_delay: Duration::ZERO,
            isolated: Vec::new(),
        })
        .await
    }

    pub async fn with_options(options: FakeClusterOptions) -> Self {
        let mut listeners = Vec::with_capacity(options.nodes);
        let mut addrs = Vec::with_capacity(options.nodes);
        for _ in 0..options.nodes {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            addrs.push(listener.local_addr().unwrap());
            listeners.push(listener);
        }

        let state = Arc::new(ClusterState {
            stores: (0..options.nodes).map(|_| NodeStore::default()).collect(),
            replication_delay: options.replication_delay,
            isolated: options.isolated,
        });

        let mut shutdown_txs = Vec::with_capacity(options.nodes);
        for (index, listener) in listeners.into_iter().enumerate() {
            let app = router(FakeNode {
                index,
                cluster: state.clone(),
            });
            let (tx, rx) = oneshot::channel::<()>();
            tokio::spawn(async move {
                axum::serve(listener, app)
                    .with_graceful_shutdown(async {
                        let _ = rx.await;
                    })
                    .await
                    .unwrap();
            });
            shutdown_txs.push(Some(tx));
        }

        FakeCluster {
            addrs,
            state,
            shutdown_txs,
        }
    }

    /// Full-mesh topology (`server-0..`) pointing at the fake nodes.
    pub fn topology(&self) -> Topology {
        let names: Vec<String> = (0..self.addrs.len()).map(|i| format!("server-{}", i)).collect();
        let configs = names
            .iter()
            .zip(&self.addrs)
            .map(|(name, addr)| NodeConfig {
                name: name.clone(),
                address: addr.to_string(),
                peers: names.iter().filter(|p| *p != name).cloned().collect(),
            })
            .collect();
        Topology::new(configs).unwrap()
    }

    pub fn node_addr(&self, index: usize) -> SocketAddr {
        self.addrs[index]
    }

    /// Direct view of a node's store
    pub fn store(&self, index: usize) -> BTreeMap<String, Value> {
        self.state.stores[index].lock().clone()
    }

    /// Stop one node's HTTP server.
    pub fn stop_node(&mut self, index: usize) {
        if let Some(tx) = self.shutdown_txs[index].take() {
            let _ = tx.send(());
        }
    }

    pub async fn shutdown(mut self) {
        for index in 0..self.shutdown_txs.len() {
            self.stop_node(index);
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_keeps_newest_token() {
        let store = NodeStore::default();
        apply(&store, "k".to_string(), "version-5".to_string());
        apply(&store, "k".to_string(), "version-3".to_string());
        assert_eq!(store.lock()["k"], Value::String("version-5".to_string()));

        apply(&store, "k".to_string(), "version-6".to_string());
        assert_eq!(store.lock()["k"], Value::String("version-6".to_string()));
    }
}
