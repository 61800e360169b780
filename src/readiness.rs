//! Readiness barrier between fleet startup and the first round
//!
//! Nodes have no dedicated "ready" signal, so the default gate treats a
//! successful `GET /get` as ready. The fixed warm-up sleep remains available
//! as a degraded mode for nodes that answer reads before they have joined
//! the mesh.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::client::ReplicaApi;
use crate::config::{ReadinessConfig, ReadinessKind};
use crate::error::HarnessError;
use crate::topology::Topology;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadinessGate {
    /// Poll each node's read endpoint until all of them answer
    Probe { timeout: Duration, interval: Duration },
    /// Sleep and hope
    WarmUp { delay: Duration },
}

impl ReadinessGate {
    pub fn from_config(config: &ReadinessConfig) -> Self {
        match config.mode {
            ReadinessKind::Probe => ReadinessGate::Probe {
                timeout: Duration::from_millis(config.timeout_ms),
                interval: Duration::from_millis(config.interval_ms),
            },
            ReadinessKind::Warmup => ReadinessGate::WarmUp {
                delay: Duration::from_millis(config.warmup_ms),
            },
        }
    }

    /// Block until the fleet is considered ready.
    pub async fn wait(&self, api: &dyn ReplicaApi, topology: &Topology) -> Result<(), HarnessError> {
        match *self {
            ReadinessGate::WarmUp { delay } => {
                warn!(?delay, "no readiness probe, relying on fixed warm-up delay");
                tokio::time::sleep(delay).await;
                Ok(())
            }
            ReadinessGate::Probe { timeout, interval } => {
                wait_for_reads(api, topology, timeout, interval).await
            }
        }
    }
}

async fn wait_for_reads(
    api: &dyn ReplicaApi,
    topology: &Topology,
    timeout: Duration,
    interval: Duration,
) -> Result<(), HarnessError> {
    let start = Instant::now();
    let mut pending: Vec<_> = topology.list_nodes().iter().collect();

    loop {
        let mut still_pending = Vec::with_capacity(pending.len());
        for node in pending {
            match api.read_snapshot(&node.address).await {
                Ok(_) => debug!(node = %node.name, "node answered readiness probe"),
                Err(e) => {
                    debug!(node = %node.name, error = %e, "node not ready yet");
                    still_pending.push(node);
                }
            }
        }
        pending = still_pending;

        if pending.is_empty() {
            info!(nodes = topology.len(), elapsed = ?start.elapsed(), "all nodes ready");
            return Ok(());
        }
        if start.elapsed() >= timeout {
            return Err(HarnessError::NotReady {
                pending: pending.iter().map(|n| n.name.clone()).collect(),
                waited_ms: start.elapsed().as_millis() as u64,
            });
        }
        tokio::time::sleep(interval).await;
    }
}
