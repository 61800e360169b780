//! Convergence verification harness for replicated key-value nodes
//!
//! Launches a fleet of node processes in a fixed mesh, then runs randomized
//! write/read-back rounds against them to measure how long writes take to
//! become visible at other replicas, and flags writes that never do.

pub mod campaign;
pub mod client;
pub mod config;
pub mod error;
pub mod fleet;
pub mod history;
pub mod prober;
pub mod readiness;
pub mod topology;

/// Testing utilities for integration tests.
pub mod testing;

pub use campaign::{Campaign, CampaignSettings};
pub use client::{ClusterSnapshot, PatchOp, ReplicaApi, ReplicaClient};
pub use config::HarnessConfig;
pub use error::{ConfigError, HarnessError, ProcessStartError, TransportError};
pub use fleet::{LaunchOptions, NodeFleet, NodeHandle, NodeState, ShutdownPolicy, ShutdownReport};
pub use history::{CampaignReport, ProbeResult, RoundOutcome, RoundRecord, VersionToken, WriteRecord};
pub use prober::ConsistencyProber;
pub use readiness::ReadinessGate;
pub use topology::{NodeConfig, NodeSpec, Topology};
