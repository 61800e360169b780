//! Error taxonomy for the harness
//!
//! Only [`ConfigError`] and [`ProcessStartError`] stop a campaign. Transport
//! failures are recorded per round, and convergence timeouts and shutdown
//! stragglers are reported rather than raised.

use std::path::PathBuf;

use thiserror::Error;

/// Invalid topology or unreadable configuration. Raised before any process starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("topology has no nodes")]
    EmptyTopology,

    #[error("duplicate node name: {0}")]
    DuplicateNode(String),

    #[error("node {node} lists unknown peer {peer}")]
    UnknownPeer { node: String, peer: String },

    #[error("node {0} lists itself as a peer")]
    SelfPeer(String),

    #[error("failed to read config file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// The OS refused to launch a node binary (or its log file could not be opened).
#[derive(Debug, Error)]
#[error("failed to start node {node} from {}: {source}", .binary.display())]
pub struct ProcessStartError {
    pub node: String,
    pub binary: PathBuf,
    #[source]
    pub source: std::io::Error,
}

/// A write or read against a node did not complete with a usable response.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("cannot reach {address}: {message}")]
    Connect { address: String, message: String },

    #[error("request to {address} timed out")]
    Timeout { address: String },

    #[error("{address} answered with status {status}")]
    Status { address: String, status: u16 },

    #[error("malformed response from {address}: {message}")]
    Decode { address: String, message: String },
}

/// Fatal conditions that abort a campaign.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Start(#[from] ProcessStartError),

    #[error("nodes not ready after {waited_ms}ms: {}", .pending.join(", "))]
    NotReady { pending: Vec<String>, waited_ms: u64 },
}

pub type Result<T> = std::result::Result<T, HarnessError>;
