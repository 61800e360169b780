//! Harness configuration
//!
//! Every section has defaults matching the stock five-node setup, so an empty
//! TOML file (or no file at all) gives a runnable configuration.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::topology::NodeConfig;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Node binary launched once per node
    pub node_binary: PathBuf,
    /// Fleet layout; peers are referenced by node name
    pub nodes: Vec<NodeConfig>,
    pub launch: LaunchConfig,
    pub shutdown: ShutdownConfig,
    pub client: ClientConfig,
    pub probe: ProbeConfig,
    pub readiness: ReadinessConfig,
    pub campaign: CampaignConfig,
    pub logging: LoggingConfig,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            node_binary: PathBuf::from("./replicaStorage"),
            nodes: NodeConfig::full_mesh(5, "127.0.0.1", 8080),
            launch: LaunchConfig::default(),
            shutdown: ShutdownConfig::default(),
            client: ClientConfig::default(),
            probe: ProbeConfig::default(),
            readiness: ReadinessConfig::default(),
            campaign: CampaignConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl HarnessConfig {
    /// Parses a configuration from a TOML string.
    pub fn from_toml_str(input: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(input)
    }

    /// Loads a configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// How node processes are launched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LaunchConfig {
    /// When set, each node's stderr is appended to `<dir>/<name>.stderr.log`
    /// instead of being inherited.
    pub stderr_dir: Option<PathBuf>,
}

/// Bounded shutdown budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// Rounds of per-process waits after the graceful signal
    pub wait_rounds: u32,
    /// Wait window for a single process within a round
    pub wait_window_ms: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            wait_rounds: 9,
            wait_window_ms: 1000,
        }
    }
}

impl ShutdownConfig {
    pub fn wait_window(&self) -> Duration {
        Duration::from_millis(self.wait_window_ms)
    }
}

/// HTTP client timeouts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub connect_timeout_ms: u64,
    pub request_timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 500,
            request_timeout_ms: 2000,
        }
    }
}

impl ClientConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Consistency probe timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Give up on a write after this long
    pub deadline_ms: u64,
    /// Pause between snapshot reads; 0 polls back to back
    pub poll_interval_ms: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            deadline_ms: 5000,
            poll_interval_ms: 0,
        }
    }
}

impl ProbeConfig {
    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.deadline_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// How the harness decides the fleet is ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadinessKind {
    /// Poll every node's read endpoint until it answers
    Probe,
    /// Sleep for a fixed warm-up delay
    Warmup,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadinessConfig {
    pub mode: ReadinessKind,
    pub timeout_ms: u64,
    pub interval_ms: u64,
    pub warmup_ms: u64,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            mode: ReadinessKind::Probe,
            timeout_ms: 10_000,
            interval_ms: 100,
            warmup_ms: 1000,
        }
    }
}

/// Campaign shape and pass/fail threshold.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CampaignConfig {
    pub rounds: usize,
    /// Fixed RNG seed for reproducible origin/sink choices
    pub seed: Option<u64>,
    /// Campaign fails if more probes than this time out
    pub max_timeouts: usize,
    /// Wait for the operator before tearing the fleet down
    pub pause_before_teardown: bool,
}

impl Default for CampaignConfig {
    fn default() -> Self {
        Self {
            rounds: 20,
            seed: None,
            max_timeouts: 0,
            pause_before_teardown: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = HarnessConfig::from_toml_str("").unwrap();
        assert_eq!(config.nodes.len(), 5);
        assert_eq!(config.node_binary, PathBuf::from("./replicaStorage"));
        assert_eq!(config.probe.deadline(), Duration::from_secs(5));
        assert_eq!(config.probe.poll_interval(), Duration::ZERO);
        assert_eq!(config.campaign.rounds, 20);
        assert_eq!(config.readiness.mode, ReadinessKind::Probe);
        assert_eq!(config.shutdown.wait_rounds, 9);
    }

    #[test]
    fn test_parse_custom_topology() {
        let input = r#"
node_binary = "/opt/replica/bin/node"

[[nodes]]
name = "alpha"
address = "10.0.0.1:9000"
peers = ["beta"]

[[nodes]]
name = "beta"
address = "10.0.0.2:9000"

[probe]
deadline_ms = 250
poll_interval_ms = 10

[readiness]
mode = "warmup"
warmup_ms = 300

[campaign]
rounds = 3
seed = 42
"#;
        let config = HarnessConfig::from_toml_str(input).unwrap();
        assert_eq!(config.nodes.len(), 2);
        assert_eq!(config.nodes[0].peers, vec!["beta".to_string()]);
        assert!(config.nodes[1].peers.is_empty());
        assert_eq!(config.probe.deadline(), Duration::from_millis(250));
        assert_eq!(config.readiness.mode, ReadinessKind::Warmup);
        assert_eq!(config.readiness.warmup_ms, 300);
        assert_eq!(config.campaign.seed, Some(42));
        // untouched sections keep defaults
        assert_eq!(config.client.request_timeout_ms, 2000);
    }

    #[test]
    fn test_from_file_reports_missing_path() {
        let err = HarnessConfig::from_file("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_from_file_reports_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        fs::write(&path, "rounds = [").unwrap();
        let err = HarnessConfig::from_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }
}
