//! HTTP client for the node boundary
//!
//! Nodes expose two endpoints: `POST /replace`, which takes a JSON patch
//! batch, and `GET /get`, which returns the node's whole key space. The
//! [`ReplicaApi`] trait is what the prober and campaign depend on, so they
//! can be exercised against fakes.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::trace;

use crate::config::ClientConfig;
use crate::error::TransportError;

/// A node's view of the replicated state: key to latest known value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClusterSnapshot(pub BTreeMap<String, Value>);

impl ClusterSnapshot {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// The value under `key` if it is a JSON string
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// One element of a `/replace` batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchOp {
    pub op: String,
    pub path: String,
    pub value: String,
}

impl PatchOp {
    /// `{"op": "add", "path": "/<key>", "value": <value>}`
    pub fn add(key: &str, value: &str) -> Self {
        PatchOp {
            op: "add".to_string(),
            path: format!("/{}", key),
            value: value.to_string(),
        }
    }
}

/// Operations the harness performs against a node.
#[async_trait]
pub trait ReplicaApi: Send + Sync {
    /// Submit a single `add` patch. Success only means the node answered 2xx.
    async fn write(&self, address: &str, key: &str, value: &str) -> Result<(), TransportError>;

    /// Fetch the node's current snapshot.
    async fn read_snapshot(&self, address: &str) -> Result<ClusterSnapshot, TransportError>;
}

/// [`ReplicaApi`] over HTTP.
#[derive(Debug, Clone)]
pub struct ReplicaClient {
    http: reqwest::Client,
}

impl ReplicaClient {
    pub fn new(config: &ClientConfig) -> Result<Self, reqwest::Error> {
        Self::with_timeouts(config.connect_timeout(), config.request_timeout())
    }

    pub fn with_timeouts(connect: Duration, request: Duration) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .connect_timeout(connect)
            .timeout(request)
            .build()?;
        Ok(ReplicaClient { http })
    }
}

fn transport_error(address: &str, err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout {
            address: address.to_string(),
        }
    } else if err.is_decode() {
        TransportError::Decode {
            address: address.to_string(),
            message: err.to_string(),
        }
    } else {
        TransportError::Connect {
            address: address.to_string(),
            message: err.to_string(),
        }
    }
}

fn check_status(address: &str, response: &reqwest::Response) -> Result<(), TransportError> {
    let status = response.status();
    if status.is_success() {
        Ok(())
    } else {
        Err(TransportError::Status {
            address: address.to_string(),
            status: status.as_u16(),
        })
    }
}

#[async_trait]
impl ReplicaApi for ReplicaClient {
    async fn write(&self, address: &str, key: &str, value: &str) -> Result<(), TransportError> {
        let url = format!("http://{}/replace", address);
        let body = [PatchOp::add(key, value)];

        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(address, e))?;
        check_status(address, &response)?;

        trace!(address, key, value, "write accepted");
        Ok(())
    }

    async fn read_snapshot(&self, address: &str) -> Result<ClusterSnapshot, TransportError> {
        let url = format!("http://{}/get", address);

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| transport_error(address, e))?;
        check_status(address, &response)?;

        let bytes = response
            .bytes()
            .await
            .map_err(|e| transport_error(address, e))?;
        serde_json::from_slice(&bytes).map_err(|e| TransportError::Decode {
            address: address.to_string(),
            message: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_patch_body_shape() {
        let body = serde_json::to_value([PatchOp::add("server-0", "version-0")]).unwrap();
        assert_eq!(
            body,
            serde_json::json!([{"op": "add", "path": "/server-0", "value": "version-0"}])
        );
    }

    #[test]
    fn test_snapshot_decodes_flat_object() {
        let snapshot: ClusterSnapshot =
            serde_json::from_str(r#"{"server-0": "version-3", "other": 7}"#).unwrap();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.get_str("server-0"), Some("version-3"));
        // non-string values are kept but never match a token
        assert_eq!(snapshot.get_str("other"), None);
        assert!(snapshot.get("missing").is_none());
    }

    #[test]
    fn test_snapshot_rejects_non_object() {
        assert!(serde_json::from_str::<ClusterSnapshot>("[1, 2]").is_err());
    }

    #[tokio::test]
    async fn test_unreachable_node_is_transport_error() {
        let client =
            ReplicaClient::with_timeouts(Duration::from_millis(200), Duration::from_millis(500))
                .unwrap();
        // port 9 (discard) is not expected to have an HTTP listener
        let err = client.read_snapshot("127.0.0.1:9").await.unwrap_err();
        assert!(matches!(
            err,
            TransportError::Connect { .. } | TransportError::Timeout { .. }
        ));
    }
}
