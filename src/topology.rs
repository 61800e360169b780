//! Static cluster membership
//!
//! A [`Topology`] is built once from configuration and never mutated. Node
//! order is preserved so that random indexing is reproducible under a fixed
//! seed, and each node's peer addresses keep their configured order because
//! they are passed verbatim as process arguments.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// One node as written in configuration: peers are referenced by name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    pub name: String,
    /// Listen address, `host:port`
    pub address: String,
    /// Names of the nodes this node is told about at launch
    #[serde(default)]
    pub peers: Vec<String>,
}

impl NodeConfig {
    /// `server-0 .. server-{count-1}` on consecutive ports, each peered with all others.
    pub fn full_mesh(count: usize, host: &str, base_port: u16) -> Vec<NodeConfig> {
        let names: Vec<String> = (0..count).map(|i| format!("server-{}", i)).collect();
        names
            .iter()
            .enumerate()
            .map(|(i, name)| NodeConfig {
                name: name.clone(),
                address: format!("{}:{}", host, base_port as usize + i),
                peers: names.iter().filter(|peer| *peer != name).cloned().collect(),
            })
            .collect()
    }
}

/// A validated node: peers resolved to addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeSpec {
    pub name: String,
    pub address: String,
    pub peers: Vec<String>,
}

/// Immutable registry of the fleet.
#[derive(Debug, Clone)]
pub struct Topology {
    nodes: Vec<NodeSpec>,
    index: HashMap<String, usize>,
}

impl Topology {
    /// Validate and resolve a node list.
    ///
    /// Fails on an empty list, duplicate names, peers that are not
    /// registered, and nodes that list themselves.
    pub fn new(configs: Vec<NodeConfig>) -> Result<Self, ConfigError> {
        if configs.is_empty() {
            return Err(ConfigError::EmptyTopology);
        }

        let mut index = HashMap::with_capacity(configs.len());
        for (i, node) in configs.iter().enumerate() {
            if index.insert(node.name.clone(), i).is_some() {
                return Err(ConfigError::DuplicateNode(node.name.clone()));
            }
        }

        let mut nodes = Vec::with_capacity(configs.len());
        for node in &configs {
            let mut peers = Vec::with_capacity(node.peers.len());
            for peer in &node.peers {
                if *peer == node.name {
                    return Err(ConfigError::SelfPeer(node.name.clone()));
                }
                let &peer_idx = index.get(peer).ok_or_else(|| ConfigError::UnknownPeer {
                    node: node.name.clone(),
                    peer: peer.clone(),
                })?;
                peers.push(configs[peer_idx].address.clone());
            }
            nodes.push(NodeSpec {
                name: node.name.clone(),
                address: node.address.clone(),
                peers,
            });
        }

        Ok(Topology { nodes, index })
    }

    /// Full mesh of `count` nodes, see [`NodeConfig::full_mesh`].
    pub fn full_mesh(count: usize, host: &str, base_port: u16) -> Result<Self, ConfigError> {
        Self::new(NodeConfig::full_mesh(count, host, base_port))
    }

    /// All nodes in configuration order
    pub fn list_nodes(&self) -> &[NodeSpec] {
        &self.nodes
    }

    /// Peer addresses of `name`, in configured order
    pub fn peers_of(&self, name: &str) -> Option<&[String]> {
        self.node(name).map(|node| node.peers.as_slice())
    }

    pub fn node(&self, name: &str) -> Option<&NodeSpec> {
        self.index.get(name).map(|&i| &self.nodes[i])
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
