//! Node address table.
//!
//! Plain text, one node per line: `<numeric-node-id> <address> <port>`.
//! Numeric ids are offset onto ASCII digits (`0` → `'0'`, `17` → `'A'`), the
//! identifiers the deployed clients put on the wire. The table only annotates
//! logs; arbitration never consults it.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::bridge::protocol::NodeId;

#[derive(Debug, Error)]
pub enum NodeTableError {
    #[error("failed to read node table {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("node table line {line}: {reason}")]
    Malformed { line: usize, reason: String },
}

/// Where a node listens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeAddress {
    pub addr: String,
    pub port: u16,
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.addr, self.port)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeTable {
    entries: BTreeMap<NodeId, NodeAddress>,
}

impl NodeTable {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, NodeTableError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| NodeTableError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self, NodeTableError> {
        let mut entries = BTreeMap::new();

        for (i, line) in text.lines().enumerate() {
            let line_no = i + 1;
            let malformed = |reason: String| NodeTableError::Malformed {
                line: line_no,
                reason,
            };

            let fields: Vec<&str> = line.split_whitespace().collect();
            let [id, addr, port] = fields.as_slice() else {
                if fields.is_empty() {
                    continue;
                }
                return Err(malformed(format!(
                    "expected `<node-id> <address> <port>`, got {} fields",
                    fields.len()
                )));
            };

            let index: u8 = id
                .parse()
                .map_err(|_| malformed(format!("invalid node id '{id}'")))?;
            let node = NodeId::from_table_index(index)
                .ok_or_else(|| malformed(format!("node id {index} out of range")))?;
            let port: u16 = port
                .parse()
                .map_err(|_| malformed(format!("invalid port '{port}'")))?;

            let address = NodeAddress {
                addr: addr.to_string(),
                port,
            };
            if let Some(previous) = entries.insert(node, address) {
                tracing::warn!(node = %node, %previous, line = line_no, "Duplicate node in address table, later entry wins");
            }
        }

        Ok(Self { entries })
    }

    pub fn get(&self, node: NodeId) -> Option<&NodeAddress> {
        self.entries.get(&node)
    }

    /// Node whose table address equals `addr`, if exactly one matches.
    pub fn node_at(&self, addr: &str) -> Option<NodeId> {
        let mut matches = self
            .entries
            .iter()
            .filter(|(_, a)| a.addr == addr)
            .map(|(node, _)| *node);
        let first = matches.next()?;
        matches.next().is_none().then_some(first)
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &NodeAddress)> {
        self.entries.iter().map(|(node, addr)| (*node, addr))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
