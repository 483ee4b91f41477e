//! Connection registry: client channels and the node → channel bindings.
//!
//! Channels are added at bootstrap and keep their index for the life of the
//! process. Nodes are bound to a channel the first time a request from that
//! node is read off it.

use std::collections::HashMap;
use std::fmt;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::Framed;

use crate::bridge::codec::MessageCodec;
use crate::bridge::protocol::NodeId;
use crate::error::{ProtocolViolation, SchedulerError};

/// Index of a client channel in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(usize);

impl ChannelId {
    pub(crate) const fn new(index: usize) -> Self {
        Self(index)
    }

    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A framed client connection.
pub type Connection<S> = Framed<S, MessageCodec>;

pub struct ConnectionRegistry<S> {
    /// `None` once a channel has been closed; indices are never reused.
    channels: Vec<Option<Connection<S>>>,
    nodes: HashMap<NodeId, ChannelId>,
}

impl<S> Default for ConnectionRegistry<S> {
    fn default() -> Self {
        Self {
            channels: Vec::new(),
            nodes: HashMap::new(),
        }
    }
}

impl<S> ConnectionRegistry<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_channel(&mut self, stream: S) -> ChannelId {
        let id = ChannelId::new(self.channels.len());
        self.channels.push(Some(Framed::new(stream, MessageCodec::new())));
        id
    }

    /// Bind `node` to `channel`.
    ///
    /// Returns `Ok(true)` when the binding is new and `Ok(false)` when it already
    /// existed. A node already bound to a different channel is never rebound.
    pub fn register(&mut self, node: NodeId, channel: ChannelId) -> Result<bool, SchedulerError> {
        match self.nodes.get(&node) {
            Some(&bound) if bound == channel => Ok(false),
            Some(&bound) => Err(SchedulerError::protocol(
                channel,
                ProtocolViolation::NodeRebound { node, bound },
            )),
            None => {
                self.nodes.insert(node, channel);
                Ok(true)
            }
        }
    }

    pub fn lookup(&self, node: NodeId) -> Result<ChannelId, SchedulerError> {
        self.nodes
            .get(&node)
            .copied()
            .ok_or(SchedulerError::UnknownNode(node))
    }

    pub fn connection_mut(&mut self, channel: ChannelId) -> Option<&mut Connection<S>> {
        self.channels.get_mut(channel.0)?.as_mut()
    }

    /// Ids of all channels that are still open, in bootstrap order.
    pub fn open_channels(&self) -> Vec<ChannelId> {
        self.channels
            .iter()
            .enumerate()
            .filter(|(_, c)| c.is_some())
            .map(|(i, _)| ChannelId::new(i))
            .collect()
    }

    /// Close a channel and unbind every node that was bound to it.
    ///
    /// Returns the unbound nodes. Closing an already closed channel is a no-op.
    pub fn close(&mut self, channel: ChannelId) -> Vec<NodeId> {
        if let Some(slot) = self.channels.get_mut(channel.0) {
            slot.take();
        }

        let mut unbound: Vec<NodeId> = self
            .nodes
            .iter()
            .filter(|(_, bound)| **bound == channel)
            .map(|(node, _)| *node)
            .collect();
        unbound.sort();
        for node in &unbound {
            self.nodes.remove(node);
        }
        unbound
    }

    pub fn registered_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn open_count(&self) -> usize {
        self.channels.iter().filter(|c| c.is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::DuplexStream;

    fn registry(n: usize) -> (ConnectionRegistry<DuplexStream>, Vec<DuplexStream>) {
        let mut registry = ConnectionRegistry::new();
        let mut peers = Vec::new();
        for _ in 0..n {
            let (ours, theirs) = tokio::io::duplex(64);
            registry.add_channel(ours);
            peers.push(theirs);
        }
        (registry, peers)
    }

    #[tokio::test]
    async fn channels_are_numbered_in_bootstrap_order() {
        let mut registry = ConnectionRegistry::new();
        let (a, _peer_a) = tokio::io::duplex(64);
        let (b, _peer_b) = tokio::io::duplex(64);

        assert_eq!(registry.add_channel(a).index(), 0);
        assert_eq!(registry.add_channel(b).index(), 1);
        assert_eq!(registry.open_channels(), vec![ChannelId::new(0), ChannelId::new(1)]);
    }

    #[tokio::test]
    async fn register_is_idempotent() {
        let (mut registry, _peers) = registry(1);
        let ch = ChannelId(0);
        let node = NodeId::new(b'A');

        assert!(registry.register(node, ch).unwrap());
        assert!(!registry.register(node, ch).unwrap());
        assert_eq!(registry.lookup(node).unwrap(), ch);
        assert_eq!(registry.registered_nodes(), 1);
    }

    #[tokio::test]
    async fn register_refuses_rebinding() {
        let (mut registry, _peers) = registry(2);
        let node = NodeId::new(b'A');
        registry.register(node, ChannelId(0)).unwrap();

        let err = registry.register(node, ChannelId(1)).unwrap_err();
        assert_eq!(err.channel(), Some(ChannelId(1)));
        assert_eq!(
            err.violation(),
            Some(&ProtocolViolation::NodeRebound {
                node,
                bound: ChannelId(0)
            })
        );
        assert_eq!(registry.lookup(node).unwrap(), ChannelId(0));
    }

    #[tokio::test]
    async fn several_nodes_may_share_a_channel() {
        let (mut registry, _peers) = registry(1);
        registry.register(NodeId::new(b'A'), ChannelId(0)).unwrap();
        registry.register(NodeId::new(b'B'), ChannelId(0)).unwrap();
        assert_eq!(registry.registered_nodes(), 2);
    }

    #[tokio::test]
    async fn lookup_unknown_node_fails() {
        let (registry, _peers) = registry(1);
        let err = registry.lookup(NodeId::new(b'Z')).unwrap_err();
        assert!(matches!(err, SchedulerError::UnknownNode(n) if n == NodeId::new(b'Z')));
        assert_eq!(err.channel(), None);
    }

    #[tokio::test]
    async fn close_unbinds_nodes_and_keeps_indices() {
        let (mut registry, _peers) = registry(3);
        registry.register(NodeId::new(b'B'), ChannelId(1)).unwrap();
        registry.register(NodeId::new(b'A'), ChannelId(1)).unwrap();
        registry.register(NodeId::new(b'C'), ChannelId(2)).unwrap();

        let unbound = registry.close(ChannelId(1));
        assert_eq!(unbound, vec![NodeId::new(b'A'), NodeId::new(b'B')]);
        assert!(registry.connection_mut(ChannelId(1)).is_none());
        assert_eq!(registry.open_channels(), vec![ChannelId(0), ChannelId(2)]);
        assert_eq!(registry.open_count(), 2);
        assert_eq!(registry.lookup(NodeId::new(b'C')).unwrap(), ChannelId(2));
        assert!(registry.lookup(NodeId::new(b'A')).is_err());

        assert!(registry.close(ChannelId(1)).is_empty());
    }
}
