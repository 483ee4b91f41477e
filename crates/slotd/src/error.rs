use thiserror::Error;

use crate::bridge::codec::CodecError;
use crate::bridge::protocol::{DecodeError, MessageKind, NodeId, RequestKey};
use crate::registry::ChannelId;

/// A client broke the request → grant → completion contract.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolViolation {
    #[error("expected {expected}, got {actual}")]
    UnexpectedMessage {
        expected: MessageKind,
        actual: MessageKind,
    },

    #[error("malformed message: {0}")]
    Malformed(#[from] DecodeError),

    #[error("completion for {actual} does not match outstanding grant {expected}")]
    CompletionMismatch {
        expected: RequestKey,
        actual: RequestKey,
    },

    #[error("request {0} is already queued or in flight")]
    DuplicateRequest(RequestKey),

    #[error("node {node} is already bound to channel {bound}")]
    NodeRebound { node: NodeId, bound: ChannelId },
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("protocol violation on channel {channel}: {violation}")]
    Protocol {
        channel: ChannelId,
        violation: ProtocolViolation,
    },

    #[error("no channel registered for node {0}")]
    UnknownNode(NodeId),

    #[error("channel {channel} closed")]
    ConnectionClosed { channel: ChannelId },

    #[error("I/O failure on channel {channel}: {source}")]
    Io {
        channel: ChannelId,
        #[source]
        source: std::io::Error,
    },

    #[error("grant for {0} is still outstanding")]
    GrantOutstanding(RequestKey),
}

impl SchedulerError {
    pub(crate) fn protocol(channel: ChannelId, violation: impl Into<ProtocolViolation>) -> Self {
        Self::Protocol {
            channel,
            violation: violation.into(),
        }
    }

    pub(crate) fn from_codec(channel: ChannelId, err: CodecError) -> Self {
        match err {
            CodecError::Io(source) => Self::Io { channel, source },
            CodecError::Decode(e) => Self::protocol(channel, e),
        }
    }

    /// The channel this fault can be pinned on, if any.
    ///
    /// Faults without a channel describe scheduler-internal impossible states and
    /// are always fatal.
    pub fn channel(&self) -> Option<ChannelId> {
        match self {
            Self::Protocol { channel, .. }
            | Self::ConnectionClosed { channel }
            | Self::Io { channel, .. } => Some(*channel),
            Self::UnknownNode(_) | Self::GrantOutstanding(_) => None,
        }
    }

    pub fn violation(&self) -> Option<&ProtocolViolation> {
        match self {
            Self::Protocol { violation, .. } => Some(violation),
            _ => None,
        }
    }
}
