//! Request poller: one non-blocking sweep over every open client channel.
//!
//! Each channel gets exactly one readiness check per sweep and yields at most
//! one message. A channel with no data, or with only part of a message, is
//! skipped; partial bytes stay in the channel's frame buffer for a later sweep.

use futures::{FutureExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::bridge::protocol::{MessageKind, NodeId};
use crate::error::{ProtocolViolation, SchedulerError};
use crate::queue::PendingRequest;
use crate::registry::{ChannelId, ConnectionRegistry};

/// Everything one sweep observed.
#[derive(Debug, Default)]
pub struct Sweep {
    /// Well-formed `REQUEST_INIT`s, in channel order.
    pub requests: Vec<PendingRequest>,
    /// Nodes bound to a channel for the first time during this sweep.
    pub registered: Vec<(NodeId, ChannelId)>,
    /// Channels the peer closed; they have already been removed from the registry.
    pub disconnected: Vec<(ChannelId, Vec<NodeId>)>,
    /// Channel-attributable faults. The caller decides abort vs isolate.
    pub faults: Vec<SchedulerError>,
}

impl Sweep {
    pub fn is_quiet(&self) -> bool {
        self.requests.is_empty() && self.disconnected.is_empty() && self.faults.is_empty()
    }
}

pub fn sweep<S>(registry: &mut ConnectionRegistry<S>) -> Sweep
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut sweep = Sweep::default();

    for channel in registry.open_channels() {
        let Some(conn) = registry.connection_mut(channel) else {
            continue;
        };

        let message = match conn.next().now_or_never() {
            // Nothing (or only a partial message) buffered.
            None => continue,
            Some(None) => {
                let nodes = registry.close(channel);
                tracing::info!(%channel, ?nodes, "Client disconnected");
                sweep.disconnected.push((channel, nodes));
                continue;
            }
            Some(Some(Err(e))) => {
                sweep.faults.push(SchedulerError::from_codec(channel, e));
                continue;
            }
            Some(Some(Ok(message))) => message,
        };

        if message.kind != MessageKind::RequestInit {
            sweep.faults.push(SchedulerError::protocol(
                channel,
                ProtocolViolation::UnexpectedMessage {
                    expected: MessageKind::RequestInit,
                    actual: message.kind,
                },
            ));
            continue;
        }

        match registry.register(message.node, channel) {
            Ok(true) => sweep.registered.push((message.node, channel)),
            Ok(false) => {}
            Err(e) => {
                sweep.faults.push(e);
                continue;
            }
        }

        tracing::debug!(
            node = %message.node,
            request_id = message.request_id,
            %channel,
            "Received request"
        );
        sweep
            .requests
            .push(PendingRequest::new(message.key(), channel));
    }

    sweep
}
