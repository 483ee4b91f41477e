//! Framed codec for scheduler messages.
//!
//! Messages have a fixed size, so framing is just "wait until a whole record is
//! buffered". Partial reads stay in the `Framed` read buffer until the rest of
//! the record arrives. Works over any AsyncRead/AsyncWrite (TCP, duplex pipes).

use std::io;

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use super::protocol::{DecodeError, SchedulerMessage};

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

/// Codec for the fixed-size scheduler wire format.
#[derive(Debug, Clone, Copy, Default)]
pub struct MessageCodec;

impl MessageCodec {
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for MessageCodec {
    type Item = SchedulerMessage;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < SchedulerMessage::WIRE_SIZE {
            src.reserve(SchedulerMessage::WIRE_SIZE - src.len());
            return Ok(None);
        }

        let frame = src.split_to(SchedulerMessage::WIRE_SIZE);
        let message = SchedulerMessage::decode(&frame)?;
        tracing::trace!(%message, "Decoded frame");
        Ok(Some(message))
    }
}

impl Encoder<SchedulerMessage> for MessageCodec {
    type Error = CodecError;

    fn encode(&mut self, item: SchedulerMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        tracing::trace!(message = %item, "Encoding frame");
        dst.reserve(SchedulerMessage::WIRE_SIZE);
        item.encode_into(dst);
        Ok(())
    }
}
