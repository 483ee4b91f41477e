//! Network bridge between the scheduler and client nodes.
//!
//! # Architecture
//!
//! - **protocol**: Message types and the fixed 9-byte wire layout
//! - **codec**: Framing codec for AsyncRead/AsyncWrite
//! - **transport**: TCP bootstrap that accepts the expected client connections

pub mod codec;
pub mod protocol;
pub mod transport;
