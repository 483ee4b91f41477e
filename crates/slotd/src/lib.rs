//! slotd: randomized TDMA medium-access scheduler.
//!
//! Clients ask for the shared medium with `REQUEST_INIT`. Requests that arrive
//! in the same poll sweep form a time slot; slots are served first-in
//! first-out, requests inside a slot in uniformly random order, and exactly one
//! grant is outstanding at any time.

pub mod bridge;
pub mod config;
pub mod error;
pub mod node_table;
pub mod poller;
pub mod queue;
pub mod registry;
pub mod scheduler;

pub use bridge::protocol::{MessageKind, NodeId, RequestId, RequestKey, SchedulerMessage};
pub use bridge::transport::{ServerConfig, serve};
pub use config::{SchedulerConfig, ViolationPolicy};
pub use error::{ProtocolViolation, SchedulerError};
pub use node_table::{NodeAddress, NodeTable, NodeTableError};
pub use scheduler::{InFlightGrant, Scheduler, SchedulerSnapshot, Step};

/// slotd version from Cargo.toml
pub const SLOTD_VERSION: &str = env!("CARGO_PKG_VERSION");
