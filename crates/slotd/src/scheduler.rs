//! Scheduler - owns the client channels and runs the grant loop.
//!
//! Flow per cycle:
//! 1. Idle: sweep all channels, turn the collected requests into a time slot
//! 2. Select one request from the head slot at random
//! 3. Send REPLY to that node and enter AwaitingCompletion
//! 4. Block on the grantee's channel until the matching REQUEST_COMPLETE arrives
//! 5. Wait out the guard interval, back to Idle
//!
//! Only one grant can be outstanding: the phase holds at most one
//! [`InFlightGrant`] and [`Scheduler::grant_next`] refuses to run outside Idle.

use std::collections::HashSet;
use std::time::Instant;

use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::bridge::protocol::{MessageKind, NodeId, RequestKey, SchedulerMessage};
use crate::config::{SchedulerConfig, ViolationPolicy};
use crate::error::{ProtocolViolation, SchedulerError};
use crate::node_table::NodeTable;
use crate::poller;
use crate::queue::TimeSlotQueue;
use crate::registry::{ChannelId, ConnectionRegistry};

/// The one grant that has been sent and not yet confirmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InFlightGrant {
    pub key: RequestKey,
    pub channel: ChannelId,
    pub granted_at: Instant,
}

#[derive(Debug)]
enum Phase {
    Idle,
    AwaitingCompletion(InFlightGrant),
}

/// Outcome of one [`Scheduler::step`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Nothing was owed a grant.
    Idle,
    /// A grant was issued and its completion confirmed.
    Granted(RequestKey),
    /// A faulty channel was closed under [`ViolationPolicy::Isolate`].
    Isolated(ChannelId),
}

#[derive(Debug, Default, Clone, Copy)]
struct Counters {
    requests_received: u64,
    slots_created: u64,
    grants_issued: u64,
    grants_completed: u64,
}

/// Point-in-time view of the scheduler, logged after every completed grant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchedulerSnapshot {
    pub pending_slots: usize,
    pub pending_requests: usize,
    pub registered_nodes: usize,
    pub open_channels: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub in_flight: Option<RequestKey>,
    pub requests_received: u64,
    pub slots_created: u64,
    pub grants_issued: u64,
    pub grants_completed: u64,
}

pub struct Scheduler<S> {
    config: SchedulerConfig,
    registry: ConnectionRegistry<S>,
    queue: TimeSlotQueue,
    phase: Phase,
    /// Keys that are queued or in flight; a second INIT for one of them is rejected.
    outstanding: HashSet<RequestKey>,
    node_table: NodeTable,
    counters: Counters,
}

impl<S> Scheduler<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(config: SchedulerConfig, streams: impl IntoIterator<Item = S>) -> Self {
        let mut registry = ConnectionRegistry::new();
        for stream in streams {
            registry.add_channel(stream);
        }

        Self {
            queue: TimeSlotQueue::new(config.seed),
            config,
            registry,
            phase: Phase::Idle,
            outstanding: HashSet::new(),
            node_table: NodeTable::default(),
            counters: Counters::default(),
        }
    }

    /// Attach the deployment's node address table, used to annotate logs.
    pub fn with_node_table(mut self, table: NodeTable) -> Self {
        self.node_table = table;
        self
    }

    pub fn add_channel(&mut self, stream: S) -> ChannelId {
        self.registry.add_channel(stream)
    }

    pub fn queue(&self) -> &TimeSlotQueue {
        &self.queue
    }

    pub fn in_flight(&self) -> Option<&InFlightGrant> {
        match &self.phase {
            Phase::Idle => None,
            Phase::AwaitingCompletion(grant) => Some(grant),
        }
    }

    pub fn snapshot(&self) -> SchedulerSnapshot {
        SchedulerSnapshot {
            pending_slots: self.queue.len(),
            pending_requests: self.queue.pending_requests(),
            registered_nodes: self.registry.registered_nodes(),
            open_channels: self.registry.open_count(),
            in_flight: self.in_flight().map(|g| g.key),
            requests_received: self.counters.requests_received,
            slots_created: self.counters.slots_created,
            grants_issued: self.counters.grants_issued,
            grants_completed: self.counters.grants_completed,
        }
    }

    /// Sweep every channel once and append a slot if anything arrived.
    ///
    /// Never blocks. Channel faults are resolved through the violation policy;
    /// an `Err` here is fatal. Returns the number of requests queued.
    pub fn poll_requests(&mut self) -> Result<usize, SchedulerError> {
        let sweep = poller::sweep(&mut self.registry);

        for (node, channel) in &sweep.registered {
            match self.node_table.get(*node) {
                Some(address) => {
                    tracing::info!(node = %node, %channel, %address, "Node registered");
                }
                None => {
                    tracing::warn!(node = %node, %channel, "Node registered but missing from address table");
                }
            }
        }

        for (_, nodes) in &sweep.disconnected {
            for node in nodes {
                self.forget_node(*node);
            }
        }

        let mut faults = sweep.faults;
        let mut accepted = Vec::with_capacity(sweep.requests.len());
        for request in sweep.requests {
            if self.outstanding.insert(request.key()) {
                accepted.push(request);
            } else {
                faults.push(SchedulerError::protocol(
                    request.channel(),
                    ProtocolViolation::DuplicateRequest(request.key()),
                ));
            }
        }

        let collected = accepted.len();
        self.counters.requests_received += collected as u64;
        if let Some(round) = self.queue.create_slot(accepted) {
            self.counters.slots_created += 1;
            tracing::debug!(round, num_requests = collected, "Queued time slot");
        }

        for fault in faults {
            self.handle_fault(fault)?;
        }

        Ok(collected)
    }

    /// Pick the next request from the head slot and send its grant.
    ///
    /// Returns `Ok(None)` when no slot is queued. Fails with
    /// [`SchedulerError::GrantOutstanding`] if a grant is already in flight.
    pub async fn grant_next(&mut self) -> Result<Option<RequestKey>, SchedulerError> {
        if let Phase::AwaitingCompletion(grant) = &self.phase {
            return Err(SchedulerError::GrantOutstanding(grant.key));
        }

        let Some(request) = self.queue.select_and_remove() else {
            return Ok(None);
        };
        let key = request.key();

        let channel = self.registry.lookup(key.node)?;
        let conn = self
            .registry
            .connection_mut(channel)
            .ok_or(SchedulerError::ConnectionClosed { channel })?;

        conn.send(SchedulerMessage::reply(key))
            .await
            .map_err(|e| SchedulerError::from_codec(channel, e))?;

        self.phase = Phase::AwaitingCompletion(InFlightGrant {
            key,
            channel,
            granted_at: Instant::now(),
        });
        self.counters.grants_issued += 1;
        tracing::info!(node = %key.node, request_id = key.request_id, %channel, "Granted medium");

        Ok(Some(key))
    }

    /// Block until the in-flight grantee reports completion.
    ///
    /// Nothing else is read while waiting. Returns `Ok(None)` if no grant is
    /// outstanding. Any message other than the matching REQUEST_COMPLETE is a
    /// protocol violation.
    pub async fn await_completion(&mut self) -> Result<Option<RequestKey>, SchedulerError> {
        let grant = match &self.phase {
            Phase::Idle => return Ok(None),
            Phase::AwaitingCompletion(grant) => *grant,
        };
        let channel = grant.channel;
        let stall_warning = self.config.stall_warning;

        let conn = self
            .registry
            .connection_mut(channel)
            .ok_or(SchedulerError::ConnectionClosed { channel })?;

        let frame = loop {
            if stall_warning.is_zero() {
                break conn.next().await;
            }
            match tokio::time::timeout(stall_warning, conn.next()).await {
                Ok(frame) => break frame,
                Err(_) => {
                    tracing::warn!(
                        node = %grant.key.node,
                        request_id = grant.key.request_id,
                        waited = ?grant.granted_at.elapsed(),
                        "Grantee has not reported completion, scheduler is stalled"
                    );
                }
            }
        };

        let message = match frame {
            None => return Err(SchedulerError::ConnectionClosed { channel }),
            Some(Err(e)) => return Err(SchedulerError::from_codec(channel, e)),
            Some(Ok(message)) => message,
        };

        if message.kind != MessageKind::RequestComplete {
            return Err(SchedulerError::protocol(
                channel,
                ProtocolViolation::UnexpectedMessage {
                    expected: MessageKind::RequestComplete,
                    actual: message.kind,
                },
            ));
        }
        if message.key() != grant.key {
            return Err(SchedulerError::protocol(
                channel,
                ProtocolViolation::CompletionMismatch {
                    expected: grant.key,
                    actual: message.key(),
                },
            ));
        }

        self.phase = Phase::Idle;
        self.outstanding.remove(&grant.key);
        self.counters.grants_completed += 1;
        tracing::info!(
            node = %grant.key.node,
            request_id = grant.key.request_id,
            held = ?grant.granted_at.elapsed(),
            "Grant completed"
        );

        if tracing::enabled!(tracing::Level::DEBUG)
            && let Ok(status) = serde_json::to_string(&self.snapshot())
        {
            tracing::debug!(target: "slotd::status", %status, "Scheduler status");
        }

        Ok(Some(grant.key))
    }

    /// Run one full scheduling cycle.
    ///
    /// An `Err` is fatal; faults isolated by policy come back as [`Step::Isolated`].
    pub async fn step(&mut self) -> Result<Step, SchedulerError> {
        if self.in_flight().is_none() {
            let collected = self.poll_requests()?;

            match self.grant_next().await {
                Ok(Some(_)) => {}
                Ok(None) => {
                    if collected == 0 {
                        self.idle_pause().await;
                    }
                    return Ok(Step::Idle);
                }
                Err(e) => return self.handle_fault(e).map(Step::Isolated),
            }
        }

        let key = match self.await_completion().await {
            Ok(Some(key)) => key,
            Ok(None) => return Ok(Step::Idle),
            Err(e) => return self.handle_fault(e).map(Step::Isolated),
        };

        if !self.config.guard_interval.is_zero() {
            tokio::time::sleep(self.config.guard_interval).await;
        }

        Ok(Step::Granted(key))
    }

    /// Schedule forever. Only returns on a fatal error.
    pub async fn run(mut self) -> Result<(), SchedulerError> {
        tracing::info!(
            channels = self.registry.open_count(),
            guard_interval = ?self.config.guard_interval,
            policy = ?self.config.violation_policy,
            "Scheduler running"
        );

        loop {
            self.step().await?;
        }
    }

    /// Give the runtime a turn after an empty sweep.
    ///
    /// Sweeps never poll the IO driver themselves, so even a zero backoff must
    /// yield or a current-thread runtime never observes new socket readiness.
    async fn idle_pause(&self) {
        if self.config.idle_backoff.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(self.config.idle_backoff).await;
        }
    }

    /// Apply the violation policy. Returns the isolated channel, or the error if it is fatal.
    fn handle_fault(&mut self, err: SchedulerError) -> Result<ChannelId, SchedulerError> {
        match (self.config.violation_policy, err.channel()) {
            (ViolationPolicy::Isolate, Some(channel)) => {
                tracing::warn!(%channel, error = %err, "Isolating faulty channel");
                self.isolate(channel);
                Ok(channel)
            }
            _ => {
                tracing::error!(error = %err, "Fatal scheduler fault");
                Err(err)
            }
        }
    }

    fn isolate(&mut self, channel: ChannelId) {
        if let Phase::AwaitingCompletion(grant) = self.phase
            && grant.channel == channel
        {
            tracing::warn!(
                node = %grant.key.node,
                request_id = grant.key.request_id,
                "Abandoning in-flight grant"
            );
            self.outstanding.remove(&grant.key);
            self.phase = Phase::Idle;
        }

        for node in self.registry.close(channel) {
            self.forget_node(node);
        }
    }

    fn forget_node(&mut self, node: NodeId) {
        let purged = self.queue.purge_node(node);
        self.outstanding.retain(|k| k.node != node);
        if purged > 0 {
            tracing::warn!(node = %node, purged, "Dropped queued requests from departed node");
        }
    }
}
