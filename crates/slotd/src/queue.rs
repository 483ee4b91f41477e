//! Time-slot queue.
//!
//! Each poll sweep that collects at least one request becomes a [`TimeSlot`].
//! Slots are serviced strictly in creation order; inside the head slot the next
//! request is drawn uniformly at random without replacement.

use std::collections::VecDeque;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;

use crate::bridge::protocol::{NodeId, RequestKey};
use crate::registry::ChannelId;

/// A `REQUEST_INIT` waiting to be granted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingRequest {
    key: RequestKey,
    channel: ChannelId,
}

impl PendingRequest {
    pub fn new(key: RequestKey, channel: ChannelId) -> Self {
        Self { key, channel }
    }

    pub fn key(&self) -> RequestKey {
        self.key
    }

    pub fn node(&self) -> NodeId {
        self.key.node
    }

    /// Channel the request was read from.
    pub fn channel(&self) -> ChannelId {
        self.channel
    }
}

/// Requests collected in one sweep. Never empty while it sits in the queue.
#[derive(Debug, Clone)]
pub struct TimeSlot {
    round: u64,
    requests: Vec<PendingRequest>,
}

impl TimeSlot {
    /// Sequence number of the sweep that created this slot.
    pub fn round(&self) -> u64 {
        self.round
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub fn requests(&self) -> &[PendingRequest] {
        &self.requests
    }
}

pub struct TimeSlotQueue {
    slots: VecDeque<TimeSlot>,
    next_round: u64,
    rng: ChaCha20Rng,
}

impl TimeSlotQueue {
    /// Create an empty queue. With a seed, arbitration order is reproducible.
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => ChaCha20Rng::seed_from_u64(seed),
            None => ChaCha20Rng::from_entropy(),
        };
        Self {
            slots: VecDeque::new(),
            next_round: 0,
            rng,
        }
    }

    /// Append a slot holding `requests` to the tail.
    ///
    /// Returns the new slot's round, or `None` (and creates nothing) when
    /// `requests` is empty.
    pub fn create_slot(&mut self, requests: Vec<PendingRequest>) -> Option<u64> {
        if requests.is_empty() {
            return None;
        }

        let round = self.next_round;
        self.next_round += 1;
        tracing::debug!(round, num_requests = requests.len(), "Created time slot");
        self.slots.push_back(TimeSlot { round, requests });
        Some(round)
    }

    pub fn front_slot(&self) -> Option<&TimeSlot> {
        self.slots.front()
    }

    /// Draw one request uniformly at random from the head slot and remove it.
    ///
    /// The head slot is dropped as soon as its last request is taken, so the
    /// next call moves on to the following slot.
    pub fn select_and_remove(&mut self) -> Option<PendingRequest> {
        let slot = self.slots.front_mut()?;
        debug_assert!(!slot.is_empty(), "empty slot left in queue");

        let num_requests = slot.requests.len();
        let index = self.rng.gen_range(0..num_requests);
        let request = slot.requests.swap_remove(index);
        tracing::debug!(
            round = slot.round,
            num_requests,
            node = %request.node(),
            request_id = request.key().request_id,
            "Selected request"
        );

        if slot.requests.is_empty() {
            self.slots.pop_front();
        }
        Some(request)
    }

    /// Remove every queued request from `node`, dropping slots left empty.
    ///
    /// Returns the number of requests removed.
    pub fn purge_node(&mut self, node: NodeId) -> usize {
        let before = self.pending_requests();
        for slot in &mut self.slots {
            slot.requests.retain(|r| r.node() != node);
        }
        self.slots.retain(|s| !s.is_empty());
        before - self.pending_requests()
    }

    pub fn contains(&self, key: RequestKey) -> bool {
        self.slots
            .iter()
            .any(|s| s.requests.iter().any(|r| r.key() == key))
    }

    /// Number of slots in the queue.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn pending_requests(&self) -> usize {
        self.slots.iter().map(TimeSlot::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    fn req(node: char, id: i32) -> PendingRequest {
        PendingRequest::new(RequestKey::new(NodeId::try_from(node).unwrap(), id), ChannelId::new(0))
    }

    #[test]
    fn empty_sweep_creates_no_slot() {
        let mut queue = TimeSlotQueue::new(Some(1));
        assert_eq!(queue.create_slot(Vec::new()), None);
        assert!(queue.is_empty());
        assert!(queue.front_slot().is_none());
        assert!(queue.select_and_remove().is_none());
    }

    #[test]
    fn rounds_increase_in_creation_order() {
        let mut queue = TimeSlotQueue::new(Some(1));
        assert_eq!(queue.create_slot(vec![req('A', 1)]), Some(0));
        assert_eq!(queue.create_slot(Vec::new()), None);
        assert_eq!(queue.create_slot(vec![req('B', 1)]), Some(1));
        assert_eq!(queue.front_slot().map(TimeSlot::round), Some(0));
    }

    #[test]
    fn head_slot_drains_before_later_slots() {
        let mut queue = TimeSlotQueue::new(Some(42));
        queue.create_slot(vec![req('A', 1), req('B', 1), req('C', 1)]);
        queue.create_slot(vec![req('D', 1), req('E', 1)]);

        let first: HashSet<char> = (0..3)
            .map(|_| queue.select_and_remove().unwrap().node().as_u8() as char)
            .collect();
        assert_eq!(first, HashSet::from(['A', 'B', 'C']));
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.front_slot().map(TimeSlot::round), Some(1));

        let second: HashSet<char> = (0..2)
            .map(|_| queue.select_and_remove().unwrap().node().as_u8() as char)
            .collect();
        assert_eq!(second, HashSet::from(['D', 'E']));
        assert!(queue.is_empty());
        assert!(queue.select_and_remove().is_none());
    }

    #[test]
    fn slot_is_removed_exactly_when_drained() {
        let mut queue = TimeSlotQueue::new(Some(3));
        queue.create_slot(vec![req('A', 1), req('B', 1)]);

        queue.select_and_remove().unwrap();
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.front_slot().map(TimeSlot::len), Some(1));

        queue.select_and_remove().unwrap();
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn same_seed_same_order() {
        let order = |seed| {
            let mut queue = TimeSlotQueue::new(Some(seed));
            queue.create_slot((0..8).map(|i| req('A', i)).collect());
            std::iter::from_fn(|| queue.select_and_remove())
                .map(|r| r.key().request_id)
                .collect::<Vec<_>>()
        };
        assert_eq!(order(9), order(9));
    }

    #[test]
    fn every_request_can_go_first() {
        const TRIALS: usize = 4000;
        const SLOT_SIZE: usize = 4;

        let mut queue = TimeSlotQueue::new(Some(0xC0FFEE));
        let mut firsts = [0usize; SLOT_SIZE];

        for _ in 0..TRIALS {
            queue.create_slot((0..SLOT_SIZE as i32).map(|i| req('A', i)).collect());
            let first = queue.select_and_remove().unwrap();
            firsts[first.key().request_id as usize] += 1;
            while queue.select_and_remove().is_some() {}
        }

        let expected = TRIALS / SLOT_SIZE;
        for (id, count) in firsts.iter().enumerate() {
            assert!(
                count.abs_diff(expected) < expected / 5,
                "request {id} went first {count} times, expected about {expected}"
            );
        }
    }

    #[test]
    fn purge_node_drops_emptied_slots() {
        let mut queue = TimeSlotQueue::new(Some(5));
        queue.create_slot(vec![req('A', 1)]);
        queue.create_slot(vec![req('A', 2), req('B', 1)]);
        queue.create_slot(vec![req('C', 1)]);

        assert_eq!(queue.purge_node(NodeId::new(b'A')), 2);
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pending_requests(), 2);
        assert_eq!(queue.front_slot().map(TimeSlot::round), Some(1));
        assert!(!queue.contains(RequestKey::new(NodeId::new(b'A'), 2)));
        assert!(queue.contains(RequestKey::new(NodeId::new(b'B'), 1)));
    }
}
