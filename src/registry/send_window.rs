use std::collections::VecDeque;
use bytes::Bytes;
use tracing::trace;
use crate::wire::packet::NetworkPacket;


#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum AckOutcome {
    /// the acknowledgment is at or below `base`, i.e. it acknowledges nothing new
    Stale,
    Advanced { freed: u32 },
    /// the acknowledgment is beyond `next_seq`, i.e. for packets that were never sent
    Invalid,
}

/// Fixed-capacity circular buffer of unacknowledged packets for the sequence range
///  `[base, next_seq)`. Slots outside that range are always empty.
///
/// Sequence numbers wrap around at `u32::MAX`. Slot positions are tracked relative to `base`
///  so that wrap-around does not cause two in-flight packets to share a slot.
///
/// Payloads that do not fit into the window wait in a bounded backlog, and are moved into the
///  window as acknowledgments free slots.
#[derive(Debug)]
pub struct SendWindow {
    slots: Vec<Option<NetworkPacket>>,
    base: u32,
    base_slot: usize,
    next_seq: u32,
    backlog: VecDeque<Bytes>,
    max_backlog: usize,
}

impl SendWindow {
    pub fn new(window_size: u32, max_backlog: usize) -> SendWindow {
        SendWindow {
            slots: (0..window_size).map(|_| None).collect(),
            base: 0,
            base_slot: 0,
            next_seq: 0,
            backlog: VecDeque::new(),
            max_backlog,
        }
    }

    pub fn window_size(&self) -> u32 {
        self.slots.len() as u32
    }

    pub fn base(&self) -> u32 {
        self.base
    }

    pub fn next_seq(&self) -> u32 {
        self.next_seq
    }

    pub fn in_flight(&self) -> u32 {
        self.next_seq.wrapping_sub(self.base)
    }

    pub fn is_full(&self) -> bool {
        self.in_flight() >= self.window_size()
    }

    /// true if every sent packet was acknowledged
    pub fn is_drained(&self) -> bool {
        self.in_flight() == 0
    }

    fn slot_index(&self, seq: u32) -> usize {
        (self.base_slot + seq.wrapping_sub(self.base) as usize) % self.slots.len()
    }

    /// Stores a packet under `next_seq` and advances `next_seq`. The caller is responsible for
    ///  checking [SendWindow::is_full] first, and for building the packet with `next_seq`.
    pub fn push(&mut self, packet: NetworkPacket) -> u32 {
        debug_assert!(!self.is_full());

        let seq = self.next_seq;
        let idx = self.slot_index(seq);
        if self.slots[idx].replace(packet).is_some() {
            trace!("send window slot {} still held a stale packet, dropping it", idx);
        }
        self.next_seq = seq.wrapping_add(1);
        seq
    }

    /// frees all packets in `[base, ack)` and moves `base` to `ack`
    pub fn ack(&mut self, ack: u32) -> AckOutcome {
        let advance = ack.wrapping_sub(self.base);
        if advance == 0 || advance > u32::MAX / 2 {
            return AckOutcome::Stale;
        }
        if advance > self.in_flight() {
            return AckOutcome::Invalid;
        }

        for _ in 0..advance {
            self.slots[self.base_slot] = None;
            self.base_slot = (self.base_slot + 1) % self.slots.len();
            self.base = self.base.wrapping_add(1);
        }
        AckOutcome::Advanced { freed: advance }
    }

    /// all buffered packets in sequence order, starting at `base`
    pub fn in_flight_packets(&self) -> impl Iterator<Item = &NetworkPacket> {
        (0..self.in_flight())
            .filter_map(move |offset| self.slots[self.slot_index(self.base.wrapping_add(offset))].as_ref())
    }

    pub fn occupied_slots(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// returns false if the backlog is full and the payload was not queued
    pub fn enqueue_backlog(&mut self, payload: Bytes) -> bool {
        if self.backlog.len() >= self.max_backlog {
            return false;
        }
        self.backlog.push_back(payload);
        true
    }

    pub fn pop_backlog(&mut self) -> Option<Bytes> {
        self.backlog.pop_front()
    }

    pub fn backlog_len(&self) -> usize {
        self.backlog.len()
    }
}
