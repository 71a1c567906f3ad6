//! Per-slot delivery bookkeeping.
//!
//! A *slot* is one field of one entity, `(EntityKey, UpdateKind)`. Reliability
//! is tracked per slot rather than per message:
//!
//! - [`ReliableOutbox`] keeps at most one unacknowledged entry per slot. A newer
//!   update for the slot replaces the pending one, so a stalled peer costs at
//!   most one entry per slot instead of an ever-growing queue.
//! - [`UnreliableBuffer`] coalesces unreliable fields between flushes; only the
//!   latest position and scale of each entity are sent.
//! - [`InboundFilter`] remembers the newest sequence applied per slot on the
//!   receiving side and strips anything older, so reordered datagrams can never
//!   roll a field back.

use std::collections::BTreeMap;

use web_time::{Duration, Instant};

use crate::entity::EntityKey;
use crate::network::messages::ReliableEntry;
use crate::network::sequence::{sequence_greater_than, SequenceGenerator, SequenceNumber};
use crate::network::wire::{EntityUpdate, UpdateKind};

/// The unit of supersession: one field of one entity.
pub type Slot = (EntityKey, UpdateKind);

#[derive(Debug, Clone)]
struct PendingEntry {
    sequence: SequenceNumber,
    bytes: Vec<u8>,
    last_sent: Option<Instant>,
    // Insertion counter; lower is older.
    age: u64,
}

/// What happened to the outbox when an entry was pushed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// The slot had nothing pending.
    Queued,
    /// An unacknowledged entry for the same slot was replaced.
    Superseded {
        /// Sequence of the replaced entry.
        previous: SequenceNumber,
    },
    /// The outbox was full; the oldest slot was dropped to make room.
    Evicted {
        /// The slot that was dropped.
        slot: Slot,
    },
}

/// Sender-side reliable delivery with drop-if-newer-exists semantics.
#[derive(Debug)]
pub struct ReliableOutbox {
    pending: BTreeMap<Slot, PendingEntry>,
    by_sequence: BTreeMap<SequenceNumber, Slot>,
    sequences: SequenceGenerator,
    resend_interval: Duration,
    max_pending: usize,
    next_age: u64,
}

impl ReliableOutbox {
    /// Creates an empty outbox.
    #[must_use]
    pub fn new(resend_interval: Duration, max_pending: usize) -> Self {
        Self {
            pending: BTreeMap::new(),
            by_sequence: BTreeMap::new(),
            sequences: SequenceGenerator::new(),
            resend_interval,
            max_pending: max_pending.max(1),
            next_age: 0,
        }
    }

    /// Queues packed update bytes for `slot`, replacing any pending entry for it.
    /// Returns the sequence assigned to the entry along with what happened.
    pub fn push(&mut self, slot: Slot, bytes: Vec<u8>) -> (SequenceNumber, PushOutcome) {
        let mut outcome = PushOutcome::Queued;
        if let Some(previous) = self.pending.remove(&slot) {
            self.by_sequence.remove(&previous.sequence);
            outcome = PushOutcome::Superseded {
                previous: previous.sequence,
            };
        } else if self.pending.len() >= self.max_pending {
            if let Some(oldest) = self.oldest_slot() {
                if let Some(evicted) = self.pending.remove(&oldest) {
                    self.by_sequence.remove(&evicted.sequence);
                }
                outcome = PushOutcome::Evicted { slot: oldest };
            }
        }

        let sequence = self.next_sequence();
        self.pending.insert(
            slot,
            PendingEntry {
                sequence,
                bytes,
                last_sent: None,
                age: self.next_age,
            },
        );
        self.by_sequence.insert(sequence, slot);
        self.next_age += 1;
        (sequence, outcome)
    }

    fn next_sequence(&mut self) -> SequenceNumber {
        let mut sequence = self.sequences.next_sequence();
        // After a full wrap, skip numbers still held by a very old pending entry.
        while self.by_sequence.contains_key(&sequence) {
            sequence = self.sequences.next_sequence();
        }
        sequence
    }

    /// Acknowledges `sequence`. Returns whether it matched a pending entry; an
    /// ack for a superseded entry matches nothing, leaving the newer one queued.
    pub fn ack(&mut self, sequence: SequenceNumber) -> bool {
        match self.by_sequence.remove(&sequence) {
            Some(slot) => {
                self.pending.remove(&slot);
                true
            },
            None => false,
        }
    }

    /// Entries that were never sent or whose last send is at least one resend
    /// interval old, oldest first, at most `limit` of them. Returned entries are
    /// marked as sent at `now`.
    pub fn due(&mut self, now: Instant, limit: usize) -> Vec<ReliableEntry> {
        let interval = self.resend_interval;
        let mut ready: Vec<(u64, Slot)> = self
            .pending
            .iter()
            .filter(|(_, entry)| {
                entry
                    .last_sent
                    .is_none_or(|sent| now.saturating_duration_since(sent) >= interval)
            })
            .map(|(slot, entry)| (entry.age, *slot))
            .collect();
        ready.sort_unstable();
        ready.truncate(limit);

        let mut out = Vec::with_capacity(ready.len());
        for (_, slot) in ready {
            if let Some(entry) = self.pending.get_mut(&slot) {
                entry.last_sent = Some(now);
                out.push(ReliableEntry {
                    sequence: entry.sequence,
                    bytes: entry.bytes.clone(),
                });
            }
        }
        out
    }

    /// Sequence of the entry pending for `slot`, if any.
    #[must_use]
    pub fn pending_sequence(&self, slot: &Slot) -> Option<SequenceNumber> {
        self.pending.get(slot).map(|entry| entry.sequence)
    }

    /// Number of slots awaiting acknowledgement.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether nothing awaits acknowledgement.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Drops every pending entry.
    pub fn clear(&mut self) {
        self.pending.clear();
        self.by_sequence.clear();
    }

    fn oldest_slot(&self) -> Option<Slot> {
        self.pending
            .iter()
            .min_by_key(|(_, entry)| entry.age)
            .map(|(slot, _)| *slot)
    }
}

/// Sender-side coalescing of unreliable fields between flushes.
#[derive(Debug, Default)]
pub struct UnreliableBuffer {
    latest: BTreeMap<EntityKey, EntityUpdate>,
}

impl UnreliableBuffer {
    /// Creates an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the unreliable fields of `update`; later calls overwrite earlier
    /// values for the same entity.
    pub fn push(&mut self, update: &EntityUpdate) {
        let mut unreliable = EntityUpdate::new(update.key);
        unreliable.position = update.position;
        unreliable.scale = update.scale;
        if unreliable.is_empty() {
            return;
        }
        self.latest
            .entry(update.key)
            .and_modify(|existing| existing.merge_from(&unreliable))
            .or_insert(unreliable);
    }

    /// Takes the coalesced updates, one per entity in key order.
    pub fn take(&mut self) -> Vec<EntityUpdate> {
        std::mem::take(&mut self.latest).into_values().collect()
    }

    /// Number of entities with buffered fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.latest.len()
    }

    /// Whether nothing is buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.latest.is_empty()
    }
}

/// Receiver-side stale-update filter.
#[derive(Debug, Default)]
pub struct InboundFilter {
    newest: BTreeMap<Slot, SequenceNumber>,
}

impl InboundFilter {
    /// Creates a filter that has seen nothing.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `sequence` for `slot` if it is newer than anything applied
    /// before, returning whether it was.
    pub fn accept(&mut self, slot: Slot, sequence: SequenceNumber) -> bool {
        match self.newest.get(&slot) {
            Some(&seen) if !sequence_greater_than(sequence, seen) => false,
            _ => {
                self.newest.insert(slot, sequence);
                true
            },
        }
    }

    /// Strips every field of `update` that is not newer than what was already
    /// applied for its slot. Returns `None` when nothing fresh is left, along
    /// with the kinds that were stripped.
    pub fn filter(
        &mut self,
        mut update: EntityUpdate,
        sequence: SequenceNumber,
    ) -> (Option<EntityUpdate>, Vec<UpdateKind>) {
        let mut stale = Vec::new();
        for kind in update.kinds().iter() {
            if !self.accept((update.key, kind), sequence) {
                update.clear(kind);
                stale.push(kind);
            }
        }
        if update.is_empty() {
            (None, stale)
        } else {
            (Some(update), stale)
        }
    }

    /// Forgets everything seen.
    pub fn clear(&mut self) {
        self.newest.clear();
    }

    /// Number of slots with a recorded sequence.
    #[must_use]
    pub fn len(&self) -> usize {
        self.newest.len()
    }

    /// Whether no slot has a recorded sequence.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.newest.is_empty()
    }
}

#[cfg(test)]
#[allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use crate::entity::{EntityType, InstanceId};
    use crate::network::wire::Vec2;

    fn key(id: u8) -> EntityKey {
        EntityKey::new(EntityType::Baldur, InstanceId::new(id))
    }

    fn outbox() -> ReliableOutbox {
        ReliableOutbox::new(Duration::from_millis(100), 8)
    }

    #[test]
    fn newer_entry_supersedes_pending_one() {
        let mut out = outbox();
        let slot = (key(1), UpdateKind::Animation);
        let (first, outcome) = out.push(slot, vec![1]);
        assert_eq!(outcome, PushOutcome::Queued);
        let (second, outcome) = out.push(slot, vec![2]);
        assert_eq!(outcome, PushOutcome::Superseded { previous: first });
        assert_eq!(out.len(), 1);

        // The old entry's ack no longer matches anything.
        assert!(!out.ack(first));
        assert_eq!(out.pending_sequence(&slot), Some(second));
        assert!(out.ack(second));
        assert!(out.is_empty());
    }

    #[test]
    fn slots_are_independent() {
        let mut out = outbox();
        out.push((key(1), UpdateKind::Animation), vec![1]);
        out.push((key(1), UpdateKind::State), vec![2]);
        out.push((key(2), UpdateKind::Animation), vec![3]);
        assert_eq!(out.len(), 3);
    }

    #[test]
    fn due_respects_resend_interval() {
        let mut out = outbox();
        let start = Instant::now();
        out.push((key(1), UpdateKind::State), vec![9]);

        let first = out.due(start, 16);
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].bytes, vec![9]);
        assert!(out.due(start + Duration::from_millis(50), 16).is_empty());
        assert_eq!(out.due(start + Duration::from_millis(100), 16).len(), 1);
    }

    #[test]
    fn due_returns_oldest_first_up_to_limit() {
        let mut out = outbox();
        let now = Instant::now();
        out.push((key(3), UpdateKind::State), vec![3]);
        out.push((key(1), UpdateKind::State), vec![1]);
        out.push((key(2), UpdateKind::State), vec![2]);

        let batch = out.due(now, 2);
        assert_eq!(
            batch.iter().map(|e| e.bytes[0]).collect::<Vec<_>>(),
            vec![3, 1]
        );
        let rest = out.due(now, 2);
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].bytes, vec![2]);
    }

    #[test]
    fn full_outbox_evicts_oldest_slot() {
        let mut out = ReliableOutbox::new(Duration::from_millis(100), 2);
        out.push((key(1), UpdateKind::State), vec![1]);
        out.push((key(2), UpdateKind::State), vec![2]);
        let (_, outcome) = out.push((key(3), UpdateKind::State), vec![3]);
        assert_eq!(
            outcome,
            PushOutcome::Evicted {
                slot: (key(1), UpdateKind::State)
            }
        );
        assert_eq!(out.len(), 2);
        assert!(out.pending_sequence(&(key(1), UpdateKind::State)).is_none());
    }

    #[test]
    fn unreliable_buffer_keeps_latest_per_entity() {
        let mut buffer = UnreliableBuffer::new();
        buffer.push(&EntityUpdate::new(key(1)).with_position(Vec2::new(1.0, 1.0)));
        buffer.push(&EntityUpdate::new(key(1)).with_scale(true));
        buffer.push(
            &EntityUpdate::new(key(1))
                .with_position(Vec2::new(2.0, 2.0))
                .with_state(1),
        );
        buffer.push(&EntityUpdate::new(key(2)).with_animation(1, &[]));

        let taken = buffer.take();
        assert_eq!(taken.len(), 1);
        assert_eq!(taken[0].position, Some(Vec2::new(2.0, 2.0)));
        assert_eq!(taken[0].scale, Some(true));
        assert_eq!(taken[0].state, None);
        assert!(buffer.is_empty());
    }

    #[test]
    fn inbound_filter_rejects_older_and_duplicate() {
        let mut filter = InboundFilter::new();
        let slot = (key(1), UpdateKind::Animation);
        assert!(filter.accept(slot, 10));
        assert!(!filter.accept(slot, 10));
        assert!(!filter.accept(slot, 9));
        assert!(filter.accept(slot, 11));
    }

    #[test]
    fn inbound_filter_handles_wraparound() {
        let mut filter = InboundFilter::new();
        let slot = (key(1), UpdateKind::State);
        assert!(filter.accept(slot, u32::MAX));
        assert!(filter.accept(slot, 2));
        assert!(!filter.accept(slot, u32::MAX - 1));
    }

    #[test]
    fn quiet_slot_is_fresh_after_a_long_gap() {
        let mut filter = InboundFilter::new();
        let quiet = (key(1), UpdateKind::State);
        let busy = (key(2), UpdateKind::Animation);
        assert!(filter.accept(quiet, 0));
        for sequence in 1..=40_000 {
            assert!(filter.accept(busy, sequence));
        }
        assert!(filter.accept(quiet, 40_001));
        assert_eq!(filter.len(), 2);

        filter.clear();
        assert!(filter.is_empty());
        assert!(filter.accept(busy, 5));
    }

    #[test]
    fn filter_strips_only_stale_fields() {
        let mut filter = InboundFilter::new();
        let k = key(4);
        filter.accept((k, UpdateKind::Position), 20);

        let update = EntityUpdate::new(k)
            .with_position(Vec2::new(0.0, 0.0))
            .with_scale(false);
        let (fresh, stale) = filter.filter(update, 15);
        let fresh = fresh.unwrap();
        assert_eq!(fresh.position, None);
        assert_eq!(fresh.scale, Some(false));
        assert_eq!(stale, vec![UpdateKind::Position]);

        let (none, _) = filter.filter(EntityUpdate::new(k).with_scale(true), 14);
        assert!(none.is_none());
    }
}
