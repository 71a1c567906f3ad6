//! Wrapping `u32` sequence numbers.
//!
//! Packets, per-slot reliable entries and control messages are stamped with a
//! sequence number that wraps after `u32::MAX`. Comparisons treat the half of
//! the number space "ahead" of a value as newer, so ordering stays correct
//! across the wrap.
//!
//! Receivers keep the newest sequence per slot for a whole scene, so a quiet
//! slot's entry has to stay within half the space of everything sent after it.

/// A wrapping packet or update sequence number.
pub type SequenceNumber = u32;

/// Distance at which a sequence stops counting as newer.
const HALF_RANGE: SequenceNumber = 1 << 31;

/// Returns whether `s1` is newer than `s2`.
///
/// ```
/// use scene_sync::network::sequence::sequence_greater_than;
///
/// assert!(sequence_greater_than(2, 1));
/// assert!(!sequence_greater_than(1, 2));
/// assert!(!sequence_greater_than(1, 1));
/// assert!(sequence_greater_than(0, u32::MAX));
/// ```
#[must_use]
pub fn sequence_greater_than(s1: SequenceNumber, s2: SequenceNumber) -> bool {
    ((s1 > s2) && (s1 - s2 <= HALF_RANGE)) || ((s1 < s2) && (s2 - s1 > HALF_RANGE))
}

/// Returns whether `s1` is older than `s2`.
#[must_use]
pub fn sequence_less_than(s1: SequenceNumber, s2: SequenceNumber) -> bool {
    sequence_greater_than(s2, s1)
}

/// Signed distance from `a` forward to `b`.
///
/// ```
/// use scene_sync::network::sequence::wrapping_diff;
///
/// assert_eq!(wrapping_diff(1, 2), 1);
/// assert_eq!(wrapping_diff(u32::MAX, 0), 1);
/// assert_eq!(wrapping_diff(0, u32::MAX), -1);
/// ```
#[must_use]
pub fn wrapping_diff(a: SequenceNumber, b: SequenceNumber) -> i32 {
    b.wrapping_sub(a) as i32
}

/// Hands out consecutive sequence numbers, wrapping at `u32::MAX`.
#[derive(Debug, Default, Clone)]
pub struct SequenceGenerator {
    next: SequenceNumber,
}

impl SequenceGenerator {
    /// Starts counting at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the next sequence number.
    pub fn next_sequence(&mut self) -> SequenceNumber {
        let current = self.next;
        self.next = self.next.wrapping_add(1);
        current
    }

    /// The sequence number the next call will return.
    #[must_use]
    pub fn peek(&self) -> SequenceNumber {
        self.next
    }
}
