//! Packed representation of entity updates.
//!
//! Every update starts with a one-byte field set followed by the entity key and
//! then only the fields the set declares, in a fixed order:
//!
//! ```text
//! u8  flags        bit0 Position, bit1 Scale, bit2 Animation, bit3 State; bits 4..7 must be 0
//! u8  entity_type
//! u8  instance_id
//! [f32 x, f32 y]                  if Position (little-endian)
//! [u8 scale]                      if Scale (0 or 1)
//! [u8 index, u8 len, len bytes]   if Animation
//! [u8 state]                      if State
//! ```
//!
//! A scene-entry batch is a `u16` count followed by that many updates, each
//! prefixed by its `u16` byte length (little-endian).
//!
//! Decoding never reads past the end of the input and never panics; a buffer
//! that is too short for the fields its header declares is a [`WireError`].

use std::fmt;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::entity::{EntityKey, EntityType, InstanceId};

/// Extra bytes attached to an animation update. Almost always 0-2 bytes.
pub type AnimationInfo = SmallVec<[u8; 8]>;

/// Largest animation info payload the format can carry.
pub const MAX_INFO_LEN: usize = u8::MAX as usize;

/// Size of the flags + type + id header.
pub const HEADER_LEN: usize = 3;

/// A 2D position in engine units.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec2 {
    /// Horizontal component.
    pub x: f32,
    /// Vertical component.
    pub y: f32,
}

impl Vec2 {
    /// Creates a vector.
    #[must_use]
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// How a field travels over the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Reliability {
    /// Retransmitted until acknowledged; a newer update for the same slot
    /// supersedes an unacknowledged older one.
    Reliable,
    /// Sent once; the receiver keeps only the newest.
    Unreliable,
}

/// The four kinds of field an update can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum UpdateKind {
    /// Transform position.
    Position,
    /// Horizontal flip.
    Scale,
    /// Animation index plus info bytes.
    Animation,
    /// Coarse lifecycle state.
    State,
}

impl UpdateKind {
    /// All kinds in canonical wire order.
    pub const ALL: [UpdateKind; 4] = [
        UpdateKind::Position,
        UpdateKind::Scale,
        UpdateKind::Animation,
        UpdateKind::State,
    ];

    /// The kind's bit in the flags byte.
    #[must_use]
    pub const fn flag(self) -> u8 {
        match self {
            UpdateKind::Position => 0x01,
            UpdateKind::Scale => 0x02,
            UpdateKind::Animation => 0x04,
            UpdateKind::State => 0x08,
        }
    }

    /// Delivery policy for this kind.
    #[must_use]
    pub const fn reliability(self) -> Reliability {
        match self {
            UpdateKind::Animation | UpdateKind::State => Reliability::Reliable,
            UpdateKind::Position | UpdateKind::Scale => Reliability::Unreliable,
        }
    }

    /// Lowercase label for logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            UpdateKind::Position => "position",
            UpdateKind::Scale => "scale",
            UpdateKind::Animation => "animation",
            UpdateKind::State => "state",
        }
    }
}

impl fmt::Display for UpdateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Set of [`UpdateKind`]s, stored as the wire flags byte.
#[derive(Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct UpdateKinds(u8);

impl UpdateKinds {
    /// Bits that must never be set.
    pub const RESERVED_MASK: u8 = 0xF0;

    /// The empty set.
    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Parses a flags byte, rejecting reserved bits.
    pub fn from_bits(bits: u8) -> Result<Self, WireError> {
        if bits & Self::RESERVED_MASK != 0 {
            return Err(WireError::ReservedFlags { flags: bits });
        }
        Ok(Self(bits))
    }

    /// The flags byte.
    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Whether `kind` is in the set.
    #[must_use]
    pub const fn contains(self, kind: UpdateKind) -> bool {
        self.0 & kind.flag() != 0
    }

    /// Adds `kind`.
    pub fn insert(&mut self, kind: UpdateKind) {
        self.0 |= kind.flag();
    }

    /// Whether the set is empty.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// The kinds in the set, in wire order.
    pub fn iter(self) -> impl Iterator<Item = UpdateKind> {
        UpdateKind::ALL
            .into_iter()
            .filter(move |kind| self.contains(*kind))
    }
}

impl fmt::Debug for UpdateKinds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

/// An animation event: the index into the entity type's animation table plus
/// any extra bytes the replay needs (e.g. which wake variant played).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnimationUpdate {
    /// Index into the entity type's animation table.
    pub index: u8,
    /// Extra bytes interpreted by the replay table.
    pub info: AnimationInfo,
}

impl AnimationUpdate {
    /// Creates an animation update.
    #[must_use]
    pub fn new(index: u8, info: &[u8]) -> Self {
        Self {
            index,
            info: AnimationInfo::from_slice(info),
        }
    }
}

/// One entity's changed fields.
///
/// A field is present exactly when its flag is in [`kinds`](Self::kinds), so a
/// value can never disagree with the header it is encoded under.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityUpdate {
    /// The entity the update is for.
    pub key: EntityKey,
    /// New position, if sent.
    pub position: Option<Vec2>,
    /// New horizontal flip, if sent.
    pub scale: Option<bool>,
    /// Animation event, if sent.
    pub animation: Option<AnimationUpdate>,
    /// New coarse state, if sent.
    pub state: Option<u8>,
}

impl EntityUpdate {
    /// An update for `key` with no fields.
    #[must_use]
    pub const fn new(key: EntityKey) -> Self {
        Self {
            key,
            position: None,
            scale: None,
            animation: None,
            state: None,
        }
    }

    /// Sets the position field.
    #[must_use]
    pub fn with_position(mut self, position: Vec2) -> Self {
        self.position = Some(position);
        self
    }

    /// Sets the scale field.
    #[must_use]
    pub fn with_scale(mut self, flipped: bool) -> Self {
        self.scale = Some(flipped);
        self
    }

    /// Sets the animation field.
    #[must_use]
    pub fn with_animation(mut self, index: u8, info: &[u8]) -> Self {
        self.animation = Some(AnimationUpdate::new(index, info));
        self
    }

    /// Sets the state field.
    #[must_use]
    pub fn with_state(mut self, state: u8) -> Self {
        self.state = Some(state);
        self
    }

    /// The set of fields present.
    #[must_use]
    pub fn kinds(&self) -> UpdateKinds {
        let mut kinds = UpdateKinds::empty();
        if self.position.is_some() {
            kinds.insert(UpdateKind::Position);
        }
        if self.scale.is_some() {
            kinds.insert(UpdateKind::Scale);
        }
        if self.animation.is_some() {
            kinds.insert(UpdateKind::Animation);
        }
        if self.state.is_some() {
            kinds.insert(UpdateKind::State);
        }
        kinds
    }

    /// Whether no field is present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.kinds().is_empty()
    }

    /// Reliable when any reliable field is present.
    #[must_use]
    pub fn reliability(&self) -> Reliability {
        if self.kinds().iter().any(|k| k.reliability() == Reliability::Reliable) {
            Reliability::Reliable
        } else {
            Reliability::Unreliable
        }
    }

    /// A copy carrying only `kind`, if present.
    #[must_use]
    pub fn only(&self, kind: UpdateKind) -> Option<Self> {
        let mut out = Self::new(self.key);
        match kind {
            UpdateKind::Position => out.position = Some(self.position?),
            UpdateKind::Scale => out.scale = Some(self.scale?),
            UpdateKind::Animation => out.animation = Some(self.animation.clone()?),
            UpdateKind::State => out.state = Some(self.state?),
        }
        Some(out)
    }

    /// Removes `kind` from the update.
    pub fn clear(&mut self, kind: UpdateKind) {
        match kind {
            UpdateKind::Position => self.position = None,
            UpdateKind::Scale => self.scale = None,
            UpdateKind::Animation => self.animation = None,
            UpdateKind::State => self.state = None,
        }
    }

    /// Overwrites this update's fields with every field present in `newer`.
    pub fn merge_from(&mut self, newer: &Self) {
        if let Some(position) = newer.position {
            self.position = Some(position);
        }
        if let Some(scale) = newer.scale {
            self.scale = Some(scale);
        }
        if let Some(animation) = &newer.animation {
            self.animation = Some(animation.clone());
        }
        if let Some(state) = newer.state {
            self.state = Some(state);
        }
    }

    /// Number of bytes [`encode`] produces for this update.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        let mut len = HEADER_LEN;
        if self.position.is_some() {
            len += 8;
        }
        if self.scale.is_some() {
            len += 1;
        }
        if let Some(animation) = &self.animation {
            len += 2 + animation.info.len();
        }
        if self.state.is_some() {
            len += 1;
        }
        len
    }
}

/// The part of a packed update a decoder was reading when it ran out of bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireField {
    /// Flags, entity type and instance id.
    Header,
    /// The two position floats.
    Position,
    /// The scale byte.
    Scale,
    /// The animation index and info length.
    AnimationHeader,
    /// The animation info bytes.
    AnimationInfo,
    /// The state byte.
    State,
    /// The batch's element count.
    BatchCount,
    /// A batch element's length prefix.
    ElementLength,
    /// A batch element's body.
    Element,
}

impl fmt::Display for WireField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WireField::Header => "header",
            WireField::Position => "position",
            WireField::Scale => "scale",
            WireField::AnimationHeader => "animation header",
            WireField::AnimationInfo => "animation info",
            WireField::State => "state",
            WireField::BatchCount => "batch count",
            WireField::ElementLength => "element length",
            WireField::Element => "element",
        };
        f.write_str(name)
    }
}

/// Why a packed update or batch could not be encoded or decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    /// The buffer ended before the declared fields did.
    Truncated {
        /// The field being read.
        field: WireField,
        /// Bytes the field needs.
        needed: usize,
        /// Bytes that were left.
        remaining: usize,
    },
    /// One of the reserved flag bits (4..7) was set.
    ReservedFlags {
        /// The offending flags byte.
        flags: u8,
    },
    /// The entity type byte names no known type.
    UnknownEntityType {
        /// The offending byte.
        value: u8,
    },
    /// The scale byte was neither 0 nor 1.
    InvalidScale {
        /// The offending byte.
        value: u8,
    },
    /// An animation info payload longer than [`MAX_INFO_LEN`] cannot be encoded.
    InfoTooLong {
        /// The payload length.
        len: usize,
    },
    /// Bytes were left over after a complete update or batch.
    TrailingBytes {
        /// How many bytes were left.
        count: usize,
    },
    /// A batch has more elements than its `u16` count can express.
    BatchLength {
        /// The number of elements.
        count: usize,
    },
}

impl fmt::Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireError::Truncated {
                field,
                needed,
                remaining,
            } => write!(
                f,
                "truncated {field}: needed {needed} bytes, {remaining} remaining"
            ),
            WireError::ReservedFlags { flags } => {
                write!(f, "reserved flag bits set in {flags:#04x}")
            },
            WireError::UnknownEntityType { value } => write!(f, "unknown entity type {value}"),
            WireError::InvalidScale { value } => write!(f, "scale byte {value} is not 0 or 1"),
            WireError::InfoTooLong { len } => {
                write!(f, "animation info of {len} bytes exceeds {MAX_INFO_LEN}")
            },
            WireError::TrailingBytes { count } => write!(f, "{count} trailing bytes"),
            WireError::BatchLength { count } => {
                write!(f, "batch of {count} updates exceeds {}", u16::MAX)
            },
        }
    }
}

impl std::error::Error for WireError {}

/// Bounds-checked cursor over an input buffer.
struct Reader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    fn remaining(&self) -> usize {
        self.bytes.len().saturating_sub(self.offset)
    }

    fn take(&mut self, needed: usize, field: WireField) -> Result<&'a [u8], WireError> {
        let end = self.offset.saturating_add(needed);
        match self.bytes.get(self.offset..end) {
            Some(slice) => {
                self.offset = end;
                Ok(slice)
            },
            None => Err(WireError::Truncated {
                field,
                needed,
                remaining: self.remaining(),
            }),
        }
    }

    fn array<const N: usize>(&mut self, field: WireField) -> Result<[u8; N], WireError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N, field)?);
        Ok(out)
    }

    fn u8(&mut self, field: WireField) -> Result<u8, WireError> {
        let [byte] = self.array::<1>(field)?;
        Ok(byte)
    }

    fn u16(&mut self, field: WireField) -> Result<u16, WireError> {
        Ok(u16::from_le_bytes(self.array::<2>(field)?))
    }

    fn f32(&mut self, field: WireField) -> Result<f32, WireError> {
        Ok(f32::from_le_bytes(self.array::<4>(field)?))
    }
}

/// Packs `update` into a new buffer.
pub fn encode(update: &EntityUpdate) -> Result<Vec<u8>, WireError> {
    let mut out = Vec::with_capacity(update.encoded_len());
    encode_into(update, &mut out)?;
    Ok(out)
}

/// Appends the packed form of `update` to `out`, returning the bytes written.
///
/// Nothing is written if the update cannot be encoded.
pub fn encode_into(update: &EntityUpdate, out: &mut Vec<u8>) -> Result<usize, WireError> {
    if let Some(animation) = &update.animation {
        if animation.info.len() > MAX_INFO_LEN {
            return Err(WireError::InfoTooLong {
                len: animation.info.len(),
            });
        }
    }

    let start = out.len();
    out.push(update.kinds().bits());
    out.push(update.key.entity_type.as_u8());
    out.push(update.key.id.as_u8());
    if let Some(position) = update.position {
        out.extend_from_slice(&position.x.to_le_bytes());
        out.extend_from_slice(&position.y.to_le_bytes());
    }
    if let Some(flipped) = update.scale {
        out.push(u8::from(flipped));
    }
    if let Some(animation) = &update.animation {
        out.push(animation.index);
        out.push(animation.info.len() as u8);
        out.extend_from_slice(&animation.info);
    }
    if let Some(state) = update.state {
        out.push(state);
    }
    Ok(out.len() - start)
}

/// Unpacks one update from the front of `bytes`, returning it with the number
/// of bytes consumed.
pub fn decode_prefix(bytes: &[u8]) -> Result<(EntityUpdate, usize), WireError> {
    let mut reader = Reader::new(bytes);
    let update = read_update(&mut reader)?;
    Ok((update, reader.offset))
}

/// Unpacks exactly one update; trailing bytes are an error.
pub fn decode(bytes: &[u8]) -> Result<EntityUpdate, WireError> {
    let (update, read) = decode_prefix(bytes)?;
    if read != bytes.len() {
        return Err(WireError::TrailingBytes {
            count: bytes.len() - read,
        });
    }
    Ok(update)
}

fn read_update(reader: &mut Reader<'_>) -> Result<EntityUpdate, WireError> {
    let [flags, type_byte, id] = reader.array::<3>(WireField::Header)?;
    let kinds = UpdateKinds::from_bits(flags)?;
    let entity_type = EntityType::try_from(type_byte)
        .map_err(|value| WireError::UnknownEntityType { value })?;
    let mut update = EntityUpdate::new(EntityKey::new(entity_type, InstanceId::new(id)));

    if kinds.contains(UpdateKind::Position) {
        // Both floats are checked as one field so a half-present position is
        // reported with the full width it needed.
        let raw = reader.array::<8>(WireField::Position)?;
        let mut halves = Reader::new(&raw);
        let x = halves.f32(WireField::Position)?;
        let y = halves.f32(WireField::Position)?;
        update.position = Some(Vec2::new(x, y));
    }
    if kinds.contains(UpdateKind::Scale) {
        update.scale = Some(match reader.u8(WireField::Scale)? {
            0 => false,
            1 => true,
            value => return Err(WireError::InvalidScale { value }),
        });
    }
    if kinds.contains(UpdateKind::Animation) {
        let [index, len] = reader.array::<2>(WireField::AnimationHeader)?;
        let info = reader.take(len as usize, WireField::AnimationInfo)?;
        update.animation = Some(AnimationUpdate::new(index, info));
    }
    if kinds.contains(UpdateKind::State) {
        update.state = Some(reader.u8(WireField::State)?);
    }
    Ok(update)
}

/// Packs a scene-entry batch.
pub fn encode_batch(updates: &[EntityUpdate]) -> Result<Vec<u8>, WireError> {
    let count = u16::try_from(updates.len()).map_err(|_| WireError::BatchLength {
        count: updates.len(),
    })?;
    let mut out = Vec::with_capacity(
        2 + updates
            .iter()
            .map(|u| 2 + u.encoded_len())
            .sum::<usize>(),
    );
    out.extend_from_slice(&count.to_le_bytes());
    for update in updates {
        let len_at = out.len();
        out.extend_from_slice(&[0, 0]);
        let written = encode_into(update, &mut out)?;
        // An update is at most a few hundred bytes, far below u16::MAX.
        let len = (written as u16).to_le_bytes();
        out[len_at] = len[0];
        out[len_at + 1] = len[1];
    }
    Ok(out)
}

/// Unpacks a scene-entry batch. A single malformed element rejects the batch.
pub fn decode_batch(bytes: &[u8]) -> Result<Vec<EntityUpdate>, WireError> {
    let mut reader = Reader::new(bytes);
    let count = reader.u16(WireField::BatchCount)? as usize;
    // Every element needs at least its length prefix and a header.
    let mut updates = Vec::with_capacity(count.min(reader.remaining() / (2 + HEADER_LEN)));
    for _ in 0..count {
        let len = reader.u16(WireField::ElementLength)? as usize;
        let element = reader.take(len, WireField::Element)?;
        updates.push(decode(element)?);
    }
    if reader.remaining() != 0 {
        return Err(WireError::TrailingBytes {
            count: reader.remaining(),
        });
    }
    Ok(updates)
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

    fn key(ty: EntityType, id: u8) -> EntityKey {
        EntityKey::new(ty, InstanceId::new(id))
    }

    fn full_update() -> EntityUpdate {
        EntityUpdate::new(key(EntityType::BroodingMawlek, 4))
            .with_position(Vec2::new(1.5, -2.0))
            .with_scale(true)
            .with_animation(2, &[1])
            .with_state(1)
    }

    #[test]
    fn layout_matches_documented_order() {
        let bytes = encode(&full_update()).unwrap();
        let mut expected = vec![0x0F, 28, 4];
        expected.extend_from_slice(&1.5f32.to_le_bytes());
        expected.extend_from_slice(&(-2.0f32).to_le_bytes());
        expected.extend_from_slice(&[1, 2, 1, 1, 1]);
        assert_eq!(bytes, expected);
        assert_eq!(bytes.len(), full_update().encoded_len());
    }

    #[test]
    fn state_only_update_is_four_bytes() {
        let update = EntityUpdate::new(key(EntityType::Baldur, 2)).with_state(1);
        assert_eq!(encode(&update).unwrap(), vec![0x08, 2, 2, 1]);
        assert_eq!(decode(&[0x08, 2, 2, 1]).unwrap(), update);
    }

    #[test]
    fn every_truncation_is_an_error() {
        let bytes = encode(&full_update()).unwrap();
        for cut in 0..bytes.len() {
            let err = decode(&bytes[..cut]).unwrap_err();
            assert!(
                matches!(err, WireError::Truncated { .. }),
                "cut at {cut}: {err:?}"
            );
        }
    }

    #[test]
    fn truncated_reports_field_and_sizes() {
        // Position declared but only 3 of 8 bytes present.
        let err = decode(&[0x01, 1, 1, 0, 0, 0]).unwrap_err();
        assert_eq!(
            err,
            WireError::Truncated {
                field: WireField::Position,
                needed: 8,
                remaining: 3
            }
        );
    }

    #[test]
    fn info_length_beyond_buffer_is_truncated() {
        let err = decode(&[0x04, 1, 0, 5, 200, 1, 2]).unwrap_err();
        assert_eq!(
            err,
            WireError::Truncated {
                field: WireField::AnimationInfo,
                needed: 200,
                remaining: 2
            }
        );
    }

    #[test]
    fn reserved_bits_are_rejected() {
        assert_eq!(
            decode(&[0x18, 1, 1, 0]).unwrap_err(),
            WireError::ReservedFlags { flags: 0x18 }
        );
    }

    #[test]
    fn unknown_type_is_rejected() {
        assert_eq!(
            decode(&[0x00, 200, 0]).unwrap_err(),
            WireError::UnknownEntityType { value: 200 }
        );
    }

    #[test]
    fn scale_must_be_boolean() {
        assert_eq!(
            decode(&[0x02, 1, 0, 2]).unwrap_err(),
            WireError::InvalidScale { value: 2 }
        );
    }

    #[test]
    fn none_type_decodes() {
        let update = decode(&[0x08, 0, 0, 0]).unwrap();
        assert_eq!(update.key, key(EntityType::None, 0));
    }

    #[test]
    fn trailing_bytes_are_rejected_by_strict_decode() {
        assert_eq!(
            decode(&[0x08, 2, 2, 1, 9]).unwrap_err(),
            WireError::TrailingBytes { count: 1 }
        );
        let (update, read) = decode_prefix(&[0x08, 2, 2, 1, 9]).unwrap();
        assert_eq!(read, 4);
        assert_eq!(update.state, Some(1));
    }

    #[test]
    fn oversized_info_writes_nothing() {
        let info = vec![0u8; 256];
        let update = EntityUpdate::new(key(EntityType::Goam, 0)).with_animation(0, &info);
        let mut out = vec![0xAA];
        assert_eq!(
            encode_into(&update, &mut out).unwrap_err(),
            WireError::InfoTooLong { len: 256 }
        );
        assert_eq!(out, vec![0xAA]);
    }

    #[test]
    fn batch_roundtrip_preserves_order() {
        let batch = vec![
            full_update(),
            EntityUpdate::new(key(EntityType::Baldur, 2)).with_state(1),
            EntityUpdate::new(key(EntityType::Crawlid, 0)),
        ];
        let bytes = encode_batch(&batch).unwrap();
        assert_eq!(&bytes[..2], &[3, 0]);
        assert_eq!(decode_batch(&bytes).unwrap(), batch);
    }

    #[test]
    fn empty_batch_is_two_bytes() {
        assert_eq!(encode_batch(&[]).unwrap(), vec![0, 0]);
        assert!(decode_batch(&[0, 0]).unwrap().is_empty());
    }

    #[test]
    fn malformed_element_rejects_batch() {
        let mut bytes = encode_batch(&[
            EntityUpdate::new(key(EntityType::Baldur, 1)).with_state(0),
            EntityUpdate::new(key(EntityType::Baldur, 2)).with_scale(false),
        ])
        .unwrap();
        // Corrupt the second element's scale byte.
        let last = bytes.len() - 1;
        bytes[last] = 7;
        assert_eq!(
            decode_batch(&bytes).unwrap_err(),
            WireError::InvalidScale { value: 7 }
        );
    }

    #[test]
    fn batch_count_larger_than_payload_is_truncated() {
        let err = decode_batch(&[5, 0, 4, 0, 0x08, 1, 1, 0]).unwrap_err();
        assert!(matches!(
            err,
            WireError::Truncated {
                field: WireField::ElementLength,
                ..
            }
        ));
    }

    #[test]
    fn reliability_follows_kinds() {
        let k = key(EntityType::Vengefly, 0);
        assert_eq!(
            EntityUpdate::new(k).with_position(Vec2::default()).reliability(),
            Reliability::Unreliable
        );
        assert_eq!(
            EntityUpdate::new(k)
                .with_position(Vec2::default())
                .with_animation(1, &[])
                .reliability(),
            Reliability::Reliable
        );
        assert_eq!(UpdateKind::State.reliability(), Reliability::Reliable);
        assert_eq!(UpdateKind::Scale.reliability(), Reliability::Unreliable);
    }

    #[test]
    fn only_and_clear_split_fields() {
        let update = full_update();
        let animation = update.only(UpdateKind::Animation).unwrap();
        assert_eq!(animation.kinds().bits(), UpdateKind::Animation.flag());
        assert!(EntityUpdate::new(update.key).only(UpdateKind::State).is_none());

        let mut rest = update;
        rest.clear(UpdateKind::Animation);
        rest.clear(UpdateKind::State);
        assert_eq!(rest.reliability(), Reliability::Unreliable);
    }

    #[test]
    fn merge_from_keeps_absent_fields() {
        let k = key(EntityType::Baldur, 2);
        let mut merged = EntityUpdate::new(k).with_state(0).with_scale(false);
        merged.merge_from(&EntityUpdate::new(k).with_state(1).with_position(Vec2::new(3.0, 4.0)));
        assert_eq!(merged.state, Some(1));
        assert_eq!(merged.scale, Some(false));
        assert_eq!(merged.position, Some(Vec2::new(3.0, 4.0)));
    }

    #[test]
    fn update_kinds_debug_lists_members() {
        let kinds = full_update().kinds();
        assert_eq!(
            format!("{kinds:?}"),
            "{Position, Scale, Animation, State}"
        );
        assert!(UpdateKinds::from_bits(0x0F).is_ok());
    }
}
