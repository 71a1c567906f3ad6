//! Property-based tests for the wire format and delivery bookkeeping.
//!
//! # Properties Tested
//!
//! ## Wire format
//! - Decoding arbitrary bytes returns an error instead of panicking
//! - A packed update decodes to itself, and any strict prefix of it is rejected
//! - The declared length matches what is written
//!
//! ## Sequence numbers
//! - For distinct values exactly one is newer than the other
//!
//! ## Delivery
//! - Whatever order reliable entries for one slot arrive in, the applied
//!   sequence is strictly increasing and ends with the newest entry
//! - The reliable outbox never holds more than one entry per slot nor more
//!   than its bound

// Allow test-specific patterns that are appropriate for test code
#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]

use std::collections::BTreeSet;

use proptest::prelude::*;
use scene_sync::catalog::classify::instance_id;
use scene_sync::catalog::Classifier;
use scene_sync::network::reliability::{InboundFilter, ReliableOutbox};
use scene_sync::network::sequence::sequence_greater_than;
use scene_sync::network::wire;
use scene_sync::{EntityKey, EntityType, EntityUpdate, InstanceId, UpdateKind, Vec2};
use web_time::Duration;

// ============================================================================
// Strategies
// ============================================================================

fn entity_key() -> impl Strategy<Value = EntityKey> {
    (0..EntityType::ALL.len(), any::<u8>())
        .prop_map(|(index, id)| EntityKey::new(EntityType::ALL[index], InstanceId::new(id)))
}

fn position() -> impl Strategy<Value = Vec2> {
    (-1.0e6f32..1.0e6, -1.0e6f32..1.0e6).prop_map(|(x, y)| Vec2::new(x, y))
}

fn entity_update() -> impl Strategy<Value = EntityUpdate> {
    (
        entity_key(),
        proptest::option::of(position()),
        proptest::option::of(any::<bool>()),
        proptest::option::of((any::<u8>(), proptest::collection::vec(any::<u8>(), 0..8))),
        proptest::option::of(any::<u8>()),
    )
        .prop_map(|(key, position, scale, animation, state)| {
            let mut update = EntityUpdate::new(key);
            if let Some(position) = position {
                update = update.with_position(position);
            }
            if let Some(flipped) = scale {
                update = update.with_scale(flipped);
            }
            if let Some((index, info)) = animation {
                update = update.with_animation(index, &info);
            }
            if let Some(state) = state {
                update = update.with_state(state);
            }
            update
        })
}

// ============================================================================
// Wire format
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(512))]

    #[test]
    fn decoding_arbitrary_bytes_never_panics(bytes in proptest::collection::vec(any::<u8>(), 0..64)) {
        let _ = wire::decode(&bytes);
        let _ = wire::decode_prefix(&bytes);
        let _ = wire::decode_batch(&bytes);
    }

    #[test]
    fn packed_update_decodes_to_itself(update in entity_update()) {
        let bytes = wire::encode(&update).unwrap();
        prop_assert_eq!(bytes.len(), update.encoded_len());
        prop_assert_eq!(wire::decode(&bytes).unwrap(), update);
    }

    #[test]
    fn truncated_update_is_rejected(update in entity_update(), cut in any::<prop::sample::Index>()) {
        let bytes = wire::encode(&update).unwrap();
        let cut = cut.index(bytes.len());
        prop_assert!(wire::decode(&bytes[..cut]).is_err());
    }

    #[test]
    fn batch_preserves_order(updates in proptest::collection::vec(entity_update(), 0..16)) {
        let bytes = wire::encode_batch(&updates).unwrap();
        prop_assert_eq!(wire::decode_batch(&bytes).unwrap(), updates);
    }
}

// ============================================================================
// Sequence numbers
// ============================================================================

proptest! {
    #[test]
    fn exactly_one_of_two_distinct_sequences_is_newer(a in any::<u32>(), b in any::<u32>()) {
        prop_assume!(a != b);
        prop_assert!(sequence_greater_than(a, b) ^ sequence_greater_than(b, a));
    }

    #[test]
    fn a_sequence_is_not_newer_than_itself(a in any::<u32>()) {
        prop_assert!(!sequence_greater_than(a, a));
    }

    #[test]
    fn successor_is_newer_across_the_wrap(a in any::<u32>()) {
        prop_assert!(sequence_greater_than(a.wrapping_add(1), a));
    }
}

// ============================================================================
// Delivery bookkeeping
// ============================================================================

proptest! {
    #[test]
    fn reordered_reliable_entries_never_roll_back(
        arrivals in Just((0u32..24).collect::<Vec<_>>()).prop_shuffle(),
        start in any::<u32>(),
    ) {
        let key = EntityKey::new(EntityType::Baldur, InstanceId::new(2));
        let mut filter = InboundFilter::new();
        let mut applied = Vec::new();

        for offset in arrivals {
            let sequence = start.wrapping_add(offset);
            let update = EntityUpdate::new(key).with_animation(offset as u8, &[]);
            if let (Some(fresh), _) = filter.filter(update, sequence) {
                applied.push(fresh.animation.unwrap().index);
            }
        }

        prop_assert!(applied.windows(2).all(|pair| pair[0] < pair[1]));
        prop_assert_eq!(applied.last().copied(), Some(23));
    }

    #[test]
    fn reliable_outbox_keeps_one_entry_per_slot(
        pushes in proptest::collection::vec((0u8..6, prop::bool::ANY), 1..64),
        max_pending in 1usize..8,
    ) {
        let mut outbox = ReliableOutbox::new(Duration::from_millis(100), max_pending);
        let mut slots = BTreeSet::new();

        for (id, is_state) in pushes {
            let key = EntityKey::new(EntityType::Squit, InstanceId::new(id));
            let kind = if is_state { UpdateKind::State } else { UpdateKind::Animation };
            slots.insert((key, kind));
            outbox.push((key, kind), vec![id]);
            prop_assert!(outbox.len() <= max_pending);
            prop_assert!(outbox.len() <= slots.len());
        }
    }
}

// ============================================================================
// Classification
// ============================================================================

proptest! {
    #[test]
    fn classifying_arbitrary_names_never_panics(name in ".{0,40}") {
        let _ = Classifier::default().classify(&name);
        let _ = instance_id(&name, "Crawler");
    }

    #[test]
    fn numbered_names_keep_their_instance_id(id in any::<u8>(), parenthesized in any::<bool>()) {
        let name = if parenthesized {
            format!("Zombie Runner ({id})")
        } else {
            format!("Zombie Runner {id}")
        };
        prop_assert_eq!(
            Classifier::default().classify(&name),
            Some(EntityKey::new(EntityType::WanderingHusk, InstanceId::new(id)))
        );
    }
}
