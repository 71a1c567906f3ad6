//! The scene host's merged record of what it broadcast.

use std::collections::BTreeMap;

use crate::entity::EntityKey;
use crate::network::wire::EntityUpdate;

/// The scene host's view of every entity's latest fields, merged from the
/// updates it broadcast. Sent as the scene-entry batch to joining clients.
#[derive(Debug, Clone, Default)]
pub struct HostSnapshot {
    latest: BTreeMap<EntityKey, EntityUpdate>,
}

impl HostSnapshot {
    /// Creates an empty snapshot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges `update` into the entity's entry.
    pub fn record(&mut self, update: &EntityUpdate) {
        self.latest
            .entry(update.key)
            .and_modify(|entry| entry.merge_from(update))
            .or_insert_with(|| update.clone());
    }

    /// The merged entry for `key`.
    #[must_use]
    pub fn get(&self, key: &EntityKey) -> Option<&EntityUpdate> {
        self.latest.get(key)
    }

    /// Every entry, in key order, ready for [`wire::encode_batch`].
    ///
    /// [`wire::encode_batch`]: crate::network::wire::encode_batch
    #[must_use]
    pub fn batch(&self) -> Vec<EntityUpdate> {
        self.latest.values().cloned().collect()
    }

    /// Number of entities with an entry.
    #[must_use]
    pub fn len(&self) -> usize {
        self.latest.len()
    }

    /// Whether no entity has an entry.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.latest.is_empty()
    }

    /// Drops every entry.
    pub fn clear(&mut self) {
        self.latest.clear();
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

    #[test]
    fn record_merges_fields_per_entity() {
        let a = EntityKey::new(EntityType::Baldur, InstanceId::new(2));
        let b = EntityKey::new(EntityType::Crawlid, InstanceId::new(0));
        let mut snapshot = HostSnapshot::new();

        snapshot.record(&EntityUpdate::new(a).with_state(0));
        snapshot.record(&EntityUpdate::new(a).with_position(Vec2::new(3.0, 4.0)));
        snapshot.record(&EntityUpdate::new(b).with_scale(true));
        snapshot.record(&EntityUpdate::new(a).with_state(1));

        assert_eq!(snapshot.len(), 2);
        let merged = snapshot.get(&a).unwrap();
        assert_eq!(merged.state, Some(1));
        assert_eq!(merged.position, Some(Vec2::new(3.0, 4.0)));

        let batch = snapshot.batch();
        assert_eq!(batch[0].key, b);
        assert_eq!(batch[1].key, a);

        snapshot.clear();
        assert!(snapshot.is_empty());
    }
}
