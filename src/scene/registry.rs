//! Entity registry and inbound dispatch.
//!
//! The registry maps [`EntityKey`]s to live entities for one scene. It is
//! created empty, filled as the engine enables objects, and cleared when the
//! scene unloads. It also holds the scene-entry batch the host sent, so that an
//! entity enabling after the batch arrived is initialized exactly as if it had
//! been there first.

use std::collections::BTreeMap;

use tracing::{debug, trace};

use crate::catalog::{Catalog, Classifier};
use crate::entity::{
    BehaviorGraph, EntityKey, EntitySnapshot, EntityType, NetworkedEntity, Outbox, SyncEntity,
};
use crate::network::wire::EntityUpdate;
use crate::report_violation_to;
use crate::scene::Role;
use crate::telemetry::{ObserverHandle, ViolationKind, ViolationSeverity};

/// Scene-scoped table of networked entities.
pub struct EntityRegistry {
    catalog: Catalog,
    classifier: Classifier,
    outbox: Outbox,
    observer: Option<ObserverHandle>,
    entities: BTreeMap<EntityKey, Box<dyn SyncEntity>>,
    cache: BTreeMap<EntityKey, EntityUpdate>,
    role: Role,
    deactivate_unmatched: bool,
}

impl std::fmt::Debug for EntityRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Destructure to ensure all fields are included when new fields are added.
        let Self {
            catalog,
            classifier: _,
            outbox,
            observer,
            entities,
            cache,
            role,
            deactivate_unmatched,
        } = self;

        f.debug_struct("EntityRegistry")
            .field("profiles", &catalog.len())
            .field("outbox", &outbox.len())
            .field("observer", &observer.is_some())
            .field("entities", &entities.keys())
            .field("cache", &cache.keys())
            .field("role", role)
            .field("deactivate_unmatched", deactivate_unmatched)
            .finish()
    }
}

impl EntityRegistry {
    /// Creates an empty registry building entities from `catalog`. Entities push
    /// their outbound updates to `outbox`.
    #[must_use]
    pub fn new(catalog: Catalog, outbox: Outbox) -> Self {
        Self {
            catalog,
            classifier: Classifier::default(),
            outbox,
            observer: None,
            entities: BTreeMap::new(),
            cache: BTreeMap::new(),
            role: Role::Unknown,
            deactivate_unmatched: false,
        }
    }

    /// Replaces the name classifier.
    #[must_use]
    pub fn with_classifier(mut self, classifier: Classifier) -> Self {
        self.classifier = classifier;
        self
    }

    /// Routes diagnostics (the registry's and its entities') to `observer`.
    #[must_use]
    pub fn with_observer(mut self, observer: Option<ObserverHandle>) -> Self {
        self.set_observer(observer);
        self
    }

    /// Routes diagnostics to `observer`. Entities registered before this call
    /// keep their previous observer.
    pub fn set_observer(&mut self, observer: Option<ObserverHandle>) {
        self.observer = observer;
    }

    /// Whether client entities without a counterpart in the scene-entry batch
    /// are deactivated.
    pub fn set_deactivate_unmatched(&mut self, deactivate: bool) {
        self.deactivate_unmatched = deactivate;
    }

    /// The role the registry initializes new entities with.
    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    /// Classifies `raw_name` and, if it names a networked type, registers a
    /// [`NetworkedEntity`] wrapping `graph`. Returns `None` for objects that are
    /// not networked.
    ///
    /// See [`register`](Self::register) for what happens once the entity exists.
    pub fn register_on_enable(
        &mut self,
        raw_name: &str,
        graph: Box<dyn BehaviorGraph>,
    ) -> Option<EntityKey> {
        let key = self.classifier.classify(raw_name)?;
        let Some(profile) = self.catalog.get(key.entity_type) else {
            trace!(name = raw_name, entity = %key, "No profile; not networked");
            return None;
        };
        let entity = NetworkedEntity::new(key, profile, graph, self.outbox.clone())
            .with_observer(self.observer.clone());
        debug!(name = raw_name, entity = %key, "Registered entity");
        self.register(Box::new(entity));
        Some(key)
    }

    /// Inserts `entity`, destroying any previous entity with the same key.
    ///
    /// If the scene role is already known the entity is initialized right away:
    /// as host, or as client from its cached scene-entry update. This makes the
    /// outcome independent of whether the engine enables the object before or
    /// after the scene status arrives.
    pub fn register(&mut self, entity: Box<dyn SyncEntity>) {
        let key = entity.key();
        if let Some(mut previous) = self.entities.insert(key, entity) {
            debug!(entity = %key, "Replacing previously registered entity");
            previous.destroy();
        }
        match self.role {
            Role::Unknown => {},
            Role::Host => {
                if let Some(entity) = self.entities.get_mut(&key) {
                    entity.initialize_as_scene_host();
                }
            },
            Role::Client => self.initialize_client(key),
        }
    }

    /// Routes an inbound update to its entity, applying position, scale,
    /// animation and state in that order. Returns whether an entity received it.
    ///
    /// Updates for [`EntityType::None`] or for entities that do not exist are
    /// dropped with a [`ViolationKind::MissingEntity`] diagnostic. They are not
    /// queued: an entity that enables later initializes from the scene-entry
    /// batch and the next updates.
    pub fn dispatch_update(&mut self, update: &EntityUpdate) -> bool {
        let key = update.key;
        if key.entity_type == EntityType::None {
            report_violation_to!(
                self.observer,
                key,
                ViolationSeverity::Warning,
                ViolationKind::MissingEntity,
                "Dropping update for placeholder entity type"
            );
            return false;
        }
        let Some(entity) = self.entities.get_mut(&key) else {
            report_violation_to!(
                self.observer,
                key,
                ViolationSeverity::Warning,
                ViolationKind::MissingEntity,
                "Dropping update for unregistered entity ({:?})",
                update.kinds()
            );
            return false;
        };
        trace!(entity = %key, kinds = ?update.kinds(), "Dispatching update");
        apply_update(entity.as_mut(), update);
        true
    }

    /// Enters the scene as a client: stores `batch` and initializes every
    /// registered entity from it.
    pub fn enter_scene_as_client(&mut self, batch: Vec<EntityUpdate>) {
        self.role = Role::Client;
        self.cache.clear();
        for update in batch {
            self.cache
                .entry(update.key)
                .and_modify(|cached| cached.merge_from(&update))
                .or_insert(update);
        }
        debug!(cached = self.cache.len(), entities = self.entities.len(), "Entering scene as client");

        let keys: Vec<EntityKey> = self.entities.keys().copied().collect();
        for key in keys {
            self.initialize_client(key);
        }
    }

    /// Enters the scene as host: initializes every registered entity as host.
    pub fn enter_scene_as_host(&mut self) {
        self.role = Role::Host;
        self.cache.clear();
        debug!(entities = self.entities.len(), "Entering scene as host");
        for entity in self.entities.values_mut() {
            entity.initialize_as_scene_host();
        }
    }

    /// Takes over as host mid-scene: every entity resumes its behavior graph.
    pub fn switch_to_scene_host(&mut self) {
        self.role = Role::Host;
        self.cache.clear();
        debug!(entities = self.entities.len(), "Switching to scene host");
        for entity in self.entities.values_mut() {
            entity.switch_to_scene_host();
        }
    }

    /// Destroys every entity and forgets the scene-entry batch and role.
    pub fn clear(&mut self) {
        for entity in self.entities.values_mut() {
            entity.destroy();
        }
        self.entities.clear();
        self.cache.clear();
        self.role = Role::Unknown;
    }

    /// The entity registered under `key`.
    #[must_use]
    pub fn get(&self, key: &EntityKey) -> Option<&(dyn SyncEntity + 'static)> {
        self.entities.get(key).map(Box::as_ref)
    }

    /// The entity registered under `key`, for engine callbacks such as
    /// [`SyncEntity::send_position`].
    pub fn get_mut(&mut self, key: &EntityKey) -> Option<&mut (dyn SyncEntity + 'static)> {
        self.entities.get_mut(key).map(Box::as_mut)
    }

    /// Whether an entity is registered under `key`.
    #[must_use]
    pub fn contains(&self, key: &EntityKey) -> bool {
        self.entities.contains_key(key)
    }

    /// The cached scene-entry update for `key`.
    #[must_use]
    pub fn cached(&self, key: &EntityKey) -> Option<&EntityUpdate> {
        self.cache.get(key)
    }

    /// Registered keys in order.
    pub fn keys(&self) -> impl Iterator<Item = EntityKey> + '_ {
        self.entities.keys().copied()
    }

    /// Snapshots of every registered entity, in key order.
    #[must_use]
    pub fn snapshots(&self) -> Vec<EntitySnapshot> {
        self.entities.values().map(|entity| entity.snapshot()).collect()
    }

    /// Number of registered entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Whether no entity is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    fn initialize_client(&mut self, key: EntityKey) {
        let Some(entity) = self.entities.get_mut(&key) else {
            return;
        };
        match self.cache.get(&key) {
            Some(cached) => {
                entity.initialize_as_scene_client(cached.state);
                if let Some(position) = cached.position {
                    entity.update_position(position);
                }
                if let Some(flipped) = cached.scale {
                    entity.update_scale(flipped);
                }
            },
            None => {
                entity.initialize_as_scene_client(None);
                report_violation_to!(
                    self.observer,
                    key,
                    ViolationSeverity::Warning,
                    ViolationKind::MissingEntity,
                    "Scene host has no counterpart for this entity{}",
                    if self.deactivate_unmatched {
                        "; deactivating"
                    } else {
                        ""
                    }
                );
                if self.deactivate_unmatched {
                    entity.deactivate();
                }
            },
        }
    }
}

fn apply_update(entity: &mut dyn SyncEntity, update: &EntityUpdate) {
    if let Some(position) = update.position {
        entity.update_position(position);
    }
    if let Some(flipped) = update.scale {
        entity.update_scale(flipped);
    }
    if let Some(animation) = &update.animation {
        entity.update_animation(animation.index, &animation.info);
    }
    if let Some(state) = update.state {
        entity.update_state(state);
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
    use std::sync::Arc;

    use super::*;
    use crate::entity::{AuthorityState, InstanceId, NodeHook};
    use crate::network::wire::Vec2;
    use crate::telemetry::CollectingObserver;

    struct NullGraph;

    impl BehaviorGraph for NullGraph {
        fn set_driver_enabled(&mut self, _enabled: bool) {}
        fn force_node(&mut self, _node: &str) {}
        fn execute_actions(&mut self, _node: &str, _actions: &[u8]) {}
        fn play_clip(&mut self, _clip: &str) {}
        fn set_active(&mut self, _active: bool) {}
        fn set_position(&mut self, _position: Vec2) {}
        fn set_scale(&mut self, _flipped: bool) {}
        fn insert_hook(&mut self, _node: &str, _hook: NodeHook) {}
    }

    fn registry() -> (EntityRegistry, Arc<CollectingObserver>) {
        let collector = Arc::new(CollectingObserver::new());
        let observer: ObserverHandle = collector.clone();
        let registry =
            EntityRegistry::new(Catalog::builtin().clone(), Outbox::new()).with_observer(Some(observer));
        (registry, collector)
    }

    fn key(entity_type: EntityType, id: u8) -> EntityKey {
        EntityKey::new(entity_type, InstanceId::new(id))
    }

    #[test]
    fn unknown_names_are_not_registered() {
        let (mut registry, collector) = registry();
        assert_eq!(registry.register_on_enable("Knight", Box::new(NullGraph)), None);
        assert!(registry.is_empty());
        assert!(collector.is_empty());
    }

    #[test]
    fn entities_stay_uninitialized_until_role_is_known() {
        let (mut registry, _) = registry();
        let k = registry
            .register_on_enable("Crawler 1", Box::new(NullGraph))
            .unwrap();
        assert_eq!(k, key(EntityType::Crawlid, 1));
        assert_eq!(
            registry.get(&k).unwrap().authority(),
            AuthorityState::Uninitialized
        );
    }

    #[test]
    fn late_enable_as_host_initializes_immediately() {
        let (mut registry, _) = registry();
        registry.enter_scene_as_host();
        let k = registry
            .register_on_enable("Roller 2", Box::new(NullGraph))
            .unwrap();
        assert!(registry.get(&k).unwrap().authority().is_host());
    }

    #[test]
    fn late_enable_replays_dead_state_from_cache() {
        let (mut registry, _) = registry();
        let baldur = key(EntityType::Baldur, 2);
        registry.enter_scene_as_client(vec![EntityUpdate::new(baldur)
            .with_state(1)
            .with_position(Vec2::new(5.0, 6.0))]);

        registry.register_on_enable("Roller 2", Box::new(NullGraph));

        let snapshot = registry.get(&baldur).unwrap().snapshot();
        assert!(!snapshot.active);
        assert_eq!(snapshot.last_state, Some(1));
        assert_eq!(snapshot.position, Some(Vec2::new(5.0, 6.0)));
    }

    #[test]
    fn unmatched_entities_are_reported_and_optionally_deactivated() {
        let (mut registry, collector) = registry();
        registry.set_deactivate_unmatched(true);
        let k = registry
            .register_on_enable("Crawler 4", Box::new(NullGraph))
            .unwrap();

        registry.enter_scene_as_client(Vec::new());

        let snapshot = registry.get(&k).unwrap().snapshot();
        assert!(snapshot.authority.is_client());
        assert!(!snapshot.active);
        assert_eq!(collector.violations_of_kind(ViolationKind::MissingEntity).len(), 1);
    }

    #[test]
    fn dispatch_to_none_or_missing_is_dropped() {
        let (mut registry, collector) = registry();
        registry.enter_scene_as_client(Vec::new());

        assert!(!registry.dispatch_update(&EntityUpdate::new(key(EntityType::None, 0)).with_state(1)));
        assert!(!registry.dispatch_update(&EntityUpdate::new(key(EntityType::Goam, 3)).with_state(1)));
        assert_eq!(collector.violations_of_kind(ViolationKind::MissingEntity).len(), 2);
    }

    #[test]
    fn dispatch_applies_fields_to_client() {
        let (mut registry, _) = registry();
        let k = registry
            .register_on_enable("Buzzer", Box::new(NullGraph))
            .unwrap();
        registry.enter_scene_as_client(vec![EntityUpdate::new(k).with_state(0)]);

        let update = EntityUpdate::new(k)
            .with_position(Vec2::new(1.0, 1.0))
            .with_scale(false)
            .with_animation(2, &[]);
        assert!(registry.dispatch_update(&update));

        let snapshot = registry.get(&k).unwrap().snapshot();
        assert_eq!(snapshot.last_animation, Some(2));
        assert_eq!(snapshot.scale, Some(false));
    }

    #[test]
    fn replaying_the_batch_twice_matches_once() {
        let (mut once, _) = registry();
        let (mut twice, _) = registry();
        let k = key(EntityType::HuskGuard, 1);
        let batch = vec![
            EntityUpdate::new(k).with_state(0),
            EntityUpdate::new(k).with_position(Vec2::new(2.0, 3.0)).with_scale(true),
        ];

        for registry in [&mut once, &mut twice] {
            registry.register_on_enable("Zombie Guard 1", Box::new(NullGraph));
        }
        once.enter_scene_as_client(batch.clone());
        twice.enter_scene_as_client(batch.clone());
        twice.enter_scene_as_client(batch);

        assert_eq!(once.snapshots(), twice.snapshots());
    }

    #[test]
    fn re_registration_replaces_the_previous_entity() {
        let (mut registry, _) = registry();
        registry.enter_scene_as_host();
        registry.register_on_enable("Crawler", Box::new(NullGraph));
        registry.register_on_enable("Crawler (0)", Box::new(NullGraph));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn switch_and_clear() {
        let (mut registry, _) = registry();
        let k = registry
            .register_on_enable("Crawler 1", Box::new(NullGraph))
            .unwrap();
        registry.enter_scene_as_client(Vec::new());
        registry.switch_to_scene_host();
        assert!(registry.get(&k).unwrap().authority().is_host());
        assert_eq!(registry.role(), Role::Host);

        registry.clear();
        assert!(registry.is_empty());
        assert_eq!(registry.role(), Role::Unknown);
    }
}
