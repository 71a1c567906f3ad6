//! Scene lifecycle orchestration.
//!
//! ```text
//!            scene_loaded              EnterScene { scene_host: true }
//!   Idle ─────────────────▶ AwaitingStatus ───────────────────────────▶ Host
//!    ▲                           │                                       ▲
//!    │ scene_unloaded            │ EnterScene { scene_host: false }      │ HostLeft
//!    │ (from any phase)          ▼                                       │
//!    └─────────────────────── Client ────────────────────────────────────┘
//! ```

use std::sync::Arc;

use tracing::{debug, info, trace};

use crate::catalog::Catalog;
use crate::config::SyncConfig;
use crate::entity::{BehaviorGraph, EntityKey, Outbox};
use crate::error::SyncResult;
use crate::network::wire::EntityUpdate;
use crate::scene::{EntityRegistry, HostSnapshot, Inbox, SceneEvent};
use crate::telemetry::{
    report_to_observer, ObserverHandle, SyncViolation, ViolationKind, ViolationSeverity,
};

/// Where the controller is in the scene lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScenePhase {
    /// No scene is loaded.
    #[default]
    Idle,
    /// A scene is loaded but the server has not assigned a role yet. Entities
    /// stay uninitialized and inbound updates are dropped.
    AwaitingStatus,
    /// This side is the scene host.
    Host,
    /// This side mirrors the scene host.
    Client,
}

impl ScenePhase {
    /// Short label for logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::AwaitingStatus => "awaiting_status",
            Self::Host => "host",
            Self::Client => "client",
        }
    }
}

/// Owns the scene-scoped state and sequences every change to it.
///
/// All methods take `&mut self`: the controller lives on the engine's main
/// thread and network events reach it through an [`Inbox`]. A host hand-off
/// therefore completes before the next event is dispatched.
pub struct SceneController {
    registry: EntityRegistry,
    outbox: Outbox,
    snapshot: HostSnapshot,
    observer: Option<ObserverHandle>,
    phase: ScenePhase,
    scene: Option<String>,
    sync_enabled: bool,
    next_sync_enabled: bool,
}

impl std::fmt::Debug for SceneController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Destructure to ensure all fields are included when new fields are added.
        let Self {
            registry,
            outbox,
            snapshot,
            observer,
            phase,
            scene,
            sync_enabled,
            next_sync_enabled,
        } = self;

        f.debug_struct("SceneController")
            .field("registry", registry)
            .field("outbox", &outbox.len())
            .field("snapshot", &snapshot.len())
            .field("observer", &observer.is_some())
            .field("phase", phase)
            .field("scene", scene)
            .field("sync_enabled", sync_enabled)
            .field("next_sync_enabled", next_sync_enabled)
            .finish()
    }
}

impl SceneController {
    /// Creates a controller using the built-in entity catalog.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidConfig`] if `config` does not validate.
    ///
    /// [`SyncError::InvalidConfig`]: crate::SyncError::InvalidConfig
    pub fn new(config: &SyncConfig) -> SyncResult<Self> {
        Self::with_catalog(config, Catalog::builtin().clone())
    }

    /// Creates a controller building entities from `catalog`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidConfig`] if `config` does not validate.
    ///
    /// [`SyncError::InvalidConfig`]: crate::SyncError::InvalidConfig
    pub fn with_catalog(config: &SyncConfig, catalog: Catalog) -> SyncResult<Self> {
        config.validate()?;
        let outbox = Outbox::new();
        let mut registry = EntityRegistry::new(catalog, outbox.clone());
        registry.set_deactivate_unmatched(config.deactivate_unmatched);
        Ok(Self {
            registry,
            outbox,
            snapshot: HostSnapshot::new(),
            observer: None,
            phase: ScenePhase::Idle,
            scene: None,
            sync_enabled: config.entity_sync_enabled,
            next_sync_enabled: config.entity_sync_enabled,
        })
    }

    /// Routes diagnostics from the controller, registry and entities to
    /// `observer`. Entities registered before this call keep their previous
    /// observer.
    #[must_use]
    pub fn with_observer(mut self, observer: ObserverHandle) -> Self {
        self.registry.set_observer(Some(Arc::clone(&observer)));
        self.observer = Some(observer);
        self
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> ScenePhase {
        self.phase
    }

    /// Name of the loaded scene.
    #[must_use]
    pub fn scene(&self) -> Option<&str> {
        self.scene.as_deref()
    }

    /// Whether entities are synchronized in the current scene.
    #[must_use]
    pub fn is_entity_sync_enabled(&self) -> bool {
        self.sync_enabled
    }

    /// Turns entity synchronization on or off. Takes effect at the next scene
    /// load; the current scene keeps its setting.
    pub fn set_entity_sync_enabled(&mut self, enabled: bool) {
        debug!(enabled, "Entity sync change queued for next scene load");
        self.next_sync_enabled = enabled;
    }

    /// The registry of the current scene.
    #[must_use]
    pub fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    /// Mutable access to the registry, for engine callbacks on entities.
    pub fn registry_mut(&mut self) -> &mut EntityRegistry {
        &mut self.registry
    }

    /// The host's merged view of what it broadcast this scene.
    #[must_use]
    pub fn host_snapshot(&self) -> &HostSnapshot {
        &self.snapshot
    }

    /// The batch to send a client joining this host's scene.
    #[must_use]
    pub fn scene_entry_batch(&self) -> Vec<EntityUpdate> {
        self.snapshot.batch()
    }

    /// Engine notification: a scene finished loading. A scene still loaded
    /// is unloaded first.
    pub fn scene_loaded(&mut self, name: &str) {
        if self.phase != ScenePhase::Idle {
            debug!(previous = ?self.scene, "Scene loaded without unload; unloading previous");
            self.scene_unloaded();
        }
        self.sync_enabled = self.next_sync_enabled;
        self.scene = Some(name.to_owned());
        self.phase = ScenePhase::AwaitingStatus;
        info!(scene = name, entity_sync = self.sync_enabled, "Scene loaded");
    }

    /// Engine notification: the scene is unloading. Destroys every entity and
    /// drops the scene-entry batch, the host snapshot and queued outbound
    /// updates.
    pub fn scene_unloaded(&mut self) {
        if let Some(scene) = &self.scene {
            info!(scene = %scene, entities = self.registry.len(), "Scene unloaded");
        }
        self.registry.clear();
        self.outbox.clear();
        self.snapshot.clear();
        self.scene = None;
        self.phase = ScenePhase::Idle;
    }

    /// Engine notification: an object was enabled. Returns its key if it is a
    /// networked entity.
    pub fn entity_enabled(
        &mut self,
        raw_name: &str,
        graph: Box<dyn BehaviorGraph>,
    ) -> Option<EntityKey> {
        if self.phase == ScenePhase::Idle || !self.sync_enabled {
            trace!(name = raw_name, phase = self.phase.as_str(), "Ignoring enabled object");
            return None;
        }
        self.registry.register_on_enable(raw_name, graph)
    }

    /// Applies one network event.
    pub fn handle_event(&mut self, event: SceneEvent) {
        match event {
            SceneEvent::EnterScene { scene_host, batch } => self.enter_scene(scene_host, batch),
            SceneEvent::HostLeft => self.host_left(),
            SceneEvent::Update(update) => self.dispatch(&update),
        }
    }

    /// Drains `inbox` and applies every event in arrival order. Returns the
    /// number of events applied.
    pub fn pump(&mut self, inbox: &Inbox) -> usize {
        let events = inbox.drain();
        let count = events.len();
        for event in events {
            self.handle_event(event);
        }
        count
    }

    /// Takes the updates entities emitted since the last call, for
    /// [`SyncProtocol::send_update`]. On the scene host they are also merged
    /// into the [`HostSnapshot`].
    ///
    /// [`SyncProtocol::send_update`]: crate::SyncProtocol::send_update
    #[must_use]
    pub fn drain_outbound(&mut self) -> Vec<EntityUpdate> {
        let updates = self.outbox.drain();
        if self.phase == ScenePhase::Host {
            for update in &updates {
                self.snapshot.record(update);
            }
        }
        updates
    }

    fn enter_scene(&mut self, scene_host: bool, batch: Vec<EntityUpdate>) {
        if self.phase == ScenePhase::Idle {
            self.report(SyncViolation::new(
                ViolationSeverity::Warning,
                ViolationKind::SceneTransition,
                "Scene status received with no scene loaded",
                concat!(file!(), ":", line!()),
            ));
            return;
        }
        if self.phase == ScenePhase::Host {
            self.report(SyncViolation::new(
                ViolationSeverity::Warning,
                ViolationKind::SceneTransition,
                "Scene status received while already scene host; ignoring",
                concat!(file!(), ":", line!()),
            ));
            return;
        }
        if scene_host && self.phase == ScenePhase::Client {
            debug!(scene = ?self.scene, "Scene status promotes client to host");
            self.host_left();
            return;
        }
        if scene_host {
            info!(scene = ?self.scene, "Entering scene as host");
            self.phase = ScenePhase::Host;
            self.registry.enter_scene_as_host();
        } else {
            info!(scene = ?self.scene, cached = batch.len(), "Entering scene as client");
            self.phase = ScenePhase::Client;
            self.registry.enter_scene_as_client(batch);
        }
    }

    fn host_left(&mut self) {
        match self.phase {
            ScenePhase::Client => {
                info!(scene = ?self.scene, "Scene host left; taking over");
                self.registry.switch_to_scene_host();
                self.phase = ScenePhase::Host;
                self.seed_snapshot();
            },
            ScenePhase::AwaitingStatus => {
                info!(scene = ?self.scene, "Scene host left before status; entering as host");
                self.phase = ScenePhase::Host;
                self.registry.enter_scene_as_host();
            },
            ScenePhase::Host | ScenePhase::Idle => {
                trace!(phase = self.phase.as_str(), "Ignoring host transfer");
            },
        }
    }

    /// Fills the snapshot with what this side mirrored as a client, so a client
    /// joining after the hand-off learns about entities that died before it.
    fn seed_snapshot(&mut self) {
        for entity in self.registry.snapshots() {
            let mut update = EntityUpdate::new(entity.key);
            if let Some(position) = entity.position {
                update = update.with_position(position);
            }
            if let Some(flipped) = entity.scale {
                update = update.with_scale(flipped);
            }
            if let Some(state) = entity.last_state {
                update = update.with_state(state);
            }
            if !update.is_empty() {
                self.snapshot.record(&update);
            }
        }
        debug!(entries = self.snapshot.len(), "Seeded host snapshot after hand-off");
    }

    fn dispatch(&mut self, update: &EntityUpdate) {
        if !self.sync_enabled {
            trace!(key = %update.key, "Entity sync disabled; ignoring update");
            return;
        }
        let violation = match self.phase {
            ScenePhase::Client => {
                self.registry.dispatch_update(update);
                return;
            },
            ScenePhase::Host => SyncViolation::new(
                ViolationSeverity::Warning,
                ViolationKind::Authority,
                "Dropping update: this side is scene host",
                concat!(file!(), ":", line!()),
            ),
            ScenePhase::Idle | ScenePhase::AwaitingStatus => SyncViolation::new(
                ViolationSeverity::Warning,
                ViolationKind::SceneTransition,
                format!(
                    "Dropping update: scene status not received ({})",
                    self.phase.as_str()
                ),
                concat!(file!(), ":", line!()),
            ),
        };
        self.report(violation.with_entity(update.key));
    }

    fn report(&self, violation: SyncViolation) {
        report_to_observer(self.observer.as_ref(), &violation);
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
    use crate::entity::{EntityType, InstanceId, NodeHook};
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

    fn controller() -> (SceneController, Arc<CollectingObserver>) {
        let collector = Arc::new(CollectingObserver::new());
        let controller = SceneController::new(&SyncConfig::default())
            .unwrap()
            .with_observer(collector.clone());
        (controller, collector)
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = SyncConfig {
            max_packet_updates: 0,
            ..SyncConfig::default()
        };
        assert!(SceneController::new(&config).is_err());
    }

    #[test]
    fn phases_follow_scene_lifecycle() {
        let (mut controller, _) = controller();
        assert_eq!(controller.phase(), ScenePhase::Idle);

        controller.scene_loaded("Crossroads_01");
        assert_eq!(controller.phase(), ScenePhase::AwaitingStatus);
        assert_eq!(controller.scene(), Some("Crossroads_01"));

        controller.handle_event(SceneEvent::EnterScene {
            scene_host: false,
            batch: Vec::new(),
        });
        assert_eq!(controller.phase(), ScenePhase::Client);

        controller.handle_event(SceneEvent::HostLeft);
        assert_eq!(controller.phase(), ScenePhase::Host);

        controller.scene_unloaded();
        assert_eq!(controller.phase(), ScenePhase::Idle);
        assert_eq!(controller.scene(), None);
    }

    #[test]
    fn updates_before_status_are_dropped() {
        let (mut controller, collector) = controller();
        controller.scene_loaded("Crossroads_01");
        let key = controller
            .entity_enabled("Crawler 1", Box::new(NullGraph))
            .unwrap();

        controller.handle_event(SceneEvent::Update(EntityUpdate::new(key).with_state(1)));

        let entity = controller.registry().get(&key).unwrap();
        assert!(entity.snapshot().active);
        assert_eq!(entity.snapshot().last_state, None);
        assert!(collector.has_violation(ViolationKind::SceneTransition));
    }

    #[test]
    fn objects_enabled_outside_a_scene_are_ignored() {
        let (mut controller, _) = controller();
        assert_eq!(controller.entity_enabled("Crawler 1", Box::new(NullGraph)), None);
    }

    #[test]
    fn sync_toggle_applies_at_next_scene_load() {
        let (mut controller, _) = controller();
        controller.scene_loaded("A");
        controller.set_entity_sync_enabled(false);
        assert!(controller.is_entity_sync_enabled());
        assert!(controller.entity_enabled("Crawler", Box::new(NullGraph)).is_some());

        controller.scene_loaded("B");
        assert!(!controller.is_entity_sync_enabled());
        assert!(controller.registry().is_empty());
        assert_eq!(controller.entity_enabled("Crawler", Box::new(NullGraph)), None);
    }

    #[test]
    fn host_records_outbound_updates_in_snapshot() {
        let (mut controller, _) = controller();
        controller.scene_loaded("A");
        let key = controller
            .entity_enabled("Roller 2", Box::new(NullGraph))
            .unwrap();
        controller.handle_event(SceneEvent::EnterScene {
            scene_host: true,
            batch: Vec::new(),
        });

        controller
            .registry_mut()
            .get_mut(&key)
            .unwrap()
            .send_position(Vec2::new(4.0, 2.0));
        let outbound = controller.drain_outbound();
        assert_eq!(outbound.len(), 2);

        let batch = controller.scene_entry_batch();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].key, EntityKey::new(EntityType::Baldur, InstanceId::new(2)));
        assert_eq!(batch[0].state, Some(0));
        assert_eq!(batch[0].position, Some(Vec2::new(4.0, 2.0)));

        controller.scene_unloaded();
        assert!(controller.host_snapshot().is_empty());
    }

    #[test]
    fn inbound_update_on_host_is_reported() {
        let (mut controller, collector) = controller();
        controller.scene_loaded("A");
        controller.handle_event(SceneEvent::EnterScene {
            scene_host: true,
            batch: Vec::new(),
        });
        let key = EntityKey::new(EntityType::Crawlid, InstanceId::new(0));
        controller.handle_event(SceneEvent::Update(EntityUpdate::new(key).with_state(1)));
        assert!(collector.has_violation(ViolationKind::Authority));
    }

    #[test]
    fn host_status_while_client_acts_as_hand_off() {
        let (mut controller, collector) = controller();
        controller.scene_loaded("Crossroads_01");
        controller.handle_event(SceneEvent::EnterScene {
            scene_host: false,
            batch: Vec::new(),
        });

        controller.handle_event(SceneEvent::EnterScene {
            scene_host: true,
            batch: Vec::new(),
        });

        assert_eq!(controller.phase(), ScenePhase::Host);
        assert!(!collector.has_violation(ViolationKind::SceneTransition));
    }

    #[test]
    fn hand_off_seeds_snapshot_with_mirrored_state() {
        let (mut controller, _) = controller();
        controller.scene_loaded("Crossroads_01");
        let key = controller
            .entity_enabled("Roller 2", Box::new(NullGraph))
            .unwrap();
        controller.handle_event(SceneEvent::EnterScene {
            scene_host: false,
            batch: vec![EntityUpdate::new(key).with_state(1)],
        });
        assert!(controller.host_snapshot().is_empty());

        controller.handle_event(SceneEvent::HostLeft);
        let _ = controller.drain_outbound();

        let batch = controller.scene_entry_batch();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].key, key);
        assert_eq!(batch[0].state, Some(1));
    }

    #[test]
    fn updates_are_ignored_while_sync_is_disabled() {
        let config = SyncConfig {
            entity_sync_enabled: false,
            ..SyncConfig::default()
        };
        let collector = Arc::new(CollectingObserver::new());
        let mut controller = SceneController::new(&config)
            .unwrap()
            .with_observer(collector.clone());
        controller.scene_loaded("Crossroads_01");
        controller.handle_event(SceneEvent::EnterScene {
            scene_host: false,
            batch: Vec::new(),
        });

        let key = EntityKey::new(EntityType::Crawlid, InstanceId::new(0));
        controller.handle_event(SceneEvent::Update(EntityUpdate::new(key).with_state(1)));

        assert!(controller.registry().is_empty());
        assert!(collector.is_empty(), "{:?}", collector.violations());
    }

    #[test]
    fn debug_lists_phase_and_observer() {
        let (mut controller, _) = controller();
        controller.scene_loaded("Crossroads_01");
        let debug = format!("{controller:?}");
        assert!(debug.contains("phase: AwaitingStatus"), "{debug}");
        assert!(debug.contains("observer: true"), "{debug}");
    }

    #[test]
    fn status_without_scene_is_reported() {
        let (mut controller, collector) = controller();
        controller.handle_event(SceneEvent::EnterScene {
            scene_host: true,
            batch: Vec::new(),
        });
        assert_eq!(controller.phase(), ScenePhase::Idle);
        assert!(collector.has_violation(ViolationKind::SceneTransition));
    }
}
