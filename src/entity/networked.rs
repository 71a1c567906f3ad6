//! The catalog-driven [`SyncEntity`](super::SyncEntity) implementation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, trace};

use crate::catalog::EntityProfile;
use crate::entity::{
    AuthorityState, BehaviorGraph, EntityKey, EntitySnapshot, Outbox, SyncEntity,
};
use crate::network::wire::{EntityUpdate, Vec2};
use crate::reconcile;
use crate::report_violation_to;
use crate::telemetry::{ObserverHandle, ViolationKind, ViolationSeverity};

/// A networked entity driven entirely by its [`EntityProfile`].
///
/// On construction, a hook is inserted at every node the profile lists. While
/// this side is the scene host, entering such a node pushes an animation update
/// to the shared [`Outbox`]; on a scene client the hooks stay silent because
/// the graph driver is disabled and replays bypass graph evaluation.
pub struct NetworkedEntity {
    key: EntityKey,
    profile: Arc<EntityProfile>,
    graph: Box<dyn BehaviorGraph>,
    authority: AuthorityState,
    is_host: Arc<AtomicBool>,
    outbox: Outbox,
    observer: Option<ObserverHandle>,
    last_animation: Option<u8>,
    last_state: Option<u8>,
    position: Option<Vec2>,
    scale: Option<bool>,
    active: bool,
}

impl std::fmt::Debug for NetworkedEntity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkedEntity")
            .field("key", &self.key)
            .field("graph", &self.profile.graph)
            .field("authority", &self.authority)
            .field("last_animation", &self.last_animation)
            .field("last_state", &self.last_state)
            .field("active", &self.active)
            .finish_non_exhaustive()
    }
}

impl NetworkedEntity {
    /// Wraps `graph` and installs the profile's node hooks on it.
    pub fn new(
        key: EntityKey,
        profile: Arc<EntityProfile>,
        mut graph: Box<dyn BehaviorGraph>,
        outbox: Outbox,
    ) -> Self {
        let is_host = Arc::new(AtomicBool::new(false));

        for hook in &profile.hooks {
            let is_host = Arc::clone(&is_host);
            let outbox = outbox.clone();
            let index = hook.index;
            let info = hook.info.clone();
            let emit_state = hook.emit_state;
            graph.insert_hook(
                &hook.node,
                Box::new(move || {
                    if !is_host.load(Ordering::Acquire) {
                        return;
                    }
                    let mut update = EntityUpdate::new(key).with_animation(index, &info);
                    if let Some(state) = emit_state {
                        update = update.with_state(state);
                    }
                    outbox.push(update);
                }),
            );
        }
        trace!(entity = %key, hooks = profile.hooks.len(), "Installed node hooks");

        Self {
            key,
            profile,
            graph,
            authority: AuthorityState::Uninitialized,
            is_host,
            outbox,
            observer: None,
            last_animation: None,
            last_state: None,
            position: None,
            scale: None,
            active: true,
        }
    }

    /// Routes diagnostics to `observer` instead of the tracing log.
    #[must_use]
    pub fn with_observer(mut self, observer: Option<ObserverHandle>) -> Self {
        self.observer = observer;
        self
    }

    /// The profile the entity was built from.
    #[must_use]
    pub fn profile(&self) -> &EntityProfile {
        &self.profile
    }

    fn reject_unless_host(&self, operation: &str) -> bool {
        if self.authority.is_host() {
            return false;
        }
        report_violation_to!(
            self.observer,
            self.key,
            ViolationSeverity::Warning,
            ViolationKind::Authority,
            "{} ignored: entity is {}",
            operation,
            self.authority.as_str()
        );
        true
    }

    fn reject_unless_client(&self, operation: &str) -> bool {
        if self.authority.is_client() {
            return false;
        }
        report_violation_to!(
            self.observer,
            self.key,
            ViolationSeverity::Warning,
            ViolationKind::Authority,
            "{} ignored: entity is {}",
            operation,
            self.authority.as_str()
        );
        true
    }

    fn take_authority(&mut self) {
        self.graph.set_driver_enabled(true);
        self.is_host.store(true, Ordering::Release);
        self.authority = AuthorityState::SceneHost;
    }
}

impl SyncEntity for NetworkedEntity {
    fn key(&self) -> EntityKey {
        self.key
    }

    fn authority(&self) -> AuthorityState {
        self.authority
    }

    fn initialize_as_scene_host(&mut self) {
        if self.authority != AuthorityState::Uninitialized {
            report_violation_to!(
                self.observer,
                self.key,
                ViolationSeverity::Warning,
                ViolationKind::Authority,
                "initialize_as_scene_host ignored: entity is already {}",
                self.authority.as_str()
            );
            return;
        }
        debug!(entity = %self.key, "Initializing as scene host");
        self.take_authority();
        self.send_state(self.profile.active_state);
    }

    fn initialize_as_scene_client(&mut self, state: Option<u8>) {
        if self.authority.is_host() {
            report_violation_to!(
                self.observer,
                self.key,
                ViolationSeverity::Warning,
                ViolationKind::Authority,
                "initialize_as_scene_client ignored: a scene host cannot become a client"
            );
            return;
        }
        debug!(entity = %self.key, ?state, "Initializing as scene client");
        self.graph.set_driver_enabled(false);
        self.is_host.store(false, Ordering::Release);
        self.authority = AuthorityState::SceneClient {
            last_known_state: state,
        };
        if let Some(state) = state {
            self.last_state = Some(state);
            if self.profile.is_dead_state(state) {
                self.deactivate();
            }
        }
    }

    fn switch_to_scene_host(&mut self) {
        match self.authority {
            AuthorityState::Uninitialized => self.initialize_as_scene_host(),
            AuthorityState::SceneHost => {
                trace!(entity = %self.key, "Already scene host");
            },
            AuthorityState::SceneClient { .. } => {
                debug!(entity = %self.key, last_animation = ?self.last_animation, "Taking over as scene host");
                self.take_authority();
                if self.active {
                    reconcile::resume(
                        self.graph.as_mut(),
                        &self.profile,
                        self.last_animation,
                        self.observer.as_ref(),
                        self.key,
                    );
                } else {
                    trace!(entity = %self.key, "Inactive entity keeps its graph idle");
                }
            },
        }
    }

    fn update_position(&mut self, position: Vec2) {
        if self.reject_unless_client("update_position") {
            return;
        }
        self.position = Some(position);
        self.graph.set_position(position);
    }

    fn update_scale(&mut self, flipped: bool) {
        if self.reject_unless_client("update_scale") {
            return;
        }
        self.scale = Some(flipped);
        self.graph.set_scale(flipped);
    }

    fn update_animation(&mut self, index: u8, info: &[u8]) {
        if self.reject_unless_client("update_animation") {
            return;
        }
        self.last_animation = Some(index);
        if !self.active {
            trace!(entity = %self.key, index, "Inactive entity skips replay");
            return;
        }
        reconcile::replay(self.graph.as_mut(), &self.profile, index, info, self.key);
    }

    fn update_state(&mut self, state: u8) {
        if self.reject_unless_client("update_state") {
            return;
        }
        self.last_state = Some(state);
        if self.profile.is_dead_state(state) {
            self.deactivate();
        }
    }

    fn deactivate(&mut self) {
        if self.active {
            debug!(entity = %self.key, "Deactivating");
            self.graph.set_active(false);
            self.active = false;
        }
    }

    fn destroy(&mut self) {
        trace!(entity = %self.key, "Destroying");
        self.is_host.store(false, Ordering::Release);
        self.graph.set_driver_enabled(false);
        self.authority = AuthorityState::Uninitialized;
    }

    fn on_clip_started(&mut self, clip: &str) {
        // Clients start the same clips while replaying.
        if !self.authority.is_host() {
            return;
        }
        if let Some(index) = self.profile.clip_index(clip) {
            self.send_animation(index, &[]);
        }
    }

    fn on_death(&mut self) {
        if !self.authority.is_host() {
            return;
        }
        if let Some(dead) = self.profile.dead_state {
            self.send_state(dead);
        }
    }

    fn send_position(&mut self, position: Vec2) {
        if self.reject_unless_host("send_position") {
            return;
        }
        self.position = Some(position);
        self.outbox.push(EntityUpdate::new(self.key).with_position(position));
    }

    fn send_scale(&mut self, flipped: bool) {
        if self.reject_unless_host("send_scale") {
            return;
        }
        self.scale = Some(flipped);
        self.outbox.push(EntityUpdate::new(self.key).with_scale(flipped));
    }

    fn send_animation(&mut self, index: u8, info: &[u8]) {
        if self.reject_unless_host("send_animation") {
            return;
        }
        self.last_animation = Some(index);
        self.outbox
            .push(EntityUpdate::new(self.key).with_animation(index, info));
    }

    fn send_state(&mut self, state: u8) {
        if self.reject_unless_host("send_state") {
            return;
        }
        self.last_state = Some(state);
        self.outbox.push(EntityUpdate::new(self.key).with_state(state));
    }

    fn snapshot(&self) -> EntitySnapshot {
        EntitySnapshot {
            key: self.key,
            authority: self.authority,
            last_animation: self.last_animation,
            last_state: self.last_state,
            position: self.position,
            scale: self.scale,
            active: self.active,
        }
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
    use std::collections::BTreeMap;

    use parking_lot::Mutex;

    use super::*;
    use crate::catalog::Catalog;
    use crate::entity::{EntityType, InstanceId, NodeHook};
    use crate::telemetry::CollectingObserver;

    #[derive(Default)]
    struct GraphLog {
        calls: Vec<String>,
        hooks: BTreeMap<String, Vec<NodeHook>>,
    }

    #[derive(Clone, Default)]
    struct SharedGraph(Arc<Mutex<GraphLog>>);

    impl SharedGraph {
        fn calls(&self) -> Vec<String> {
            self.0.lock().calls.clone()
        }

        fn clear(&self) {
            self.0.lock().calls.clear();
        }

        fn enter(&self, node: &str) {
            let mut log = self.0.lock();
            if let Some(hooks) = log.hooks.get_mut(node) {
                for hook in hooks {
                    hook();
                }
            }
        }
    }

    impl BehaviorGraph for SharedGraph {
        fn set_driver_enabled(&mut self, enabled: bool) {
            self.0.lock().calls.push(format!("driver {enabled}"));
        }
        fn force_node(&mut self, node: &str) {
            self.0.lock().calls.push(format!("force {node}"));
        }
        fn execute_actions(&mut self, node: &str, actions: &[u8]) {
            self.0.lock().calls.push(format!("exec {node} {actions:?}"));
        }
        fn play_clip(&mut self, clip: &str) {
            self.0.lock().calls.push(format!("clip {clip}"));
        }
        fn set_active(&mut self, active: bool) {
            self.0.lock().calls.push(format!("active {active}"));
        }
        fn set_position(&mut self, position: Vec2) {
            self.0
                .lock()
                .calls
                .push(format!("position {} {}", position.x, position.y));
        }
        fn set_scale(&mut self, flipped: bool) {
            self.0.lock().calls.push(format!("scale {flipped}"));
        }
        fn insert_hook(&mut self, node: &str, hook: NodeHook) {
            self.0
                .lock()
                .hooks
                .entry(node.to_owned())
                .or_default()
                .push(hook);
        }
    }

    fn entity(entity_type: EntityType) -> (NetworkedEntity, SharedGraph, Outbox) {
        let graph = SharedGraph::default();
        let outbox = Outbox::new();
        let key = EntityKey::new(entity_type, InstanceId::new(1));
        let profile = Catalog::builtin().get(entity_type).unwrap();
        let entity = NetworkedEntity::new(key, profile, Box::new(graph.clone()), outbox.clone());
        (entity, graph, outbox)
    }

    #[test]
    fn host_initialization_enables_driver_and_announces_active_state() {
        let (mut entity, graph, outbox) = entity(EntityType::Baldur);
        entity.initialize_as_scene_host();

        assert_eq!(entity.authority(), AuthorityState::SceneHost);
        assert_eq!(graph.calls(), ["driver true"]);
        let sent = outbox.drain();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].state, Some(0));
    }

    #[test]
    fn hooks_fire_only_on_the_host() {
        let (mut entity, graph, outbox) = entity(EntityType::Baldur);
        graph.enter("Roll L");
        assert!(outbox.is_empty());

        entity.initialize_as_scene_host();
        outbox.clear();
        graph.enter("Roll L");
        let sent = outbox.drain();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].animation.as_ref().map(|a| a.index), Some(3));
    }

    #[test]
    fn hook_with_info_and_state() {
        let (mut entity, graph, outbox) = entity(EntityType::BroodingMawlek);
        entity.initialize_as_scene_host();
        outbox.clear();

        graph.enter("GG Wake");
        let sent = outbox.drain();
        assert_eq!(sent.len(), 1);
        let animation = sent[0].animation.as_ref().unwrap();
        assert_eq!(animation.index, 2);
        assert_eq!(animation.info.as_slice(), &[1]);
        assert_eq!(sent[0].state, Some(1));
    }

    #[test]
    fn client_with_terminal_state_is_deactivated() {
        let (mut entity, graph, _outbox) = entity(EntityType::Baldur);
        entity.initialize_as_scene_client(Some(1));

        let snapshot = entity.snapshot();
        assert!(!snapshot.active);
        assert_eq!(snapshot.last_state, Some(1));
        assert_eq!(graph.calls(), ["driver false", "active false"]);
    }

    #[test]
    fn client_applies_inbound_updates() {
        let (mut entity, graph, outbox) = entity(EntityType::Baldur);
        entity.initialize_as_scene_client(Some(0));
        graph.clear();

        entity.update_position(Vec2::new(1.0, 2.0));
        entity.update_scale(true);
        entity.update_animation(6, &[]);

        assert_eq!(
            graph.calls(),
            ["position 1 2", "scale true", "exec Start [1, 2]"]
        );
        let snapshot = entity.snapshot();
        assert_eq!(snapshot.last_animation, Some(6));
        assert_eq!(snapshot.position, Some(Vec2::new(1.0, 2.0)));
        assert!(outbox.is_empty());
    }

    #[test]
    fn inbound_update_on_host_is_rejected() {
        let (entity, graph, _outbox) = entity(EntityType::Crawlid);
        let collector = Arc::new(CollectingObserver::new());
        let observer: ObserverHandle = collector.clone();
        let mut entity = entity.with_observer(Some(observer));
        entity.initialize_as_scene_host();
        graph.clear();

        entity.update_animation(1, &[]);
        entity.update_state(1);

        assert!(graph.calls().is_empty());
        assert_eq!(entity.snapshot().last_animation, None);
        assert!(entity.snapshot().active);
        assert_eq!(collector.violations_of_kind(ViolationKind::Authority).len(), 2);
    }

    #[test]
    fn send_on_client_is_rejected() {
        let (entity, _graph, outbox) = entity(EntityType::Crawlid);
        let collector = Arc::new(CollectingObserver::new());
        let observer: ObserverHandle = collector.clone();
        let mut entity = entity.with_observer(Some(observer));
        entity.initialize_as_scene_client(None);

        entity.send_position(Vec2::new(0.0, 0.0));
        entity.send_animation(0, &[]);

        assert!(outbox.is_empty());
        assert_eq!(collector.violations_of_kind(ViolationKind::Authority).len(), 2);
    }

    #[test]
    fn host_cannot_become_client() {
        let (entity, _graph, _outbox) = entity(EntityType::Crawlid);
        let collector = Arc::new(CollectingObserver::new());
        let observer: ObserverHandle = collector.clone();
        let mut entity = entity.with_observer(Some(observer));
        entity.initialize_as_scene_host();
        entity.initialize_as_scene_client(Some(0));

        assert_eq!(entity.authority(), AuthorityState::SceneHost);
        assert!(collector.has_violation(ViolationKind::Authority));
    }

    #[test]
    fn switch_resumes_from_last_animation() {
        let (mut entity, graph, outbox) = entity(EntityType::Vengefly);
        entity.initialize_as_scene_client(Some(0));
        entity.update_animation(2, &[]);
        graph.clear();

        entity.switch_to_scene_host();

        assert_eq!(entity.authority(), AuthorityState::SceneHost);
        assert_eq!(graph.calls(), ["driver true", "force Chase - In Sight"]);
        assert!(outbox.is_empty());

        graph.enter("Stop");
        assert_eq!(outbox.len(), 1);
    }

    #[test]
    fn switch_without_history_uses_default_node() {
        let (mut entity, graph, _outbox) = entity(EntityType::Crawlid);
        entity.initialize_as_scene_client(None);
        graph.clear();

        entity.switch_to_scene_host();
        assert_eq!(graph.calls(), ["driver true", "force Walk"]);
    }

    #[test]
    fn switch_on_uninitialized_initializes_as_host() {
        let (mut entity, graph, outbox) = entity(EntityType::Crawlid);
        entity.switch_to_scene_host();
        assert_eq!(entity.authority(), AuthorityState::SceneHost);
        assert_eq!(graph.calls(), ["driver true"]);
        assert_eq!(outbox.len(), 1);

        entity.switch_to_scene_host();
        assert_eq!(graph.calls(), ["driver true"]);
    }

    #[test]
    fn clip_hooks_and_death() {
        let (mut entity, _graph, outbox) = entity(EntityType::Crawlid);
        entity.on_clip_started("turn");
        assert!(outbox.is_empty());

        entity.initialize_as_scene_host();
        outbox.clear();
        entity.on_clip_started("turn");
        entity.on_clip_started("unknown");
        entity.on_death();

        let sent = outbox.drain();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].animation.as_ref().map(|a| a.index), Some(1));
        assert_eq!(sent[1].state, Some(1));
    }

    #[test]
    fn destroy_silences_hooks() {
        let (mut entity, graph, outbox) = entity(EntityType::Baldur);
        entity.initialize_as_scene_host();
        outbox.clear();
        entity.destroy();

        graph.enter("Stop");
        assert!(outbox.is_empty());
        assert_eq!(entity.authority(), AuthorityState::Uninitialized);
    }
}
