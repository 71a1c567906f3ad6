//! Common test infrastructure shared across integration tests.
//!
//! This module provides:
//! - `stubs`: a recording behavior graph and an in-memory socket network
//! - helpers for building controllers, observers and scene-entry batches
//!
//! # Usage
//!
//! From any integration test file:
//! ```ignore
//! #[path = "common/mod.rs"]
//! mod common;
//! use common::stubs::{FakeGraph, LoopbackNet};
//! use common::{client_controller, collector};
//! ```

#![allow(dead_code, clippy::panic, clippy::unwrap_used, clippy::expect_used)]

pub mod stubs;

use std::sync::Arc;

use scene_sync::telemetry::{CollectingObserver, ObserverHandle};
use scene_sync::{EntityKey, EntityType, InstanceId, SceneController, SceneEvent, SyncConfig};

use stubs::{FakeGraph, GraphProbe};

/// Installs a test-writer tracing subscriber once per test binary. Later calls
/// are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// A collecting observer and the handle to pass to the crate.
pub fn collector() -> (Arc<CollectingObserver>, ObserverHandle) {
    let collector = Arc::new(CollectingObserver::new());
    let handle: ObserverHandle = collector.clone();
    (collector, handle)
}

/// Shorthand for an entity key.
pub fn key(entity_type: EntityType, id: u8) -> EntityKey {
    EntityKey::new(entity_type, InstanceId::new(id))
}

/// A controller with the built-in catalog and `config`, with `scene` loaded.
pub fn loaded_controller(config: &SyncConfig, scene: &str) -> SceneController {
    init_tracing();
    let mut controller = SceneController::new(config).unwrap();
    controller.scene_loaded(scene);
    controller
}

/// A controller reporting to a fresh collector, with `scene` loaded.
pub fn observed_controller(scene: &str) -> (SceneController, Arc<CollectingObserver>) {
    init_tracing();
    let (collector, handle) = collector();
    let mut controller = SceneController::new(&SyncConfig::default())
        .unwrap()
        .with_observer(handle);
    controller.scene_loaded(scene);
    (controller, collector)
}

/// Registers an object by its engine name with a fresh [`FakeGraph`].
pub fn enable(controller: &mut SceneController, raw_name: &str) -> (EntityKey, GraphProbe) {
    let (graph, probe) = FakeGraph::boxed();
    let key = controller
        .entity_enabled(raw_name, graph)
        .unwrap_or_else(|| panic!("`{raw_name}` should classify"));
    (key, probe)
}

/// Enters the loaded scene as a client with `batch` as the scene-entry batch.
pub fn enter_as_client(controller: &mut SceneController, batch: Vec<scene_sync::EntityUpdate>) {
    controller.handle_event(SceneEvent::EnterScene {
        scene_host: false,
        batch,
    });
}

/// Enters the loaded scene as the scene host.
pub fn enter_as_host(controller: &mut SceneController) {
    controller.handle_event(SceneEvent::EnterScene {
        scene_host: true,
        batch: Vec::new(),
    });
}
