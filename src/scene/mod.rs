//! Scene-scoped entity management.
//!
//! A [`SceneController`] owns everything that lives exactly as long as one
//! scene: the [`EntityRegistry`] of networked entities, the scene-entry batch
//! cached for late activations, and the [`HostSnapshot`] a host hands to
//! clients joining its scene. Network events reach it as [`SceneEvent`]s,
//! usually through an [`Inbox`] filled on the network thread.

use crate::network::wire::EntityUpdate;

pub mod controller;
pub mod inbox;
pub mod registry;
pub mod snapshot;

pub use controller::{SceneController, ScenePhase};
pub use inbox::{Inbox, InboxSender};
pub use registry::EntityRegistry;
pub use snapshot::HostSnapshot;

/// A decoded network event for the scene layer.
#[derive(Debug, Clone, PartialEq)]
pub enum SceneEvent {
    /// The server assigned this side a role in the current scene.
    EnterScene {
        /// Whether this side is the scene host.
        scene_host: bool,
        /// The host's scene-entry batch; empty for a scene host.
        batch: Vec<EntityUpdate>,
    },
    /// The scene host left; this side takes over.
    HostLeft,
    /// An entity update from the scene host.
    Update(EntityUpdate),
}

/// This side's role in the current scene, as far as the registry knows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Role {
    /// No scene status received yet.
    #[default]
    Unknown,
    /// Authoritative for every entity in the scene.
    Host,
    /// Mirrors the scene host.
    Client,
}
