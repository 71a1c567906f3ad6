//! Convenient re-exports for common usage.
//!
//! This module provides a "prelude" that re-exports the most commonly used types
//! from scene-sync, allowing you to import them all at once.
//!
//! # Usage
//!
//! ```rust
//! use scene_sync::prelude::*;
//! ```
//!
//! # What's Included
//!
//! The prelude includes:
//!
//! - **Scene lifecycle**: [`SceneController`], [`SceneEvent`], [`ScenePhase`], [`Inbox`], [`InboxSender`]
//! - **Entities**: [`SyncEntity`], [`NetworkedEntity`], [`EntityKey`], [`EntityType`], [`InstanceId`], [`AuthorityState`]
//! - **Engine interface**: [`BehaviorGraph`], [`NodeHook`], [`Outbox`]
//! - **Data tables**: [`Catalog`], [`EntityProfile`], [`Classifier`]
//! - **Wire types**: [`EntityUpdate`], [`UpdateKind`], [`Vec2`]
//! - **Transport**: [`SyncProtocol`], [`NonBlockingSocket`], [`PeerAddress`], [`UdpNonBlockingSocket`], [`Message`]
//! - **Configuration**: [`SyncConfig`]
//! - **Error handling**: [`SyncError`], [`SyncResult`]
//!
//! # Example
//!
//! ```rust
//! use scene_sync::prelude::*;
//!
//! let inbox = Inbox::new();
//! let sender = inbox.sender();
//! sender.send(SceneEvent::HostLeft);
//!
//! let mut controller = SceneController::new(&SyncConfig::default())?;
//! controller.scene_loaded("Tutorial_01");
//! assert_eq!(controller.phase(), ScenePhase::AwaitingStatus);
//!
//! // No status yet and the host left: this side becomes the scene host.
//! assert_eq!(controller.pump(&inbox), 1);
//! assert_eq!(controller.phase(), ScenePhase::Host);
//! # Ok::<(), SyncError>(())
//! ```

pub use crate::catalog::{Catalog, Classifier, EntityProfile};
pub use crate::config::SyncConfig;
pub use crate::entity::{
    AuthorityState, BehaviorGraph, EntityKey, EntityType, InstanceId, NetworkedEntity, NodeHook,
    Outbox, SyncEntity,
};
pub use crate::error::{SyncError, SyncResult};
pub use crate::network::messages::Message;
pub use crate::network::protocol::SyncProtocol;
pub use crate::network::udp_socket::UdpNonBlockingSocket;
pub use crate::network::wire::{EntityUpdate, UpdateKind, Vec2};
pub use crate::scene::{Inbox, InboxSender, SceneController, SceneEvent, ScenePhase};
pub use crate::{NonBlockingSocket, PeerAddress};
