//! # scene-sync
//!
//! Scene-scoped entity state synchronization for a host/client multiplayer
//! game. One side of the connection, the *scene host*, runs each entity's
//! behavior graph and broadcasts what it does; every *scene client* mirrors it
//! with its own graph driver disabled. When the host leaves, a client takes
//! over and resumes each graph from the last animation it saw.
//!
//! The crate is organised leaf-first:
//!
//! - [`network::wire`] packs entity updates into a compact bit-flagged format.
//! - [`SyncProtocol`] carries them over any [`NonBlockingSocket`], with
//!   reliable (latest-wins, resent until acked) delivery for animation and
//!   state and unreliable delivery for position and scale.
//! - [`entity`] holds the per-entity authority state machine, driven by the
//!   data tables in [`catalog`] through the engine-facing [`BehaviorGraph`]
//!   trait.
//! - [`reconcile`] maps animation history onto a behavior-graph node.
//! - [`scene`] owns the registry of live entities and the scene lifecycle.
//!
//! # Example
//!
//! ```
//! use scene_sync::prelude::*;
//!
//! struct Graph;
//!
//! impl BehaviorGraph for Graph {
//!     fn set_driver_enabled(&mut self, _enabled: bool) {}
//!     fn force_node(&mut self, _node: &str) {}
//!     fn execute_actions(&mut self, _node: &str, _actions: &[u8]) {}
//!     fn play_clip(&mut self, _clip: &str) {}
//!     fn set_active(&mut self, _active: bool) {}
//!     fn set_position(&mut self, _position: Vec2) {}
//!     fn set_scale(&mut self, _flipped: bool) {}
//!     fn insert_hook(&mut self, _node: &str, _hook: NodeHook) {}
//! }
//!
//! let mut controller = SceneController::new(&SyncConfig::default())?;
//! controller.scene_loaded("Crossroads_01");
//! let key = controller.entity_enabled("Crawler 1", Box::new(Graph)).unwrap();
//! assert_eq!(key.to_string(), "Crawlid#1");
//!
//! controller.handle_event(SceneEvent::EnterScene {
//!     scene_host: true,
//!     batch: Vec::new(),
//! });
//! assert!(controller.registry().get(&key).unwrap().authority().is_host());
//!
//! // The new host announces each entity's active state.
//! let outbound = controller.drain_outbound();
//! assert_eq!(outbound.len(), 1);
//! # Ok::<(), scene_sync::SyncError>(())
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
use std::{fmt::Debug, hash::Hash};

pub use catalog::{Catalog, Classifier, EntityProfile};
pub use config::SyncConfig;
pub use entity::{
    AuthorityState, BehaviorGraph, EntityKey, EntityType, InstanceId, NetworkedEntity, Outbox,
    SyncEntity,
};
pub use error::{SyncError, SyncResult};
pub use network::messages::Message;
pub use network::protocol::SyncProtocol;
pub use network::udp_socket::UdpNonBlockingSocket;
pub use network::wire::{EntityUpdate, UpdateKind, Vec2};
pub use scene::{Inbox, SceneController, SceneEvent, ScenePhase};

pub mod catalog;
pub mod config;
pub mod entity;
pub mod error;
pub mod prelude;
pub mod reconcile;
pub mod scene;
pub mod telemetry;
/// Wire format, packet envelope, and transport.
pub mod network {
    /// Binary codec for packet envelopes.
    ///
    /// Provides centralized, zero-allocation-where-possible encoding and decoding
    /// of [`Message`](super::messages::Message)s using bincode.
    pub mod codec;
    /// Packet envelope types.
    pub mod messages;
    pub mod protocol;
    pub mod reliability;
    pub mod sequence;
    /// Non-blocking UDP transport.
    pub mod udp_socket;
    pub mod wire;
}

/// Address type identifying a remote peer.
///
/// Implemented for every type with the required bounds; [`std::net::SocketAddr`]
/// is the usual choice. Any `Clone + Eq + Ord + Hash + Debug` type works for
/// local testing.
#[cfg(feature = "sync-send")]
pub trait PeerAddress: Clone + PartialEq + Eq + PartialOrd + Ord + Hash + Debug + Send + Sync {}

#[cfg(feature = "sync-send")]
impl<T> PeerAddress for T where T: Clone + PartialEq + Eq + PartialOrd + Ord + Hash + Debug + Send + Sync {}

/// Address type identifying a remote peer.
///
/// Implemented for every type with the required bounds; [`std::net::SocketAddr`]
/// is the usual choice. Any `Clone + Eq + Ord + Hash + Debug` type works for
/// local testing.
#[cfg(not(feature = "sync-send"))]
pub trait PeerAddress: Clone + PartialEq + Eq + PartialOrd + Ord + Hash + Debug {}

#[cfg(not(feature = "sync-send"))]
impl<T> PeerAddress for T where T: Clone + PartialEq + Eq + PartialOrd + Ord + Hash + Debug {}

/// This [`NonBlockingSocket`] trait is used when you want to use scene-sync with your own socket.
/// However you wish to send and receive messages, it should be implemented through these two methods.
/// Messages should be sent in an UDP-like fashion, unordered and unreliable.
/// [`SyncProtocol`] adds acknowledgement and retransmission on top for the updates that need it.
#[cfg(feature = "sync-send")]
pub trait NonBlockingSocket<A>: Send + Sync
where
    A: Clone + PartialEq + Eq + Hash + Send + Sync,
{
    /// Takes a [`Message`] and sends it to the given address.
    fn send_to(&mut self, msg: &Message, addr: &A);

    /// This method should return all messages received since the last time this method was called.
    /// The pairs `(A, Message)` indicate from which address each packet was received.
    fn receive_all_messages(&mut self) -> Vec<(A, Message)>;
}

/// This [`NonBlockingSocket`] trait is used when you want to use scene-sync with your own socket.
/// However you wish to send and receive messages, it should be implemented through these two methods.
/// Messages should be sent in an UDP-like fashion, unordered and unreliable.
/// [`SyncProtocol`] adds acknowledgement and retransmission on top for the updates that need it.
#[cfg(not(feature = "sync-send"))]
pub trait NonBlockingSocket<A>
where
    A: Clone + PartialEq + Eq + Hash,
{
    /// Takes a [`Message`] and sends it to the given address.
    fn send_to(&mut self, msg: &Message, addr: &A);

    /// This method should return all messages received since the last time this method was called.
    /// The pairs `(A, Message)` indicate from which address each packet was received.
    fn receive_all_messages(&mut self) -> Vec<(A, Message)>;
}

// ###################
// # UNIT TESTS      #
// ###################
