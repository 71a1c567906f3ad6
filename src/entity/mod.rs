//! Networked entities and their authority state machine.
//!
//! An entity is identified by an [`EntityKey`] (its [`EntityType`] plus an
//! [`InstanceId`] that disambiguates several instances of the same type in one
//! scene). Exactly one side of the connection is authoritative for it: the
//! scene host runs the entity's behavior graph and broadcasts what it does,
//! every scene client mirrors those updates with the graph driver disabled.
//!
//! The engine-facing side is the [`BehaviorGraph`] trait; the registry-facing
//! side is the [`SyncEntity`] trait, implemented by the data-driven
//! [`NetworkedEntity`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::network::wire::Vec2;

pub mod graph;
pub mod networked;
pub mod outbox;

pub use graph::{BehaviorGraph, NodeHook};
pub use networked::NetworkedEntity;
pub use outbox::Outbox;

macro_rules! entity_types {
    ($($(#[$meta:meta])* $name:ident = $value:literal,)+) => {
        /// The closed set of entity kinds this crate knows how to synchronize.
        ///
        /// The discriminant is the byte sent on the wire. `None` is a valid wire
        /// value that never maps to a registered entity; updates carrying it are
        /// dropped by the registry.
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[repr(u8)]
        pub enum EntityType {
            $($(#[$meta])* $name = $value,)+
        }

        impl EntityType {
            /// Every entity type, in wire order.
            pub const ALL: &'static [EntityType] = &[$(EntityType::$name,)+];

            /// The type's name as used in profile data and logs.
            #[must_use]
            pub const fn name(self) -> &'static str {
                match self {
                    $(EntityType::$name => stringify!($name),)+
                }
            }
        }

        impl TryFrom<u8> for EntityType {
            type Error = u8;

            fn try_from(value: u8) -> Result<Self, Self::Error> {
                match value {
                    $($value => Ok(EntityType::$name),)+
                    other => Err(other),
                }
            }
        }

        impl FromStr for EntityType {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $(stringify!($name) => Ok(EntityType::$name),)+
                    other => Err(format!("unknown entity type `{other}`")),
                }
            }
        }
    };
}

entity_types! {
    /// Placeholder carried by malformed or uninitialized updates.
    None = 0,
    /// Crawlid.
    Crawlid = 1,
    /// Baldur.
    Baldur = 2,
    /// Elder Baldur.
    ElderBaldur = 3,
    /// Tiktik.
    Tiktik = 4,
    /// Gruzzer.
    Gruzzer = 5,
    /// Gruz Mother.
    GruzMother = 6,
    /// Vengefly.
    Vengefly = 7,
    /// Aspid Hunter.
    AspidHunter = 8,
    /// Aspid Mother.
    AspidMother = 9,
    /// Goam.
    Goam = 10,
    /// Wandering Husk.
    WanderingHusk = 11,
    /// Husk Bully.
    HuskBully = 12,
    /// Leaping Husk.
    LeapingHusk = 13,
    /// Husk Hornhead.
    HuskHornhead = 14,
    /// Husk Warrior.
    HuskWarrior = 15,
    /// Husk Guard.
    HuskGuard = 16,
    /// Mosscreep.
    Mosscreep = 17,
    /// Mosskin.
    Mosskin = 18,
    /// Volatile Mosskin.
    VolatileMosskin = 19,
    /// Moss Knight.
    MossKnight = 20,
    /// Moss Charger.
    MossCharger = 21,
    /// Fool Eater.
    FoolEater = 22,
    /// Gulka.
    Gulka = 23,
    /// Squit.
    Squit = 24,
    /// Obble.
    Obble = 25,
    /// Durandoo.
    Durandoo = 26,
    /// Duranda.
    Duranda = 27,
    /// Brooding Mawlek.
    BroodingMawlek = 28,
    /// False Knight.
    FalseKnight = 29,
}

impl EntityType {
    /// The wire byte for this type.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Disambiguates instances of the same [`EntityType`] within one scene.
///
/// Only unique inside a single scene instance; it is recomputed from the engine
/// object's name every time the object registers.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct InstanceId(u8);

impl InstanceId {
    /// Wraps a raw id.
    #[must_use]
    pub const fn new(id: u8) -> Self {
        Self(id)
    }

    /// The raw id.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of a networked entity within a scene.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct EntityKey {
    /// The entity's kind.
    pub entity_type: EntityType,
    /// The instance within the scene.
    pub id: InstanceId,
}

impl EntityKey {
    /// Creates a key.
    #[must_use]
    pub const fn new(entity_type: EntityType, id: InstanceId) -> Self {
        Self { entity_type, id }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.entity_type, self.id)
    }
}

/// Who is authoritative for an entity.
///
/// Transitions only on scene entry, scene exit (the entity is destroyed), or
/// host hand-off. There is no way back from `SceneHost` to `SceneClient`
/// within a scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum AuthorityState {
    /// Registered, but the scene status has not arrived yet.
    #[default]
    Uninitialized,
    /// This side runs the behavior graph and broadcasts updates.
    SceneHost,
    /// This side mirrors updates from the host.
    SceneClient {
        /// The coarse state the entity was initialized with, if the host sent one.
        last_known_state: Option<u8>,
    },
}

impl AuthorityState {
    /// Whether this side is authoritative.
    #[must_use]
    pub const fn is_host(self) -> bool {
        matches!(self, Self::SceneHost)
    }

    /// Whether this side mirrors the host.
    #[must_use]
    pub const fn is_client(self) -> bool {
        matches!(self, Self::SceneClient { .. })
    }

    /// Short label for logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::SceneHost => "scene_host",
            Self::SceneClient { .. } => "scene_client",
        }
    }
}

/// Point-in-time view of an entity's synchronized fields.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntitySnapshot {
    /// The entity's identity.
    pub key: EntityKey,
    /// Current authority.
    pub authority: AuthorityState,
    /// Most recently applied animation index.
    pub last_animation: Option<u8>,
    /// Most recently applied coarse state.
    pub last_state: Option<u8>,
    /// Last known position.
    pub position: Option<Vec2>,
    /// Last known horizontal flip.
    pub scale: Option<bool>,
    /// Whether the visual representation is active.
    pub active: bool,
}

/// The contract every networked entity fulfills towards the registry.
///
/// `initialize_*` is called exactly once per scene entry. `update_*` are the
/// inbound side and only take effect on a scene client; `send_*` are the
/// outbound side and only take effect on the scene host. Calling either on the
/// wrong authority is reported and ignored.
///
/// Entities live on the engine's main thread, so the trait has no `Send`
/// bound even with the `sync-send` feature.
pub trait SyncEntity {
    /// The entity's identity.
    fn key(&self) -> EntityKey;

    /// Current authority.
    fn authority(&self) -> AuthorityState;

    /// Take authority: enable the behavior driver and announce the current state.
    fn initialize_as_scene_host(&mut self);

    /// Mirror the host: disable the behavior driver, and deactivate if `state`
    /// is terminal.
    fn initialize_as_scene_client(&mut self, state: Option<u8>);

    /// Gain authority mid-scene and resume the behavior graph from history.
    fn switch_to_scene_host(&mut self);

    /// Applies a position received from the host.
    fn update_position(&mut self, position: Vec2);

    /// Applies a horizontal flip received from the host.
    fn update_scale(&mut self, flipped: bool);

    /// Applies an animation received from the host and replays its side effects.
    fn update_animation(&mut self, index: u8, info: &[u8]);

    /// Applies a coarse state received from the host.
    fn update_state(&mut self, state: u8);

    /// Deactivates the visual representation because the host does not know
    /// this entity.
    fn deactivate(&mut self);

    /// Releases the entity at scene exit.
    fn destroy(&mut self);

    /// Broadcasts a position.
    fn send_position(&mut self, position: Vec2);

    /// Broadcasts a horizontal flip.
    fn send_scale(&mut self, flipped: bool);

    /// Broadcasts an animation.
    fn send_animation(&mut self, index: u8, info: &[u8]);

    /// Broadcasts a coarse state.
    fn send_state(&mut self, state: u8);

    /// Engine callback: an animator clip outside the behavior graph started.
    fn on_clip_started(&mut self, clip: &str);

    /// Engine callback: the entity died.
    fn on_death(&mut self);

    /// Current synchronized fields.
    fn snapshot(&self) -> EntitySnapshot;
}
