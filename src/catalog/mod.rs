//! Per-type entity profiles.
//!
//! Everything that differs between entity types (which behavior graph drives
//! them, which graph nodes map to which animation index, how to resume after a
//! host hand-off, how a client replays an animation) is data, not code. The
//! built-in tables live in `data/profiles.json` and are parsed once.
//!
//! # Example
//!
//! ```
//! use scene_sync::catalog::Catalog;
//! use scene_sync::EntityType;
//!
//! let profile = Catalog::builtin().get(EntityType::Crawlid).unwrap();
//! assert_eq!(profile.graph, "Crawler");
//! assert_eq!(profile.default_node, "Walk");
//! ```

use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::entity::EntityType;
use crate::error::{SyncError, SyncResult};
use crate::report_violation;
use crate::telemetry::{ViolationKind, ViolationSeverity};

pub mod classify;

pub use classify::{Classifier, ClassifierRule};

const BUILTIN_PROFILES: &str = include_str!("../../data/profiles.json");

/// A behavior-graph node hook: entering `node` on the scene host emits an
/// animation update with `index`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookSpec {
    /// Graph node the hook is inserted at.
    pub node: String,
    /// Animation index sent when the node is entered.
    pub index: u8,
    /// Extra bytes sent with the animation.
    #[serde(default)]
    pub info: Vec<u8>,
    /// Coarse state sent alongside the animation, for nodes that also change state.
    #[serde(default)]
    pub emit_state: Option<u8>,
}

/// One side effect a scene client performs when it receives an animation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum ReplayStep {
    /// Run the listed actions of a node without evaluating the graph. An empty
    /// list runs every action of the node.
    Execute {
        /// Graph node whose actions run.
        node: String,
        /// Action indices within the node.
        #[serde(default)]
        actions: Vec<u8>,
        /// Only run when the first info byte equals this value.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        when_info: Option<u8>,
    },
    /// Start an animator clip that the graph does not own.
    PlayClip {
        /// Clip name.
        clip: String,
        /// Only run when the first info byte equals this value.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        when_info: Option<u8>,
    },
}

impl ReplayStep {
    /// Whether the step runs for an animation carrying `info`.
    #[must_use]
    pub fn applies_to(&self, info: &[u8]) -> bool {
        let when_info = match self {
            Self::Execute { when_info, .. } | Self::PlayClip { when_info, .. } => *when_info,
        };
        when_info.is_none_or(|expected| info.first() == Some(&expected))
    }
}

/// Everything the crate knows about one entity type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityProfile {
    /// Name of the behavior graph that drives the entity.
    pub graph: String,
    /// Node the graph resumes at when there is no usable animation history.
    pub default_node: String,
    /// Coarse state a new scene host announces.
    #[serde(default)]
    pub active_state: u8,
    /// Terminal coarse state; a client receiving it deactivates the entity.
    #[serde(default)]
    pub dead_state: Option<u8>,
    /// Animation names, indexed by wire animation index. Only used for logs and
    /// validation; may be empty for types without animation tables.
    #[serde(default)]
    pub animations: Vec<String>,
    /// Node hooks installed on every instance.
    #[serde(default)]
    pub hooks: Vec<HookSpec>,
    /// Animator clips (not owned by the graph) that emit an animation when
    /// started on the scene host.
    #[serde(default)]
    pub clip_hooks: BTreeMap<String, u8>,
    /// Node to force when a client takes over after animation `index`.
    #[serde(default)]
    pub resume: BTreeMap<u8, String>,
    /// Side effects a client replays for animation `index`.
    #[serde(default)]
    pub replay: BTreeMap<u8, Vec<ReplayStep>>,
}

impl EntityProfile {
    /// A profile with only a graph and a default node.
    #[must_use]
    pub fn minimal(graph: impl Into<String>, default_node: impl Into<String>) -> Self {
        Self {
            graph: graph.into(),
            default_node: default_node.into(),
            active_state: 0,
            dead_state: None,
            animations: Vec::new(),
            hooks: Vec::new(),
            clip_hooks: BTreeMap::new(),
            resume: BTreeMap::new(),
            replay: BTreeMap::new(),
        }
    }

    /// Human-readable name of animation `index`, when the profile lists one.
    #[must_use]
    pub fn animation_name(&self, index: u8) -> Option<&str> {
        self.animations.get(usize::from(index)).map(String::as_str)
    }

    /// Animation index emitted when `clip` starts, if the clip is hooked.
    #[must_use]
    pub fn clip_index(&self, clip: &str) -> Option<u8> {
        self.clip_hooks.get(clip).copied()
    }

    /// Replay steps for animation `index`; empty when none are defined.
    #[must_use]
    pub fn replay_steps(&self, index: u8) -> &[ReplayStep] {
        self.replay.get(&index).map_or(&[], Vec::as_slice)
    }

    /// Whether `state` is this type's terminal state.
    #[must_use]
    pub fn is_dead_state(&self, state: u8) -> bool {
        self.dead_state == Some(state)
    }

    /// Checks the profile for internal consistency.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Catalog`] describing the first inconsistency.
    pub fn validate(&self, entity_type: EntityType) -> SyncResult<()> {
        if self.default_node.is_empty() {
            return Err(catalog_error(format!(
                "{entity_type}: default_node is empty"
            )));
        }
        if self.dead_state == Some(self.active_state) {
            return Err(catalog_error(format!(
                "{entity_type}: dead_state equals active_state ({})",
                self.active_state
            )));
        }
        if let Some(hook) = self.hooks.iter().find(|hook| hook.node.is_empty()) {
            return Err(catalog_error(format!(
                "{entity_type}: hook for index {} has no node",
                hook.index
            )));
        }
        if self.animations.is_empty() {
            return Ok(());
        }

        let known = |index: u8| usize::from(index) < self.animations.len();
        let indices = self
            .hooks
            .iter()
            .map(|hook| hook.index)
            .chain(self.clip_hooks.values().copied())
            .chain(self.resume.keys().copied())
            .chain(self.replay.keys().copied());
        for index in indices {
            if !known(index) {
                return Err(catalog_error(format!(
                    "{entity_type}: animation index {index} outside table of {}",
                    self.animations.len()
                )));
            }
        }
        Ok(())
    }
}

#[derive(Deserialize)]
struct CatalogFile {
    profiles: BTreeMap<String, EntityProfile>,
}

/// Maps every known [`EntityType`] to its [`EntityProfile`].
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    profiles: BTreeMap<EntityType, Arc<EntityProfile>>,
}

impl Catalog {
    /// An empty catalog; no type is networked.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// The built-in profile tables.
    ///
    /// Parsed on first use. Should the embedded data ever fail to parse, a
    /// critical [`ViolationKind::Catalog`] diagnostic is reported and an empty
    /// catalog is returned, so no entity is networked.
    pub fn builtin() -> &'static Self {
        static BUILTIN: OnceLock<Catalog> = OnceLock::new();
        BUILTIN.get_or_init(|| match Self::from_json(BUILTIN_PROFILES) {
            Ok(catalog) => {
                debug!(profiles = catalog.len(), "Loaded built-in entity catalog");
                catalog
            },
            Err(err) => {
                report_violation!(
                    ViolationSeverity::Critical,
                    ViolationKind::Catalog,
                    "Built-in entity catalog is invalid: {}",
                    err
                );
                Self::empty()
            },
        })
    }

    /// Parses a catalog from JSON of the form `{"profiles": {"TypeName": {...}}}`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Catalog`] when the JSON is malformed, names an
    /// unknown type or `None`, or contains an inconsistent profile.
    pub fn from_json(json: &str) -> SyncResult<Self> {
        let file: CatalogFile = serde_json::from_str(json).map_err(|err| SyncError::Catalog {
            reason: err.to_string(),
        })?;

        let mut catalog = Self::empty();
        for (name, profile) in file.profiles {
            let entity_type: EntityType = name
                .parse()
                .map_err(|reason: String| SyncError::Catalog { reason })?;
            catalog.insert(entity_type, profile)?;
        }
        Ok(catalog)
    }

    /// Adds or replaces the profile for `entity_type`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Catalog`] for [`EntityType::None`] or an
    /// inconsistent profile.
    pub fn insert(&mut self, entity_type: EntityType, profile: EntityProfile) -> SyncResult<()> {
        if entity_type == EntityType::None {
            return Err(catalog_error("`None` cannot have a profile".to_owned()));
        }
        profile.validate(entity_type)?;
        self.profiles.insert(entity_type, Arc::new(profile));
        Ok(())
    }

    /// The profile for `entity_type`, if it is networked.
    #[must_use]
    pub fn get(&self, entity_type: EntityType) -> Option<Arc<EntityProfile>> {
        self.profiles.get(&entity_type).cloned()
    }

    /// Whether `entity_type` has a profile.
    #[must_use]
    pub fn contains(&self, entity_type: EntityType) -> bool {
        self.profiles.contains_key(&entity_type)
    }

    /// Types with a profile, in wire order.
    pub fn types(&self) -> impl Iterator<Item = EntityType> + '_ {
        self.profiles.keys().copied()
    }

    /// Number of profiles.
    #[must_use]
    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    /// Whether the catalog has no profiles.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

fn catalog_error(reason: String) -> SyncError {
    SyncError::Catalog { reason }
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

    #[test]
    fn builtin_covers_every_real_type() {
        let catalog = Catalog::builtin();
        for ty in EntityType::ALL.iter().filter(|ty| **ty != EntityType::None) {
            assert!(catalog.contains(*ty), "missing profile for {ty}");
        }
        assert!(!catalog.contains(EntityType::None));
        assert_eq!(catalog.len(), EntityType::ALL.len() - 1);
    }

    #[test]
    fn baldur_tables() {
        let profile = Catalog::builtin().get(EntityType::Baldur).unwrap();
        assert_eq!(profile.graph, "Roller");
        assert_eq!(profile.default_node, "Idle");
        assert_eq!(profile.dead_state, Some(1));
        assert_eq!(profile.animation_name(3), Some("Roll"));
        assert_eq!(profile.resume.get(&3).map(String::as_str), Some("Stop"));
        assert_eq!(
            profile.replay_steps(2),
            &[ReplayStep::Execute {
                node: "Start".to_owned(),
                actions: vec![1, 3, 4],
                when_info: None,
            }]
        );
        let roll_hooks: Vec<&str> = profile
            .hooks
            .iter()
            .filter(|hook| hook.index == 3)
            .map(|hook| hook.node.as_str())
            .collect();
        assert_eq!(roll_hooks, ["Roll R", "Roll L"]);
    }

    #[test]
    fn mawlek_wake_variants_are_info_gated() {
        let profile = Catalog::builtin().get(EntityType::BroodingMawlek).unwrap();
        assert_eq!(profile.active_state, 1);
        assert_eq!(profile.dead_state, None);

        let wake = profile.hooks.iter().find(|h| h.node == "GG Wake").unwrap();
        assert_eq!(wake.index, 2);
        assert_eq!(wake.info, vec![1]);
        assert_eq!(wake.emit_state, Some(1));

        let steps = profile.replay_steps(2);
        let normal: Vec<_> = steps.iter().filter(|s| s.applies_to(&[0])).collect();
        let godhome: Vec<_> = steps.iter().filter(|s| s.applies_to(&[1])).collect();
        assert_eq!(normal.len(), 2);
        assert_eq!(godhome.len(), 1);
    }

    #[test]
    fn crawlid_uses_clip_hooks() {
        let profile = Catalog::builtin().get(EntityType::Crawlid).unwrap();
        assert!(profile.hooks.is_empty());
        assert_eq!(profile.clip_index("turn"), Some(1));
        assert_eq!(profile.clip_index("Turn"), None);
        assert_eq!(
            profile.replay_steps(1),
            &[ReplayStep::PlayClip {
                clip: "turn".to_owned(),
                when_info: None
            }]
        );
    }

    #[test]
    fn missing_replay_is_empty_slice() {
        let profile = Catalog::builtin().get(EntityType::Gruzzer).unwrap();
        assert!(profile.replay_steps(0).is_empty());
        assert!(profile.replay_steps(255).is_empty());
    }

    #[test]
    fn from_json_rejects_unknown_and_none_types() {
        let unknown = r#"{"profiles": {"Zote": {"graph": "g", "default_node": "n"}}}"#;
        assert!(matches!(
            Catalog::from_json(unknown),
            Err(SyncError::Catalog { .. })
        ));

        let none = r#"{"profiles": {"None": {"graph": "g", "default_node": "n"}}}"#;
        assert!(matches!(
            Catalog::from_json(none),
            Err(SyncError::Catalog { .. })
        ));
    }

    #[test]
    fn from_json_rejects_out_of_range_indices() {
        let json = r#"{"profiles": {"Obble": {
            "graph": "g",
            "default_node": "n",
            "animations": ["A"],
            "resume": {"4": "X"}
        }}}"#;
        match Catalog::from_json(json) {
            Err(SyncError::Catalog { reason }) => assert!(reason.contains("index 4"), "{reason}"),
            other => panic!("expected catalog error, got {other:?}"),
        }
    }

    #[test]
    fn from_json_rejects_dead_equal_to_active() {
        let json = r#"{"profiles": {"Obble": {
            "graph": "g", "default_node": "n", "active_state": 1, "dead_state": 1
        }}}"#;
        assert!(Catalog::from_json(json).is_err());
    }

    #[test]
    fn from_json_defaults_optional_tables() {
        let json = r#"{"profiles": {"Gulka": {"graph": "Plant Turret", "default_node": "Idle"}}}"#;
        let catalog = Catalog::from_json(json).unwrap();
        let profile = catalog.get(EntityType::Gulka).unwrap();
        assert_eq!(*profile, EntityProfile::minimal("Plant Turret", "Idle"));
    }

    #[test]
    fn replay_step_serializes_with_tag() {
        let step = ReplayStep::Execute {
            node: "Dig".to_owned(),
            actions: vec![3, 5],
            when_info: None,
        };
        let json = serde_json::to_string(&step).unwrap();
        assert_eq!(json, r#"{"step":"execute","node":"Dig","actions":[3,5]}"#);
    }
}
