//! Animation history reconciliation.
//!
//! Two directions:
//!
//! - **Resume** (client becomes host): the last animation the client saw tells
//!   us roughly where the host's graph was. [`resume_point`] maps it to the node
//!   the local graph should be forced to so it continues from there.
//! - **Replay** (client receives an animation): [`replay`] runs the side effects
//!   the host's graph produced when it played that animation, without letting
//!   the client's graph evaluate.

use tracing::trace;

use crate::catalog::{EntityProfile, ReplayStep};
use crate::entity::{BehaviorGraph, EntityKey};
use crate::report_violation_to;
use crate::telemetry::{ObserverHandle, ViolationKind, ViolationSeverity};

/// Where a new scene host resumes its behavior graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumePoint<'a> {
    /// The last animation has a resume entry.
    Mapped {
        /// Last animation index received.
        index: u8,
        /// Node mapped to it.
        node: &'a str,
    },
    /// No animation was ever received; the default node is used.
    NoHistory {
        /// The profile's default node.
        node: &'a str,
    },
    /// The last animation has no resume entry; the default node is used.
    Unmapped {
        /// Last animation index received.
        index: u8,
        /// The profile's default node.
        node: &'a str,
    },
}

impl<'a> ResumePoint<'a> {
    /// The node to force.
    #[must_use]
    pub const fn node(&self) -> &'a str {
        match *self {
            Self::Mapped { node, .. } | Self::NoHistory { node } | Self::Unmapped { node, .. } => {
                node
            },
        }
    }
}

/// Resolves where the graph resumes given the last animation index a client
/// received. Deterministic: the same profile and history always give the same
/// answer.
#[must_use]
pub fn resume_point(profile: &EntityProfile, last_animation: Option<u8>) -> ResumePoint<'_> {
    let default = profile.default_node.as_str();
    match last_animation {
        None => ResumePoint::NoHistory { node: default },
        Some(index) => match profile.resume.get(&index) {
            Some(node) => ResumePoint::Mapped {
                index,
                node: node.as_str(),
            },
            None => ResumePoint::Unmapped {
                index,
                node: default,
            },
        },
    }
}

/// Forces `graph` to the resume point for `last_animation` and returns it.
///
/// An unmapped index is reported as a [`ViolationKind::UnmappedAnimation`]
/// warning; the default node is still forced.
pub fn resume<'p>(
    graph: &mut dyn BehaviorGraph,
    profile: &'p EntityProfile,
    last_animation: Option<u8>,
    observer: Option<&ObserverHandle>,
    key: EntityKey,
) -> ResumePoint<'p> {
    let point = resume_point(profile, last_animation);
    if let ResumePoint::Unmapped { index, node } = point {
        let observer = observer.cloned();
        report_violation_to!(
            observer,
            key,
            ViolationSeverity::Warning,
            ViolationKind::UnmappedAnimation,
            "No resume node for animation {} ({}); falling back to {}",
            index,
            profile.animation_name(index).unwrap_or("unnamed"),
            node
        );
    }
    trace!(entity = %key, node = point.node(), "Resuming behavior graph");
    graph.force_node(point.node());
    point
}

/// Runs the replay steps for animation `index` on a client's graph. Returns
/// the number of steps executed.
pub fn replay(
    graph: &mut dyn BehaviorGraph,
    profile: &EntityProfile,
    index: u8,
    info: &[u8],
    key: EntityKey,
) -> usize {
    let steps = profile.replay_steps(index);
    if steps.is_empty() {
        trace!(entity = %key, index, "No replay steps for animation");
        return 0;
    }

    let mut executed = 0;
    for step in steps.iter().filter(|step| step.applies_to(info)) {
        match step {
            ReplayStep::Execute { node, actions, .. } => graph.execute_actions(node, actions),
            ReplayStep::PlayClip { clip, .. } => graph.play_clip(clip),
        }
        executed += 1;
    }
    executed
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
    use crate::catalog::Catalog;
    use crate::entity::{EntityType, InstanceId, NodeHook};
    use crate::network::wire::Vec2;
    use crate::telemetry::CollectingObserver;

    #[derive(Default)]
    struct RecordingGraph {
        calls: Vec<String>,
    }

    impl BehaviorGraph for RecordingGraph {
        fn set_driver_enabled(&mut self, enabled: bool) {
            self.calls.push(format!("driver {enabled}"));
        }
        fn force_node(&mut self, node: &str) {
            self.calls.push(format!("force {node}"));
        }
        fn execute_actions(&mut self, node: &str, actions: &[u8]) {
            self.calls.push(format!("exec {node} {actions:?}"));
        }
        fn play_clip(&mut self, clip: &str) {
            self.calls.push(format!("clip {clip}"));
        }
        fn set_active(&mut self, active: bool) {
            self.calls.push(format!("active {active}"));
        }
        fn set_position(&mut self, _position: Vec2) {}
        fn set_scale(&mut self, _flipped: bool) {}
        fn insert_hook(&mut self, _node: &str, _hook: NodeHook) {}
    }

    fn key(entity_type: EntityType) -> EntityKey {
        EntityKey::new(entity_type, InstanceId::new(1))
    }

    #[test]
    fn no_history_resumes_at_default() {
        let profile = Catalog::builtin().get(EntityType::Crawlid).unwrap();
        let point = resume_point(&profile, None);
        assert_eq!(point, ResumePoint::NoHistory { node: "Walk" });
    }

    #[test]
    fn mapped_index_resumes_at_its_node() {
        let profile = Catalog::builtin().get(EntityType::Baldur).unwrap();
        assert_eq!(
            resume_point(&profile, Some(1)),
            ResumePoint::Mapped {
                index: 1,
                node: "Rest"
            }
        );
        assert_eq!(resume_point(&profile, Some(4)).node(), "In Air");
    }

    #[test]
    fn unmapped_index_falls_back_and_warns() {
        let profile = Catalog::builtin().get(EntityType::Crawlid).unwrap();
        let collector = Arc::new(CollectingObserver::new());
        let observer: ObserverHandle = collector.clone();
        let mut graph = RecordingGraph::default();

        let point = resume(
            &mut graph,
            &profile,
            Some(2),
            Some(&observer),
            key(EntityType::Crawlid),
        );

        assert_eq!(point, ResumePoint::Unmapped { index: 2, node: "Walk" });
        assert_eq!(graph.calls, ["force Walk"]);
        let warnings = collector.violations_of_kind(ViolationKind::UnmappedAnimation);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].message.contains("Idle"), "{}", warnings[0].message);
    }

    #[test]
    fn resume_is_deterministic() {
        let profile = Catalog::builtin().get(EntityType::HuskGuard).unwrap();
        for index in [None, Some(0), Some(8), Some(200)] {
            assert_eq!(resume_point(&profile, index), resume_point(&profile, index));
        }
    }

    #[test]
    fn replay_executes_steps_in_order() {
        let profile = Catalog::builtin().get(EntityType::Baldur).unwrap();
        let mut graph = RecordingGraph::default();
        let executed = replay(&mut graph, &profile, 1, &[], key(EntityType::Baldur));
        assert_eq!(executed, 1);
        assert_eq!(graph.calls, ["exec Stop [1, 2, 4, 5]"]);
    }

    #[test]
    fn replay_filters_on_info() {
        let profile = Catalog::builtin().get(EntityType::BroodingMawlek).unwrap();
        let mut graph = RecordingGraph::default();
        let k = key(EntityType::BroodingMawlek);

        assert_eq!(replay(&mut graph, &profile, 2, &[0], k), 2);
        assert_eq!(graph.calls, ["exec Wake [1, 3]", "exec GG Wake [1]"]);

        graph.calls.clear();
        assert_eq!(replay(&mut graph, &profile, 2, &[1], k), 1);
        assert_eq!(graph.calls, ["exec GG Wake [1]"]);
    }

    #[test]
    fn replay_plays_clips() {
        let profile = Catalog::builtin().get(EntityType::Crawlid).unwrap();
        let mut graph = RecordingGraph::default();
        replay(&mut graph, &profile, 0, &[], key(EntityType::Crawlid));
        assert_eq!(graph.calls, ["clip walk"]);
    }

    #[test]
    fn replay_without_steps_is_a_no_op() {
        let profile = Catalog::builtin().get(EntityType::Gruzzer).unwrap();
        let mut graph = RecordingGraph::default();
        assert_eq!(replay(&mut graph, &profile, 9, &[], key(EntityType::Gruzzer)), 0);
        assert!(graph.calls.is_empty());
    }
}
