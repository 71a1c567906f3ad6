//! Scene-level invariants checked after every step of random event sequences.
//!
//! # Invariants
//!
//! - While the phase is `Host` every registered entity is a scene host
//! - While the phase is `Client` every registered entity is a scene client
//! - While waiting for the scene status every entity is uninitialized
//! - With no scene loaded the registry is empty
//! - Only the scene host ever has outbound updates to drain

// Allow test-specific patterns that are appropriate for test code
#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]

use proptest::prelude::*;
use scene_sync::{AuthorityState, EntityUpdate, SceneController, SceneEvent, ScenePhase, Vec2};

use crate::common::stubs::{FakeGraph, GraphProbe};
use crate::common::{init_tracing, loaded_controller};

/// Engine names that all classify to distinct networked entities.
const NAMES: [&str; 4] = ["Crawler 1", "Roller 2", "Buzzer 1", "Zombie Runner 3"];

/// Nodes that carry hooks in the built-in profiles of the entities above.
const NODES: [&str; 3] = ["Chase Start", "Stop", "Idle"];

#[derive(Debug, Clone)]
enum Op {
    Enable(usize),
    EnterHost,
    EnterClient(Vec<(usize, u8)>),
    HostLeft,
    Update(usize, u8, u8),
    EnterNode(usize, usize),
    Unload,
    Load,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0..NAMES.len()).prop_map(Op::Enable),
        1 => Just(Op::EnterHost),
        1 => proptest::collection::vec((0..NAMES.len(), 0u8..4), 0..4).prop_map(Op::EnterClient),
        1 => Just(Op::HostLeft),
        3 => (0..NAMES.len(), 0u8..8, 0u8..4).prop_map(|(i, a, s)| Op::Update(i, a, s)),
        2 => (0..NAMES.len(), 0..NODES.len()).prop_map(|(i, n)| Op::EnterNode(i, n)),
        1 => Just(Op::Unload),
        1 => Just(Op::Load),
    ]
}

struct Harness {
    controller: SceneController,
    graphs: Vec<Option<GraphProbe>>,
}

impl Harness {
    fn new() -> Self {
        Self {
            controller: loaded_controller(&scene_sync::SyncConfig::default(), "Crossroads_01"),
            graphs: vec![None; NAMES.len()],
        }
    }

    fn key(index: usize) -> scene_sync::EntityKey {
        scene_sync::catalog::Classifier::default()
            .classify(NAMES[index])
            .unwrap()
    }

    fn apply(&mut self, op: Op) {
        match op {
            Op::Enable(index) => {
                let (graph, probe) = FakeGraph::boxed();
                if self.controller.entity_enabled(NAMES[index], graph).is_some() {
                    self.graphs[index] = Some(probe);
                }
            },
            Op::EnterHost => self.controller.handle_event(SceneEvent::EnterScene {
                scene_host: true,
                batch: Vec::new(),
            }),
            Op::EnterClient(entries) => {
                let batch = entries
                    .into_iter()
                    .map(|(index, state)| EntityUpdate::new(Self::key(index)).with_state(state))
                    .collect();
                self.controller.handle_event(SceneEvent::EnterScene {
                    scene_host: false,
                    batch,
                });
            },
            Op::HostLeft => self.controller.handle_event(SceneEvent::HostLeft),
            Op::Update(index, animation, state) => {
                let update = EntityUpdate::new(Self::key(index))
                    .with_position(Vec2::new(f32::from(animation), 0.0))
                    .with_animation(animation, &[])
                    .with_state(state);
                self.controller.handle_event(SceneEvent::Update(update));
            },
            Op::EnterNode(index, node) => {
                if let Some(probe) = &self.graphs[index] {
                    probe.enter(NODES[node]);
                }
            },
            Op::Unload => {
                self.controller.scene_unloaded();
                self.graphs = vec![None; NAMES.len()];
            },
            Op::Load => {
                self.controller.scene_loaded("Crossroads_01");
                self.graphs = vec![None; NAMES.len()];
            },
        }
    }

    fn check(&mut self) -> Result<(), TestCaseError> {
        let phase = self.controller.phase();
        let snapshots = self.controller.registry().snapshots();
        for snapshot in &snapshots {
            match phase {
                ScenePhase::Host => prop_assert_eq!(snapshot.authority, AuthorityState::SceneHost),
                ScenePhase::Client => prop_assert!(
                    snapshot.authority.is_client(),
                    "{} is {:?} on a client",
                    snapshot.key,
                    snapshot.authority
                ),
                ScenePhase::AwaitingStatus => {
                    prop_assert_eq!(snapshot.authority, AuthorityState::Uninitialized);
                },
                ScenePhase::Idle => {},
            }
        }
        if phase == ScenePhase::Idle {
            prop_assert!(snapshots.is_empty());
            prop_assert!(self.controller.host_snapshot().is_empty());
        }

        let outbound = self.controller.drain_outbound();
        if phase != ScenePhase::Host {
            prop_assert!(outbound.is_empty(), "{:?} emitted {:?}", phase, outbound);
        }
        Ok(())
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn phase_and_authority_stay_consistent(ops in proptest::collection::vec(op(), 1..40)) {
        init_tracing();
        let mut harness = Harness::new();
        harness.check()?;
        for op in ops {
            harness.apply(op);
            harness.check()?;
        }
    }

    #[test]
    fn client_promoted_by_host_left_never_goes_back(
        before in proptest::collection::vec(op(), 0..20),
        after in proptest::collection::vec(
            prop_oneof![
                (0..NAMES.len()).prop_map(Op::Enable),
                (0..NAMES.len(), 0u8..8, 0u8..4).prop_map(|(i, a, s)| Op::Update(i, a, s)),
                Just(Op::HostLeft),
                proptest::collection::vec((0..NAMES.len(), 0u8..4), 0..4).prop_map(Op::EnterClient),
            ],
            0..20,
        ),
    ) {
        init_tracing();
        let mut harness = Harness::new();
        for op in before {
            harness.apply(op);
        }
        if harness.controller.phase() == ScenePhase::Idle {
            harness.apply(Op::Load);
        }
        harness.apply(Op::HostLeft);
        prop_assert_eq!(harness.controller.phase(), ScenePhase::Host);
        for op in after {
            harness.apply(op);
            prop_assert_eq!(harness.controller.phase(), ScenePhase::Host);
            harness.check()?;
        }
    }
}
