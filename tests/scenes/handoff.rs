//! Host hand-off: a client takes over mid-scene and resumes each behavior
//! graph from the animation history it mirrored.

// Allow test-specific patterns that are appropriate for test code
#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]

use crate::common::{
    enable, enter_as_client, enter_as_host, key, loaded_controller, observed_controller,
};
use scene_sync::telemetry::{ViolationKind, ViolationSeverity};
use scene_sync::{
    AuthorityState, EntityType, EntityUpdate, SceneEvent, ScenePhase, SyncConfig, SyncEntity,
};

#[test]
fn entity_without_history_resumes_at_default_node() {
    let (mut controller, collector) = observed_controller("Crossroads_01");
    let (crawlid, probe) = enable(&mut controller, "Crawler 1");
    enter_as_client(&mut controller, Vec::new());
    collector.clear();

    controller.handle_event(SceneEvent::HostLeft);

    assert_eq!(controller.phase(), ScenePhase::Host);
    assert_eq!(probe.forced_nodes(), vec!["Walk".to_owned()]);
    assert_eq!(probe.driver_enabled(), Some(true));
    assert_eq!(
        controller.registry().get(&crawlid).unwrap().authority(),
        AuthorityState::SceneHost
    );
    assert!(collector.is_empty());
}

#[test]
fn last_animation_selects_the_resume_node() {
    let mut controller = loaded_controller(&SyncConfig::default(), "Crossroads_07");
    let (vengefly, probe) = enable(&mut controller, "Buzzer 1");
    enter_as_client(&mut controller, Vec::new());

    controller.handle_event(SceneEvent::Update(
        EntityUpdate::new(vengefly).with_animation(1, &[]),
    ));
    controller.handle_event(SceneEvent::Update(
        EntityUpdate::new(vengefly).with_animation(2, &[]),
    ));
    controller.handle_event(SceneEvent::HostLeft);

    assert_eq!(probe.forced_nodes(), vec!["Chase - In Sight".to_owned()]);
}

#[test]
fn unmapped_animation_falls_back_to_default_with_warning() {
    let (mut controller, collector) = observed_controller("Crossroads_07");
    let (vengefly, probe) = enable(&mut controller, "Buzzer 1");
    enter_as_client(&mut controller, Vec::new());

    controller.handle_event(SceneEvent::Update(
        EntityUpdate::new(vengefly).with_animation(200, &[]),
    ));
    controller.handle_event(SceneEvent::HostLeft);

    assert_eq!(probe.forced_nodes(), vec!["Idle".to_owned()]);
    let unmapped = collector.violations_of_kind(ViolationKind::UnmappedAnimation);
    assert_eq!(unmapped.len(), 1);
    assert_eq!(unmapped[0].severity, ViolationSeverity::Warning);
    assert_eq!(unmapped[0].entity, Some(vengefly));
}

#[test]
fn dead_entity_takes_authority_without_resuming() {
    let mut controller = loaded_controller(&SyncConfig::default(), "Crossroads_04");
    let baldur = key(EntityType::Baldur, 2);
    enter_as_client(&mut controller, vec![EntityUpdate::new(baldur).with_state(1)]);
    let (_, probe) = enable(&mut controller, "Roller 2");

    controller.handle_event(SceneEvent::HostLeft);

    assert!(probe.forced_nodes().is_empty());
    assert_eq!(probe.driver_enabled(), Some(true));
    assert!(controller
        .registry()
        .get(&baldur)
        .unwrap()
        .authority()
        .is_host());
}

#[test]
fn new_host_hooks_start_emitting() {
    let mut controller = loaded_controller(&SyncConfig::default(), "Crossroads_07");
    let (vengefly, probe) = enable(&mut controller, "Buzzer 1");
    enter_as_client(&mut controller, Vec::new());

    probe.enter("Stop");
    assert!(controller.drain_outbound().is_empty());

    controller.handle_event(SceneEvent::HostLeft);
    assert!(
        controller.drain_outbound().is_empty(),
        "taking over does not re-announce state"
    );

    probe.enter("Stop");
    assert_eq!(
        controller.drain_outbound(),
        vec![EntityUpdate::new(vengefly).with_animation(5, &[])]
    );
    assert_eq!(
        controller
            .host_snapshot()
            .get(&vengefly)
            .and_then(|u| u.animation.as_ref())
            .map(|a| a.index),
        Some(5)
    );
}

#[test]
fn host_left_before_status_enters_as_host() {
    let mut controller = loaded_controller(&SyncConfig::default(), "Crossroads_01");
    let (crawlid, probe) = enable(&mut controller, "Crawler 1");

    controller.handle_event(SceneEvent::HostLeft);

    assert_eq!(controller.phase(), ScenePhase::Host);
    assert!(probe.forced_nodes().is_empty(), "a fresh host starts normally");
    assert_eq!(
        controller.drain_outbound(),
        vec![EntityUpdate::new(crawlid).with_state(0)]
    );
}

#[test]
fn host_left_while_host_is_ignored() {
    let mut controller = loaded_controller(&SyncConfig::default(), "Crossroads_01");
    let (_, probe) = enable(&mut controller, "Crawler 1");
    enter_as_host(&mut controller);
    probe.clear_calls();

    controller.handle_event(SceneEvent::HostLeft);

    assert_eq!(controller.phase(), ScenePhase::Host);
    assert!(probe.calls().is_empty());
}

#[test]
fn late_scene_status_after_takeover_is_rejected() {
    let (mut controller, collector) = observed_controller("Crossroads_01");
    let (crawlid, _probe) = enable(&mut controller, "Crawler 1");
    enter_as_client(&mut controller, Vec::new());
    controller.handle_event(SceneEvent::HostLeft);
    collector.clear();

    enter_as_client(&mut controller, Vec::new());

    assert!(collector.has_violation(ViolationKind::SceneTransition));
    assert!(controller
        .registry()
        .get(&crawlid)
        .unwrap()
        .authority()
        .is_host());
}

#[test]
fn host_snapshot_seeds_a_joining_client() {
    let mut host = loaded_controller(&SyncConfig::default(), "Crossroads_04");
    let (baldur, _) = enable(&mut host, "Roller 2");
    let (crawlid, _) = enable(&mut host, "Crawler 1");
    enter_as_host(&mut host);
    host.registry_mut().get_mut(&baldur).unwrap().on_death();
    let _ = host.drain_outbound();

    let batch = host.scene_entry_batch();
    assert_eq!(batch.len(), 2);

    let mut client = loaded_controller(&SyncConfig::default(), "Crossroads_04");
    enter_as_client(&mut client, batch);
    let (_, dead) = enable(&mut client, "Roller 2");
    let (_, alive) = enable(&mut client, "Crawler 1");

    assert_eq!(dead.active(), Some(false));
    assert_eq!(alive.active(), None);
    assert_eq!(
        client.registry().get(&crawlid).unwrap().authority(),
        AuthorityState::SceneClient {
            last_known_state: Some(0)
        }
    );
}
