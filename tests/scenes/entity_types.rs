//! Per-type checks over the built-in catalog and classifier.
//!
//! Every networked type is driven through the same lifecycle: classify its
//! engine name, host it and fire every hook, then mirror it as a client and
//! take over with no history.

// Allow test-specific patterns that are appropriate for test code
#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]

use std::collections::BTreeSet;

use crate::common::{enable, enter_as_client, enter_as_host, key, loaded_controller};
use scene_sync::{
    Catalog, Classifier, EntityType, EntityUpdate, SceneEvent, SyncConfig, SyncEntity,
};

fn check_hosting(entity_type: EntityType, raw_name: &str, id: u8) {
    let expected = key(entity_type, id);
    assert_eq!(Classifier::default().classify(raw_name), Some(expected));

    let profile = Catalog::builtin().get(entity_type).unwrap();
    profile.validate(entity_type).unwrap();

    let mut controller = loaded_controller(&SyncConfig::default(), "Types");
    let (registered, probe) = enable(&mut controller, raw_name);
    assert_eq!(registered, expected);
    enter_as_host(&mut controller);
    assert_eq!(
        controller.drain_outbound(),
        vec![EntityUpdate::new(expected).with_state(profile.active_state)]
    );

    let nodes: BTreeSet<&str> = profile.hooks.iter().map(|h| h.node.as_str()).collect();
    for node in nodes {
        probe.enter(node);
    }
    let emitted = controller.drain_outbound();
    assert_eq!(emitted.len(), profile.hooks.len());
    for update in &emitted {
        let index = update.animation.as_ref().unwrap().index;
        assert!(profile.hooks.iter().any(|h| h.index == index));
    }

    controller
        .registry_mut()
        .get_mut(&expected)
        .unwrap()
        .on_death();
    let death = controller.drain_outbound();
    match profile.dead_state {
        Some(dead) => assert_eq!(death, vec![EntityUpdate::new(expected).with_state(dead)]),
        None => assert!(death.is_empty()),
    }
}

fn check_takeover(entity_type: EntityType, raw_name: &str, id: u8) {
    let expected = key(entity_type, id);
    let profile = Catalog::builtin().get(entity_type).unwrap();

    let mut controller = loaded_controller(&SyncConfig::default(), "Types");
    let (_, probe) = enable(&mut controller, raw_name);
    enter_as_client(
        &mut controller,
        vec![EntityUpdate::new(expected).with_state(profile.active_state)],
    );
    assert_eq!(probe.driver_enabled(), Some(false));
    assert_eq!(probe.active(), None);

    controller.handle_event(SceneEvent::HostLeft);
    assert_eq!(probe.forced_nodes(), vec![profile.default_node.clone()]);
    assert_eq!(probe.driver_enabled(), Some(true));

    if let Some(dead) = profile.dead_state {
        let mut late = loaded_controller(&SyncConfig::default(), "Types");
        enter_as_client(&mut late, vec![EntityUpdate::new(expected).with_state(dead)]);
        let (_, probe) = enable(&mut late, raw_name);
        assert_eq!(probe.active(), Some(false));
    }
}

macro_rules! entity_type_tests {
    ($($ty:ident => $raw:literal # $id:literal,)+) => {
        pastey::paste! {
            $(
                #[test]
                fn [<$ty:snake _hosts_and_emits_from_hooks>]() {
                    check_hosting(EntityType::$ty, $raw, $id);
                }

                #[test]
                fn [<$ty:snake _mirrors_and_takes_over>]() {
                    check_takeover(EntityType::$ty, $raw, $id);
                }
            )+

            #[test]
            fn every_networked_type_is_covered() {
                let covered = [$(EntityType::$ty,)+];
                let catalogued: Vec<EntityType> = Catalog::builtin().types().collect();
                assert_eq!(covered.len(), catalogued.len());
                for entity_type in covered {
                    assert!(catalogued.contains(&entity_type), "{entity_type} not catalogued");
                }
            }
        }
    };
}

entity_type_tests! {
    Crawlid => "Crawler 1" # 1,
    Baldur => "Roller 2" # 2,
    ElderBaldur => "Blocker 1" # 1,
    Tiktik => "Climber 3" # 3,
    Gruzzer => "Fly (2)" # 2,
    GruzMother => "Giant Fly" # 0,
    Vengefly => "Buzzer 4" # 4,
    AspidHunter => "Spitter 1" # 1,
    AspidMother => "Hatcher 2" # 2,
    Goam => "Worm 5" # 5,
    WanderingHusk => "Zombie Runner 1" # 1,
    HuskBully => "Zombie Barger 2" # 2,
    LeapingHusk => "Zombie Leaper 1" # 1,
    HuskHornhead => "Zombie Hornhead (3)" # 3,
    HuskWarrior => "Zombie Shield 1" # 1,
    HuskGuard => "Zombie Guard" # 0,
    Mosscreep => "Moss Walker 2" # 2,
    Mosskin => "Mossman_Runner 1" # 1,
    VolatileMosskin => "Mossman_Shaker 2" # 2,
    MossKnight => "Moss Knight 1" # 1,
    MossCharger => "Mega Moss Charger" # 0,
    FoolEater => "Plant Trap 3" # 3,
    Gulka => "Plant Turret 1" # 1,
    Squit => "Mosquito 6" # 6,
    Obble => "Fat Fly 2" # 2,
    Durandoo => "Acid Walker 1" # 1,
    Duranda => "Acid Flyer 2" # 2,
    BroodingMawlek => "Mawlek Body" # 0,
    FalseKnight => "False Knight New" # 0,
}
