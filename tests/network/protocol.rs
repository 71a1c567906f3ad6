//! Transport behavior over an in-memory network.
//!
//! Each test builds a host endpoint and a client endpoint on a
//! [`LoopbackNet`], delivers the scene status so updates may flow, and then
//! manipulates the network (drops, reordering, injected datagrams) to check
//! what the client ends up applying.

// Allow test-specific patterns that are appropriate for test code
#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]

use crate::common::stubs::{Addr, LoopbackNet, LoopbackSocket};
use crate::common::{collector, init_tracing, key};
use scene_sync::network::messages::{
    AckPacket, Message, MessageBody, MessageHeader, ReliableEntry, UpdatePacket,
};
use scene_sync::telemetry::ViolationKind;
use scene_sync::{
    EntityType, EntityUpdate, SceneEvent, SyncConfig, SyncError, SyncProtocol, Vec2,
};
use web_time::Instant;

const HOST: Addr = 1;
const CLIENT: Addr = 2;

type Endpoint = SyncProtocol<Addr, LoopbackSocket>;

fn pair_with(net: &LoopbackNet, config: &SyncConfig) -> (Endpoint, Endpoint) {
    init_tracing();
    let mut host = SyncProtocol::new(net.socket(HOST), config).unwrap();
    host.add_peer(CLIENT);
    let mut client = SyncProtocol::new(net.socket(CLIENT), config).unwrap();
    client.add_peer(HOST);
    (host, client)
}

fn pair(net: &LoopbackNet) -> (Endpoint, Endpoint) {
    pair_with(net, &SyncConfig::default())
}

/// Delivers an empty client scene status and its acknowledgement.
fn establish(host: &mut Endpoint, client: &mut Endpoint, now: Instant) {
    host.send_scene_status(&CLIENT, false, &[]).unwrap();
    host.flush(now);
    let events = client.poll(now);
    assert!(
        matches!(
            events.as_slice(),
            [SceneEvent::EnterScene {
                scene_host: false,
                ..
            }]
        ),
        "{events:?}"
    );
    host.poll(now);
    assert_eq!(host.pending_control(&CLIENT), 0);
}

fn message(body: MessageBody) -> Message {
    Message {
        header: MessageHeader {
            magic: SyncConfig::default().magic,
        },
        body,
    }
}

#[test]
fn reordered_reliable_animations_apply_only_the_latest() {
    let net = LoopbackNet::new();
    let (mut host, mut client) = pair(&net);
    let t0 = Instant::now();
    establish(&mut host, &mut client, t0);
    let vengefly = key(EntityType::Vengefly, 1);

    host.send_update(&EntityUpdate::new(vengefly).with_animation(1, &[]))
        .unwrap();
    host.flush(t0);
    host.send_update(&EntityUpdate::new(vengefly).with_animation(2, &[]))
        .unwrap();
    host.flush(t0);
    assert_eq!(net.pending(CLIENT), 2);

    net.reverse_pending(CLIENT);
    let events = client.poll(t0);

    assert_eq!(
        events,
        vec![SceneEvent::Update(
            EntityUpdate::new(vengefly).with_animation(2, &[])
        )]
    );

    host.poll(t0);
    assert_eq!(host.pending_reliable(&CLIENT), 0);
}

#[test]
fn in_order_reliable_animations_are_all_applied() {
    let net = LoopbackNet::new();
    let (mut host, mut client) = pair(&net);
    let t0 = Instant::now();
    establish(&mut host, &mut client, t0);
    let vengefly = key(EntityType::Vengefly, 1);

    host.send_update(&EntityUpdate::new(vengefly).with_animation(1, &[]))
        .unwrap();
    host.flush(t0);
    host.send_update(&EntityUpdate::new(vengefly).with_animation(2, &[]))
        .unwrap();
    host.flush(t0);

    let events = client.poll(t0);
    assert_eq!(
        events,
        vec![
            SceneEvent::Update(EntityUpdate::new(vengefly).with_animation(1, &[])),
            SceneEvent::Update(EntityUpdate::new(vengefly).with_animation(2, &[])),
        ]
    );
}

#[test]
fn superseded_update_is_never_sent() {
    let net = LoopbackNet::new();
    let (mut host, mut client) = pair(&net);
    let t0 = Instant::now();
    establish(&mut host, &mut client, t0);
    let baldur = key(EntityType::Baldur, 1);

    host.send_update(&EntityUpdate::new(baldur).with_state(0))
        .unwrap();
    host.send_update(&EntityUpdate::new(baldur).with_state(1))
        .unwrap();
    assert_eq!(host.pending_reliable(&CLIENT), 1);
    host.flush(t0);

    assert_eq!(
        client.poll(t0),
        vec![SceneEvent::Update(EntityUpdate::new(baldur).with_state(1))]
    );
}

#[test]
fn lost_reliable_update_is_resent_until_acked() {
    let net = LoopbackNet::new();
    let (mut host, mut client) = pair(&net);
    let t0 = Instant::now();
    let resend = SyncConfig::default().resend_interval;
    establish(&mut host, &mut client, t0);
    let baldur = key(EntityType::Baldur, 2);

    host.send_update(&EntityUpdate::new(baldur).with_state(1))
        .unwrap();
    net.drop_next(1);
    assert_eq!(host.flush(t0), 1);
    assert!(client.poll(t0).is_empty());

    assert_eq!(host.flush(t0 + resend / 2), 0, "not due yet");
    assert_eq!(host.flush(t0 + resend), 1);

    assert_eq!(
        client.poll(t0 + resend),
        vec![SceneEvent::Update(EntityUpdate::new(baldur).with_state(1))]
    );
    host.poll(t0 + resend);
    assert_eq!(host.pending_reliable(&CLIENT), 0);
    assert_eq!(net.counters(), (5, 1));
}

#[test]
fn unreliable_fields_are_coalesced_and_never_resent() {
    let net = LoopbackNet::new();
    let (mut host, mut client) = pair(&net);
    let t0 = Instant::now();
    let resend = SyncConfig::default().resend_interval;
    establish(&mut host, &mut client, t0);
    let crawlid = key(EntityType::Crawlid, 1);

    host.send_update(&EntityUpdate::new(crawlid).with_position(Vec2::new(1.0, 1.0)))
        .unwrap();
    host.send_update(
        &EntityUpdate::new(crawlid)
            .with_position(Vec2::new(2.0, 2.0))
            .with_scale(true),
    )
    .unwrap();
    net.drop_next(1);
    assert_eq!(host.flush(t0), 1);
    assert_eq!(host.flush(t0 + resend), 0);
    assert!(client.poll(t0 + resend).is_empty());

    host.send_update(&EntityUpdate::new(crawlid).with_position(Vec2::new(3.0, 3.0)))
        .unwrap();
    host.flush(t0 + resend);
    assert_eq!(
        client.poll(t0 + resend),
        vec![SceneEvent::Update(
            EntityUpdate::new(crawlid).with_position(Vec2::new(3.0, 3.0))
        )]
    );
}

#[test]
fn older_position_packet_is_dropped() {
    let net = LoopbackNet::new();
    let (mut host, mut client) = pair(&net);
    let t0 = Instant::now();
    establish(&mut host, &mut client, t0);
    let crawlid = key(EntityType::Crawlid, 1);

    host.send_update(&EntityUpdate::new(crawlid).with_position(Vec2::new(1.0, 0.0)))
        .unwrap();
    host.flush(t0);
    host.send_update(&EntityUpdate::new(crawlid).with_position(Vec2::new(2.0, 0.0)))
        .unwrap();
    host.flush(t0);
    net.reverse_pending(CLIENT);

    assert_eq!(
        client.poll(t0),
        vec![SceneEvent::Update(
            EntityUpdate::new(crawlid).with_position(Vec2::new(2.0, 0.0))
        )]
    );
}

#[test]
fn mixed_update_is_split_by_reliability() {
    let net = LoopbackNet::new();
    let (mut host, mut client) = pair(&net);
    let t0 = Instant::now();
    establish(&mut host, &mut client, t0);
    let tiktik = key(EntityType::Tiktik, 3);

    host.send_update(
        &EntityUpdate::new(tiktik)
            .with_position(Vec2::new(4.0, 5.0))
            .with_animation(0, &[])
            .with_state(0),
    )
    .unwrap();
    assert_eq!(host.pending_reliable(&CLIENT), 2);
    assert_eq!(host.flush(t0), 1);

    let events = client.poll(t0);
    assert_eq!(
        events,
        vec![
            SceneEvent::Update(EntityUpdate::new(tiktik).with_animation(0, &[])),
            SceneEvent::Update(EntityUpdate::new(tiktik).with_state(0)),
            SceneEvent::Update(EntityUpdate::new(tiktik).with_position(Vec2::new(4.0, 5.0))),
        ]
    );
}

#[test]
fn updates_wait_for_the_scene_status_ack() {
    let net = LoopbackNet::new();
    let (mut host, mut client) = pair(&net);
    let t0 = Instant::now();
    let baldur = key(EntityType::Baldur, 2);
    let batch = vec![EntityUpdate::new(baldur)
        .with_state(1)
        .with_position(Vec2::new(-3.0, 12.5))];

    host.send_scene_status(&CLIENT, false, &batch).unwrap();
    host.send_update(&EntityUpdate::new(baldur).with_scale(false))
        .unwrap();
    assert_eq!(host.flush(t0), 1, "only the scene status goes out");

    assert_eq!(
        client.poll(t0),
        vec![SceneEvent::EnterScene {
            scene_host: false,
            batch
        }]
    );
    host.poll(t0);
    assert_eq!(host.flush(t0), 1);
    assert_eq!(
        client.poll(t0),
        vec![SceneEvent::Update(EntityUpdate::new(baldur).with_scale(false))]
    );
}

#[test]
fn duplicate_scene_status_is_applied_once() {
    let net = LoopbackNet::new();
    let (mut host, mut client) = pair(&net);
    let t0 = Instant::now();
    let resend = SyncConfig::default().resend_interval;

    host.send_scene_status(&CLIENT, true, &[]).unwrap();
    host.flush(t0);
    net.drop_next(1);
    assert_eq!(client.poll(t0).len(), 1, "ack is lost");
    host.poll(t0);
    assert_eq!(host.pending_control(&CLIENT), 1);

    assert_eq!(host.flush(t0 + resend), 1);
    assert!(client.poll(t0 + resend).is_empty());
    host.poll(t0 + resend);
    assert_eq!(host.pending_control(&CLIENT), 0);
}

#[test]
fn scene_status_is_applied_after_a_long_session() {
    let net = LoopbackNet::new();
    let (mut host, mut client) = pair(&net);
    let t0 = Instant::now();
    establish(&mut host, &mut client, t0);
    let crawlid = key(EntityType::Crawlid, 0);

    for index in 0..40_000u32 {
        host.send_update(&EntityUpdate::new(crawlid).with_animation((index % 5) as u8, &[]))
            .unwrap();
    }
    host.send_scene_status(&CLIENT, true, &[]).unwrap();
    assert_eq!(host.flush(t0), 1);

    assert_eq!(
        client.poll(t0),
        vec![SceneEvent::EnterScene {
            scene_host: true,
            batch: Vec::new()
        }]
    );
    host.poll(t0);
    assert_eq!(host.pending_control(&CLIENT), 0);
}

#[test]
fn quiet_entity_state_arrives_after_a_long_gap() {
    let net = LoopbackNet::new();
    let (mut host, mut client) = pair(&net);
    let t0 = Instant::now();
    establish(&mut host, &mut client, t0);
    let quiet = key(EntityType::Baldur, 1);
    let busy = key(EntityType::Baldur, 2);

    host.send_update(&EntityUpdate::new(quiet).with_state(0))
        .unwrap();
    host.flush(t0);
    assert_eq!(client.poll(t0).len(), 1);
    host.poll(t0);

    for index in 0..40_000u32 {
        host.send_update(&EntityUpdate::new(busy).with_animation((index % 5) as u8, &[]))
            .unwrap();
    }
    host.flush(t0);
    assert_eq!(client.poll(t0).len(), 1);
    host.poll(t0);

    host.send_update(&EntityUpdate::new(quiet).with_state(1))
        .unwrap();
    host.flush(t0);
    assert_eq!(
        client.poll(t0),
        vec![SceneEvent::Update(EntityUpdate::new(quiet).with_state(1))]
    );
}

#[test]
fn host_transfer_becomes_host_left() {
    let net = LoopbackNet::new();
    let (mut host, mut client) = pair(&net);
    let t0 = Instant::now();
    establish(&mut host, &mut client, t0);

    host.send_host_transfer(&CLIENT).unwrap();
    host.flush(t0);

    assert_eq!(client.poll(t0), vec![SceneEvent::HostLeft]);
}

#[test]
fn foreign_and_unknown_senders_are_reported_and_dropped() {
    let net = LoopbackNet::new();
    let (_host, client) = pair(&net);
    let (collector, handle) = collector();
    let mut client = client.with_observer(handle);
    let t0 = Instant::now();

    net.inject(
        HOST,
        CLIENT,
        Message {
            header: MessageHeader { magic: 0x1234 },
            body: MessageBody::KeepAlive,
        },
    );
    net.inject(77, CLIENT, message(MessageBody::KeepAlive));

    assert!(client.poll(t0).is_empty());
    assert_eq!(collector.violations_of_kind(ViolationKind::Transport).len(), 2);
    assert_eq!(client.last_received(&HOST), None);
    assert_eq!(net.pending(77), 0, "nothing is acked to strangers");
}

#[test]
fn malformed_reliable_entry_is_reported_and_still_acked() {
    let net = LoopbackNet::new();
    let (_host, client) = pair(&net);
    let (collector, handle) = collector();
    let mut client = client.with_observer(handle);
    let t0 = Instant::now();

    net.inject(
        HOST,
        CLIENT,
        message(MessageBody::Updates(UpdatePacket {
            sequence: 0,
            reliable: vec![ReliableEntry {
                sequence: 9,
                bytes: vec![0xFF],
            }],
            unreliable: vec![vec![0x01]],
        })),
    );

    assert!(client.poll(t0).is_empty());
    assert_eq!(
        collector
            .violations_of_kind(ViolationKind::MalformedMessage)
            .len(),
        2
    );
    let acks = net.intercept(HOST);
    assert_eq!(
        acks,
        vec![(
            CLIENT,
            message(MessageBody::Ack(AckPacket { sequences: vec![9] }))
        )]
    );
}

#[test]
fn idle_peer_gets_keepalives() {
    let net = LoopbackNet::new();
    let (mut host, mut client) = pair(&net);
    let t0 = Instant::now();
    let keepalive = SyncConfig::default().keepalive_interval;

    assert_eq!(host.flush(t0), 1);
    assert_eq!(host.flush(t0), 0);
    assert_eq!(host.flush(t0 + keepalive), 1);

    assert!(client.poll(t0 + keepalive).is_empty());
    assert_eq!(client.last_received(&HOST), Some(t0 + keepalive));
}

#[test]
fn full_reliable_outbox_evicts_the_oldest_slot() {
    let net = LoopbackNet::new();
    let config = SyncConfig {
        max_pending_reliable: 2,
        ..SyncConfig::default()
    };
    let (host, mut client) = pair_with(&net, &config);
    let (collector, handle) = collector();
    let mut host = host.with_observer(handle);
    let t0 = Instant::now();
    establish(&mut host, &mut client, t0);

    for id in 1..=3 {
        host.send_update(&EntityUpdate::new(key(EntityType::Squit, id)).with_state(0))
            .unwrap();
    }

    assert_eq!(host.pending_reliable(&CLIENT), 2);
    let stale = collector.violations_of_kind(ViolationKind::StaleUpdate);
    assert_eq!(stale.len(), 1);
    assert_eq!(stale[0].entity, Some(key(EntityType::Squit, 1)));
}

#[test]
fn peers_are_managed_explicitly() {
    let net = LoopbackNet::new();
    let (mut host, _client) = pair(&net);
    let crawlid = key(EntityType::Crawlid, 1);

    assert!(!host.add_peer(CLIENT));
    assert!(host.add_peer(3));
    assert_eq!(host.peers().copied().collect::<Vec<_>>(), vec![CLIENT, 3]);

    let err = host
        .send_update_to(&99, &EntityUpdate::new(crawlid).with_state(0))
        .unwrap_err();
    assert!(matches!(err, SyncError::Socket { .. }), "{err}");
    assert!(host.send_scene_status(&99, false, &[]).is_err());
    assert!(host.send_host_transfer(&99).is_err());

    assert!(host.remove_peer(&3));
    assert!(!host.has_peer(&3));
}
