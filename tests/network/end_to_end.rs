//! Two full peers, each a [`SceneController`] behind a [`SyncProtocol`],
//! exchanging a scene over an in-memory network.

// Allow test-specific patterns that are appropriate for test code
#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]

use crate::common::stubs::{Addr, GraphCall, LoopbackNet, LoopbackSocket};
use crate::common::{enable, enter_as_host, loaded_controller};
use scene_sync::{
    EntityKey, SceneController, ScenePhase, SyncConfig, SyncEntity, SyncProtocol, Vec2,
};
use web_time::{Duration, Instant};

const HOST: Addr = 1;
const CLIENT: Addr = 2;
const TICK: Duration = Duration::from_millis(20);

struct Peer {
    controller: SceneController,
    protocol: SyncProtocol<Addr, LoopbackSocket>,
}

impl Peer {
    fn new(net: &LoopbackNet, addr: Addr, remote: Addr, scene: &str) -> Self {
        let config = SyncConfig::default();
        let controller = loaded_controller(&config, scene);
        let mut protocol = SyncProtocol::new(net.socket(addr), &config).unwrap();
        protocol.add_peer(remote);
        Self {
            controller,
            protocol,
        }
    }

    /// One engine frame: apply what arrived, send what entities emitted.
    fn tick(&mut self, now: Instant) {
        for event in self.protocol.poll(now) {
            self.controller.handle_event(event);
        }
        for update in self.controller.drain_outbound() {
            self.protocol.send_update(&update).unwrap();
        }
        self.protocol.flush(now);
    }

    fn entity(&mut self, key: &EntityKey) -> &mut (dyn SyncEntity + 'static) {
        self.controller.registry_mut().get_mut(key).unwrap()
    }
}

fn run(host: &mut Peer, client: &mut Peer, mut now: Instant, ticks: u32) -> Instant {
    for _ in 0..ticks {
        now += TICK;
        host.tick(now);
        client.tick(now);
    }
    now
}

/// Makes `host` the scene host and sends `CLIENT` its scene status.
fn host_scene(host: &mut Peer) {
    enter_as_host(&mut host.controller);
    let _ = host.controller.drain_outbound();
    let batch = host.controller.scene_entry_batch();
    host.protocol
        .send_scene_status(&CLIENT, false, &batch)
        .unwrap();
}

#[test]
fn client_mirrors_the_host_and_takes_over() {
    let net = LoopbackNet::new();
    let mut host = Peer::new(&net, HOST, CLIENT, "Crossroads_07");
    let mut client = Peer::new(&net, CLIENT, HOST, "Crossroads_07");

    let (vengefly, host_graph) = enable(&mut host.controller, "Buzzer 1");
    host_scene(&mut host);
    let (_, client_graph) = enable(&mut client.controller, "Buzzer 1");

    let mut now = run(&mut host, &mut client, Instant::now(), 3);
    assert_eq!(client.controller.phase(), ScenePhase::Client);
    assert_eq!(client_graph.driver_enabled(), Some(false));

    host_graph.enter("Chase Start");
    host.entity(&vengefly).send_position(Vec2::new(5.0, 6.0));
    now = run(&mut host, &mut client, now, 3);

    let calls = client_graph.calls();
    assert!(calls.contains(&GraphCall::Execute("Chase Start".to_owned(), vec![1, 2, 3])));
    assert!(calls.contains(&GraphCall::Position(Vec2::new(5.0, 6.0))));
    assert_eq!(host.protocol.pending_reliable(&CLIENT), 0);

    host.protocol.send_host_transfer(&CLIENT).unwrap();
    now = run(&mut host, &mut client, now, 3);

    assert_eq!(client.controller.phase(), ScenePhase::Host);
    assert_eq!(client_graph.forced_nodes(), vec!["Chase - In Sight".to_owned()]);
    assert_eq!(client_graph.driver_enabled(), Some(true));

    client_graph.enter("Stop");
    run(&mut host, &mut client, now, 1);
    let merged = client.controller.host_snapshot().get(&vengefly).unwrap();
    assert_eq!(merged.animation.as_ref().map(|a| a.index), Some(5));
}

#[test]
fn lossy_start_still_converges() {
    let net = LoopbackNet::new();
    let mut host = Peer::new(&net, HOST, CLIENT, "Crossroads_04");
    let mut client = Peer::new(&net, CLIENT, HOST, "Crossroads_04");

    let (baldur, _) = enable(&mut host.controller, "Roller 2");
    let (crawlid, _) = enable(&mut host.controller, "Crawler 1");
    enter_as_host(&mut host.controller);
    host.entity(&baldur).on_death();
    let _ = host.controller.drain_outbound();
    let batch = host.controller.scene_entry_batch();
    host.protocol
        .send_scene_status(&CLIENT, false, &batch)
        .unwrap();

    net.drop_next(3);
    let mut now = run(&mut host, &mut client, Instant::now(), 30);
    assert_eq!(client.controller.phase(), ScenePhase::Client);
    assert_eq!(host.protocol.pending_control(&CLIENT), 0);

    // Both entities enable after the status arrived.
    let (_, dead) = enable(&mut client.controller, "Roller 2");
    let (_, alive) = enable(&mut client.controller, "Crawler 1");
    assert_eq!(dead.active(), Some(false));
    assert_eq!(alive.active(), None);

    for step in 1..=5u8 {
        host.entity(&crawlid)
            .send_position(Vec2::new(f32::from(step), 0.0));
        net.drop_next(1);
        now = run(&mut host, &mut client, now, 1);
    }
    host.entity(&crawlid).send_position(Vec2::new(9.0, 9.0));
    run(&mut host, &mut client, now, 2);

    assert_eq!(
        client
            .controller
            .registry()
            .get(&crawlid)
            .unwrap()
            .snapshot()
            .position,
        Some(Vec2::new(9.0, 9.0))
    );
}
