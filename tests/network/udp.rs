//! The transport over real UDP sockets on localhost.

// Allow test-specific patterns that are appropriate for test code
#![allow(
    clippy::ip_constant,
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::thread;
use std::time::Duration;

use crate::common::{init_tracing, key};
use scene_sync::{
    EntityType, EntityUpdate, SceneEvent, SyncConfig, SyncProtocol, UdpNonBlockingSocket,
};
use web_time::Instant;

const MAX_POLLS: usize = 200;
const POLL_INTERVAL: Duration = Duration::from_millis(5);

fn bind_localhost() -> (UdpNonBlockingSocket, SocketAddr) {
    let socket =
        UdpNonBlockingSocket::bind(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0)).unwrap();
    let addr = socket.local_addr().unwrap();
    (socket, addr)
}

type Endpoint = SyncProtocol<SocketAddr, UdpNonBlockingSocket>;

/// Polls `receiver` until an event satisfies `done`, letting `sender` flush
/// and take acknowledgements in between.
fn poll_until(
    receiver: &mut Endpoint,
    sender: &mut Endpoint,
    mut done: impl FnMut(&SceneEvent) -> bool,
) -> bool {
    for _ in 0..MAX_POLLS {
        sender.flush(Instant::now());
        if receiver.poll(Instant::now()).iter().any(&mut done) {
            return true;
        }
        sender.poll(Instant::now());
        thread::sleep(POLL_INTERVAL);
    }
    false
}

#[test]
fn scene_status_and_updates_cross_real_sockets() {
    init_tracing();
    let config = SyncConfig::lan();
    let (host_socket, host_addr) = bind_localhost();
    let (client_socket, client_addr) = bind_localhost();
    let mut host = SyncProtocol::new(host_socket, &config).unwrap();
    let mut client = SyncProtocol::new(client_socket, &config).unwrap();
    host.add_peer(client_addr);
    client.add_peer(host_addr);

    let baldur = key(EntityType::Baldur, 2);
    let batch = vec![EntityUpdate::new(baldur).with_state(1)];
    host.send_scene_status(&client_addr, false, &batch).unwrap();

    let entered = poll_until(&mut client, &mut host, |event| {
        matches!(event, SceneEvent::EnterScene { scene_host: false, batch: b } if *b == batch)
    });
    assert!(entered, "scene status never arrived");

    host.send_update(&EntityUpdate::new(baldur).with_animation(3, &[7]))
        .unwrap();
    let updated = poll_until(&mut client, &mut host, |event| {
        *event == SceneEvent::Update(EntityUpdate::new(baldur).with_animation(3, &[7]))
    });
    assert!(updated, "update never arrived");
}
