//! The per-peer transport endpoint.
//!
//! Reliable fields are resent until acknowledged, unreliable ones go out once
//! per flush, and scene status and host hand-off travel as control messages
//! with their own sequence numbers and acknowledgements.

use std::collections::BTreeMap;
use std::fmt::Debug;

use tracing::{debug, trace};
use web_time::Instant;

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::network::messages::{
    AckPacket, Message, MessageBody, MessageHeader, SceneStatus, UpdatePacket,
};
use crate::network::reliability::{InboundFilter, PushOutcome, ReliableOutbox, UnreliableBuffer};
use crate::network::sequence::{sequence_greater_than, SequenceGenerator, SequenceNumber};
use crate::network::wire::{self, EntityUpdate, Reliability};
use crate::scene::SceneEvent;
use crate::telemetry::{
    report_to_observer, ObserverHandle, SyncViolation, ViolationKind, ViolationSeverity,
};
use crate::{NonBlockingSocket, PeerAddress};

/// A control message resent until acknowledged.
#[derive(Debug, Clone)]
struct PendingControl {
    sequence: SequenceNumber,
    body: MessageBody,
    last_sent: Option<Instant>,
}

impl PendingControl {
    const fn is_scene_status(&self) -> bool {
        matches!(self.body, MessageBody::SceneStatus(_))
    }
}

#[derive(Debug)]
struct PeerState {
    reliable: ReliableOutbox,
    unreliable: UnreliableBuffer,
    packet_sequences: SequenceGenerator,
    control_sequences: SequenceGenerator,
    control: Vec<PendingControl>,
    filter: InboundFilter,
    newest_control: Option<SequenceNumber>,
    last_send: Option<Instant>,
    last_recv: Option<Instant>,
}

impl PeerState {
    fn new(config: &SyncConfig) -> Self {
        Self {
            reliable: ReliableOutbox::new(config.resend_interval, config.max_pending_reliable),
            unreliable: UnreliableBuffer::new(),
            packet_sequences: SequenceGenerator::new(),
            control_sequences: SequenceGenerator::new(),
            control: Vec::new(),
            filter: InboundFilter::new(),
            newest_control: None,
            last_send: None,
            last_recv: None,
        }
    }

    fn awaiting_scene_status_ack(&self) -> bool {
        self.control.iter().any(PendingControl::is_scene_status)
    }
}

/// The transport endpoint: turns entity updates into datagrams and datagrams
/// back into [`SceneEvent`]s.
///
/// Per peer it keeps a [`ReliableOutbox`] for animation and state updates, an
/// [`UnreliableBuffer`] for position and scale, the scene-status and host
/// hand-off control messages awaiting acknowledgement, and an
/// [`InboundFilter`] that strips stale fields from what arrives.
///
/// Nothing received can tear the endpoint down. Packets carrying a foreign
/// magic, arriving from an unknown address, or failing to decode are dropped
/// and reported to the observer.
///
/// Updates to a peer are held back while its scene status is unacknowledged,
/// so the peer never sees updates for a scene it has not entered yet.
///
/// # Example
///
/// ```no_run
/// use scene_sync::{SyncConfig, SyncProtocol, UdpNonBlockingSocket};
/// use web_time::Instant;
///
/// let socket = UdpNonBlockingSocket::bind_to_port(7777)?;
/// let mut protocol = SyncProtocol::new(socket, &SyncConfig::default())?;
/// protocol.add_peer("127.0.0.1:7778".parse()?);
///
/// loop {
///     for event in protocol.poll(Instant::now()) {
///         // hand the event to the scene controller
///         let _ = event;
///     }
///     protocol.flush(Instant::now());
/// #   break;
/// }
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct SyncProtocol<A, S>
where
    A: PeerAddress,
    S: NonBlockingSocket<A>,
{
    socket: S,
    config: SyncConfig,
    peers: BTreeMap<A, PeerState>,
    observer: Option<ObserverHandle>,
}

impl<A, S> SyncProtocol<A, S>
where
    A: PeerAddress,
    S: NonBlockingSocket<A>,
{
    /// Creates an endpoint with no peers.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidConfig`] if `config` does not validate.
    pub fn new(socket: S, config: &SyncConfig) -> SyncResult<Self> {
        config.validate()?;
        Ok(Self {
            socket,
            config: config.clone(),
            peers: BTreeMap::new(),
            observer: None,
        })
    }

    /// Routes diagnostics to `observer` instead of the tracing log.
    #[must_use]
    pub fn with_observer(mut self, observer: ObserverHandle) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Starts exchanging messages with `addr`. Returns `false` if it was
    /// already a peer.
    pub fn add_peer(&mut self, addr: A) -> bool {
        if self.peers.contains_key(&addr) {
            return false;
        }
        debug!("Adding peer {:?}", addr);
        self.peers.insert(addr, PeerState::new(&self.config));
        true
    }

    /// Forgets `addr` and everything pending for it. Returns whether it was a
    /// peer.
    pub fn remove_peer(&mut self, addr: &A) -> bool {
        debug!("Removing peer {:?}", addr);
        self.peers.remove(addr).is_some()
    }

    /// Whether `addr` is a peer.
    #[must_use]
    pub fn has_peer(&self, addr: &A) -> bool {
        self.peers.contains_key(addr)
    }

    /// The peers, in address order.
    pub fn peers(&self) -> impl Iterator<Item = &A> {
        self.peers.keys()
    }

    /// Reliable slots awaiting acknowledgement from `addr`.
    #[must_use]
    pub fn pending_reliable(&self, addr: &A) -> usize {
        self.peers.get(addr).map_or(0, |peer| peer.reliable.len())
    }

    /// Control messages awaiting acknowledgement from `addr`.
    #[must_use]
    pub fn pending_control(&self, addr: &A) -> usize {
        self.peers.get(addr).map_or(0, |peer| peer.control.len())
    }

    /// When a message from `addr` was last received.
    #[must_use]
    pub fn last_received(&self, addr: &A) -> Option<Instant> {
        self.peers.get(addr).and_then(|peer| peer.last_recv)
    }

    /// The underlying socket.
    pub fn socket(&self) -> &S {
        &self.socket
    }

    /// The underlying socket, mutably.
    pub fn socket_mut(&mut self) -> &mut S {
        &mut self.socket
    }

    /// Queues `update` for every peer.
    ///
    /// Each reliable field becomes its own slot entry, superseding whatever is
    /// still unacknowledged for that slot. Unreliable fields are coalesced until
    /// the next [`flush`](Self::flush).
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Wire`] if the update cannot be packed (animation
    /// info longer than 255 bytes). Nothing is queued in that case.
    pub fn send_update(&mut self, update: &EntityUpdate) -> SyncResult<()> {
        let addrs: Vec<A> = self.peers.keys().cloned().collect();
        let reliable = Self::pack_reliable(update)?;
        for addr in &addrs {
            self.queue_packed(addr, update, &reliable);
        }
        Ok(())
    }

    /// Queues `update` for one peer only.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Wire`] if the update cannot be packed, or
    /// [`SyncError::Socket`] if `addr` is not a peer.
    pub fn send_update_to(&mut self, addr: &A, update: &EntityUpdate) -> SyncResult<()> {
        if !self.peers.contains_key(addr) {
            return Err(unknown_peer(addr));
        }
        let reliable = Self::pack_reliable(update)?;
        self.queue_packed(addr, update, &reliable);
        Ok(())
    }

    /// Tells `addr` which role it has in the scene it entered, with the
    /// scene-entry batch it needs as a client.
    ///
    /// A scene status starts a new scene session with the peer: updates still
    /// pending from the previous one are dropped, an older unacknowledged status
    /// is replaced, and no further updates go out until this one is
    /// acknowledged.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Wire`] if the batch cannot be packed, or
    /// [`SyncError::Socket`] if `addr` is not a peer.
    pub fn send_scene_status(
        &mut self,
        addr: &A,
        scene_host: bool,
        batch: &[EntityUpdate],
    ) -> SyncResult<()> {
        let batch = wire::encode_batch(batch)?;
        let peer = self.peers.get_mut(addr).ok_or_else(|| unknown_peer(addr))?;
        peer.reliable.clear();
        peer.unreliable.take();
        peer.control.retain(|pending| !pending.is_scene_status());
        let sequence = peer.control_sequences.next_sequence();
        debug!(
            "Queueing scene status #{} for {:?} (scene_host: {}, {} batch bytes)",
            sequence,
            addr,
            scene_host,
            batch.len()
        );
        peer.control.push(PendingControl {
            sequence,
            body: MessageBody::SceneStatus(SceneStatus {
                sequence,
                scene_host,
                batch,
            }),
            last_sent: None,
        });
        Ok(())
    }

    /// Tells `addr` that the scene host left and it takes over.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Socket`] if `addr` is not a peer.
    pub fn send_host_transfer(&mut self, addr: &A) -> SyncResult<()> {
        let peer = self.peers.get_mut(addr).ok_or_else(|| unknown_peer(addr))?;
        peer.control
            .retain(|pending| !matches!(pending.body, MessageBody::HostTransfer { .. }));
        let sequence = peer.control_sequences.next_sequence();
        debug!("Queueing host transfer #{} for {:?}", sequence, addr);
        peer.control.push(PendingControl {
            sequence,
            body: MessageBody::HostTransfer { sequence },
            last_sent: None,
        });
        Ok(())
    }

    /// Sends everything that is due: unacknowledged control messages, reliable
    /// entries that were never sent or whose resend interval elapsed, and the
    /// coalesced unreliable updates. A peer that got nothing for
    /// `keepalive_interval` gets a keep-alive. Returns the number of datagrams
    /// sent.
    pub fn flush(&mut self, now: Instant) -> usize {
        let magic = self.config.magic;
        let resend_interval = self.config.resend_interval;
        let keepalive_interval = self.config.keepalive_interval;
        let max_updates = self.config.max_packet_updates;
        let mut outgoing: Vec<(A, MessageBody)> = Vec::new();

        for (addr, peer) in &mut self.peers {
            let before = outgoing.len();

            for pending in &mut peer.control {
                let due = pending
                    .last_sent
                    .is_none_or(|sent| now.saturating_duration_since(sent) >= resend_interval);
                if due {
                    pending.last_sent = Some(now);
                    outgoing.push((addr.clone(), pending.body.clone()));
                }
            }

            if !peer.awaiting_scene_status_ack() {
                let reliable = peer.reliable.due(now, usize::MAX);
                let mut unreliable = Vec::new();
                for update in peer.unreliable.take() {
                    match wire::encode(&update) {
                        Ok(bytes) => unreliable.push(bytes),
                        Err(err) => report_to_observer(
                            self.observer.as_ref(),
                            &SyncViolation::new(
                                ViolationSeverity::Error,
                                ViolationKind::InternalError,
                                format!("Could not pack unreliable update: {err}"),
                                concat!(file!(), ":", line!()),
                            )
                            .with_entity(update.key),
                        ),
                    }
                }

                let mut reliable = reliable.into_iter().peekable();
                let mut unreliable = unreliable.into_iter().peekable();
                while reliable.peek().is_some() || unreliable.peek().is_some() {
                    let mut packet = UpdatePacket {
                        sequence: peer.packet_sequences.next_sequence(),
                        reliable: Vec::new(),
                        unreliable: Vec::new(),
                    };
                    while packet.reliable.len() < max_updates {
                        match reliable.next() {
                            Some(entry) => packet.reliable.push(entry),
                            None => break,
                        }
                    }
                    while packet.reliable.len() + packet.unreliable.len() < max_updates {
                        match unreliable.next() {
                            Some(bytes) => packet.unreliable.push(bytes),
                            None => break,
                        }
                    }
                    trace!(
                        "Packet #{} for {:?}: {} reliable, {} unreliable",
                        packet.sequence,
                        addr,
                        packet.reliable.len(),
                        packet.unreliable.len()
                    );
                    outgoing.push((addr.clone(), MessageBody::Updates(packet)));
                }
            }

            let idle = peer
                .last_send
                .is_none_or(|sent| now.saturating_duration_since(sent) >= keepalive_interval);
            if outgoing.len() == before && idle {
                outgoing.push((addr.clone(), MessageBody::KeepAlive));
            }
            if outgoing.len() > before {
                peer.last_send = Some(now);
            }
        }

        let sent = outgoing.len();
        for (addr, body) in outgoing {
            let message = Message {
                header: MessageHeader { magic },
                body,
            };
            self.socket.send_to(&message, &addr);
        }
        sent
    }

    /// Receives everything the socket has, acknowledges reliable content, and
    /// returns the resulting scene events in arrival order.
    pub fn poll(&mut self, now: Instant) -> Vec<SceneEvent> {
        let magic = self.config.magic;
        let mut events = Vec::new();
        let mut acks: BTreeMap<A, Vec<SequenceNumber>> = BTreeMap::new();
        let mut control_acks: BTreeMap<A, Vec<SequenceNumber>> = BTreeMap::new();

        for (addr, message) in self.socket.receive_all_messages() {
            if message.header.magic != magic {
                self.report(
                    ViolationSeverity::Warning,
                    ViolationKind::Transport,
                    format!(
                        "Dropping message from {addr:?} with magic {:#06x}, expected {magic:#06x}",
                        message.header.magic
                    ),
                );
                continue;
            }
            let Some(peer) = self.peers.get_mut(&addr) else {
                self.report(
                    ViolationSeverity::Warning,
                    ViolationKind::Transport,
                    format!("Dropping message from unknown address {addr:?}"),
                );
                continue;
            };
            peer.last_recv = Some(now);
            trace!("Handling message from {:?}: {:?}", addr, message.body);

            let mut violations = Vec::new();
            match message.body {
                MessageBody::Updates(packet) => {
                    let acked = acks.entry(addr.clone()).or_default();
                    for entry in packet.reliable {
                        // Acked even when malformed or stale; the sender would
                        // otherwise resend it forever.
                        acked.push(entry.sequence);
                        Self::receive_update(
                            peer,
                            &entry.bytes,
                            entry.sequence,
                            &mut events,
                            &mut violations,
                        );
                    }
                    for bytes in packet.unreliable {
                        Self::receive_update(
                            peer,
                            &bytes,
                            packet.sequence,
                            &mut events,
                            &mut violations,
                        );
                    }
                },
                MessageBody::Ack(AckPacket { sequences }) => {
                    for sequence in sequences {
                        if !peer.reliable.ack(sequence) {
                            trace!("Ack #{} from {:?} matched nothing pending", sequence, addr);
                        }
                    }
                },
                MessageBody::ControlAck(AckPacket { sequences }) => {
                    peer.control
                        .retain(|pending| !sequences.contains(&pending.sequence));
                },
                MessageBody::SceneStatus(status) => {
                    control_acks.entry(addr.clone()).or_default().push(status.sequence);
                    if Self::accept_control(peer, status.sequence) {
                        // A new scene session; slots from the previous scene
                        // are reused by different objects.
                        peer.filter.clear();
                        let batch = match wire::decode_batch(&status.batch) {
                            Ok(batch) => batch,
                            Err(err) => {
                                violations.push(
                                    SyncViolation::new(
                                        ViolationSeverity::Warning,
                                        ViolationKind::MalformedMessage,
                                        format!("Discarding malformed scene-entry batch: {err}"),
                                        concat!(file!(), ":", line!()),
                                    )
                                    .with_context("batch_len", status.batch.len().to_string()),
                                );
                                Vec::new()
                            },
                        };
                        debug!(
                            "Scene status from {:?}: scene_host {}, {} cached updates",
                            addr,
                            status.scene_host,
                            batch.len()
                        );
                        events.push(SceneEvent::EnterScene {
                            scene_host: status.scene_host,
                            batch,
                        });
                    }
                },
                MessageBody::HostTransfer { sequence } => {
                    control_acks.entry(addr.clone()).or_default().push(sequence);
                    if Self::accept_control(peer, sequence) {
                        debug!("Host transfer from {:?}", addr);
                        events.push(SceneEvent::HostLeft);
                    }
                },
                MessageBody::KeepAlive => (),
            }
            for violation in &violations {
                report_to_observer(self.observer.as_ref(), violation);
            }
        }

        // A packet of only unreliable updates leaves an empty entry.
        let acks = acks
            .into_iter()
            .filter(|(_, sequences)| !sequences.is_empty())
            .map(|(addr, sequences)| (addr, MessageBody::Ack(AckPacket { sequences })));
        let control_acks = control_acks
            .into_iter()
            .map(|(addr, sequences)| (addr, MessageBody::ControlAck(AckPacket { sequences })));
        for (addr, body) in acks.chain(control_acks) {
            let message = Message {
                header: MessageHeader { magic },
                body,
            };
            self.socket.send_to(&message, &addr);
        }
        events
    }

    fn pack_reliable(update: &EntityUpdate) -> SyncResult<Vec<(wire::UpdateKind, Vec<u8>)>> {
        let mut packed = Vec::new();
        for kind in update.kinds().iter() {
            if kind.reliability() != Reliability::Reliable {
                continue;
            }
            if let Some(single) = update.only(kind) {
                packed.push((kind, wire::encode(&single)?));
            }
        }
        Ok(packed)
    }

    fn queue_packed(
        &mut self,
        addr: &A,
        update: &EntityUpdate,
        reliable: &[(wire::UpdateKind, Vec<u8>)],
    ) {
        let Some(peer) = self.peers.get_mut(addr) else {
            return;
        };
        let mut evicted = Vec::new();
        for (kind, bytes) in reliable {
            let (sequence, outcome) = peer.reliable.push((update.key, *kind), bytes.clone());
            match outcome {
                PushOutcome::Queued => (),
                PushOutcome::Superseded { previous } => trace!(
                    "{} {} #{} supersedes unacknowledged #{}",
                    update.key,
                    kind,
                    sequence,
                    previous
                ),
                PushOutcome::Evicted { slot } => evicted.push(slot),
            }
        }
        peer.unreliable.push(update);

        for (key, kind) in evicted {
            report_to_observer(
                self.observer.as_ref(),
                &SyncViolation::new(
                    ViolationSeverity::Warning,
                    ViolationKind::StaleUpdate,
                    format!(
                        "Reliable outbox for {addr:?} is full; dropped unacknowledged {kind} update"
                    ),
                    concat!(file!(), ":", line!()),
                )
                .with_entity(key)
                .with_context(
                    "max_pending_reliable",
                    self.config.max_pending_reliable.to_string(),
                ),
            );
        }
    }

    fn receive_update(
        peer: &mut PeerState,
        bytes: &[u8],
        sequence: SequenceNumber,
        events: &mut Vec<SceneEvent>,
        violations: &mut Vec<SyncViolation>,
    ) {
        let update = match wire::decode(bytes) {
            Ok(update) => update,
            Err(err) => {
                violations.push(
                    SyncViolation::new(
                        ViolationSeverity::Warning,
                        ViolationKind::MalformedMessage,
                        format!("Dropping malformed update: {err}"),
                        concat!(file!(), ":", line!()),
                    )
                    .with_context("sequence", sequence.to_string()),
                );
                return;
            },
        };
        let key = update.key;
        let (fresh, stale) = peer.filter.filter(update, sequence);
        if !stale.is_empty() {
            trace!("{} #{}: stripped stale {:?}", key, sequence, stale);
        }
        if let Some(update) = fresh {
            events.push(SceneEvent::Update(update));
        }
    }

    fn accept_control(peer: &mut PeerState, sequence: SequenceNumber) -> bool {
        match peer.newest_control {
            Some(newest) if !sequence_greater_than(sequence, newest) => false,
            _ => {
                peer.newest_control = Some(sequence);
                true
            },
        }
    }

    fn report(&self, severity: ViolationSeverity, kind: ViolationKind, message: String) {
        let violation = SyncViolation::new(severity, kind, message, concat!(file!(), ":", line!()));
        report_to_observer(self.observer.as_ref(), &violation);
    }
}

impl<A, S> Debug for SyncProtocol<A, S>
where
    A: PeerAddress,
    S: NonBlockingSocket<A>,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncProtocol")
            .field("config", &self.config)
            .field("peers", &self.peers.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

fn unknown_peer<A: Debug>(addr: &A) -> SyncError {
    SyncError::Socket {
        context: format!("{addr:?} is not a peer"),
    }
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
    use crate::entity::{EntityKey, EntityType, InstanceId};
    use crate::network::messages::ReliableEntry;
    use crate::network::wire::Vec2;
    use crate::telemetry::CollectingObserver;
    use std::collections::VecDeque;
    use std::sync::Arc;
    use web_time::Duration;

    type Addr = u8;
    const HOST: Addr = 1;
    const CLIENT: Addr = 2;

    /// Records what was sent; delivers whatever the test injects.
    #[derive(Default)]
    struct ScriptedSocket {
        sent: Vec<(Addr, Message)>,
        inbound: VecDeque<(Addr, Message)>,
    }

    impl NonBlockingSocket<Addr> for ScriptedSocket {
        fn send_to(&mut self, msg: &Message, addr: &Addr) {
            self.sent.push((*addr, msg.clone()));
        }

        fn receive_all_messages(&mut self) -> Vec<(Addr, Message)> {
            self.inbound.drain(..).collect()
        }
    }

    fn protocol() -> SyncProtocol<Addr, ScriptedSocket> {
        let mut protocol = SyncProtocol::new(ScriptedSocket::default(), &SyncConfig::default())
            .unwrap();
        protocol.add_peer(CLIENT);
        protocol
    }

    fn key(id: u8) -> EntityKey {
        EntityKey::new(EntityType::Baldur, InstanceId::new(id))
    }

    fn message(body: MessageBody) -> Message {
        Message {
            header: MessageHeader {
                magic: SyncConfig::default().magic,
            },
            body,
        }
    }

    fn sent_packets(protocol: &mut SyncProtocol<Addr, ScriptedSocket>) -> Vec<UpdatePacket> {
        protocol
            .socket_mut()
            .sent
            .drain(..)
            .filter_map(|(_, msg)| match msg.body {
                MessageBody::Updates(packet) => Some(packet),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = SyncConfig {
            magic: 0,
            ..SyncConfig::default()
        };
        assert!(matches!(
            SyncProtocol::<Addr, _>::new(ScriptedSocket::default(), &config),
            Err(SyncError::InvalidConfig { field: "magic", .. })
        ));
    }

    #[test]
    fn reliable_fields_are_split_into_slots() {
        let mut protocol = protocol();
        let update = EntityUpdate::new(key(1))
            .with_position(Vec2::new(1.0, 2.0))
            .with_animation(3, &[])
            .with_state(1);
        protocol.send_update(&update).unwrap();
        assert_eq!(protocol.pending_reliable(&CLIENT), 2);

        let packets = sent_packets_after_flush(&mut protocol, Instant::now());
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].reliable.len(), 2);
        assert_eq!(packets[0].unreliable.len(), 1);
        let unreliable = wire::decode(&packets[0].unreliable[0]).unwrap();
        assert_eq!(unreliable.position, Some(Vec2::new(1.0, 2.0)));
        assert_eq!(unreliable.animation, None);
    }

    fn sent_packets_after_flush(
        protocol: &mut SyncProtocol<Addr, ScriptedSocket>,
        now: Instant,
    ) -> Vec<UpdatePacket> {
        protocol.flush(now);
        sent_packets(protocol)
    }

    #[test]
    fn unacked_reliable_is_resent_after_interval() {
        let mut protocol = protocol();
        let start = Instant::now();
        protocol
            .send_update(&EntityUpdate::new(key(1)).with_state(0))
            .unwrap();

        assert_eq!(sent_packets_after_flush(&mut protocol, start).len(), 1);
        assert!(sent_packets_after_flush(&mut protocol, start + Duration::from_millis(10)).is_empty());
        let resent = sent_packets_after_flush(&mut protocol, start + Duration::from_millis(100));
        assert_eq!(resent.len(), 1);
        let sequence = resent[0].reliable[0].sequence;

        protocol
            .socket_mut()
            .inbound
            .push_back((CLIENT, message(MessageBody::Ack(AckPacket { sequences: vec![sequence] }))));
        protocol.poll(start);
        assert_eq!(protocol.pending_reliable(&CLIENT), 0);
    }

    #[test]
    fn packets_respect_max_packet_updates() {
        let config = SyncConfig {
            max_packet_updates: 2,
            ..SyncConfig::default()
        };
        let mut protocol = SyncProtocol::new(ScriptedSocket::default(), &config).unwrap();
        protocol.add_peer(CLIENT);
        for id in 0..5 {
            protocol
                .send_update(&EntityUpdate::new(key(id)).with_animation(0, &[]))
                .unwrap();
        }
        let packets = sent_packets_after_flush(&mut protocol, Instant::now());
        assert_eq!(packets.len(), 3);
        assert!(packets.iter().all(|p| p.reliable.len() <= 2));
        assert_eq!(packets.iter().map(|p| p.reliable.len()).sum::<usize>(), 5);
    }

    #[test]
    fn updates_wait_for_scene_status_ack() {
        let mut protocol = protocol();
        let now = Instant::now();
        protocol.send_scene_status(&CLIENT, false, &[]).unwrap();
        protocol
            .send_update(&EntityUpdate::new(key(1)).with_state(1))
            .unwrap();

        protocol.flush(now);
        let sent: Vec<Message> = protocol.socket_mut().sent.drain(..).map(|(_, m)| m).collect();
        assert_eq!(sent.len(), 1);
        let MessageBody::SceneStatus(status) = &sent[0].body else {
            panic!("expected scene status, got {:?}", sent[0].body);
        };

        let sequence = status.sequence;
        protocol.socket_mut().inbound.push_back((
            CLIENT,
            message(MessageBody::ControlAck(AckPacket {
                sequences: vec![sequence],
            })),
        ));
        protocol.poll(now);
        assert_eq!(protocol.pending_control(&CLIENT), 0);
        assert_eq!(sent_packets_after_flush(&mut protocol, now).len(), 1);
    }

    #[test]
    fn scene_status_drops_previous_session_updates() {
        let mut protocol = protocol();
        protocol
            .send_update(&EntityUpdate::new(key(1)).with_state(1))
            .unwrap();
        protocol.send_scene_status(&CLIENT, true, &[]).unwrap();
        assert_eq!(protocol.pending_reliable(&CLIENT), 0);
        assert_eq!(protocol.pending_control(&CLIENT), 1);
    }

    #[test]
    fn received_reliable_entries_are_acked_and_stale_ones_dropped() {
        let mut protocol = protocol();
        let newer = wire::encode(&EntityUpdate::new(key(1)).with_animation(4, &[])).unwrap();
        let older = wire::encode(&EntityUpdate::new(key(1)).with_animation(2, &[])).unwrap();
        let packet = UpdatePacket {
            sequence: 0,
            reliable: vec![
                ReliableEntry {
                    sequence: 11,
                    bytes: newer,
                },
                ReliableEntry {
                    sequence: 10,
                    bytes: older,
                },
            ],
            unreliable: Vec::new(),
        };
        protocol
            .socket_mut()
            .inbound
            .push_back((CLIENT, message(MessageBody::Updates(packet))));

        let events = protocol.poll(Instant::now());
        assert_eq!(events.len(), 1);
        let SceneEvent::Update(update) = &events[0] else {
            panic!("expected update, got {:?}", events[0]);
        };
        assert_eq!(update.animation.as_ref().map(|a| a.index), Some(4));

        let (addr, ack) = protocol.socket_mut().sent.pop().unwrap();
        assert_eq!(addr, CLIENT);
        assert_eq!(
            ack.body,
            MessageBody::Ack(AckPacket {
                sequences: vec![11, 10]
            })
        );
    }

    #[test]
    fn duplicate_scene_status_yields_one_event() {
        let mut protocol = protocol();
        let status = MessageBody::SceneStatus(SceneStatus {
            sequence: 3,
            scene_host: false,
            batch: wire::encode_batch(&[EntityUpdate::new(key(2)).with_state(1)]).unwrap(),
        });
        protocol
            .socket_mut()
            .inbound
            .extend([(CLIENT, message(status.clone())), (CLIENT, message(status))]);

        let events = protocol.poll(Instant::now());
        assert_eq!(events.len(), 1);
        match &events[0] {
            SceneEvent::EnterScene { scene_host, batch } => {
                assert!(!scene_host);
                assert_eq!(batch.len(), 1);
            },
            other => panic!("unexpected event {other:?}"),
        }
        // Both copies are acknowledged.
        let (_, ack) = protocol.socket_mut().sent.pop().unwrap();
        assert_eq!(
            ack.body,
            MessageBody::ControlAck(AckPacket {
                sequences: vec![3, 3]
            })
        );
    }

    #[test]
    fn control_and_reliable_acks_do_not_cross() {
        let mut protocol = protocol();
        let now = Instant::now();
        protocol.send_scene_status(&CLIENT, false, &[]).unwrap();
        protocol.flush(now);
        protocol.socket_mut().sent.clear();

        // Reliable entry 0 and scene status 0 share a number but not a space.
        protocol.socket_mut().inbound.push_back((
            CLIENT,
            message(MessageBody::Ack(AckPacket { sequences: vec![0] })),
        ));
        protocol.poll(now);
        assert_eq!(protocol.pending_control(&CLIENT), 1);

        protocol.socket_mut().inbound.push_back((
            CLIENT,
            message(MessageBody::ControlAck(AckPacket { sequences: vec![0] })),
        ));
        protocol.poll(now);
        assert_eq!(protocol.pending_control(&CLIENT), 0);

        protocol
            .send_update(&EntityUpdate::new(key(1)).with_state(1))
            .unwrap();
        protocol.socket_mut().inbound.push_back((
            CLIENT,
            message(MessageBody::ControlAck(AckPacket { sequences: vec![0] })),
        ));
        protocol.poll(now);
        assert_eq!(protocol.pending_reliable(&CLIENT), 1);
    }

    #[test]
    fn accepted_scene_status_forgets_previous_scene_slots() {
        let mut protocol = protocol();
        let now = Instant::now();
        let dead = |sequence| {
            message(MessageBody::Updates(UpdatePacket {
                sequence: 0,
                reliable: vec![ReliableEntry {
                    sequence,
                    bytes: wire::encode(&EntityUpdate::new(key(0)).with_state(1)).unwrap(),
                }],
                unreliable: Vec::new(),
            }))
        };
        let status = |sequence| {
            message(MessageBody::SceneStatus(SceneStatus {
                sequence,
                scene_host: false,
                batch: wire::encode_batch(&[]).unwrap(),
            }))
        };

        protocol.socket_mut().inbound.push_back((CLIENT, dead(50)));
        assert_eq!(protocol.poll(now).len(), 1);

        // Numbers at or below what the previous scene used are fresh again.
        protocol
            .socket_mut()
            .inbound
            .extend([(CLIENT, status(1)), (CLIENT, dead(2))]);
        let events = protocol.poll(now);
        assert_eq!(events.len(), 2, "{events:?}");
        assert!(matches!(events[1], SceneEvent::Update(_)));
    }

    #[test]
    fn malformed_input_is_reported_not_fatal() {
        let observer = Arc::new(CollectingObserver::new());
        let mut protocol = protocol().with_observer(observer.clone());
        let packet = UpdatePacket {
            sequence: 0,
            reliable: vec![ReliableEntry {
                sequence: 1,
                bytes: vec![0x01, 2, 2, 0],
            }],
            unreliable: vec![vec![0x08, 2, 3, 1]],
        };
        protocol
            .socket_mut()
            .inbound
            .push_back((CLIENT, message(MessageBody::Updates(packet))));
        let foreign = Message {
            header: MessageHeader { magic: 1 },
            body: MessageBody::KeepAlive,
        };
        protocol.socket_mut().inbound.push_back((CLIENT, foreign));
        protocol
            .socket_mut()
            .inbound
            .push_back((9, message(MessageBody::KeepAlive)));

        let events = protocol.poll(Instant::now());
        assert_eq!(events.len(), 1);
        assert!(observer.has_violation(ViolationKind::MalformedMessage));
        assert_eq!(observer.violations_of_kind(ViolationKind::Transport).len(), 2);
    }

    #[test]
    fn host_transfer_becomes_host_left_event() {
        let mut protocol = protocol();
        protocol
            .socket_mut()
            .inbound
            .push_back((CLIENT, message(MessageBody::HostTransfer { sequence: 8 })));
        assert!(matches!(
            protocol.poll(Instant::now()).as_slice(),
            [SceneEvent::HostLeft]
        ));
    }

    #[test]
    fn idle_peer_gets_keepalive() {
        let mut protocol = protocol();
        let start = Instant::now();
        assert_eq!(protocol.flush(start), 1);
        assert!(matches!(
            protocol.socket().sent[0].1.body,
            MessageBody::KeepAlive
        ));
        assert_eq!(protocol.flush(start + Duration::from_millis(10)), 0);
        assert_eq!(protocol.flush(start + Duration::from_secs(1)), 1);
    }

    #[test]
    fn unknown_peer_is_an_error() {
        let mut protocol = protocol();
        assert!(matches!(
            protocol.send_host_transfer(&HOST),
            Err(SyncError::Socket { .. })
        ));
        assert!(!protocol.add_peer(CLIENT));
        assert!(protocol.remove_peer(&CLIENT));
        assert!(protocol.peers().next().is_none());
    }
}
