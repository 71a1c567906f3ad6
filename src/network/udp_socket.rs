use std::io::ErrorKind;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};

use tracing::trace;

use crate::network::codec;
use crate::network::messages::Message;
use crate::telemetry::{
    report_to_observer, ObserverHandle, SyncViolation, ViolationKind, ViolationSeverity,
};
use crate::NonBlockingSocket;

/// Largest datagram accepted. Anything longer is truncated by the OS and fails
/// to decode.
const MAX_DATAGRAM: usize = 4096;
/// Datagrams above this may be fragmented on the path, and a fragmented
/// datagram is lost as a whole if any fragment is.
/// Source: <https://stackoverflow.com/a/35697810/775982>
const FRAGMENTATION_THRESHOLD: usize = 508;

/// A non-blocking UDP socket carrying scene synchronization messages.
///
/// Datagrams that fail to decode are reported as
/// [`ViolationKind::MalformedMessage`] and skipped; the rest of the receive
/// queue is still drained. Send failures are reported as
/// [`ViolationKind::Transport`]; UDP gives no delivery guarantee anyway, and
/// the protocol's resend covers both.
pub struct UdpNonBlockingSocket {
    socket: UdpSocket,
    recv_buffer: Box<[u8; MAX_DATAGRAM]>,
    send_buffer: Vec<u8>,
    dropped_datagrams: u64,
    observer: Option<ObserverHandle>,
}

impl UdpNonBlockingSocket {
    /// Binds to `0.0.0.0:port`. Port 0 picks any free port.
    pub fn bind_to_port(port: u16) -> Result<Self, std::io::Error> {
        Self::bind(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port))
    }

    /// Binds to `addr` and switches the socket to non-blocking mode.
    pub fn bind(addr: SocketAddr) -> Result<Self, std::io::Error> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_nonblocking(true)?;
        Ok(Self {
            socket,
            recv_buffer: Box::new([0; MAX_DATAGRAM]),
            send_buffer: Vec::with_capacity(FRAGMENTATION_THRESHOLD),
            dropped_datagrams: 0,
            observer: None,
        })
    }

    /// Routes diagnostics to `observer` instead of the tracing log.
    #[must_use]
    pub fn with_observer(mut self, observer: ObserverHandle) -> Self {
        self.observer = Some(observer);
        self
    }

    /// The address the socket is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, std::io::Error> {
        self.socket.local_addr()
    }

    /// Received datagrams that did not decode as a [`Message`].
    #[must_use]
    pub fn dropped_datagrams(&self) -> u64 {
        self.dropped_datagrams
    }

    fn report(&self, severity: ViolationSeverity, kind: ViolationKind, message: String) {
        let violation = SyncViolation::new(severity, kind, message, concat!(file!(), ":", line!()));
        report_to_observer(self.observer.as_ref(), &violation);
    }
}

impl std::fmt::Debug for UdpNonBlockingSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let Self {
            socket,
            dropped_datagrams,
            observer,
            ..
        } = self;
        f.debug_struct("UdpNonBlockingSocket")
            .field("local_addr", &socket.local_addr().ok())
            .field("dropped_datagrams", dropped_datagrams)
            .field("observer", &observer.is_some())
            .finish()
    }
}

impl NonBlockingSocket<SocketAddr> for UdpNonBlockingSocket {
    fn send_to(&mut self, msg: &Message, addr: &SocketAddr) {
        self.send_buffer.clear();
        if let Err(err) = codec::encode_message_into(msg, &mut self.send_buffer) {
            self.report(
                ViolationSeverity::Error,
                ViolationKind::InternalError,
                format!("Failed to encode message for {addr}: {err}"),
            );
            return;
        }

        let len = self.send_buffer.len();
        if len > FRAGMENTATION_THRESHOLD {
            // Only happens with a raised max_packet_updates or a very large
            // scene-entry batch.
            self.report(
                ViolationSeverity::Warning,
                ViolationKind::Transport,
                format!("Sending {len} byte datagram to {addr}; above {FRAGMENTATION_THRESHOLD} it may fragment"),
            );
        }

        match self.socket.send_to(&self.send_buffer, addr) {
            Ok(_) => trace!(%addr, len, "Sent datagram"),
            Err(err) => self.report(
                ViolationSeverity::Warning,
                ViolationKind::Transport,
                format!("Failed to send datagram to {addr}: {err}"),
            ),
        }
    }

    fn receive_all_messages(&mut self) -> Vec<(SocketAddr, Message)> {
        let mut received = Vec::new();
        loop {
            let (len, from) = match self.socket.recv_from(&mut self.recv_buffer[..]) {
                Ok(datagram) => datagram,
                Err(err) if err.kind() == ErrorKind::WouldBlock => return received,
                // Windows reports an ICMP port-unreachable from an earlier
                // send_to this way.
                Err(err) if err.kind() == ErrorKind::ConnectionReset => continue,
                Err(err) => {
                    self.report(
                        ViolationSeverity::Error,
                        ViolationKind::Transport,
                        format!("Receive failed: {:?}: {err}", err.kind()),
                    );
                    return received;
                },
            };

            let datagram = &self.recv_buffer[..len.min(MAX_DATAGRAM)];
            match codec::decode_message(datagram) {
                Ok(msg) => received.push((from, msg)),
                Err(err) => {
                    self.dropped_datagrams += 1;
                    self.report(
                        ViolationSeverity::Warning,
                        ViolationKind::MalformedMessage,
                        format!("Dropping {len} byte datagram from {from}: {err}"),
                    );
                },
            }
        }
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
    use std::sync::Arc;

    use super::*;
    use crate::network::messages::{
        AckPacket, MessageBody, MessageHeader, ReliableEntry, UpdatePacket,
    };
    use crate::telemetry::CollectingObserver;

    fn localhost() -> UdpNonBlockingSocket {
        UdpNonBlockingSocket::bind(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0)).unwrap()
    }

    // Loopback delivery is fast but not instant.
    fn receive(socket: &mut UdpNonBlockingSocket, count: usize) -> Vec<(SocketAddr, Message)> {
        let mut received = Vec::new();
        for _ in 0..40 {
            received.extend(socket.receive_all_messages());
            if received.len() >= count {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(10));
        }
        received
    }

    fn updates(unreliable: Vec<Vec<u8>>) -> Message {
        Message {
            header: MessageHeader { magic: 0x5C5E },
            body: MessageBody::Updates(UpdatePacket {
                sequence: 3,
                reliable: vec![ReliableEntry {
                    sequence: 7,
                    bytes: vec![0x04, 2, 1, 0, 0],
                }],
                unreliable,
            }),
        }
    }

    #[test]
    #[cfg(not(miri))] // Miri cannot call socket()
    fn empty_receive_returns_immediately() {
        let mut socket = localhost();
        assert!(socket.receive_all_messages().is_empty());
        assert_eq!(socket.dropped_datagrams(), 0);
    }

    #[test]
    #[cfg(not(miri))]
    fn update_packet_crosses_loopback() {
        let mut sender = localhost();
        let mut receiver = localhost();
        let from = sender.local_addr().unwrap();
        let to = receiver.local_addr().unwrap();

        let msg = updates(Vec::new());
        sender.send_to(&msg, &to);

        let received = receive(&mut receiver, 1);
        assert_eq!(received, vec![(from, msg)]);
    }

    #[test]
    #[cfg(not(miri))]
    fn garbage_is_counted_and_the_queue_still_drains() {
        let collector = Arc::new(CollectingObserver::new());
        let raw = UdpSocket::bind("127.0.0.1:0").unwrap();
        let mut socket = localhost().with_observer(collector.clone());
        let to = socket.local_addr().unwrap();

        raw.send_to(&[0xFF, 0xFF, 0xFF], to).unwrap();
        let ack = Message {
            header: MessageHeader { magic: 1 },
            body: MessageBody::Ack(AckPacket { sequences: vec![4] }),
        };
        raw.send_to(&codec::encode_message(&ack).unwrap(), to)
            .unwrap();

        let received = receive(&mut socket, 1);
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].1, ack);
        assert_eq!(socket.dropped_datagrams(), 1);
        assert!(collector.has_violation(ViolationKind::MalformedMessage));
    }

    #[test]
    #[cfg(not(miri))]
    fn large_datagram_is_sent_with_a_warning() {
        let collector = Arc::new(CollectingObserver::new());
        let mut sender = localhost().with_observer(collector.clone());
        let mut receiver = localhost();
        let to = receiver.local_addr().unwrap();

        let msg = updates(vec![vec![0x01; 40]; 32]);
        sender.send_to(&msg, &to);

        let received = receive(&mut receiver, 1);
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].1, msg);
        assert_eq!(collector.violations_of_kind(ViolationKind::Transport).len(), 1);
    }

    #[test]
    #[cfg(not(miri))]
    fn send_to_unroutable_address_is_reported_not_fatal() {
        let collector = Arc::new(CollectingObserver::new());
        let mut socket = localhost().with_observer(collector.clone());
        let nowhere = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0);
        let msg = Message {
            header: MessageHeader { magic: 0x5C5E },
            body: MessageBody::KeepAlive,
        };
        socket.send_to(&msg, &nowhere);
        socket.send_to(&msg, &nowhere);
    }

    #[test]
    #[cfg(not(miri))]
    fn bind_to_port_zero_picks_a_port() {
        let socket = UdpNonBlockingSocket::bind_to_port(0).unwrap();
        let local = socket.local_addr().unwrap();
        assert_ne!(local.port(), 0);
        assert!(local.ip().is_unspecified());
        assert!(format!("{socket:?}").contains("dropped_datagrams: 0"));
    }
}
