use serde::{Deserialize, Serialize};

use crate::network::sequence::SequenceNumber;

/// A reliable entity update: packed update bytes stamped with the sending
/// slot's sequence number.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReliableEntry {
    /// Per-sender sequence number, shared across all slots.
    pub sequence: SequenceNumber,
    /// One packed update (see [`wire`](super::wire)) carrying only the slot's field.
    pub bytes: Vec<u8>,
}

impl std::fmt::Debug for ReliableEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let Self { sequence, bytes } = self;
        f.debug_struct("ReliableEntry")
            .field("sequence", sequence)
            .field("bytes", &BytesDebug(bytes))
            .finish()
    }
}

/// A batch of entity updates sent in one datagram.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdatePacket {
    /// Packet sequence number; orders the unreliable part.
    pub sequence: SequenceNumber,
    /// Pending reliable entries, resent until acked.
    pub reliable: Vec<ReliableEntry>,
    /// Packed unreliable updates, sent once.
    pub unreliable: Vec<Vec<u8>>,
}

impl std::fmt::Debug for UpdatePacket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let Self {
            sequence,
            reliable,
            unreliable,
        } = self;
        let unreliable: Vec<BytesDebug<'_>> = unreliable.iter().map(|b| BytesDebug(b)).collect();
        f.debug_struct("UpdatePacket")
            .field("sequence", sequence)
            .field("reliable", reliable)
            .field("unreliable", &unreliable)
            .finish()
    }
}

/// Acknowledges reliable entries, or control messages, by sequence number.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AckPacket {
    /// Sequence numbers being acknowledged.
    pub sequences: Vec<SequenceNumber>,
}

/// Tells a peer which role it has in the scene it just entered.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SceneStatus {
    /// Drawn from the sender's control sequence space, which is separate from
    /// reliable entries. The message is resent until acknowledged with a
    /// [`MessageBody::ControlAck`] and duplicates are dropped.
    pub sequence: SequenceNumber,
    /// Whether the receiver is now the scene host.
    pub scene_host: bool,
    /// Packed scene-entry batch (see [`wire::decode_batch`](super::wire::decode_batch));
    /// empty for a scene host.
    pub batch: Vec<u8>,
}

impl std::fmt::Debug for SceneStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let Self {
            sequence,
            scene_host,
            batch,
        } = self;
        f.debug_struct("SceneStatus")
            .field("sequence", sequence)
            .field("scene_host", scene_host)
            .field("batch", &BytesDebug(batch))
            .finish()
    }
}

struct BytesDebug<'a>(&'a [u8]);

impl std::fmt::Debug for BytesDebug<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("0x")?;
        for byte in self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

/// Envelope header.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct MessageHeader {
    /// Identifies the session; packets with another magic are dropped.
    pub magic: u16,
}

/// Envelope payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageBody {
    /// Entity updates.
    Updates(UpdatePacket),
    /// Acknowledgement of reliable entries.
    Ack(AckPacket),
    /// Scene role assignment, with the scene-entry batch for clients.
    SceneStatus(SceneStatus),
    /// The previous scene host left; the receiver takes over.
    HostTransfer {
        /// Control sequence number, acknowledged like [`SceneStatus::sequence`].
        sequence: SequenceNumber,
    },
    /// Keeps NAT mappings open when there is nothing else to send.
    KeepAlive,
    /// Acknowledgement of scene status and host transfer messages.
    ControlAck(AckPacket),
}

/// A message that a [`NonBlockingSocket`] sends and receives. When implementing
/// [`NonBlockingSocket`], deserialize received datagrams into this type (for
/// example with [`codec::decode_message`](super::codec::decode_message)).
///
/// [`NonBlockingSocket`]: crate::NonBlockingSocket
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Envelope header.
    pub header: MessageHeader,
    /// Envelope payload.
    pub body: MessageBody,
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
    fn reliable_entry_debug_prints_hex() {
        let entry = ReliableEntry {
            sequence: 4,
            bytes: vec![0x08, 0x02, 0xff],
        };
        let debug = format!("{entry:?}");
        assert!(debug.contains("0x0802ff"), "{debug}");
        assert!(debug.contains("sequence: 4"));
    }

    #[test]
    fn update_packet_debug_prints_each_unreliable_payload() {
        let packet = UpdatePacket {
            sequence: 9,
            reliable: Vec::new(),
            unreliable: vec![vec![1], vec![0xab, 0xcd]],
        };
        let debug = format!("{packet:?}");
        assert!(debug.contains("[0x01, 0xabcd]"), "{debug}");
    }

    #[test]
    fn scene_status_debug_prints_batch_as_hex() {
        let status = SceneStatus {
            sequence: 1,
            scene_host: true,
            batch: vec![0, 0],
        };
        let debug = format!("{status:?}");
        assert!(debug.contains("batch: 0x0000"), "{debug}");
        assert!(debug.contains("sequence: 1"), "{debug}");
    }

    #[test]
    fn update_packet_default_is_empty() {
        let packet = UpdatePacket::default();
        assert_eq!(packet.sequence, 0);
        assert!(packet.reliable.is_empty());
        assert!(packet.unreliable.is_empty());
    }
}
