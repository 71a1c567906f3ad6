//! Binary codec for the packet envelope.
//!
//! Entity updates themselves are hand-packed by [`wire`](super::wire) so that
//! their layout is stable byte-for-byte. Everything around them (sequence
//! numbers, acks, scene status) travels inside a [`Message`] serialized with
//! bincode, and the bincode configuration lives only here.
//!
//! # Examples
//!
//! ```
//! use scene_sync::network::codec::{decode_message, encode_message};
//! use scene_sync::network::messages::{MessageBody, MessageHeader};
//! use scene_sync::Message;
//!
//! let keepalive = Message {
//!     header: MessageHeader { magic: 0x5C5E },
//!     body: MessageBody::KeepAlive,
//! };
//! let bytes = encode_message(&keepalive).expect("encoding should succeed");
//! assert_eq!(decode_message(&bytes).expect("decoding should succeed"), keepalive);
//! ```

use std::fmt;

use crate::network::messages::Message;

// Fixed-width integers keep a message's size a function of its payload
// lengths only.
fn config() -> impl bincode::config::Config {
    bincode::config::standard().with_fixed_int_encoding()
}

/// Errors that can occur during envelope encoding or decoding.
///
/// Bincode errors are opaque, so their message is kept as a `String`. The
/// packed update format has its own structured error,
/// [`WireError`](super::wire::WireError).
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CodecError {
    /// Bincode could not serialize the message.
    Encode {
        /// The underlying bincode error message.
        message: String,
    },
    /// The bytes are not a bincode-encoded [`Message`].
    Decode {
        /// The underlying bincode error message.
        message: String,
    },
    /// A message decoded, but the datagram carried more bytes after it.
    TrailingBytes {
        /// Number of unread bytes.
        count: usize,
    },
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Encode { message } => write!(f, "encoding message failed: {message}"),
            Self::Decode { message } => write!(f, "decoding message failed: {message}"),
            Self::TrailingBytes { count } => write!(f, "{count} trailing bytes after message"),
        }
    }
}

impl std::error::Error for CodecError {}

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Encodes a message into a new buffer.
pub fn encode_message(message: &Message) -> CodecResult<Vec<u8>> {
    bincode::serde::encode_to_vec(message, config()).map_err(|e| CodecError::Encode {
        message: e.to_string(),
    })
}

/// Appends the encoded message to `buffer`, returning the bytes written. Lets a
/// socket reuse one send buffer for every datagram.
pub fn encode_message_into(message: &Message, buffer: &mut Vec<u8>) -> CodecResult<usize> {
    let start = buffer.len();
    bincode::serde::encode_into_std_write(message, buffer, config())
        .map(|_| buffer.len() - start)
        .map_err(|e| CodecError::Encode {
            message: e.to_string(),
        })
}

/// Decodes one message. A datagram carries exactly one message, so trailing
/// bytes are rejected.
pub fn decode_message(bytes: &[u8]) -> CodecResult<Message> {
    let (message, read): (Message, usize) = bincode::serde::decode_from_slice(bytes, config())
        .map_err(|e| CodecError::Decode {
            message: e.to_string(),
        })?;
    if read != bytes.len() {
        return Err(CodecError::TrailingBytes {
            count: bytes.len() - read,
        });
    }
    Ok(message)
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
    use crate::network::messages::{AckPacket, MessageBody, MessageHeader, SceneStatus};

    fn message(body: MessageBody) -> Message {
        Message {
            header: MessageHeader { magic: 0xABCD },
            body,
        }
    }

    #[test]
    fn scene_status_survives_the_envelope() {
        let original = message(MessageBody::SceneStatus(SceneStatus {
            sequence: 12,
            scene_host: false,
            batch: vec![0, 0],
        }));
        let bytes = encode_message(&original).unwrap();
        assert_eq!(decode_message(&bytes).unwrap(), original);
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let mut bytes = encode_message(&message(MessageBody::KeepAlive)).unwrap();
        bytes.push(0);
        assert_eq!(
            decode_message(&bytes),
            Err(CodecError::TrailingBytes { count: 1 })
        );
    }

    #[test]
    fn garbage_is_a_decode_error() {
        assert!(matches!(
            decode_message(&[0xFF, 0xFF, 0xFF]),
            Err(CodecError::Decode { .. })
        ));
    }

    #[test]
    fn encode_into_appends_after_existing_bytes() {
        let keepalive = message(MessageBody::KeepAlive);
        let mut buffer = vec![9];
        let written = encode_message_into(&keepalive, &mut buffer).unwrap();
        assert_eq!(buffer.len(), 1 + written);
        assert_eq!(&buffer[1..], encode_message(&keepalive).unwrap().as_slice());
    }

    #[test]
    fn ack_size_does_not_depend_on_sequence_values() {
        let small = encode_message(&message(MessageBody::Ack(AckPacket { sequences: vec![1] })));
        let large = encode_message(&message(MessageBody::Ack(AckPacket {
            sequences: vec![u32::MAX],
        })));
        assert_eq!(small.unwrap().len(), large.unwrap().len());
    }

    #[test]
    fn errors_display_their_cause() {
        assert_eq!(
            CodecError::TrailingBytes { count: 3 }.to_string(),
            "3 trailing bytes after message"
        );
        assert!(CodecError::Decode {
            message: "unexpected end".to_owned()
        }
        .to_string()
        .contains("unexpected end"));
    }
}
