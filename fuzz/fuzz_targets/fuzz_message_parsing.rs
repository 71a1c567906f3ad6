//! Fuzz target for network message deserialization.
//!
//! This target tests that arbitrary bytes cannot crash the message deserializer.
//! A datagram that does decode is unpacked the way the protocol would: every
//! reliable and unreliable payload and any scene-entry batch go through the
//! wire decoder as well.
//!
//! # Safety Properties Tested
//! - No panics on arbitrary input
//! - No unbounded memory allocation
//! - Graceful error handling for invalid data

#![no_main]

use libfuzzer_sys::fuzz_target;

use scene_sync::network::codec;
use scene_sync::network::messages::MessageBody;
use scene_sync::network::wire;
use scene_sync::Message;

fuzz_target!(|data: &[u8]| {
    let Ok(message) = codec::decode_message(data) else {
        return;
    };

    match &message.body {
        MessageBody::Updates(packet) => {
            for entry in &packet.reliable {
                let _ = wire::decode(&entry.bytes);
            }
            for bytes in &packet.unreliable {
                let _ = wire::decode(bytes);
            }
        },
        MessageBody::SceneStatus(status) => {
            let _ = wire::decode_batch(&status.batch);
        },
        MessageBody::Ack(_)
        | MessageBody::ControlAck(_)
        | MessageBody::HostTransfer { .. }
        | MessageBody::KeepAlive => {},
    }

    // Anything that decoded must encode again
    let reencoded = codec::encode_message(&message).expect("decoded message re-encodes");
    let again: Message = codec::decode_message(&reencoded).expect("re-encoded message decodes");
    assert_eq!(again, message);
});
