//! Fuzz target for the entity update wire format.
//!
//! # Safety Properties Tested
//! - `decode`, `decode_prefix` and `decode_batch` never panic
//! - A prefix decode never claims more bytes than it was given
//! - Anything that decodes packs back to the exact same bytes

#![no_main]

use libfuzzer_sys::fuzz_target;

use scene_sync::network::wire;

fuzz_target!(|data: &[u8]| {
    if let Ok((update, read)) = wire::decode_prefix(data) {
        assert!(read <= data.len());
        let packed = wire::encode(&update).expect("decoded update re-encodes");
        assert_eq!(packed.as_slice(), &data[..read]);
    }

    if let Ok(update) = wire::decode(data) {
        assert_eq!(update.encoded_len(), data.len());
    }

    if let Ok(batch) = wire::decode_batch(data) {
        let packed = wire::encode_batch(&batch).expect("decoded batch re-encodes");
        assert_eq!(packed.as_slice(), data);
    }
});
