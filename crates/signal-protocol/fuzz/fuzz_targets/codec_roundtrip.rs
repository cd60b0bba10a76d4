#![no_main]

use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;
use signal_protocol::SignalCodec;
use tokio_util::codec::{Decoder, Encoder};

fuzz_target!(|data: &[u8]| {
    let mut codec = SignalCodec::new();
    let mut buf = BytesMut::from(data);

    if let Ok(Some(message)) = codec.decode(&mut buf) {
        // Anything we accept must re-encode and decode to the same message
        let mut encoded = BytesMut::new();
        if codec.encode(message.clone(), &mut encoded).is_ok() {
            let decoded = codec
                .decode(&mut encoded)
                .ok()
                .flatten()
                .unwrap_or_else(|| panic!("re-encoded frame failed to decode"));
            assert_eq!(message, decoded);
            assert!(encoded.is_empty());
        }
    }
});
