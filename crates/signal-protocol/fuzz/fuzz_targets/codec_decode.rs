#![no_main]

use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;
use signal_protocol::SignalCodec;
use tokio_util::codec::Decoder;

fuzz_target!(|data: &[u8]| {
    let mut codec = SignalCodec::new();
    let mut buf = BytesMut::from(data);

    // Decoding arbitrary input must only ever return errors, never panic.
    // Keep pulling frames until the buffer is exhausted or rejected.
    while let Ok(Some(_)) = codec.decode(&mut buf) {}
});
