#![no_main]

use libfuzzer_sys::fuzz_target;
use tokio::io::BufReader;
use tokio::runtime::Runtime;
use ws_engine::decoder::decode_frame;
use ws_engine::handshake::perform_handshake;
use ws_engine::utf8::Utf8Validator;

// Splits the fuzz input in two: the first half is fed through the opening
// handshake parser, the second through the frame decoder. Neither path
// should ever panic, hang, or read past the buffer it was given, no matter
// how malformed the bytes are.
fuzz_target!(|data: &[u8]| {
    let runtime = Runtime::new().unwrap();
    let split = data.len() / 2;
    let (handshake_bytes, frame_bytes) = data.split_at(split);

    runtime.block_on(async move {
        let mut reader = BufReader::new(handshake_bytes);
        let mut response = Vec::new();
        let _ = perform_handshake(&mut reader, &mut response).await;

        let mut reader = frame_bytes;
        let mut utf8 = Utf8Validator::new();
        let _ = decode_frame(&mut reader, true, None, &mut utf8, None).await;
    });
});
