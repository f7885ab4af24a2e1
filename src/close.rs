//! RFC 6455 §7.4 close-code policy: decide which close payload, if any,
//! gets echoed back to the peer.

/// Close codes a peer may legitimately send and that we will echo back
/// verbatim. Excludes the reserved/internal codes (1004, 1005, 1006) and
/// anything outside the defined ranges.
fn is_acceptable_code(code: u16) -> bool {
    matches!(
        code,
        1000..=1003 | 1007..=1011
    ) || (3000..5000).contains(&code)
}

const PROTOCOL_ERROR_CODE: u16 = 1002;

/// Normalizes an inbound close payload for echo per spec:
/// - empty stays empty
/// - a single byte (can't carry a code) becomes 1002
/// - two or more bytes: keep the code if it's in the acceptable set, else
///   replace the whole payload with 1002 and drop any reason text
pub fn normalize_close_payload(payload: &[u8]) -> Vec<u8> {
    match payload.len() {
        0 => Vec::new(),
        1 => PROTOCOL_ERROR_CODE.to_be_bytes().to_vec(),
        _ => {
            let code = u16::from_be_bytes([payload[0], payload[1]]);
            if is_acceptable_code(code) {
                payload.to_vec()
            } else {
                PROTOCOL_ERROR_CODE.to_be_bytes().to_vec()
            }
        }
    }
}
