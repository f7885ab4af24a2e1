use crate::error::Error;
use crate::frame::OpCode;
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Encodes a single frame's bytes. The server never masks its own frames
/// (masking is a client-to-server obligation only, RFC 6455 §5.1).
pub fn encode_frame(fin: bool, opcode: OpCode, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 10);
    out.push(((fin as u8) << 7) | opcode.as_u8());

    let len = payload.len();
    if len <= 125 {
        out.push(len as u8);
    } else if len <= u16::MAX as usize {
        out.push(126);
        out.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        out.push(127);
        out.extend_from_slice(&(len as u64).to_be_bytes());
    }

    out.extend_from_slice(payload);
    out
}

/// Encodes and writes a single frame to `writer`.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    fin: bool,
    opcode: OpCode,
    payload: &[u8],
) -> Result<(), Error> {
    writer.write_all(&encode_frame(fin, opcode, payload)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_payload_uses_the_single_byte_length() {
        let bytes = encode_frame(true, OpCode::Binary, &vec![0u8; 10]);
        assert_eq!(bytes[1], 10);
        assert_eq!(bytes.len(), 2 + 10);
    }

    #[test]
    fn boundary_payload_switches_to_the_16_bit_length() {
        let bytes = encode_frame(true, OpCode::Binary, &vec![0u8; 126]);
        assert_eq!(bytes[1], 126);
        assert_eq!(u16::from_be_bytes([bytes[2], bytes[3]]), 126);
    }

    #[test]
    fn large_payload_uses_the_64_bit_length() {
        let bytes = encode_frame(true, OpCode::Binary, &vec![0u8; 70_000]);
        assert_eq!(bytes[1], 127);
        let len_bytes: [u8; 8] = bytes[2..10].try_into().unwrap();
        assert_eq!(u64::from_be_bytes(len_bytes), 70_000);
    }

    #[test]
    fn first_byte_carries_fin_and_opcode() {
        let bytes = encode_frame(false, OpCode::Continue, &[]);
        assert_eq!(bytes[0], 0x00);
        let bytes = encode_frame(true, OpCode::Text, &[]);
        assert_eq!(bytes[0], 0x81);
    }

    #[tokio::test]
    async fn write_frame_sends_exactly_the_encoded_bytes() {
        let mut buf = Vec::new();
        write_frame(&mut buf, true, OpCode::Ping, b"ping").await.unwrap();
        assert_eq!(buf, encode_frame(true, OpCode::Ping, b"ping"));
    }
}
