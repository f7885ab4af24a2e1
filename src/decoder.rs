use crate::error::Error;
use crate::frame::{DataOpcode, Frame, OpCode};
use crate::utf8::Utf8Validator;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Result of trying to decode the next frame off the wire.
pub enum DecodeOutcome {
    Frame(Frame),
    /// A clean end of stream observed before any byte of a new frame arrived.
    Eof,
}

/// Decodes a single frame from `reader`.
///
/// `expect_mask` should be `true` on the server side (inbound frames from a
/// client must be masked). `pending_continuation` is the data opcode of the
/// fragmented message currently in flight, if any — it drives the
/// continuation-discipline check and tells the function whether a
/// `Continue` frame's payload belongs to a text or binary message for UTF-8
/// purposes. `utf8` carries the dangling bytes of a text message split
/// across frames and is updated in place. `max_frame_size`, when set,
/// rejects a frame whose declared payload length exceeds it before a
/// single byte of that payload is allocated or read.
pub async fn decode_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
    expect_mask: bool,
    pending_continuation: Option<DataOpcode>,
    utf8: &mut Utf8Validator,
    max_frame_size: Option<usize>,
) -> Result<DecodeOutcome, Error> {
    let mut header = [0u8; 2];
    if read_exact_or_eof(reader, &mut header).await?.is_none() {
        return Ok(DecodeOutcome::Eof);
    }

    let fin = header[0] & 0b1000_0000 != 0;
    let rsv1 = header[0] & 0b0100_0000 != 0;
    let rsv2 = header[0] & 0b0010_0000 != 0;
    let rsv3 = header[0] & 0b0001_0000 != 0;
    if rsv1 || rsv2 || rsv3 {
        return Err(Error::InvalidRSV);
    }

    let opcode = OpCode::from_byte(header[0] & 0b0000_1111)?;

    // Continuation discipline. Control frames may interleave a fragmented
    // data message and are exempt from this check.
    if !opcode.is_control() {
        match (pending_continuation, opcode) {
            (Some(_), OpCode::Continue) => {}
            (Some(_), _) => return Err(Error::InvalidOpcode),
            (None, OpCode::Continue) => return Err(Error::InvalidContinuation),
            (None, _) => {}
        }
    }

    let masked = header[1] & 0b1000_0000 != 0;
    if expect_mask && !masked {
        return Err(Error::UnmaskedFrame);
    }

    if opcode.is_control() && !fin {
        return Err(Error::FragmentedControlFrame);
    }

    let len7 = header[1] & 0b0111_1111;
    if opcode.is_control() && len7 > 125 {
        return Err(Error::ControlFramePayloadSize);
    }

    let payload_len: u64 = match len7 {
        0..=125 => len7 as u64,
        126 => {
            let mut ext = [0u8; 2];
            reader.read_exact(&mut ext).await?;
            u16::from_be_bytes(ext) as u64
        }
        _ => {
            let mut ext = [0u8; 8];
            reader.read_exact(&mut ext).await?;
            u64::from_be_bytes(ext)
        }
    };

    if let Some(max) = max_frame_size {
        if payload_len > max as u64 {
            return Err(Error::MaxFrameSize);
        }
    }

    let mask = if masked {
        let mut key = [0u8; 4];
        reader.read_exact(&mut key).await?;
        Some(key)
    } else {
        None
    };

    let mut payload = vec![0u8; payload_len as usize];
    reader.read_exact(&mut payload).await?;

    if let Some(key) = mask {
        for (i, byte) in payload.iter_mut().enumerate() {
            *byte ^= key[i % 4];
        }
    }

    let is_text_fragment = opcode == OpCode::Text
        || (opcode == OpCode::Continue && pending_continuation == Some(DataOpcode::Text));
    if is_text_fragment {
        utf8.accept_fragment(&payload, fin)?;
    }

    if opcode == OpCode::Close && payload.len() > 2 {
        std::str::from_utf8(&payload[2..]).map_err(|_| Error::InvalidClosePayload)?;
    }

    Ok(DecodeOutcome::Frame(Frame::new(fin, opcode, payload)))
}

/// Like `read_exact`, but distinguishes "stream ended before the first byte
/// of this read" (clean EOF) from "stream ended partway through" (an error,
/// since a frame header or payload is not optional once begun).
async fn read_exact_or_eof<R: AsyncRead + Unpin>(
    reader: &mut R,
    buf: &mut [u8],
) -> Result<Option<()>, Error> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(Error::IOError {
                source: std::io::Error::from(std::io::ErrorKind::UnexpectedEof),
            });
        }
        filled += n;
    }
    Ok(Some(()))
}
