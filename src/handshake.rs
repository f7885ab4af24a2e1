use crate::error::Error;
use base64::prelude::BASE64_STANDARD;
use base64::Engine;
use sha1::{Digest, Sha1};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{timeout, Duration};

const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";
const MAX_HEADER_BYTES: usize = 1024 * 16;
const HEADER_READ_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_HEADERS: usize = 32;

pub(crate) fn generate_websocket_accept_value(key: &str) -> String {
    let mut sha1 = Sha1::new();
    sha1.update(key.as_bytes());
    sha1.update(WEBSOCKET_GUID.as_bytes());
    BASE64_STANDARD.encode(sha1.finalize())
}

/// Reads the HTTP request line and headers off `reader`, up to and
/// including the blank line that terminates them. Leaves any bytes that
/// follow (the start of the first WebSocket frame, in a well-behaved
/// client) sitting in `reader`'s own buffer for the caller to read next.
async fn read_header_block<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<Vec<u8>, Error> {
    let mut head = Vec::new();
    loop {
        if head.len() > MAX_HEADER_BYTES {
            return Err(Error::IncompleteHTTPRequest);
        }
        let available = timeout(HEADER_READ_TIMEOUT, reader.fill_buf())
            .await
            .map_err(|_| Error::IncompleteHTTPRequest)??;
        if available.is_empty() {
            return Err(Error::IncompleteHTTPRequest);
        }
        head.extend_from_slice(available);
        if let Some(end) = find_header_terminator(&head) {
            let overshoot = head.len() - end;
            reader.consume(available.len() - overshoot);
            head.truncate(end);
            return Ok(head);
        }
        reader.consume(available.len());
    }
}

fn find_header_terminator(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|i| i + 4)
}

fn header_value<'h, 'b>(headers: &'h [httparse::Header<'b>], name: &str) -> Option<&'b str> {
    headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case(name))
        .and_then(|h| std::str::from_utf8(h.value).ok())
}

fn extract_websocket_key(head: &[u8]) -> Result<String, Error> {
    let mut header_storage = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut request = httparse::Request::new(&mut header_storage);
    match request.parse(head)? {
        httparse::Status::Complete(_) => {}
        httparse::Status::Partial => return Err(Error::IncompleteHTTPRequest),
    }

    let connection = header_value(request.headers, "connection").ok_or(Error::MissingUpgrade)?;
    if !connection.split(',').any(|token| token.trim().eq_ignore_ascii_case("upgrade")) {
        return Err(Error::InvalidUpgrade);
    }

    let upgrade = header_value(request.headers, "upgrade").ok_or(Error::MissingUpgrade)?;
    if !upgrade.trim().eq_ignore_ascii_case("websocket") {
        return Err(Error::InvalidUpgrade);
    }

    header_value(request.headers, "sec-websocket-key")
        .map(|key| key.trim().to_string())
        .ok_or(Error::InvalidWebsocketKey)
}

/// Reads and validates the opening handshake request from `reader`, then
/// writes the `101 Switching Protocols` response to `writer`. Returns once
/// the connection is ready to exchange frames.
pub async fn perform_handshake<R, W>(reader: &mut R, writer: &mut W) -> Result<(), Error>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let head = read_header_block(reader).await?;
    let key = extract_websocket_key(&head)?;
    let accept = generate_websocket_accept_value(&key);

    let response = format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Connection: Upgrade\r\n\
         Upgrade: websocket\r\n\
         Sec-WebSocket-Accept: {accept}\r\n\
         \r\n"
    );
    writer.write_all(response.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}
