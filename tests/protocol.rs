//! End-to-end scenarios driving a real `Connection` over an in-memory duplex
//! pipe, standing in for the peer's TCP socket.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use ws_engine::config::{ServerConfig, WebSocketConfig};
use ws_engine::connection::Connection;
use ws_engine::encoder::encode_frame;
use ws_engine::frame::OpCode;
use ws_engine::listener::{AcceptResult, WsListener};

fn mask_as_client(mut bytes: Vec<u8>, header_len: usize, key: [u8; 4], payload: &[u8]) -> Vec<u8> {
    bytes[1] |= 0b1000_0000;
    let mut masked = bytes[..header_len].to_vec();
    masked.extend_from_slice(&key);
    for (i, byte) in payload.iter().enumerate() {
        masked.push(byte ^ key[i % 4]);
    }
    masked
}

fn client_frame(fin: bool, opcode: OpCode, payload: &[u8], key: [u8; 4]) -> Vec<u8> {
    let bytes = encode_frame(fin, opcode, payload);
    let header_len = if payload.len() <= 125 {
        2
    } else if payload.len() <= u16::MAX as usize {
        4
    } else {
        10
    };
    mask_as_client(bytes, header_len, key, payload)
}

fn new_connection(
    peer: tokio::io::DuplexStream,
) -> Connection<tokio::io::DuplexStream> {
    let (read_half, write_half) = tokio::io::split(peer);
    let reader = tokio::io::BufReader::new(read_half);
    let addr: SocketAddr = "127.0.0.1:1".parse().unwrap();
    Connection::from_parts(reader, write_half, addr, WebSocketConfig::default())
}

async fn read_frame_header<R: AsyncReadExt + Unpin>(client: &mut R) -> (u8, u8, Vec<u8>) {
    let mut header = [0u8; 2];
    client.read_exact(&mut header).await.unwrap();
    let len7 = header[1] & 0x7f;
    let len = match len7 {
        126 => {
            let mut ext = [0u8; 2];
            client.read_exact(&mut ext).await.unwrap();
            u16::from_be_bytes(ext) as usize
        }
        127 => {
            let mut ext = [0u8; 8];
            client.read_exact(&mut ext).await.unwrap();
            u64::from_be_bytes(ext) as usize
        }
        n => n as usize,
    };
    let mut payload = vec![0u8; len];
    if len > 0 {
        client.read_exact(&mut payload).await.unwrap();
    }
    (header[0], header[1], payload)
}

/// Scenario 1: a single masked text frame carrying "hello" over the wire.
#[tokio::test]
async fn masked_text_frame_reaches_the_text_handler() {
    let (mut client, server) = tokio::io::duplex(1024);
    let mut connection = new_connection(server);

    let received = Arc::new(Mutex::new(None));
    let received_clone = received.clone();
    connection.on_text(move |text| {
        *received_clone.lock().unwrap() = Some(text);
    });

    // RFC 6455 worked example: "hello" masked with key 0x37 0xfa 0x21 0x3d.
    let wire = client_frame(true, OpCode::Text, b"hello", [0x37, 0xfa, 0x21, 0x3d]);
    assert_eq!(&wire[2..6], &[0x37, 0xfa, 0x21, 0x3d]);
    assert_eq!(&wire[6..], &[0x5f, 0x9f, 0x4d, 0x51, 0x58]);

    let handle = tokio::spawn(connection.run());
    client.write_all(&wire).await.unwrap();
    drop(client);
    handle.await.unwrap();

    assert_eq!(received.lock().unwrap().take(), Some("hello".to_string()));
}

/// Scenario 2: a ping is answered with an unmasked pong carrying the same
/// payload, and the connection stays open.
#[tokio::test]
async fn ping_is_answered_with_a_pong() {
    let (mut client, server) = tokio::io::duplex(1024);
    let connection = new_connection(server);
    let sender = connection.sender();
    let handle = tokio::spawn(connection.run());

    let wire = client_frame(true, OpCode::Ping, b"hi", [0x01, 0x02, 0x03, 0x04]);
    client.write_all(&wire).await.unwrap();

    let (first_byte, _, payload) = read_frame_header(&mut client).await;
    assert_eq!(first_byte & 0x0f, OpCode::Pong.as_u8());
    assert_eq!(first_byte & 0x80, 0x80, "pong must be final");
    assert_eq!(payload, b"hi");
    assert_eq!(sender.status(), ws_engine::connection::ConnectionStatus::Open);

    sender.close().await.unwrap();
    handle.await.unwrap();
}

/// Scenario 3: a peer-initiated close is echoed and the read loop exits.
#[tokio::test]
async fn close_handshake_echoes_the_code_and_exits() {
    let (mut client, server) = tokio::io::duplex(1024);
    let connection = new_connection(server);
    let handle = tokio::spawn(connection.run());

    let payload = 1000u16.to_be_bytes();
    let wire = client_frame(true, OpCode::Close, &payload, [0x11, 0x22, 0x33, 0x44]);
    client.write_all(&wire).await.unwrap();

    let (first_byte, _, echoed) = read_frame_header(&mut client).await;
    assert_eq!(first_byte & 0x0f, OpCode::Close.as_u8());
    assert_eq!(echoed, payload.to_vec());

    handle.await.unwrap();
}

/// Scenario 4: a 3-byte UTF-8 code point split across a fragmentation
/// boundary is reassembled correctly.
#[tokio::test]
async fn split_code_point_reassembles_across_fragments() {
    let (mut client, server) = tokio::io::duplex(1024);
    let mut connection = new_connection(server);

    let received = Arc::new(Mutex::new(None));
    let received_clone = received.clone();
    connection.on_text(move |text| {
        *received_clone.lock().unwrap() = Some(text);
    });

    let handle = tokio::spawn(connection.run());

    let first = client_frame(false, OpCode::Text, &[0xE2, 0x82], [0x01, 0x02, 0x03, 0x04]);
    let second = client_frame(true, OpCode::Continue, &[0xAC], [0x05, 0x06, 0x07, 0x08]);
    client.write_all(&first).await.unwrap();
    client.write_all(&second).await.unwrap();
    drop(client);
    handle.await.unwrap();

    assert_eq!(received.lock().unwrap().take(), Some("\u{20ac}".to_string()));
}

/// Scenario 5: an overlong UTF-8 encoding is rejected with close code 1007.
#[tokio::test]
async fn overlong_encoding_closes_with_1007() {
    let (mut client, server) = tokio::io::duplex(1024);
    let connection = new_connection(server);
    let handle = tokio::spawn(connection.run());

    // 0xC0 0xAF is an overlong encoding of '/'.
    let wire = client_frame(true, OpCode::Text, &[0xC0, 0xAF], [0x01, 0x02, 0x03, 0x04]);
    client.write_all(&wire).await.unwrap();

    let (first_byte, _, payload) = read_frame_header(&mut client).await;
    assert_eq!(first_byte & 0x0f, OpCode::Close.as_u8());
    let code = u16::from_be_bytes([payload[0], payload[1]]);
    assert_eq!(code, 1007);

    handle.await.unwrap();
}

/// Scenario 6: a new data frame arriving while a fragmented message is
/// already in progress is a protocol error, closed with 1002.
#[tokio::test]
async fn data_frame_during_fragmentation_closes_with_1002() {
    let (mut client, server) = tokio::io::duplex(1024);
    let connection = new_connection(server);
    let handle = tokio::spawn(connection.run());

    let first = client_frame(false, OpCode::Text, b"ab", [0x01, 0x02, 0x03, 0x04]);
    let second = client_frame(true, OpCode::Text, b"cd", [0x05, 0x06, 0x07, 0x08]);
    client.write_all(&first).await.unwrap();
    client.write_all(&second).await.unwrap();

    let (first_byte, _, payload) = read_frame_header(&mut client).await;
    assert_eq!(first_byte & 0x0f, OpCode::Close.as_u8());
    let code = u16::from_be_bytes([payload[0], payload[1]]);
    assert_eq!(code, 1002);

    handle.await.unwrap();
}

/// A listener-wide shutdown reaches every already-accepted connection, not
/// just the accept loop: each gets a 1001 Going Away close.
#[tokio::test]
async fn listener_shutdown_closes_a_live_connection_with_1001() {
    let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
    let mut listener = WsListener::bind(ServerConfig::new(addr)).await.unwrap();
    let bound_addr = listener.local_addr();

    let mut client = tokio::net::TcpStream::connect(bound_addr).await.unwrap();
    client
        .write_all(
            b"GET / HTTP/1.1\r\n\
              Host: localhost\r\n\
              Upgrade: websocket\r\n\
              Connection: Upgrade\r\n\
              Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\r\n",
        )
        .await
        .unwrap();

    let mut response = Vec::new();
    let mut chunk = [0u8; 256];
    loop {
        let n = client.read(&mut chunk).await.unwrap();
        response.extend_from_slice(&chunk[..n]);
        if response.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }
    let response = String::from_utf8_lossy(&response);
    assert!(response.starts_with("HTTP/1.1 101 Switching Protocols"));

    use futures::StreamExt;
    let accepted = listener.incoming().next().await.unwrap();
    let connection = match accepted {
        AcceptResult::Connected(connection) => connection,
        AcceptResult::Error(err) => panic!("unexpected accept error: {err}"),
    };
    let run_handle = tokio::spawn(connection.run());

    listener.shutdown();

    let (first_byte, _, payload) = read_frame_header(&mut client).await;
    assert_eq!(first_byte & 0x0f, OpCode::Close.as_u8());
    let code = u16::from_be_bytes([payload[0], payload[1]]);
    assert_eq!(code, 1001);

    run_handle.await.unwrap();
}
