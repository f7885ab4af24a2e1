use crate::config::{ServerConfig, WebSocketConfig};
use crate::connection::Connection;
use crate::handshake::perform_handshake;
use futures::Stream;
use log::{debug, warn};
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};

/// Outcome of accepting one inbound TCP connection: either a fully
/// handshaken connection ready for `run`, or an I/O error observed while
/// accepting the socket. A failed opening handshake never reaches here and
/// never takes the listener down — per spec it's logged and the connection
/// is simply dropped, with no notification to the embedder for that attempt.
pub enum AcceptResult {
    Connected(Connection<TcpStream>),
    Error(io::Error),
}

/// A bound WebSocket server. Accepts connections and performs the opening
/// handshake on a background task per connection, delivering results
/// through `incoming()`.
pub struct WsListener {
    local_addr: SocketAddr,
    shutdown: broadcast::Sender<()>,
    incoming: mpsc::Receiver<AcceptResult>,
}

impl WsListener {
    pub async fn bind(config: ServerConfig) -> Result<Self, io::Error> {
        let listener = TcpListener::bind(config.bind_addr).await?;
        let local_addr = listener.local_addr()?;
        let (tx, rx) = mpsc::channel(256);
        let (shutdown_tx, mut shutdown_rx) = broadcast::channel(1);
        let web_socket_config = config.web_socket_config;

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        debug!("listener on {local_addr} shutting down");
                        break;
                    }
                    accepted = listener.accept() => {
                        match accepted {
                            Ok((stream, peer_addr)) => {
                                let tx = tx.clone();
                                let shutdown_rx = shutdown_tx.subscribe();
                                tokio::spawn(async move {
                                    if let Some(connection) =
                                        handshake_connection(stream, peer_addr, web_socket_config, shutdown_rx).await
                                    {
                                        let _ = tx.send(AcceptResult::Connected(connection)).await;
                                    }
                                });
                            }
                            Err(err) => {
                                warn!("accept failed on {local_addr}: {err}");
                                if tx.send(AcceptResult::Error(err)).await.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                }
            }
        });

        Ok(Self {
            local_addr,
            shutdown: shutdown_tx,
            incoming: rx,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// A `Stream` of accepted, handshaken connections (and accept-layer
    /// I/O errors), yielded in the order they complete. Handshake failures
    /// never appear here — see `AcceptResult`.
    pub fn incoming(&mut self) -> AcceptStream<'_> {
        AcceptStream {
            receiver: &mut self.incoming,
        }
    }

    /// Stops the background accept loop and signals every connection
    /// accepted so far — whether or not it has been pulled out of
    /// `incoming()` yet — to send a 1001 Going Away close and tear down.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(());
    }
}

/// Performs the opening handshake on a freshly accepted socket. A failure
/// here is logged and the connection is dropped silently — it's never
/// surfaced through `AcceptResult`, only the embedder's logs see it.
async fn handshake_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    config: WebSocketConfig,
    shutdown: broadcast::Receiver<()>,
) -> Option<Connection<TcpStream>> {
    let (read_half, write_half) = tokio::io::split(stream);
    let mut reader = BufReader::new(read_half);
    let mut write_half = write_half;
    match perform_handshake(&mut reader, &mut write_half).await {
        Ok(()) => Some(Connection::from_parts(reader, write_half, peer_addr, config).with_shutdown(shutdown)),
        Err(err) => {
            warn!("handshake with {peer_addr} failed: {err}");
            None
        }
    }
}

pub struct AcceptStream<'a> {
    receiver: &'a mut mpsc::Receiver<AcceptResult>,
}

impl<'a> Stream for AcceptStream<'a> {
    type Item = AcceptResult;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().receiver.poll_recv(cx)
    }
}
