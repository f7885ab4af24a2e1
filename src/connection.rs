use crate::close::normalize_close_payload;
use crate::config::WebSocketConfig;
use crate::decoder::{decode_frame, DecodeOutcome};
use crate::encoder::write_frame;
use crate::error::Error;
use crate::frame::{DataOpcode, Frame, OpCode};
use crate::utf8::Utf8Validator;
use log::{debug, trace, warn};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, DuplexStream, ReadHalf, WriteHalf};
use tokio::sync::{broadcast, Mutex, Notify};

/// Size of the in-process pipe handed to a `stream_start` handler. Large
/// enough to absorb a handful of frames before the pipe's own backpressure
/// starts stalling the read loop.
const STREAM_BUFFER_CAPACITY: usize = 64 * 1024;

/// Lifecycle of a connection. Shared, via an atomic cell, between the task
/// driving `Connection::run` and every cloned `ConnectionSender`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Opening,
    Open,
    Closing,
    Closed,
}

impl ConnectionStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnectionStatus::Opening,
            1 => ConnectionStatus::Open,
            2 => ConnectionStatus::Closing,
            _ => ConnectionStatus::Closed,
        }
    }
}

struct StatusCell(AtomicU8);

impl StatusCell {
    fn new(status: ConnectionStatus) -> Self {
        Self(AtomicU8::new(status as u8))
    }

    fn load(&self) -> ConnectionStatus {
        ConnectionStatus::from_u8(self.0.load(Ordering::Acquire))
    }

    fn store(&self, status: ConnectionStatus) {
        self.0.store(status as u8, Ordering::Release);
    }
}

/// The read half of the in-process pipe a `stream_start` handler receives
/// for a message delivered incrementally rather than buffered whole.
pub type MessageReader = DuplexStream;

struct Writer<S> {
    write_half: WriteHalf<S>,
}

impl<S: AsyncWrite + Unpin> Writer<S> {
    fn new(write_half: WriteHalf<S>) -> Self {
        Self { write_half }
    }

    async fn write_frame(&mut self, fin: bool, opcode: OpCode, payload: &[u8]) -> Result<(), Error> {
        write_frame(&mut self.write_half, fin, opcode, payload).await?;
        self.write_half.flush().await?;
        Ok(())
    }
}

/// A cloneable handle for pushing frames out on a connection and observing
/// or driving its lifecycle, independent of the task running `Connection::run`.
#[derive(Clone)]
pub struct ConnectionSender<S> {
    writer: Arc<Mutex<Writer<S>>>,
    status: Arc<StatusCell>,
    notify: Arc<Notify>,
}

impl<S: AsyncWrite + Unpin> ConnectionSender<S> {
    /// Sends a complete, unfragmented text or binary message.
    pub async fn send_message(&self, opcode: DataOpcode, payload: Vec<u8>) -> Result<(), Error> {
        self.send_frame(true, opcode.as_opcode(), &payload).await
    }

    /// Sends a single raw frame. Exposed for callers that want to hand-roll
    /// fragmentation or send a ping of their own.
    pub async fn send_frame(&self, fin: bool, opcode: OpCode, payload: &[u8]) -> Result<(), Error> {
        if self.status.load() != ConnectionStatus::Open {
            return Err(Error::CommunicationError);
        }
        self.writer.lock().await.write_frame(fin, opcode, payload).await
    }

    /// Initiates an application-driven close: sends a close frame with code
    /// 1001 and wakes the read loop so it can tear the connection down
    /// without waiting on the peer's echo.
    pub async fn close(&self) -> Result<(), Error> {
        if self.status.load() != ConnectionStatus::Open {
            return Ok(());
        }
        self.status.store(ConnectionStatus::Closing);
        let result = self
            .writer
            .lock()
            .await
            .write_frame(true, OpCode::Close, &1001u16.to_be_bytes())
            .await;
        self.notify.notify_one();
        result
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status.load()
    }
}

type TextHandler = Box<dyn FnMut(String) + Send>;
type BinaryHandler = Box<dyn FnMut(Vec<u8>) + Send>;
type FrameHandler = Box<dyn FnMut(&Frame) + Send>;
type StreamStartHandler = Box<dyn FnMut(DataOpcode, MessageReader) + Send>;

enum MessageSink {
    Buffered(Vec<u8>),
    Streamed(DuplexStream),
}

/// An accepted, handshaken WebSocket connection. Owns the read half and
/// drives the protocol state machine in `run`; application code interacts
/// with it by registering handlers before calling `run` and by sending
/// frames through the `ConnectionSender` obtained from `sender()`.
pub struct Connection<S> {
    reader: BufReader<ReadHalf<S>>,
    writer: Arc<Mutex<Writer<S>>>,
    status: Arc<StatusCell>,
    notify: Arc<Notify>,
    config: WebSocketConfig,
    peer_addr: SocketAddr,
    utf8: Utf8Validator,
    active_opcode: Option<DataOpcode>,
    sink: Option<MessageSink>,
    text_handler: Option<TextHandler>,
    binary_handler: Option<BinaryHandler>,
    frame_handler: Option<FrameHandler>,
    stream_start_handler: Option<StreamStartHandler>,
    shutdown: Option<broadcast::Receiver<()>>,
}

impl<S: AsyncRead + AsyncWrite + Unpin> Connection<S> {
    /// Builds a connection from an already-handshaken stream, split into its
    /// read and write halves. Public so embedders (and integration tests)
    /// can drive the state machine over any `AsyncRead + AsyncWrite`, not
    /// just a `TcpStream` accepted by `WsListener`.
    pub fn from_parts(
        reader: BufReader<ReadHalf<S>>,
        write_half: WriteHalf<S>,
        peer_addr: SocketAddr,
        config: WebSocketConfig,
    ) -> Self {
        Self {
            reader,
            writer: Arc::new(Mutex::new(Writer::new(write_half))),
            status: Arc::new(StatusCell::new(ConnectionStatus::Open)),
            notify: Arc::new(Notify::new()),
            config,
            peer_addr,
            utf8: Utf8Validator::new(),
            active_opcode: None,
            sink: None,
            text_handler: None,
            binary_handler: None,
            frame_handler: None,
            stream_start_handler: None,
            shutdown: None,
        }
    }

    /// Subscribes this connection to a listener-wide shutdown signal: on
    /// receipt, `run` sends a 1001 (Going Away) close and tears the
    /// connection down without waiting for the peer, the same as a local
    /// `ConnectionSender::close()` call.
    pub fn with_shutdown(mut self, shutdown: broadcast::Receiver<()>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status.load()
    }

    /// A cloneable handle that can send frames and request closure from
    /// outside the task that eventually calls `run`.
    pub fn sender(&self) -> ConnectionSender<S> {
        ConnectionSender {
            writer: self.writer.clone(),
            status: self.status.clone(),
            notify: self.notify.clone(),
        }
    }

    /// Registers a handler invoked with a complete text message, once
    /// reassembled from any fragmentation. Mutually exclusive in practice
    /// with `on_stream_start` — register one or the other, not both.
    pub fn on_text<F: FnMut(String) + Send + 'static>(&mut self, handler: F) {
        self.text_handler = Some(Box::new(handler));
    }

    /// Registers a handler invoked with a complete binary message.
    pub fn on_binary<F: FnMut(Vec<u8>) + Send + 'static>(&mut self, handler: F) {
        self.binary_handler = Some(Box::new(handler));
    }

    /// Registers a handler invoked with every decoded frame, before
    /// reassembly or dispatch. Useful for logging or metrics; does not
    /// affect protocol handling.
    pub fn on_frame<F: FnMut(&Frame) + Send + 'static>(&mut self, handler: F) {
        self.frame_handler = Some(Box::new(handler));
    }

    /// Registers a handler invoked as soon as a new text or binary message
    /// starts, handing it a `MessageReader` that streams the message's
    /// bytes as frames arrive rather than buffering the whole thing. The
    /// reader reaches EOF when the final fragment is processed. When this
    /// handler is registered, `on_text`/`on_binary` are not invoked.
    pub fn on_stream_start<F: FnMut(DataOpcode, MessageReader) + Send + 'static>(&mut self, handler: F) {
        self.stream_start_handler = Some(Box::new(handler));
    }

    /// Drives the connection until it closes, dispatching to whichever
    /// handlers were registered. Consumes the connection: once a
    /// connection is closed there is nothing left to do with it but drop
    /// the socket.
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                _ = self.notify.notified() => {
                    if self.status.load() == ConnectionStatus::Closing {
                        self.status.store(ConnectionStatus::Closed);
                    }
                    break;
                }
                _ = wait_for_shutdown(&mut self.shutdown) => {
                    debug!("listener shutdown signal received for {}", self.peer_addr);
                    self.status.store(ConnectionStatus::Closing);
                    let _ = self
                        .writer
                        .lock()
                        .await
                        .write_frame(true, OpCode::Close, &1001u16.to_be_bytes())
                        .await;
                    self.status.store(ConnectionStatus::Closed);
                    break;
                }
                outcome = decode_frame(&mut self.reader, true, self.active_opcode, &mut self.utf8, self.config.max_frame_size) => {
                    match outcome {
                        Ok(DecodeOutcome::Eof) => {
                            self.status.store(ConnectionStatus::Closed);
                            break;
                        }
                        Ok(DecodeOutcome::Frame(frame)) => {
                            if !frame.opcode.is_control() {
                                if let Some(handler) = self.frame_handler.as_mut() {
                                    handler(&frame);
                                }
                            }
                            match self.dispatch(frame).await {
                                Ok(true) => break,
                                Ok(false) => {}
                                Err(err) => {
                                    self.fail(err).await;
                                    break;
                                }
                            }
                        }
                        Err(err) => {
                            self.fail(err).await;
                            break;
                        }
                    }
                }
            }
        }
        debug!("connection with {} closed", self.peer_addr);
    }

    /// Returns `Ok(true)` when the loop in `run` should stop (a close frame
    /// was exchanged).
    async fn dispatch(&mut self, frame: Frame) -> Result<bool, Error> {
        match frame.opcode {
            OpCode::Text | OpCode::Binary => {
                let data_opcode = DataOpcode::from_opcode(frame.opcode)
                    .expect("Text and Binary always map to a DataOpcode");
                self.begin_message(data_opcode).await;
                self.feed_message(frame.payload).await?;
                if frame.fin {
                    self.finish_message(data_opcode).await?;
                }
                Ok(false)
            }
            OpCode::Continue => {
                let data_opcode = self
                    .active_opcode
                    .expect("continuation discipline already checked by decode_frame");
                self.feed_message(frame.payload).await?;
                if frame.fin {
                    self.finish_message(data_opcode).await?;
                }
                Ok(false)
            }
            OpCode::Ping => {
                trace!("ping from {}, replying with pong", self.peer_addr);
                self.writer
                    .lock()
                    .await
                    .write_frame(true, OpCode::Pong, &frame.payload)
                    .await?;
                Ok(false)
            }
            OpCode::Pong => Ok(false),
            OpCode::Close => {
                let echo = normalize_close_payload(&frame.payload);
                self.status.store(ConnectionStatus::Closing);
                self.writer.lock().await.write_frame(true, OpCode::Close, &echo).await?;
                self.status.store(ConnectionStatus::Closed);
                Ok(true)
            }
        }
    }

    async fn fail(&mut self, err: Error) {
        warn!("closing connection with {}: {err}", self.peer_addr);
        self.status.store(ConnectionStatus::Closing);
        let code: u16 = if matches!(err, Error::InvalidUTF8) { 1007 } else { 1002 };
        let _ = self
            .writer
            .lock()
            .await
            .write_frame(true, OpCode::Close, &code.to_be_bytes())
            .await;
        self.status.store(ConnectionStatus::Closed);
    }

    async fn begin_message(&mut self, data_opcode: DataOpcode) {
        self.active_opcode = Some(data_opcode);
        if self.stream_start_handler.is_some() {
            let (their_half, our_half) = tokio::io::duplex(STREAM_BUFFER_CAPACITY);
            if let Some(handler) = self.stream_start_handler.as_mut() {
                handler(data_opcode, their_half);
            }
            self.sink = Some(MessageSink::Streamed(our_half));
        } else {
            self.sink = Some(MessageSink::Buffered(Vec::new()));
        }
    }

    async fn feed_message(&mut self, payload: Vec<u8>) -> Result<(), Error> {
        match self.sink.as_mut() {
            Some(MessageSink::Buffered(buffer)) => {
                if let Some(max) = self.config.max_message_size {
                    if buffer.len() + payload.len() > max {
                        return Err(Error::MaxMessageSize);
                    }
                }
                buffer.extend_from_slice(&payload);
            }
            Some(MessageSink::Streamed(writer)) => {
                writer.write_all(&payload).await?;
            }
            None => {}
        }
        Ok(())
    }

    async fn finish_message(&mut self, data_opcode: DataOpcode) -> Result<(), Error> {
        self.active_opcode = None;
        match self.sink.take() {
            Some(MessageSink::Buffered(payload)) => match data_opcode {
                DataOpcode::Text => {
                    let text = String::from_utf8(payload)?;
                    if let Some(handler) = self.text_handler.as_mut() {
                        handler(text);
                    }
                }
                DataOpcode::Binary => {
                    if let Some(handler) = self.binary_handler.as_mut() {
                        handler(payload);
                    }
                }
            },
            Some(MessageSink::Streamed(writer)) => {
                // Dropping the write half closes the pipe; the paired
                // MessageReader observes a clean EOF.
                drop(writer);
            }
            None => {}
        }
        Ok(())
    }
}

/// Resolves when the listener-wide shutdown signal fires, or never if this
/// connection wasn't subscribed to one — letting it sit in a `select!` arm
/// unconditionally instead of branching on `Option::is_some` at each call site.
async fn wait_for_shutdown(shutdown: &mut Option<broadcast::Receiver<()>>) {
    match shutdown {
        Some(rx) => {
            let _ = rx.recv().await;
        }
        None => std::future::pending().await,
    }
}
