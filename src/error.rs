use std::io;
use std::string::FromUtf8Error;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    // General errors
    #[error("IO error happened: {source}")]
    IOError {
        #[from]
        source: io::Error,
    },

    #[error("{source}")]
    FromUtf8Error {
        #[from]
        source: FromUtf8Error,
    },

    #[error("channel communication error")]
    CommunicationError,

    // Handshake errors
    #[error("Connection: Upgrade header missing in the request")]
    MissingUpgrade,

    #[error("Connection/Upgrade header did not ask for a websocket upgrade")]
    InvalidUpgrade,

    #[error("Sec-WebSocket-Key header missing from the request")]
    InvalidWebsocketKey,

    #[error("{source}")]
    HttpParseError {
        #[from]
        source: httparse::Error,
    },

    #[error("Incomplete HTTP handshake request")]
    IncompleteHTTPRequest,

    // Framing errors
    #[error("RSV not zero")]
    InvalidRSV,

    #[error("opcode is not one of continuation, text, binary, close, ping, pong")]
    ReservedOpcode,

    #[error("Invalid Opcode")]
    InvalidOpcode,

    #[error("Invalid continuation frame: no fragmented message to continue")]
    InvalidContinuation,

    #[error("frame from the client was not masked")]
    UnmaskedFrame,

    #[error("Control frames must not be fragmented")]
    FragmentedControlFrame,

    #[error("Control frame with invalid payload size, can't be greater than 125")]
    ControlFramePayloadSize,

    #[error("close payload carries an invalid close code")]
    InvalidClosePayload,

    #[error("payload for a text message is not valid UTF-8")]
    InvalidUTF8,

    #[error("Max frame size reached")]
    MaxFrameSize,

    #[error("Max message size reached")]
    MaxMessageSize,
}
