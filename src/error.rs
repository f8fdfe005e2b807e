use crate::frame::CloseCode;
use httparse::Error as HttpParseError;
use pki_types::InvalidDnsNameError;
use std::io;
use std::string::FromUtf8Error;
use thiserror::Error;
use tokio::time::error::Elapsed;
use url::ParseError;

#[derive(Error, Debug)]
pub enum Error {
    // Channel / task errors
    #[error("channel communication error")]
    CommunicationError,

    // General Errors
    #[error("{source}")]
    Timeout {
        #[from]
        source: Elapsed,
    },

    #[error("IO Error happened: {source}")]
    IOError {
        #[from]
        source: io::Error,
    },

    #[error("{source}")]
    FromUtf8Error {
        #[from]
        source: FromUtf8Error,
    },

    // Handshake Errors
    #[error("Invalid handshake request method and version")]
    InvalidHTTPHandshake,

    #[error("Connection: Upgrade header missing in the request")]
    NoConnectionHeaderPresent,

    #[error("Upgrade: websocket header missing in the request")]
    NoUpgradeHeaderPresent,

    #[error("Host header missing in the request")]
    NoHostHeaderPresent,

    #[error("Couldn't find Sec-WebSocket-Key header in the request")]
    NoSecWebsocketKey,

    #[error("Unsupported Sec-WebSocket-Version, only 13 is accepted")]
    InvalidWebsocketVersion,

    #[error("Server replied with status `{0}` instead of 101 Switching Protocols")]
    InvalidStatusCode(u16),

    #[error("Server redirected the upgrade request to `{0}`")]
    RequestRedirected(String),

    #[error("Server didn't send a valid Sec-WebSocket-Accept key")]
    InvalidAcceptKey,

    #[error("Expected exactly one Sec-WebSocket-Accept header in the response")]
    DuplicatedAcceptKey,

    #[error("Server selected an extension that wasn't offered: `{0}`")]
    UnsupportedExtension(String),

    #[error("Server didn't upgrade the connection")]
    NoUpgrade,

    // Framing Errors
    #[error("RSV not zero")]
    RSVNotZero,

    #[error("Control frames must not be fragmented")]
    ControlFramesFragmented,

    #[error("Control frame with invalid payload size, can't be greater than 125")]
    ControlFramePayloadSize,

    #[error("fragment_size: `{0}` can't be greater than max_frame_size: `{1}`")]
    CustomFragmentSizeExceeded(usize, usize),

    #[error("Max frame size reached")]
    MaxFrameSize,

    #[error("Max message size reached")]
    MaxMessageSize,

    #[error("Decompressed frame exceeds the configured bound")]
    MaxDecompressedSize,

    // Fragmentation Errors
    #[error("Invalid frame while there is a fragmented message in progress")]
    InvalidFrameFragmentation,

    #[error("Incoming fragmented message but there is one already in progress")]
    FragmentedInProgress,

    #[error("Invalid continuation frame: no fragmented message to continue")]
    InvalidContinuationFrame,

    #[error("Invalid Opcode")]
    InvalidOpcode,

    // Close handshake errors
    #[error("Invalid close frame payload")]
    InvalidClosePayload,

    #[error("Close code `{0}` is not allowed on the wire")]
    InvalidCloseCode(u16),

    #[error("Connection is already closed")]
    ConnectionClosed,

    #[error("No pong received for two consecutive pings")]
    PingTimeout,

    // HTTP Errors
    #[error("{source}")]
    URLParseError {
        #[from]
        source: ParseError,
    },

    #[error("Invalid scheme in WebSocket URL")]
    InvalidSchemeURL,

    #[error("URL has no host")]
    URLNoHost,

    #[error("{source}")]
    HttpParseError {
        #[from]
        source: HttpParseError,
    },

    #[error("Incomplete HTTP request")]
    IncompleteHTTPRequest,

    // Domain addr parsing error
    #[error("{source}")]
    DomainError {
        #[from]
        source: InvalidDnsNameError,
    },

    // Compression / Decompression Errors
    #[error("max_window_bits should be a value between 8 and 15")]
    InvalidMaxWindowBits,

    #[error("extension negotiation failed: {0}")]
    NegotiationError(String),

    #[error("compression failed: {0}")]
    CompressionError(String),

    #[error("decompression failed: {0}")]
    DecompressionError(String),
}

impl Error {
    /// The close code the connection driver emits when this error ends an
    /// open connection. Inbound decompression failures count as protocol
    /// violations since they mean the peer sent undecodable data; a local
    /// compression failure is an internal error instead.
    pub fn close_code(&self) -> CloseCode {
        match self {
            Error::MaxFrameSize | Error::MaxMessageSize => CloseCode::Size,
            Error::PingTimeout => CloseCode::Away,
            Error::CompressionError(_) => CloseCode::Error,
            Error::InvalidOpcode
            | Error::RSVNotZero
            | Error::ControlFramesFragmented
            | Error::ControlFramePayloadSize
            | Error::InvalidClosePayload
            | Error::InvalidCloseCode(_)
            | Error::InvalidFrameFragmentation
            | Error::FragmentedInProgress
            | Error::InvalidContinuationFrame
            | Error::FromUtf8Error { .. }
            | Error::MaxDecompressedSize
            | Error::DecompressionError(_) => CloseCode::Protocol,
            _ => CloseCode::Error,
        }
    }
}
