use httparse::Error as HttpParseError;
use std::io;
use std::string::FromUtf8Error;
use thiserror::Error;
use tokio::time::error::Elapsed;
use url::ParseError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("channel communication error")]
    CommunicationError,

    #[error("connection is closed")]
    ConnectionClosed,

    #[error("{source}")]
    Timeout {
        #[from]
        source: Elapsed,
    },

    #[error("io error: {source}")]
    IOError {
        #[from]
        source: io::Error,
    },

    #[error("{source}")]
    FromUtf8Error {
        #[from]
        source: FromUtf8Error,
    },

    // Handshake
    #[error("server refused to upgrade the connection")]
    NoUpgrade,

    #[error("server answered with a wrong Sec-WebSocket-Accept key")]
    InvalidAcceptKey,

    #[error("handshake response ended before its headers did")]
    IncompleteHTTPResponse,

    #[error("handshake response headers exceed {0} bytes")]
    ResponseHeadersTooLarge(usize),

    // Framing
    #[error("frame has RSV bits set, but no extension was negotiated")]
    RSVNotZero,

    #[error("server sent a fragmented control frame")]
    ControlFramesFragmented,

    #[error("control frame payload is larger than 125 bytes")]
    ControlFramePayloadSize,

    #[error("frame exceeds the configured max frame size")]
    MaxFrameSize,

    #[error("message exceeds the configured max message size")]
    MaxMessageSize,

    #[error("new data frame while a fragmented message is still open")]
    InvalidFrameFragmentation,

    #[error("continuation frame without a fragmented message to continue")]
    InvalidContinuationFrame,

    #[error("unknown opcode")]
    InvalidOpcode,

    // URL and HTTP
    #[error("{source}")]
    URLParseError {
        #[from]
        source: ParseError,
    },

    #[error("only ws:// URLs are supported")]
    InvalidSchemeURL,

    #[error("URL has no host")]
    URLNoHost,

    #[error("{source}")]
    HttpParseError {
        #[from]
        source: HttpParseError,
    },

    // Payloads
    #[error("response payload is not valid JSON: {source}")]
    ResponseDecode {
        #[from]
        source: serde_json::Error,
    },

    #[error("order payload truncated while reading `{0}`")]
    PayloadTruncated(&'static str),
}

/// Failures of the round aggregation and of persisting its record.
#[derive(Error, Debug)]
pub enum ResultsError {
    #[error("no request completed during the round, there is no latency data")]
    NoCompletedRequests,

    #[error("couldn't access results file: {source}")]
    IOError {
        #[from]
        source: io::Error,
    },

    #[error("results file is not a JSON array: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },
}
