//! Error taxonomy shared by the async and blocking facades.

use std::path::PathBuf;
use std::time::Duration;

/// Every failure a client call can surface.
///
/// Callers can tell transport failures, connection loss, server-reported
/// errors and bad local input apart by matching on the variant.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// No API token was supplied and `WOKWI_CLI_TOKEN` is unset.
    #[error("missing API token; set WOKWI_CLI_TOKEN (get one from {0})")]
    MissingToken(&'static str),
    /// The websocket could not be opened or the handshake failed.
    #[error("websocket connection failed: {0}")]
    Connection(Box<tokio_tungstenite::tungstenite::Error>),
    /// An upgrade request header could not be built from the config.
    #[error("invalid request header: {0}")]
    InvalidHeader(#[from] tokio_tungstenite::tungstenite::http::header::InvalidHeaderValue),
    /// The connection closed while the call was waiting for its response.
    #[error("connection closed before a response arrived")]
    Disconnected,
    /// The call was made before `connect()` or after `disconnect()`.
    #[error("client is not connected")]
    NotConnected,
    /// The server answered with an explicit error payload.
    #[error("server error {code}: {message}")]
    Server { code: i64, message: String },
    /// Local input was rejected before anything was sent.
    #[error("invalid input: {0}")]
    Validation(String),
    /// The server sent something this client does not understand.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// A frame failed to decode.
    #[error("frame decode failed: {0}")]
    Codec(#[from] protocol::CodecError),
    /// The handshake or a request exceeded its configured deadline.
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    /// Reading or writing a local file failed.
    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// Writing to stdout or spawning the blocking runtime failed.
    #[error("i/o error: {0}")]
    Stdio(#[from] std::io::Error),
}

impl ClientError {
    pub(crate) fn connection(error: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Connection(Box::new(error))
    }

    /// Wrap a file-system error, turning a missing file into bad input.
    pub(crate) fn file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        if source.kind() == std::io::ErrorKind::NotFound {
            return Self::Validation(format!("file not found: {}", path.display()));
        }
        Self::Io { path, source }
    }

    /// True for the failures caused by losing (or never having) a connection.
    #[must_use]
    pub fn is_disconnect(&self) -> bool {
        matches!(self, Self::Disconnected | Self::NotConnected | Self::Connection(_))
    }
}

pub type Result<T, E = ClientError> = std::result::Result<T, E>;
