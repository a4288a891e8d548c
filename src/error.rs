//! Error types for the wraith crate.

use std::io;
use std::time::Duration;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while executing an exchange.
///
/// Fatal network-layer failures are collapsed into the single
/// [`Error::Transport`] kind at the exchange boundary, with the original
/// cause chained as `source`. Dispatch-layer failures ([`Error::Handler`],
/// [`Error::Missing`]) and configuration failures ([`Error::Unsupported`])
/// propagate as-is.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Unsupported operation or configuration (e.g. an auth scheme the
    /// engine cannot execute). Raised before any I/O.
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    /// Uniform wrapper for fatal network-layer failures.
    #[error("transport failure: {0}")]
    Transport(#[source] Box<Error>),

    /// A parser or response action failed; the cause is the handler's own
    /// error, passed through unwrapped.
    #[error("handler error: {0}")]
    Handler(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// No handler registered for a content type or status code.
    #[error("missing required: {0}")]
    Missing(String),

    /// HTTP protocol error.
    #[error("HTTP protocol error: {0}")]
    HttpProtocol(String),

    /// Connection error.
    #[error("connection error: {0}")]
    Connection(String),

    /// TLS/SSL error.
    #[error("TLS error: {0}")]
    Tls(String),

    /// Decompression error.
    #[error("decompression error: {0}")]
    Decompression(String),

    /// URI parsing error.
    #[error("invalid URI: {0}")]
    Uri(#[from] http::uri::InvalidUri),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Connect or read phase timed out.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),
}

impl Error {
    /// Create an unsupported-operation error.
    pub fn unsupported(what: impl Into<String>) -> Self {
        Self::Unsupported(what.into())
    }

    /// Create a missing-handler error.
    pub fn missing(what: impl Into<String>) -> Self {
        Self::Missing(what.into())
    }

    /// Create an HTTP protocol error.
    pub fn http_protocol(message: impl Into<String>) -> Self {
        Self::HttpProtocol(message.into())
    }

    /// Create a connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection(message.into())
    }

    /// Create a TLS error.
    pub fn tls(message: impl Into<String>) -> Self {
        Self::Tls(message.into())
    }

    /// Wrap an external parser/action error.
    pub fn handler(cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Handler(Box::new(cause))
    }

    /// Whether this error came from the network layer.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// Collapse into the uniform transport-failure kind, leaving
    /// configuration and dispatch errors untouched.
    pub(crate) fn into_transport(self) -> Self {
        match self {
            e @ (Self::Unsupported(_) | Self::Handler(_) | Self::Missing(_) | Self::Transport(_)) => e,
            other => Self::Transport(Box::new(other)),
        }
    }
}
