//! Timeout configuration for exchanges.
//!
//! Two phases are bounded: `connect` (TCP plus TLS handshake) and `read`
//! (each wait for response bytes, resetting on every successful read). When
//! a limit is `None` that phase can wait indefinitely.

use std::future::Future;
use std::time::Duration;

use crate::error::{Error, Result};

/// Timeout configuration for one client's exchanges.
#[derive(Clone, Debug, Default)]
pub struct Timeouts {
    /// Deadline for establishing the connection (DNS + TCP + TLS handshake).
    pub connect: Option<Duration>,

    /// Maximum wait for the next chunk of response bytes. Resets on each
    /// successful read, so healthy long transfers are not cut short.
    pub read: Option<Duration>,
}

impl Timeouts {
    /// No limits on either phase.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sensible defaults: 10 s connect, 30 s read.
    pub fn defaults() -> Self {
        Self {
            connect: Some(Duration::from_secs(10)),
            read: Some(Duration::from_secs(30)),
        }
    }

    pub fn connect(mut self, timeout: Duration) -> Self {
        self.connect = Some(timeout);
        self
    }

    pub fn read(mut self, timeout: Duration) -> Self {
        self.read = Some(timeout);
        self
    }

    pub fn no_connect_timeout(mut self) -> Self {
        self.connect = None;
        self
    }

    pub fn no_read_timeout(mut self) -> Self {
        self.read = None;
        self
    }
}

/// Run `fut` under an optional deadline, mapping expiry to
/// [`Error::Timeout`].
pub(crate) async fn bounded<F, T>(limit: Option<Duration>, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match limit {
        Some(limit) => match tokio::time::timeout(limit, fut).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(limit)),
        },
        None => fut.await,
    }
}
