//! TCP/TLS connection establishment.
//!
//! [`Connector::connect`] opens exactly one stream per call: plain TCP for
//! `http` targets, a BoringSSL-wrapped stream for `https`. The TLS side uses
//! an externally supplied [`TlsContext`] when one was injected, otherwise a
//! stock TLS 1.2 through 1.3 context built on first use.

use std::fmt;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use boring::ssl::{SslConnector, SslMethod, SslVersion};
use http::Uri;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_boring::SslStream;
use tracing::debug;

use crate::error::{Error, Result};
use crate::timeouts::bounded;

/// An already-constructed secure-transport context.
///
/// Wraps a preconfigured [`SslConnector`]; the engine never alters it, so
/// callers control trust roots, protocol range and every other TLS knob.
#[derive(Clone)]
pub struct TlsContext {
    connector: SslConnector,
}

impl TlsContext {
    /// Adopt an externally built connector.
    pub fn new(connector: SslConnector) -> Self {
        Self { connector }
    }

    /// Stock context: TLS 1.2 through 1.3, HTTP/1.1 ALPN.
    pub fn default_context() -> Result<Self> {
        let mut builder = SslConnector::builder(SslMethod::tls_client())
            .map_err(|e| Error::tls(format!("failed to create SSL connector: {}", e)))?;
        builder
            .set_min_proto_version(Some(SslVersion::TLS1_2))
            .map_err(|e| Error::tls(format!("failed to set min TLS version: {}", e)))?;
        builder
            .set_max_proto_version(Some(SslVersion::TLS1_3))
            .map_err(|e| Error::tls(format!("failed to set max TLS version: {}", e)))?;
        builder
            .set_alpn_protos(b"\x08http/1.1")
            .map_err(|e| Error::tls(format!("failed to set ALPN: {}", e)))?;
        Ok(Self {
            connector: builder.build(),
        })
    }

    fn connector(&self) -> &SslConnector {
        &self.connector
    }
}

impl fmt::Debug for TlsContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsContext").finish_non_exhaustive()
    }
}

/// Stream that can be either plain TCP or TLS-wrapped.
#[derive(Debug)]
pub enum MaybeHttpsStream {
    Http(TcpStream),
    Https(SslStream<TcpStream>),
}

impl AsyncRead for MaybeHttpsStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match &mut *self {
            MaybeHttpsStream::Http(stream) => Pin::new(stream).poll_read(cx, buf),
            MaybeHttpsStream::Https(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for MaybeHttpsStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match &mut *self {
            MaybeHttpsStream::Http(stream) => Pin::new(stream).poll_write(cx, buf),
            MaybeHttpsStream::Https(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut *self {
            MaybeHttpsStream::Http(stream) => Pin::new(stream).poll_flush(cx),
            MaybeHttpsStream::Https(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut *self {
            MaybeHttpsStream::Http(stream) => Pin::new(stream).poll_shutdown(cx),
            MaybeHttpsStream::Https(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}

/// Opens one connection per call.
pub(crate) struct Connector {
    tls: Option<TlsContext>,
    connect_timeout: Option<Duration>,
}

impl Connector {
    pub(crate) fn new(tls: Option<TlsContext>, connect_timeout: Option<Duration>) -> Self {
        Self {
            tls,
            connect_timeout,
        }
    }

    /// Connect to the URI's authority, returning a plain or TLS stream.
    ///
    /// The connect timeout covers DNS, TCP and (for https) the handshake.
    pub(crate) async fn connect(&self, uri: &Uri) -> Result<MaybeHttpsStream> {
        let host = uri
            .host()
            .ok_or_else(|| Error::connection("missing host"))?;
        let https = uri.scheme_str() == Some("https");
        let port = uri.port_u16().unwrap_or(if https { 443 } else { 80 });
        let addr = format!("{}:{}", host, port);

        bounded(self.connect_timeout, async {
            debug!(%addr, https, "connecting");
            let tcp_stream = TcpStream::connect(&addr)
                .await
                .map_err(|e| Error::connection(format!("failed to connect to {}: {}", addr, e)))?;

            if !https {
                return Ok(MaybeHttpsStream::Http(tcp_stream));
            }

            let default_context;
            let context = match &self.tls {
                Some(context) => context,
                None => {
                    default_context = TlsContext::default_context()?;
                    &default_context
                }
            };
            let config = context
                .connector()
                .configure()
                .map_err(|e| Error::tls(format!("failed to configure SSL: {}", e)))?;
            let ssl_stream = tokio_boring::connect(config, host, tcp_stream)
                .await
                .map_err(|e| Error::tls(format!("TLS handshake failed: {}", e)))?;
            Ok(MaybeHttpsStream::Https(ssl_stream))
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_host_fails_before_io() {
        let connector = Connector::new(None, None);
        let uri: Uri = "/relative/only".parse().unwrap();
        assert!(matches!(
            connector.connect(&uri).await,
            Err(Error::Connection(_))
        ));
    }

    #[tokio::test]
    async fn connect_timeout_is_reported() {
        let connector = Connector::new(None, Some(Duration::from_millis(1)));
        // RFC 5737 TEST-NET-1 address: never routable, so the connect hangs.
        let uri: Uri = "http://192.0.2.1:81/".parse().unwrap();
        assert!(matches!(
            connector.connect(&uri).await,
            Err(Error::Timeout(_)) | Err(Error::Connection(_))
        ));
    }
}
