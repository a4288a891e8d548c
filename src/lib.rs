//! # Wraith
//!
//! Connection-per-request HTTP/1.1 execution engine with pluggable
//! content-type and status dispatch.
//!
//! Given a fully resolved [`RequestConfig`], a [`Wraith`] client opens one
//! connection, negotiates authentication and compression, transmits an
//! optional request body through the registered encoder, and hands the
//! response to the parser and action matching its content type and status.
//!
//! ```no_run
//! use wraith::{RequestConfig, Wraith};
//!
//! # async fn run() -> wraith::Result<()> {
//! let config: RequestConfig<(), String, String> = RequestConfig::new("http://example.com/")?
//!     .parser("text/plain", |reader| Box::pin(async move { Ok(reader.text().await?) }))
//!     .parser("*/*", |reader| Box::pin(async move { Ok(reader.text().await?) }))
//!     .on_success(|_reader, parsed| Box::pin(async move { Ok(parsed.unwrap_or_default()) }));
//!
//! let body = Wraith::new().get(&config).await?;
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod config;
pub mod cookie;
pub mod error;
pub mod exchange;
pub mod headers;
pub mod response;
pub mod timeouts;
pub mod transport;

pub use auth::{Auth, AuthScheme, Credentials};
pub use config::{BodyWriter, BoxFuture, HandlerError, RequestConfig};
pub use cookie::{Cookie, CookieStore, StoredCookie};
pub use error::{Error, Result};
pub use exchange::{Wraith, WraithBuilder};
pub use headers::Header;
pub use response::ResponseReader;
pub use timeouts::Timeouts;
pub use transport::connector::TlsContext;
