//! The request description consumed by an exchange.
//!
//! [`RequestConfig`] is read-only once handed to the engine: the target URI,
//! declarative headers and cookies, an optional auth descriptor, an optional
//! body value, and three handler tables (encoders keyed by content type,
//! parsers keyed by content type, response actions keyed by status). The
//! engine only ever looks handlers up; building the tables is the caller's
//! business.

use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};
use http::Uri;

use crate::auth::Auth;
use crate::cookie::Cookie;
use crate::error::Result;
use crate::headers::Header;
use crate::response::ResponseReader;

/// Boxed future returned by parsers and response actions.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Error type produced by user-supplied handlers; passed through unwrapped
/// inside [`Error::Handler`](crate::Error::Handler).
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Serialises a body value into the outbound sink.
pub type Encoder<B> =
    Arc<dyn Fn(&B, &mut BodyWriter) -> std::result::Result<(), HandlerError> + Send + Sync>;

/// Reads the response body stream into a parsed value.
pub type Parser<P> = Arc<
    dyn for<'a> Fn(&'a mut ResponseReader) -> BoxFuture<'a, std::result::Result<P, HandlerError>>
        + Send
        + Sync,
>;

/// Consumes the response (and the parsed body, when one exists) and produces
/// the exchange result.
pub type Action<P, R> = Arc<
    dyn for<'a> Fn(
            &'a mut ResponseReader,
            Option<P>,
        ) -> BoxFuture<'a, std::result::Result<R, HandlerError>>
        + Send
        + Sync,
>;

/// Sink handed to an encoder; collects the serialised request body.
#[derive(Debug, Default)]
pub struct BodyWriter {
    buf: BytesMut,
}

impl BodyWriter {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub fn write(&mut self, bytes: &[u8]) {
        self.buf.put_slice(bytes);
    }

    pub fn write_str(&mut self, s: &str) {
        self.write(s.as_bytes());
    }

    pub(crate) fn into_bytes(self) -> Bytes {
        self.buf.freeze()
    }
}

impl io::Write for BodyWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buf.put_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Status matcher for response actions, most specific first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum StatusMatcher {
    Exact(u16),
    /// Any status below 400.
    Success,
    /// Any status of 400 or above.
    Failure,
}

/// Strip parameters and normalise case: `Text/HTML; charset=utf-8` and
/// `text/html` key the same handler.
fn media_type(value: &str) -> String {
    value
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase()
}

/// A fully resolved request description.
///
/// `B` is the body value, `P` the parsed response body, `R` the result the
/// response action produces.
pub struct RequestConfig<B, P, R> {
    uri: Uri,
    headers: Vec<Header>,
    content_type: Option<String>,
    charset: Option<String>,
    cookies: Vec<Cookie>,
    auth: Option<Auth>,
    body: Option<B>,
    encoders: HashMap<String, Encoder<B>>,
    parsers: Vec<(String, Parser<P>)>,
    actions: Vec<(StatusMatcher, Action<P, R>)>,
}

impl<B, P, R> RequestConfig<B, P, R> {
    pub fn new(uri: impl TryInto<Uri, Error = http::uri::InvalidUri>) -> Result<Self> {
        Ok(Self {
            uri: uri.try_into()?,
            headers: Vec::new(),
            content_type: None,
            charset: None,
            cookies: Vec::new(),
            auth: None,
            body: None,
            encoders: HashMap::new(),
            parsers: Vec::new(),
            actions: Vec::new(),
        })
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push(Header::new(name, value));
        self
    }

    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn charset(mut self, charset: impl Into<String>) -> Self {
        self.charset = Some(charset.into());
        self
    }

    pub fn cookie(mut self, cookie: Cookie) -> Self {
        self.cookies.push(cookie);
        self
    }

    pub fn auth(mut self, auth: Auth) -> Self {
        self.auth = Some(auth);
        self
    }

    pub fn body(mut self, body: B) -> Self {
        self.body = Some(body);
        self
    }

    /// Register an encoder for a request content type.
    pub fn encoder<F>(mut self, content_type: &str, f: F) -> Self
    where
        F: Fn(&B, &mut BodyWriter) -> std::result::Result<(), HandlerError>
            + Send
            + Sync
            + 'static,
    {
        self.encoders.insert(media_type(content_type), Arc::new(f));
        self
    }

    /// Register a parser for a response content type. `*/*` registers the
    /// wildcard fallback.
    pub fn parser<F>(mut self, content_type: &str, f: F) -> Self
    where
        F: for<'a> Fn(
                &'a mut ResponseReader,
            ) -> BoxFuture<'a, std::result::Result<P, HandlerError>>
            + Send
            + Sync
            + 'static,
    {
        self.parsers.push((media_type(content_type), Arc::new(f)));
        self
    }

    /// Register an action for an exact status code.
    pub fn on_status<F>(mut self, status: u16, f: F) -> Self
    where
        F: for<'a> Fn(
                &'a mut ResponseReader,
                Option<P>,
            ) -> BoxFuture<'a, std::result::Result<R, HandlerError>>
            + Send
            + Sync
            + 'static,
    {
        self.actions.push((StatusMatcher::Exact(status), Arc::new(f)));
        self
    }

    /// Register the action for any status below 400 without an exact match.
    pub fn on_success<F>(mut self, f: F) -> Self
    where
        F: for<'a> Fn(
                &'a mut ResponseReader,
                Option<P>,
            ) -> BoxFuture<'a, std::result::Result<R, HandlerError>>
            + Send
            + Sync
            + 'static,
    {
        self.actions.push((StatusMatcher::Success, Arc::new(f)));
        self
    }

    /// Register the action for any status of 400 or above without an exact
    /// match.
    pub fn on_failure<F>(mut self, f: F) -> Self
    where
        F: for<'a> Fn(
                &'a mut ResponseReader,
                Option<P>,
            ) -> BoxFuture<'a, std::result::Result<R, HandlerError>>
            + Send
            + Sync
            + 'static,
    {
        self.actions.push((StatusMatcher::Failure, Arc::new(f)));
        self
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn headers(&self) -> &[Header] {
        &self.headers
    }

    pub fn request_content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn request_charset(&self) -> Option<&str> {
        self.charset.as_deref()
    }

    pub fn cookies(&self) -> &[Cookie] {
        &self.cookies
    }

    pub fn auth_descriptor(&self) -> Option<&Auth> {
        self.auth.as_ref()
    }

    pub fn body_value(&self) -> Option<&B> {
        self.body.as_ref()
    }

    /// The encoder for this request's own content type, when both exist.
    pub fn find_encoder(&self) -> Option<&Encoder<B>> {
        let content_type = self.content_type.as_deref()?;
        self.encoders.get(&media_type(content_type))
    }

    /// Resolve a parser for a response content type: exact media type first
    /// (parameters stripped, case-insensitive), then the `*/*` wildcard.
    pub fn find_parser(&self, content_type: &str) -> Option<&Parser<P>> {
        let wanted = media_type(content_type);
        self.parsers
            .iter()
            .find(|(key, _)| *key == wanted)
            .or_else(|| self.parsers.iter().find(|(key, _)| key == "*/*"))
            .map(|(_, parser)| parser)
    }

    /// Resolve the response action for a status code: exact code first, then
    /// the success/failure class handler. No implicit default.
    pub fn action_for(&self, status: u16) -> Option<&Action<P, R>> {
        let class = if status < 400 {
            StatusMatcher::Success
        } else {
            StatusMatcher::Failure
        };
        self.actions
            .iter()
            .find(|(m, _)| *m == StatusMatcher::Exact(status))
            .or_else(|| self.actions.iter().find(|(m, _)| *m == class))
            .map(|(_, action)| action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Config = RequestConfig<String, String, String>;

    fn noop_parser() -> impl for<'a> Fn(
        &'a mut ResponseReader,
    ) -> BoxFuture<'a, std::result::Result<String, HandlerError>>
           + Send
           + Sync
           + 'static {
        |_reader| Box::pin(async { Ok(String::new()) })
    }

    fn noop_action() -> impl for<'a> Fn(
        &'a mut ResponseReader,
        Option<String>,
    ) -> BoxFuture<'a, std::result::Result<String, HandlerError>>
           + Send
           + Sync
           + 'static {
        |_reader, _parsed| Box::pin(async { Ok(String::new()) })
    }

    #[test]
    fn parser_prefers_exact_media_type_over_wildcard() {
        let config = Config::new("http://example.com/")
            .unwrap()
            .parser("application/json", noop_parser())
            .parser("*/*", noop_parser());

        let exact = config.find_parser("application/json; charset=utf-8").unwrap();
        assert!(Arc::ptr_eq(exact, &config.parsers[0].1));

        let fallback = config.find_parser("text/csv").unwrap();
        assert!(Arc::ptr_eq(fallback, &config.parsers[1].1));
    }

    #[test]
    fn parser_lookup_is_case_insensitive() {
        let config = Config::new("http://example.com/")
            .unwrap()
            .parser("Application/JSON", noop_parser());
        assert!(config.find_parser("application/json").is_some());
        assert!(config.find_parser("text/plain").is_none());
    }

    #[test]
    fn action_prefers_exact_status_over_class() {
        let config = Config::new("http://example.com/")
            .unwrap()
            .on_status(404, noop_action())
            .on_success(noop_action())
            .on_failure(noop_action());

        let exact = config.action_for(404).unwrap();
        assert!(Arc::ptr_eq(exact, &config.actions[0].1));

        let success = config.action_for(201).unwrap();
        assert!(Arc::ptr_eq(success, &config.actions[1].1));

        let failure = config.action_for(500).unwrap();
        assert!(Arc::ptr_eq(failure, &config.actions[2].1));
    }

    #[test]
    fn action_has_no_implicit_default() {
        let config = Config::new("http://example.com/")
            .unwrap()
            .on_status(200, noop_action());
        assert!(config.action_for(500).is_none());
    }

    #[test]
    fn encoder_keys_on_request_content_type() {
        let config = Config::new("http://example.com/")
            .unwrap()
            .content_type("application/json; charset=utf-8")
            .encoder("application/json", |body: &String, writer| {
                writer.write_str(body);
                Ok(())
            });
        assert!(config.find_encoder().is_some());

        let without_type: Config = Config::new("http://example.com/")
            .unwrap()
            .encoder("application/json", |body, writer| {
                writer.write_str(body);
                Ok(())
            });
        assert!(without_type.find_encoder().is_none());
    }

    #[test]
    fn body_writer_collects_bytes() {
        let mut writer = BodyWriter::new();
        writer.write_str("hello ");
        writer.write(b"world");
        assert_eq!(&writer.into_bytes()[..], b"hello world");
    }
}
