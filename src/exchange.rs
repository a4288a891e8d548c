//! The exchange orchestrator and the client facade.
//!
//! One verb invocation runs exactly one [`Exchange`]: materialize headers,
//! scope credentials, open one connection, optionally transmit a body, read
//! the response head, answer at most one authentication challenge, then
//! dispatch on content type and status. Everything fatal below the dispatch
//! layer is collapsed into [`Error::Transport`] with the cause chained.

use bytes::Bytes;
use http::{Method, Uri};
use tokio::runtime::Handle;
use tracing::debug;

use crate::auth;
use crate::config::RequestConfig;
use crate::cookie::CookieStore;
use crate::error::{Error, Result};
use crate::headers::{self, Header};
use crate::response::ResponseReader;
use crate::timeouts::Timeouts;
use crate::transport::connector::{Connector, TlsContext};
use crate::transport::h1::{FramedBody, H1Connection, ResponseHead};

/// One request/response round trip.
struct Exchange<'a, B, P, R> {
    client: &'a Wraith,
    method: Method,
    config: &'a RequestConfig<B, P, R>,
}

impl<'a, B, P, R> Exchange<'a, B, P, R> {
    fn new(client: &'a Wraith, method: Method, config: &'a RequestConfig<B, P, R>) -> Self {
        Self {
            client,
            method,
            config,
        }
    }

    async fn execute(self) -> Result<R> {
        let uri = self.config.uri().clone();
        if uri.host().is_none() {
            return Err(Error::connection("request URI has no host").into_transport());
        }

        // Output is sent only when a body value and a matching encoder both
        // exist; the encoder runs before any connection is opened.
        let body = self.encode_body()?;

        let headers = headers::materialize(
            &uri,
            self.config.headers(),
            self.config.request_content_type(),
            self.config.request_charset(),
            self.config.cookies(),
            &self.client.cookie_store,
        );

        let credentials = auth::resolve(self.config.auth_descriptor())?;
        auth::with_credentials(credentials, self.run(uri, headers, body)).await
    }

    async fn run(self, uri: Uri, headers: Vec<Header>, body: Option<Bytes>) -> Result<R> {
        let (head, framed) = self
            .converse(&uri, &headers, body.as_ref())
            .await
            .map_err(Error::into_transport)?;

        let mut reader = ResponseReader::new(head, framed, uri).await;
        let result = self.dispatch(&mut reader).await;
        reader.finish();
        result
    }

    /// Send the request and read the response head; when the server answers
    /// with a `401` challenge we can satisfy, retry once on a fresh
    /// connection with an `Authorization` header attached.
    async fn converse(
        &self,
        uri: &Uri,
        headers: &[Header],
        body: Option<&Bytes>,
    ) -> Result<(ResponseHead, FramedBody)> {
        let connector = Connector::new(
            self.client.tls.clone(),
            self.client.timeouts.connect,
        );

        let (head, framed) = self.transmit(&connector, uri, headers, body).await?;
        if head.status != 401 {
            return Ok((head, framed));
        }

        let target = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
        let authorization = head
            .header("www-authenticate")
            .and_then(|challenge| auth::answer_challenge(self.method.as_str(), target, challenge));
        let Some(authorization) = authorization else {
            return Ok((head, framed));
        };

        debug!("answering authentication challenge");
        let mut retry_headers = headers.to_vec();
        retry_headers.push(Header::new("Authorization", authorization));
        self.transmit(&connector, uri, &retry_headers, body).await
    }

    async fn transmit(
        &self,
        connector: &Connector,
        uri: &Uri,
        headers: &[Header],
        body: Option<&Bytes>,
    ) -> Result<(ResponseHead, FramedBody)> {
        let stream = connector.connect(uri).await?;
        let mut connection = H1Connection::new(stream, self.client.timeouts.read);
        connection.send(&self.method, uri, headers, body).await?;
        connection.read_head(&self.method).await
    }

    /// Serialise the body value through the matching encoder, when both
    /// exist. Encoder failures are body-transmission failures.
    fn encode_body(&self) -> Result<Option<Bytes>> {
        let (Some(value), Some(encoder)) = (self.config.body_value(), self.config.find_encoder())
        else {
            return Ok(None);
        };
        let mut writer = crate::config::BodyWriter::new();
        encoder(value, &mut writer)
            .map_err(|e| Error::Transport(Box::new(Error::Handler(e))))?;
        Ok(Some(writer.into_bytes()))
    }

    /// Resolve the parser (body present only) and the response action, and
    /// let the action produce the exchange result.
    async fn dispatch(&self, reader: &mut ResponseReader) -> Result<R> {
        let parsed = if reader.has_body() {
            let content_type = reader
                .content_type()
                .unwrap_or("application/octet-stream")
                .to_string();
            let parser = self.config.find_parser(&content_type).ok_or_else(|| {
                Error::missing(format!("parser for content type {}", content_type))
            })?;
            debug!(%content_type, "parsing response body");
            Some(parser(reader).await.map_err(Error::Handler)?)
        } else {
            None
        };

        let status = reader.status();
        let action = self
            .config
            .action_for(status)
            .ok_or_else(|| Error::missing(format!("response action for status {}", status)))?;
        debug!(status, "dispatching response action");
        action(reader, parsed).await.map_err(Error::Handler)
    }
}

/// The client facade: five verbs over a shared cookie store, an optional
/// secure-transport context, and connect/read timeouts.
#[derive(Debug, Clone)]
pub struct Wraith {
    cookie_store: CookieStore,
    tls: Option<TlsContext>,
    executor: Option<Handle>,
    timeouts: Timeouts,
}

impl Wraith {
    pub fn builder() -> WraithBuilder {
        WraithBuilder::default()
    }

    /// A client with a fresh cookie store and no timeouts.
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub async fn get<B, P, R>(&self, config: &RequestConfig<B, P, R>) -> Result<R> {
        Exchange::new(self, Method::GET, config).execute().await
    }

    pub async fn head<B, P, R>(&self, config: &RequestConfig<B, P, R>) -> Result<R> {
        Exchange::new(self, Method::HEAD, config).execute().await
    }

    pub async fn post<B, P, R>(&self, config: &RequestConfig<B, P, R>) -> Result<R> {
        Exchange::new(self, Method::POST, config).execute().await
    }

    pub async fn put<B, P, R>(&self, config: &RequestConfig<B, P, R>) -> Result<R> {
        Exchange::new(self, Method::PUT, config).execute().await
    }

    pub async fn delete<B, P, R>(&self, config: &RequestConfig<B, P, R>) -> Result<R> {
        Exchange::new(self, Method::DELETE, config).execute().await
    }

    /// Nothing is pooled, so there is nothing to close.
    pub fn close(&self) -> Result<()> {
        Err(Error::unsupported("close"))
    }

    /// The externally supplied runtime handle, if any. The engine itself
    /// never schedules through it.
    pub fn executor(&self) -> Option<&Handle> {
        self.executor.as_ref()
    }

    pub fn cookie_store(&self) -> &CookieStore {
        &self.cookie_store
    }
}

impl Default for Wraith {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Default)]
pub struct WraithBuilder {
    cookie_store: Option<CookieStore>,
    tls: Option<TlsContext>,
    executor: Option<Handle>,
    timeouts: Timeouts,
}

impl WraithBuilder {
    /// Share a cookie store with other clients (or inspect it from tests).
    pub fn cookie_store(mut self, store: CookieStore) -> Self {
        self.cookie_store = Some(store);
        self
    }

    /// Use an already-constructed secure-transport context for `https`
    /// targets.
    pub fn tls_context(mut self, context: TlsContext) -> Self {
        self.tls = Some(context);
        self
    }

    /// Attach a runtime handle, exposed through [`Wraith::executor`].
    pub fn executor(mut self, handle: Handle) -> Self {
        self.executor = Some(handle);
        self
    }

    pub fn timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn connect_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.timeouts.connect = Some(timeout);
        self
    }

    pub fn read_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.timeouts.read = Some(timeout);
        self
    }

    pub fn build(self) -> Wraith {
        Wraith {
            cookie_store: self.cookie_store.unwrap_or_default(),
            tls: self.tls,
            executor: self.executor,
            timeouts: self.timeouts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_is_always_unsupported() {
        let client = Wraith::new();
        assert!(matches!(client.close(), Err(Error::Unsupported(_))));
    }

    #[tokio::test]
    async fn executor_is_held_but_never_required() {
        let plain = Wraith::new();
        assert!(plain.executor().is_none());

        let handle = Handle::current();
        let with_executor = Wraith::builder().executor(handle).build();
        assert!(with_executor.executor().is_some());
    }

    #[tokio::test]
    async fn missing_host_fails_as_transport_before_io() {
        let config: RequestConfig<(), (), ()> = RequestConfig::new("/no-host").unwrap();
        let err = Wraith::new().get(&config).await.unwrap_err();
        assert!(err.is_transport());
    }
}
