//! HTTP/1.1 wire protocol: request formatting, response-head parsing, and
//! body framing.
//!
//! Uses httparse for head parsing and raw I/O for request formatting. The
//! connection is single-use: one request goes out, one response head comes
//! back, and the remaining stream becomes a [`FramedBody`] that pulls body
//! bytes incrementally under the configured framing (fixed length, chunked,
//! or close-delimited).

use std::time::Duration;

use bytes::Bytes;
use http::{Method, Uri};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::debug;

use crate::error::{Error, Result};
use crate::headers::Header;
use crate::timeouts::bounded;
use crate::transport::connector::MaybeHttpsStream;

/// Maximum response head size (64KB).
const MAX_HEAD_SIZE: usize = 64 * 1024;

/// Maximum number of headers to parse.
const MAX_HEADERS_COUNT: usize = 100;

const READ_CHUNK: usize = 8 * 1024;

/// Parsed response status line and header list.
#[derive(Debug)]
pub(crate) struct ResponseHead {
    pub status: u16,
    pub message: String,
    pub headers: Vec<Header>,
}

impl ResponseHead {
    pub(crate) fn header(&self, name: &str) -> Option<&str> {
        crate::headers::find(&self.headers, name).map(|h| h.value.as_str())
    }
}

/// Single-use HTTP/1.1 connection.
pub(crate) struct H1Connection {
    stream: MaybeHttpsStream,
    read_timeout: Option<Duration>,
}

impl H1Connection {
    pub(crate) fn new(stream: MaybeHttpsStream, read_timeout: Option<Duration>) -> Self {
        Self {
            stream,
            read_timeout,
        }
    }

    /// Format and transmit the request line, headers and optional body.
    pub(crate) async fn send(
        &mut self,
        method: &Method,
        uri: &Uri,
        headers: &[Header],
        body: Option<&Bytes>,
    ) -> Result<()> {
        let request = build_request(method, uri, headers, body)?;
        debug!(%method, target = %uri, bytes = request.len(), "sending request");
        self.stream
            .write_all(&request)
            .await
            .map_err(|e| Error::http_protocol(format!("failed to write request: {}", e)))?;
        if let Some(body) = body {
            self.stream
                .write_all(body)
                .await
                .map_err(|e| Error::http_protocol(format!("failed to write body: {}", e)))?;
        }
        self.stream
            .flush()
            .await
            .map_err(|e| Error::http_protocol(format!("failed to flush: {}", e)))?;
        Ok(())
    }

    /// Read the response head, skipping interim 1xx responses, and hand the
    /// remaining stream over as a framed body channel.
    ///
    /// `method` decides body presence: responses to HEAD and 1xx/204/304
    /// statuses never carry one.
    pub(crate) async fn read_head(mut self, method: &Method) -> Result<(ResponseHead, FramedBody)> {
        let mut buffer: Vec<u8> = Vec::with_capacity(READ_CHUNK);

        loop {
            let head_len = loop {
                if let Some(end) = find_head_end(&buffer) {
                    break end;
                }
                if buffer.len() >= MAX_HEAD_SIZE {
                    return Err(Error::http_protocol("response head too large"));
                }
                let n = fill(&mut self.stream, &mut buffer, self.read_timeout).await?;
                if n == 0 {
                    return Err(Error::http_protocol(
                        "connection closed before response head complete",
                    ));
                }
            };

            let head = parse_head(&buffer[..head_len])?;
            buffer.drain(..head_len);

            // Interim responses carry no body; keep reading for the final one.
            if (100..200).contains(&head.status) {
                debug!(status = head.status, "skipping interim response");
                continue;
            }
            debug!(status = head.status, "response head parsed");

            let framing = if !response_has_body(head.status, method) {
                Framing::None
            } else {
                resolve_framing(&head)?
            };
            let body = FramedBody {
                stream: self.stream,
                buffer,
                framing,
                pending: None,
                read_timeout: self.read_timeout,
            };
            return Ok((head, body));
        }
    }
}

/// Whether a response with this status, to this request method, has a body.
fn response_has_body(status: u16, method: &Method) -> bool {
    !matches!(status, 100..=199 | 204 | 304) && *method != Method::HEAD
}

fn parse_head(raw: &[u8]) -> Result<ResponseHead> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS_COUNT];
    let mut response = httparse::Response::new(&mut headers);

    match response
        .parse(raw)
        .map_err(|e| Error::http_protocol(format!("failed to parse response: {}", e)))?
    {
        httparse::Status::Complete(_) => {}
        httparse::Status::Partial => {
            return Err(Error::http_protocol("incomplete response head"));
        }
    }

    let status = response
        .code
        .ok_or_else(|| Error::http_protocol("missing status code"))?;
    let message = response.reason.unwrap_or("").to_string();
    // httparse leaves unused slots with empty names; skip them.
    let headers = response
        .headers
        .iter()
        .filter(|h| !h.name.is_empty())
        .map(|h| Header::new(h.name, String::from_utf8_lossy(h.value).into_owned()))
        .collect();

    Ok(ResponseHead {
        status,
        message,
        headers,
    })
}

/// Pick the body framing from the response head.
fn resolve_framing(head: &ResponseHead) -> Result<Framing> {
    if let Some(te) = head.header("transfer-encoding") {
        // chunked must be the final transfer coding; anything else is only
        // recoverable by reading to connection close.
        let chunked = te
            .split(',')
            .next_back()
            .map(|s| s.trim().eq_ignore_ascii_case("chunked"))
            .unwrap_or(false);
        return Ok(if chunked {
            Framing::Chunked(ChunkState::Size)
        } else {
            Framing::Close
        });
    }
    if let Some(cl) = head.header("content-length") {
        return Ok(Framing::Fixed {
            remaining: parse_content_length(cl)?,
        });
    }
    Ok(Framing::Close)
}

#[derive(Debug)]
enum Framing {
    /// The response has no body at all.
    None,
    Fixed {
        remaining: usize,
    },
    Chunked(ChunkState),
    Close,
}

#[derive(Debug)]
enum ChunkState {
    Size,
    Data { remaining: usize },
    Done,
}

/// The response body channel: pulls de-framed body bytes off the wire.
pub(crate) struct FramedBody {
    stream: MaybeHttpsStream,
    /// Bytes already read past the head but not yet de-framed.
    buffer: Vec<u8>,
    framing: Framing,
    /// De-framed bytes held back by a peek.
    pending: Option<Bytes>,
    read_timeout: Option<Duration>,
}

impl FramedBody {
    /// Look at the first body byte without consuming it. `None` means the
    /// channel is empty.
    pub(crate) async fn peek(&mut self) -> Result<Option<u8>> {
        if let Some(chunk) = &self.pending {
            return Ok(chunk.first().copied());
        }
        match self.next_frame().await? {
            Some(chunk) => {
                let byte = chunk[0];
                self.pending = Some(chunk);
                Ok(Some(byte))
            }
            None => Ok(None),
        }
    }

    /// Pull the next run of body bytes; `None` once the body is exhausted.
    pub(crate) async fn read_chunk(&mut self) -> Result<Option<Bytes>> {
        if let Some(chunk) = self.pending.take() {
            return Ok(Some(chunk));
        }
        self.next_frame().await
    }

    /// Drain the remaining body into one buffer.
    pub(crate) async fn read_to_end(&mut self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        while let Some(chunk) = self.read_chunk().await? {
            out.extend_from_slice(&chunk);
        }
        Ok(out)
    }

    /// Never returns an empty chunk; `None` is the end of the body.
    async fn next_frame(&mut self) -> Result<Option<Bytes>> {
        loop {
            match &mut self.framing {
                Framing::None => return Ok(None),
                Framing::Fixed { remaining } => {
                    if *remaining == 0 {
                        return Ok(None);
                    }
                    if self.buffer.is_empty() {
                        let n = fill(&mut self.stream, &mut self.buffer, self.read_timeout).await?;
                        if n == 0 {
                            return Err(Error::http_protocol(format!(
                                "connection closed with {} body bytes outstanding",
                                remaining
                            )));
                        }
                    }
                    let take = self.buffer.len().min(*remaining);
                    *remaining -= take;
                    let chunk: Vec<u8> = self.buffer.drain(..take).collect();
                    return Ok(Some(Bytes::from(chunk)));
                }
                Framing::Chunked(state) => match state {
                    ChunkState::Done => return Ok(None),
                    ChunkState::Size => {
                        let (size, line_end) = loop {
                            if let Some(found) = find_chunk_size(&self.buffer) {
                                break found;
                            }
                            let n =
                                fill(&mut self.stream, &mut self.buffer, self.read_timeout).await?;
                            if n == 0 {
                                return Err(Error::http_protocol(
                                    "connection closed while reading chunk size",
                                ));
                            }
                        };
                        self.buffer.drain(..line_end);
                        if size == 0 {
                            self.consume_trailers().await?;
                            self.framing = Framing::Chunked(ChunkState::Done);
                            return Ok(None);
                        }
                        self.framing = Framing::Chunked(ChunkState::Data { remaining: size });
                    }
                    ChunkState::Data { remaining } => {
                        if self.buffer.is_empty() {
                            let n =
                                fill(&mut self.stream, &mut self.buffer, self.read_timeout).await?;
                            if n == 0 {
                                return Err(Error::http_protocol(
                                    "connection closed while reading chunk data",
                                ));
                            }
                        }
                        let take = self.buffer.len().min(*remaining);
                        *remaining -= take;
                        let done = *remaining == 0;
                        let chunk: Vec<u8> = self.buffer.drain(..take).collect();
                        if done {
                            self.consume_crlf().await?;
                            self.framing = Framing::Chunked(ChunkState::Size);
                        }
                        return Ok(Some(Bytes::from(chunk)));
                    }
                },
                Framing::Close => {
                    if !self.buffer.is_empty() {
                        let chunk: Vec<u8> = self.buffer.drain(..).collect();
                        return Ok(Some(Bytes::from(chunk)));
                    }
                    let n = fill(&mut self.stream, &mut self.buffer, self.read_timeout).await?;
                    if n == 0 {
                        return Ok(None);
                    }
                }
            }
        }
    }

    /// Consume the CRLF that terminates a chunk's data.
    async fn consume_crlf(&mut self) -> Result<()> {
        while self.buffer.len() < 2 {
            let n = fill(&mut self.stream, &mut self.buffer, self.read_timeout).await?;
            if n == 0 {
                return Err(Error::http_protocol(
                    "connection closed inside chunk framing",
                ));
            }
        }
        if &self.buffer[..2] != b"\r\n" {
            return Err(Error::http_protocol("malformed chunk terminator"));
        }
        self.buffer.drain(..2);
        Ok(())
    }

    /// Consume trailer lines after the last chunk, up to the empty line.
    async fn consume_trailers(&mut self) -> Result<()> {
        loop {
            if let Some(pos) = find_crlf(&self.buffer) {
                self.buffer.drain(..pos + 2);
                if pos == 0 {
                    return Ok(());
                }
                continue;
            }
            let n = fill(&mut self.stream, &mut self.buffer, self.read_timeout).await?;
            if n == 0 {
                // A server that closes right after the last chunk sends no
                // trailer section at all.
                return Ok(());
            }
        }
    }
}

/// Read more bytes from the stream into `buffer` under the read timeout.
/// Returns the number of bytes read; 0 is end of stream.
async fn fill(
    stream: &mut MaybeHttpsStream,
    buffer: &mut Vec<u8>,
    read_timeout: Option<Duration>,
) -> Result<usize> {
    let mut read_buf = [0u8; READ_CHUNK];
    let n = bounded(read_timeout, async {
        stream
            .read(&mut read_buf)
            .await
            .map_err(|e| Error::http_protocol(format!("failed to read response: {}", e)))
    })
    .await?;
    buffer.extend_from_slice(&read_buf[..n]);
    Ok(n)
}

/// Format the request head (and frame the body with `Content-Length`).
///
/// Request-target is always origin-form; `Host` is always the first header;
/// `Connection: close` is added unless the caller set one, since the
/// connection serves exactly one exchange.
fn build_request(
    method: &Method,
    uri: &Uri,
    headers: &[Header],
    body: Option<&Bytes>,
) -> Result<Vec<u8>> {
    for header in headers {
        validate_header_name(&header.name)?;
        validate_header_value(&header.value)?;
    }

    let mut request = Vec::with_capacity(1024);
    request.extend_from_slice(method.as_str().as_bytes());
    request.push(b' ');
    let target = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    request.extend_from_slice(target.as_bytes());
    request.extend_from_slice(b" HTTP/1.1\r\n");

    request.extend_from_slice(b"Host: ");
    if let Some(host) = uri.host() {
        request.extend_from_slice(host.as_bytes());
        if let Some(port) = uri.port() {
            request.push(b':');
            request.extend_from_slice(port.as_str().as_bytes());
        }
    }
    request.extend_from_slice(b"\r\n");

    let mut has_connection = false;
    let mut has_content_length = false;
    for header in headers {
        if header.name.eq_ignore_ascii_case("host") {
            continue;
        }
        if header.name.eq_ignore_ascii_case("connection") {
            has_connection = true;
        }
        if header.name.eq_ignore_ascii_case("content-length") {
            has_content_length = true;
        }
        request.extend_from_slice(header.name.as_bytes());
        request.extend_from_slice(b": ");
        request.extend_from_slice(header.value.as_bytes());
        request.extend_from_slice(b"\r\n");
    }

    if !has_connection {
        request.extend_from_slice(b"Connection: close\r\n");
    }
    if let Some(body) = body {
        if !has_content_length {
            request.extend_from_slice(b"Content-Length: ");
            request.extend_from_slice(body.len().to_string().as_bytes());
            request.extend_from_slice(b"\r\n");
        }
    }
    request.extend_from_slice(b"\r\n");
    Ok(request)
}

/// Find the end of the response head (`\r\n\r\n`), inclusive.
fn find_head_end(buffer: &[u8]) -> Option<usize> {
    buffer
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|i| i + 4)
}

/// Parse a chunk-size line, returning (size, end-of-line position).
/// Chunk extensions after `;` are ignored.
fn find_chunk_size(buffer: &[u8]) -> Option<(usize, usize)> {
    let pos = find_crlf(buffer)?;
    let line = String::from_utf8_lossy(&buffer[..pos]);
    let size_part = line.split(';').next()?;
    let size = usize::from_str_radix(size_part.trim(), 16).ok()?;
    Some((size, pos + 2))
}

fn find_crlf(buffer: &[u8]) -> Option<usize> {
    buffer.windows(2).position(|w| w == b"\r\n")
}

/// Header names must be RFC 9110 tokens.
fn validate_header_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::http_protocol("empty header name"));
    }
    if !name.bytes().all(is_tchar) {
        return Err(Error::http_protocol(format!(
            "invalid character in header name: {:?}",
            name
        )));
    }
    Ok(())
}

fn is_tchar(b: u8) -> bool {
    matches!(b,
        b'!' | b'#' | b'$' | b'%' | b'&' | b'\'' | b'*' | b'+' | b'-' | b'.' |
        b'^' | b'_' | b'`' | b'|' | b'~' | b'0'..=b'9' | b'A'..=b'Z' | b'a'..=b'z'
    )
}

/// Header values must not contain NUL, CR or LF (header injection).
fn validate_header_value(value: &str) -> Result<()> {
    if value.bytes().any(|b| b == 0 || b == b'\r' || b == b'\n') {
        return Err(Error::http_protocol(
            "invalid character in header value (CR/LF/NUL not allowed)",
        ));
    }
    Ok(())
}

/// Content-Length must be a non-negative integer; duplicated values must
/// agree.
fn parse_content_length(value: &str) -> Result<usize> {
    let mut parts = value.split(',').map(str::trim);
    let first = parts
        .next()
        .unwrap_or("")
        .parse::<usize>()
        .map_err(|_| Error::http_protocol(format!("invalid Content-Length: {}", value)))?;
    for part in parts {
        let n = part
            .parse::<usize>()
            .map_err(|_| Error::http_protocol(format!("invalid Content-Length: {}", value)))?;
        if n != first {
            return Err(Error::http_protocol(format!(
                "conflicting Content-Length values: {}",
                value
            )));
        }
    }
    Ok(first)
}
