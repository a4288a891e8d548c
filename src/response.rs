//! The response surface handed to parsers and response actions.
//!
//! [`ResponseReader`] wraps the parsed head and the framed body channel.
//! Body presence is decided once, by a one-byte peek that leaves the byte in
//! place; decoding (gzip/deflate per `Content-Encoding`) happens lazily on
//! the first body read, and unknown codings pass through untouched.

use std::io::Read;

use bytes::{Bytes, BytesMut};
use http::Uri;
use tracing::debug;

use crate::error::{Error, Result};
use crate::headers::Header;
use crate::transport::h1::{FramedBody, ResponseHead};

/// A received response: status line, headers, and the lazily decoded body.
pub struct ResponseReader {
    status: u16,
    message: String,
    headers: Vec<Header>,
    uri: Uri,
    has_body: bool,
    body: Option<BodyStream>,
}

impl ResponseReader {
    /// Probe the body channel and wire up the decoder.
    ///
    /// A failure opening or probing the channel is swallowed: the response
    /// keeps its status and headers and simply reports no body.
    pub(crate) async fn new(head: ResponseHead, mut body: FramedBody, uri: Uri) -> Self {
        let has_body = match body.peek().await {
            Ok(Some(_)) => true,
            Ok(None) => false,
            Err(e) => {
                debug!(error = %e, "body probe failed, treating response as body-less");
                false
            }
        };

        let stream = has_body.then(|| {
            let coding = match crate::headers::find(&head.headers, "content-encoding")
                .map(|h| h.value.to_ascii_lowercase())
                .as_deref()
            {
                Some("gzip") | Some("x-gzip") => Coding::Gzip,
                Some("deflate") => Coding::Deflate,
                // Unrecognised codings are delivered as-is.
                _ => Coding::Identity,
            };
            BodyStream {
                framed: body,
                coding,
                done: false,
            }
        });

        Self {
            status: head.status,
            message: head.message,
            headers: head.headers,
            uri,
            has_body,
            body: stream,
        }
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    /// The reason phrase from the status line.
    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn headers(&self) -> &[Header] {
        &self.headers
    }

    /// First header with this name, case-insensitive.
    pub fn header(&self, name: &str) -> Option<&str> {
        crate::headers::find(&self.headers, name).map(|h| h.value.as_str())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    pub fn content_encoding(&self) -> Option<&str> {
        self.header("content-encoding")
    }

    /// Whether the response carries any body bytes.
    pub fn has_body(&self) -> bool {
        self.has_body
    }

    /// The URI this response was received from.
    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    /// Pull the next run of decoded body bytes; `None` once exhausted.
    pub async fn read_chunk(&mut self) -> Result<Option<Bytes>> {
        match &mut self.body {
            Some(stream) => stream.next().await,
            None => Ok(None),
        }
    }

    /// Drain the whole decoded body.
    pub async fn read_body(&mut self) -> Result<Bytes> {
        let mut out = BytesMut::new();
        while let Some(chunk) = self.read_chunk().await? {
            out.extend_from_slice(&chunk);
        }
        Ok(out.freeze())
    }

    /// Drain the body and decode it as UTF-8.
    pub async fn text(&mut self) -> Result<String> {
        let body = self.read_body().await?;
        String::from_utf8(body.to_vec())
            .map_err(|e| Error::Decompression(format!("UTF-8 decode error: {}", e)))
    }

    /// Release hook invoked when the exchange completes. The connection is
    /// dropped with the reader, so there is nothing to release here.
    pub fn finish(&mut self) {}
}

enum Coding {
    Identity,
    Gzip,
    Deflate,
}

struct BodyStream {
    framed: FramedBody,
    coding: Coding,
    done: bool,
}

impl BodyStream {
    async fn next(&mut self) -> Result<Option<Bytes>> {
        match self.coding {
            // Plain bodies flow through incrementally.
            Coding::Identity => self.framed.read_chunk().await,
            // Compressed bodies are drained and decoded on first read.
            Coding::Gzip | Coding::Deflate => {
                if self.done {
                    return Ok(None);
                }
                self.done = true;
                let raw = self.framed.read_to_end().await?;
                let decoded = match self.coding {
                    Coding::Gzip => decode_gzip(&raw)?,
                    _ => decode_deflate(&raw)?,
                };
                if decoded.is_empty() {
                    return Ok(None);
                }
                Ok(Some(decoded))
            }
        }
    }
}

fn decode_gzip(data: &[u8]) -> Result<Bytes> {
    let mut decoder = flate2::read::GzDecoder::new(data);
    let mut decoded = Vec::new();
    decoder
        .read_to_end(&mut decoded)
        .map_err(|e| Error::Decompression(format!("gzip: {}", e)))?;
    Ok(Bytes::from(decoded))
}

/// Servers disagree on whether "deflate" means zlib-wrapped or raw; try the
/// zlib framing first and fall back to the raw stream.
fn decode_deflate(data: &[u8]) -> Result<Bytes> {
    let mut decoded = Vec::new();
    if flate2::read::ZlibDecoder::new(data)
        .read_to_end(&mut decoded)
        .is_ok()
    {
        return Ok(Bytes::from(decoded));
    }
    decoded.clear();
    flate2::read::DeflateDecoder::new(data)
        .read_to_end(&mut decoded)
        .map_err(|e| Error::Decompression(format!("deflate: {}", e)))?;
    Ok(Bytes::from(decoded))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder =
            flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn gzip_round_trip() {
        let original = b"the quick brown fox jumps over the lazy dog";
        assert_eq!(&decode_gzip(&gzip(original)).unwrap()[..], original);
    }

    #[test]
    fn gzip_rejects_garbage() {
        assert!(matches!(
            decode_gzip(b"not gzip at all"),
            Err(Error::Decompression(_))
        ));
    }

    #[test]
    fn deflate_accepts_zlib_and_raw_framing() {
        let original = b"payload payload payload";

        let mut zlib =
            flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
        zlib.write_all(original).unwrap();
        let zlib = zlib.finish().unwrap();
        assert_eq!(&decode_deflate(&zlib).unwrap()[..], original);

        let mut raw =
            flate2::write::DeflateEncoder::new(Vec::new(), flate2::Compression::default());
        raw.write_all(original).unwrap();
        let raw = raw.finish().unwrap();
        assert_eq!(&decode_deflate(&raw).unwrap()[..], original);
    }
}
