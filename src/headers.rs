//! Request header materialization.
//!
//! [`materialize`] turns the declarative parts of a request description into
//! the final header list sent on the wire: configured headers first, then the
//! derived `Content-Type`, the fixed `Accept-Encoding`, and the `Cookie`
//! header contributed by the shared store after the request's own cookies
//! have been registered.

use http::Uri;

use crate::cookie::{Cookie, CookieStore};

/// A single request or response header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub name: String,
    pub value: String,
}

impl Header {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Case-insensitive header lookup; first match wins.
pub fn find<'a>(headers: &'a [Header], name: &str) -> Option<&'a Header> {
    headers.iter().find(|h| h.name.eq_ignore_ascii_case(name))
}

fn set(headers: &mut Vec<Header>, name: &str, value: String) {
    match headers.iter_mut().find(|h| h.name.eq_ignore_ascii_case(name)) {
        Some(existing) => existing.value = value,
        None => headers.push(Header::new(name, value)),
    }
}

/// Build the final header list for one exchange.
///
/// Every request advertises `Accept-Encoding: gzip, deflate`, whether or not
/// a decompressing parser is registered. The request's declared cookies are
/// registered into `store` (scoped to `uri`) before the `Cookie` header is
/// built, so they are visible to this exchange and every later one.
pub(crate) fn materialize(
    uri: &Uri,
    configured: &[Header],
    content_type: Option<&str>,
    charset: Option<&str>,
    cookies: &[Cookie],
    store: &CookieStore,
) -> Vec<Header> {
    let mut headers: Vec<Header> = configured.to_vec();

    if let Some(content_type) = content_type {
        let value = match charset {
            Some(charset) => format!("{}; charset={}", content_type, charset),
            None => content_type.to_string(),
        };
        set(&mut headers, "Content-Type", value);
    }

    set(&mut headers, "Accept-Encoding", "gzip, deflate".to_string());

    store.register(uri, cookies);
    if let Some(cookie_header) = store.header_for(uri) {
        set(&mut headers, "Cookie", cookie_header);
    }

    headers
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uri(s: &str) -> Uri {
        s.parse().unwrap()
    }

    #[test]
    fn find_is_case_insensitive() {
        let headers = vec![Header::new("X-Token", "abc")];
        assert_eq!(find(&headers, "x-token").unwrap().value, "abc");
        assert!(find(&headers, "x-other").is_none());
    }

    #[test]
    fn accept_encoding_is_always_advertised() {
        let store = CookieStore::new();
        let headers = materialize(&uri("http://example.com/"), &[], None, None, &[], &store);
        assert_eq!(find(&headers, "accept-encoding").unwrap().value, "gzip, deflate");
    }

    #[test]
    fn content_type_carries_charset() {
        let store = CookieStore::new();
        let headers = materialize(
            &uri("http://example.com/"),
            &[],
            Some("application/json"),
            Some("utf-8"),
            &[],
            &store,
        );
        assert_eq!(
            find(&headers, "content-type").unwrap().value,
            "application/json; charset=utf-8"
        );
    }

    #[test]
    fn configured_headers_survive_and_derived_ones_replace() {
        let store = CookieStore::new();
        let headers = materialize(
            &uri("http://example.com/"),
            &[
                Header::new("X-Custom", "yes"),
                Header::new("Accept-Encoding", "identity"),
            ],
            None,
            None,
            &[],
            &store,
        );
        assert_eq!(find(&headers, "x-custom").unwrap().value, "yes");
        assert_eq!(find(&headers, "accept-encoding").unwrap().value, "gzip, deflate");
        assert_eq!(
            headers.iter().filter(|h| h.name.eq_ignore_ascii_case("accept-encoding")).count(),
            1
        );
    }

    #[test]
    fn declared_cookies_are_registered_and_sent() {
        let store = CookieStore::new();
        let headers = materialize(
            &uri("http://example.com/app"),
            &[],
            None,
            None,
            &[Cookie::new("session", "s1")],
            &store,
        );
        assert_eq!(find(&headers, "cookie").unwrap().value, "session=s1");
        assert_eq!(store.get("example.com", "session").unwrap().value, "s1");
    }

    #[test]
    fn stored_cookies_reach_later_requests() {
        let store = CookieStore::new();
        materialize(
            &uri("http://example.com/"),
            &[],
            None,
            None,
            &[Cookie::new("seen", "1")],
            &store,
        );
        let later = materialize(&uri("http://example.com/other"), &[], None, None, &[], &store);
        assert_eq!(find(&later, "cookie").unwrap().value, "seen=1");
    }
}
