//! Cookie registration and the shared cookie store.
//!
//! A request description carries declarative [`Cookie`] values (name, value,
//! optional expiry). When headers are materialized for an exchange, each one
//! is scoped to the request URI's host and path and written into the shared
//! [`CookieStore`] as a [`StoredCookie`]; the store then contributes a single
//! `Cookie` header for every request whose URI it matches.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Duration, Utc};
use http::Uri;

/// Lifetime given to a cookie that carries no expiry, in seconds.
pub(crate) const DEFAULT_MAX_AGE: i64 = 3600;

/// A cookie as declared on a request description.
///
/// Scope (domain, path) is not declared here; it is derived from the URI of
/// the request that registers the cookie.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub expires: Option<DateTime<Utc>>,
}

impl Cookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            expires: None,
        }
    }

    pub fn expiring(
        name: impl Into<String>,
        value: impl Into<String>,
        expires: DateTime<Utc>,
    ) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            expires: Some(expires),
        }
    }
}

/// A cookie after registration, scoped to the registering request's URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
    /// Seconds of life granted at registration: the distance to the declared
    /// expiry, or [`DEFAULT_MAX_AGE`] when none was declared.
    pub max_age: i64,
    expires_at: DateTime<Utc>,
}

impl StoredCookie {
    /// Whether this cookie should accompany a request to `host` + `path`.
    fn matches(&self, host: &str, path: &str, now: DateTime<Utc>) -> bool {
        if self.expires_at <= now {
            return false;
        }
        let domain = self.domain.to_lowercase();
        let host = host.to_lowercase();
        if host != domain && !host.ends_with(&format!(".{}", domain)) {
            return false;
        }
        path == self.path || path.starts_with(&format!("{}/", self.path.trim_end_matches('/')))
    }
}

/// Convert a declared expiry into a max-age relative to `now`.
pub(crate) fn derive_max_age(expires: Option<DateTime<Utc>>, now: DateTime<Utc>) -> i64 {
    match expires {
        Some(expires) => (expires - now).num_seconds(),
        None => DEFAULT_MAX_AGE,
    }
}

/// Thread-safe cookie store shared by every exchange of one engine.
///
/// Keyed by registering domain, then cookie name; re-registering a name for
/// the same domain replaces the previous value.
#[derive(Debug, Clone, Default)]
pub struct CookieStore {
    inner: Arc<RwLock<HashMap<String, HashMap<String, StoredCookie>>>>,
}

impl CookieStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the request's declared cookies, scoped to its URI.
    ///
    /// Domain comes from the URI host, path from the URI path; a URI without
    /// a host registers nothing.
    pub fn register(&self, uri: &Uri, cookies: &[Cookie]) {
        let Some(host) = uri.host() else { return };
        let path = uri.path().to_string();
        let now = Utc::now();

        let mut stored = match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let domain_cookies = stored.entry(host.to_lowercase()).or_default();
        for cookie in cookies {
            let max_age = derive_max_age(cookie.expires, now);
            domain_cookies.insert(
                cookie.name.clone(),
                StoredCookie {
                    name: cookie.name.clone(),
                    value: cookie.value.clone(),
                    domain: host.to_lowercase(),
                    path: path.clone(),
                    max_age,
                    expires_at: now + Duration::seconds(max_age),
                },
            );
        }
    }

    /// Build the `Cookie` header value for a request URI, or `None` when no
    /// stored cookie matches it.
    pub fn header_for(&self, uri: &Uri) -> Option<String> {
        let host = uri.host()?;
        let path = uri.path();
        let now = Utc::now();

        let stored = match self.inner.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut matching: Vec<&StoredCookie> = stored
            .values()
            .flat_map(|by_name| by_name.values())
            .filter(|c| c.matches(host, path, now))
            .collect();
        if matching.is_empty() {
            return None;
        }
        // Stable header text regardless of map iteration order.
        matching.sort_by(|a, b| a.name.cmp(&b.name));
        Some(
            matching
                .iter()
                .map(|c| format!("{}={}", c.name, c.value))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }

    /// Look up a stored cookie by registering domain and name.
    pub fn get(&self, domain: &str, name: &str) -> Option<StoredCookie> {
        let stored = match self.inner.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        stored.get(&domain.to_lowercase())?.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        let stored = match self.inner.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        stored.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uri(s: &str) -> Uri {
        s.parse().unwrap()
    }

    #[test]
    fn max_age_is_distance_to_declared_expiry() {
        let now = Utc::now();
        let max_age = derive_max_age(Some(now + Duration::hours(2)), now);
        assert!((7199..=7200).contains(&max_age), "got {}", max_age);
    }

    #[test]
    fn max_age_defaults_without_expiry() {
        assert_eq!(derive_max_age(None, Utc::now()), DEFAULT_MAX_AGE);
    }

    #[test]
    fn register_scopes_to_request_uri() {
        let store = CookieStore::new();
        store.register(
            &uri("http://example.com/api/items"),
            &[Cookie::new("session", "abc123")],
        );

        let stored = store.get("example.com", "session").unwrap();
        assert_eq!(stored.domain, "example.com");
        assert_eq!(stored.path, "/api/items");
        assert_eq!(stored.max_age, DEFAULT_MAX_AGE);
    }

    #[test]
    fn header_matches_domain_and_path() {
        let store = CookieStore::new();
        store.register(
            &uri("http://example.com/api"),
            &[Cookie::new("a", "1"), Cookie::new("b", "2")],
        );

        assert_eq!(
            store.header_for(&uri("http://example.com/api")).as_deref(),
            Some("a=1; b=2")
        );
        assert_eq!(
            store
                .header_for(&uri("http://sub.example.com/api/deeper"))
                .as_deref(),
            Some("a=1; b=2")
        );
        assert!(store.header_for(&uri("http://other.com/api")).is_none());
        assert!(store.header_for(&uri("http://example.com/elsewhere")).is_none());
    }

    #[test]
    fn reregistering_replaces_value() {
        let store = CookieStore::new();
        store.register(&uri("http://example.com/"), &[Cookie::new("k", "old")]);
        store.register(&uri("http://example.com/"), &[Cookie::new("k", "new")]);

        assert_eq!(store.len(), 1);
        assert_eq!(store.get("example.com", "k").unwrap().value, "new");
    }

    #[test]
    fn expired_cookie_is_not_sent() {
        let store = CookieStore::new();
        store.register(
            &uri("http://example.com/"),
            &[Cookie::expiring("gone", "x", Utc::now() - Duration::hours(1))],
        );
        assert!(store.header_for(&uri("http://example.com/")).is_none());
    }
}
