//! RFC 7617 (Basic) and RFC 7616 (Digest) authentication, plus the
//! call-scoped credential cell consulted by the transport's challenge flow.
//!
//! Credentials are installed per exchange with [`with_credentials`] and read
//! back through [`current`]. The cell is a task-local, so two exchanges
//! running concurrently with different credentials can never observe each
//! other's values, and the value is gone as soon as the installing call
//! returns.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};

use crate::error::{Error, Result};

/// Authentication scheme declared by a request description.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthScheme {
    Basic,
    Digest,
    Bearer,
    Negotiate,
}

impl fmt::Display for AuthScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AuthScheme::Basic => "Basic",
            AuthScheme::Digest => "Digest",
            AuthScheme::Bearer => "Bearer",
            AuthScheme::Negotiate => "Negotiate",
        };
        f.write_str(name)
    }
}

/// Authentication descriptor carried by a request description.
#[derive(Debug, Clone)]
pub struct Auth {
    pub scheme: AuthScheme,
    pub username: String,
    pub password: String,
}

impl Auth {
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            scheme: AuthScheme::Basic,
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn digest(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            scheme: AuthScheme::Digest,
            username: username.into(),
            password: password.into(),
        }
    }
}

/// Resolved (username, password) pair visible to the challenge hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

tokio::task_local! {
    static SCOPED: Option<Credentials>;
}

/// Map an auth descriptor to the credentials to install for one exchange.
///
/// Only Basic and Digest can be executed by the connection's
/// challenge/response flow; any other scheme fails here, before a
/// connection is opened.
pub fn resolve(auth: Option<&Auth>) -> Result<Option<Credentials>> {
    match auth {
        None => Ok(None),
        Some(a) if matches!(a.scheme, AuthScheme::Basic | AuthScheme::Digest) => {
            Ok(Some(Credentials {
                username: a.username.clone(),
                password: a.password.clone(),
            }))
        }
        Some(a) => Err(Error::unsupported(format!(
            "{} authentication",
            a.scheme
        ))),
    }
}

/// Run `fut` with `credentials` installed as the task-local credential
/// value. The value is cleared when the future returns, fails, or is
/// dropped mid-flight; it never leaks into another task's scope.
pub async fn with_credentials<F>(credentials: Option<Credentials>, fut: F) -> F::Output
where
    F: Future,
{
    SCOPED.scope(credentials, fut).await
}

/// The challenge hook: credentials installed by the current exchange.
///
/// Returns `None` outside any credential scope.
pub fn current() -> Option<Credentials> {
    SCOPED.try_with(Clone::clone).ok().flatten()
}

/// Generate a Basic Authorization header value (RFC 7617).
pub fn basic_authorization(username: &str, password: &str) -> String {
    let encoded = BASE64.encode(format!("{}:{}", username, password));
    format!("Basic {}", encoded)
}

/// A parsed `WWW-Authenticate` challenge.
#[derive(Debug)]
pub(crate) struct Challenge {
    pub scheme: String,
    pub params: HashMap<String, String>,
}

/// Parse a `WWW-Authenticate` header into scheme and parameters.
///
/// Handles `key=value` and `key="value"` pairs; nested quoting beyond that
/// does not occur in standard challenges.
pub(crate) fn parse_challenge(header: &str) -> Option<Challenge> {
    let header = header.trim();
    let (scheme, rest) = match header.split_once(char::is_whitespace) {
        Some((s, r)) => (s, r),
        None => (header, ""),
    };
    if scheme.is_empty() {
        return None;
    }

    let mut params = HashMap::new();
    for part in rest.split(',') {
        if let Some((key, value)) = part.trim().split_once('=') {
            let key = key.trim().to_lowercase();
            let value = value.trim().trim_matches('"');
            params.insert(key, value.to_string());
        }
    }

    Some(Challenge {
        scheme: scheme.to_string(),
        params,
    })
}

/// Answer a `WWW-Authenticate` challenge using the scoped credentials.
///
/// Returns the Authorization header value, or `None` when no credentials
/// are in scope or the challenge names a scheme we cannot answer.
pub(crate) fn answer_challenge(method: &str, uri: &str, header: &str) -> Option<String> {
    let credentials = current()?;
    let challenge = parse_challenge(header)?;

    if challenge.scheme.eq_ignore_ascii_case("basic") {
        Some(basic_authorization(
            &credentials.username,
            &credentials.password,
        ))
    } else if challenge.scheme.eq_ignore_ascii_case("digest") {
        digest_authorization(&credentials, method, uri, &challenge.params)
    } else {
        None
    }
}

/// Build a Digest Authorization header (RFC 7616) from challenge params.
///
/// Supports MD5, SHA-256 and their `-sess` variants with `qop="auth"`.
fn digest_authorization(
    credentials: &Credentials,
    method: &str,
    uri: &str,
    params: &HashMap<String, String>,
) -> Option<String> {
    let realm = params.get("realm")?;
    let nonce = params.get("nonce")?;
    let algorithm = params
        .get("algorithm")
        .map(String::as_str)
        .unwrap_or("MD5");
    // Pick "auth" when the server offers it; auth-int is not supported.
    let qop = params
        .get("qop")
        .and_then(|q| q.split(',').map(str::trim).find(|q| *q == "auth"));

    let cnonce = generate_cnonce()?;
    let nc = "00000001";

    let response = digest_response(
        credentials,
        method,
        uri,
        realm,
        nonce,
        &cnonce,
        nc,
        qop,
        algorithm,
    );

    let mut header = format!(
        "Digest username=\"{}\", realm=\"{}\", nonce=\"{}\", uri=\"{}\", response=\"{}\", algorithm={}",
        credentials.username, realm, nonce, uri, response, algorithm
    );
    if let Some(qop) = qop {
        header.push_str(&format!(", qop={}, nc={}, cnonce=\"{}\"", qop, nc, cnonce));
    }
    if let Some(opaque) = params.get("opaque") {
        header.push_str(&format!(", opaque=\"{}\"", opaque));
    }
    Some(header)
}

/// Compute the Digest `response` value.
#[allow(clippy::too_many_arguments)]
fn digest_response(
    credentials: &Credentials,
    method: &str,
    uri: &str,
    realm: &str,
    nonce: &str,
    cnonce: &str,
    nc: &str,
    qop: Option<&str>,
    algorithm: &str,
) -> String {
    let hash = |data: &str| -> String {
        if algorithm.to_uppercase().starts_with("SHA-256") {
            use sha2::{Digest, Sha256};
            hex::encode(Sha256::digest(data.as_bytes()))
        } else {
            use md5::{Digest, Md5};
            hex::encode(Md5::digest(data.as_bytes()))
        }
    };

    let mut ha1 = hash(&format!(
        "{}:{}:{}",
        credentials.username, realm, credentials.password
    ));
    if algorithm.to_uppercase().ends_with("-SESS") {
        ha1 = hash(&format!("{}:{}:{}", ha1, nonce, cnonce));
    }

    let ha2 = hash(&format!("{}:{}", method, uri));

    match qop {
        Some(qop) => hash(&format!(
            "{}:{}:{}:{}:{}:{}",
            ha1, nonce, nc, cnonce, qop, ha2
        )),
        None => hash(&format!("{}:{}:{}", ha1, nonce, ha2)),
    }
}

/// Random client nonce for Digest exchanges. `None` when the OS random
/// source is unavailable, in which case the challenge goes unanswered.
fn generate_cnonce() -> Option<String> {
    let mut buf = [0u8; 16];
    getrandom::fill(&mut buf).ok()?;
    Some(hex::encode(buf))
}
