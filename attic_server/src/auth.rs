//! Owner authentication: HTTP Basic or shared-token.
//!
//! Credential comparison goes through blake3 digests so equality takes the
//! same time whether the first or last byte differs. Credential values are
//! never logged.

use axum::extract::{Request, State};
use axum::http::{HeaderMap, Uri, header};
use axum::middleware::Next;
use axum::response::Response;
use base64::Engine;

use attic_core::{StoreError, StoreResult};

use crate::AppState;
use crate::error::unauthorized_response;

/// Environment variable carrying a full credential spec.
pub const AUTH_ENV: &str = "CAMLI_AUTH";

/// Environment variable carrying a bare owner password.
pub const PASSWORD_ENV: &str = "CAMLI_PASSWORD";

#[derive(Clone)]
pub enum Auth {
    /// HTTP Basic. An empty user matches any presented user name.
    UserPass { user: String, password: String },
    /// `Authorization: Token <value>` or `?auth=<value>`.
    Token(String),
}

impl std::fmt::Debug for Auth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // never expose credential material, even in debug logs
        match self {
            Self::UserPass { user, .. } => f
                .debug_struct("Auth::UserPass")
                .field("user", user)
                .finish_non_exhaustive(),
            Self::Token(_) => f.write_str("Auth::Token(..)"),
        }
    }
}

impl Auth {
    /// Parses a credential spec: `userpass:<user>:<pass>` or `token:<value>`.
    pub fn parse(spec: &str) -> StoreResult<Self> {
        if let Some(rest) = spec.strip_prefix("userpass:") {
            let (user, password) = rest
                .split_once(':')
                .ok_or_else(|| StoreError::bad_request("userpass spec wants <user>:<pass>"))?;
            if password.is_empty() {
                return Err(StoreError::bad_request("empty owner password"));
            }
            return Ok(Self::UserPass {
                user: user.to_owned(),
                password: password.to_owned(),
            });
        }
        if let Some(token) = spec.strip_prefix("token:") {
            if token.is_empty() {
                return Err(StoreError::bad_request("empty auth token"));
            }
            return Ok(Self::Token(token.to_owned()));
        }
        Err(StoreError::bad_request(
            "auth spec wants userpass:<user>:<pass> or token:<value>",
        ))
    }

    /// Reads credentials from `CAMLI_AUTH`, falling back to
    /// `CAMLI_PASSWORD` (Basic with any user name).
    pub fn from_env() -> StoreResult<Option<Self>> {
        if let Ok(spec) = std::env::var(AUTH_ENV) {
            return Self::parse(&spec).map(Some);
        }
        if let Ok(password) = std::env::var(PASSWORD_ENV) {
            if password.is_empty() {
                return Err(StoreError::bad_request("empty owner password"));
            }
            return Ok(Some(Self::UserPass {
                user: String::new(),
                password,
            }));
        }
        Ok(None)
    }

    /// Answers the owner check for a request.
    pub fn is_authorized(&self, headers: &HeaderMap, query_auth: Option<&str>) -> bool {
        let header_value = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok());
        match self {
            Self::UserPass { user, password } => {
                let Some(encoded) = header_value.and_then(|v| v.strip_prefix("Basic ")) else {
                    return false;
                };
                let Ok(decoded) = base64::engine::general_purpose::STANDARD.decode(encoded) else {
                    return false;
                };
                let Ok(decoded) = String::from_utf8(decoded) else {
                    return false;
                };
                let Some((got_user, got_password)) = decoded.split_once(':') else {
                    return false;
                };
                let user_ok = user.is_empty() || constant_time_eq(got_user, user);
                user_ok & constant_time_eq(got_password, password)
            }
            Self::Token(token) => {
                if let Some(got) = header_value.and_then(|v| v.strip_prefix("Token ")) {
                    return constant_time_eq(got, token);
                }
                query_auth.is_some_and(|got| constant_time_eq(got, token))
            }
        }
    }
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    // blake3::Hash equality is constant-time
    blake3::hash(a.as_bytes()) == blake3::hash(b.as_bytes())
}

/// Extracts the `auth` query parameter, if any.
pub fn query_auth(uri: &Uri) -> Option<String> {
    let query = uri.query()?;
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(k, _)| k == "auth")
        .map(|(_, v)| v.into_owned())
}

/// Middleware gating owner-only routes: delegates when the owner check
/// passes, answers 401 with a Basic challenge otherwise.
pub async fn require_owner(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let query_auth = query_auth(req.uri());
    if state.auth.is_authorized(req.headers(), query_auth.as_deref()) {
        next.run(req).await
    } else {
        unauthorized_response(&state.config.realm)
    }
}
