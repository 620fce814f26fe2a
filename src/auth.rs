//! Authentication: password digests, JWT mint/verify, request middleware.
//!
//! The password digest is deterministic and salted with the email so login
//! can compare stored and recomputed digests byte for byte. Tokens are HS256
//! JWTs carrying the user id; the middleware accepts them from the
//! `Authorization` header (with or without a `Bearer ` prefix) or from the
//! `jwt-token` cookie.

use std::sync::Arc;

use anyhow::Context;
use axum::{
    body::Body,
    extract::State,
    http::{header, Request, StatusCode},
    middleware::Next,
    response::Response,
};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

pub const AUTH_COOKIE: &str = "Authorization";
pub const JWT_COOKIE: &str = "jwt-token";

const TOKEN_TTL_HOURS: i64 = 24;

/// JWT claims: subject is the user id.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
    pub iat: usize,
}

/// Request-scoped identity injected by [`auth_middleware`]. Handlers behind
/// the middleware can rely on it being present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthUser(pub Uuid);

/// Deterministic salted digest of (email, password).
pub fn password_hash(email: &str, password: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(email.as_bytes());
    hasher.update(password.as_bytes());
    hasher.finalize().to_vec()
}

pub struct Authenticator {
    signing_key: String,
}

impl Authenticator {
    pub fn new(signing_key: impl Into<String>) -> Self {
        Self {
            signing_key: signing_key.into(),
        }
    }

    /// Issue a signed token for `user_id`, valid for 24 hours.
    pub fn mint(&self, user_id: Uuid) -> anyhow::Result<String> {
        let now = Utc::now();
        let expiration = now
            .checked_add_signed(Duration::hours(TOKEN_TTL_HOURS))
            .context("valid timestamp")?;

        let claims = Claims {
            sub: user_id.to_string(),
            exp: expiration.timestamp() as usize,
            iat: now.timestamp() as usize,
        };

        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.signing_key.as_bytes()),
        )
        .context("failed to sign token")
    }

    /// Verify a token and extract the user id it was minted for.
    pub fn verify(&self, token: &str) -> anyhow::Result<Uuid> {
        let data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.signing_key.as_bytes()),
            &Validation::new(Algorithm::HS256),
        )?;

        Uuid::parse_str(&data.claims.sub).context("token subject is not a user id")
    }
}

/// `Set-Cookie` value carrying the freshly minted token.
pub fn auth_cookie(name: &str, token: &str) -> String {
    format!("{name}={token}; Path=/; HttpOnly")
}

fn cookie_value(cookie_header: &str, name: &str) -> Option<String> {
    cookie_header
        .split(';')
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.to_string())
}

fn token_from_request(request: &Request<Body>) -> Option<String> {
    if let Some(value) = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
    {
        let token = value.strip_prefix("Bearer ").unwrap_or(value).trim();
        if !token.is_empty() {
            return Some(token.to_string());
        }
    }

    let cookies = request
        .headers()
        .get(header::COOKIE)
        .and_then(|h| h.to_str().ok())?;
    cookie_value(cookies, JWT_COOKIE)
}

/// Reject the request with 401 unless it carries a verifiable token; on
/// success the user id travels to the handler as an [`AuthUser`] extension.
pub async fn auth_middleware(
    State(auth): State<Arc<Authenticator>>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let Some(token) = token_from_request(&request) else {
        return Err(StatusCode::UNAUTHORIZED);
    };

    match auth.verify(&token) {
        Ok(user_id) => {
            request.extensions_mut().insert(AuthUser(user_id));
            Ok(next.run(request).await)
        }
        Err(_) => Err(StatusCode::UNAUTHORIZED),
    }
}
