//! Request authentication.
//!
//! Two independent checks:
//! - an optional gateway key on every `/api` request, compared in constant time;
//! - the caller's identity, carried as an HS256 bearer token issued by the
//!   identity provider and exposed to handlers through the [`Viewer`] extractor.

use axum::{
    extract::{FromRequestParts, Request},
    http::{header, request::Parts, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Response},
};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;

use crate::errors::{AppError, AppErrorWithRevision};
use crate::AppState;

/// Header name for the gateway key.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Identity headers trusted when no token secret is configured.
pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_NAME_HEADER: &str = "x-user-name";
pub const USER_IMAGE_HEADER: &str = "x-user-image";

/// Gateway key layer function that takes the expected key as a parameter.
pub async fn api_key_layer(expected_key: Option<String>, request: Request, next: Next) -> Response {
    // If no key is configured, allow all requests (dev mode)
    let Some(expected) = expected_key else {
        return next.run(request).await;
    };

    let provided = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok());

    match provided {
        Some(key) if constant_time_compare(key, &expected) => next.run(request).await,
        Some(_) => unauthorized_response("Invalid API key"),
        None => unauthorized_response("Missing API key"),
    }
}

/// Perform constant-time string comparison.
fn constant_time_compare(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

/// Create an unauthorized response.
fn unauthorized_response(message: &str) -> Response {
    AppErrorWithRevision::from(AppError::Unauthorized(message.to_string())).into_response()
}

/// Claims read from an identity token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
    pub exp: usize,
}

/// An authenticated user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    pub name: Option<String>,
    pub image_url: Option<String>,
}

impl From<Claims> for Identity {
    fn from(claims: Claims) -> Self {
        Self {
            user_id: claims.sub,
            name: claims.name,
            image_url: claims.picture,
        }
    }
}

/// Resolves the caller's identity from request headers.
#[derive(Clone)]
pub enum IdentityVerifier {
    /// Bearer tokens signed with a shared HS256 secret.
    Hs256(DecodingKey),
    /// Development mode: trust `x-user-*` headers as-is.
    TrustedHeaders,
}

impl IdentityVerifier {
    pub fn new(secret: Option<&str>) -> Self {
        match secret {
            Some(secret) => IdentityVerifier::Hs256(DecodingKey::from_secret(secret.as_bytes())),
            None => IdentityVerifier::TrustedHeaders,
        }
    }

    /// `Ok(None)` when the request carries no identity at all.
    pub fn identify(&self, headers: &HeaderMap) -> Result<Option<Identity>, AppError> {
        match self {
            IdentityVerifier::Hs256(key) => {
                let Some(value) = headers.get(header::AUTHORIZATION) else {
                    return Ok(None);
                };
                let token = value
                    .to_str()
                    .ok()
                    .and_then(|v| v.strip_prefix("Bearer "))
                    .ok_or_else(|| {
                        AppError::Unauthenticated("Malformed Authorization header".to_string())
                    })?;

                let validation = Validation::new(Algorithm::HS256);
                let data = decode::<Claims>(token.trim(), key, &validation).map_err(|e| {
                    tracing::debug!("Rejected identity token: {}", e);
                    AppError::Unauthenticated("Invalid identity token".to_string())
                })?;
                if data.claims.sub.is_empty() {
                    return Err(AppError::Unauthenticated(
                        "Identity token has no subject".to_string(),
                    ));
                }
                Ok(Some(data.claims.into()))
            }
            IdentityVerifier::TrustedHeaders => {
                let header_str = |name: &str| {
                    headers
                        .get(name)
                        .and_then(|v| v.to_str().ok())
                        .map(str::trim)
                        .filter(|v| !v.is_empty())
                        .map(String::from)
                };
                Ok(header_str(USER_ID_HEADER).map(|user_id| Identity {
                    user_id,
                    name: header_str(USER_NAME_HEADER),
                    image_url: header_str(USER_IMAGE_HEADER),
                }))
            }
        }
    }
}

/// The caller of a request, possibly anonymous.
///
/// Rejects only when an identity is presented but invalid; handlers that
/// need a user call [`Viewer::require`].
#[derive(Debug, Clone)]
pub struct Viewer(pub Option<Identity>);

impl Viewer {
    pub fn require(&self) -> Result<&Identity, AppError> {
        self.0
            .as_ref()
            .ok_or_else(|| AppError::Unauthenticated("Not authenticated".to_string()))
    }

    pub fn user_id(&self) -> Option<&str> {
        self.0.as_ref().map(|i| i.user_id.as_str())
    }
}

impl FromRequestParts<AppState> for Viewer {
    type Rejection = AppErrorWithRevision;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let identity = state.verifier.identify(&parts.headers)?;
        Ok(Viewer(identity))
    }
}
