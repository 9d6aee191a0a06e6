//! Authentication and per-request identity.
//!
//! The API is guarded by a pre-shared key compared in constant time. Behind it, every request
//! names its tenant and may carry the caller's remote store tokens.

use axum::{
    extract::{FromRequestParts, Request},
    http::{header, request::Parts, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Response},
};
use subtle::ConstantTimeEq;

use crate::errors::AppError;
use crate::remote::Credential;

/// Header name for the API key.
pub const API_KEY_HEADER: &str = "x-api-key";
/// Header naming the calling tenant.
pub const TENANT_HEADER: &str = "x-tenant-id";
/// Header carrying the caller's remote store token.
pub const REMOTE_TOKEN_HEADER: &str = "x-remote-token";
/// Header carrying the service identity token, when one is installed.
pub const SERVICE_TOKEN_HEADER: &str = "x-remote-service-token";

const MAX_TENANT_ID_LEN: usize = 128;

/// PSK authentication layer function that takes the expected PSK as a parameter.
pub async fn psk_auth_layer(
    expected_psk: Option<String>,
    request: Request,
    next: Next,
) -> Response {
    // If no PSK is configured, allow all requests (dev mode)
    let Some(expected) = expected_psk else {
        return next.run(request).await;
    };

    let provided = header_value(request.headers(), API_KEY_HEADER).or_else(|| {
        request
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.strip_prefix("Bearer "))
    })
    .map(str::to_string);

    match provided.as_deref() {
        Some(key) if constant_time_compare(key, &expected) => next.run(request).await,
        Some(_) => AppError::Unauthorized("Invalid API key".to_string()).into_response(),
        None => AppError::Unauthorized("Missing API key".to_string()).into_response(),
    }
}

/// Perform constant-time string comparison.
fn constant_time_compare(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Tenant and remote credential of the current request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub tenant_id: String,
    pub credential: Option<Credential>,
}

impl RequestContext {
    /// The credential, for operations that must reach the remote store.
    pub fn require_credential(&self) -> Result<&Credential, AppError> {
        self.credential.as_ref().ok_or_else(|| {
            AppError::Unauthorized(format!(
                "The {} header is required for this operation",
                REMOTE_TOKEN_HEADER
            ))
        })
    }

    fn from_headers(headers: &HeaderMap) -> Result<Self, AppError> {
        let tenant_id = header_value(headers, TENANT_HEADER).ok_or_else(|| {
            AppError::Unauthorized(format!("The {} header is required", TENANT_HEADER))
        })?;
        if tenant_id.len() > MAX_TENANT_ID_LEN || tenant_id.chars().any(char::is_control) {
            return Err(AppError::BadRequest(format!(
                "Invalid {} header",
                TENANT_HEADER
            )));
        }

        let credential = header_value(headers, REMOTE_TOKEN_HEADER).map(|token| {
            let credential = Credential::new(token);
            match header_value(headers, SERVICE_TOKEN_HEADER) {
                Some(service) => credential.with_service_token(service),
                None => credential,
            }
        });

        Ok(Self {
            tenant_id: tenant_id.to_string(),
            credential,
        })
    }
}

impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Self::from_headers(&parts.headers)
    }
}
