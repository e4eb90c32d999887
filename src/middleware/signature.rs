//! Network webhook signature verification.
//!
//! The card network signs each webhook body with the shared secret. Requests
//! without `X-Signature` are refused before the body is read; otherwise the
//! body is buffered, checked and handed on unchanged.

use axum::{
    body::{Body, to_bytes},
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

use crate::{AppState, error::AppError, services::signing::verify_signature, store::Store};

pub const SIGNATURE_HEADER: &str = "X-Signature";

/// Largest webhook body accepted.
const MAX_BODY_BYTES: usize = 64 * 1024;

pub async fn require_network_signature<S: Store>(
    State(state): State<AppState<S>>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let (parts, body) = request.into_parts();

    let signature = parts
        .headers
        .get(SIGNATURE_HEADER)
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or(AppError::MissingSignature)?;

    let bytes = to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|_| AppError::InvalidRequest("Request body too large".to_string()))?;

    if bytes.is_empty() {
        return Err(AppError::InvalidRequest("Request body is empty".to_string()));
    }

    if !verify_signature(&state.webhook_secret, &bytes, signature) {
        tracing::warn!("Webhook rejected: signature mismatch");
        return Err(AppError::InvalidSignature);
    }

    Ok(next.run(Request::from_parts(parts, Body::from(bytes))).await)
}
