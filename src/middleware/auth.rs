//! Bearer token authentication middleware.
//!
//! This middleware intercepts every card management request to:
//! 1. Refuse clients that exceeded the failed-attempt limit (HTTP 429)
//! 2. Extract the token from the Authorization header
//! 3. Hash it and resolve the owning user
//! 4. Inject authentication context into the request
//! 5. Count failures against the client address and reject with HTTP 401

use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use axum::{
    extract::{ConnectInfo, Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::{AppState, error::AppError, store::Store, store::UserDirectory};

/// Authentication context attached to authenticated requests.
///
/// Handlers extract it with `Extension<AuthContext>`; every card query is
/// scoped to `user_id`.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user_id: Uuid,
    pub email: String,
}

/// SHA-256 hex digest of a bearer token, as stored in `api_tokens`.
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// Client address used as the rate-limit key.
///
/// With `trusted_proxy_depth == 0` only the socket address counts. Behind `n`
/// proxies the `n`th `X-Forwarded-For` hop from the right is used.
pub fn client_ip(request: &Request, trusted_proxy_depth: usize) -> String {
    forwarded_for(request.headers(), trusted_proxy_depth)
        .or_else(|| {
            request
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip())
        })
        .map(|ip| ip.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn forwarded_for(headers: &HeaderMap, trusted_proxy_depth: usize) -> Option<IpAddr> {
    if trusted_proxy_depth == 0 {
        return None;
    }

    let raw = headers.get("X-Forwarded-For")?.to_str().ok()?;
    let chain: Vec<IpAddr> = raw
        .split(',')
        .filter_map(|hop| IpAddr::from_str(hop.trim()).ok())
        .collect();

    let index = chain.len().checked_sub(trusted_proxy_depth)?;
    chain.get(index).copied()
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Bearer authentication middleware function.
///
/// # Headers
///
/// ```text
/// Authorization: Bearer abc123xyz
/// ```
///
/// # Returns
///
/// - `Err(AppError::TooManyAttempts)` while the client IP is blocked
/// - `Err(AppError::InvalidToken)` if the header is missing or the token is
///   unknown or revoked
pub async fn require_bearer<S: Store>(
    State(state): State<AppState<S>>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let ip = client_ip(&request, state.trusted_proxy_depth);

    if state.limiter.is_blocked(&ip) {
        tracing::warn!(client = %ip, "Rejected request from blocked client");
        return Err(AppError::TooManyAttempts);
    }

    let user = match bearer_token(request.headers()).map(hash_token) {
        Some(token_hash) => state.store.find_user_by_token_hash(&token_hash).await?,
        None => None,
    };

    let Some(user) = user else {
        if state.limiter.record_failure(&ip) {
            tracing::warn!(client = %ip, "Client blocked after repeated authentication failures");
        }
        return Err(AppError::InvalidToken);
    };

    request.extensions_mut().insert(AuthContext {
        user_id: user.id,
        email: user.email,
    });

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    #[test]
    fn token_hash_is_sha256_hex() {
        assert_eq!(
            hash_token("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    fn request_from(socket: [u8; 4], forwarded: Option<&str>) -> Request {
        let mut builder = Request::builder();
        if let Some(forwarded) = forwarded {
            builder = builder.header("X-Forwarded-For", forwarded);
        }
        let mut request = builder.body(Body::empty()).unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from((socket, 4000))));
        request
    }

    #[test]
    fn forwarded_header_is_ignored_without_trusted_proxies() {
        let request = request_from([192, 168, 1, 9], Some("203.0.113.7"));

        assert_eq!(client_ip(&request, 0), "192.168.1.9");
    }

    #[test]
    fn trusted_proxy_hop_is_read_from_the_right() {
        let request = request_from([10, 0, 0, 2], Some("1.2.3.4, 203.0.113.7, 10.0.0.1"));

        assert_eq!(client_ip(&request, 1), "10.0.0.1");
        assert_eq!(client_ip(&request, 2), "203.0.113.7");
    }

    #[test]
    fn short_or_garbled_chain_falls_back_to_socket() {
        let request = request_from([10, 0, 0, 2], Some("203.0.113.7"));
        assert_eq!(client_ip(&request, 2), "10.0.0.2");

        let request = request_from([10, 0, 0, 2], Some("not-an-ip"));
        assert_eq!(client_ip(&request, 1), "10.0.0.2");
    }

    #[test]
    fn missing_socket_is_unknown() {
        let request = Request::builder().body(Body::empty()).unwrap();

        assert_eq!(client_ip(&request, 0), "unknown");
    }

    #[test]
    fn bearer_prefix_is_required() {
        let mut headers = HeaderMap::new();
        headers.insert("Authorization", "Token abc".parse().unwrap());
        assert_eq!(bearer_token(&headers), None);

        headers.insert("Authorization", "Bearer abc".parse().unwrap());
        assert_eq!(bearer_token(&headers), Some("abc"));
    }
}
