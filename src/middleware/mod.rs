//! HTTP middleware components.
//!
//! Middleware run before route handlers and short-circuit requests that
//! fail authentication.

/// Bearer token authentication
pub mod auth;
/// Failed-attempt limiter used by `auth`
pub mod rate_limit;
/// Card network HMAC signature check
pub mod signature;
