//! HTTP request handlers (route handlers).
//!
//! Handlers extract the request, call a service and map the result to a
//! response. Business rules live in [`crate::services`].

/// Card management endpoints
pub mod cards;
/// Liveness and storage check
pub mod health;
/// Card history endpoints
pub mod transactions;
/// Card network webhook
pub mod webhooks;
