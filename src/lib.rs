//! CardFlow: virtual card issuing and ledger service.
//!
//! Issues virtual payment cards to KYC-verified users, processes card
//! network webhooks (authorization, capture, reversal, refund) against
//! per-card balances, and keeps an append-only balance ledger.
//!
//! # Architecture
//!
//! - **Web Framework**: Axum, generic over the storage adapter
//! - **Storage**: traits in [`store`], PostgreSQL via sqlx in production
//! - **Authentication**: bearer tokens (SHA-256 hashed) for owners, HMAC
//!   signatures for the card network
//! - **Background work**: notification delivery and cron-driven expiry jobs

pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod store;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    http::{Method, header},
    middleware as axum_middleware,
    routing::{get, post},
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::middleware::rate_limit::RateLimiter;
use crate::services::{card_service::CardService, transaction_engine::TransactionEngine};
use crate::store::Store;

/// Shared state handed to every handler and middleware.
pub struct AppState<S: Store> {
    pub store: S,
    pub engine: TransactionEngine<S>,
    pub cards: CardService<S>,
    pub limiter: Arc<RateLimiter>,
    pub webhook_secret: Arc<str>,
    /// Deadline for processing one webhook event.
    pub request_timeout: Duration,
    /// Proxies whose `X-Forwarded-For` hops are trusted; 0 keys on the socket.
    pub trusted_proxy_depth: usize,
}

impl<S: Store> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            engine: self.engine.clone(),
            cards: self.cards.clone(),
            limiter: Arc::clone(&self.limiter),
            webhook_secret: Arc::clone(&self.webhook_secret),
            request_timeout: self.request_timeout,
            trusted_proxy_depth: self.trusted_proxy_depth,
        }
    }
}

/// Build the HTTP router.
///
/// - `/health` is public
/// - `/api/v1/webhooks/network` requires a valid network signature
/// - `/api/v1/cards/...` requires a bearer token
pub fn router<S: Store>(state: AppState<S>) -> Router {
    use crate::handlers::{cards, health, transactions, webhooks};

    let card_routes = Router::new()
        .route(
            "/api/v1/cards",
            post(cards::create_card::<S>).get(cards::list_cards::<S>),
        )
        .route("/api/v1/cards/{id}", get(cards::get_card::<S>))
        .route("/api/v1/cards/{id}/top-up", post(cards::top_up_card::<S>))
        .route(
            "/api/v1/cards/{id}/transactions",
            get(transactions::list_card_transactions::<S>),
        )
        .route(
            "/api/v1/cards/{id}/ledger",
            get(transactions::list_card_ledger::<S>),
        )
        .route(
            "/api/v1/cards/{id}/{action}",
            post(cards::change_card_status::<S>),
        )
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            crate::middleware::auth::require_bearer::<S>,
        ));

    let network_routes = Router::new()
        .route(
            "/api/v1/webhooks/network",
            post(webhooks::receive_network_event::<S>),
        )
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            crate::middleware::signature::require_network_signature::<S>,
        ));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    Router::new()
        .route("/health", get(health::health_check::<S>))
        .merge(card_routes)
        .merge(network_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
