//! Card management HTTP handlers.
//!
//! This module implements the card endpoints:
//! - POST /api/v1/cards - Issue a card
//! - GET /api/v1/cards - List the caller's cards
//! - GET /api/v1/cards/{id} - Card details with PAN and CVV
//! - POST /api/v1/cards/{id}/top-up - Fund a card
//! - POST /api/v1/cards/{id}/{freeze|unfreeze|terminate} - Change status
//!
//! Every handler is scoped to the authenticated user.

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
};
use uuid::Uuid;

use crate::{
    AppState,
    error::AppError,
    middleware::auth::AuthContext,
    models::card::{
        CardAction, CardDetailsResponse, CardStatusResponse, CardSummary, CreateCardRequest,
        IssuedCardResponse, TopUpRequest, TopUpResponse,
    },
    store::Store,
};

/// Issue a virtual card.
///
/// # Endpoint
///
/// `POST /api/v1/cards`
///
/// # Request Body
///
/// ```json
/// {
///   "card_type": "multi-use",
///   "currency": "USD",
///   "spending_limit_cents": 50000
/// }
/// ```
///
/// # Response
///
/// - **Success (201 Created)**: the card, including the plaintext PAN and CVV
/// - **Error (400)**: unknown card type, bad limit or currency
/// - **Error (403)**: KYC not verified
pub async fn create_card<S: Store>(
    State(state): State<AppState<S>>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<CreateCardRequest>,
) -> Result<(StatusCode, Json<IssuedCardResponse>), AppError> {
    let card = state.cards.create_card(auth.user_id, request).await?;
    Ok((StatusCode::CREATED, Json(card)))
}

/// List the caller's cards, newest first.
pub async fn list_cards<S: Store>(
    State(state): State<AppState<S>>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<Vec<CardSummary>>, AppError> {
    Ok(Json(state.cards.list_cards(auth.user_id).await?))
}

/// Card details.
///
/// Returns 404 for cards that do not exist or belong to someone else.
pub async fn get_card<S: Store>(
    State(state): State<AppState<S>>,
    Extension(auth): Extension<AuthContext>,
    Path(card_id): Path<Uuid>,
) -> Result<Json<CardDetailsResponse>, AppError> {
    Ok(Json(state.cards.get_card(auth.user_id, card_id).await?))
}

/// Fund a card.
///
/// # Endpoint
///
/// `POST /api/v1/cards/{id}/top-up`
///
/// # Request Body
///
/// ```json
/// {
///   "amount_cents": 10000,
///   "idempotency_key": "topup-2025-001"
/// }
/// ```
///
/// # Response
///
/// ```json
/// {
///   "transaction_id": "550e8400-e29b-41d4-a716-446655440000",
///   "transaction_reference": "TOPUPa1b2c3d4e5f6",
///   "amount_cents": 10000,
///   "fee_cents": 100,
///   "credited_cents": 9900,
///   "balance_cents": 9900
/// }
/// ```
pub async fn top_up_card<S: Store>(
    State(state): State<AppState<S>>,
    Extension(auth): Extension<AuthContext>,
    Path(card_id): Path<Uuid>,
    Json(request): Json<TopUpRequest>,
) -> Result<Json<TopUpResponse>, AppError> {
    Ok(Json(state.cards.top_up(auth.user_id, card_id, request).await?))
}

/// Freeze, unfreeze or terminate a card.
///
/// # Response
///
/// - **Success (200)**: `{"id": "...", "status": "frozen"}`
/// - **Error (409)**: the card is already in the target state
/// - **Error (422)**: the card is terminated or expired
pub async fn change_card_status<S: Store>(
    State(state): State<AppState<S>>,
    Extension(auth): Extension<AuthContext>,
    Path((card_id, action)): Path<(Uuid, CardAction)>,
) -> Result<Json<CardStatusResponse>, AppError> {
    let card = state
        .cards
        .modify_card_status(auth.user_id, card_id, action)
        .await?;

    Ok(Json(CardStatusResponse {
        id: card.id,
        status: card.status,
    }))
}
