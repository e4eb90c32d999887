//! Card history handlers.

use axum::{
    Extension, Json,
    extract::{Path, State},
};
use uuid::Uuid;

use crate::{
    AppState,
    error::AppError,
    middleware::auth::AuthContext,
    models::{ledger::LedgerEntry, transaction::TransactionResponse},
    store::Store,
};

/// Transactions of one card, newest first.
///
/// # Endpoint
///
/// `GET /api/v1/cards/{id}/transactions`
pub async fn list_card_transactions<S: Store>(
    State(state): State<AppState<S>>,
    Extension(auth): Extension<AuthContext>,
    Path(card_id): Path<Uuid>,
) -> Result<Json<Vec<TransactionResponse>>, AppError> {
    let transactions = state.cards.list_transactions(auth.user_id, card_id).await?;

    Ok(Json(
        transactions
            .into_iter()
            .map(TransactionResponse::from)
            .collect(),
    ))
}

/// Balance ledger of one card, newest first.
///
/// # Endpoint
///
/// `GET /api/v1/cards/{id}/ledger`
pub async fn list_card_ledger<S: Store>(
    State(state): State<AppState<S>>,
    Extension(auth): Extension<AuthContext>,
    Path(card_id): Path<Uuid>,
) -> Result<Json<Vec<LedgerEntry>>, AppError> {
    Ok(Json(state.cards.list_ledger(auth.user_id, card_id).await?))
}
