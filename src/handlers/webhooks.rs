//! Card network webhook handler.
//!
//! The signature has already been verified by
//! [`require_network_signature`](crate::middleware::signature::require_network_signature)
//! when this handler runs.

use axum::{Json, body::Bytes, extract::State};

use crate::{
    AppState,
    error::AppError,
    models::webhook::{NetworkEventPayload, WebhookAck},
    store::Store,
};

/// Apply one network event.
///
/// # Endpoint
///
/// `POST /api/v1/webhooks/network`
///
/// # Request Body
///
/// ```json
/// {
///   "transaction_id": "txn_8f2a",
///   "card_reference": "CRDFLWa1b2c3d4e5",
///   "amount": 200.00,
///   "currency": "USD",
///   "type": "authorization",
///   "direction": "debit",
///   "status": "pending",
///   "merchant": {"name": "Coffee Shop", "mcc": "5814", "country": "US"},
///   "network": "visa",
///   "timestamp": "2025-12-21T16:00:00Z",
///   "idempotency_key": "evt_0001"
/// }
/// ```
///
/// # Response
///
/// - **Success (200)**: `{"status": "authorized", ...}` or
///   `{"status": "duplicate_ignored"}` for a redelivery
/// - **Error (400)**: malformed or incomplete event
/// - **Error (404/409/422)**: the event was refused; nothing changed
/// - **Error (504)**: processing exceeded the deadline and was rolled back
pub async fn receive_network_event<S: Store>(
    State(state): State<AppState<S>>,
    body: Bytes,
) -> Result<Json<WebhookAck>, AppError> {
    let payload: NetworkEventPayload = serde_json::from_slice(&body)
        .map_err(|e| AppError::InvalidRequest(format!("Malformed event: {e}")))?;

    let event = payload.validate()?;
    let key = event.idempotency_key.clone();
    let kind = event.kind.to_string();

    // Dropping the future on timeout drops the open session, which rolls
    // the work back.
    let outcome = tokio::time::timeout(state.request_timeout, state.engine.process(event))
        .await
        .map_err(|_| {
            tracing::warn!(idempotency_key = %key, event = %kind, "Webhook processing timed out");
            AppError::Timeout
        })?
        .inspect_err(|e| {
            tracing::info!(idempotency_key = %key, event = %kind, error = %e, "Webhook event refused");
        })?;

    Ok(Json(WebhookAck::from(&outcome)))
}
