//! Error types and HTTP error response handling.
//!
//! This module defines all application errors and how they are converted
//! into HTTP responses with appropriate status codes and JSON bodies.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::store::StoreError;

/// Application-wide error type.
///
/// Each variant maps to a specific HTTP status code and error code.
///
/// # Error Categories
///
/// - **Internal**: storage and crypto failures (500, detail logged only)
/// - **Conflict**: a write rejected by a uniqueness constraint (409)
/// - **Authentication**: bearer token and network signature failures (401, 429)
/// - **Validation**: malformed or incomplete requests (400)
/// - **Business rules**: card and transaction state violations (403, 404, 409, 422)
/// - **Deadline**: request processing ran out of time (504)
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// A repository or ledger session failed.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Card secret encryption or decryption failed.
    #[error("Crypto error: {0}")]
    Crypto(String),

    /// Bearer token is missing, unknown, or inactive.
    #[error("Invalid or missing bearer token")]
    InvalidToken,

    /// Network webhook arrived without an `X-Signature` header.
    #[error("Missing webhook signature")]
    MissingSignature,

    /// Network webhook signature does not match the body.
    #[error("Invalid webhook signature")]
    InvalidSignature,

    /// Client exceeded the failed authentication budget.
    #[error("Too many failed attempts, try again later")]
    TooManyAttempts,

    /// Request body or parameters are invalid.
    ///
    /// The String contains details about what was invalid.
    #[error("Invalid request")]
    InvalidRequest(String),

    /// Processing did not finish within the request deadline.
    #[error("Request timed out")]
    Timeout,

    #[error("User not found")]
    UserNotFound,

    #[error("Card not found")]
    CardNotFound,

    /// Card is frozen, terminated, or expired.
    #[error("Card is not active")]
    CardNotActive,

    #[error("Card has expired")]
    CardExpired,

    /// Status change requested for a card already in that status.
    #[error("Card is already {0}")]
    AlreadyInState(String),

    #[error("Invalid card type: {0}")]
    InvalidCardType(String),

    /// Card issuance requires a verified KYC submission.
    #[error("KYC verification is incomplete")]
    IncompleteKyc,

    /// KYC step requested out of order.
    #[error("KYC cannot move to {0} from its current status")]
    InvalidKycTransition(String),

    /// Authorization amount exceeds the card's available balance.
    #[error("Insufficient funds")]
    InsufficientFunds,

    /// Authorization amount exceeds the card's spending limit.
    #[error("Spending limit exceeded")]
    LimitExceeded,

    #[error("Transaction currency does not match the card currency")]
    CurrencyMismatch,

    #[error("Transaction not found")]
    TransactionNotFound,

    /// Referenced transaction is in the wrong state for the operation.
    #[error("Transaction not eligible: {0}")]
    TransactionNotEligible(String),

    #[error("Unsupported event type: {0}")]
    UnsupportedEventType(String),
}

impl AppError {
    /// HTTP status and stable machine-readable code for this error.
    pub fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::Store(StoreError::Conflict(_)) => (StatusCode::CONFLICT, "conflict"),
            AppError::Store(_) | AppError::Crypto(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
            }
            AppError::InvalidToken => (StatusCode::UNAUTHORIZED, "invalid_token"),
            AppError::MissingSignature => (StatusCode::UNAUTHORIZED, "missing_signature"),
            AppError::InvalidSignature => (StatusCode::UNAUTHORIZED, "invalid_signature"),
            AppError::TooManyAttempts => (StatusCode::TOO_MANY_REQUESTS, "too_many_attempts"),
            AppError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "invalid_request"),
            AppError::Timeout => (StatusCode::GATEWAY_TIMEOUT, "timeout"),
            AppError::UserNotFound => (StatusCode::NOT_FOUND, "user_not_found"),
            AppError::CardNotFound => (StatusCode::NOT_FOUND, "card_not_found"),
            AppError::CardNotActive => (StatusCode::UNPROCESSABLE_ENTITY, "card_not_active"),
            AppError::CardExpired => (StatusCode::UNPROCESSABLE_ENTITY, "card_expired"),
            AppError::AlreadyInState(_) => (StatusCode::CONFLICT, "already_in_state"),
            AppError::InvalidCardType(_) => (StatusCode::BAD_REQUEST, "invalid_card_type"),
            AppError::IncompleteKyc => (StatusCode::FORBIDDEN, "incomplete_kyc"),
            AppError::InvalidKycTransition(_) => {
                (StatusCode::CONFLICT, "invalid_kyc_transition")
            }
            AppError::InsufficientFunds => {
                (StatusCode::UNPROCESSABLE_ENTITY, "insufficient_funds")
            }
            AppError::LimitExceeded => (StatusCode::UNPROCESSABLE_ENTITY, "limit_exceeded"),
            AppError::CurrencyMismatch => {
                (StatusCode::UNPROCESSABLE_ENTITY, "currency_mismatch")
            }
            AppError::TransactionNotFound => (StatusCode::NOT_FOUND, "transaction_not_found"),
            AppError::TransactionNotEligible(_) => {
                (StatusCode::CONFLICT, "transaction_not_eligible")
            }
            AppError::UnsupportedEventType(_) => {
                (StatusCode::BAD_REQUEST, "unsupported_event_type")
            }
        }
    }
}

/// Convert AppError into an HTTP response.
///
/// # Response Format
///
/// All errors return JSON in this format:
/// ```json
/// {
///   "error": {
///     "code": "error_type",
///     "message": "Human-readable error message"
///   }
/// }
/// ```
///
/// Internal errors hide their detail from the client and log it instead.
/// They answer 500 so the card network redelivers the event.
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        let message = match &self {
            AppError::Store(StoreError::Conflict(detail)) => {
                tracing::warn!(detail = %detail, "Write rejected by a uniqueness constraint");
                "The request conflicts with an existing record".to_string()
            }
            AppError::Store(_) | AppError::Crypto(_) => {
                tracing::error!(error = %self, "Internal error while handling request");
                "An internal error occurred".to_string()
            }
            AppError::InvalidRequest(msg) => msg.clone(),
            _ => self.to_string(),
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message
            }
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(AppError::InvalidToken, StatusCode::UNAUTHORIZED)]
    #[case(AppError::InvalidSignature, StatusCode::UNAUTHORIZED)]
    #[case(AppError::TooManyAttempts, StatusCode::TOO_MANY_REQUESTS)]
    #[case(AppError::InvalidRequest("x".into()), StatusCode::BAD_REQUEST)]
    #[case(AppError::CardNotFound, StatusCode::NOT_FOUND)]
    #[case(AppError::InsufficientFunds, StatusCode::UNPROCESSABLE_ENTITY)]
    #[case(AppError::AlreadyInState("frozen".into()), StatusCode::CONFLICT)]
    #[case(AppError::IncompleteKyc, StatusCode::FORBIDDEN)]
    #[case(AppError::Timeout, StatusCode::GATEWAY_TIMEOUT)]
    #[case(AppError::Crypto("bad tag".into()), StatusCode::INTERNAL_SERVER_ERROR)]
    fn errors_map_to_status_codes(#[case] error: AppError, #[case] status: StatusCode) {
        assert_eq!(error.into_response().status(), status);
    }

    #[test]
    fn store_failures_are_internal() {
        let err = AppError::from(StoreError::Corrupt("bad status".into()));
        assert_eq!(err.status_and_code().1, "internal_error");
    }

    #[tokio::test]
    async fn unique_violations_are_conflicts() {
        let err = AppError::from(StoreError::Conflict(
            "duplicate key value violates unique constraint \"transactions_idempotency_key_key\""
                .into(),
        ));
        assert_eq!(err.status_and_code(), (StatusCode::CONFLICT, "conflict"));

        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let bytes = http_body_util::BodyExt::collect(response.into_body())
            .await
            .unwrap()
            .to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"]["code"], "conflict");
        assert!(!body["error"]["message"].as_str().unwrap().contains("constraint"));
    }
}
