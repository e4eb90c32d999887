//! Inbound card-network events.
//!
//! This module defines:
//! - `NetworkEventPayload`: the raw JSON body posted by the network
//! - `NetworkEvent`: a validated event with amounts in cents
//! - `EventOutcome` / `WebhookAck`: what processing produced and what the
//!   network receives back

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::models::card::Card;
use crate::models::ledger::LedgerEntry;
use crate::models::money::cents_from_decimal;
use crate::models::transaction::{Direction, Merchant, Transaction};

/// Raw webhook body as sent by the card network.
///
/// Every field is optional at the serde level so that a structurally
/// incomplete body yields a precise validation message instead of a
/// generic parse error.
///
/// # JSON Example
///
/// ```json
/// {
///   "transaction_id": "txn_8f2a",
///   "original_transaction_id": "",
///   "card_reference": "CRDFLWa8Kd02LmQz",
///   "amount": 200.00,
///   "currency": "USD",
///   "type": "authorization",
///   "direction": "debit",
///   "status": "pending",
///   "merchant": {"name": "Coffee Shop", "mcc": "5814", "country": "US"},
///   "network": "visa",
///   "timestamp": "2025-12-21T16:00:00Z",
///   "idempotency_key": "evt_91c3"
/// }
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NetworkEventPayload {
    #[serde(default)]
    pub original_transaction_id: Option<String>,
    #[serde(default)]
    pub transaction_id: Option<String>,
    #[serde(default)]
    pub card_reference: Option<String>,
    #[serde(default)]
    pub amount: Option<Decimal>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default, rename = "type")]
    pub event_type: Option<String>,
    #[serde(default)]
    pub direction: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub merchant: Option<Merchant>,
    #[serde(default)]
    pub network: Option<String>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

/// Event type named in the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    Authorization,
    Capture,
    Reversal,
    Refund,
    /// Anything else; rejected by the engine as unsupported
    Other(String),
}

impl EventKind {
    fn parse(raw: &str) -> Self {
        match raw {
            "authorization" => EventKind::Authorization,
            "capture" => EventKind::Capture,
            "reversal" => EventKind::Reversal,
            "refund" => EventKind::Refund,
            other => EventKind::Other(other.to_string()),
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::Authorization => f.write_str("authorization"),
            EventKind::Capture => f.write_str("capture"),
            EventKind::Reversal => f.write_str("reversal"),
            EventKind::Refund => f.write_str("refund"),
            EventKind::Other(other) => f.write_str(other),
        }
    }
}

/// A structurally complete network event.
#[derive(Debug, Clone)]
pub struct NetworkEvent {
    pub transaction_id: String,
    pub original_transaction_id: Option<String>,
    pub card_reference: Option<String>,
    pub amount_cents: i64,
    pub currency: String,
    pub kind: EventKind,
    pub direction: Direction,
    pub status: String,
    pub merchant: Merchant,
    pub network: String,
    pub timestamp: DateTime<Utc>,
    pub idempotency_key: String,
}

fn present(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn required(value: Option<String>, field: &str) -> Result<String, AppError> {
    present(value).ok_or_else(|| AppError::InvalidRequest(format!("{} is required", field)))
}

impl NetworkEventPayload {
    /// Check that every mandatory field is present and well-formed.
    ///
    /// # Rules
    ///
    /// - `transaction_id`, `amount`, `currency`, `type`, `direction`,
    ///   `status`, `timestamp` and `idempotency_key` are always required
    /// - refunds additionally require `original_transaction_id` and may
    ///   omit `card_reference`, `merchant` and `network`
    /// - every other type requires `card_reference`, `merchant` and
    ///   `network`
    /// - `amount` must be positive with at most two decimal places and fit
    ///   into `i64` cents
    /// - `timestamp` must be after the Unix epoch
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidRequest` naming the first offending field.
    pub fn validate(self) -> Result<NetworkEvent, AppError> {
        let kind = EventKind::parse(&required(self.event_type, "type")?);
        let transaction_id = required(self.transaction_id, "transaction_id")?;

        let amount = self
            .amount
            .ok_or_else(|| AppError::InvalidRequest("amount is required".to_string()))?;
        if amount <= Decimal::ZERO {
            return Err(AppError::InvalidRequest(
                "amount must be greater than zero".to_string(),
            ));
        }
        let amount_cents = cents_from_decimal(amount).ok_or_else(|| {
            AppError::InvalidRequest(
                "amount must have at most two decimal places and fit the ledger".to_string(),
            )
        })?;

        let currency = required(self.currency, "currency")?.to_uppercase();

        let direction = required(self.direction, "direction")?
            .parse::<Direction>()
            .map_err(|e| AppError::InvalidRequest(e.to_string()))?;

        let status = required(self.status, "status")?;
        let idempotency_key = required(self.idempotency_key, "idempotency_key")?;

        let timestamp = self
            .timestamp
            .ok_or_else(|| AppError::InvalidRequest("timestamp is required".to_string()))?;
        if timestamp <= DateTime::<Utc>::UNIX_EPOCH {
            return Err(AppError::InvalidRequest(
                "timestamp must be after the Unix epoch".to_string(),
            ));
        }

        let original_transaction_id = present(self.original_transaction_id);
        let card_reference = present(self.card_reference);

        let (merchant, network) = if kind == EventKind::Refund {
            if original_transaction_id.is_none() {
                return Err(AppError::InvalidRequest(
                    "original_transaction_id is required for refunds".to_string(),
                ));
            }
            (
                self.merchant.unwrap_or_default(),
                present(self.network).unwrap_or_default(),
            )
        } else {
            if card_reference.is_none() {
                return Err(AppError::InvalidRequest(
                    "card_reference is required".to_string(),
                ));
            }
            let merchant = self
                .merchant
                .filter(|m| !m.name.trim().is_empty())
                .ok_or_else(|| AppError::InvalidRequest("merchant is required".to_string()))?;
            (merchant, required(self.network, "network")?)
        };

        Ok(NetworkEvent {
            transaction_id,
            original_transaction_id,
            card_reference,
            amount_cents,
            currency,
            kind,
            direction,
            status,
            merchant,
            network,
            timestamp,
            idempotency_key,
        })
    }
}

/// Effect an applied event had on the transaction it touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppliedStatus {
    Authorized,
    Captured,
    Reversed,
    Refunded,
}

impl AppliedStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppliedStatus::Authorized => "authorized",
            AppliedStatus::Captured => "captured",
            AppliedStatus::Reversed => "reversed",
            AppliedStatus::Refunded => "refunded",
        }
    }
}

/// State written by one applied event.
#[derive(Debug, Clone)]
pub struct AppliedEvent {
    pub status: AppliedStatus,
    pub transaction: Transaction,
    pub card: Card,
    pub ledger_entry: LedgerEntry,
}

/// Result of processing one network event.
#[derive(Debug, Clone)]
pub enum EventOutcome {
    /// The idempotency key was already processed; nothing changed.
    Duplicate,
    Applied(Box<AppliedEvent>),
}

/// Body returned to the network for a successful or duplicate delivery.
///
/// # JSON Example
///
/// ```json
/// {
///   "status": "captured",
///   "transaction_reference": "txn_8f2a",
///   "current_balance_cents": -202,
///   "available_balance_cents": -202
/// }
/// ```
#[derive(Debug, Serialize, Deserialize)]
pub struct WebhookAck {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_reference: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_balance_cents: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub available_balance_cents: Option<i64>,
}

impl From<&EventOutcome> for WebhookAck {
    fn from(outcome: &EventOutcome) -> Self {
        match outcome {
            EventOutcome::Duplicate => Self {
                status: "duplicate_ignored".to_string(),
                transaction_reference: None,
                current_balance_cents: None,
                available_balance_cents: None,
            },
            EventOutcome::Applied(applied) => Self {
                status: applied.status.as_str().to_string(),
                transaction_reference: Some(applied.transaction.transaction_reference.clone()),
                current_balance_cents: Some(applied.card.current_balance_cents),
                available_balance_cents: Some(applied.card.available_balance_cents()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(body: serde_json::Value) -> NetworkEventPayload {
        serde_json::from_value(body).unwrap()
    }

    fn authorization() -> serde_json::Value {
        json!({
            "transaction_id": "txn_1",
            "card_reference": "CRDFLWabc1234567",
            "amount": 200.0,
            "currency": "usd",
            "type": "authorization",
            "direction": "debit",
            "status": "pending",
            "merchant": {"name": "Coffee Shop", "mcc": "5814", "country": "US"},
            "network": "visa",
            "timestamp": "2025-12-21T16:00:00Z",
            "idempotency_key": "evt_1"
        })
    }

    #[test]
    fn complete_authorization_validates() {
        let event = payload(authorization()).validate().unwrap();

        assert_eq!(event.kind, EventKind::Authorization);
        assert_eq!(event.amount_cents, 20_000);
        assert_eq!(event.currency, "USD");
        assert_eq!(event.direction, Direction::Debit);
        assert_eq!(event.card_reference.as_deref(), Some("CRDFLWabc1234567"));
    }

    #[test]
    fn missing_card_reference_is_rejected_for_non_refunds() {
        let mut body = authorization();
        body.as_object_mut().unwrap().remove("card_reference");

        let err = payload(body).validate().unwrap_err();
        assert!(matches!(err, AppError::InvalidRequest(msg) if msg.contains("card_reference")));
    }

    #[test]
    fn refund_needs_original_transaction_but_not_card_reference() {
        let mut body = authorization();
        let obj = body.as_object_mut().unwrap();
        obj.insert("type".into(), json!("refund"));
        obj.insert("direction".into(), json!("credit"));
        obj.remove("card_reference");

        assert!(payload(body.clone()).validate().is_err());

        body.as_object_mut()
            .unwrap()
            .insert("original_transaction_id".into(), json!("txn_0"));
        let event = payload(body).validate().unwrap();
        assert_eq!(event.kind, EventKind::Refund);
        assert_eq!(event.original_transaction_id.as_deref(), Some("txn_0"));
        assert!(event.card_reference.is_none());
    }

    #[test]
    fn non_positive_and_sub_cent_amounts_are_rejected() {
        let mut body = authorization();
        body["amount"] = json!(0);
        assert!(payload(body.clone()).validate().is_err());

        body["amount"] = json!(-5);
        assert!(payload(body.clone()).validate().is_err());

        body["amount"] = json!(1.005);
        assert!(payload(body).validate().is_err());
    }

    #[test]
    fn amounts_too_large_for_the_ledger_are_rejected() {
        let mut body = authorization();
        body["amount"] = json!("1000000000000000000000000000");
        let err = payload(body.clone()).validate().unwrap_err();
        assert!(matches!(err, AppError::InvalidRequest(msg) if msg.contains("amount")));

        body["amount"] = json!(1e27);
        assert!(matches!(
            payload(body).validate(),
            Err(AppError::InvalidRequest(_))
        ));
    }

    #[test]
    fn epoch_timestamp_is_rejected() {
        let mut body = authorization();
        body["timestamp"] = json!("1970-01-01T00:00:00Z");

        let err = payload(body).validate().unwrap_err();
        assert!(matches!(err, AppError::InvalidRequest(msg) if msg.contains("timestamp")));
    }

    #[test]
    fn unknown_types_pass_validation_as_other() {
        let mut body = authorization();
        body["type"] = json!("chargeback");

        let event = payload(body).validate().unwrap();
        assert_eq!(event.kind, EventKind::Other("chargeback".to_string()));
    }

    #[test]
    fn duplicate_outcome_acknowledges_without_details() {
        let ack = WebhookAck::from(&EventOutcome::Duplicate);
        assert_eq!(ack.status, "duplicate_ignored");
        assert!(ack.transaction_reference.is_none());
    }
}
