//! Transaction data models and API response types.
//!
//! This module defines:
//! - `Transaction`: domain record of one card transaction
//! - `TransactionType`, `Direction`, `TransactionStatus`
//! - `NewTransaction`: fields needed to insert a transaction
//! - `TransactionResponse`: response body returned to card owners

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::UnknownVariant;

/// What a transaction row currently represents.
///
/// Captures and reversals rewrite the type of the authorization row they
/// settle, so a row starts as `Authorization` and may become `Capture` or
/// `Reversal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    Authorization,
    Capture,
    Funding,
    Refund,
    Reversal,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Authorization => "authorization",
            TransactionType::Capture => "capture",
            TransactionType::Funding => "funding",
            TransactionType::Refund => "refund",
            TransactionType::Reversal => "reversal",
        }
    }
}

impl FromStr for TransactionType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "authorization" => Ok(TransactionType::Authorization),
            "capture" => Ok(TransactionType::Capture),
            "funding" => Ok(TransactionType::Funding),
            "refund" => Ok(TransactionType::Refund),
            "reversal" => Ok(TransactionType::Reversal),
            other => Err(UnknownVariant::new("transaction type", other)),
        }
    }
}

/// Money flow relative to the card.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Debit,
    Credit,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Debit => "debit",
            Direction::Credit => "credit",
        }
    }
}

impl FromStr for Direction {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "debit" => Ok(Direction::Debit),
            "credit" => Ok(Direction::Credit),
            other => Err(UnknownVariant::new("direction", other)),
        }
    }
}

/// Transaction status. Moves `authorized -> completed` or
/// `authorized -> reversed`, never backward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Authorized,
    Completed,
    Reversed,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Authorized => "authorized",
            TransactionStatus::Completed => "completed",
            TransactionStatus::Reversed => "reversed",
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "authorized" => Ok(TransactionStatus::Authorized),
            "completed" => Ok(TransactionStatus::Completed),
            "reversed" => Ok(TransactionStatus::Reversed),
            other => Err(UnknownVariant::new("transaction status", other)),
        }
    }
}

/// Merchant details carried on network events.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Merchant {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub mcc: String,
    #[serde(default)]
    pub country: String,
}

/// Represents a transaction record.
///
/// # Database Table
///
/// Maps to the `transactions` table. Each transaction:
/// - Has a unique `transaction_reference` (network event id, or a generated
///   `TOPUP` reference for funding)
/// - Has an optional, unique idempotency key
/// - Stores amounts in cents
/// - Is updated in place by capture and reversal, never deleted
#[derive(Debug, Clone)]
pub struct Transaction {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub card_id: Uuid,
    pub transaction_reference: String,

    /// Reference of the captured transaction a refund credits back
    pub original_transaction_reference: Option<String>,

    pub idempotency_key: Option<String>,
    pub amount_cents: i64,
    pub currency: String,
    pub authorized_amount_cents: i64,
    pub captured_amount_cents: i64,
    pub transaction_type: TransactionType,
    pub direction: Direction,
    pub status: TransactionStatus,
    pub merchant: Merchant,
    pub network: String,
    pub decline_reason: Option<String>,
    pub event_timestamp: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields required to insert a transaction.
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub owner_id: Uuid,
    pub card_id: Uuid,
    pub transaction_reference: String,
    pub original_transaction_reference: Option<String>,
    pub idempotency_key: Option<String>,
    pub amount_cents: i64,
    pub currency: String,
    pub authorized_amount_cents: i64,
    pub captured_amount_cents: i64,
    pub transaction_type: TransactionType,
    pub direction: Direction,
    pub status: TransactionStatus,
    pub merchant: Merchant,
    pub network: String,
    pub event_timestamp: DateTime<Utc>,
}

/// Response returned for transaction listings and webhook acknowledgements.
///
/// # JSON Example
///
/// ```json
/// {
///   "id": "770e8400-e29b-41d4-a716-446655440002",
///   "transaction_reference": "txn_8f2a",
///   "transaction_type": "capture",
///   "direction": "debit",
///   "status": "completed",
///   "amount_cents": 20000,
///   "authorized_amount_cents": 20000,
///   "captured_amount_cents": 20000,
///   "currency": "USD",
///   "merchant": {"name": "Coffee Shop", "mcc": "5814", "country": "US"},
///   "created_at": "2025-12-21T16:00:00Z"
/// }
/// ```
#[derive(Debug, Serialize, Deserialize)]
pub struct TransactionResponse {
    pub id: Uuid,
    pub card_id: Uuid,
    pub transaction_reference: String,
    pub original_transaction_reference: Option<String>,
    pub transaction_type: TransactionType,
    pub direction: Direction,
    pub status: TransactionStatus,
    pub amount_cents: i64,
    pub authorized_amount_cents: i64,
    pub captured_amount_cents: i64,
    pub currency: String,
    pub merchant: Merchant,
    pub network: String,
    pub event_timestamp: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Drops internal fields (owner, idempotency key) clients don't need.
impl From<Transaction> for TransactionResponse {
    fn from(transaction: Transaction) -> Self {
        Self {
            id: transaction.id,
            card_id: transaction.card_id,
            transaction_reference: transaction.transaction_reference,
            original_transaction_reference: transaction.original_transaction_reference,
            transaction_type: transaction.transaction_type,
            direction: transaction.direction,
            status: transaction.status,
            amount_cents: transaction.amount_cents,
            authorized_amount_cents: transaction.authorized_amount_cents,
            captured_amount_cents: transaction.captured_amount_cents,
            currency: transaction.currency,
            merchant: transaction.merchant,
            network: transaction.network,
            event_timestamp: transaction.event_timestamp,
            created_at: transaction.created_at,
        }
    }
}
