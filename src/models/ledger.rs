//! Balance ledger entries.
//!
//! The ledger is append-only: every balance-affecting event writes exactly
//! one entry in the same database transaction as the balance change.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::UnknownVariant;

/// Event that produced a ledger entry. Serialized as its label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerEntryKind {
    #[serde(rename = "Authorization Hold")]
    AuthorizationHold,
    #[serde(rename = "Capture Settlement")]
    CaptureSettlement,
    #[serde(rename = "Authorization Reversal")]
    AuthorizationReversal,
    #[serde(rename = "Refund")]
    Refund,
    #[serde(rename = "card top-up")]
    TopUp,
}

impl LedgerEntryKind {
    pub fn label(&self) -> &'static str {
        match self {
            LedgerEntryKind::AuthorizationHold => "Authorization Hold",
            LedgerEntryKind::CaptureSettlement => "Capture Settlement",
            LedgerEntryKind::AuthorizationReversal => "Authorization Reversal",
            LedgerEntryKind::Refund => "Refund",
            LedgerEntryKind::TopUp => "card top-up",
        }
    }
}

impl FromStr for LedgerEntryKind {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Authorization Hold" => Ok(LedgerEntryKind::AuthorizationHold),
            "Capture Settlement" => Ok(LedgerEntryKind::CaptureSettlement),
            "Authorization Reversal" => Ok(LedgerEntryKind::AuthorizationReversal),
            "Refund" => Ok(LedgerEntryKind::Refund),
            "card top-up" => Ok(LedgerEntryKind::TopUp),
            other => Err(UnknownVariant::new("ledger entry type", other)),
        }
    }
}

/// One immutable ledger row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub card_id: Uuid,
    pub transaction_id: Uuid,
    pub entry_type: LedgerEntryKind,
    pub amount_cents: i64,
    pub fee_cents: i64,

    /// Card's current balance right after this entry was applied
    pub balance_after_cents: i64,

    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewLedgerEntry {
    pub card_id: Uuid,
    pub transaction_id: Uuid,
    pub entry_type: LedgerEntryKind,
    pub amount_cents: i64,
    pub fee_cents: i64,
    pub balance_after_cents: i64,
}
