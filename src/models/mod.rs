//! Data models representing database entities and API payloads.
//!
//! Domain records (cards, transactions, ledger entries, users) are plain
//! structs with enum-typed state. The storage adapters map their own row
//! types onto these.

/// Virtual card model and card API payloads
pub mod card;
/// Append-only balance ledger
pub mod ledger;
/// Cent arithmetic and fee rules
pub mod money;
/// Card transactions
pub mod transaction;
/// Users and KYC state
pub mod user;
/// Inbound card-network events
pub mod webhook;

/// Returned when a stored or submitted string does not name a known variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} value: {value}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl UnknownVariant {
    pub(crate) fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}
