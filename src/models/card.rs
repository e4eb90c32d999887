//! Card data models and API request/response types.
//!
//! This module defines:
//! - `Card`: domain record of an issued virtual card
//! - `CardStatus` / `CardAction`: the status state machine
//! - Request and response bodies for the card endpoints

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::UnknownVariant;

/// Kind of virtual card. Determines how long the card stays valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CardType {
    SingleUse,
    MultiUse,
}

impl CardType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CardType::SingleUse => "single-use",
            CardType::MultiUse => "multi-use",
        }
    }

    /// Years between issuance and expiry.
    pub fn validity_years(&self) -> u32 {
        match self {
            CardType::SingleUse => 1,
            CardType::MultiUse => 3,
        }
    }
}

impl FromStr for CardType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "single-use" => Ok(CardType::SingleUse),
            "multi-use" => Ok(CardType::MultiUse),
            other => Err(UnknownVariant::new("card type", other)),
        }
    }
}

/// Card lifecycle status.
///
/// `Expired` and `Terminated` are terminal. `Active` and `Frozen` toggle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CardStatus {
    Active,
    Frozen,
    Terminated,
    Expired,
}

impl CardStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CardStatus::Active => "active",
            CardStatus::Frozen => "frozen",
            CardStatus::Terminated => "terminated",
            CardStatus::Expired => "expired",
        }
    }

    /// Resolve the status a card moves to when `action` is applied.
    ///
    /// # Errors
    ///
    /// - `CardExpired` for any action on an expired card
    /// - `AlreadyInState` when the card already has the target status
    /// - `CardNotActive` when freezing or unfreezing a terminated card
    pub fn apply(self, action: CardAction) -> Result<CardStatus, AppError> {
        if self == CardStatus::Expired {
            return Err(AppError::CardExpired);
        }

        let target = action.target_status();
        if self == target {
            return Err(AppError::AlreadyInState(target.as_str().to_string()));
        }

        if self == CardStatus::Terminated {
            return Err(AppError::CardNotActive);
        }

        Ok(target)
    }
}

impl fmt::Display for CardStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CardStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(CardStatus::Active),
            "frozen" => Ok(CardStatus::Frozen),
            "terminated" => Ok(CardStatus::Terminated),
            "expired" => Ok(CardStatus::Expired),
            other => Err(UnknownVariant::new("card status", other)),
        }
    }
}

/// Owner-initiated status change, taken from the URL path
/// (`POST /api/v1/cards/{id}/{action}`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CardAction {
    Freeze,
    Unfreeze,
    Terminate,
}

impl CardAction {
    pub fn target_status(&self) -> CardStatus {
        match self {
            CardAction::Freeze => CardStatus::Frozen,
            CardAction::Unfreeze => CardStatus::Active,
            CardAction::Terminate => CardStatus::Terminated,
        }
    }
}

/// An issued virtual card.
///
/// # Balance Storage
///
/// All balances are `i64` cents. `held_balance_cents` is the sum of open
/// authorizations; the available balance is `current - held`. The current
/// balance may drop below zero by at most the settlement fee of a capture.
///
/// # Card Secrets
///
/// The PAN and CVV are stored twice: AES-GCM ciphertexts (decrypted only for
/// the owner) and keyed fingerprints (uniqueness checks without decryption).
#[derive(Debug, Clone)]
pub struct Card {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub reference: String,
    pub pan_encrypted: String,
    pub cvv_encrypted: String,
    pub masked_pan: String,
    pub last_four: String,
    pub pan_fingerprint: String,
    pub cvv_fingerprint: String,
    pub card_type: CardType,
    pub currency: String,
    pub spending_limit_cents: i64,
    pub current_balance_cents: i64,
    pub held_balance_cents: i64,
    pub status: CardStatus,
    pub expiry_month: String,
    pub expiry_year: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Card {
    pub fn available_balance_cents(&self) -> i64 {
        self.current_balance_cents - self.held_balance_cents
    }

    /// Reject any balance-affecting operation on a frozen, expired or
    /// terminated card.
    pub fn ensure_active(&self) -> Result<(), AppError> {
        match self.status {
            CardStatus::Active => Ok(()),
            _ => Err(AppError::CardNotActive),
        }
    }
}

/// Fields required to insert a freshly issued card.
///
/// Balances start at zero and status starts as `active`.
#[derive(Debug, Clone)]
pub struct NewCard {
    pub owner_id: Uuid,
    pub reference: String,
    pub pan_encrypted: String,
    pub cvv_encrypted: String,
    pub masked_pan: String,
    pub last_four: String,
    pub pan_fingerprint: String,
    pub cvv_fingerprint: String,
    pub card_type: CardType,
    pub currency: String,
    pub spending_limit_cents: i64,
    pub expiry_month: String,
    pub expiry_year: String,
    pub expires_at: DateTime<Utc>,
}

/// Request body for issuing a card.
///
/// # JSON Example
///
/// ```json
/// {
///   "card_type": "multi-use",
///   "currency": "USD",
///   "spending_limit_cents": 50000
/// }
/// ```
#[derive(Debug, Deserialize)]
pub struct CreateCardRequest {
    /// `single-use` or `multi-use`; validated by the card service
    pub card_type: String,

    /// Currency code (defaults to "USD" if not provided)
    #[serde(default = "default_currency")]
    pub currency: String,

    /// Per-transaction spending limit in cents
    pub spending_limit_cents: i64,
}

fn default_currency() -> String {
    "USD".to_string()
}

/// Response for card issuance. The only response that carries the
/// plaintext PAN and CVV without an explicit fetch.
#[derive(Debug, Serialize, Deserialize)]
pub struct IssuedCardResponse {
    pub id: Uuid,
    pub reference: String,
    pub card_type: CardType,
    pub pan: String,
    pub cvv: String,
    pub masked_pan: String,
    pub currency: String,
    pub spending_limit_cents: i64,
    pub balance_cents: i64,
    pub status: CardStatus,
    pub expiry_month: String,
    pub expiry_year: String,
}

/// Card as shown in listings: masked, no secrets.
#[derive(Debug, Serialize, Deserialize)]
pub struct CardSummary {
    pub id: Uuid,
    pub reference: String,
    pub card_type: CardType,
    pub masked_pan: String,
    pub last_four: String,
    pub currency: String,
    pub current_balance_cents: i64,
    pub available_balance_cents: i64,
    pub status: CardStatus,
    pub expiry_month: String,
    pub expiry_year: String,
}

impl From<Card> for CardSummary {
    fn from(card: Card) -> Self {
        Self {
            available_balance_cents: card.available_balance_cents(),
            id: card.id,
            reference: card.reference,
            card_type: card.card_type,
            masked_pan: card.masked_pan,
            last_four: card.last_four,
            currency: card.currency,
            current_balance_cents: card.current_balance_cents,
            status: card.status,
            expiry_month: card.expiry_month,
            expiry_year: card.expiry_year,
        }
    }
}

/// Full card details for the owner, with PAN and CVV decrypted on read.
#[derive(Debug, Serialize, Deserialize)]
pub struct CardDetailsResponse {
    pub id: Uuid,
    pub reference: String,
    pub card_type: CardType,
    pub pan: String,
    pub cvv: String,
    pub last_four: String,
    pub currency: String,
    pub spending_limit_cents: i64,
    pub current_balance_cents: i64,
    pub held_balance_cents: i64,
    pub available_balance_cents: i64,
    pub status: CardStatus,
    pub expiry_month: String,
    pub expiry_year: String,
}

/// Request to fund a card.
///
/// # JSON Example
///
/// ```json
/// {
///   "amount_cents": 10000,
///   "idempotency_key": "topup-2025-001"
/// }
/// ```
#[derive(Debug, Deserialize)]
pub struct TopUpRequest {
    /// Gross amount in cents; the 1% fee is taken from it
    pub amount_cents: i64,

    /// Optional idempotency key to prevent duplicate funding
    pub idempotency_key: Option<String>,
}

/// Result of a top-up.
#[derive(Debug, Serialize, Deserialize)]
pub struct TopUpResponse {
    pub transaction_id: Uuid,
    pub transaction_reference: String,
    pub amount_cents: i64,
    pub fee_cents: i64,
    pub credited_cents: i64,
    pub balance_cents: i64,
}

/// Response for a status change.
#[derive(Debug, Serialize, Deserialize)]
pub struct CardStatusResponse {
    pub id: Uuid,
    pub status: CardStatus,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(CardStatus::Active, CardAction::Freeze, CardStatus::Frozen)]
    #[case(CardStatus::Frozen, CardAction::Unfreeze, CardStatus::Active)]
    #[case(CardStatus::Active, CardAction::Terminate, CardStatus::Terminated)]
    #[case(CardStatus::Frozen, CardAction::Terminate, CardStatus::Terminated)]
    fn allowed_transitions(
        #[case] from: CardStatus,
        #[case] action: CardAction,
        #[case] to: CardStatus,
    ) {
        assert_eq!(from.apply(action).unwrap(), to);
    }

    #[rstest]
    #[case(CardStatus::Frozen, CardAction::Freeze)]
    #[case(CardStatus::Active, CardAction::Unfreeze)]
    #[case(CardStatus::Terminated, CardAction::Terminate)]
    fn repeating_the_current_state_is_rejected(
        #[case] from: CardStatus,
        #[case] action: CardAction,
    ) {
        assert!(matches!(from.apply(action), Err(AppError::AlreadyInState(_))));
    }

    #[rstest]
    #[case(CardAction::Freeze)]
    #[case(CardAction::Unfreeze)]
    #[case(CardAction::Terminate)]
    fn expired_cards_reject_every_action(#[case] action: CardAction) {
        assert!(matches!(
            CardStatus::Expired.apply(action),
            Err(AppError::CardExpired)
        ));
    }

    #[test]
    fn terminated_cards_cannot_be_revived() {
        assert!(matches!(
            CardStatus::Terminated.apply(CardAction::Unfreeze),
            Err(AppError::CardNotActive)
        ));
        assert!(matches!(
            CardStatus::Terminated.apply(CardAction::Freeze),
            Err(AppError::CardNotActive)
        ));
    }

    #[test]
    fn card_type_round_trips_through_its_label() {
        assert_eq!("single-use".parse::<CardType>().unwrap(), CardType::SingleUse);
        assert_eq!(CardType::MultiUse.as_str(), "multi-use");
        assert!("prepaid".parse::<CardType>().is_err());
    }
}
