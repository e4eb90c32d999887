//! Card lifecycle service.
//!
//! This service handles:
//! - Card issuance for KYC-verified users
//! - Owner-scoped reads (details with decrypted secrets, summaries, history)
//! - Freeze, unfreeze and terminate
//! - Top-ups with the 1% funding fee

use chrono::{Months, Utc};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::card::{
    Card, CardAction, CardDetailsResponse, CardSummary, CardType, CreateCardRequest,
    IssuedCardResponse, NewCard, TopUpRequest, TopUpResponse,
};
use crate::models::ledger::{LedgerEntry, LedgerEntryKind, NewLedgerEntry};
use crate::models::money::{fee_for, out_of_range};
use crate::models::transaction::{
    Direction, Merchant, NewTransaction, Transaction, TransactionStatus, TransactionType,
};
use crate::models::user::KycStatus;
use crate::services::card_crypto::{
    CardVault, generate_cvv, generate_pan, mask_pan, random_reference,
};
use crate::services::notification::{NotificationDispatcher, NotificationKind};
use crate::store::{
    CardRepository, KycDirectory, LedgerSession, LedgerStore, Store, StoreError,
    TransactionRepository,
};

const CARD_REFERENCE_PREFIX: &str = "CRDFLW";
const TOP_UP_REFERENCE_PREFIX: &str = "TOPUP";

/// Fresh PANs drawn before giving up on a fingerprint collision.
const ISSUE_ATTEMPTS: usize = 5;

/// Largest single top-up unless configured otherwise (1,000,000.00).
pub const DEFAULT_MAX_TOP_UP_CENTS: i64 = 100_000_000;

pub struct CardService<S: Store> {
    store: S,
    vault: CardVault,
    notifications: NotificationDispatcher,
    iin: String,
    max_top_up_cents: i64,
}

impl<S: Store> Clone for CardService<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            vault: self.vault.clone(),
            notifications: self.notifications.clone(),
            iin: self.iin.clone(),
            max_top_up_cents: self.max_top_up_cents,
        }
    }
}

impl<S: Store> CardService<S> {
    pub fn new(
        store: S,
        vault: CardVault,
        notifications: NotificationDispatcher,
        iin: impl Into<String>,
    ) -> Self {
        Self {
            store,
            vault,
            notifications,
            iin: iin.into(),
            max_top_up_cents: DEFAULT_MAX_TOP_UP_CENTS,
        }
    }

    pub fn with_max_top_up(mut self, max_top_up_cents: i64) -> Self {
        self.max_top_up_cents = max_top_up_cents;
        self
    }

    /// Issue a virtual card.
    ///
    /// # Process
    ///
    /// 1. Require a verified KYC submission
    /// 2. Validate type, currency and spending limit
    /// 3. Generate reference, PAN (IIN + random digits + Luhn) and CVV
    /// 4. Encrypt and fingerprint the secrets, retrying on PAN collision
    /// 5. Return the plaintext PAN and CVV (only time they are shown unasked)
    ///
    /// # Errors
    ///
    /// - `IncompleteKyc`: KYC is not `verified`
    /// - `InvalidCardType`: type is neither `single-use` nor `multi-use`
    /// - `InvalidRequest`: bad currency or non-positive limit
    pub async fn create_card(
        &self,
        owner_id: Uuid,
        request: CreateCardRequest,
    ) -> Result<IssuedCardResponse, AppError> {
        if self.store.kyc_status(owner_id).await? != Some(KycStatus::Verified) {
            return Err(AppError::IncompleteKyc);
        }

        let card_type = request
            .card_type
            .parse::<CardType>()
            .map_err(|_| AppError::InvalidCardType(request.card_type.clone()))?;

        if request.spending_limit_cents <= 0 {
            return Err(AppError::InvalidRequest(
                "Spending limit must be positive".to_string(),
            ));
        }

        let currency = request.currency.trim().to_uppercase();
        if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(AppError::InvalidRequest(
                "Currency must be a 3-letter code".to_string(),
            ));
        }

        let now = Utc::now();
        let expires_at = now
            .checked_add_months(Months::new(12 * card_type.validity_years()))
            .ok_or_else(|| AppError::InvalidRequest("Expiry date out of range".to_string()))?;

        for attempt in 1..=ISSUE_ATTEMPTS {
            let pan = generate_pan(&self.iin);
            let pan_fingerprint = self.vault.fingerprint("pan", &pan);
            if self.store.pan_fingerprint_exists(&pan_fingerprint).await? {
                tracing::warn!(attempt, "Generated PAN collided, drawing another");
                continue;
            }

            let cvv = generate_cvv();
            let new_card = NewCard {
                owner_id,
                reference: random_reference(CARD_REFERENCE_PREFIX, 10),
                pan_encrypted: self.vault.encrypt(&pan)?,
                cvv_encrypted: self.vault.encrypt(&cvv)?,
                masked_pan: mask_pan(&pan),
                last_four: pan[pan.len() - 4..].to_string(),
                pan_fingerprint,
                cvv_fingerprint: self.vault.fingerprint("cvv", &cvv),
                card_type,
                currency: currency.clone(),
                spending_limit_cents: request.spending_limit_cents,
                expiry_month: expires_at.format("%m").to_string(),
                expiry_year: expires_at.format("%Y").to_string(),
                expires_at,
            };

            let card = match self.store.insert_card(new_card).await {
                Ok(card) => card,
                Err(StoreError::Conflict(reason)) => {
                    tracing::warn!(attempt, %reason, "Card insert conflicted, retrying");
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            tracing::info!(
                card = %card.reference,
                owner_id = %owner_id,
                card_type = card.card_type.as_str(),
                "Card issued"
            );

            return Ok(IssuedCardResponse {
                id: card.id,
                reference: card.reference,
                card_type: card.card_type,
                pan,
                cvv,
                masked_pan: card.masked_pan,
                currency: card.currency,
                spending_limit_cents: card.spending_limit_cents,
                balance_cents: card.current_balance_cents,
                status: card.status,
                expiry_month: card.expiry_month,
                expiry_year: card.expiry_year,
            });
        }

        Err(StoreError::Conflict("could not allocate a unique card number".to_string()).into())
    }

    /// Owner-scoped card lookup.
    async fn owned_card(&self, owner_id: Uuid, card_id: Uuid) -> Result<Card, AppError> {
        self.store
            .find_card(owner_id, card_id)
            .await?
            .ok_or(AppError::CardNotFound)
    }

    /// Card details with PAN and CVV decrypted.
    pub async fn get_card(
        &self,
        owner_id: Uuid,
        card_id: Uuid,
    ) -> Result<CardDetailsResponse, AppError> {
        let card = self.owned_card(owner_id, card_id).await?;

        Ok(CardDetailsResponse {
            pan: self.vault.decrypt(&card.pan_encrypted)?,
            cvv: self.vault.decrypt(&card.cvv_encrypted)?,
            available_balance_cents: card.available_balance_cents(),
            id: card.id,
            reference: card.reference,
            card_type: card.card_type,
            last_four: card.last_four,
            currency: card.currency,
            spending_limit_cents: card.spending_limit_cents,
            current_balance_cents: card.current_balance_cents,
            held_balance_cents: card.held_balance_cents,
            status: card.status,
            expiry_month: card.expiry_month,
            expiry_year: card.expiry_year,
        })
    }

    pub async fn list_cards(&self, owner_id: Uuid) -> Result<Vec<CardSummary>, AppError> {
        let cards = self.store.list_cards(owner_id).await?;
        Ok(cards.into_iter().map(CardSummary::from).collect())
    }

    /// Freeze, unfreeze or terminate a card under its row lock.
    ///
    /// # Errors
    ///
    /// - `CardNotFound`: no such card for this owner
    /// - `AlreadyInState`, `CardExpired`, `CardNotActive`: see
    ///   [`CardStatus::apply`](crate::models::card::CardStatus::apply)
    pub async fn modify_card_status(
        &self,
        owner_id: Uuid,
        card_id: Uuid,
        action: CardAction,
    ) -> Result<Card, AppError> {
        let mut session = self.store.begin().await?;

        let mut card = session
            .lock_card(card_id)
            .await?
            .filter(|card| card.owner_id == owner_id)
            .ok_or(AppError::CardNotFound)?;

        let previous = card.status;
        card.status = card.status.apply(action)?;
        let card = session.update_card(&card).await?;

        session.commit().await?;

        tracing::info!(
            card = %card.reference,
            from = %previous,
            to = %card.status,
            "Card status changed"
        );

        Ok(card)
    }

    /// Fund a card. The 1% fee is taken from the gross amount.
    ///
    /// # Process
    ///
    /// 1. Replay: an idempotency key that already funded returns that result
    /// 2. Lock the card; it must belong to the caller and be active
    /// 3. Record a completed funding transaction and credit `amount - fee`
    /// 4. Append a "card top-up" ledger entry and commit
    ///
    /// # Errors
    ///
    /// - `InvalidRequest`: amount is zero, negative, above the configured
    ///   ceiling, or would overflow the balance
    /// - `CardNotFound`, `CardNotActive`
    pub async fn top_up(
        &self,
        owner_id: Uuid,
        card_id: Uuid,
        request: TopUpRequest,
    ) -> Result<TopUpResponse, AppError> {
        if request.amount_cents <= 0 {
            return Err(AppError::InvalidRequest(
                "Amount must be positive".to_string(),
            ));
        }
        if request.amount_cents > self.max_top_up_cents {
            return Err(AppError::InvalidRequest(format!(
                "Amount must not exceed {} cents",
                self.max_top_up_cents
            )));
        }

        let idempotency_key = request
            .idempotency_key
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty());

        let mut session = self.store.begin().await?;

        let mut card = session
            .lock_card(card_id)
            .await?
            .filter(|card| card.owner_id == owner_id)
            .ok_or(AppError::CardNotFound)?;

        if let Some(key) = idempotency_key.as_deref() {
            if let Some(existing) = session.find_transaction_by_idempotency_key(key).await? {
                if existing.card_id != card.id || existing.transaction_type != TransactionType::Funding
                {
                    return Err(AppError::InvalidRequest(
                        "Idempotency key already used for another operation".to_string(),
                    ));
                }
                return Ok(Self::replayed_top_up(existing, &card));
            }
        }

        card.ensure_active()?;

        let fee = fee_for(request.amount_cents).ok_or_else(out_of_range)?;
        let credited = request.amount_cents - fee;
        let balance = card
            .current_balance_cents
            .checked_add(credited)
            .ok_or_else(out_of_range)?;

        let transaction = session
            .insert_transaction(NewTransaction {
                owner_id,
                card_id: card.id,
                transaction_reference: random_reference(TOP_UP_REFERENCE_PREFIX, 12),
                original_transaction_reference: None,
                idempotency_key,
                amount_cents: request.amount_cents,
                currency: card.currency.clone(),
                authorized_amount_cents: 0,
                captured_amount_cents: 0,
                transaction_type: TransactionType::Funding,
                direction: Direction::Credit,
                status: TransactionStatus::Completed,
                merchant: Merchant::default(),
                network: String::new(),
                event_timestamp: Utc::now(),
            })
            .await?;

        card.current_balance_cents = balance;
        let card = session.update_card(&card).await?;

        session
            .append_ledger_entry(NewLedgerEntry {
                card_id: card.id,
                transaction_id: transaction.id,
                entry_type: LedgerEntryKind::TopUp,
                amount_cents: request.amount_cents,
                fee_cents: fee,
                balance_after_cents: card.current_balance_cents,
            })
            .await?;

        session.commit().await?;

        tracing::info!(
            card = %card.reference,
            amount_cents = request.amount_cents,
            fee_cents = fee,
            balance_cents = card.current_balance_cents,
            "Card topped up"
        );

        self.notifications.notify_owner(
            &self.store,
            NotificationKind::Funded,
            &card,
            Some((request.amount_cents, fee)),
        );

        Ok(TopUpResponse {
            transaction_id: transaction.id,
            transaction_reference: transaction.transaction_reference,
            amount_cents: request.amount_cents,
            fee_cents: fee,
            credited_cents: credited,
            balance_cents: card.current_balance_cents,
        })
    }

    fn replayed_top_up(existing: Transaction, card: &Card) -> TopUpResponse {
        let fee = fee_for(existing.amount_cents).unwrap_or_default();
        TopUpResponse {
            transaction_id: existing.id,
            transaction_reference: existing.transaction_reference,
            amount_cents: existing.amount_cents,
            fee_cents: fee,
            credited_cents: existing.amount_cents - fee,
            balance_cents: card.current_balance_cents,
        }
    }

    /// Card transactions, newest first.
    pub async fn list_transactions(
        &self,
        owner_id: Uuid,
        card_id: Uuid,
    ) -> Result<Vec<Transaction>, AppError> {
        let card = self.owned_card(owner_id, card_id).await?;
        Ok(self.store.list_card_transactions(card.id).await?)
    }

    /// Card ledger entries, newest first.
    pub async fn list_ledger(
        &self,
        owner_id: Uuid,
        card_id: Uuid,
    ) -> Result<Vec<LedgerEntry>, AppError> {
        let card = self.owned_card(owner_id, card_id).await?;
        Ok(self.store.list_ledger_entries(card.id).await?)
    }
}
