//! Transaction engine - applies card-network events to card balances.
//!
//! This service handles:
//! - Idempotent processing of authorization, capture, reversal and refund events
//! - Balance and spending-limit validation
//! - Hold placement and release
//! - Ledger entries for every balance-affecting event
//!
//! # Atomicity Guarantees
//!
//! Each event runs inside one ledger session: the idempotency claim, the
//! card row lock, the card update, the transaction write and the ledger
//! entry commit together or not at all. Any error drops the session, which
//! rolls everything back, so a rejected event can be redelivered.

use crate::error::AppError;
use crate::models::card::Card;
use crate::models::ledger::{LedgerEntryKind, NewLedgerEntry};
use crate::models::money::{fee_for, out_of_range};
use crate::models::transaction::{
    Direction, NewTransaction, Transaction, TransactionStatus, TransactionType,
};
use crate::models::webhook::{AppliedEvent, AppliedStatus, EventKind, EventOutcome, NetworkEvent};
use crate::services::notification::{NotificationDispatcher, NotificationKind};
use crate::store::{LedgerSession, LedgerStore, Store};

pub struct TransactionEngine<S: Store> {
    store: S,
    notifications: NotificationDispatcher,
}

impl<S: Store> Clone for TransactionEngine<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            notifications: self.notifications.clone(),
        }
    }
}

type Session<S> = <S as LedgerStore>::Session;

impl<S: Store> TransactionEngine<S> {
    pub fn new(store: S, notifications: NotificationDispatcher) -> Self {
        Self {
            store,
            notifications,
        }
    }

    /// Apply one validated network event.
    ///
    /// # Process
    ///
    /// 1. Claim the idempotency key (duplicate -> no-op success)
    /// 2. Lock the card (refunds: the card of the original transaction)
    /// 3. Reject frozen, expired and terminated cards
    /// 4. Dispatch by event type
    /// 5. Commit, then notify the card owner in the background
    ///
    /// # Errors
    ///
    /// - `CardNotFound`, `CardNotActive`
    /// - `InsufficientFunds`, `LimitExceeded`, `CurrencyMismatch` (authorization)
    /// - `TransactionNotFound`, `TransactionNotEligible` (capture, reversal, refund)
    /// - `UnsupportedEventType` for any other type
    /// - `Store` when storage fails
    pub async fn process(&self, event: NetworkEvent) -> Result<EventOutcome, AppError> {
        let mut session = self.store.begin().await?;

        let claimed = session
            .claim_event(&event.idempotency_key, &event.kind.to_string())
            .await?;
        let recorded = session
            .find_transaction_by_idempotency_key(&event.idempotency_key)
            .await?
            .is_some();
        if !claimed || recorded {
            tracing::info!(
                idempotency_key = %event.idempotency_key,
                event_type = %event.kind,
                "Duplicate network event ignored"
            );
            return Ok(EventOutcome::Duplicate);
        }

        let (card, original) = Self::resolve_card(&mut session, &event).await?;
        card.ensure_active()?;

        let applied = match &event.kind {
            EventKind::Authorization => Self::authorize(&mut session, card, &event).await?,
            EventKind::Capture => Self::capture(&mut session, card, &event).await?,
            EventKind::Reversal => Self::reverse(&mut session, card, &event).await?,
            EventKind::Refund => match original {
                Some(original) => Self::refund(&mut session, card, original, &event).await?,
                None => return Err(AppError::TransactionNotFound),
            },
            EventKind::Other(event_type) => {
                return Err(AppError::UnsupportedEventType(event_type.clone()));
            }
        };

        session.commit().await?;

        tracing::info!(
            card = %applied.card.reference,
            transaction = %applied.transaction.transaction_reference,
            status = applied.status.as_str(),
            current_balance_cents = applied.card.current_balance_cents,
            held_balance_cents = applied.card.held_balance_cents,
            "Network event applied"
        );

        self.notify(&applied);

        Ok(EventOutcome::Applied(Box::new(applied)))
    }

    /// Lock the card an event applies to.
    ///
    /// Refunds resolve the card from their original transaction; a
    /// `card_reference` on the event must then agree with it.
    async fn resolve_card(
        session: &mut Session<S>,
        event: &NetworkEvent,
    ) -> Result<(Card, Option<Transaction>), AppError> {
        if event.kind == EventKind::Refund {
            let original_reference = event
                .original_transaction_id
                .as_deref()
                .ok_or_else(|| {
                    AppError::InvalidRequest(
                        "original_transaction_id is required for refunds".to_string(),
                    )
                })?;

            let original = session
                .find_transaction_by_reference(original_reference)
                .await?
                .ok_or(AppError::TransactionNotFound)?;

            let card = session
                .lock_card(original.card_id)
                .await?
                .ok_or(AppError::CardNotFound)?;

            if let Some(reference) = event.card_reference.as_deref() {
                if reference != card.reference {
                    return Err(AppError::TransactionNotEligible(
                        "card_reference does not match the original transaction".to_string(),
                    ));
                }
            }

            return Ok((card, Some(original)));
        }

        let reference = event
            .card_reference
            .as_deref()
            .ok_or_else(|| AppError::InvalidRequest("card_reference is required".to_string()))?;

        let card = session
            .lock_card_by_reference(reference)
            .await?
            .ok_or(AppError::CardNotFound)?;

        Ok((card, None))
    }

    /// Place a hold for the event amount.
    async fn authorize(
        session: &mut Session<S>,
        mut card: Card,
        event: &NetworkEvent,
    ) -> Result<AppliedEvent, AppError> {
        if session
            .find_transaction_by_reference(&event.transaction_id)
            .await?
            .is_some()
        {
            return Err(AppError::TransactionNotEligible(format!(
                "transaction {} already exists",
                event.transaction_id
            )));
        }

        if event.currency != card.currency {
            return Err(AppError::CurrencyMismatch);
        }

        if card.available_balance_cents() < event.amount_cents {
            return Err(AppError::InsufficientFunds);
        }

        if card.spending_limit_cents < event.amount_cents {
            return Err(AppError::LimitExceeded);
        }

        let transaction = session
            .insert_transaction(NewTransaction {
                owner_id: card.owner_id,
                card_id: card.id,
                transaction_reference: event.transaction_id.clone(),
                original_transaction_reference: None,
                idempotency_key: Some(event.idempotency_key.clone()),
                amount_cents: event.amount_cents,
                currency: event.currency.clone(),
                authorized_amount_cents: event.amount_cents,
                captured_amount_cents: 0,
                transaction_type: TransactionType::Authorization,
                direction: Direction::Debit,
                status: TransactionStatus::Authorized,
                merchant: event.merchant.clone(),
                network: event.network.clone(),
                event_timestamp: event.timestamp,
            })
            .await?;

        card.held_balance_cents += event.amount_cents;
        let card = session.update_card(&card).await?;

        let ledger_entry = session
            .append_ledger_entry(NewLedgerEntry {
                card_id: card.id,
                transaction_id: transaction.id,
                entry_type: LedgerEntryKind::AuthorizationHold,
                amount_cents: event.amount_cents,
                fee_cents: 0,
                balance_after_cents: card.current_balance_cents,
            })
            .await?;

        Ok(AppliedEvent {
            status: AppliedStatus::Authorized,
            transaction,
            card,
            ledger_entry,
        })
    }

    /// Find the authorization a capture or reversal settles.
    async fn authorized_transaction(
        session: &mut Session<S>,
        card: &Card,
        event: &NetworkEvent,
    ) -> Result<Transaction, AppError> {
        let transaction = session
            .find_transaction_by_reference(&event.transaction_id)
            .await?
            .ok_or(AppError::TransactionNotFound)?;

        if transaction.card_id != card.id {
            return Err(AppError::TransactionNotEligible(
                "transaction belongs to a different card".to_string(),
            ));
        }

        if transaction.status != TransactionStatus::Authorized {
            return Err(AppError::TransactionNotEligible(format!(
                "transaction is {}, expected authorized",
                transaction.status
            )));
        }

        Ok(transaction)
    }

    /// Settle an authorization: release its hold and debit the captured
    /// amount plus the 1% fee.
    async fn capture(
        session: &mut Session<S>,
        mut card: Card,
        event: &NetworkEvent,
    ) -> Result<AppliedEvent, AppError> {
        let mut transaction = Self::authorized_transaction(session, &card, event).await?;

        if event.currency != transaction.currency {
            return Err(AppError::CurrencyMismatch);
        }

        if event.amount_cents > transaction.authorized_amount_cents {
            return Err(AppError::TransactionNotEligible(
                "capture amount exceeds the authorized amount".to_string(),
            ));
        }

        let fee = fee_for(event.amount_cents).ok_or_else(out_of_range)?;
        let settled = event
            .amount_cents
            .checked_add(fee)
            .and_then(|debit| card.current_balance_cents.checked_sub(debit))
            .ok_or_else(out_of_range)?;

        card.held_balance_cents -= transaction.authorized_amount_cents;
        card.current_balance_cents = settled;
        let card = session.update_card(&card).await?;

        transaction.captured_amount_cents = event.amount_cents;
        transaction.status = TransactionStatus::Completed;
        transaction.transaction_type = TransactionType::Capture;
        transaction.event_timestamp = event.timestamp;
        let transaction = session.update_transaction(&transaction).await?;

        let ledger_entry = session
            .append_ledger_entry(NewLedgerEntry {
                card_id: card.id,
                transaction_id: transaction.id,
                entry_type: LedgerEntryKind::CaptureSettlement,
                amount_cents: event.amount_cents,
                fee_cents: fee,
                balance_after_cents: card.current_balance_cents,
            })
            .await?;

        Ok(AppliedEvent {
            status: AppliedStatus::Captured,
            transaction,
            card,
            ledger_entry,
        })
    }

    /// Cancel an authorization and release its hold.
    async fn reverse(
        session: &mut Session<S>,
        mut card: Card,
        event: &NetworkEvent,
    ) -> Result<AppliedEvent, AppError> {
        let mut transaction = Self::authorized_transaction(session, &card, event).await?;
        let released = transaction.authorized_amount_cents;

        card.held_balance_cents -= released;
        let card = session.update_card(&card).await?;

        transaction.status = TransactionStatus::Reversed;
        transaction.transaction_type = TransactionType::Reversal;
        transaction.event_timestamp = event.timestamp;
        let transaction = session.update_transaction(&transaction).await?;

        let ledger_entry = session
            .append_ledger_entry(NewLedgerEntry {
                card_id: card.id,
                transaction_id: transaction.id,
                entry_type: LedgerEntryKind::AuthorizationReversal,
                amount_cents: released,
                fee_cents: 0,
                balance_after_cents: card.current_balance_cents,
            })
            .await?;

        Ok(AppliedEvent {
            status: AppliedStatus::Reversed,
            transaction,
            card,
            ledger_entry,
        })
    }

    /// Credit back part or all of a captured purchase.
    async fn refund(
        session: &mut Session<S>,
        mut card: Card,
        original: Transaction,
        event: &NetworkEvent,
    ) -> Result<AppliedEvent, AppError> {
        if original.status != TransactionStatus::Completed || original.direction != Direction::Debit
        {
            return Err(AppError::TransactionNotEligible(format!(
                "only completed purchases can be refunded, transaction is {}",
                original.status
            )));
        }

        if event.currency != card.currency {
            return Err(AppError::CurrencyMismatch);
        }

        if session
            .find_transaction_by_reference(&event.transaction_id)
            .await?
            .is_some()
        {
            return Err(AppError::TransactionNotEligible(format!(
                "transaction {} already exists",
                event.transaction_id
            )));
        }

        let already_refunded = session
            .refunded_total(&original.transaction_reference)
            .await?;
        let refunded = already_refunded
            .checked_add(event.amount_cents)
            .ok_or_else(out_of_range)?;
        if refunded > original.captured_amount_cents {
            return Err(AppError::TransactionNotEligible(
                "refunds would exceed the captured amount".to_string(),
            ));
        }

        let transaction = session
            .insert_transaction(NewTransaction {
                owner_id: card.owner_id,
                card_id: card.id,
                transaction_reference: event.transaction_id.clone(),
                original_transaction_reference: Some(original.transaction_reference.clone()),
                idempotency_key: Some(event.idempotency_key.clone()),
                amount_cents: event.amount_cents,
                currency: event.currency.clone(),
                authorized_amount_cents: 0,
                captured_amount_cents: 0,
                transaction_type: TransactionType::Refund,
                direction: Direction::Credit,
                status: TransactionStatus::Completed,
                merchant: if event.merchant.name.is_empty() {
                    original.merchant.clone()
                } else {
                    event.merchant.clone()
                },
                network: if event.network.is_empty() {
                    original.network.clone()
                } else {
                    event.network.clone()
                },
                event_timestamp: event.timestamp,
            })
            .await?;

        card.current_balance_cents = card
            .current_balance_cents
            .checked_add(event.amount_cents)
            .ok_or_else(out_of_range)?;
        let card = session.update_card(&card).await?;

        let ledger_entry = session
            .append_ledger_entry(NewLedgerEntry {
                card_id: card.id,
                transaction_id: transaction.id,
                entry_type: LedgerEntryKind::Refund,
                amount_cents: event.amount_cents,
                fee_cents: 0,
                balance_after_cents: card.current_balance_cents,
            })
            .await?;

        Ok(AppliedEvent {
            status: AppliedStatus::Refunded,
            transaction,
            card,
            ledger_entry,
        })
    }

    fn notify(&self, applied: &AppliedEvent) {
        let kind = match applied.status {
            AppliedStatus::Authorized => return,
            AppliedStatus::Captured => NotificationKind::Debited,
            AppliedStatus::Reversed => NotificationKind::Reversed,
            AppliedStatus::Refunded => NotificationKind::Refunded,
        };

        self.notifications.notify_owner(
            &self.store,
            kind,
            &applied.card,
            Some((applied.ledger_entry.amount_cents, applied.ledger_entry.fee_cents)),
        );
    }
}
