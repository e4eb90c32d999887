//! PostgreSQL storage adapter.
//!
//! Row types are private to this module; each maps onto its domain model
//! through `into_domain`, which fails with `StoreError::Corrupt` if a stored
//! enum label is unknown.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Postgres, Transaction as DbTransaction};
use uuid::Uuid;

use crate::db::DbPool;
use crate::models::card::{Card, NewCard};
use crate::models::ledger::{LedgerEntry, NewLedgerEntry};
use crate::models::transaction::{Merchant, NewTransaction, Transaction};
use crate::models::user::{KycStatus, User};
use crate::store::{
    CardRepository, KycDirectory, LedgerSession, LedgerStore, StoreError, StoreResult,
    TransactionRepository, UserDirectory,
};

const CARD_COLUMNS: &str = "id, owner_id, reference, pan_encrypted, cvv_encrypted, masked_pan, \
     last_four, pan_fingerprint, cvv_fingerprint, card_type, currency, spending_limit_cents, \
     current_balance_cents, held_balance_cents, status, expiry_month, expiry_year, expires_at, \
     created_at, updated_at";

const TRANSACTION_COLUMNS: &str = "id, owner_id, card_id, transaction_reference, \
     original_transaction_reference, idempotency_key, amount_cents, currency, \
     authorized_amount_cents, captured_amount_cents, transaction_type, direction, status, \
     merchant_name, merchant_mcc, merchant_country, network, decline_reason, event_timestamp, \
     created_at, updated_at";

const LEDGER_COLUMNS: &str =
    "id, card_id, transaction_id, entry_type, amount_cents, fee_cents, balance_after_cents, created_at";

const USER_COLUMNS: &str = "id, email, first_name, last_name, status, created_at";

/// Map unique-constraint violations to `StoreError::Conflict`.
fn write_error(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() {
            return StoreError::Conflict(db_err.message().to_string());
        }
    }
    StoreError::Database(err)
}

/// Postgres-backed store.
#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

#[async_trait]
impl CardRepository for PgStore {
    async fn insert_card(&self, card: NewCard) -> StoreResult<Card> {
        let row = sqlx::query_as::<_, CardRow>(&format!(
            "INSERT INTO cards (
                owner_id, reference, pan_encrypted, cvv_encrypted, masked_pan, last_four,
                pan_fingerprint, cvv_fingerprint, card_type, currency, spending_limit_cents,
                expiry_month, expiry_year, expires_at
             ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
             RETURNING {CARD_COLUMNS}"
        ))
        .bind(card.owner_id)
        .bind(&card.reference)
        .bind(&card.pan_encrypted)
        .bind(&card.cvv_encrypted)
        .bind(&card.masked_pan)
        .bind(&card.last_four)
        .bind(&card.pan_fingerprint)
        .bind(&card.cvv_fingerprint)
        .bind(card.card_type.as_str())
        .bind(&card.currency)
        .bind(card.spending_limit_cents)
        .bind(&card.expiry_month)
        .bind(&card.expiry_year)
        .bind(card.expires_at)
        .fetch_one(&self.pool)
        .await
        .map_err(write_error)?;

        row.into_domain()
    }

    async fn pan_fingerprint_exists(&self, fingerprint: &str) -> StoreResult<bool> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM cards WHERE pan_fingerprint = $1)",
        )
        .bind(fingerprint)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    async fn find_card(&self, owner_id: Uuid, card_id: Uuid) -> StoreResult<Option<Card>> {
        let row = sqlx::query_as::<_, CardRow>(&format!(
            "SELECT {CARD_COLUMNS} FROM cards WHERE id = $1 AND owner_id = $2"
        ))
        .bind(card_id)
        .bind(owner_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(CardRow::into_domain).transpose()
    }

    async fn list_cards(&self, owner_id: Uuid) -> StoreResult<Vec<Card>> {
        let rows = sqlx::query_as::<_, CardRow>(&format!(
            "SELECT {CARD_COLUMNS} FROM cards WHERE owner_id = $1 ORDER BY created_at DESC"
        ))
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(CardRow::into_domain).collect()
    }

    async fn cards_expiring_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StoreResult<Vec<Card>> {
        let rows = sqlx::query_as::<_, CardRow>(&format!(
            "SELECT {CARD_COLUMNS} FROM cards
             WHERE status = 'active' AND expires_at >= $1 AND expires_at < $2"
        ))
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(CardRow::into_domain).collect()
    }

    async fn expire_cards_due(&self, before: DateTime<Utc>) -> StoreResult<Vec<Card>> {
        let rows = sqlx::query_as::<_, CardRow>(&format!(
            "UPDATE cards SET status = 'expired', updated_at = NOW()
             WHERE status IN ('active', 'frozen') AND expires_at < $1
             RETURNING {CARD_COLUMNS}"
        ))
        .bind(before)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(CardRow::into_domain).collect()
    }
}

#[async_trait]
impl TransactionRepository for PgStore {
    async fn list_card_transactions(&self, card_id: Uuid) -> StoreResult<Vec<Transaction>> {
        let rows = sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions
             WHERE card_id = $1 ORDER BY created_at DESC"
        ))
        .bind(card_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TransactionRow::into_domain).collect()
    }

    async fn list_ledger_entries(&self, card_id: Uuid) -> StoreResult<Vec<LedgerEntry>> {
        let rows = sqlx::query_as::<_, LedgerRow>(&format!(
            "SELECT {LEDGER_COLUMNS} FROM balance_ledger
             WHERE card_id = $1 ORDER BY created_at DESC"
        ))
        .bind(card_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(LedgerRow::into_domain).collect()
    }
}

#[async_trait]
impl UserDirectory for PgStore {
    async fn find_user(&self, user_id: Uuid) -> StoreResult<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(UserRow::into_domain))
    }

    async fn find_users_by_ids(&self, user_ids: &[Uuid]) -> StoreResult<Vec<User>> {
        if user_ids.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = ANY($1)"
        ))
        .bind(user_ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(UserRow::into_domain).collect())
    }

    async fn find_user_by_token_hash(&self, token_hash: &str) -> StoreResult<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT u.id, u.email, u.first_name, u.last_name, u.status, u.created_at
             FROM api_tokens t
             JOIN users u ON u.id = t.user_id
             WHERE t.token_hash = $1 AND t.is_active = true",
        )
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(UserRow::into_domain))
    }
}

#[async_trait]
impl KycDirectory for PgStore {
    async fn kyc_status(&self, user_id: Uuid) -> StoreResult<Option<KycStatus>> {
        let status = sqlx::query_scalar::<_, String>(
            "SELECT status FROM kyc_submissions WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(status.map(|s| s.parse::<KycStatus>()).transpose()?)
    }

    async fn transition_kyc(
        &self,
        user_id: Uuid,
        from: Option<KycStatus>,
        to: KycStatus,
    ) -> StoreResult<bool> {
        let result = match from {
            None => {
                sqlx::query(
                    "INSERT INTO kyc_submissions (user_id, status) VALUES ($1, $2)
                     ON CONFLICT (user_id) DO NOTHING",
                )
                .bind(user_id)
                .bind(to.as_str())
                .execute(&self.pool)
                .await?
            }
            Some(from) => {
                sqlx::query(
                    "UPDATE kyc_submissions SET status = $3, updated_at = NOW()
                     WHERE user_id = $1 AND status = $2",
                )
                .bind(user_id)
                .bind(from.as_str())
                .bind(to.as_str())
                .execute(&self.pool)
                .await?
            }
        };

        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl LedgerStore for PgStore {
    type Session = PgSession;

    async fn begin(&self) -> StoreResult<PgSession> {
        Ok(PgSession {
            tx: self.pool.begin().await?,
        })
    }

    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// A database transaction. Card rows are locked with `SELECT ... FOR UPDATE`
/// and stay locked until commit or rollback.
pub struct PgSession {
    tx: DbTransaction<'static, Postgres>,
}

#[async_trait]
impl LedgerSession for PgSession {
    async fn claim_event(&mut self, idempotency_key: &str, event_type: &str) -> StoreResult<bool> {
        // A concurrent claim of the same key blocks here until the other
        // transaction finishes, then conflicts if it committed.
        let result = sqlx::query(
            "INSERT INTO processed_events (idempotency_key, event_type) VALUES ($1, $2)
             ON CONFLICT (idempotency_key) DO NOTHING",
        )
        .bind(idempotency_key)
        .bind(event_type)
        .execute(&mut *self.tx)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn lock_card(&mut self, card_id: Uuid) -> StoreResult<Option<Card>> {
        let row = sqlx::query_as::<_, CardRow>(&format!(
            "SELECT {CARD_COLUMNS} FROM cards WHERE id = $1 FOR UPDATE"
        ))
        .bind(card_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        row.map(CardRow::into_domain).transpose()
    }

    async fn lock_card_by_reference(&mut self, reference: &str) -> StoreResult<Option<Card>> {
        let row = sqlx::query_as::<_, CardRow>(&format!(
            "SELECT {CARD_COLUMNS} FROM cards WHERE reference = $1 FOR UPDATE"
        ))
        .bind(reference)
        .fetch_optional(&mut *self.tx)
        .await?;

        row.map(CardRow::into_domain).transpose()
    }

    async fn update_card(&mut self, card: &Card) -> StoreResult<Card> {
        let row = sqlx::query_as::<_, CardRow>(&format!(
            "UPDATE cards
             SET current_balance_cents = $2, held_balance_cents = $3, status = $4,
                 updated_at = NOW()
             WHERE id = $1
             RETURNING {CARD_COLUMNS}"
        ))
        .bind(card.id)
        .bind(card.current_balance_cents)
        .bind(card.held_balance_cents)
        .bind(card.status.as_str())
        .fetch_one(&mut *self.tx)
        .await?;

        row.into_domain()
    }

    async fn find_transaction_by_reference(
        &mut self,
        reference: &str,
    ) -> StoreResult<Option<Transaction>> {
        let row = sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE transaction_reference = $1"
        ))
        .bind(reference)
        .fetch_optional(&mut *self.tx)
        .await?;

        row.map(TransactionRow::into_domain).transpose()
    }

    async fn find_transaction_by_idempotency_key(
        &mut self,
        idempotency_key: &str,
    ) -> StoreResult<Option<Transaction>> {
        let row = sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE idempotency_key = $1"
        ))
        .bind(idempotency_key)
        .fetch_optional(&mut *self.tx)
        .await?;

        row.map(TransactionRow::into_domain).transpose()
    }

    async fn refunded_total(&mut self, original_reference: &str) -> StoreResult<i64> {
        let total = sqlx::query_scalar::<_, i64>(
            "SELECT COALESCE(SUM(amount_cents), 0)::BIGINT FROM transactions
             WHERE original_transaction_reference = $1 AND transaction_type = 'refund'",
        )
        .bind(original_reference)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(total)
    }

    async fn insert_transaction(
        &mut self,
        transaction: NewTransaction,
    ) -> StoreResult<Transaction> {
        let row = sqlx::query_as::<_, TransactionRow>(&format!(
            "INSERT INTO transactions (
                owner_id, card_id, transaction_reference, original_transaction_reference,
                idempotency_key, amount_cents, currency, authorized_amount_cents,
                captured_amount_cents, transaction_type, direction, status, merchant_name,
                merchant_mcc, merchant_country, network, event_timestamp
             ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
             RETURNING {TRANSACTION_COLUMNS}"
        ))
        .bind(transaction.owner_id)
        .bind(transaction.card_id)
        .bind(&transaction.transaction_reference)
        .bind(&transaction.original_transaction_reference)
        .bind(&transaction.idempotency_key)
        .bind(transaction.amount_cents)
        .bind(&transaction.currency)
        .bind(transaction.authorized_amount_cents)
        .bind(transaction.captured_amount_cents)
        .bind(transaction.transaction_type.as_str())
        .bind(transaction.direction.as_str())
        .bind(transaction.status.as_str())
        .bind(&transaction.merchant.name)
        .bind(&transaction.merchant.mcc)
        .bind(&transaction.merchant.country)
        .bind(&transaction.network)
        .bind(transaction.event_timestamp)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(write_error)?;

        row.into_domain()
    }

    async fn update_transaction(&mut self, transaction: &Transaction) -> StoreResult<Transaction> {
        let row = sqlx::query_as::<_, TransactionRow>(&format!(
            "UPDATE transactions
             SET amount_cents = $2, authorized_amount_cents = $3, captured_amount_cents = $4,
                 transaction_type = $5, status = $6, event_timestamp = $7, updated_at = NOW()
             WHERE id = $1
             RETURNING {TRANSACTION_COLUMNS}"
        ))
        .bind(transaction.id)
        .bind(transaction.amount_cents)
        .bind(transaction.authorized_amount_cents)
        .bind(transaction.captured_amount_cents)
        .bind(transaction.transaction_type.as_str())
        .bind(transaction.status.as_str())
        .bind(transaction.event_timestamp)
        .fetch_one(&mut *self.tx)
        .await?;

        row.into_domain()
    }

    async fn append_ledger_entry(&mut self, entry: NewLedgerEntry) -> StoreResult<LedgerEntry> {
        let row = sqlx::query_as::<_, LedgerRow>(&format!(
            "INSERT INTO balance_ledger (
                card_id, transaction_id, entry_type, amount_cents, fee_cents, balance_after_cents
             ) VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING {LEDGER_COLUMNS}"
        ))
        .bind(entry.card_id)
        .bind(entry.transaction_id)
        .bind(entry.entry_type.label())
        .bind(entry.amount_cents)
        .bind(entry.fee_cents)
        .bind(entry.balance_after_cents)
        .fetch_one(&mut *self.tx)
        .await?;

        row.into_domain()
    }

    async fn commit(self) -> StoreResult<()> {
        self.tx.commit().await?;
        Ok(())
    }
}

#[derive(Debug, sqlx::FromRow)]
struct CardRow {
    id: Uuid,
    owner_id: Uuid,
    reference: String,
    pan_encrypted: String,
    cvv_encrypted: String,
    masked_pan: String,
    last_four: String,
    pan_fingerprint: String,
    cvv_fingerprint: String,
    card_type: String,
    currency: String,
    spending_limit_cents: i64,
    current_balance_cents: i64,
    held_balance_cents: i64,
    status: String,
    expiry_month: String,
    expiry_year: String,
    expires_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl CardRow {
    fn into_domain(self) -> StoreResult<Card> {
        Ok(Card {
            card_type: self.card_type.parse()?,
            status: self.status.parse()?,
            id: self.id,
            owner_id: self.owner_id,
            reference: self.reference,
            pan_encrypted: self.pan_encrypted,
            cvv_encrypted: self.cvv_encrypted,
            masked_pan: self.masked_pan,
            last_four: self.last_four,
            pan_fingerprint: self.pan_fingerprint,
            cvv_fingerprint: self.cvv_fingerprint,
            currency: self.currency,
            spending_limit_cents: self.spending_limit_cents,
            current_balance_cents: self.current_balance_cents,
            held_balance_cents: self.held_balance_cents,
            expiry_month: self.expiry_month,
            expiry_year: self.expiry_year,
            expires_at: self.expires_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct TransactionRow {
    id: Uuid,
    owner_id: Uuid,
    card_id: Uuid,
    transaction_reference: String,
    original_transaction_reference: Option<String>,
    idempotency_key: Option<String>,
    amount_cents: i64,
    currency: String,
    authorized_amount_cents: i64,
    captured_amount_cents: i64,
    transaction_type: String,
    direction: String,
    status: String,
    merchant_name: String,
    merchant_mcc: String,
    merchant_country: String,
    network: String,
    decline_reason: Option<String>,
    event_timestamp: DateTime<Utc>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TransactionRow {
    fn into_domain(self) -> StoreResult<Transaction> {
        Ok(Transaction {
            transaction_type: self.transaction_type.parse()?,
            direction: self.direction.parse()?,
            status: self.status.parse()?,
            id: self.id,
            owner_id: self.owner_id,
            card_id: self.card_id,
            transaction_reference: self.transaction_reference,
            original_transaction_reference: self.original_transaction_reference,
            idempotency_key: self.idempotency_key,
            amount_cents: self.amount_cents,
            currency: self.currency,
            authorized_amount_cents: self.authorized_amount_cents,
            captured_amount_cents: self.captured_amount_cents,
            merchant: Merchant {
                name: self.merchant_name,
                mcc: self.merchant_mcc,
                country: self.merchant_country,
            },
            network: self.network,
            decline_reason: self.decline_reason,
            event_timestamp: self.event_timestamp,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct LedgerRow {
    id: Uuid,
    card_id: Uuid,
    transaction_id: Uuid,
    entry_type: String,
    amount_cents: i64,
    fee_cents: i64,
    balance_after_cents: i64,
    created_at: DateTime<Utc>,
}

impl LedgerRow {
    fn into_domain(self) -> StoreResult<LedgerEntry> {
        Ok(LedgerEntry {
            entry_type: self.entry_type.parse()?,
            id: self.id,
            card_id: self.card_id,
            transaction_id: self.transaction_id,
            amount_cents: self.amount_cents,
            fee_cents: self.fee_cents,
            balance_after_cents: self.balance_after_cents,
            created_at: self.created_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct UserRow {
    id: Uuid,
    email: String,
    first_name: String,
    last_name: String,
    status: String,
    created_at: DateTime<Utc>,
}

impl UserRow {
    fn into_domain(self) -> User {
        User {
            id: self.id,
            email: self.email,
            first_name: self.first_name,
            last_name: self.last_name,
            status: self.status,
            created_at: self.created_at,
        }
    }
}
