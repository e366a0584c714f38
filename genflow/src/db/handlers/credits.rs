use crate::{
    db::{
        errors::{DbError, Result},
        models::credits::{LedgerEntryRequest, UsageEventDBResponse},
    },
    types::UserId,
};
use rust_decimal::Decimal;
use sqlx::{Connection, PgConnection};
use uuid::Uuid;

const EVENT_COLUMNS: &str = "id, user_id, delta, balance_after, reason, metadata, created_at";

pub(crate) fn ensure_positive(amount: Decimal) -> Result<()> {
    if amount <= Decimal::ZERO {
        return Err(DbError::Other(anyhow::anyhow!("ledger amounts must be positive, got {amount}")));
    }
    Ok(())
}

/// Credit balances and their usage event trail.
///
/// Every balance change is a single conditional statement on `credit_balances` followed by the
/// matching `usage_events` insert in the same transaction. Concurrent consumers for one user
/// serialize on the balance row lock, and the `balance >= amount` predicate is re-checked after
/// the lock is acquired, so a balance can never be overdrawn.
pub struct Credits<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Credits<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    /// Atomically take `amount` from the user's balance iff it is large enough.
    ///
    /// Returns the new balance, or `None` (with nothing written) when the balance is insufficient
    /// or the user has no balance row.
    pub async fn consume(&mut self, request: &LedgerEntryRequest) -> Result<Option<Decimal>> {
        ensure_positive(request.amount)?;
        let mut tx = self.db.begin().await?;

        let balance_after: Option<Decimal> = sqlx::query_scalar(
            r#"
            UPDATE credit_balances
            SET balance = balance - $2, updated_at = NOW()
            WHERE user_id = $1 AND balance >= $2
            RETURNING balance
            "#,
        )
        .bind(request.user_id)
        .bind(request.amount)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(balance_after) = balance_after else {
            tx.rollback().await?;
            return Ok(None);
        };

        Self::record_event(&mut *tx, request, -request.amount, balance_after).await?;
        tx.commit().await?;

        Ok(Some(balance_after))
    }

    /// Atomically add `amount` to the user's balance, creating the balance row if needed.
    pub async fn add(&mut self, request: &LedgerEntryRequest) -> Result<Decimal> {
        ensure_positive(request.amount)?;
        let mut tx = self.db.begin().await?;

        let balance_after: Decimal = sqlx::query_scalar(
            r#"
            INSERT INTO credit_balances (user_id, balance)
            VALUES ($1, $2)
            ON CONFLICT (user_id) DO UPDATE
            SET balance = credit_balances.balance + EXCLUDED.balance, updated_at = NOW()
            RETURNING balance
            "#,
        )
        .bind(request.user_id)
        .bind(request.amount)
        .fetch_one(&mut *tx)
        .await?;

        Self::record_event(&mut *tx, request, request.amount, balance_after).await?;
        tx.commit().await?;

        Ok(balance_after)
    }

    /// Like [`Self::add`], but only if the user has no usage event with `request.reason` yet.
    ///
    /// The balance upsert takes the row lock first, so the existence check cannot race another
    /// ledger mutation for the same user. Returns `None` with nothing written when the entry was
    /// already applied.
    pub async fn add_once(&mut self, request: &LedgerEntryRequest) -> Result<Option<Decimal>> {
        ensure_positive(request.amount)?;
        let mut tx = self.db.begin().await?;

        let balance_after: Decimal = sqlx::query_scalar(
            r#"
            INSERT INTO credit_balances (user_id, balance)
            VALUES ($1, $2)
            ON CONFLICT (user_id) DO UPDATE
            SET balance = credit_balances.balance + EXCLUDED.balance, updated_at = NOW()
            RETURNING balance
            "#,
        )
        .bind(request.user_id)
        .bind(request.amount)
        .fetch_one(&mut *tx)
        .await?;

        let applied: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM usage_events WHERE user_id = $1 AND reason = $2)")
            .bind(request.user_id)
            .bind(request.reason)
            .fetch_one(&mut *tx)
            .await?;
        if applied {
            tx.rollback().await?;
            return Ok(None);
        }

        Self::record_event(&mut *tx, request, request.amount, balance_after).await?;
        tx.commit().await?;

        Ok(Some(balance_after))
    }

    /// Current balance, zero for users that never had credits
    pub async fn get_balance(&mut self, user_id: UserId) -> Result<Decimal> {
        let balance: Option<Decimal> = sqlx::query_scalar("SELECT balance FROM credit_balances WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&mut *self.db)
            .await?;

        Ok(balance.unwrap_or(Decimal::ZERO))
    }

    /// Usage events for a user, newest first
    pub async fn list_events(&mut self, user_id: UserId, skip: i64, limit: i64) -> Result<Vec<UsageEventDBResponse>> {
        let events = sqlx::query_as::<_, UsageEventDBResponse>(&format!(
            r#"
            SELECT {EVENT_COLUMNS}
            FROM usage_events
            WHERE user_id = $1
            ORDER BY created_at DESC, id DESC
            OFFSET $2
            LIMIT $3
            "#
        ))
        .bind(user_id)
        .bind(skip)
        .bind(limit)
        .fetch_all(&mut *self.db)
        .await?;

        Ok(events)
    }

    async fn record_event(
        conn: &mut PgConnection,
        request: &LedgerEntryRequest,
        delta: Decimal,
        balance_after: Decimal,
    ) -> Result<UsageEventDBResponse> {
        let event = sqlx::query_as::<_, UsageEventDBResponse>(&format!(
            r#"
            INSERT INTO usage_events (id, user_id, delta, balance_after, reason, metadata)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {EVENT_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(request.user_id)
        .bind(delta)
        .bind(balance_after)
        .bind(request.reason)
        .bind(&request.metadata)
        .fetch_one(conn)
        .await?;

        Ok(event)
    }
}
