//! Wallet ledger
//!
//! Single source of truth for money. Every balance change locks the user row,
//! updates the balance, and appends a transaction row inside one database
//! transaction; both succeed or both fail. A user's balance always equals the
//! sum of their completed transactions.

use rust_decimal::Decimal;
use tokio_postgres::GenericClient;
use uuid::Uuid;
use voxway_core::{Result, VoxwayError};
use voxway_db::DbPool;

use crate::state::db_err;
use crate::types::{Transaction, TransactionKind};

/// Outcome of a ledger adjustment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub transaction_id: Uuid,
    pub balance_before: Decimal,
    pub balance_after: Decimal,
}

/// Adjustment request. `amount` is signed: negative debits, positive credits.
#[derive(Debug, Clone)]
pub struct Adjustment<'a> {
    pub user_id: Uuid,
    pub amount: Decimal,
    pub description: &'a str,
    pub kind: TransactionKind,
    pub payment_method: Option<&'a str>,
    pub reference_id: Option<&'a str>,
    /// Reject instead of overdrawing. Non-strict debits may take the balance
    /// negative (in-flight calls are billed even after the wallet empties).
    pub strict: bool,
}

/// Apply an adjustment on an open transaction. The caller owns commit/rollback;
/// the user row stays locked until then, which linearizes all ledger writes
/// for that user.
pub async fn apply_adjustment<C: GenericClient>(
    client: &C,
    adj: &Adjustment<'_>,
) -> Result<LedgerEntry> {
    let row = client
        .query_opt(
            "SELECT balance FROM users WHERE id = $1 FOR UPDATE",
            &[&adj.user_id],
        )
        .await
        .map_err(db_err)?
        .ok_or_else(|| VoxwayError::NotFound(format!("User {} not found", adj.user_id)))?;

    let balance_before: Decimal = row.get("balance");
    let balance_after = balance_before + adj.amount;

    if adj.strict && adj.amount < Decimal::ZERO && balance_after < Decimal::ZERO {
        return Err(VoxwayError::InsufficientFunds(format!(
            "Balance {} cannot cover {}",
            balance_before,
            adj.amount.abs()
        )));
    }

    client
        .execute(
            "UPDATE users SET balance = $1 WHERE id = $2",
            &[&balance_after, &adj.user_id],
        )
        .await
        .map_err(db_err)?;

    let transaction_id = Uuid::new_v4();
    client
        .execute(
            "INSERT INTO transactions \
             (id, user_id, amount, description, kind, payment_method, reference_id, \
              balance_before, balance_after, status) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, 'completed')",
            &[
                &transaction_id,
                &adj.user_id,
                &adj.amount,
                &adj.description,
                &adj.kind.as_str(),
                &adj.payment_method,
                &adj.reference_id,
                &balance_before,
                &balance_after,
            ],
        )
        .await
        .map_err(db_err)?;

    Ok(LedgerEntry {
        transaction_id,
        balance_before,
        balance_after,
    })
}

/// Pool-backed ledger facade.
#[derive(Clone)]
pub struct Ledger {
    pool: DbPool,
}

impl Ledger {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Adjust a user's balance in its own transaction.
    pub async fn adjust(&self, adj: &Adjustment<'_>) -> Result<LedgerEntry> {
        let mut conn = self.pool.get().await?;
        let tx = conn.transaction().await.map_err(db_err)?;
        let entry = apply_adjustment(&*tx, adj).await?;
        tx.commit().await.map_err(db_err)?;

        tracing::debug!(
            user_id = %adj.user_id,
            amount = %adj.amount,
            balance_after = %entry.balance_after,
            "Ledger adjustment"
        );

        Ok(entry)
    }

    /// Current balance.
    pub async fn balance(&self, user_id: Uuid) -> Result<Decimal> {
        let conn = self.pool.get().await?;
        let row = conn
            .query_opt("SELECT balance FROM users WHERE id = $1", &[&user_id])
            .await
            .map_err(db_err)?
            .ok_or_else(|| VoxwayError::NotFound(format!("User {} not found", user_id)))?;
        Ok(row.get("balance"))
    }

    /// Recent transactions, newest first.
    pub async fn transactions(&self, user_id: Uuid, limit: i64) -> Result<Vec<Transaction>> {
        let conn = self.pool.get().await?;
        let rows = conn
            .query(
                "SELECT * FROM transactions WHERE user_id = $1 \
                 ORDER BY created_at DESC LIMIT $2",
                &[&user_id, &limit],
            )
            .await
            .map_err(db_err)?;
        Ok(rows.iter().map(Transaction::from_row).collect())
    }
}
