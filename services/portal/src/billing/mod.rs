//! Billing
//!
//! The charge/refund engine wraps the ledger with per-row idempotency:
//! every billable resource row carries `billed` + `billing_transaction_id`
//! (and for refundable kinds `refund_status` + `refund_transaction_id`), so
//! each row is at-most-once billable and at-most-once refundable. Pricing
//! itself lives in [`rates`].

pub mod rates;

use rust_decimal::Decimal;
use uuid::Uuid;
use voxway_core::{Result, VoxwayError};
use voxway_db::DbPool;

use crate::ledger::{apply_adjustment, Adjustment, LedgerEntry};
use crate::state::db_err;
use crate::types::TransactionKind;

/// Tables that carry the billing columns. Table names are fixed here so no
/// caller-supplied string ever reaches SQL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Billable {
    CallLog,
    DialerCallLog,
    ActionSend,
}

impl Billable {
    fn table(&self) -> &'static str {
        match self {
            Self::CallLog => "call_logs",
            Self::DialerCallLog => "dialer_call_logs",
            Self::ActionSend => "action_sends",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChargeOutcome {
    Charged(LedgerEntry),
    AlreadyCharged { transaction_id: Uuid },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefundOutcome {
    Refunded(LedgerEntry),
    Skipped,
}

#[derive(Clone)]
pub struct ChargeEngine {
    pool: DbPool,
}

impl ChargeEngine {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Debit `amount` against the user for a resource row, exactly once.
    ///
    /// Locks the row; a row that already carries a billing transaction is
    /// returned untouched as `AlreadyCharged`. The row update and the ledger
    /// write share one database transaction. With `strict` set, an overdraw
    /// rolls everything back and surfaces `insufficient_funds`.
    pub async fn charge(
        &self,
        billable: Billable,
        row_id: Uuid,
        user_id: Uuid,
        amount: Decimal,
        description: &str,
        strict: bool,
    ) -> Result<ChargeOutcome> {
        if amount < Decimal::ZERO {
            return Err(VoxwayError::Validation("Charge amount must be non-negative".into()));
        }

        let mut conn = self.pool.get().await?;
        let tx = conn.transaction().await.map_err(db_err)?;

        let sql = format!(
            "SELECT billing_transaction_id FROM {} WHERE id = $1 FOR UPDATE",
            billable.table()
        );
        let row = tx
            .query_opt(&sql, &[&row_id])
            .await
            .map_err(db_err)?
            .ok_or_else(|| VoxwayError::NotFound(format!("{} row {}", billable.table(), row_id)))?;

        if let Some(existing) = row.get::<_, Option<Uuid>>("billing_transaction_id") {
            return Ok(ChargeOutcome::AlreadyCharged {
                transaction_id: existing,
            });
        }

        let entry = apply_adjustment(
            &*tx,
            &Adjustment {
                user_id,
                amount: -amount,
                description,
                kind: TransactionKind::Debit,
                payment_method: None,
                reference_id: Some(&row_id.to_string()),
                strict,
            },
        )
        .await?;

        let sql = format!(
            "UPDATE {} SET billed = TRUE, billing_transaction_id = $1 WHERE id = $2",
            billable.table()
        );
        tx.execute(&sql, &[&entry.transaction_id, &row_id])
            .await
            .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;

        tracing::info!(
            table = billable.table(),
            row_id = %row_id,
            user_id = %user_id,
            amount = %amount,
            transaction_id = %entry.transaction_id,
            "Charged"
        );

        Ok(ChargeOutcome::Charged(entry))
    }

    /// Credit `amount` back for a previously charged row, at most once.
    ///
    /// The claim is a conditional UPDATE matching only unclaimed charged rows;
    /// if it matches nothing (never charged, already refunded, or a refund in
    /// flight) the call is a no-op `Skipped`. A claimed row walks
    /// pending -> completed (billing_transaction_id cleared) or
    /// pending -> failed with the error recorded.
    pub async fn refund(
        &self,
        billable: Billable,
        row_id: Uuid,
        user_id: Uuid,
        amount: Decimal,
        description: &str,
    ) -> Result<RefundOutcome> {
        let conn = self.pool.get().await?;

        let sql = format!(
            "UPDATE {} SET refund_status = 'pending', refund_amount = $1 \
             WHERE id = $2 AND refund_status IN ('none','failed') \
               AND billing_transaction_id IS NOT NULL",
            billable.table()
        );
        let claimed = conn
            .execute(&sql, &[&amount, &row_id])
            .await
            .map_err(db_err)?;
        if claimed == 0 {
            return Ok(RefundOutcome::Skipped);
        }
        drop(conn);

        let ledger_result = {
            let mut conn = self.pool.get().await?;
            let tx = match conn.transaction().await {
                Ok(tx) => tx,
                Err(e) => {
                    self.mark_refund_failed(billable, row_id, &e.to_string()).await?;
                    return Err(db_err(e));
                }
            };
            let adjusted = apply_adjustment(
                &*tx,
                &Adjustment {
                    user_id,
                    amount,
                    description,
                    kind: TransactionKind::Credit,
                    payment_method: None,
                    reference_id: Some(&row_id.to_string()),
                    strict: false,
                },
            )
            .await;
            match adjusted {
                Ok(entry) => {
                    let sql = format!(
                        "UPDATE {} SET refund_status = 'completed', \
                         refund_transaction_id = $1, billing_transaction_id = NULL \
                         WHERE id = $2",
                        billable.table()
                    );
                    let finalized = match tx.execute(&sql, &[&entry.transaction_id, &row_id]).await {
                        Ok(_) => tx.commit().await.map_err(db_err),
                        Err(e) => Err(db_err(e)),
                    };
                    finalized.map(|_| entry)
                }
                Err(e) => Err(e),
            }
        };

        match ledger_result {
            Ok(entry) => {
                tracing::info!(
                    table = billable.table(),
                    row_id = %row_id,
                    user_id = %user_id,
                    amount = %amount,
                    "Refunded"
                );
                Ok(RefundOutcome::Refunded(entry))
            }
            Err(e) => {
                self.mark_refund_failed(billable, row_id, &e.to_string()).await?;
                Err(e)
            }
        }
    }

    async fn mark_refund_failed(
        &self,
        billable: Billable,
        row_id: Uuid,
        error: &str,
    ) -> Result<()> {
        let conn = self.pool.get().await?;
        let sql = format!(
            "UPDATE {} SET refund_status = 'failed', refund_error = $1 WHERE id = $2",
            billable.table()
        );
        conn.execute(&sql, &[&error, &row_id]).await.map_err(db_err)?;
        Ok(())
    }
}
