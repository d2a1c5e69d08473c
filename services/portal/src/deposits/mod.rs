//! Deposits
//!
//! Prepaid top-ups through four processors: card (Square- or Stripe-style,
//! selected by configuration), crypto invoices, and ACH invoices. Each
//! deposit is one `incoming_deposits` row; processor webhooks drive its
//! status, and the wallet is credited exactly once per row.

pub mod ach;
pub mod crypto;
pub mod square;
pub mod stripe;

use rust_decimal::Decimal;
use serde_json::Value;
use uuid::Uuid;
use voxway_core::{Result, VoxwayError};

use crate::config::CardProvider;
use crate::ledger::Adjustment;
use crate::state::{db_err, AppState};
use crate::types::{IncomingDeposit, TransactionKind};

#[derive(Debug, Clone, serde::Serialize)]
pub struct CheckoutLink {
    pub deposit_id: Uuid,
    pub provider: String,
    pub url: String,
}

pub(crate) fn validate_amount(state: &AppState, amount: Decimal) -> Result<()> {
    let payments = &state.config.payments;
    if amount < payments.checkout_min_amount || amount > payments.checkout_max_amount {
        return Err(VoxwayError::Validation(format!(
            "Deposit must be between {} and {}",
            payments.checkout_min_amount, payments.checkout_max_amount
        )));
    }
    Ok(())
}

pub(crate) async fn insert_deposit(
    state: &AppState,
    user_id: Uuid,
    provider: &str,
    deposit_id: Uuid,
    order_id: &str,
    amount: Decimal,
    currency: &str,
) -> Result<()> {
    let conn = state.pool.get().await?;
    conn.execute(
        "INSERT INTO incoming_deposits (id, user_id, provider, order_id, amount, currency) \
         VALUES ($1, $2, $3, $4, $5, $6)",
        &[&deposit_id, &user_id, &provider, &order_id, &amount, &currency],
    )
    .await
    .map_err(db_err)?;
    Ok(())
}

pub(crate) async fn find_deposit_by_order(
    state: &AppState,
    provider: &str,
    order_id: &str,
) -> Result<Option<IncomingDeposit>> {
    let conn = state.pool.get().await?;
    let row = conn
        .query_opt(
            "SELECT * FROM incoming_deposits WHERE provider = $1 AND order_id = $2",
            &[&provider, &order_id],
        )
        .await
        .map_err(db_err)?;
    Ok(row.as_ref().map(IncomingDeposit::from_row))
}

pub(crate) async fn update_deposit_status(
    state: &AppState,
    deposit_id: Uuid,
    status: &str,
    remote_id: Option<&str>,
    raw: &Value,
) -> Result<()> {
    let conn = state.pool.get().await?;
    conn.execute(
        "UPDATE incoming_deposits SET status = $1, \
         remote_id = COALESCE($2, remote_id), raw_payload = $3, updated_at = now() \
         WHERE id = $4",
        &[&status, &remote_id, &raw, &deposit_id],
    )
    .await
    .map_err(db_err)?;
    Ok(())
}

/// Credit a finished deposit to the wallet, exactly once. The conditional
/// UPDATE on `credited` is the claim; a lost ledger write reverts it so a
/// later delivery can retry.
pub(crate) async fn credit_deposit(state: &AppState, deposit: &IncomingDeposit) -> Result<bool> {
    let conn = state.pool.get().await?;
    let claimed = conn
        .execute(
            "UPDATE incoming_deposits SET credited = TRUE, updated_at = now() \
             WHERE id = $1 AND credited = FALSE",
            &[&deposit.id],
        )
        .await
        .map_err(db_err)?;
    if claimed == 0 {
        return Ok(false);
    }
    drop(conn);

    let description = format!("Deposit via {} ({})", deposit.provider, deposit.order_id);
    let result = state
        .ledger
        .adjust(&Adjustment {
            user_id: deposit.user_id,
            amount: deposit.amount,
            description: &description,
            kind: TransactionKind::Credit,
            payment_method: Some(&deposit.provider),
            reference_id: Some(&deposit.order_id),
            strict: false,
        })
        .await;

    match result {
        Ok(entry) => {
            let conn = state.pool.get().await?;
            conn.execute(
                "UPDATE incoming_deposits SET credit_transaction_id = $1 WHERE id = $2",
                &[&entry.transaction_id, &deposit.id],
            )
            .await
            .map_err(db_err)?;
            tracing::info!(
                user_id = %deposit.user_id,
                amount = %deposit.amount,
                provider = %deposit.provider,
                "Deposit credited"
            );
            Ok(true)
        }
        Err(e) => {
            let conn = state.pool.get().await?;
            conn.execute(
                "UPDATE incoming_deposits SET credited = FALSE WHERE id = $1",
                &[&deposit.id],
            )
            .await
            .map_err(db_err)?;
            Err(e)
        }
    }
}

/// Create a card checkout with whichever card processor is configured.
pub async fn create_card_checkout(
    state: &AppState,
    user_id: Uuid,
    amount: Decimal,
    email: Option<&str>,
) -> Result<CheckoutLink> {
    validate_amount(state, amount)?;
    match state.config.payments.card_provider {
        CardProvider::Square => square::create_deposit_checkout(state, user_id, amount, email).await,
        CardProvider::Stripe => stripe::create_deposit_checkout(state, user_id, amount, email).await,
    }
}
