//! Billing scheduler
//!
//! A single ticker drives the periodic money work: cancel-pending numbers
//! (recovery, notices, expiry), due monthly fees, backfill billing for
//! finished calls the live path missed, and routing sync against the current
//! balance. Every step is idempotent and safe to interleave with webhooks.

use tokio::sync::watch;
use uuid::Uuid;
use voxway_core::Result;

use crate::calls::reducer::bill_finished_call;
use crate::numbers::{self, lifecycle};
use crate::state::{db_err, AppState};
use crate::types::{CallLog, ExternalNumber};

/// Run the billing loop until shutdown flips.
pub async fn run(state: AppState, mut shutdown: watch::Receiver<bool>) {
    let interval =
        std::time::Duration::from_secs(u64::from(state.config.billing_interval_minutes.max(1)) * 60);
    tracing::info!(interval_secs = interval.as_secs(), "Billing scheduler started");

    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    tracing::info!("Billing scheduler stopping");
                    return;
                }
            }
        }

        if let Err(e) = tick(&state).await {
            tracing::error!(error = %e, "Billing tick failed");
        }
    }
}

/// One pass over all active users.
pub async fn tick(state: &AppState) -> Result<()> {
    let user_ids: Vec<Uuid> = {
        let conn = state.pool.get().await?;
        let rows = conn
            .query(
                "SELECT id FROM users WHERE is_active = TRUE AND suspended = FALSE ORDER BY created_at",
                &[],
            )
            .await
            .map_err(db_err)?;
        rows.iter().map(|r| r.get("id")).collect()
    };

    for user_id in user_ids {
        if let Err(e) = tick_user(state, user_id).await {
            tracing::error!(user_id = %user_id, error = %e, "User billing pass failed");
        }
    }
    Ok(())
}

async fn user_numbers(state: &AppState, user_id: Uuid) -> Result<Vec<ExternalNumber>> {
    let conn = state.pool.get().await?;
    let rows = conn
        .query(
            "SELECT * FROM external_numbers WHERE user_id = $1 ORDER BY created_at",
            &[&user_id],
        )
        .await
        .map_err(db_err)?;
    Ok(rows.iter().map(ExternalNumber::from_row).collect())
}

async fn tick_user(state: &AppState, user_id: Uuid) -> Result<()> {
    // 1. Walk cancel-pending numbers first: recovery beats re-billing.
    for number in user_numbers(state, user_id).await? {
        if number.cancel_pending {
            if let Err(e) = lifecycle::process_cancel_pending(state, &number).await {
                tracing::error!(
                    user_id = %user_id,
                    number_id = %number.id,
                    error = %e,
                    "Cancel-pending processing failed"
                );
            }
        }
    }

    // 2. Charge any due monthly fees (reload: step 1 may have deleted rows).
    for number in user_numbers(state, user_id).await? {
        if !number.cancel_pending {
            if let Err(e) = lifecycle::bill_due_cycles(state, &number).await {
                tracing::error!(
                    user_id = %user_id,
                    number_id = %number.id,
                    error = %e,
                    "Monthly fee charge failed"
                );
            }
        }
    }

    // 3. Backfill pricing for finished calls the live path missed.
    let unbilled: Vec<CallLog> = {
        let conn = state.pool.get().await?;
        let rows = conn
            .query(
                "SELECT * FROM call_logs WHERE user_id = $1 AND billed = FALSE \
                 AND status = 'completed' AND billsec > 0 LIMIT 100",
                &[&user_id],
            )
            .await
            .map_err(db_err)?;
        rows.iter().map(CallLog::from_row).collect()
    };
    for call in unbilled {
        if let Err(e) = bill_finished_call(state, &call).await {
            tracing::error!(
                user_id = %user_id,
                call_log_id = %call.id,
                error = %e,
                "Backfill billing failed"
            );
        }
    }

    // 4. Align inbound routing with the current balance.
    let balance = state.ledger.balance(user_id).await?;
    numbers::sync_routing(state, user_id, balance).await?;

    Ok(())
}
