//! Number billing lifecycle
//!
//! Monthly fees are claimed through the `number_billing_cycles` table, whose
//! unique key makes each `(user, number, billed_to)` period chargeable by
//! exactly one worker. A fee that cannot be charged walks the number into the
//! grace-period cancellation machine:
//!
//! ```text
//! active --insufficient_funds--> cancel_pending --now >= cancel_after--> released+deleted
//!            cancel_pending --top_up_succeeds--> active
//! ```

use chrono::{DateTime, Duration, Months, Utc};
use uuid::Uuid;
use voxway_core::{Result, VoxwayError};

use crate::billing::rates;
use crate::ledger::Adjustment;
use crate::state::{db_err, AppState};
use crate::types::{ExternalNumber, TransactionKind};

/// The right edge of the next unbilled period.
pub fn next_billed_to(
    last_billed_to: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
) -> DateTime<Utc> {
    let base = last_billed_to.unwrap_or(created_at);
    base.checked_add_months(Months::new(1)).unwrap_or(base)
}

/// Reminder goes out in the final 24 hours of the grace window.
pub fn reminder_due(now: DateTime<Utc>, cancel_after: DateTime<Utc>) -> bool {
    now >= cancel_after - Duration::hours(24) && now < cancel_after
}

async fn last_billed_to(state: &AppState, number_id: Uuid) -> Result<Option<DateTime<Utc>>> {
    let conn = state.pool.get().await?;
    let row = conn
        .query_one(
            "SELECT MAX(billed_to) AS last FROM number_billing_cycles WHERE number_id = $1",
            &[&number_id],
        )
        .await
        .map_err(db_err)?;
    Ok(row.get("last"))
}

/// Claim a billing period. Returns false when another worker already holds it.
async fn claim_cycle(
    state: &AppState,
    number: &ExternalNumber,
    billed_to: DateTime<Utc>,
) -> Result<bool> {
    let conn = state.pool.get().await?;
    let inserted = conn
        .execute(
            "INSERT INTO number_billing_cycles (id, user_id, number_id, billed_to) \
             VALUES ($1, $2, $3, $4) ON CONFLICT (user_id, number_id, billed_to) DO NOTHING",
            &[&Uuid::new_v4(), &number.user_id, &number.id, &billed_to],
        )
        .await
        .map_err(db_err)?;
    Ok(inserted > 0)
}

async fn release_cycle(
    state: &AppState,
    number: &ExternalNumber,
    billed_to: DateTime<Utc>,
) -> Result<()> {
    let conn = state.pool.get().await?;
    conn.execute(
        "DELETE FROM number_billing_cycles \
         WHERE user_id = $1 AND number_id = $2 AND billed_to = $3",
        &[&number.user_id, &number.id, &billed_to],
    )
    .await
    .map_err(db_err)?;
    Ok(())
}

async fn charge_cycle_fee(
    state: &AppState,
    number: &ExternalNumber,
    billed_to: DateTime<Utc>,
) -> Result<()> {
    let fee = rates::monthly_number_fee(&state.config.rates, &number.phone_number);
    let description = format!(
        "Monthly fee for {} through {}",
        number.phone_number,
        billed_to.format("%Y-%m-%d")
    );
    state
        .ledger
        .adjust(&Adjustment {
            user_id: number.user_id,
            amount: -fee,
            description: &description,
            kind: TransactionKind::Debit,
            payment_method: None,
            reference_id: Some(&number.id.to_string()),
            strict: true,
        })
        .await?;
    Ok(())
}

async fn user_email(state: &AppState, user_id: Uuid) -> Result<String> {
    let conn = state.pool.get().await?;
    let row = conn
        .query_opt("SELECT email FROM users WHERE id = $1", &[&user_id])
        .await
        .map_err(db_err)?
        .ok_or_else(|| VoxwayError::NotFound(format!("User {}", user_id)))?;
    Ok(row.get("email"))
}

async fn enter_cancel_pending(
    state: &AppState,
    number: &ExternalNumber,
    billed_to: DateTime<Utc>,
) -> Result<()> {
    let now = Utc::now();
    let cancel_after = now + Duration::days(state.config.inbound.grace_days);

    let conn = state.pool.get().await?;
    conn.execute(
        "UPDATE external_numbers SET cancel_pending = TRUE, cancel_pending_since = $1, \
         cancel_after = $2, cancel_billed_to = $3 WHERE id = $4",
        &[&now, &cancel_after, &billed_to, &number.id],
    )
    .await
    .map_err(db_err)?;
    drop(conn);

    tracing::warn!(
        number = %number.phone_number,
        user_id = %number.user_id,
        cancel_after = %cancel_after,
        "Monthly fee unpaid, number pending cancellation"
    );

    send_initial_notice(state, number, cancel_after).await;
    Ok(())
}

async fn send_initial_notice(
    state: &AppState,
    number: &ExternalNumber,
    cancel_after: DateTime<Utc>,
) {
    let result = async {
        let email = user_email(state, number.user_id).await?;
        state
            .mailer
            .send(
                &email,
                &format!("Action needed: {} will be cancelled", number.phone_number),
                &format!(
                    "We could not charge the monthly fee for {}. Top up your balance \
                     before {} or the number will be released.",
                    number.phone_number,
                    cancel_after.format("%Y-%m-%d %H:%M UTC")
                ),
            )
            .await?;
        let conn = state.pool.get().await?;
        conn.execute(
            "UPDATE external_numbers SET notice_initial_sent_at = now() WHERE id = $1",
            &[&number.id],
        )
        .await
        .map_err(db_err)?;
        Ok::<_, VoxwayError>(())
    }
    .await;

    if let Err(e) = result {
        tracing::warn!(number_id = %number.id, error = %e, "Initial cancellation notice failed");
    }
}

async fn send_reminder_notice(state: &AppState, number: &ExternalNumber) {
    let result = async {
        let email = user_email(state, number.user_id).await?;
        state
            .mailer
            .send(
                &email,
                &format!("Final reminder: {} is about to be cancelled", number.phone_number),
                &format!(
                    "The grace period for {} ends within 24 hours. Top up now to keep it.",
                    number.phone_number
                ),
            )
            .await?;
        let conn = state.pool.get().await?;
        conn.execute(
            "UPDATE external_numbers SET notice_reminder_sent_at = now() WHERE id = $1",
            &[&number.id],
        )
        .await
        .map_err(db_err)?;
        Ok::<_, VoxwayError>(())
    }
    .await;

    if let Err(e) = result {
        tracing::warn!(number_id = %number.id, error = %e, "Reminder notice failed");
    }
}

/// Charge the first monthly fee right after purchase. Unlike the periodic
/// pass, this one bills the month ahead: `billed_to` lands one month out.
pub async fn bill_initial_cycle(state: &AppState, number: &ExternalNumber) -> Result<()> {
    let due = next_billed_to(None, number.created_at);
    if !claim_cycle(state, number, due).await? {
        return Ok(());
    }

    match charge_cycle_fee(state, number, due).await {
        Ok(()) => {
            tracing::info!(number = %number.phone_number, billed_to = %due, "Initial monthly fee charged");
            Ok(())
        }
        Err(VoxwayError::InsufficientFunds(_)) => {
            release_cycle(state, number, due).await?;
            if state.config.inbound.cancel_on_insufficient_balance {
                enter_cancel_pending(state, number, due).await?;
            }
            Ok(())
        }
        Err(e) => {
            release_cycle(state, number, due).await?;
            Err(e)
        }
    }
}

/// Charge every overdue period for one number. Stops on the first period the
/// wallet cannot cover, switching the number to `cancel_pending`.
pub async fn bill_due_cycles(state: &AppState, number: &ExternalNumber) -> Result<()> {
    loop {
        let last = last_billed_to(state, number.id).await?;
        let due = next_billed_to(last, number.created_at);
        if due > Utc::now() {
            return Ok(());
        }

        if !claim_cycle(state, number, due).await? {
            // Another worker holds this period.
            return Ok(());
        }

        match charge_cycle_fee(state, number, due).await {
            Ok(()) => {
                tracing::info!(number = %number.phone_number, billed_to = %due, "Monthly fee charged");
            }
            Err(VoxwayError::InsufficientFunds(_)) => {
                release_cycle(state, number, due).await?;
                if state.config.inbound.cancel_on_insufficient_balance && !number.cancel_pending {
                    enter_cancel_pending(state, number, due).await?;
                }
                return Ok(());
            }
            Err(e) => {
                release_cycle(state, number, due).await?;
                return Err(e);
            }
        }
    }
}

/// Clear a recovered number back to normal service.
async fn clear_cancel_pending(state: &AppState, number_id: Uuid) -> Result<()> {
    let conn = state.pool.get().await?;
    conn.execute(
        "UPDATE external_numbers SET cancel_pending = FALSE, cancel_pending_since = NULL, \
         cancel_after = NULL, cancel_billed_to = NULL, \
         notice_initial_sent_at = NULL, notice_reminder_sent_at = NULL \
         WHERE id = $1",
        &[&number_id],
    )
    .await
    .map_err(db_err)?;
    Ok(())
}

/// Release an expired number with the provider and delete the row.
async fn release_expired(state: &AppState, number: &ExternalNumber) -> Result<()> {
    if let Some(config_id) = &number.dialin_config_id {
        state.telephony.delete_dialin_config(config_id).await.ok();
    }

    if let Err(e) = state
        .telephony
        .release_phone_number(&number.provider_number_id, number.created_at)
        .await
    {
        tracing::warn!(number = %number.phone_number, error = %e, "Provider release failed, will retry");
        return Ok(());
    }

    let conn = state.pool.get().await?;
    conn.execute(
        "DELETE FROM external_numbers WHERE id = $1",
        &[&number.id],
    )
    .await
    .map_err(db_err)?;

    tracing::info!(number = %number.phone_number, "Number cancelled for non-payment");
    Ok(())
}

/// Drive one `cancel_pending` number: try to recover it off a topped-up
/// balance, otherwise walk it through notices and expiry.
pub async fn process_cancel_pending(state: &AppState, number: &ExternalNumber) -> Result<()> {
    let now = Utc::now();

    // Balance-recovery retry: charge the period that originally failed.
    let billed_to = match number.cancel_billed_to {
        Some(ts) => Some(ts),
        None => {
            let last = last_billed_to(state, number.id).await?;
            let due = next_billed_to(last, number.created_at);
            (due <= now).then_some(due)
        }
    };

    if let Some(billed_to) = billed_to {
        let fee = rates::monthly_number_fee(&state.config.rates, &number.phone_number);
        let balance = state.ledger.balance(number.user_id).await?;
        if balance >= fee && claim_cycle(state, number, billed_to).await? {
            match charge_cycle_fee(state, number, billed_to).await {
                Ok(()) => {
                    clear_cancel_pending(state, number.id).await?;
                    tracing::info!(
                        number = %number.phone_number,
                        "Balance recovered, cancellation withdrawn"
                    );
                    return Ok(());
                }
                Err(VoxwayError::InsufficientFunds(_)) => {
                    release_cycle(state, number, billed_to).await?;
                }
                Err(e) => {
                    release_cycle(state, number, billed_to).await?;
                    return Err(e);
                }
            }
        }
    }

    let Some(cancel_after) = number.cancel_after else {
        return Ok(());
    };

    if now >= cancel_after {
        return release_expired(state, number).await;
    }

    if number.notice_initial_sent_at.is_none() {
        send_initial_notice(state, number, cancel_after).await;
    }
    if number.notice_reminder_sent_at.is_none() && reminder_due(now, cancel_after) {
        send_reminder_notice(state, number).await;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_next_billed_to_from_created_at() {
        let created = Utc.with_ymd_and_hms(2026, 1, 15, 12, 0, 0).unwrap();
        let next = next_billed_to(None, created);
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 2, 15, 12, 0, 0).unwrap());
    }

    #[test]
    fn test_next_billed_to_advances_from_last() {
        let created = Utc.with_ymd_and_hms(2026, 1, 15, 12, 0, 0).unwrap();
        let last = Utc.with_ymd_and_hms(2026, 3, 15, 12, 0, 0).unwrap();
        let next = next_billed_to(Some(last), created);
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 4, 15, 12, 0, 0).unwrap());
    }

    #[test]
    fn test_next_billed_to_clamps_month_end() {
        let created = Utc.with_ymd_and_hms(2026, 1, 31, 0, 0, 0).unwrap();
        let next = next_billed_to(None, created);
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 2, 28, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_reminder_window() {
        let cancel_after = Utc.with_ymd_and_hms(2026, 6, 10, 0, 0, 0).unwrap();
        assert!(!reminder_due(
            Utc.with_ymd_and_hms(2026, 6, 8, 0, 0, 0).unwrap(),
            cancel_after
        ));
        assert!(reminder_due(
            Utc.with_ymd_and_hms(2026, 6, 9, 6, 0, 0).unwrap(),
            cancel_after
        ));
        assert!(!reminder_due(
            Utc.with_ymd_and_hms(2026, 6, 10, 1, 0, 0).unwrap(),
            cancel_after
        ));
    }
}
