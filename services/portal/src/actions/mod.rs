//! Tool action endpoints
//!
//! The agent runtime calls back into the portal to act on the user's behalf:
//! send email, SMS, physical mail, a video meeting link, a payment link, or
//! log a transcript turn. Every endpoint authenticates with the agent's
//! action token and follows the same discipline: claim an idempotent row by
//! dedupe key, charge before acting, refund best-effort on provider failure.

pub mod email;
pub mod mail;
pub mod meeting;
pub mod message_log;
pub mod payment_link;
pub mod sms;

use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;
use voxway_core::crypto::sha256_hex;
use voxway_core::{Result, VoxwayError};

use crate::billing::{Billable, ChargeOutcome, RefundOutcome};
use crate::state::{db_err, AppState};
use crate::types::{ActionKind, ActionSend, ActionStatus, Agent};

/// Resolve the calling agent from a bearer token.
pub async fn authenticate(state: &AppState, bearer_token: &str) -> Result<Agent> {
    let hash = sha256_hex(bearer_token.as_bytes());
    crate::agents::find_agent_by_token_hash(state, &hash)
        .await?
        .ok_or_else(|| VoxwayError::Auth("Unknown action token".into()))
}

/// Derive a stable dedupe key from the action fingerprint when the caller
/// did not supply one.
pub fn derive_dedupe_key(
    kind: ActionKind,
    call_domain: Option<&str>,
    call_id: Option<&str>,
    recipient: &str,
    content: &str,
) -> String {
    let fingerprint = format!(
        "{}|{}|{}|{}|{}",
        kind.as_str(),
        call_domain.unwrap_or(""),
        call_id.unwrap_or(""),
        recipient,
        content,
    );
    sha256_hex(fingerprint.as_bytes())
}

fn validate_dedupe_key(key: &str) -> Result<()> {
    // 32-64 byte hash, hex encoded.
    let ok_len = (64..=128).contains(&key.len());
    if !ok_len || !key.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(VoxwayError::Validation(
            "dedupe_key must be a 64-128 character hex hash".into(),
        ));
    }
    Ok(())
}

/// What claiming a dedupe key produced.
#[derive(Debug)]
pub enum Claim {
    /// A new pending row; proceed to charge and send.
    Fresh(Uuid),
    /// A failed row re-opened for another attempt.
    Reopened(Uuid),
    /// The action already completed; do nothing.
    AlreadySent(ActionSend),
    /// Another invocation is mid-flight.
    InProgress,
}

pub struct NewAction<'a> {
    pub kind: ActionKind,
    pub user_id: Uuid,
    pub agent_id: Uuid,
    pub dedupe_key: &'a str,
    pub call_id: Option<&'a str>,
    pub call_domain: Option<&'a str>,
    pub recipient: &'a str,
    pub recipient_name: Option<&'a str>,
    pub recipient_address: Option<&'a Value>,
    pub subject: Option<&'a str>,
    pub body: Option<&'a str>,
    pub template_id: Option<Uuid>,
    pub raw_payload: Option<&'a Value>,
}

/// Claim the dedupe key: insert a pending row, or triage the existing one.
pub async fn claim_action(state: &AppState, action: &NewAction<'_>) -> Result<Claim> {
    validate_dedupe_key(action.dedupe_key)?;

    let conn = state.pool.get().await?;
    let inserted = conn
        .query_opt(
            "INSERT INTO action_sends \
             (id, user_id, agent_id, kind, template_id, dedupe_key, call_id, call_domain, \
              recipient, recipient_name, recipient_address, subject, body, raw_payload) \
             VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14) \
             ON CONFLICT (dedupe_key) DO NOTHING RETURNING id",
            &[
                &Uuid::new_v4(),
                &action.user_id,
                &action.agent_id,
                &action.kind.as_str(),
                &action.template_id,
                &action.dedupe_key,
                &action.call_id,
                &action.call_domain,
                &action.recipient,
                &action.recipient_name,
                &action.recipient_address,
                &action.subject,
                &action.body,
                &action.raw_payload,
            ],
        )
        .await
        .map_err(db_err)?;

    if let Some(row) = inserted {
        return Ok(Claim::Fresh(row.get("id")));
    }

    let existing = conn
        .query_one(
            "SELECT * FROM action_sends WHERE dedupe_key = $1",
            &[&action.dedupe_key],
        )
        .await
        .map_err(db_err)?;
    let existing = ActionSend::from_row(&existing);

    match ActionStatus::parse_str(&existing.status) {
        Some(ActionStatus::Completed) => Ok(Claim::AlreadySent(existing)),
        Some(ActionStatus::Pending) => Ok(Claim::InProgress),
        Some(ActionStatus::Failed) => {
            // Re-open, guarding against a concurrent re-open of the same row.
            let reopened = conn
                .execute(
                    "UPDATE action_sends SET status = 'pending', \
                     attempt_count = attempt_count + 1, error = NULL, updated_at = now() \
                     WHERE id = $1 AND status = 'failed'",
                    &[&existing.id],
                )
                .await
                .map_err(db_err)?;
            if reopened == 0 {
                return Ok(Claim::InProgress);
            }
            Ok(Claim::Reopened(existing.id))
        }
        None => Err(VoxwayError::Internal(format!(
            "Action {} has unknown status {}",
            existing.id, existing.status
        ))),
    }
}

/// The reconcile block returned with every action response.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BillingOutcome {
    pub charged: bool,
    pub charge_transaction_id: Option<Uuid>,
    pub refunded: bool,
    pub refund_transaction_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActionResponse {
    pub success: bool,
    pub status: &'static str,
    pub dedupe_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<Value>,
    pub billing: BillingOutcome,
}

impl ActionResponse {
    pub fn already_sent(dedupe_key: &str, existing: &ActionSend) -> Self {
        Self {
            success: true,
            status: "already_sent",
            dedupe_key: dedupe_key.to_string(),
            provider_message_id: existing.provider_message_id.clone(),
            detail: None,
            billing: BillingOutcome {
                charged: existing.billed,
                charge_transaction_id: existing.billing_transaction_id,
                refunded: existing.refund_status == "completed",
                refund_transaction_id: existing.refund_transaction_id,
            },
        }
    }
}

/// Charge the action row before the external call. Insufficient funds marks
/// the row failed and surfaces 402.
pub async fn charge_action(
    state: &AppState,
    row_id: Uuid,
    user_id: Uuid,
    amount: Decimal,
    description: &str,
) -> Result<BillingOutcome> {
    if amount <= Decimal::ZERO {
        return Ok(BillingOutcome::default());
    }

    match state
        .charges
        .charge(Billable::ActionSend, row_id, user_id, amount, description, true)
        .await
    {
        Ok(ChargeOutcome::Charged(entry)) => {
            let conn = state.pool.get().await?;
            conn.execute(
                "UPDATE action_sends SET amount = $1, updated_at = now() WHERE id = $2",
                &[&amount, &row_id],
            )
            .await
            .map_err(db_err)?;
            Ok(BillingOutcome {
                charged: true,
                charge_transaction_id: Some(entry.transaction_id),
                ..Default::default()
            })
        }
        Ok(ChargeOutcome::AlreadyCharged { transaction_id }) => Ok(BillingOutcome {
            charged: true,
            charge_transaction_id: Some(transaction_id),
            ..Default::default()
        }),
        Err(e @ VoxwayError::InsufficientFunds(_)) => {
            fail_action(state, row_id, &e.to_string()).await?;
            Err(e)
        }
        Err(e) => Err(e),
    }
}

pub async fn complete_action(
    state: &AppState,
    row_id: Uuid,
    provider_message_id: Option<&str>,
    provider_batch_id: Option<&str>,
    tracking_number: Option<&str>,
) -> Result<()> {
    let conn = state.pool.get().await?;
    conn.execute(
        "UPDATE action_sends SET status = 'completed', \
         provider_message_id = COALESCE($1, provider_message_id), \
         provider_batch_id = COALESCE($2, provider_batch_id), \
         tracking_number = COALESCE($3, tracking_number), \
         updated_at = now() WHERE id = $4",
        &[&provider_message_id, &provider_batch_id, &tracking_number, &row_id],
    )
    .await
    .map_err(db_err)?;
    Ok(())
}

pub async fn fail_action(state: &AppState, row_id: Uuid, error: &str) -> Result<()> {
    let conn = state.pool.get().await?;
    conn.execute(
        "UPDATE action_sends SET status = 'failed', error = $1, updated_at = now() WHERE id = $2",
        &[&error, &row_id],
    )
    .await
    .map_err(db_err)?;
    Ok(())
}

/// Best-effort refund after a provider failure. The action still fails; the
/// response reports whether the money came back.
pub async fn refund_action(
    state: &AppState,
    row_id: Uuid,
    user_id: Uuid,
    amount: Decimal,
    description: &str,
    billing: &mut BillingOutcome,
) {
    if amount <= Decimal::ZERO || !billing.charged {
        return;
    }
    match state
        .charges
        .refund(Billable::ActionSend, row_id, user_id, amount, description)
        .await
    {
        Ok(RefundOutcome::Refunded(entry)) => {
            billing.refunded = true;
            billing.refund_transaction_id = Some(entry.transaction_id);
        }
        Ok(RefundOutcome::Skipped) => {}
        Err(e) => {
            tracing::error!(row_id = %row_id, error = %e, "Action refund failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_dedupe_key_is_stable() {
        let a = derive_dedupe_key(ActionKind::Email, Some("dom"), Some("c1"), "a@b.c", "hello");
        let b = derive_dedupe_key(ActionKind::Email, Some("dom"), Some("c1"), "a@b.c", "hello");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_derive_dedupe_key_varies_by_field() {
        let base = derive_dedupe_key(ActionKind::Email, Some("dom"), Some("c1"), "a@b.c", "hello");
        assert_ne!(
            base,
            derive_dedupe_key(ActionKind::Sms, Some("dom"), Some("c1"), "a@b.c", "hello")
        );
        assert_ne!(
            base,
            derive_dedupe_key(ActionKind::Email, Some("dom"), Some("c2"), "a@b.c", "hello")
        );
        assert_ne!(
            base,
            derive_dedupe_key(ActionKind::Email, Some("dom"), Some("c1"), "a@b.c", "bye")
        );
    }

    #[test]
    fn test_validate_dedupe_key() {
        let good = "a".repeat(64);
        assert!(validate_dedupe_key(&good).is_ok());
        assert!(validate_dedupe_key("short").is_err());
        let not_hex = "z".repeat(64);
        assert!(validate_dedupe_key(&not_hex).is_err());
        let too_long = "a".repeat(129);
        assert!(validate_dedupe_key(&too_long).is_err());
    }
}
