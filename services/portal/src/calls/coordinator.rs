//! Inbound call coordinator
//!
//! The telephony provider posts a dial-in webhook per configured number. The
//! coordinator admits or blocks the call against the wallet, records the
//! call log, and starts the runtime session that actually answers.

use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;
use voxway_core::crypto::constant_time_eq;
use voxway_core::{Result, VoxwayError};

use crate::calls::memory;
use crate::numbers;
use crate::providers::runtime::{DialinSettings, SessionBody, SessionStart};
use crate::state::{db_err, AppState};
use crate::types::CallStatus;

#[derive(Debug, Clone, Deserialize)]
pub struct DialinRequest {
    #[serde(rename = "To")]
    pub to: String,
    #[serde(rename = "From")]
    pub from: String,
    #[serde(rename = "callId")]
    pub call_id: String,
    #[serde(rename = "callDomain")]
    pub call_domain: String,
}

/// Verify the optional shared secret carried in the webhook query string.
pub fn verify_dialin_token(state: &AppState, token: Option<&str>) -> Result<()> {
    match (&state.config.telephony.dialin_webhook_token, token) {
        (None, _) => Ok(()),
        (Some(expected), Some(got)) if constant_time_eq(expected.as_bytes(), got.as_bytes()) => {
            Ok(())
        }
        (Some(_), _) => Err(VoxwayError::Auth("Invalid dial-in token".into())),
    }
}

async fn upsert_call_log(
    state: &AppState,
    req: &DialinRequest,
    user_id: Uuid,
    agent_id: Uuid,
    number_id: Option<Uuid>,
    raw: &Value,
) -> Result<Uuid> {
    let conn = state.pool.get().await?;
    let row = conn
        .query_one(
            "INSERT INTO call_logs (id, call_id, call_domain, user_id, agent_id, \
             external_number_id, direction, from_number, to_number, status, raw_payload) \
             VALUES ($1, $2, $3, $4, $5, $6, 'inbound', $7, $8, $9, $10) \
             ON CONFLICT (call_domain, call_id) DO UPDATE SET raw_payload = EXCLUDED.raw_payload \
             RETURNING id",
            &[
                &Uuid::new_v4(),
                &req.call_id,
                &req.call_domain,
                &user_id,
                &agent_id,
                &number_id,
                &req.from,
                &req.to,
                &CallStatus::Pending.as_str(),
                &raw,
            ],
        )
        .await
        .map_err(db_err)?;
    Ok(row.get("id"))
}

async fn set_call_status(state: &AppState, log_id: Uuid, status: CallStatus) -> Result<()> {
    let conn = state.pool.get().await?;
    conn.execute(
        "UPDATE call_logs SET status = $1 WHERE id = $2",
        &[&status.as_str(), &log_id],
    )
    .await
    .map_err(db_err)?;
    Ok(())
}

/// Admit an inbound call. Errors map onto the webhook response the provider
/// expects: 404 unknown number, 402 blocked, 502 runtime start failure (which
/// the provider retries).
pub async fn handle_dialin(state: &AppState, req: DialinRequest, raw: Value) -> Result<()> {
    let agent = numbers::agent_for_dialed_number(state, &req.to)
        .await?
        .ok_or_else(|| VoxwayError::NotFound(format!("No agent for {}", req.to)))?;

    let number_id = {
        let conn = state.pool.get().await?;
        conn.query_opt(
            "SELECT id FROM external_numbers WHERE phone_number = $1",
            &[&req.to],
        )
        .await
        .map_err(db_err)?
        .map(|r| r.get::<_, Uuid>("id"))
    };

    let log_id = upsert_call_log(state, &req, agent.user_id, agent.id, number_id, &raw).await?;

    // Balance gate. A failed lookup blocks only in fail-closed mode.
    match state.ledger.balance(agent.user_id).await {
        Ok(balance) if balance < state.config.inbound.min_credit => {
            set_call_status(state, log_id, CallStatus::BlockedInsufficientFunds).await?;
            if state.config.inbound.disable_numbers_when_balance_low {
                numbers::disable_inbound_routing(state, agent.user_id).await.ok();
            }
            return Err(VoxwayError::InsufficientFunds(format!(
                "Balance {} below inbound minimum",
                balance
            )));
        }
        Ok(_) => {}
        Err(e) if state.config.inbound.balance_fail_closed => {
            set_call_status(state, log_id, CallStatus::BlockedBalanceCheckFailed).await?;
            return Err(VoxwayError::InsufficientFunds(format!(
                "Balance check failed: {}",
                e
            )));
        }
        Err(e) => {
            tracing::warn!(user_id = %agent.user_id, error = %e, "Balance check failed, admitting call");
        }
    }

    let caller_memory = if state.config.caller_memory.enable {
        memory::build_caller_memory(
            state,
            agent.user_id,
            agent.id,
            &req.from,
            (&req.call_domain, &req.call_id),
        )
        .await
        .unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Caller memory lookup failed");
            None
        })
    } else {
        None
    };

    let start = SessionStart {
        create_daily_room: true,
        daily_room_properties: None,
        body: SessionBody {
            mode: "dialin".to_string(),
            dialin_settings: Some(DialinSettings {
                call_id: req.call_id.clone(),
                call_domain: req.call_domain.clone(),
                to: req.to.clone(),
                from: req.from.clone(),
            }),
            dialout_settings: None,
            video_meeting: None,
            caller_memory,
            agent_config: None,
        },
    };

    match state
        .runtime
        .start_session(&agent.runtime_service_name, &start)
        .await
    {
        Ok(_) => {
            set_call_status(state, log_id, CallStatus::PipecatStarted).await?;
            tracing::info!(
                call_id = %req.call_id,
                call_domain = %req.call_domain,
                agent_id = %agent.id,
                "Inbound call session started"
            );
            Ok(())
        }
        Err(e) => {
            set_call_status(state, log_id, CallStatus::PipecatStartFailed).await?;
            Err(VoxwayError::Provider(format!("Session start failed: {}", e)))
        }
    }
}
