//! send-sms action

use serde::Deserialize;
use serde_json::json;
use voxway_core::phone::normalize_e164;
use voxway_core::{Result, VoxwayError};

use crate::actions::{
    charge_action, claim_action, complete_action, derive_dedupe_key, fail_action, refund_action,
    ActionResponse, Claim, NewAction,
};
use crate::state::AppState;
use crate::types::{ActionKind, Agent};

const MAX_SMS_CHARS: usize = 1600;

#[derive(Debug, Deserialize)]
pub struct SendSmsRequest {
    pub to: String,
    pub body: String,
    pub dedupe_key: Option<String>,
    pub call_id: Option<String>,
    pub call_domain: Option<String>,
}

pub async fn send_sms(state: &AppState, agent: &Agent, req: SendSmsRequest) -> Result<ActionResponse> {
    let to = normalize_e164(&req.to)?;
    if req.body.trim().is_empty() {
        return Err(VoxwayError::Validation("SMS body is required".into()));
    }
    if req.body.chars().count() > MAX_SMS_CHARS {
        return Err(VoxwayError::Validation(format!(
            "SMS body exceeds {} characters",
            MAX_SMS_CHARS
        )));
    }

    let dedupe_key = req.dedupe_key.clone().unwrap_or_else(|| {
        derive_dedupe_key(
            ActionKind::Sms,
            req.call_domain.as_deref(),
            req.call_id.as_deref(),
            &to,
            &req.body,
        )
    });

    let row_id = match claim_action(
        state,
        &NewAction {
            kind: ActionKind::Sms,
            user_id: agent.user_id,
            agent_id: agent.id,
            dedupe_key: &dedupe_key,
            call_id: req.call_id.as_deref(),
            call_domain: req.call_domain.as_deref(),
            recipient: &to,
            recipient_name: None,
            recipient_address: None,
            subject: None,
            body: Some(&req.body),
            template_id: None,
            raw_payload: None,
        },
    )
    .await?
    {
        Claim::Fresh(id) | Claim::Reopened(id) => id,
        Claim::AlreadySent(existing) => return Ok(ActionResponse::already_sent(&dedupe_key, &existing)),
        Claim::InProgress => {
            return Err(VoxwayError::Conflict(format!(
                "Send already in progress for {}",
                dedupe_key
            )))
        }
    };

    let cost = state.config.rates.sms_cost;
    let mut billing = charge_action(
        state,
        row_id,
        agent.user_id,
        cost,
        &format!("Agent SMS to {}", to),
    )
    .await?;

    match state.sms.send(&to, &req.body).await {
        Ok(message_id) => {
            complete_action(state, row_id, Some(&message_id), None, None).await?;
            tracing::info!(agent_id = %agent.id, to = %to, "Agent SMS sent");
            Ok(ActionResponse {
                success: true,
                status: "sent",
                dedupe_key,
                provider_message_id: Some(message_id),
                detail: None,
                billing,
            })
        }
        Err(e) => {
            refund_action(state, row_id, agent.user_id, cost, "SMS send refund", &mut billing).await;
            fail_action(state, row_id, &e.to_string()).await?;
            Err(VoxwayError::Provider(
                json!({
                    "message": format!("SMS send failed: {}", e),
                    "charged": billing.charged,
                    "refunded": billing.refunded,
                })
                .to_string(),
            ))
        }
    }
}
