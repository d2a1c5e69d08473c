//! send-video-meeting-link action
//!
//! Starts a video meeting session on the agent's runtime service and hands
//! the room link back so the agent can relay it to the caller.

use serde::Deserialize;
use serde_json::json;
use voxway_core::{Result, VoxwayError};

use crate::actions::{
    charge_action, claim_action, complete_action, derive_dedupe_key, fail_action, refund_action,
    ActionResponse, Claim, NewAction,
};
use crate::providers::runtime::{SessionBody, SessionStart};
use crate::state::AppState;
use crate::types::{ActionKind, Agent};

#[derive(Debug, Deserialize)]
pub struct MeetingLinkRequest {
    /// Who the link is for; folded into the dedupe fingerprint.
    pub invitee: Option<String>,
    pub dedupe_key: Option<String>,
    pub call_id: Option<String>,
    pub call_domain: Option<String>,
}

pub async fn create_meeting_link(
    state: &AppState,
    agent: &Agent,
    req: MeetingLinkRequest,
) -> Result<ActionResponse> {
    let invitee = req.invitee.clone().unwrap_or_default();
    let dedupe_key = req.dedupe_key.clone().unwrap_or_else(|| {
        derive_dedupe_key(
            ActionKind::Meeting,
            req.call_domain.as_deref(),
            req.call_id.as_deref(),
            &invitee,
            "video_meeting",
        )
    });

    let row_id = match claim_action(
        state,
        &NewAction {
            kind: ActionKind::Meeting,
            user_id: agent.user_id,
            agent_id: agent.id,
            dedupe_key: &dedupe_key,
            call_id: req.call_id.as_deref(),
            call_domain: req.call_domain.as_deref(),
            recipient: &invitee,
            recipient_name: None,
            recipient_address: None,
            subject: None,
            body: None,
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
                "Meeting already being created for {}",
                dedupe_key
            )))
        }
    };

    let cost = state.config.rates.meeting_link_cost;
    let mut billing = charge_action(
        state,
        row_id,
        agent.user_id,
        cost,
        "Agent video meeting link",
    )
    .await?;

    let start = SessionStart {
        create_daily_room: true,
        daily_room_properties: None,
        body: SessionBody {
            mode: "video_meeting".to_string(),
            dialin_settings: None,
            dialout_settings: None,
            video_meeting: Some(true),
            caller_memory: None,
            agent_config: None,
        },
    };

    match state
        .runtime
        .start_session(&agent.runtime_service_name, &start)
        .await
    {
        Ok(session) => {
            let room_url = session.room_url.clone().unwrap_or_default();
            if room_url.is_empty() {
                refund_action(state, row_id, agent.user_id, cost, "Meeting link refund", &mut billing)
                    .await;
                fail_action(state, row_id, "Runtime returned no room URL").await?;
                return Err(VoxwayError::Provider("Runtime returned no room URL".into()));
            }
            complete_action(state, row_id, Some(&room_url), None, None).await?;
            tracing::info!(agent_id = %agent.id, "Video meeting created");
            Ok(ActionResponse {
                success: true,
                status: "created",
                dedupe_key,
                provider_message_id: Some(room_url.clone()),
                detail: Some(json!({ "room_url": room_url, "token": session.token })),
                billing,
            })
        }
        Err(e) => {
            refund_action(state, row_id, agent.user_id, cost, "Meeting link refund", &mut billing)
                .await;
            fail_action(state, row_id, &e.to_string()).await?;
            Err(VoxwayError::Provider(
                json!({
                    "message": format!("Meeting creation failed: {}", e),
                    "charged": billing.charged,
                    "refunded": billing.refunded,
                })
                .to_string(),
            ))
        }
    }
}
