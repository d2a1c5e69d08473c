//! send-email action

use serde::Deserialize;
use serde_json::json;
use voxway_core::{Result, VoxwayError};

use crate::actions::{
    charge_action, claim_action, complete_action, derive_dedupe_key, fail_action, refund_action,
    ActionResponse, Claim, NewAction,
};
use crate::providers::smtp::{send_user_email, EmailAttachment, OutgoingEmail};
use crate::state::{db_err, AppState};
use crate::types::{ActionKind, Agent, UserSmtpSettings};

#[derive(Debug, Deserialize)]
pub struct SendEmailRequest {
    pub to: String,
    pub subject: String,
    pub body: String,
    pub dedupe_key: Option<String>,
    pub call_id: Option<String>,
    pub call_domain: Option<String>,
    #[serde(default)]
    pub attachments: Vec<AttachmentInput>,
}

#[derive(Debug, Deserialize)]
pub struct AttachmentInput {
    pub filename: String,
    #[serde(default = "default_mime")]
    pub mime: String,
    pub content_base64: String,
}

fn default_mime() -> String {
    "application/octet-stream".to_string()
}

async fn load_smtp_settings(state: &AppState, user_id: uuid::Uuid) -> Result<UserSmtpSettings> {
    let conn = state.pool.get().await?;
    let row = conn
        .query_opt(
            "SELECT * FROM user_smtp_settings WHERE user_id = $1",
            &[&user_id],
        )
        .await
        .map_err(db_err)?
        .ok_or_else(|| VoxwayError::Validation("SMTP settings are not configured".into()))?;
    Ok(UserSmtpSettings::from_row(&row))
}

pub async fn send_email(
    state: &AppState,
    agent: &Agent,
    req: SendEmailRequest,
) -> Result<ActionResponse> {
    if req.to.trim().is_empty() || !req.to.contains('@') {
        return Err(VoxwayError::Validation("Invalid recipient address".into()));
    }

    // Decode attachments up front so a malformed payload cannot fail the
    // action after it has been charged.
    let mut attachments = Vec::with_capacity(req.attachments.len());
    for attachment in &req.attachments {
        use base64::Engine;
        let content = base64::engine::general_purpose::STANDARD
            .decode(&attachment.content_base64)
            .map_err(|_| VoxwayError::Validation("Attachment is not valid base64".into()))?;
        attachments.push(EmailAttachment {
            filename: attachment.filename.clone(),
            mime: attachment.mime.clone(),
            content,
        });
    }

    let dedupe_key = req.dedupe_key.clone().unwrap_or_else(|| {
        derive_dedupe_key(
            ActionKind::Email,
            req.call_domain.as_deref(),
            req.call_id.as_deref(),
            &req.to,
            &format!("{}|{}", req.subject, req.body),
        )
    });

    let row_id = match claim_action(
        state,
        &NewAction {
            kind: ActionKind::Email,
            user_id: agent.user_id,
            agent_id: agent.id,
            dedupe_key: &dedupe_key,
            call_id: req.call_id.as_deref(),
            call_domain: req.call_domain.as_deref(),
            recipient: &req.to,
            recipient_name: None,
            recipient_address: None,
            subject: Some(&req.subject),
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

    let cost = state.config.rates.email_cost;
    let mut billing = charge_action(
        state,
        row_id,
        agent.user_id,
        cost,
        &format!("Agent email to {}", req.to),
    )
    .await?;

    let smtp_settings = match load_smtp_settings(state, agent.user_id).await {
        Ok(s) => s,
        Err(e) => {
            refund_action(state, row_id, agent.user_id, cost, "Email send refund", &mut billing).await;
            fail_action(state, row_id, &e.to_string()).await?;
            return Err(e);
        }
    };
    let key = match state.require_key() {
        Ok(key) => key,
        Err(e) => {
            refund_action(state, row_id, agent.user_id, cost, "Email send refund", &mut billing).await;
            fail_action(state, row_id, &e.to_string()).await?;
            return Err(e);
        }
    };

    let outgoing = OutgoingEmail {
        to: req.to.clone(),
        subject: req.subject.clone(),
        body_text: req.body.clone(),
        attachments,
    };

    match send_user_email(&smtp_settings, key, &outgoing).await {
        Ok(()) => {
            complete_action(state, row_id, None, None, None).await?;
            tracing::info!(agent_id = %agent.id, to = %req.to, "Agent email sent");
            Ok(ActionResponse {
                success: true,
                status: "sent",
                dedupe_key,
                provider_message_id: None,
                detail: None,
                billing,
            })
        }
        Err(e) => {
            refund_action(state, row_id, agent.user_id, cost, "Email send refund", &mut billing).await;
            fail_action(state, row_id, &e.to_string()).await?;
            Err(VoxwayError::Provider(
                json!({
                    "message": format!("Email send failed: {}", e),
                    "charged": billing.charged,
                    "refunded": billing.refunded,
                })
                .to_string(),
            ))
        }
    }
}
