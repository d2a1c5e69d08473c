//! send-physical-mail action
//!
//! The only action with a provider-quoted price: correct the address, render
//! the letter, get a cost estimate, charge estimate + markup, then create,
//! upload, and submit the print batch. A nonmailable address fails the action
//! before any money moves.

use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;
use voxway_core::{Result, VoxwayError};

use crate::actions::{
    charge_action, claim_action, complete_action, derive_dedupe_key, fail_action, refund_action,
    ActionResponse, Claim, NewAction,
};
use crate::billing::rates;
use crate::providers::printmail::MailAddress;
use crate::state::{db_err, AppState};
use crate::types::{ActionKind, Agent};

#[derive(Debug, Deserialize)]
pub struct SendMailRequest {
    pub recipient_name: String,
    pub organization: Option<String>,
    pub address1: String,
    pub address2: Option<String>,
    pub city: String,
    pub state: String,
    pub postal_code: String,
    /// Letter body. Ignored when a PDF template is supplied.
    #[serde(default)]
    pub body: String,
    pub template_id: Option<Uuid>,
    pub dedupe_key: Option<String>,
    pub call_id: Option<String>,
    pub call_domain: Option<String>,
}

/// Rough page estimate for the cost query.
fn estimate_pages(body: &str) -> u32 {
    const CHARS_PER_PAGE: usize = 3000;
    ((body.chars().count() / CHARS_PER_PAGE) + 1) as u32
}

/// Render a plain-text letter to PDF.
fn render_letter_pdf(
    font_dir: &str,
    font_family: &str,
    recipient: &MailAddress,
    body: &str,
) -> Result<Vec<u8>> {
    let font = genpdf::fonts::from_files(font_dir, font_family, None)
        .map_err(|e| VoxwayError::Internal(format!("Letter font load: {}", e)))?;

    let mut doc = genpdf::Document::new(font);
    doc.set_paper_size(genpdf::PaperSize::Letter);
    doc.set_title("Letter");

    let mut decorator = genpdf::SimplePageDecorator::new();
    decorator.set_margins(20);
    doc.set_page_decorator(decorator);

    doc.push(genpdf::elements::Paragraph::new(recipient.name.as_str()));
    if let Some(org) = &recipient.organization {
        doc.push(genpdf::elements::Paragraph::new(org.as_str()));
    }
    doc.push(genpdf::elements::Paragraph::new(recipient.address1.as_str()));
    if let Some(line2) = &recipient.address2 {
        doc.push(genpdf::elements::Paragraph::new(line2.as_str()));
    }
    doc.push(genpdf::elements::Paragraph::new(format!(
        "{}, {} {}",
        recipient.city, recipient.state, recipient.postal_code
    )));
    doc.push(genpdf::elements::Break::new(2));

    for line in body.lines() {
        if line.trim().is_empty() {
            doc.push(genpdf::elements::Break::new(1));
        } else {
            doc.push(genpdf::elements::Paragraph::new(line));
        }
    }

    let mut out = Vec::new();
    doc.render(&mut out)
        .map_err(|e| VoxwayError::Internal(format!("Letter render: {}", e)))?;
    Ok(out)
}

async fn load_template_pdf(state: &AppState, user_id: Uuid, template_id: Uuid) -> Result<Vec<u8>> {
    let conn = state.pool.get().await?;
    let row = conn
        .query_opt(
            "SELECT doc, original_filename FROM doc_templates WHERE id = $1 AND user_id = $2",
            &[&template_id, &user_id],
        )
        .await
        .map_err(db_err)?
        .ok_or_else(|| VoxwayError::NotFound(format!("Template {}", template_id)))?;

    let doc: Vec<u8> = row.get("doc");
    let filename: String = row.get("original_filename");
    if !filename.to_lowercase().ends_with(".pdf") || !doc.starts_with(b"%PDF") {
        return Err(VoxwayError::Validation(
            "Only PDF templates can be mailed".into(),
        ));
    }
    Ok(doc)
}

pub async fn send_physical_mail(
    state: &AppState,
    agent: &Agent,
    req: SendMailRequest,
) -> Result<ActionResponse> {
    if !state.printmail.enabled() {
        return Err(VoxwayError::Forbidden("Physical mail is not enabled".into()));
    }
    if req.body.trim().is_empty() && req.template_id.is_none() {
        return Err(VoxwayError::Validation("Letter body or template is required".into()));
    }

    let address = MailAddress {
        name: req.recipient_name.clone(),
        organization: req.organization.clone(),
        address1: req.address1.clone(),
        address2: req.address2.clone(),
        city: req.city.clone(),
        state: req.state.clone(),
        postal_code: req.postal_code.clone(),
    };
    let address_json = serde_json::to_value(&address)
        .map_err(|e| VoxwayError::Internal(e.to_string()))?;

    let template_id = req.template_id.or(agent.default_doc_template_id);
    let recipient_line = format!("{}, {}", req.recipient_name, req.address1);
    let dedupe_key = req.dedupe_key.clone().unwrap_or_else(|| {
        derive_dedupe_key(
            ActionKind::Mail,
            req.call_domain.as_deref(),
            req.call_id.as_deref(),
            &recipient_line,
            &format!("{}|{:?}", req.body, template_id),
        )
    });

    let row_id = match claim_action(
        state,
        &NewAction {
            kind: ActionKind::Mail,
            user_id: agent.user_id,
            agent_id: agent.id,
            dedupe_key: &dedupe_key,
            call_id: req.call_id.as_deref(),
            call_domain: req.call_domain.as_deref(),
            recipient: &recipient_line,
            recipient_name: Some(&req.recipient_name),
            recipient_address: Some(&address_json),
            subject: None,
            body: Some(&req.body),
            template_id,
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

    // Address correction happens before any charge.
    let corrected = match state.printmail.address_correction(&address).await {
        Ok(c) => c,
        Err(e) => {
            fail_action(state, row_id, &e.to_string()).await?;
            return Err(e);
        }
    };
    if corrected.nonmailable {
        fail_action(state, row_id, "Address is nonmailable").await?;
        return Err(VoxwayError::Validation("Address is nonmailable".into()));
    }

    let pdf = match template_id {
        Some(template_id) => match load_template_pdf(state, agent.user_id, template_id).await {
            Ok(pdf) => pdf,
            Err(e) => {
                fail_action(state, row_id, &e.to_string()).await?;
                return Err(e);
            }
        },
        None => {
            let mail_cfg = &state.config.mail;
            match render_letter_pdf(&mail_cfg.font_dir, &mail_cfg.font_family, &corrected.address, &req.body) {
                Ok(pdf) => pdf,
                Err(e) => {
                    fail_action(state, row_id, &e.to_string()).await?;
                    return Err(e);
                }
            }
        }
    };

    let estimate = match state.printmail.cost_estimate(estimate_pages(&req.body)).await {
        Ok(estimate) => estimate,
        Err(e) => {
            fail_action(state, row_id, &e.to_string()).await?;
            return Err(e);
        }
    };
    let total: Decimal = rates::physical_mail_cost(&state.config.rates, estimate);

    let mut billing = charge_action(
        state,
        row_id,
        agent.user_id,
        total,
        &format!("Physical mail to {}", recipient_line),
    )
    .await?;

    let submit = async {
        let batch_id = state.printmail.create_batch().await?;
        let filename = format!("letter-{}.pdf", row_id.simple());
        state.printmail.upload_pdf(&batch_id, &filename, pdf).await?;
        state
            .printmail
            .upload_manifest(&batch_id, &filename, &corrected.address)
            .await?;
        state.printmail.submit_batch(&batch_id).await?;
        let batch_status = state.printmail.batch_status(&batch_id).await.unwrap_or_default();
        let tracking = state.printmail.tracking(&batch_id).await.unwrap_or(None);
        Ok::<_, VoxwayError>((batch_id, batch_status, tracking))
    }
    .await;

    match submit {
        Ok((batch_id, batch_status, tracking)) => {
            complete_action(state, row_id, None, Some(&batch_id), tracking.as_deref()).await?;
            tracing::info!(
                agent_id = %agent.id,
                batch_id = %batch_id,
                "Physical mail submitted"
            );
            Ok(ActionResponse {
                success: true,
                status: "sent",
                dedupe_key,
                provider_message_id: Some(batch_id),
                detail: Some(json!({
                    "total_cost": total,
                    "batch_status": batch_status,
                    "tracking": tracking,
                })),
                billing,
            })
        }
        Err(e) => {
            refund_action(state, row_id, agent.user_id, total, "Physical mail refund", &mut billing)
                .await;
            fail_action(state, row_id, &e.to_string()).await?;
            Err(VoxwayError::Provider(
                json!({
                    "message": format!("Mail submission failed: {}", e),
                    "charged": billing.charged,
                    "refunded": billing.refunded,
                })
                .to_string(),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_pages() {
        assert_eq!(estimate_pages(""), 1);
        assert_eq!(estimate_pages(&"x".repeat(2999)), 1);
        assert_eq!(estimate_pages(&"x".repeat(3001)), 2);
    }
}
