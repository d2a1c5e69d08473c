//! create-payment-link action
//!
//! Issues a hosted checkout link through the configured card processor and
//! records a payment request. No platform fee applies; the processor webhook
//! settles the request and credits the owning user's wallet.

use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;
use voxway_core::crypto::sha256_hex;
use voxway_core::{Result, VoxwayError};

use crate::config::CardProvider;
use crate::deposits::{square, stripe};
use crate::ledger::Adjustment;
use crate::state::{db_err, AppState};
use crate::types::{Agent, PaymentRequest, TransactionKind};

#[derive(Debug, Deserialize)]
pub struct PaymentLinkRequest {
    pub amount_cents: i64,
    pub description: String,
    pub customer_email: Option<String>,
    pub customer_phone: Option<String>,
    pub dedupe_key: Option<String>,
    pub call_id: Option<String>,
    pub call_domain: Option<String>,
}

#[derive(Debug, serde::Serialize)]
pub struct PaymentLinkResponse {
    pub success: bool,
    pub status: &'static str,
    pub payment_request_id: Uuid,
    pub payment_url: String,
}

async fn find_by_dedupe(state: &AppState, dedupe_key: &str) -> Result<Option<PaymentRequest>> {
    let conn = state.pool.get().await?;
    let row = conn
        .query_opt(
            "SELECT * FROM payment_requests WHERE dedupe_key = $1",
            &[&dedupe_key],
        )
        .await
        .map_err(db_err)?;
    Ok(row.as_ref().map(PaymentRequest::from_row))
}

pub async fn create_payment_link(
    state: &AppState,
    agent: &Agent,
    req: PaymentLinkRequest,
) -> Result<PaymentLinkResponse> {
    let payments = &state.config.payments;
    let amount = Decimal::from(req.amount_cents) / Decimal::from(100);
    if amount < payments.checkout_min_amount || amount > payments.checkout_max_amount {
        return Err(VoxwayError::Validation(format!(
            "Amount must be between {} and {}",
            payments.checkout_min_amount, payments.checkout_max_amount
        )));
    }
    if req.description.trim().is_empty() {
        return Err(VoxwayError::Validation("Description is required".into()));
    }

    let dedupe_key = req.dedupe_key.clone().unwrap_or_else(|| {
        sha256_hex(
            format!(
                "payment_link|{}|{}|{}|{}",
                req.call_domain.as_deref().unwrap_or(""),
                req.call_id.as_deref().unwrap_or(""),
                req.amount_cents,
                req.description,
            )
            .as_bytes(),
        )
    });

    if let Some(existing) = find_by_dedupe(state, &dedupe_key).await? {
        return Ok(PaymentLinkResponse {
            success: true,
            status: "already_created",
            payment_request_id: existing.id,
            payment_url: existing.payment_url,
        });
    }

    let request_id = Uuid::new_v4();
    let provider = match payments.card_provider {
        CardProvider::Square => "square",
        CardProvider::Stripe => "stripe",
    };

    {
        let conn = state.pool.get().await?;
        let inserted = conn
            .execute(
                "INSERT INTO payment_requests \
                 (id, user_id, provider, dedupe_key, amount_cents, currency, description, \
                  customer_email, customer_phone, call_id, call_domain) \
                 VALUES ($1,$2,$3,$4,$5,'USD',$6,$7,$8,$9,$10) \
                 ON CONFLICT (dedupe_key) DO NOTHING",
                &[
                    &request_id,
                    &agent.user_id,
                    &provider,
                    &dedupe_key,
                    &req.amount_cents,
                    &req.description,
                    &req.customer_email,
                    &req.customer_phone,
                    &req.call_id,
                    &req.call_domain,
                ],
            )
            .await
            .map_err(db_err)?;
        if inserted == 0 {
            // Lost the race to a concurrent identical request.
            if let Some(existing) = find_by_dedupe(state, &dedupe_key).await? {
                return Ok(PaymentLinkResponse {
                    success: true,
                    status: "already_created",
                    payment_request_id: existing.id,
                    payment_url: existing.payment_url,
                });
            }
        }
    }

    let provisioned = match payments.card_provider {
        CardProvider::Square => {
            square::create_payment_link(
                state,
                &request_id.to_string(),
                &req.description,
                req.amount_cents,
                req.customer_email.as_deref(),
                req.customer_phone.as_deref(),
            )
            .await
            .map(|link| (Some(link.order_id), Some(link.id), link.url))
        }
        CardProvider::Stripe => {
            let reference = stripe::client_reference_id(agent.user_id, request_id);
            stripe::create_checkout_session(
                state,
                &reference,
                &req.description,
                req.amount_cents,
                req.customer_email.as_deref(),
            )
            .await
            .map(|session| (None, Some(session.id), session.url))
        }
    };

    match provisioned {
        Ok((payment_id, checkout_id, url)) => {
            let conn = state.pool.get().await?;
            conn.execute(
                "UPDATE payment_requests SET provider_payment_id = $1, \
                 provider_checkout_id = $2, payment_url = $3 WHERE id = $4",
                &[&payment_id, &checkout_id, &url, &request_id],
            )
            .await
            .map_err(db_err)?;

            tracing::info!(
                agent_id = %agent.id,
                payment_request_id = %request_id,
                "Payment link created"
            );
            Ok(PaymentLinkResponse {
                success: true,
                status: "created",
                payment_request_id: request_id,
                payment_url: url,
            })
        }
        Err(e) => {
            let conn = state.pool.get().await?;
            conn.execute(
                "UPDATE payment_requests SET status = 'failed', \
                 metadata = jsonb_set(metadata, '{error}', $1) WHERE id = $2",
                &[&json!(e.to_string()), &request_id],
            )
            .await
            .map_err(db_err)?;
            Err(e)
        }
    }
}

/// Settle a payment request from a processor webhook. The conditional claim
/// out of `pending` makes settlement and the wallet credit exactly-once.
pub async fn settle_payment_request(
    state: &AppState,
    provider: &str,
    remote_key: &str,
    processor_status: &str,
) -> Result<()> {
    let column = match provider {
        "square" => "provider_payment_id",
        _ => "provider_checkout_id",
    };
    let status = match processor_status {
        "COMPLETED" => "completed",
        "FAILED" => "failed",
        "CANCELED" => "cancelled",
        "EXPIRED" => "expired",
        _ => return Ok(()),
    };

    let conn = state.pool.get().await?;
    let sql = format!(
        "UPDATE payment_requests SET status = $1, \
         paid_at = CASE WHEN $1 = 'completed' THEN now() ELSE paid_at END \
         WHERE provider = $2 AND {} = $3 AND status = 'pending' RETURNING *",
        column
    );
    let Some(row) = conn
        .query_opt(&sql, &[&status, &provider, &remote_key])
        .await
        .map_err(db_err)?
    else {
        return Ok(());
    };
    let request = PaymentRequest::from_row(&row);
    drop(conn);

    if status == "completed" {
        let amount = Decimal::from(request.amount_cents) / Decimal::from(100);
        let description = format!("Payment received: {}", request.description);
        state
            .ledger
            .adjust(&Adjustment {
                user_id: request.user_id,
                amount,
                description: &description,
                kind: TransactionKind::Credit,
                payment_method: Some(provider),
                reference_id: Some(&request.id.to_string()),
                strict: false,
            })
            .await?;
        tracing::info!(
            payment_request_id = %request.id,
            amount = %amount,
            "Payment request settled and credited"
        );
    }
    Ok(())
}
