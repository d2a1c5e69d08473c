//! Crypto processor
//!
//! Invoice-based deposits with `order_id = "np-{user}-{billing}"`. IPN posts
//! walk the invoice through its states; only `finished` credits the wallet.

use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::time::Duration;
use uuid::Uuid;
use voxway_core::{Result, VoxwayError};

use crate::providers::{network_error, provider_error, PROVIDER_TIMEOUT_SECS};
use crate::state::AppState;

fn http() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(PROVIDER_TIMEOUT_SECS))
        .build()
        .expect("reqwest client")
}

pub fn order_id(user_id: Uuid, billing_id: Uuid) -> String {
    format!("np-{}-{}", user_id, billing_id)
}

/// Create a crypto invoice and return the hosted payment URL.
pub async fn create_deposit_invoice(
    state: &AppState,
    user_id: Uuid,
    amount: Decimal,
) -> Result<super::CheckoutLink> {
    super::validate_amount(state, amount)?;
    let payments = &state.config.payments;
    let api_key = payments
        .crypto_api_key
        .clone()
        .ok_or_else(|| VoxwayError::Config("Crypto processor is not configured".into()))?;

    let deposit_id = Uuid::new_v4();
    let order = order_id(user_id, deposit_id);
    let portal = &state.config.public_base_url;

    super::insert_deposit(state, user_id, "crypto", deposit_id, &order, amount, "USD").await?;

    let resp = http()
        .post(format!("{}/invoice", payments.crypto_base_url))
        .header("x-api-key", &api_key)
        .json(&json!({
            "price_amount": amount,
            "price_currency": "usd",
            "order_id": order,
            "ipn_callback_url": format!("{}/webhooks/crypto", portal),
            "success_url": format!("{}/billing/success", portal),
            "cancel_url": format!("{}/billing/cancelled", portal),
        }))
        .send()
        .await
        .map_err(|e| network_error("crypto invoice", e))?;

    if !resp.status().is_success() {
        return Err(provider_error("crypto invoice", resp).await);
    }

    let value: Value = resp
        .json()
        .await
        .map_err(|e| network_error("crypto invoice response", e))?;
    let invoice_id = value["id"].as_str().map(str::to_string).or_else(|| {
        value["id"].as_i64().map(|v| v.to_string())
    });
    let url = value["invoice_url"].as_str().unwrap_or_default().to_string();

    super::update_deposit_status(state, deposit_id, "waiting", invoice_id.as_deref(), &Value::Null)
        .await?;

    Ok(super::CheckoutLink {
        deposit_id,
        provider: "crypto".to_string(),
        url,
    })
}

/// Reduce a verified IPN post. Statuses pass through; `finished` credits.
pub async fn handle_ipn(state: &AppState, payload: &Value) -> Result<()> {
    let status = payload["payment_status"].as_str().unwrap_or_default();
    let order = payload["order_id"].as_str().unwrap_or_default();
    if order.is_empty() {
        tracing::warn!("Crypto IPN without order_id");
        return Ok(());
    }

    let Some(deposit) = super::find_deposit_by_order(state, "crypto", order).await? else {
        tracing::warn!(order_id = %order, "Crypto IPN for unknown deposit");
        return Ok(());
    };

    let known = [
        "waiting",
        "confirming",
        "confirmed",
        "sending",
        "finished",
        "failed",
        "expired",
        "refunded",
    ];
    if !known.contains(&status) {
        tracing::debug!(status = %status, "Ignoring unknown crypto IPN status");
        return Ok(());
    }

    super::update_deposit_status(state, deposit.id, status, None, payload).await?;

    if status == "finished" {
        super::credit_deposit(state, &deposit).await?;
    }
    Ok(())
}
