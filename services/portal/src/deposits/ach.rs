//! ACH processor
//!
//! Session-bearer API: log in, create an invoice, fetch its payment link.
//! Webhooks credit only on `PAID_IN_FULL`.

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

struct AchCredentials {
    base_url: String,
    username: String,
    password: String,
    dev_key: String,
}

fn credentials(state: &AppState) -> Result<AchCredentials> {
    let payments = &state.config.payments;
    match (
        payments.ach_username.clone(),
        payments.ach_password.clone(),
        payments.ach_dev_key.clone(),
    ) {
        (Some(username), Some(password), Some(dev_key)) if !payments.ach_base_url.is_empty() => {
            Ok(AchCredentials {
                base_url: payments.ach_base_url.clone(),
                username,
                password,
                dev_key,
            })
        }
        _ => Err(VoxwayError::Config("ACH processor is not configured".into())),
    }
}

/// Log in and return a session bearer token.
async fn login(creds: &AchCredentials) -> Result<String> {
    let resp = http()
        .post(format!("{}/v3/login", creds.base_url))
        .json(&json!({
            "userName": creds.username,
            "password": creds.password,
            "devKey": creds.dev_key,
        }))
        .send()
        .await
        .map_err(|e| network_error("ach login", e))?;

    if !resp.status().is_success() {
        return Err(provider_error("ach login", resp).await);
    }

    let value: Value = resp
        .json()
        .await
        .map_err(|e| network_error("ach login response", e))?;
    let token = value["sessionId"].as_str().unwrap_or_default().to_string();
    if token.is_empty() {
        return Err(VoxwayError::Provider("ACH login returned no session".into()));
    }
    Ok(token)
}

/// Create an ACH invoice + payment link for a deposit.
pub async fn create_deposit_invoice(
    state: &AppState,
    user_id: Uuid,
    amount: Decimal,
    email: &str,
) -> Result<super::CheckoutLink> {
    super::validate_amount(state, amount)?;
    let creds = credentials(state)?;
    let session = login(&creds).await?;

    let deposit_id = Uuid::new_v4();
    let order = format!("ach-{}-{}", user_id, deposit_id);

    super::insert_deposit(state, user_id, "ach", deposit_id, &order, amount, "USD").await?;

    let resp = http()
        .post(format!("{}/v3/invoices", creds.base_url))
        .bearer_auth(&session)
        .json(&json!({
            "referenceNumber": order,
            "amount": amount,
            "email": email,
            "description": "Voxway balance top-up",
        }))
        .send()
        .await
        .map_err(|e| network_error("ach invoice", e))?;

    if !resp.status().is_success() {
        return Err(provider_error("ach invoice", resp).await);
    }

    let value: Value = resp
        .json()
        .await
        .map_err(|e| network_error("ach invoice response", e))?;
    let invoice_id = value["id"]
        .as_str()
        .map(str::to_string)
        .or_else(|| value["id"].as_i64().map(|v| v.to_string()))
        .ok_or_else(|| VoxwayError::Provider("ACH invoice returned no id".into()))?;

    let resp = http()
        .post(format!("{}/v3/invoices/{}/payment-link", creds.base_url, invoice_id))
        .bearer_auth(&session)
        .send()
        .await
        .map_err(|e| network_error("ach payment link", e))?;

    if !resp.status().is_success() {
        return Err(provider_error("ach payment link", resp).await);
    }

    let value: Value = resp
        .json()
        .await
        .map_err(|e| network_error("ach payment link response", e))?;
    let url = value["url"]
        .as_str()
        .or_else(|| value["paymentLink"].as_str())
        .unwrap_or_default()
        .to_string();

    super::update_deposit_status(state, deposit_id, "pending", Some(&invoice_id), &Value::Null)
        .await?;

    Ok(super::CheckoutLink {
        deposit_id,
        provider: "ach".to_string(),
        url,
    })
}

/// Reduce a verified ACH webhook. Only `PAID_IN_FULL` credits.
pub async fn handle_webhook(state: &AppState, payload: &Value) -> Result<()> {
    let event_type = payload["eventType"]
        .as_str()
        .or_else(|| payload["type"].as_str())
        .unwrap_or_default();
    if !event_type.starts_with("invoice.") {
        tracing::debug!(event_type = %event_type, "Ignoring ACH event");
        return Ok(());
    }

    let invoice = &payload["invoice"];
    let status = invoice["status"].as_str().unwrap_or_default();
    let reference = invoice["referenceNumber"].as_str().unwrap_or_default();
    if reference.is_empty() {
        tracing::warn!("ACH webhook without reference number");
        return Ok(());
    }

    let Some(deposit) = super::find_deposit_by_order(state, "ach", reference).await? else {
        tracing::warn!(reference = %reference, "ACH webhook for unknown deposit");
        return Ok(());
    };

    let local_status = match status {
        "PAID_IN_FULL" => "completed",
        "CANCELLED" | "VOID" => "cancelled",
        _ => "pending",
    };
    super::update_deposit_status(state, deposit.id, local_status, None, payload).await?;

    if status == "PAID_IN_FULL" {
        super::credit_deposit(state, &deposit).await?;
    }
    Ok(())
}
