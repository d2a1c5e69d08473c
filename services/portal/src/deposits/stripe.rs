//! Stripe-style card processor
//!
//! Checkout Sessions carry `client_reference_id = "st-{user}-{billing}"`, so
//! the completion webhook maps straight back to the local row.

use rust_decimal::Decimal;
use serde_json::Value;
use std::time::Duration;
use uuid::Uuid;
use voxway_core::{Result, VoxwayError};

use crate::providers::{network_error, provider_error, PROVIDER_TIMEOUT_SECS};
use crate::state::AppState;

pub struct CheckoutSession {
    pub id: String,
    pub url: String,
}

fn http() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(PROVIDER_TIMEOUT_SECS))
        .build()
        .expect("reqwest client")
}

fn secret_key(state: &AppState) -> Result<String> {
    state
        .config
        .payments
        .stripe_secret_key
        .clone()
        .ok_or_else(|| VoxwayError::Config("Stripe is not configured".into()))
}

pub fn client_reference_id(user_id: Uuid, billing_id: Uuid) -> String {
    format!("st-{}-{}", user_id, billing_id)
}

/// Parse a `client_reference_id` back into its user and billing ids.
pub fn parse_client_reference_id(reference: &str) -> Option<(Uuid, Uuid)> {
    let rest = reference.strip_prefix("st-")?;
    // UUIDs are fixed-width, so split at the known boundary.
    if rest.len() != 73 {
        return None;
    }
    let (user, billing) = (rest.get(..36)?, rest.get(37..)?);
    Some((Uuid::parse_str(user).ok()?, Uuid::parse_str(billing).ok()?))
}

/// Create a hosted Checkout Session.
pub async fn create_checkout_session(
    state: &AppState,
    reference: &str,
    name: &str,
    amount_cents: i64,
    email: Option<&str>,
) -> Result<CheckoutSession> {
    let key = secret_key(state)?;
    let base = &state.config.payments.stripe_base_url;
    let portal = &state.config.public_base_url;

    let mut form: Vec<(String, String)> = vec![
        ("mode".into(), "payment".into()),
        ("client_reference_id".into(), reference.to_string()),
        ("line_items[0][quantity]".into(), "1".into()),
        ("line_items[0][price_data][currency]".into(), "usd".into()),
        (
            "line_items[0][price_data][unit_amount]".into(),
            amount_cents.to_string(),
        ),
        (
            "line_items[0][price_data][product_data][name]".into(),
            name.to_string(),
        ),
        ("success_url".into(), format!("{}/billing/success", portal)),
        ("cancel_url".into(), format!("{}/billing/cancelled", portal)),
    ];
    if let Some(email) = email {
        form.push(("customer_email".into(), email.to_string()));
    }

    let resp = http()
        .post(format!("{}/v1/checkout/sessions", base))
        .bearer_auth(&key)
        .form(&form)
        .send()
        .await
        .map_err(|e| network_error("stripe checkout", e))?;

    if !resp.status().is_success() {
        return Err(provider_error("stripe checkout", resp).await);
    }

    let value: Value = resp
        .json()
        .await
        .map_err(|e| network_error("stripe checkout response", e))?;

    Ok(CheckoutSession {
        id: value["id"].as_str().unwrap_or_default().to_string(),
        url: value["url"].as_str().unwrap_or_default().to_string(),
    })
}

/// Create a wallet deposit checkout.
pub async fn create_deposit_checkout(
    state: &AppState,
    user_id: Uuid,
    amount: Decimal,
    email: Option<&str>,
) -> Result<super::CheckoutLink> {
    let deposit_id = Uuid::new_v4();
    let reference = client_reference_id(user_id, deposit_id);
    let amount_cents = (amount * Decimal::from(100)).round().mantissa() as i64;

    super::insert_deposit(state, user_id, "stripe", deposit_id, &reference, amount, "USD").await?;

    let session = create_checkout_session(
        state,
        &reference,
        "Voxway balance top-up",
        amount_cents,
        email,
    )
    .await?;

    super::update_deposit_status(
        state,
        deposit_id,
        "pending",
        Some(&session.id),
        &Value::Null,
    )
    .await?;

    Ok(super::CheckoutLink {
        deposit_id,
        provider: "stripe".to_string(),
        url: session.url,
    })
}

/// Reduce a verified Stripe webhook.
pub async fn handle_webhook(state: &AppState, payload: &Value) -> Result<()> {
    let event_type = payload["type"].as_str().unwrap_or_default();
    let object = &payload["data"]["object"];
    let session_id = object["id"].as_str().unwrap_or_default();
    let reference = object["client_reference_id"].as_str().unwrap_or_default();

    let status = match event_type {
        "checkout.session.completed" => "completed",
        "checkout.session.expired" => "expired",
        _ => {
            tracing::debug!(event_type = %event_type, "Ignoring Stripe event");
            return Ok(());
        }
    };

    if !reference.is_empty() {
        if let Some(deposit) = super::find_deposit_by_order(state, "stripe", reference).await? {
            super::update_deposit_status(state, deposit.id, status, Some(session_id), payload)
                .await?;
            if status == "completed" {
                super::credit_deposit(state, &deposit).await?;
            }
            return Ok(());
        }
        if let Some((user_id, billing_id)) = parse_client_reference_id(reference) {
            tracing::warn!(
                user_id = %user_id,
                billing_id = %billing_id,
                "Stripe session references an unknown deposit"
            );
        }
    }

    // Agent-issued payment request keyed by the checkout session id.
    let settle_status = if status == "completed" { "COMPLETED" } else { "EXPIRED" };
    crate::actions::payment_link::settle_payment_request(state, "stripe", session_id, settle_status)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_reference_roundtrip() {
        let user = Uuid::new_v4();
        let billing = Uuid::new_v4();
        let reference = client_reference_id(user, billing);
        assert_eq!(parse_client_reference_id(&reference), Some((user, billing)));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_eq!(parse_client_reference_id("st-not-a-uuid"), None);
        assert_eq!(parse_client_reference_id("np-whatever"), None);
    }
}
