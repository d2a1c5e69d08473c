//! Square-style card processor
//!
//! Hosted payment links for wallet deposits and agent-issued payment
//! requests. Webhooks (`payment.updated`, `order.updated`) drive both row
//! kinds to their terminal states.

use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::time::Duration;
use uuid::Uuid;
use voxway_core::{Result, VoxwayError};

use crate::providers::{network_error, provider_error, PROVIDER_TIMEOUT_SECS};
use crate::state::{db_err, AppState};

pub struct PaymentLink {
    pub id: String,
    pub url: String,
    pub order_id: String,
}

fn http() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(PROVIDER_TIMEOUT_SECS))
        .build()
        .expect("reqwest client")
}

fn credentials(state: &AppState) -> Result<(String, String, String)> {
    let payments = &state.config.payments;
    let token = payments
        .square_access_token
        .clone()
        .ok_or_else(|| VoxwayError::Config("Square is not configured".into()))?;
    let location = payments
        .square_location_id
        .clone()
        .ok_or_else(|| VoxwayError::Config("Square location is not configured".into()))?;
    Ok((payments.square_base_url.clone(), token, location))
}

/// Create a hosted payment link.
pub async fn create_payment_link(
    state: &AppState,
    idempotency_key: &str,
    name: &str,
    amount_cents: i64,
    email: Option<&str>,
    phone: Option<&str>,
) -> Result<PaymentLink> {
    let (base_url, token, location_id) = credentials(state)?;

    let mut body = json!({
        "idempotency_key": idempotency_key,
        "quick_pay": {
            "name": name,
            "price_money": { "amount": amount_cents, "currency": "USD" },
            "location_id": location_id,
        },
        "checkout_options": {
            "allow_tipping": false,
        },
    });
    if email.is_some() || phone.is_some() {
        body["pre_populated_data"] = json!({
            "buyer_email": email,
            "buyer_phone_number": phone,
        });
    }

    let resp = http()
        .post(format!("{}/v2/online-checkout/payment-links", base_url))
        .bearer_auth(&token)
        .json(&body)
        .send()
        .await
        .map_err(|e| network_error("square payment link", e))?;

    if !resp.status().is_success() {
        return Err(provider_error("square payment link", resp).await);
    }

    let value: Value = resp
        .json()
        .await
        .map_err(|e| network_error("square payment link response", e))?;
    let link = &value["payment_link"];

    Ok(PaymentLink {
        id: link["id"].as_str().unwrap_or_default().to_string(),
        url: link["url"].as_str().unwrap_or_default().to_string(),
        order_id: link["order_id"].as_str().unwrap_or_default().to_string(),
    })
}

/// Create a wallet deposit checkout. The row is keyed by the order id Square
/// assigns, so the webhook can find it.
pub async fn create_deposit_checkout(
    state: &AppState,
    user_id: Uuid,
    amount: Decimal,
    email: Option<&str>,
) -> Result<super::CheckoutLink> {
    let deposit_id = Uuid::new_v4();
    let amount_cents = (amount * Decimal::from(100)).round().mantissa() as i64;

    let link = create_payment_link(
        state,
        &deposit_id.to_string(),
        "Voxway balance top-up",
        amount_cents,
        email,
        None,
    )
    .await?;

    super::insert_deposit(state, user_id, "square", deposit_id, &link.order_id, amount, "USD")
        .await?;

    {
        let conn = state.pool.get().await?;
        conn.execute(
            "UPDATE incoming_deposits SET remote_id = $1 WHERE id = $2",
            &[&link.id, &deposit_id],
        )
        .await
        .map_err(db_err)?;
    }

    Ok(super::CheckoutLink {
        deposit_id,
        provider: "square".to_string(),
        url: link.url,
    })
}

fn extract_status_and_order(payload: &Value) -> Option<(String, String)> {
    let object = &payload["data"]["object"];
    if let Some(payment) = object.get("payment") {
        let status = payment["status"].as_str()?.to_string();
        let order_id = payment["order_id"].as_str()?.to_string();
        return Some((status, order_id));
    }
    if let Some(order) = object.get("order") {
        let status = order["state"].as_str()?.to_string();
        let order_id = order["id"].as_str()?.to_string();
        return Some((status, order_id));
    }
    None
}

/// Reduce a verified Square webhook into deposit / payment-request state.
pub async fn handle_webhook(state: &AppState, payload: &Value) -> Result<()> {
    let event_type = payload["type"].as_str().unwrap_or_default();
    if event_type != "payment.updated" && event_type != "order.updated" {
        tracing::debug!(event_type = %event_type, "Ignoring Square event");
        return Ok(());
    }

    let Some((status, order_id)) = extract_status_and_order(payload) else {
        tracing::warn!("Square webhook without payment/order object");
        return Ok(());
    };

    if let Some(deposit) = super::find_deposit_by_order(state, "square", &order_id).await? {
        let local_status = match status.as_str() {
            "COMPLETED" => "completed",
            "FAILED" => "failed",
            "CANCELED" => "cancelled",
            _ => "pending",
        };
        super::update_deposit_status(state, deposit.id, local_status, None, payload).await?;
        if local_status == "completed" {
            super::credit_deposit(state, &deposit).await?;
        }
        return Ok(());
    }

    // Agent-issued payment request keyed by the same order id.
    crate::actions::payment_link::settle_payment_request(state, "square", &order_id, &status).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_from_payment_event() {
        let payload = json!({
            "type": "payment.updated",
            "data": { "object": { "payment": { "id": "p1", "order_id": "o1", "status": "COMPLETED" } } }
        });
        assert_eq!(
            extract_status_and_order(&payload),
            Some(("COMPLETED".to_string(), "o1".to_string()))
        );
    }

    #[test]
    fn test_extract_from_order_event() {
        let payload = json!({
            "type": "order.updated",
            "data": { "object": { "order": { "id": "o2", "state": "CANCELED" } } }
        });
        assert_eq!(
            extract_status_and_order(&payload),
            Some(("CANCELED".to_string(), "o2".to_string()))
        );
    }

    #[test]
    fn test_extract_missing_object() {
        assert_eq!(extract_status_and_order(&json!({"type": "payment.updated"})), None);
    }
}
