//! Telephony/room provider client
//!
//! PSTN number inventory, pinless dial-in routing, and the domain webhook
//! subscription that feeds the call event reducer.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use voxway_core::{Result, VoxwayError};

use crate::config::TelephonyConfig;
use crate::providers::{network_error, provider_error, PROVIDER_TIMEOUT_SECS};

/// Numbers can only be released 28+ days after purchase; the manager surfaces
/// this to callers instead of letting the provider reject the release.
pub const RELEASE_MIN_AGE_DAYS: i64 = 28;

#[derive(Clone)]
pub struct TelephonyClient {
    http: reqwest::Client,
    config: TelephonyConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AvailableNumber {
    pub number: String,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PurchasedNumber {
    pub id: String,
    pub number: String,
}

#[derive(Debug, Clone, Deserialize)]
struct DialinConfigResponse {
    id: String,
}

impl TelephonyClient {
    pub fn new(config: TelephonyConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(PROVIDER_TIMEOUT_SECS))
            .build()
            .expect("reqwest client");
        Self { http, config }
    }

    pub async fn list_available_numbers(
        &self,
        region: Option<&str>,
        city: Option<&str>,
    ) -> Result<Vec<AvailableNumber>> {
        let mut req = self
            .http
            .get(format!("{}/list-available-numbers", self.config.base_url))
            .bearer_auth(&self.config.api_key);
        if let Some(region) = region {
            req = req.query(&[("region", region)]);
        }
        if let Some(city) = city {
            req = req.query(&[("city", city)]);
        }

        let resp = req.send().await.map_err(|e| network_error("number search", e))?;
        if !resp.status().is_success() {
            return Err(provider_error("number search", resp).await);
        }

        #[derive(Deserialize)]
        struct Listing {
            #[serde(default)]
            data: Vec<AvailableNumber>,
        }
        let listing: Listing = resp
            .json()
            .await
            .map_err(|e| network_error("number search response", e))?;
        Ok(listing.data)
    }

    pub async fn buy_phone_number(&self, number: Option<&str>) -> Result<PurchasedNumber> {
        let body = match number {
            Some(n) => json!({ "number": n }),
            None => json!({}),
        };
        let resp = self
            .http
            .post(format!("{}/buy-phone-number", self.config.base_url))
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| network_error("number purchase", e))?;

        if !resp.status().is_success() {
            return Err(provider_error("number purchase", resp).await);
        }

        resp.json::<PurchasedNumber>()
            .await
            .map_err(|e| network_error("number purchase response", e))
    }

    /// Release a number. The provider enforces a minimum holding period;
    /// check it locally first so the error is actionable.
    pub async fn release_phone_number(
        &self,
        provider_number_id: &str,
        purchased_at: DateTime<Utc>,
    ) -> Result<()> {
        let age_days = (Utc::now() - purchased_at).num_days();
        if age_days < RELEASE_MIN_AGE_DAYS {
            return Err(VoxwayError::Validation(format!(
                "Number can be released {} days after purchase (currently {} days old)",
                RELEASE_MIN_AGE_DAYS, age_days
            )));
        }

        let resp = self
            .http
            .delete(format!(
                "{}/release-phone-number/{}",
                self.config.base_url, provider_number_id
            ))
            .bearer_auth(&self.config.api_key)
            .send()
            .await
            .map_err(|e| network_error("number release", e))?;

        if !resp.status().is_success() && resp.status() != reqwest::StatusCode::NOT_FOUND {
            return Err(provider_error("number release", resp).await);
        }
        Ok(())
    }

    /// Create a pinless dial-in config routing a number to a room-creation
    /// callback URL. Returns the provider config id.
    pub async fn create_dialin_config(
        &self,
        phone_number: &str,
        room_creation_api: &str,
        name_prefix: &str,
    ) -> Result<String> {
        let resp = self
            .http
            .post(format!("{}/domain-dialin-config", self.config.base_url))
            .bearer_auth(&self.config.api_key)
            .json(&json!({
                "type": "pinless_dialin",
                "phone_number": phone_number,
                "room_creation_api": room_creation_api,
                "name_prefix": name_prefix,
            }))
            .send()
            .await
            .map_err(|e| network_error("dial-in config create", e))?;

        if !resp.status().is_success() {
            return Err(provider_error("dial-in config create", resp).await);
        }

        let config: DialinConfigResponse = resp
            .json()
            .await
            .map_err(|e| network_error("dial-in config response", e))?;
        Ok(config.id)
    }

    /// Delete a dial-in config. Absence is not an error.
    pub async fn delete_dialin_config(&self, config_id: &str) -> Result<()> {
        let resp = self
            .http
            .delete(format!("{}/domain-dialin-config", self.config.base_url))
            .bearer_auth(&self.config.api_key)
            .json(&json!({ "id": config_id }))
            .send()
            .await
            .map_err(|e| network_error("dial-in config delete", e))?;

        if !resp.status().is_success() && resp.status() != reqwest::StatusCode::NOT_FOUND {
            return Err(provider_error("dial-in config delete", resp).await);
        }
        Ok(())
    }

    /// Register the single domain webhook at startup, subscribing to dial-in
    /// and dial-out call events.
    pub async fn register_domain_webhook(&self, events_url: &str) -> Result<()> {
        let resp = self
            .http
            .post(format!("{}/webhooks", self.config.base_url))
            .bearer_auth(&self.config.api_key)
            .json(&json!({
                "url": events_url,
                "eventTypes": [
                    "dialin.connected", "dialin.stopped", "dialin.warning", "dialin.error",
                    "dialout.started", "dialout.connected", "dialout.answered",
                    "dialout.stopped", "dialout.error", "dialout.warning",
                ],
            }))
            .send()
            .await
            .map_err(|e| network_error("webhook registration", e))?;

        if !resp.status().is_success() {
            return Err(provider_error("webhook registration", resp).await);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_release_rejects_young_number() {
        let client = TelephonyClient::new(TelephonyConfig {
            base_url: "http://localhost:0".into(),
            api_key: String::new(),
            dialin_webhook_token: None,
        });
        let purchased_at = Utc::now() - chrono::Duration::days(5);
        let err = client
            .release_phone_number("num-1", purchased_at)
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 400);
    }
}
