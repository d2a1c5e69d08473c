//! Platform-originated notices and SMS
//!
//! Non-payment notices go out through a transactional email API under the
//! platform's own sender; agent SMS goes through the configured SMS gateway.

use serde_json::json;
use std::time::Duration;

use voxway_core::{Result, VoxwayError};

use crate::config::{PlatformEmailConfig, SmsConfig};
use crate::providers::{network_error, provider_error, PROVIDER_TIMEOUT_SECS};

#[derive(Clone)]
pub struct PlatformMailer {
    http: reqwest::Client,
    config: PlatformEmailConfig,
}

impl PlatformMailer {
    pub fn new(config: PlatformEmailConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(PROVIDER_TIMEOUT_SECS))
            .build()
            .expect("reqwest client");
        Self { http, config }
    }

    pub async fn send(&self, to: &str, subject: &str, body: &str) -> Result<()> {
        let api_key = match &self.config.api_key {
            Some(key) => key,
            None => {
                tracing::warn!(to = %to, subject = %subject, "Platform email unconfigured, notice dropped");
                return Ok(());
            }
        };

        let resp = self
            .http
            .post(format!("{}/email/send", self.config.base_url))
            .json(&json!({
                "api_key": api_key,
                "sender": self.config.from_address,
                "to": [to],
                "subject": subject,
                "text_body": body,
            }))
            .send()
            .await
            .map_err(|e| network_error("platform email", e))?;

        if !resp.status().is_success() {
            return Err(provider_error("platform email", resp).await);
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct SmsClient {
    http: reqwest::Client,
    config: SmsConfig,
}

impl SmsClient {
    pub fn new(config: SmsConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(PROVIDER_TIMEOUT_SECS))
            .build()
            .expect("reqwest client");
        Self { http, config }
    }

    /// Send an SMS. Returns the provider message id.
    pub async fn send(&self, to: &str, body: &str) -> Result<String> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .ok_or_else(|| VoxwayError::Config("SMS gateway not configured".into()))?;
        if self.config.base_url.is_empty() {
            return Err(VoxwayError::Config("SMS gateway not configured".into()));
        }

        let resp = self
            .http
            .post(format!("{}/messages", self.config.base_url))
            .bearer_auth(api_key)
            .json(&json!({
                "to": to,
                "from": self.config.from_number,
                "body": body,
            }))
            .send()
            .await
            .map_err(|e| network_error("sms send", e))?;

        if !resp.status().is_success() {
            return Err(provider_error("sms send", resp).await);
        }

        let value: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| network_error("sms send response", e))?;
        Ok(value["id"].as_str().unwrap_or_default().to_string())
    }
}
