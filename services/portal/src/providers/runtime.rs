//! Agent-runtime provider client
//!
//! The hosted runtime runs the voice pipeline. The portal keeps two named
//! resources per agent convergent with the local row: a secret set and a
//! service definition. Sessions (dial-in, dial-out, video meetings) start
//! through the public API.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::time::Duration;

use voxway_core::Result;

use crate::config::RuntimeConfig;
use crate::providers::{network_error, provider_error, PROVIDER_TIMEOUT_SECS};

#[derive(Clone)]
pub struct RuntimeClient {
    http: reqwest::Client,
    config: RuntimeConfig,
}

/// Session start request body. Exactly one of the mode payloads is set.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStart {
    #[serde(rename = "createDailyRoom")]
    pub create_daily_room: bool,
    #[serde(rename = "dailyRoomProperties", skip_serializing_if = "Option::is_none")]
    pub daily_room_properties: Option<Value>,
    pub body: SessionBody,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionBody {
    pub mode: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dialin_settings: Option<DialinSettings>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dialout_settings: Option<DialoutSettings>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_meeting: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caller_memory: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_config: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DialinSettings {
    pub call_id: String,
    pub call_domain: String,
    pub to: String,
    pub from: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DialoutSettings {
    pub phone_number: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caller_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_domain: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionResponse {
    pub room_url: Option<String>,
    pub token: Option<String>,
}

impl RuntimeClient {
    pub fn new(config: RuntimeConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(PROVIDER_TIMEOUT_SECS))
            .build()
            .expect("reqwest client");
        Self { http, config }
    }

    /// Replace the named secret set with exactly the given map.
    pub async fn put_secret_set(&self, name: &str, secrets: &BTreeMap<String, String>) -> Result<()> {
        let url = format!("{}/secrets/{}", self.config.base_url, name);
        let resp = self
            .http
            .put(&url)
            .bearer_auth(&self.config.private_api_key)
            .json(&json!({ "secrets": secrets }))
            .send()
            .await
            .map_err(|e| network_error("secret set update", e))?;

        if !resp.status().is_success() {
            return Err(provider_error("secret set update", resp).await);
        }
        Ok(())
    }

    /// Create or update the named agent service. Both paths converge the
    /// service on the computed definition, so the caller never has to know
    /// whether the service already exists.
    pub async fn upsert_agent_service(&self, name: &str, secret_set: &str) -> Result<()> {
        let definition = json!({
            "serviceName": name,
            "image": self.config.agent_image,
            "secretSet": secret_set,
            "region": self.config.region,
        });

        let resp = self
            .http
            .post(format!("{}/agents", self.config.base_url))
            .bearer_auth(&self.config.private_api_key)
            .json(&definition)
            .send()
            .await
            .map_err(|e| network_error("agent service create", e))?;

        if resp.status().is_success() {
            return Ok(());
        }

        // Already exists: update in place.
        if resp.status() == reqwest::StatusCode::CONFLICT {
            let resp = self
                .http
                .post(format!("{}/agents/{}", self.config.base_url, name))
                .bearer_auth(&self.config.private_api_key)
                .json(&definition)
                .send()
                .await
                .map_err(|e| network_error("agent service update", e))?;
            if !resp.status().is_success() {
                return Err(provider_error("agent service update", resp).await);
            }
            return Ok(());
        }

        Err(provider_error("agent service create", resp).await)
    }

    /// Delete a named agent service. Absence is not an error.
    pub async fn delete_agent_service(&self, name: &str) -> Result<()> {
        let resp = self
            .http
            .delete(format!("{}/agents/{}", self.config.base_url, name))
            .bearer_auth(&self.config.private_api_key)
            .send()
            .await
            .map_err(|e| network_error("agent service delete", e))?;

        if !resp.status().is_success() && resp.status() != reqwest::StatusCode::NOT_FOUND {
            return Err(provider_error("agent service delete", resp).await);
        }
        Ok(())
    }

    /// Delete a named secret set. Absence is not an error.
    pub async fn delete_secret_set(&self, name: &str) -> Result<()> {
        let resp = self
            .http
            .delete(format!("{}/secrets/{}", self.config.base_url, name))
            .bearer_auth(&self.config.private_api_key)
            .send()
            .await
            .map_err(|e| network_error("secret set delete", e))?;

        if !resp.status().is_success() && resp.status() != reqwest::StatusCode::NOT_FOUND {
            return Err(provider_error("secret set delete", resp).await);
        }
        Ok(())
    }

    /// Start a session on an agent's public endpoint.
    pub async fn start_session(&self, agent_name: &str, start: &SessionStart) -> Result<SessionResponse> {
        let url = format!("{}/public/{}/start", self.config.base_url, agent_name);
        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.config.public_api_key)
            .json(start)
            .send()
            .await
            .map_err(|e| network_error("session start", e))?;

        if !resp.status().is_success() {
            return Err(provider_error("session start", resp).await);
        }

        resp.json::<SessionResponse>()
            .await
            .map_err(|e| network_error("session start response", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_start_serializes_dialin() {
        let start = SessionStart {
            create_daily_room: true,
            daily_room_properties: None,
            body: SessionBody {
                mode: "dialin".to_string(),
                dialin_settings: Some(DialinSettings {
                    call_id: "abc".into(),
                    call_domain: "dom".into(),
                    to: "+18005551212".into(),
                    from: "+14155551212".into(),
                }),
                dialout_settings: None,
                video_meeting: None,
                caller_memory: None,
                agent_config: None,
            },
        };
        let v = serde_json::to_value(&start).unwrap();
        assert_eq!(v["createDailyRoom"], true);
        assert_eq!(v["body"]["mode"], "dialin");
        assert_eq!(v["body"]["dialin_settings"]["call_id"], "abc");
        assert!(v["body"].get("dialout_settings").is_none());
        assert!(v.get("dailyRoomProperties").is_none());
    }
}
