//! log-message action
//!
//! Appends a transcript turn for the current call. Free, and idempotent by
//! `(call_domain, call_id, message_id)`.

use serde::Deserialize;
use voxway_core::{Result, VoxwayError};

use crate::calls::log_call_message;
use crate::state::AppState;
use crate::types::Agent;

#[derive(Debug, Deserialize)]
pub struct LogMessageRequest {
    pub call_id: String,
    pub call_domain: String,
    pub message_id: String,
    pub role: String,
    pub content: String,
}

pub async fn log_message(state: &AppState, agent: &Agent, req: LogMessageRequest) -> Result<()> {
    if !matches!(req.role.as_str(), "user" | "assistant") {
        return Err(VoxwayError::Validation("Role must be user or assistant".into()));
    }
    if req.message_id.trim().is_empty() {
        return Err(VoxwayError::Validation("message_id is required".into()));
    }

    log_call_message(
        state,
        agent.user_id,
        Some(agent.id),
        &req.call_domain,
        &req.call_id,
        &req.message_id,
        &req.role,
        &req.content,
    )
    .await
}
