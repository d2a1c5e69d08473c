//! Agent projector
//!
//! Materializes an agent's portal-side configuration into the runtime
//! provider's named secret set and service definition. Projection is
//! idempotent: both resources converge on the computed state every time.

use std::collections::BTreeMap;
use uuid::Uuid;
use voxway_core::crypto::{constant_time_eq, random_token};
use voxway_core::{Result, VoxwayError};

use crate::state::{db_err, AppState};
use crate::types::Agent;

/// Resolve the operator transfer destination: per-agent override first,
/// then the user's default.
async fn resolve_transfer_number(state: &AppState, agent: &Agent) -> Result<Option<String>> {
    if let Some(number) = &agent.transfer_to_number {
        return Ok(Some(number.clone()));
    }
    let conn = state.pool.get().await?;
    let row = conn
        .query_opt(
            "SELECT transfer_number FROM users WHERE id = $1",
            &[&agent.user_id],
        )
        .await
        .map_err(db_err)?;
    Ok(row.and_then(|r| r.get("transfer_number")))
}

/// Resolve the background audio URL: a tokenized portal URL when the user
/// uploaded a WAV, otherwise the user-specified https URL.
async fn resolve_background_audio_url(state: &AppState, agent: &Agent) -> Result<Option<String>> {
    let conn = state.pool.get().await?;
    let row = conn
        .query_opt(
            "SELECT access_token FROM agent_background_audio WHERE agent_id = $1",
            &[&agent.id],
        )
        .await
        .map_err(db_err)?;

    if let Some(row) = row {
        let token: String = row.get("access_token");
        return Ok(Some(format!(
            "{}/public/agents/{}/background-audio.wav?token={}",
            state.config.public_base_url, agent.id, token
        )));
    }
    Ok(agent.background_audio_url.clone())
}

/// Build the secret map the runtime session reads: platform provider keys,
/// the customer's agent configuration, and the portal callback credentials.
pub async fn build_secret_map(state: &AppState, agent: &Agent) -> Result<BTreeMap<String, String>> {
    let action_token = super::action_token_plaintext(state, agent.id).await?;
    let transfer = resolve_transfer_number(state, agent).await?;
    let audio_url = resolve_background_audio_url(state, agent).await?;

    let runtime = &state.config.runtime;
    let mut secrets = BTreeMap::new();
    secrets.insert("DAILY_API_KEY".to_string(), state.config.telephony.api_key.clone());
    secrets.insert("STT_API_KEY".to_string(), runtime.stt_api_key.clone());
    secrets.insert("TTS_API_KEY".to_string(), runtime.tts_api_key.clone());
    secrets.insert("LLM_API_KEY".to_string(), runtime.llm_api_key.clone());
    secrets.insert("AGENT_PROMPT".to_string(), agent.prompt.clone());
    secrets.insert("AGENT_GREETING".to_string(), agent.greeting.clone());
    secrets.insert("AGENT_VOICE_ID".to_string(), agent.voice_id.clone());
    secrets.insert(
        "PORTAL_BASE_URL".to_string(),
        state.config.public_base_url.clone(),
    );
    secrets.insert("PORTAL_ACTION_TOKEN".to_string(), action_token);
    if let Some(transfer) = transfer {
        secrets.insert("OPERATOR_TRANSFER_NUMBER".to_string(), transfer);
    }
    if agent.inbound_transfer_enabled {
        if let Some(number) = &agent.inbound_transfer_number {
            secrets.insert("INBOUND_TRANSFER_NUMBER".to_string(), number.clone());
        }
    }
    if let Some(url) = audio_url {
        secrets.insert("BACKGROUND_AUDIO_URL".to_string(), url);
        if let Some(gain) = agent.background_audio_gain {
            secrets.insert("BACKGROUND_AUDIO_GAIN".to_string(), gain.to_string());
        }
    }
    Ok(secrets)
}

/// Push the agent's secret set and service definition to the runtime.
pub async fn project_agent(state: &AppState, agent: &Agent) -> Result<()> {
    let secrets = build_secret_map(state, agent).await?;

    state
        .runtime
        .put_secret_set(&agent.runtime_secret_set_name, &secrets)
        .await?;
    state
        .runtime
        .upsert_agent_service(&agent.runtime_service_name, &agent.runtime_secret_set_name)
        .await?;

    tracing::info!(
        agent_id = %agent.id,
        service = %agent.runtime_service_name,
        "Agent projected to runtime"
    );
    Ok(())
}

const WAV_MAGIC: &[u8; 4] = b"RIFF";
const MAX_AUDIO_BYTES: usize = 20 * 1024 * 1024;

/// Store an uploaded ambience WAV under a fresh access token and re-project
/// so the runtime picks up the new URL.
pub async fn upload_background_audio(
    state: &AppState,
    user_id: Uuid,
    agent_id: Uuid,
    audio: Vec<u8>,
) -> Result<()> {
    if audio.len() < 4 || &audio[..4] != WAV_MAGIC {
        return Err(VoxwayError::Validation("Background audio must be a WAV file".into()));
    }
    if audio.len() > MAX_AUDIO_BYTES {
        return Err(VoxwayError::Validation("Background audio exceeds 20MB".into()));
    }

    let agent = super::get_agent(state, user_id, agent_id).await?;

    let token = random_token(16);
    let size = audio.len() as i64;
    let conn = state.pool.get().await?;
    conn.execute(
        "INSERT INTO agent_background_audio (agent_id, user_id, audio, access_token, mime, size_bytes) \
         VALUES ($1, $2, $3, $4, 'audio/wav', $5) \
         ON CONFLICT (agent_id) DO UPDATE \
         SET audio = EXCLUDED.audio, access_token = EXCLUDED.access_token, \
             size_bytes = EXCLUDED.size_bytes, created_at = now()",
        &[&agent_id, &user_id, &audio, &token, &size],
    )
    .await
    .map_err(db_err)?;
    drop(conn);

    project_agent(state, &agent).await
}

/// Fetch the ambience WAV for public serving; the access token gates it.
pub async fn get_background_audio(
    state: &AppState,
    agent_id: Uuid,
    token: &str,
) -> Result<(String, Vec<u8>)> {
    let conn = state.pool.get().await?;
    let row = conn
        .query_opt(
            "SELECT audio, access_token, mime FROM agent_background_audio WHERE agent_id = $1",
            &[&agent_id],
        )
        .await
        .map_err(db_err)?
        .ok_or_else(|| VoxwayError::NotFound("Background audio".into()))?;

    let expected: String = row.get("access_token");
    if !constant_time_eq(expected.as_bytes(), token.as_bytes()) {
        return Err(VoxwayError::Forbidden("Invalid audio token".into()));
    }

    Ok((row.get("mime"), row.get("audio")))
}
