//! AI agents
//!
//! Local agent rows plus the projection that keeps the external runtime's
//! secret set and service definition convergent with them.

pub mod projector;

use serde::Deserialize;
use uuid::Uuid;
use voxway_core::crypto::{random_token, sha256_hex};
use voxway_core::{Result, SealedSecret, VoxwayError};

use crate::state::{db_err, AppState};
use crate::types::Agent;

/// Fields a customer can set on an agent.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentInput {
    pub display_name: String,
    #[serde(default)]
    pub greeting: String,
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub voice_id: String,
    pub background_audio_url: Option<String>,
    pub background_audio_gain: Option<f32>,
    pub transfer_to_number: Option<String>,
    #[serde(default)]
    pub inbound_transfer_enabled: bool,
    pub inbound_transfer_number: Option<String>,
    pub default_doc_template_id: Option<Uuid>,
}

fn validate_input(input: &AgentInput) -> Result<()> {
    if input.display_name.trim().is_empty() {
        return Err(VoxwayError::Validation("Agent name is required".into()));
    }
    if let Some(url) = &input.background_audio_url {
        if !url.starts_with("https://") {
            return Err(VoxwayError::Validation(
                "Background audio URL must be https".into(),
            ));
        }
        if url.len() > 512 {
            return Err(VoxwayError::Validation(
                "Background audio URL must be at most 512 characters".into(),
            ));
        }
    }
    Ok(())
}

pub async fn get_agent(state: &AppState, user_id: Uuid, agent_id: Uuid) -> Result<Agent> {
    let conn = state.pool.get().await?;
    let row = conn
        .query_opt(
            "SELECT * FROM agents WHERE id = $1 AND user_id = $2",
            &[&agent_id, &user_id],
        )
        .await
        .map_err(db_err)?
        .ok_or_else(|| VoxwayError::NotFound(format!("Agent {}", agent_id)))?;
    Ok(Agent::from_row(&row))
}

pub async fn list_agents(state: &AppState, user_id: Uuid) -> Result<Vec<Agent>> {
    let conn = state.pool.get().await?;
    let rows = conn
        .query(
            "SELECT * FROM agents WHERE user_id = $1 ORDER BY created_at",
            &[&user_id],
        )
        .await
        .map_err(db_err)?;
    Ok(rows.iter().map(Agent::from_row).collect())
}

/// Find the agent whose runtime service matches a bearer token, by the
/// token's SHA-256. Used by the tool action endpoints.
pub async fn find_agent_by_token_hash(state: &AppState, token_hash: &str) -> Result<Option<Agent>> {
    let conn = state.pool.get().await?;
    let row = conn
        .query_opt(
            "SELECT * FROM agents WHERE action_token_hash = $1",
            &[&token_hash],
        )
        .await
        .map_err(db_err)?;
    Ok(row.as_ref().map(Agent::from_row))
}

/// Create an agent: insert the row with a fresh action token, then project
/// it to the runtime.
pub async fn create_agent(state: &AppState, user_id: Uuid, input: AgentInput) -> Result<Agent> {
    validate_input(&input)?;

    let key = state.require_key()?;
    let agent_id = Uuid::new_v4();
    let service_name = format!("vx-agent-{}", agent_id.simple());
    let secret_set_name = format!("vx-secrets-{}", agent_id.simple());

    let token = random_token(32);
    let token_hash = sha256_hex(token.as_bytes());
    let sealed = SealedSecret::seal(key, token.as_bytes())?;

    let conn = state.pool.get().await?;
    conn.execute(
        "INSERT INTO agents \
         (id, user_id, display_name, greeting, prompt, voice_id, \
          background_audio_url, background_audio_gain, transfer_to_number, \
          inbound_transfer_enabled, inbound_transfer_number, \
          runtime_service_name, runtime_secret_set_name, runtime_region, \
          action_token_hash, action_token_ciphertext, action_token_iv, action_token_tag, \
          default_doc_template_id) \
         VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17,$18,$19)",
        &[
            &agent_id,
            &user_id,
            &input.display_name,
            &input.greeting,
            &input.prompt,
            &input.voice_id,
            &input.background_audio_url,
            &input.background_audio_gain,
            &input.transfer_to_number,
            &input.inbound_transfer_enabled,
            &input.inbound_transfer_number,
            &service_name,
            &secret_set_name,
            &state.config.runtime.region,
            &token_hash,
            &sealed.ciphertext,
            &sealed.iv,
            &sealed.tag,
            &input.default_doc_template_id,
        ],
    )
    .await
    .map_err(db_err)?;
    drop(conn);

    let agent = get_agent(state, user_id, agent_id).await?;
    projector::project_agent(state, &agent).await?;
    Ok(agent)
}

/// Update an agent and re-project it.
pub async fn update_agent(
    state: &AppState,
    user_id: Uuid,
    agent_id: Uuid,
    input: AgentInput,
) -> Result<Agent> {
    validate_input(&input)?;

    let conn = state.pool.get().await?;
    let updated = conn
        .execute(
            "UPDATE agents SET display_name=$1, greeting=$2, prompt=$3, voice_id=$4, \
             background_audio_url=$5, background_audio_gain=$6, transfer_to_number=$7, \
             inbound_transfer_enabled=$8, inbound_transfer_number=$9, default_doc_template_id=$10 \
             WHERE id=$11 AND user_id=$12",
            &[
                &input.display_name,
                &input.greeting,
                &input.prompt,
                &input.voice_id,
                &input.background_audio_url,
                &input.background_audio_gain,
                &input.transfer_to_number,
                &input.inbound_transfer_enabled,
                &input.inbound_transfer_number,
                &input.default_doc_template_id,
                &agent_id,
                &user_id,
            ],
        )
        .await
        .map_err(db_err)?;
    if updated == 0 {
        return Err(VoxwayError::NotFound(format!("Agent {}", agent_id)));
    }
    drop(conn);

    let agent = get_agent(state, user_id, agent_id).await?;
    projector::project_agent(state, &agent).await?;
    Ok(agent)
}

/// Delete an agent: unassign any number (removing its dial-in routing),
/// tear down the runtime service and secret set, then drop the row.
pub async fn delete_agent(state: &AppState, user_id: Uuid, agent_id: Uuid) -> Result<()> {
    let agent = get_agent(state, user_id, agent_id).await?;

    let conn = state.pool.get().await?;
    let number_row = conn
        .query_opt(
            "SELECT id, dialin_config_id FROM external_numbers WHERE assigned_agent_id = $1",
            &[&agent_id],
        )
        .await
        .map_err(db_err)?;
    if let Some(row) = number_row {
        let number_id: Uuid = row.get("id");
        let dialin_config_id: Option<String> = row.get("dialin_config_id");
        if let Some(config_id) = dialin_config_id {
            if let Err(e) = state.telephony.delete_dialin_config(&config_id).await {
                tracing::warn!(agent_id = %agent_id, error = %e, "Dial-in config delete failed");
            }
        }
        conn.execute(
            "UPDATE external_numbers SET assigned_agent_id = NULL, dialin_config_id = NULL \
             WHERE id = $1",
            &[&number_id],
        )
        .await
        .map_err(db_err)?;
    }

    state
        .runtime
        .delete_agent_service(&agent.runtime_service_name)
        .await?;
    state
        .runtime
        .delete_secret_set(&agent.runtime_secret_set_name)
        .await?;

    conn.execute(
        "DELETE FROM agents WHERE id = $1 AND user_id = $2",
        &[&agent_id, &user_id],
    )
    .await
    .map_err(db_err)?;

    tracing::info!(agent_id = %agent_id, user_id = %user_id, "Agent deleted");
    Ok(())
}

/// Decrypt the agent's action token for projection into the runtime secrets.
pub async fn action_token_plaintext(state: &AppState, agent_id: Uuid) -> Result<String> {
    let key = state.require_key()?;
    let conn = state.pool.get().await?;
    let row = conn
        .query_opt(
            "SELECT action_token_ciphertext, action_token_iv, action_token_tag \
             FROM agents WHERE id = $1",
            &[&agent_id],
        )
        .await
        .map_err(db_err)?
        .ok_or_else(|| VoxwayError::NotFound(format!("Agent {}", agent_id)))?;

    let ciphertext: Option<Vec<u8>> = row.get("action_token_ciphertext");
    let iv: Option<Vec<u8>> = row.get("action_token_iv");
    let tag: Option<Vec<u8>> = row.get("action_token_tag");

    match (ciphertext, iv, tag) {
        (Some(ciphertext), Some(iv), Some(tag)) => {
            let sealed = SealedSecret { ciphertext, iv, tag };
            sealed.open_string(key)
        }
        _ => Err(VoxwayError::Internal(format!(
            "Agent {} has no action token",
            agent_id
        ))),
    }
}
