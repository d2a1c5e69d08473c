//! Calls
//!
//! Inbound call admission ([`coordinator`]), provider event reduction
//! ([`reducer`]), and returning-caller memory ([`memory`]). Finished calls
//! are mirrored into the unified CDR table for reporting.

pub mod coordinator;
pub mod memory;
pub mod reducer;

use uuid::Uuid;
use voxway_core::Result;

use crate::state::{db_err, AppState};
use crate::types::CallLog;

/// Mirror a finished call into the unified CDR table, once per source row.
pub async fn mirror_cdr(state: &AppState, call: &CallLog) -> Result<()> {
    let conn = state.pool.get().await?;
    conn.execute(
        "INSERT INTO cdrs (id, user_id, kind, source_id, call_id, call_domain, \
         from_number, to_number, time_start, time_end, billsec, price, status) \
         VALUES ($1, $2, 'ai_inbound', $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) \
         ON CONFLICT (source_id) DO UPDATE \
         SET time_end = EXCLUDED.time_end, billsec = EXCLUDED.billsec, \
             price = EXCLUDED.price, status = EXCLUDED.status",
        &[
            &Uuid::new_v4(),
            &call.user_id,
            &call.id,
            &call.call_id,
            &call.call_domain,
            &call.from_number,
            &call.to_number,
            &call.time_start,
            &call.time_end,
            &call.billsec.unwrap_or(0),
            &call.price,
            &call.status,
        ],
    )
    .await
    .map_err(db_err)?;
    Ok(())
}

/// Append a transcript turn. Duplicate message ids are absorbed so runtime
/// retries never double-log.
pub async fn log_call_message(
    state: &AppState,
    user_id: Uuid,
    agent_id: Option<Uuid>,
    call_domain: &str,
    call_id: &str,
    message_id: &str,
    role: &str,
    content: &str,
) -> Result<()> {
    const MAX_CONTENT_CHARS: usize = 8000;
    let content: String = content.chars().take(MAX_CONTENT_CHARS).collect();

    let conn = state.pool.get().await?;
    conn.execute(
        "INSERT INTO call_messages (id, user_id, agent_id, call_domain, call_id, message_id, role, content) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
         ON CONFLICT (call_domain, call_id, message_id) DO NOTHING",
        &[
            &Uuid::new_v4(),
            &user_id,
            &agent_id,
            &call_domain,
            &call_id,
            &message_id,
            &role,
            &content,
        ],
    )
    .await
    .map_err(db_err)?;
    Ok(())
}
