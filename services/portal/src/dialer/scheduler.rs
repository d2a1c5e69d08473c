//! Dialer scheduler
//!
//! A single polling loop claims pending leads under each running campaign's
//! concurrency cap and asks the runtime to place the calls. The claim is a
//! conditional UPDATE, so competing schedulers never double-dial a lead.

use chrono::Utc;
use tokio::sync::watch;
use uuid::Uuid;
use voxway_core::Result;

use crate::providers::runtime::{DialoutSettings, SessionBody, SessionStart};
use crate::state::{db_err, AppState};
use crate::types::{Campaign, Lead};

const MAX_CAMPAIGNS_PER_TICK: i64 = 200;
const MAX_CLAIMS_PER_CAMPAIGN: i64 = 50;
const MAX_CALL_ID_LEN: usize = 64;

/// How many leads one tick may claim for a campaign.
pub fn claimable(concurrency_limit: i64, in_progress: i64) -> i64 {
    (concurrency_limit - in_progress).max(0).min(MAX_CLAIMS_PER_CAMPAIGN)
}

fn to_base36(mut n: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    out.reverse();
    String::from_utf8(out).expect("base36 digits")
}

/// Provider-facing call id, unique per attempt and short enough for the wire.
pub fn build_call_id(campaign_id: Uuid, lead_id: Uuid, unix_ts: u64) -> String {
    let call_id = format!(
        "d{}l{}-{}",
        &campaign_id.simple().to_string()[..8],
        &lead_id.simple().to_string()[..8],
        to_base36(unix_ts),
    );
    debug_assert!(call_id.len() <= MAX_CALL_ID_LEN);
    call_id
}

pub fn call_domain_for(campaign_id: Uuid) -> String {
    format!("dialer-{}", campaign_id)
}

/// Run the dialer loop until shutdown flips.
pub async fn run(state: AppState, mut shutdown: watch::Receiver<bool>) {
    let interval = std::time::Duration::from_secs(state.config.dialer.worker_interval_seconds.max(1));
    tracing::info!(interval_secs = interval.as_secs(), "Dialer scheduler started");

    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    tracing::info!("Dialer scheduler stopping");
                    return;
                }
            }
        }

        if let Err(e) = tick(&state).await {
            tracing::error!(error = %e, "Dialer tick failed");
        }
    }
}

/// One scheduler pass over all running campaigns.
pub async fn tick(state: &AppState) -> Result<()> {
    let campaigns = {
        let conn = state.pool.get().await?;
        let rows = conn
            .query(
                "SELECT * FROM campaigns WHERE status = 'running' ORDER BY created_at LIMIT $1",
                &[&MAX_CAMPAIGNS_PER_TICK],
            )
            .await
            .map_err(db_err)?;
        rows.iter().map(Campaign::from_row).collect::<Vec<_>>()
    };

    for campaign in campaigns {
        if let Err(e) = tick_campaign(state, &campaign).await {
            tracing::error!(
                campaign_id = %campaign.id,
                user_id = %campaign.user_id,
                error = %e,
                "Campaign tick failed"
            );
        }
    }
    Ok(())
}

async fn tick_campaign(state: &AppState, campaign: &Campaign) -> Result<()> {
    let cap = (campaign.concurrency_limit as i64)
        .min(state.config.dialer.max_concurrency as i64)
        .max(state.config.dialer.min_concurrency as i64);

    let conn = state.pool.get().await?;
    let row = conn
        .query_one(
            "SELECT COUNT(*) AS in_progress FROM leads \
             WHERE campaign_id = $1 AND status IN ('queued','dialing')",
            &[&campaign.id],
        )
        .await
        .map_err(db_err)?;
    let in_progress: i64 = row.get("in_progress");

    let available = claimable(cap, in_progress);
    if available == 0 {
        return Ok(());
    }

    // Atomic claim: only rows still 'pending' move to 'queued'.
    let claimed = conn
        .query(
            "UPDATE leads SET status = 'queued', attempt_count = attempt_count + 1, \
             last_call_at = now() \
             WHERE id IN (SELECT id FROM leads \
                          WHERE campaign_id = $1 AND status = 'pending' \
                          ORDER BY created_at LIMIT $2 FOR UPDATE SKIP LOCKED) \
             RETURNING *",
            &[&campaign.id, &available],
        )
        .await
        .map_err(db_err)?;
    drop(conn);

    if claimed.is_empty() {
        return Ok(());
    }

    tracing::info!(
        campaign_id = %campaign.id,
        claimed = claimed.len(),
        in_progress = in_progress,
        "Leads claimed for dial-out"
    );

    for row in &claimed {
        let lead = Lead::from_row(row);
        if let Err(e) = dial_lead(state, campaign, &lead).await {
            tracing::error!(lead_id = %lead.id, error = %e, "Dial-out start failed");
        }
    }
    Ok(())
}

async fn dial_lead(state: &AppState, campaign: &Campaign, lead: &Lead) -> Result<()> {
    let call_id = build_call_id(campaign.id, lead.id, Utc::now().timestamp() as u64);
    let call_domain = call_domain_for(campaign.id);

    // The agent's assigned number is the caller id, when there is one.
    let (service_name, caller_id) = match campaign.ai_agent_id {
        Some(agent_id) => {
            let agent = crate::agents::get_agent(state, campaign.user_id, agent_id).await?;
            let conn = state.pool.get().await?;
            let caller_id = conn
                .query_opt(
                    "SELECT phone_number FROM external_numbers WHERE assigned_agent_id = $1",
                    &[&agent_id],
                )
                .await
                .map_err(db_err)?
                .map(|r| r.get::<_, String>("phone_number"));
            (agent.runtime_service_name, caller_id)
        }
        None => (state.config.runtime.announcer_service.clone(), None),
    };

    let audio_url = if campaign.ai_agent_id.is_none() && campaign.has_audio {
        let conn = state.pool.get().await?;
        conn.query_opt(
            "SELECT campaign_audio_token FROM campaigns WHERE id = $1",
            &[&campaign.id],
        )
        .await
        .map_err(db_err)?
        .and_then(|r| r.get::<_, Option<String>>("campaign_audio_token"))
        .map(|token| {
            format!(
                "{}/public/campaigns/{}/audio.wav?token={}",
                state.config.public_base_url, campaign.id, token
            )
        })
    } else {
        None
    };

    let log_id = Uuid::new_v4();
    {
        let conn = state.pool.get().await?;
        conn.execute(
            "INSERT INTO dialer_call_logs \
             (id, campaign_id, lead_id, user_id, ai_agent_id, call_id, status, metadata) \
             VALUES ($1, $2, $3, $4, $5, $6, 'queued', $7)",
            &[
                &log_id,
                &campaign.id,
                &lead.id,
                &campaign.user_id,
                &campaign.ai_agent_id,
                &call_id,
                &lead.metadata,
            ],
        )
        .await
        .map_err(db_err)?;
    }

    let start = SessionStart {
        create_daily_room: true,
        daily_room_properties: None,
        body: SessionBody {
            mode: "dialout".to_string(),
            dialin_settings: None,
            dialout_settings: Some(DialoutSettings {
                phone_number: lead.phone_number.clone(),
                caller_id,
                call_id: Some(call_id.clone()),
                call_domain: Some(call_domain),
                audio_url,
            }),
            video_meeting: None,
            caller_memory: None,
            agent_config: None,
        },
    };

    match state.runtime.start_session(&service_name, &start).await {
        Ok(_) => {
            let conn = state.pool.get().await?;
            conn.execute(
                "UPDATE leads SET status = 'dialing' WHERE id = $1 AND status = 'queued'",
                &[&lead.id],
            )
            .await
            .map_err(db_err)?;
            conn.execute(
                "UPDATE dialer_call_logs SET status = 'dialing' WHERE id = $1",
                &[&log_id],
            )
            .await
            .map_err(db_err)?;
            tracing::info!(call_id = %call_id, lead_id = %lead.id, "Dial-out started");
            Ok(())
        }
        Err(e) => {
            let conn = state.pool.get().await?;
            conn.execute(
                "UPDATE leads SET status = 'failed' WHERE id = $1",
                &[&lead.id],
            )
            .await
            .map_err(db_err)?;
            conn.execute(
                "UPDATE dialer_call_logs SET status = 'error', notes = $1 WHERE id = $2",
                &[&e.to_string(), &log_id],
            )
            .await
            .map_err(db_err)?;
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claimable_respects_cap() {
        // 10 pending, cap 3, none in progress: claim exactly 3.
        assert_eq!(claimable(3, 0), 3);
        // Still 3 in progress: claim nothing.
        assert_eq!(claimable(3, 3), 0);
        // Over cap (e.g. cap lowered mid-campaign): never negative.
        assert_eq!(claimable(3, 5), 0);
    }

    #[test]
    fn test_claimable_batch_limit() {
        assert_eq!(claimable(2000, 0), MAX_CLAIMS_PER_CAMPAIGN);
    }

    #[test]
    fn test_to_base36() {
        assert_eq!(to_base36(0), "0");
        assert_eq!(to_base36(35), "z");
        assert_eq!(to_base36(36), "10");
        assert_eq!(to_base36(1_770_000_000), "t9t8qo");
    }

    #[test]
    fn test_build_call_id_shape() {
        let campaign = Uuid::new_v4();
        let lead = Uuid::new_v4();
        let call_id = build_call_id(campaign, lead, 1_770_000_000);
        assert!(call_id.len() <= MAX_CALL_ID_LEN);
        assert!(call_id.starts_with('d'));
        assert!(call_id.contains('l'));
        assert!(call_id.contains('-'));
    }

    #[test]
    fn test_call_domain_shape() {
        let campaign = Uuid::new_v4();
        assert!(call_domain_for(campaign).starts_with("dialer-"));
    }
}
