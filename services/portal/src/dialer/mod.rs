//! Outbound dialer
//!
//! Campaigns own leads; the polling scheduler in [`scheduler`] claims pending
//! leads under each campaign's concurrency cap and asks the runtime to place
//! the calls. Dial-out events reduce back into lead status here.

pub mod scheduler;

use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;
use voxway_core::crypto::random_token;
use voxway_core::phone::normalize_e164;
use voxway_core::{Result, VoxwayError};

use crate::billing::{rates, Billable};
use crate::calls::reducer::{CallEvent, EventKind};
use crate::state::{db_err, AppState};
use crate::types::{Campaign, CampaignStatus, Lead, LeadStatus};

pub const CONCURRENCY_MIN: i32 = 1;
pub const CONCURRENCY_MAX: i32 = 20;

#[derive(Debug, Clone, Deserialize)]
pub struct CampaignInput {
    pub name: String,
    pub ai_agent_id: Option<Uuid>,
    pub concurrency_limit: i32,
}

fn validate_campaign(input: &CampaignInput) -> Result<()> {
    if input.name.trim().is_empty() {
        return Err(VoxwayError::Validation("Campaign name is required".into()));
    }
    if !(CONCURRENCY_MIN..=CONCURRENCY_MAX).contains(&input.concurrency_limit) {
        return Err(VoxwayError::Validation(format!(
            "Concurrency limit must be between {} and {}",
            CONCURRENCY_MIN, CONCURRENCY_MAX
        )));
    }
    Ok(())
}

pub async fn get_campaign(state: &AppState, user_id: Uuid, campaign_id: Uuid) -> Result<Campaign> {
    let conn = state.pool.get().await?;
    let row = conn
        .query_opt(
            "SELECT * FROM campaigns WHERE id = $1 AND user_id = $2 AND status <> 'deleted'",
            &[&campaign_id, &user_id],
        )
        .await
        .map_err(db_err)?
        .ok_or_else(|| VoxwayError::NotFound(format!("Campaign {}", campaign_id)))?;
    Ok(Campaign::from_row(&row))
}

pub async fn create_campaign(
    state: &AppState,
    user_id: Uuid,
    input: CampaignInput,
) -> Result<Campaign> {
    validate_campaign(&input)?;

    // AI campaigns must point at the user's own agent.
    if let Some(agent_id) = input.ai_agent_id {
        crate::agents::get_agent(state, user_id, agent_id).await?;
    }

    let campaign_id = Uuid::new_v4();
    let conn = state.pool.get().await?;
    conn.execute(
        "INSERT INTO campaigns (id, user_id, name, ai_agent_id, concurrency_limit) \
         VALUES ($1, $2, $3, $4, $5)",
        &[
            &campaign_id,
            &user_id,
            &input.name,
            &input.ai_agent_id,
            &input.concurrency_limit,
        ],
    )
    .await
    .map_err(db_err)?;
    drop(conn);

    get_campaign(state, user_id, campaign_id).await
}

/// Campaign lifecycle transitions: start, pause, complete, delete.
pub async fn set_campaign_status(
    state: &AppState,
    user_id: Uuid,
    campaign_id: Uuid,
    status: CampaignStatus,
) -> Result<Campaign> {
    let campaign = get_campaign(state, user_id, campaign_id).await?;

    if status == CampaignStatus::Running && campaign.ai_agent_id.is_none() && !campaign.has_audio {
        return Err(VoxwayError::Validation(
            "Campaign needs an agent or an audio message before starting".into(),
        ));
    }

    let conn = state.pool.get().await?;
    let sql = match status {
        CampaignStatus::Running => {
            "UPDATE campaigns SET status = $1, last_started_at = now(), updated_at = now() \
             WHERE id = $2 AND user_id = $3"
        }
        CampaignStatus::Paused => {
            "UPDATE campaigns SET status = $1, last_paused_at = now(), updated_at = now() \
             WHERE id = $2 AND user_id = $3"
        }
        _ => "UPDATE campaigns SET status = $1, updated_at = now() WHERE id = $2 AND user_id = $3",
    };
    conn.execute(sql, &[&status.as_str(), &campaign_id, &user_id])
        .await
        .map_err(db_err)?;
    drop(conn);

    get_campaign(state, user_id, campaign_id).await
}

/// Store the announcement audio for an audio-only campaign.
pub async fn upload_campaign_audio(
    state: &AppState,
    user_id: Uuid,
    campaign_id: Uuid,
    audio: Vec<u8>,
) -> Result<()> {
    if audio.len() < 4 || &audio[..4] != b"RIFF" {
        return Err(VoxwayError::Validation("Campaign audio must be a WAV file".into()));
    }
    get_campaign(state, user_id, campaign_id).await?;

    let token = random_token(16);
    let conn = state.pool.get().await?;
    conn.execute(
        "UPDATE campaigns SET campaign_audio = $1, campaign_audio_token = $2, updated_at = now() \
         WHERE id = $3 AND user_id = $4",
        &[&audio, &token, &campaign_id, &user_id],
    )
    .await
    .map_err(db_err)?;
    Ok(())
}

/// Fetch campaign audio for public serving; the access token gates it.
pub async fn get_campaign_audio(
    state: &AppState,
    campaign_id: Uuid,
    token: &str,
) -> Result<Vec<u8>> {
    let conn = state.pool.get().await?;
    let row = conn
        .query_opt(
            "SELECT campaign_audio, campaign_audio_token FROM campaigns WHERE id = $1",
            &[&campaign_id],
        )
        .await
        .map_err(db_err)?
        .ok_or_else(|| VoxwayError::NotFound("Campaign audio".into()))?;

    let expected: Option<String> = row.get("campaign_audio_token");
    let audio: Option<Vec<u8>> = row.get("campaign_audio");
    match (expected, audio) {
        (Some(expected), Some(audio))
            if voxway_core::crypto::constant_time_eq(expected.as_bytes(), token.as_bytes()) =>
        {
            Ok(audio)
        }
        (Some(_), Some(_)) => Err(VoxwayError::Forbidden("Invalid audio token".into())),
        _ => Err(VoxwayError::NotFound("Campaign audio".into())),
    }
}

/// One parsed CSV lead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedLead {
    pub phone_number: String,
    pub lead_name: Option<String>,
    pub metadata: Value,
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct IngestReport {
    pub total_rows: usize,
    pub inserted: usize,
    pub duplicates: usize,
    pub rejected: usize,
}

/// Parse header-keyed lead CSV: `phone` (required), `name`, `metadata`
/// (JSON). Rows with unusable phone numbers are counted, not fatal.
pub fn parse_leads_csv(data: &[u8]) -> Result<(Vec<ParsedLead>, usize)> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(data);

    let headers = reader
        .headers()
        .map_err(|e| VoxwayError::Validation(format!("Invalid CSV: {}", e)))?
        .clone();

    let find = |name: &str| {
        headers
            .iter()
            .position(|h| h.eq_ignore_ascii_case(name))
    };
    let phone_idx = find("phone")
        .ok_or_else(|| VoxwayError::Validation("CSV must have a 'phone' column".into()))?;
    let name_idx = find("name");
    let metadata_idx = find("metadata");

    let mut leads = Vec::new();
    let mut rejected = 0usize;

    for record in reader.records() {
        let record = match record {
            Ok(r) => r,
            Err(_) => {
                rejected += 1;
                continue;
            }
        };
        let raw_phone = record.get(phone_idx).unwrap_or("");
        let phone_number = match normalize_e164(raw_phone) {
            Ok(p) => p,
            Err(_) => {
                rejected += 1;
                continue;
            }
        };
        let lead_name = name_idx
            .and_then(|i| record.get(i))
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string());
        let metadata = metadata_idx
            .and_then(|i| record.get(i))
            .and_then(|s| serde_json::from_str(s).ok())
            .unwrap_or_else(|| Value::Object(Default::default()));

        leads.push(ParsedLead {
            phone_number,
            lead_name,
            metadata,
        });
    }

    Ok((leads, rejected))
}

/// Bulk-insert leads; duplicates per (campaign, phone) are absorbed.
pub async fn upload_leads(
    state: &AppState,
    user_id: Uuid,
    campaign_id: Uuid,
    csv_data: &[u8],
) -> Result<IngestReport> {
    let campaign = get_campaign(state, user_id, campaign_id).await?;
    let (leads, rejected) = parse_leads_csv(csv_data)?;

    let mut report = IngestReport {
        total_rows: leads.len() + rejected,
        rejected,
        ..Default::default()
    };

    let conn = state.pool.get().await?;
    for lead in &leads {
        let inserted = conn
            .execute(
                "INSERT INTO leads (id, campaign_id, user_id, phone_number, lead_name, metadata) \
                 VALUES ($1, $2, $3, $4, $5, $6) \
                 ON CONFLICT (campaign_id, phone_number) DO NOTHING",
                &[
                    &Uuid::new_v4(),
                    &campaign.id,
                    &user_id,
                    &lead.phone_number,
                    &lead.lead_name,
                    &lead.metadata,
                ],
            )
            .await
            .map_err(db_err)?;
        if inserted > 0 {
            report.inserted += 1;
        } else {
            report.duplicates += 1;
        }
    }

    tracing::info!(
        campaign_id = %campaign_id,
        inserted = report.inserted,
        duplicates = report.duplicates,
        rejected = report.rejected,
        "Lead CSV ingested"
    );
    Ok(report)
}

pub async fn list_leads(
    state: &AppState,
    user_id: Uuid,
    campaign_id: Uuid,
    limit: i64,
) -> Result<Vec<Lead>> {
    get_campaign(state, user_id, campaign_id).await?;
    let conn = state.pool.get().await?;
    let rows = conn
        .query(
            "SELECT * FROM leads WHERE campaign_id = $1 ORDER BY created_at LIMIT $2",
            &[&campaign_id, &limit],
        )
        .await
        .map_err(db_err)?;
    Ok(rows.iter().map(Lead::from_row).collect())
}

async fn set_lead_status(state: &AppState, lead_id: Uuid, status: LeadStatus) -> Result<()> {
    let conn = state.pool.get().await?;
    conn.execute(
        "UPDATE leads SET status = $1 WHERE id = $2",
        &[&status.as_str(), &lead_id],
    )
    .await
    .map_err(db_err)?;
    Ok(())
}

fn lead_status_for(kind: EventKind, connected: bool, reason: Option<&str>) -> Option<LeadStatus> {
    match kind {
        EventKind::Started => None,
        EventKind::Connected | EventKind::Answered => Some(LeadStatus::Answered),
        EventKind::Warning => None,
        EventKind::Error => Some(LeadStatus::Failed),
        EventKind::Stopped => {
            let reason = reason.unwrap_or("").to_lowercase();
            if reason.contains("voicemail") {
                Some(LeadStatus::Voicemail)
            } else if reason.contains("transfer") {
                Some(LeadStatus::Transferred)
            } else if connected {
                Some(LeadStatus::Completed)
            } else {
                Some(LeadStatus::Failed)
            }
        }
    }
}

/// Reduce one dial-out event into the dialer call log and its lead.
pub async fn reduce_dialout_event(state: &AppState, event: &CallEvent) -> Result<bool> {
    let Some(kind) = event.kind() else {
        return Ok(false);
    };
    let Some(call_id) = &event.call_id else {
        return Ok(false);
    };

    let conn = state.pool.get().await?;
    let Some(row) = conn
        .query_opt(
            "SELECT id, campaign_id, lead_id, user_id, status, time_connect, time_end, billed \
             FROM dialer_call_logs WHERE call_id = $1",
            &[&call_id],
        )
        .await
        .map_err(db_err)?
    else {
        tracing::warn!(call_id = %call_id, "Dial-out event matched no log");
        return Ok(false);
    };

    let log_id: Uuid = row.get("id");
    let lead_id: Option<Uuid> = row.get("lead_id");
    let user_id: Uuid = row.get("user_id");
    let status: String = row.get("status");
    let time_connect: Option<chrono::DateTime<chrono::Utc>> = row.get("time_connect");
    let time_end: Option<chrono::DateTime<chrono::Utc>> = row.get("time_end");
    let billed: bool = row.get("billed");

    if matches!(status.as_str(), "completed" | "failed" | "error") && time_end.is_some() {
        return Ok(true);
    }

    let ts = event.event_ts();
    match kind {
        EventKind::Connected | EventKind::Answered => {
            conn.execute(
                "UPDATE dialer_call_logs SET status = 'answered', \
                 time_connect = COALESCE(time_connect, $1) WHERE id = $2",
                &[&ts, &log_id],
            )
            .await
            .map_err(db_err)?;
        }
        EventKind::Stopped | EventKind::Error => {
            let connect = time_connect;
            let billsec = match (event.duration, connect) {
                (Some(d), _) => d.max(0) as i32,
                (None, Some(connect)) => (ts - connect).num_seconds().max(0) as i32,
                (None, None) => 0,
            };
            let log_status = if kind == EventKind::Error { "error" } else { "completed" };
            conn.execute(
                "UPDATE dialer_call_logs SET status = $1, time_end = COALESCE(time_end, $2), \
                 duration_sec = $3, result = $4, notes = COALESCE($5, notes) WHERE id = $6",
                &[
                    &log_status,
                    &ts,
                    &billsec,
                    &event.reason,
                    &event.reason,
                    &log_id,
                ],
            )
            .await
            .map_err(db_err)?;

            if billsec > 0 && !billed {
                let rate = rates::rate_outbound_dialer(&state.config.rates, billsec as i64);
                if rate.price > Decimal::ZERO {
                    conn.execute(
                        "UPDATE dialer_call_logs SET price = $1 WHERE id = $2",
                        &[&rate.price, &log_id],
                    )
                    .await
                    .map_err(db_err)?;
                    let description = format!("Outbound dialer call {}s", billsec);
                    state
                        .charges
                        .charge(Billable::DialerCallLog, log_id, user_id, rate.price, &description, false)
                        .await?;
                }
            }

            mirror_dialer_cdr(state, log_id).await?;
        }
        _ => {}
    }

    if let Some(lead_id) = lead_id {
        if let Some(lead_status) = lead_status_for(kind, time_connect.is_some(), event.reason.as_deref())
        {
            set_lead_status(state, lead_id, lead_status).await?;
        }
    }

    Ok(true)
}

async fn mirror_dialer_cdr(state: &AppState, log_id: Uuid) -> Result<()> {
    let conn = state.pool.get().await?;
    conn.execute(
        "INSERT INTO cdrs (id, user_id, kind, source_id, call_id, call_domain, \
         from_number, to_number, time_start, time_end, billsec, price, status) \
         SELECT $1, d.user_id, 'dialer_outbound', d.id, d.call_id, \
                'dialer-' || d.campaign_id::text, '', COALESCE(l.phone_number, ''), \
                d.time_start, d.time_end, COALESCE(d.duration_sec, 0), d.price, d.status \
         FROM dialer_call_logs d LEFT JOIN leads l ON l.id = d.lead_id WHERE d.id = $2 \
         ON CONFLICT (source_id) DO UPDATE \
         SET time_end = EXCLUDED.time_end, billsec = EXCLUDED.billsec, \
             price = EXCLUDED.price, status = EXCLUDED.status",
        &[&Uuid::new_v4(), &log_id],
    )
    .await
    .map_err(db_err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_leads_csv_basic() {
        let csv = b"phone,name,metadata\n4155551212,Ada,{\"tier\":\"gold\"}\n+1 (212) 555-0100,Bob,\n";
        let (leads, rejected) = parse_leads_csv(csv).unwrap();
        assert_eq!(rejected, 0);
        assert_eq!(leads.len(), 2);
        assert_eq!(leads[0].phone_number, "+14155551212");
        assert_eq!(leads[0].lead_name.as_deref(), Some("Ada"));
        assert_eq!(leads[0].metadata["tier"], "gold");
        assert_eq!(leads[1].phone_number, "+12125550100");
    }

    #[test]
    fn test_parse_leads_csv_rejects_bad_numbers() {
        let csv = b"phone,name\n12345,TooShort\n4155551212,Ok\n";
        let (leads, rejected) = parse_leads_csv(csv).unwrap();
        assert_eq!(leads.len(), 1);
        assert_eq!(rejected, 1);
    }

    #[test]
    fn test_parse_leads_csv_requires_phone_header() {
        let csv = b"number,name\n4155551212,Ada\n";
        assert!(parse_leads_csv(csv).is_err());
    }

    #[test]
    fn test_parse_leads_csv_header_case_insensitive() {
        let csv = b"Phone,Name\n4155551212,Ada\n";
        let (leads, _) = parse_leads_csv(csv).unwrap();
        assert_eq!(leads.len(), 1);
    }

    #[test]
    fn test_campaign_concurrency_bounds() {
        let ok = CampaignInput {
            name: "c".into(),
            ai_agent_id: None,
            concurrency_limit: 3,
        };
        assert!(validate_campaign(&ok).is_ok());

        let low = CampaignInput { concurrency_limit: 0, ..ok.clone() };
        assert!(validate_campaign(&low).is_err());

        let high = CampaignInput { concurrency_limit: 21, ..ok };
        assert!(validate_campaign(&high).is_err());
    }

    #[test]
    fn test_lead_status_mapping() {
        assert_eq!(
            lead_status_for(EventKind::Answered, false, None),
            Some(LeadStatus::Answered)
        );
        assert_eq!(
            lead_status_for(EventKind::Stopped, true, None),
            Some(LeadStatus::Completed)
        );
        assert_eq!(
            lead_status_for(EventKind::Stopped, false, None),
            Some(LeadStatus::Failed)
        );
        assert_eq!(
            lead_status_for(EventKind::Stopped, true, Some("went to voicemail")),
            Some(LeadStatus::Voicemail)
        );
        assert_eq!(
            lead_status_for(EventKind::Stopped, true, Some("transferred to operator")),
            Some(LeadStatus::Transferred)
        );
        assert_eq!(
            lead_status_for(EventKind::Error, true, None),
            Some(LeadStatus::Failed)
        );
    }
}
