//! Call event reducer
//!
//! Consumes provider event webhooks and drives each call log through its
//! lifecycle. Matching strategies are ordered and independent: event ids
//! first, then legacy ids, then number digits, then time proximity; the
//! fallback matches persist the event ids so the direct strategy takes over
//! for the rest of the call.

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use voxway_core::Result;

use crate::billing::{rates, Billable};
use crate::calls::mirror_cdr;
use crate::state::{db_err, AppState};
use crate::types::{CallLog, CallStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Started,
    Connected,
    Answered,
    Stopped,
    Warning,
    Error,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub call_id: Option<String>,
    pub call_domain: Option<String>,
    pub to: Option<String>,
    pub from: Option<String>,
    pub reason: Option<String>,
    pub duration: Option<i64>,
}

impl CallEvent {
    pub fn is_dialout(&self) -> bool {
        self.event_type.starts_with("dialout.")
    }

    pub fn kind(&self) -> Option<EventKind> {
        match self.event_type.split('.').nth(1)? {
            "started" => Some(EventKind::Started),
            "connected" => Some(EventKind::Connected),
            "answered" => Some(EventKind::Answered),
            "stopped" => Some(EventKind::Stopped),
            "warning" => Some(EventKind::Warning),
            "error" => Some(EventKind::Error),
            _ => None,
        }
    }

    pub fn event_ts(&self) -> DateTime<Utc> {
        self.timestamp.unwrap_or_else(Utc::now)
    }
}

/// The slice of a call log the transition math needs.
#[derive(Debug, Clone)]
pub struct CallTimes {
    pub status: CallStatus,
    pub time_start: DateTime<Utc>,
    pub time_connect: Option<DateTime<Utc>>,
    pub time_end: Option<DateTime<Utc>>,
}

/// The computed effect of one event on one call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub status: CallStatus,
    pub time_connect: Option<DateTime<Utc>>,
    pub time_end: Option<DateTime<Utc>>,
    pub billsec: Option<i32>,
}

/// Pure state transition. Returns `None` when the event changes nothing,
/// which is what makes webhook redelivery harmless.
pub fn reduce_transition(
    current: &CallTimes,
    kind: EventKind,
    event_ts: DateTime<Utc>,
) -> Option<Transition> {
    if current.status.is_terminal() {
        return None;
    }

    match kind {
        EventKind::Started => None,
        EventKind::Connected | EventKind::Answered => {
            let time_connect = Some(current.time_connect.unwrap_or(event_ts));
            Some(Transition {
                status: CallStatus::Connected,
                time_connect,
                time_end: current.time_end,
                billsec: None,
            })
        }
        EventKind::Stopped | EventKind::Error => {
            let time_end = current.time_end.unwrap_or(event_ts);
            let anchor = current.time_connect.unwrap_or(current.time_start);
            let duration = (time_end - anchor).num_seconds().max(0) as i32;

            let status = if kind == EventKind::Error {
                CallStatus::Error
            } else if current.time_connect.is_none() {
                CallStatus::Missed
            } else {
                CallStatus::Completed
            };

            // A call that never connected has nothing billable.
            let billsec = if current.time_connect.is_some() {
                duration
            } else {
                0
            };

            Some(Transition {
                status,
                time_connect: current.time_connect,
                time_end: Some(time_end),
                billsec: Some(billsec),
            })
        }
        EventKind::Warning => {
            if matches!(current.status, CallStatus::Pending | CallStatus::PipecatStarted) {
                Some(Transition {
                    status: CallStatus::Warning,
                    time_connect: current.time_connect,
                    time_end: current.time_end,
                    billsec: None,
                })
            } else {
                None
            }
        }
    }
}

fn parse_status(s: &str) -> CallStatus {
    match s {
        "blocked_insufficient_funds" => CallStatus::BlockedInsufficientFunds,
        "blocked_balance_check_failed" => CallStatus::BlockedBalanceCheckFailed,
        "pipecat_started" => CallStatus::PipecatStarted,
        "pipecat_start_failed" => CallStatus::PipecatStartFailed,
        "connected" => CallStatus::Connected,
        "warning" => CallStatus::Warning,
        "completed" => CallStatus::Completed,
        "missed" => CallStatus::Missed,
        "error" => CallStatus::Error,
        _ => CallStatus::Pending,
    }
}

/// Find the call log an event belongs to. The winning strategy's index is
/// returned so fallback matches can persist the event ids.
async fn match_call_log(state: &AppState, event: &CallEvent) -> Result<Option<(CallLog, usize)>> {
    let conn = state.pool.get().await?;

    // (a) event ids persisted by an earlier fallback match
    if let (Some(id), Some(domain)) = (&event.call_id, &event.call_domain) {
        let row = conn
            .query_opt(
                "SELECT * FROM call_logs WHERE event_call_domain = $1 AND event_call_id = $2",
                &[&domain, &id],
            )
            .await
            .map_err(db_err)?;
        if let Some(row) = row {
            return Ok(Some((CallLog::from_row(&row), 0)));
        }

        // (b) legacy ids: the dial-in webhook's own identifiers
        let row = conn
            .query_opt(
                "SELECT * FROM call_logs WHERE call_domain = $1 AND call_id = $2",
                &[&domain, &id],
            )
            .await
            .map_err(db_err)?;
        if let Some(row) = row {
            return Ok(Some((CallLog::from_row(&row), 1)));
        }
    }

    // (c) digit-normalized numbers within a 12-hour window
    if let (Some(to), Some(from)) = (&event.to, &event.from) {
        let to_digits = voxway_core::phone::digits_only(to);
        let from_digits = voxway_core::phone::digits_only(from);
        if !to_digits.is_empty() && !from_digits.is_empty() {
            let row = conn
                .query_opt(
                    "SELECT * FROM call_logs \
                     WHERE direction = 'inbound' \
                       AND regexp_replace(to_number, '[^0-9]', '', 'g') = $1 \
                       AND regexp_replace(from_number, '[^0-9]', '', 'g') = $2 \
                       AND time_start > now() - interval '12 hours' \
                     ORDER BY time_start DESC LIMIT 1",
                    &[&to_digits, &from_digits],
                )
                .await
                .map_err(db_err)?;
            if let Some(row) = row {
                return Ok(Some((CallLog::from_row(&row), 2)));
            }
        }
    }

    // (d) nearest unfinished call within +/- 30 minutes of the event
    let ts = event.event_ts();
    let window_start = ts - Duration::minutes(30);
    let window_end = ts + Duration::minutes(30);
    let row = conn
        .query_opt(
            "SELECT * FROM call_logs \
             WHERE direction = 'inbound' AND time_end IS NULL \
               AND time_start BETWEEN $1 AND $2 \
             ORDER BY ABS(EXTRACT(EPOCH FROM (time_start - $3))) LIMIT 1",
            &[&window_start, &window_end, &ts],
        )
        .await
        .map_err(db_err)?;
    if let Some(row) = row {
        return Ok(Some((CallLog::from_row(&row), 3)));
    }

    Ok(None)
}

async fn persist_event_ids(state: &AppState, call: &CallLog, event: &CallEvent) -> Result<()> {
    if let (Some(id), Some(domain)) = (&event.call_id, &event.call_domain) {
        let conn = state.pool.get().await?;
        conn.execute(
            "UPDATE call_logs SET event_call_id = $1, event_call_domain = $2 WHERE id = $3",
            &[&id, &domain, &call.id],
        )
        .await
        .map_err(db_err)?;
    }
    Ok(())
}

/// Bill a finished inbound call exactly once and mirror it as a CDR. Also
/// used by the scheduler's backfill pass for rows the live path missed.
pub async fn bill_finished_call(state: &AppState, call: &CallLog) -> Result<()> {
    let billsec = call.billsec.unwrap_or(0) as i64;
    if billsec <= 0 || call.billed {
        return Ok(());
    }

    let rate = rates::rate_inbound_call(&state.config.rates, &call.to_number, billsec);
    if rate.price <= rust_decimal::Decimal::ZERO {
        return Ok(());
    }

    {
        let conn = state.pool.get().await?;
        conn.execute(
            "UPDATE call_logs SET price = $1 WHERE id = $2",
            &[&rate.price, &call.id],
        )
        .await
        .map_err(db_err)?;
    }

    let description = format!(
        "Inbound AI call {}s to {} ({})",
        billsec,
        call.to_number,
        if rate.is_tollfree { "toll-free" } else { "local" }
    );
    state
        .charges
        .charge(
            Billable::CallLog,
            call.id,
            call.user_id,
            rate.price,
            &description,
            false,
        )
        .await?;

    let mut billed = call.clone();
    billed.price = Some(rate.price);
    mirror_cdr(state, &billed).await?;
    Ok(())
}

/// Reduce one dial-in event into call log state. Returns whether a call
/// matched.
pub async fn reduce_dialin_event(state: &AppState, event: &CallEvent) -> Result<bool> {
    let Some(kind) = event.kind() else {
        tracing::debug!(event_type = %event.event_type, "Ignoring unknown event type");
        return Ok(false);
    };

    let Some((call, strategy)) = match_call_log(state, event).await? else {
        tracing::warn!(
            event_type = %event.event_type,
            call_id = ?event.call_id,
            "Event matched no call log"
        );
        return Ok(false);
    };

    if strategy > 0 {
        persist_event_ids(state, &call, event).await?;
    }

    let current = CallTimes {
        status: parse_status(&call.status),
        time_start: call.time_start,
        time_connect: call.time_connect,
        time_end: call.time_end,
    };

    let Some(transition) = reduce_transition(&current, kind, event.event_ts()) else {
        return Ok(true);
    };

    {
        let conn = state.pool.get().await?;
        conn.execute(
            "UPDATE call_logs SET status = $1, time_connect = $2, time_end = $3, \
             duration_sec = COALESCE($4, duration_sec), billsec = COALESCE($4, billsec) \
             WHERE id = $5",
            &[
                &transition.status.as_str(),
                &transition.time_connect,
                &transition.time_end,
                &transition.billsec,
                &call.id,
            ],
        )
        .await
        .map_err(db_err)?;
    }

    tracing::info!(
        call_id = %call.call_id,
        status = transition.status.as_str(),
        strategy = strategy,
        "Call event reduced"
    );

    if transition.status.is_terminal() {
        let mut finished = call.clone();
        finished.status = transition.status.as_str().to_string();
        finished.time_connect = transition.time_connect;
        finished.time_end = transition.time_end;
        finished.billsec = transition.billsec;
        finished.duration_sec = transition.billsec;

        if transition.billsec.unwrap_or(0) > 0 {
            bill_finished_call(state, &finished).await?;
        } else {
            mirror_cdr(state, &finished).await?;
        }
    }

    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_770_000_000 + secs, 0).unwrap()
    }

    fn started_call() -> CallTimes {
        CallTimes {
            status: CallStatus::PipecatStarted,
            time_start: at(0),
            time_connect: None,
            time_end: None,
        }
    }

    #[test]
    fn test_connected_sets_connect_time_once() {
        let t = reduce_transition(&started_call(), EventKind::Connected, at(5)).unwrap();
        assert_eq!(t.status, CallStatus::Connected);
        assert_eq!(t.time_connect, Some(at(5)));

        // A second connected event keeps the original timestamp.
        let mut connected = started_call();
        connected.status = CallStatus::Connected;
        connected.time_connect = Some(at(5));
        let t2 = reduce_transition(&connected, EventKind::Connected, at(9)).unwrap();
        assert_eq!(t2.time_connect, Some(at(5)));
    }

    #[test]
    fn test_stopped_after_connect_completes_with_billsec() {
        let mut call = started_call();
        call.status = CallStatus::Connected;
        call.time_connect = Some(at(0));

        let t = reduce_transition(&call, EventKind::Stopped, at(42)).unwrap();
        assert_eq!(t.status, CallStatus::Completed);
        assert_eq!(t.billsec, Some(42));
        assert_eq!(t.time_end, Some(at(42)));
    }

    #[test]
    fn test_stopped_without_connect_is_missed_and_free() {
        let t = reduce_transition(&started_call(), EventKind::Stopped, at(30)).unwrap();
        assert_eq!(t.status, CallStatus::Missed);
        assert_eq!(t.billsec, Some(0));
    }

    #[test]
    fn test_error_sets_end_and_duration() {
        let mut call = started_call();
        call.status = CallStatus::Connected;
        call.time_connect = Some(at(10));

        let t = reduce_transition(&call, EventKind::Error, at(25)).unwrap();
        assert_eq!(t.status, CallStatus::Error);
        assert_eq!(t.billsec, Some(15));
    }

    #[test]
    fn test_negative_duration_clamped() {
        let mut call = started_call();
        call.status = CallStatus::Connected;
        call.time_connect = Some(at(50));

        let t = reduce_transition(&call, EventKind::Stopped, at(40)).unwrap();
        assert_eq!(t.billsec, Some(0));
    }

    #[test]
    fn test_terminal_states_are_sticky() {
        let mut done = started_call();
        done.status = CallStatus::Completed;
        done.time_connect = Some(at(0));
        done.time_end = Some(at(42));

        assert!(reduce_transition(&done, EventKind::Stopped, at(60)).is_none());
        assert!(reduce_transition(&done, EventKind::Connected, at(60)).is_none());
        assert!(reduce_transition(&done, EventKind::Error, at(60)).is_none());
    }

    #[test]
    fn test_warning_only_before_connect() {
        let t = reduce_transition(&started_call(), EventKind::Warning, at(3)).unwrap();
        assert_eq!(t.status, CallStatus::Warning);

        let mut connected = started_call();
        connected.status = CallStatus::Connected;
        connected.time_connect = Some(at(1));
        assert!(reduce_transition(&connected, EventKind::Warning, at(3)).is_none());
    }

    #[test]
    fn test_event_kind_parsing() {
        let event = CallEvent {
            event_type: "dialin.stopped".into(),
            timestamp: None,
            call_id: None,
            call_domain: None,
            to: None,
            from: None,
            reason: None,
            duration: None,
        };
        assert_eq!(event.kind(), Some(EventKind::Stopped));
        assert!(!event.is_dialout());

        let event = CallEvent {
            event_type: "dialout.answered".into(),
            ..event
        };
        assert_eq!(event.kind(), Some(EventKind::Answered));
        assert!(event.is_dialout());
    }
}
