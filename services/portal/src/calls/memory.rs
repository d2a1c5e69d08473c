//! Returning-caller memory
//!
//! A bounded digest of prior transcript turns for the same caller, injected
//! into new sessions so the agent can pick up context.

use serde_json::{json, Value};
use uuid::Uuid;
use voxway_core::phone::{digits_only, last_10_digits};
use voxway_core::Result;

use crate::state::{db_err, AppState};

const MEMORY_META: &str = "The caller has spoken with this agent before. The messages below \
are turns from their most recent prior call. Use them for context; do not \
mention that transcripts are stored.";

/// Trim a transcript turn for injection.
pub fn trim_turn(content: &str, max_chars: usize) -> String {
    if content.chars().count() <= max_chars {
        return content.to_string();
    }
    let mut out: String = content.chars().take(max_chars.saturating_sub(1)).collect();
    out.push('\u{2026}');
    out
}

/// Look up prior-call turns for a caller. Returns `None` when there is no
/// usable history.
pub async fn build_caller_memory(
    state: &AppState,
    user_id: Uuid,
    agent_id: Uuid,
    from_number: &str,
    exclude: (&str, &str),
) -> Result<Option<Value>> {
    let cfg = &state.config.caller_memory;
    let digits = digits_only(from_number);
    if digits.is_empty() {
        return Ok(None);
    }
    let last10 = last_10_digits(from_number);
    let (exclude_domain, exclude_call) = exclude;

    let conn = state.pool.get().await?;
    let candidates = conn
        .query(
            "SELECT call_id, call_domain FROM call_logs \
             WHERE user_id = $1 AND agent_id = $2 AND direction = 'inbound' \
               AND NOT (call_domain = $3 AND call_id = $4) \
               AND time_start > now() - make_interval(days => $5::int) \
               AND status NOT LIKE 'blocked%' \
               AND (regexp_replace(from_number, '[^0-9]', '', 'g') = $6 \
                    OR RIGHT(regexp_replace(from_number, '[^0-9]', '', 'g'), 10) = $7) \
             ORDER BY time_start DESC LIMIT $8",
            &[
                &user_id,
                &agent_id,
                &exclude_domain,
                &exclude_call,
                &(cfg.max_days as i32),
                &digits,
                &last10,
                &cfg.max_calls,
            ],
        )
        .await
        .map_err(db_err)?;

    // Newest prior call that actually has transcript turns wins.
    for candidate in candidates {
        let call_id: String = candidate.get("call_id");
        let call_domain: String = candidate.get("call_domain");

        let rows = conn
            .query(
                "SELECT role, content FROM call_messages \
                 WHERE call_domain = $1 AND call_id = $2 \
                 ORDER BY created_at DESC LIMIT $3",
                &[&call_domain, &call_id, &cfg.max_messages],
            )
            .await
            .map_err(db_err)?;

        if rows.is_empty() {
            continue;
        }

        // Rows come newest-first; present them in conversation order.
        let messages: Vec<Value> = rows
            .iter()
            .rev()
            .map(|row| {
                let role: String = row.get("role");
                let content: String = row.get("content");
                json!({
                    "role": role,
                    "content": trim_turn(&content, cfg.max_chars_per_message),
                })
            })
            .collect();

        return Ok(Some(json!({
            "meta": MEMORY_META,
            "messages": messages,
        })));
    }

    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trim_turn_short_untouched() {
        assert_eq!(trim_turn("hello", 10), "hello");
    }

    #[test]
    fn test_trim_turn_truncates_with_ellipsis() {
        let trimmed = trim_turn("hello world", 6);
        assert_eq!(trimmed.chars().count(), 6);
        assert!(trimmed.ends_with('\u{2026}'));
    }

    #[test]
    fn test_trim_turn_exact_boundary() {
        assert_eq!(trim_turn("12345", 5), "12345");
    }
}
