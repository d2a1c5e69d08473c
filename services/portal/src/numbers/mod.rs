//! AI phone numbers
//!
//! Purchase, agent assignment, dial-in routing, and release of provider
//! numbers. The monthly billing cycle and non-payment cancellation machine
//! live in [`lifecycle`].

pub mod lifecycle;

use rust_decimal::Decimal;
use uuid::Uuid;
use voxway_core::{Result, VoxwayError};

use crate::billing::rates;
use crate::state::{db_err, AppState};
use crate::types::{Agent, ExternalNumber};

pub async fn get_number(state: &AppState, user_id: Uuid, number_id: Uuid) -> Result<ExternalNumber> {
    let conn = state.pool.get().await?;
    let row = conn
        .query_opt(
            "SELECT * FROM external_numbers WHERE id = $1 AND user_id = $2",
            &[&number_id, &user_id],
        )
        .await
        .map_err(db_err)?
        .ok_or_else(|| VoxwayError::NotFound(format!("Number {}", number_id)))?;
    Ok(ExternalNumber::from_row(&row))
}

pub async fn list_numbers(state: &AppState, user_id: Uuid) -> Result<Vec<ExternalNumber>> {
    let conn = state.pool.get().await?;
    let rows = conn
        .query(
            "SELECT * FROM external_numbers WHERE user_id = $1 ORDER BY created_at",
            &[&user_id],
        )
        .await
        .map_err(db_err)?;
    Ok(rows.iter().map(ExternalNumber::from_row).collect())
}

/// The agent an inbound call to this number should reach.
pub async fn agent_for_dialed_number(state: &AppState, to_number: &str) -> Result<Option<Agent>> {
    let conn = state.pool.get().await?;
    let row = conn
        .query_opt(
            "SELECT a.* FROM agents a \
             JOIN external_numbers n ON n.assigned_agent_id = a.id \
             WHERE n.phone_number = $1",
            &[&to_number],
        )
        .await
        .map_err(db_err)?;
    Ok(row.as_ref().map(Agent::from_row))
}

/// Buy a number from the provider.
///
/// Gated on a positive balance that covers the worst-case monthly fee. On
/// provider success the row is inserted and the first monthly fee is charged
/// immediately through the cycle idempotency table.
pub async fn purchase_number(
    state: &AppState,
    user_id: Uuid,
    desired_number: Option<&str>,
) -> Result<ExternalNumber> {
    let balance = state.ledger.balance(user_id).await?;
    let gate = rates::max_monthly_fee(&state.config.rates);
    if balance <= Decimal::ZERO || balance < gate {
        return Err(VoxwayError::InsufficientFunds(format!(
            "Balance {} does not cover the {} monthly fee",
            balance, gate
        )));
    }

    let purchased = state.telephony.buy_phone_number(desired_number).await?;

    let number_id = Uuid::new_v4();
    let conn = state.pool.get().await?;
    conn.execute(
        "INSERT INTO external_numbers (id, user_id, provider_number_id, phone_number) \
         VALUES ($1, $2, $3, $4)",
        &[&number_id, &user_id, &purchased.id, &purchased.number],
    )
    .await
    .map_err(db_err)?;
    drop(conn);

    tracing::info!(
        user_id = %user_id,
        number = %purchased.number,
        "Number purchased"
    );

    let number = get_number(state, user_id, number_id).await?;
    if let Err(e) = lifecycle::bill_initial_cycle(state, &number).await {
        tracing::warn!(number_id = %number_id, error = %e, "First monthly fee charge failed");
    }

    get_number(state, user_id, number_id).await
}

fn dialin_callback_url(state: &AppState, agent: &Agent) -> String {
    match &state.config.telephony.dialin_webhook_token {
        Some(token) => format!(
            "{}/dial-in/{}?token={}",
            state.config.public_base_url, agent.runtime_service_name, token
        ),
        None => format!(
            "{}/dial-in/{}",
            state.config.public_base_url, agent.runtime_service_name
        ),
    }
}

/// Point a number at an agent, creating the provider dial-in config when the
/// balance admits inbound traffic.
pub async fn assign_agent(
    state: &AppState,
    user_id: Uuid,
    number_id: Uuid,
    agent_id: Uuid,
) -> Result<ExternalNumber> {
    let number = get_number(state, user_id, number_id).await?;
    let agent = crate::agents::get_agent(state, user_id, agent_id).await?;

    // One number per agent: a previous assignment elsewhere is a conflict.
    let conn = state.pool.get().await?;
    let taken = conn
        .query_opt(
            "SELECT id FROM external_numbers WHERE assigned_agent_id = $1 AND id <> $2",
            &[&agent_id, &number_id],
        )
        .await
        .map_err(db_err)?;
    if taken.is_some() {
        return Err(VoxwayError::Conflict(format!(
            "Agent {} already has a number",
            agent_id
        )));
    }

    if let Some(config_id) = &number.dialin_config_id {
        state.telephony.delete_dialin_config(config_id).await.ok();
    }

    let balance = state.ledger.balance(user_id).await?;
    let config_id = if balance >= state.config.inbound.min_credit {
        Some(
            state
                .telephony
                .create_dialin_config(
                    &number.phone_number,
                    &dialin_callback_url(state, &agent),
                    &agent.runtime_service_name,
                )
                .await?,
        )
    } else {
        None
    };

    conn.execute(
        "UPDATE external_numbers SET assigned_agent_id = $1, dialin_config_id = $2 \
         WHERE id = $3 AND user_id = $4",
        &[&agent_id, &config_id, &number_id, &user_id],
    )
    .await
    .map_err(db_err)?;

    get_number(state, user_id, number_id).await
}

pub async fn unassign_agent(state: &AppState, user_id: Uuid, number_id: Uuid) -> Result<()> {
    let number = get_number(state, user_id, number_id).await?;
    if let Some(config_id) = &number.dialin_config_id {
        state.telephony.delete_dialin_config(config_id).await.ok();
    }
    let conn = state.pool.get().await?;
    conn.execute(
        "UPDATE external_numbers SET assigned_agent_id = NULL, dialin_config_id = NULL \
         WHERE id = $1 AND user_id = $2",
        &[&number_id, &user_id],
    )
    .await
    .map_err(db_err)?;
    Ok(())
}

/// Release a number back to the provider and drop the row.
pub async fn release_number(state: &AppState, user_id: Uuid, number_id: Uuid) -> Result<()> {
    let number = get_number(state, user_id, number_id).await?;

    if let Some(config_id) = &number.dialin_config_id {
        state.telephony.delete_dialin_config(config_id).await.ok();
    }

    state
        .telephony
        .release_phone_number(&number.provider_number_id, number.created_at)
        .await?;

    let conn = state.pool.get().await?;
    conn.execute(
        "DELETE FROM external_numbers WHERE id = $1 AND user_id = $2",
        &[&number_id, &user_id],
    )
    .await
    .map_err(db_err)?;

    tracing::info!(number = %number.phone_number, "Number released");
    Ok(())
}

/// Tear down every dial-in config for a user, keeping the numbers. Used when
/// the balance falls below the inbound admission threshold.
pub async fn disable_inbound_routing(state: &AppState, user_id: Uuid) -> Result<()> {
    let conn = state.pool.get().await?;
    let rows = conn
        .query(
            "SELECT id, dialin_config_id FROM external_numbers \
             WHERE user_id = $1 AND dialin_config_id IS NOT NULL",
            &[&user_id],
        )
        .await
        .map_err(db_err)?;

    for row in rows {
        let number_id: Uuid = row.get("id");
        let config_id: String = row.get("dialin_config_id");
        if let Err(e) = state.telephony.delete_dialin_config(&config_id).await {
            tracing::warn!(number_id = %number_id, error = %e, "Dial-in config delete failed");
            continue;
        }
        conn.execute(
            "UPDATE external_numbers SET dialin_config_id = NULL WHERE id = $1",
            &[&number_id],
        )
        .await
        .map_err(db_err)?;
    }

    tracing::info!(user_id = %user_id, "Inbound routing disabled");
    Ok(())
}

/// Recreate dial-in configs for every assigned number that lost routing.
pub async fn enable_inbound_routing(state: &AppState, user_id: Uuid) -> Result<()> {
    let conn = state.pool.get().await?;
    let rows = conn
        .query(
            "SELECT n.id AS number_id, n.phone_number, a.* FROM external_numbers n \
             JOIN agents a ON a.id = n.assigned_agent_id \
             WHERE n.user_id = $1 AND n.dialin_config_id IS NULL AND n.cancel_pending = FALSE",
            &[&user_id],
        )
        .await
        .map_err(db_err)?;

    for row in rows {
        let number_id: Uuid = row.get("number_id");
        let phone_number: String = row.get("phone_number");
        let agent = Agent::from_row(&row);

        match state
            .telephony
            .create_dialin_config(
                &phone_number,
                &dialin_callback_url(state, &agent),
                &agent.runtime_service_name,
            )
            .await
        {
            Ok(config_id) => {
                conn.execute(
                    "UPDATE external_numbers SET dialin_config_id = $1 WHERE id = $2",
                    &[&config_id, &number_id],
                )
                .await
                .map_err(db_err)?;
            }
            Err(e) => {
                tracing::warn!(number_id = %number_id, error = %e, "Dial-in config create failed");
            }
        }
    }
    Ok(())
}

/// Align a user's inbound routing with their current balance.
pub async fn sync_routing(state: &AppState, user_id: Uuid, balance: Decimal) -> Result<()> {
    if balance < state.config.inbound.min_credit {
        if state.config.inbound.disable_numbers_when_balance_low {
            disable_inbound_routing(state, user_id).await?;
        }
    } else {
        enable_inbound_routing(state, user_id).await?;
    }
    Ok(())
}
