//! User account operations
//!
//! The signup flow lives outside this service; what the control plane owns
//! is the wallet surface, per-user SMTP credentials, and letter templates.

use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;
use voxway_core::{Result, SealedSecret, VoxwayError};

use crate::ledger::{Adjustment, LedgerEntry};
use crate::state::{db_err, AppState};
use crate::types::{TransactionKind, User};

pub async fn get_user(state: &AppState, user_id: Uuid) -> Result<User> {
    let conn = state.pool.get().await?;
    let row = conn
        .query_opt("SELECT * FROM users WHERE id = $1", &[&user_id])
        .await
        .map_err(db_err)?
        .ok_or_else(|| VoxwayError::NotFound(format!("User {}", user_id)))?;
    Ok(User::from_row(&row))
}

#[derive(Debug, Deserialize)]
pub struct SmtpSettingsInput {
    pub host: String,
    pub port: i32,
    #[serde(default = "default_secure")]
    pub secure: bool,
    pub username: String,
    pub password: String,
    pub from_address: String,
}

fn default_secure() -> bool {
    true
}

/// Store the user's SMTP credentials with the password sealed.
pub async fn upsert_smtp_settings(
    state: &AppState,
    user_id: Uuid,
    input: SmtpSettingsInput,
) -> Result<()> {
    if input.host.trim().is_empty() || !(1..=65535).contains(&input.port) {
        return Err(VoxwayError::Validation("Invalid SMTP host or port".into()));
    }
    if !input.from_address.contains('@') {
        return Err(VoxwayError::Validation("Invalid from address".into()));
    }

    let key = state.require_key()?;
    let sealed = SealedSecret::seal(key, input.password.as_bytes())?;

    let conn = state.pool.get().await?;
    conn.execute(
        "INSERT INTO user_smtp_settings \
         (user_id, host, port, secure, username, password_ciphertext, password_iv, password_tag, from_address) \
         VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9) \
         ON CONFLICT (user_id) DO UPDATE SET host = EXCLUDED.host, port = EXCLUDED.port, \
         secure = EXCLUDED.secure, username = EXCLUDED.username, \
         password_ciphertext = EXCLUDED.password_ciphertext, password_iv = EXCLUDED.password_iv, \
         password_tag = EXCLUDED.password_tag, from_address = EXCLUDED.from_address, \
         updated_at = now()",
        &[
            &user_id,
            &input.host,
            &input.port,
            &input.secure,
            &input.username,
            &sealed.ciphertext,
            &sealed.iv,
            &sealed.tag,
            &input.from_address,
        ],
    )
    .await
    .map_err(db_err)?;
    Ok(())
}

/// Store a letter template.
pub async fn upload_doc_template(
    state: &AppState,
    user_id: Uuid,
    name: &str,
    original_filename: &str,
    doc: Vec<u8>,
) -> Result<Uuid> {
    if name.trim().is_empty() {
        return Err(VoxwayError::Validation("Template name is required".into()));
    }
    if doc.is_empty() {
        return Err(VoxwayError::Validation("Template document is empty".into()));
    }

    let template_id = Uuid::new_v4();
    let conn = state.pool.get().await?;
    let inserted = conn
        .execute(
            "INSERT INTO doc_templates (id, user_id, name, original_filename, doc) \
             VALUES ($1, $2, $3, $4, $5) ON CONFLICT (user_id, name) DO NOTHING",
            &[&template_id, &user_id, &name, &original_filename, &doc],
        )
        .await
        .map_err(db_err)?;
    if inserted == 0 {
        return Err(VoxwayError::Conflict(format!(
            "Template '{}' already exists",
            name
        )));
    }
    Ok(template_id)
}

/// Manual balance adjustment (admin surface). Signed amount; negative
/// adjustments are strict so support cannot overdraw an account by mistake.
pub async fn admin_adjust(
    state: &AppState,
    user_id: Uuid,
    amount: Decimal,
    description: &str,
) -> Result<LedgerEntry> {
    if amount == Decimal::ZERO {
        return Err(VoxwayError::Validation("Adjustment amount cannot be zero".into()));
    }
    get_user(state, user_id).await?;

    state
        .ledger
        .adjust(&Adjustment {
            user_id,
            amount,
            description,
            kind: TransactionKind::Adjustment,
            payment_method: Some("admin"),
            reference_id: None,
            strict: amount < Decimal::ZERO,
        })
        .await
}
