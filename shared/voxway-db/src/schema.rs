//! Schema bootstrap
//!
//! The control plane creates its tables at startup. Every row is owned by
//! exactly one user (ON DELETE CASCADE); idempotency lives in unique
//! constraints, not in-process locks.

use tracing::info;

use crate::{DbPool, Result};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id                  UUID PRIMARY KEY,
    username            TEXT NOT NULL UNIQUE,
    email               TEXT NOT NULL UNIQUE,
    password_hash       TEXT NOT NULL,
    balance             NUMERIC(20,8) NOT NULL DEFAULT 0,
    is_active           BOOLEAN NOT NULL DEFAULT TRUE,
    is_admin            BOOLEAN NOT NULL DEFAULT FALSE,
    suspended           BOOLEAN NOT NULL DEFAULT FALSE,
    contact_name        TEXT,
    address_line1       TEXT,
    address_line2       TEXT,
    city                TEXT,
    state               TEXT,
    postal_code         TEXT,
    country             TEXT,
    transfer_number     TEXT,
    created_at          TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE TABLE IF NOT EXISTS transactions (
    id                  UUID PRIMARY KEY,
    user_id             UUID NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    amount              NUMERIC(20,8) NOT NULL,
    description         TEXT NOT NULL,
    kind                TEXT NOT NULL CHECK (kind IN ('credit','debit','adjustment')),
    payment_method      TEXT,
    reference_id        TEXT,
    balance_before      NUMERIC(20,8) NOT NULL,
    balance_after       NUMERIC(20,8) NOT NULL,
    status              TEXT NOT NULL DEFAULT 'completed'
                        CHECK (status IN ('pending','completed','failed')),
    created_at          TIMESTAMPTZ NOT NULL DEFAULT now()
);
CREATE INDEX IF NOT EXISTS idx_transactions_user ON transactions (user_id, created_at);

CREATE TABLE IF NOT EXISTS user_smtp_settings (
    user_id             UUID PRIMARY KEY REFERENCES users(id) ON DELETE CASCADE,
    host                TEXT NOT NULL,
    port                INT NOT NULL DEFAULT 587,
    secure              BOOLEAN NOT NULL DEFAULT TRUE,
    username            TEXT NOT NULL,
    password_ciphertext BYTEA NOT NULL,
    password_iv         BYTEA NOT NULL,
    password_tag        BYTEA NOT NULL,
    from_address        TEXT NOT NULL,
    updated_at          TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE TABLE IF NOT EXISTS agents (
    id                      UUID PRIMARY KEY,
    user_id                 UUID NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    display_name            TEXT NOT NULL,
    greeting                TEXT NOT NULL DEFAULT '',
    prompt                  TEXT NOT NULL DEFAULT '',
    voice_id                TEXT NOT NULL DEFAULT '',
    background_audio_url    TEXT,
    background_audio_gain   REAL,
    transfer_to_number      TEXT,
    inbound_transfer_enabled BOOLEAN NOT NULL DEFAULT FALSE,
    inbound_transfer_number TEXT,
    runtime_service_name    TEXT NOT NULL UNIQUE,
    runtime_secret_set_name TEXT NOT NULL UNIQUE,
    runtime_region          TEXT NOT NULL DEFAULT '',
    action_token_hash       TEXT,
    action_token_ciphertext BYTEA,
    action_token_iv         BYTEA,
    action_token_tag        BYTEA,
    default_doc_template_id UUID,
    created_at              TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE TABLE IF NOT EXISTS agent_background_audio (
    agent_id            UUID PRIMARY KEY REFERENCES agents(id) ON DELETE CASCADE,
    user_id             UUID NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    audio               BYTEA NOT NULL,
    access_token        TEXT NOT NULL,
    mime                TEXT NOT NULL DEFAULT 'audio/wav',
    size_bytes          BIGINT NOT NULL,
    created_at          TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE TABLE IF NOT EXISTS doc_templates (
    id                  UUID PRIMARY KEY,
    user_id             UUID NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    name                TEXT NOT NULL,
    original_filename   TEXT NOT NULL,
    doc                 BYTEA NOT NULL,
    created_at          TIMESTAMPTZ NOT NULL DEFAULT now(),
    UNIQUE (user_id, name)
);

CREATE TABLE IF NOT EXISTS external_numbers (
    id                      UUID PRIMARY KEY,
    user_id                 UUID NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    provider_number_id      TEXT NOT NULL UNIQUE,
    phone_number            TEXT NOT NULL UNIQUE,
    assigned_agent_id       UUID UNIQUE REFERENCES agents(id) ON DELETE SET NULL,
    dialin_config_id        TEXT,
    cancel_pending          BOOLEAN NOT NULL DEFAULT FALSE,
    cancel_pending_since    TIMESTAMPTZ,
    cancel_after            TIMESTAMPTZ,
    cancel_billed_to        TIMESTAMPTZ,
    notice_initial_sent_at  TIMESTAMPTZ,
    notice_reminder_sent_at TIMESTAMPTZ,
    created_at              TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE TABLE IF NOT EXISTS number_billing_cycles (
    id                  UUID PRIMARY KEY,
    user_id             UUID NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    number_id           UUID NOT NULL REFERENCES external_numbers(id) ON DELETE CASCADE,
    billed_to           TIMESTAMPTZ NOT NULL,
    created_at          TIMESTAMPTZ NOT NULL DEFAULT now(),
    UNIQUE (user_id, number_id, billed_to)
);

CREATE TABLE IF NOT EXISTS call_logs (
    id                      UUID PRIMARY KEY,
    call_id                 TEXT NOT NULL,
    call_domain             TEXT NOT NULL,
    event_call_id           TEXT,
    event_call_domain       TEXT,
    user_id                 UUID NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    agent_id                UUID REFERENCES agents(id) ON DELETE SET NULL,
    external_number_id      UUID REFERENCES external_numbers(id) ON DELETE SET NULL,
    direction               TEXT NOT NULL DEFAULT 'inbound',
    from_number             TEXT NOT NULL DEFAULT '',
    to_number               TEXT NOT NULL DEFAULT '',
    time_start              TIMESTAMPTZ NOT NULL DEFAULT now(),
    time_connect            TIMESTAMPTZ,
    time_end                TIMESTAMPTZ,
    duration_sec            INT,
    billsec                 INT,
    price                   NUMERIC(20,8),
    billed                  BOOLEAN NOT NULL DEFAULT FALSE,
    billing_transaction_id  UUID REFERENCES transactions(id),
    refund_status           TEXT NOT NULL DEFAULT 'none'
                            CHECK (refund_status IN ('none','pending','completed','failed')),
    refund_amount           NUMERIC(20,8),
    refund_transaction_id   UUID REFERENCES transactions(id),
    refund_error            TEXT,
    status                  TEXT NOT NULL,
    raw_payload             JSONB,
    UNIQUE (call_domain, call_id)
);
CREATE INDEX IF NOT EXISTS idx_call_logs_event ON call_logs (event_call_domain, event_call_id);
CREATE INDEX IF NOT EXISTS idx_call_logs_user_start ON call_logs (user_id, time_start);

CREATE TABLE IF NOT EXISTS call_messages (
    id                  UUID PRIMARY KEY,
    user_id             UUID NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    agent_id            UUID REFERENCES agents(id) ON DELETE SET NULL,
    call_domain         TEXT NOT NULL,
    call_id             TEXT NOT NULL,
    message_id          TEXT NOT NULL,
    role                TEXT NOT NULL CHECK (role IN ('user','assistant')),
    content             TEXT NOT NULL,
    created_at          TIMESTAMPTZ NOT NULL DEFAULT now(),
    UNIQUE (call_domain, call_id, message_id)
);

CREATE TABLE IF NOT EXISTS campaigns (
    id                  UUID PRIMARY KEY,
    user_id             UUID NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    name                TEXT NOT NULL,
    ai_agent_id         UUID REFERENCES agents(id) ON DELETE SET NULL,
    concurrency_limit   INT NOT NULL DEFAULT 1 CHECK (concurrency_limit BETWEEN 1 AND 20),
    status              TEXT NOT NULL DEFAULT 'draft'
                        CHECK (status IN ('draft','running','paused','completed','deleted')),
    campaign_audio      BYTEA,
    campaign_audio_token TEXT,
    created_at          TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at          TIMESTAMPTZ NOT NULL DEFAULT now(),
    last_started_at     TIMESTAMPTZ,
    last_paused_at      TIMESTAMPTZ
);

CREATE TABLE IF NOT EXISTS leads (
    id                  UUID PRIMARY KEY,
    campaign_id         UUID NOT NULL REFERENCES campaigns(id) ON DELETE CASCADE,
    user_id             UUID NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    phone_number        TEXT NOT NULL,
    lead_name           TEXT,
    metadata            JSONB NOT NULL DEFAULT '{}',
    status              TEXT NOT NULL DEFAULT 'pending'
                        CHECK (status IN ('pending','queued','dialing','answered',
                                          'voicemail','transferred','failed','completed')),
    attempt_count       INT NOT NULL DEFAULT 0,
    last_call_at        TIMESTAMPTZ,
    created_at          TIMESTAMPTZ NOT NULL DEFAULT now(),
    UNIQUE (campaign_id, phone_number)
);
CREATE INDEX IF NOT EXISTS idx_leads_campaign_status ON leads (campaign_id, status);

CREATE TABLE IF NOT EXISTS dialer_call_logs (
    id                      UUID PRIMARY KEY,
    campaign_id             UUID NOT NULL REFERENCES campaigns(id) ON DELETE CASCADE,
    lead_id                 UUID REFERENCES leads(id) ON DELETE SET NULL,
    user_id                 UUID NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    ai_agent_id             UUID REFERENCES agents(id) ON DELETE SET NULL,
    call_id                 TEXT,
    status                  TEXT NOT NULL,
    result                  TEXT,
    time_start              TIMESTAMPTZ NOT NULL DEFAULT now(),
    time_connect            TIMESTAMPTZ,
    time_end                TIMESTAMPTZ,
    duration_sec            INT,
    price                   NUMERIC(20,8),
    billed                  BOOLEAN NOT NULL DEFAULT FALSE,
    billing_transaction_id  UUID REFERENCES transactions(id),
    refund_status           TEXT NOT NULL DEFAULT 'none'
                            CHECK (refund_status IN ('none','pending','completed','failed')),
    refund_amount           NUMERIC(20,8),
    refund_transaction_id   UUID REFERENCES transactions(id),
    refund_error            TEXT,
    notes                   TEXT,
    metadata                JSONB NOT NULL DEFAULT '{}',
    created_at              TIMESTAMPTZ NOT NULL DEFAULT now()
);
CREATE INDEX IF NOT EXISTS idx_dialer_logs_call ON dialer_call_logs (call_id);

CREATE TABLE IF NOT EXISTS action_sends (
    id                      UUID PRIMARY KEY,
    user_id                 UUID NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    agent_id                UUID REFERENCES agents(id) ON DELETE SET NULL,
    kind                    TEXT NOT NULL CHECK (kind IN ('email','sms','mail','meeting')),
    template_id             UUID REFERENCES doc_templates(id) ON DELETE SET NULL,
    dedupe_key              TEXT NOT NULL UNIQUE,
    call_id                 TEXT,
    call_domain             TEXT,
    recipient               TEXT NOT NULL,
    recipient_name          TEXT,
    recipient_address       JSONB,
    subject                 TEXT,
    body                    TEXT,
    status                  TEXT NOT NULL DEFAULT 'pending'
                            CHECK (status IN ('pending','completed','failed')),
    attempt_count           INT NOT NULL DEFAULT 1,
    provider_message_id     TEXT,
    provider_batch_id       TEXT,
    tracking_number         TEXT,
    amount                  NUMERIC(20,8),
    billed                  BOOLEAN NOT NULL DEFAULT FALSE,
    billing_transaction_id  UUID REFERENCES transactions(id),
    refund_status           TEXT NOT NULL DEFAULT 'none'
                            CHECK (refund_status IN ('none','pending','completed','failed')),
    refund_amount           NUMERIC(20,8),
    refund_transaction_id   UUID REFERENCES transactions(id),
    refund_error            TEXT,
    error                   TEXT,
    raw_payload             JSONB,
    created_at              TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at              TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE TABLE IF NOT EXISTS cdrs (
    id                  UUID PRIMARY KEY,
    user_id             UUID NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    kind                TEXT NOT NULL CHECK (kind IN ('ai_inbound','dialer_outbound')),
    source_id           UUID NOT NULL UNIQUE,
    call_id             TEXT,
    call_domain         TEXT,
    from_number         TEXT NOT NULL DEFAULT '',
    to_number           TEXT NOT NULL DEFAULT '',
    time_start          TIMESTAMPTZ NOT NULL,
    time_end            TIMESTAMPTZ,
    billsec             INT NOT NULL DEFAULT 0,
    price               NUMERIC(20,8),
    status              TEXT NOT NULL,
    created_at          TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE TABLE IF NOT EXISTS payment_requests (
    id                      UUID PRIMARY KEY,
    user_id                 UUID NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    provider                TEXT NOT NULL CHECK (provider IN ('square','stripe')),
    dedupe_key              TEXT UNIQUE,
    provider_payment_id     TEXT,
    provider_checkout_id    TEXT,
    amount_cents            BIGINT NOT NULL,
    currency                TEXT NOT NULL DEFAULT 'USD',
    description             TEXT NOT NULL DEFAULT '',
    customer_email          TEXT,
    customer_phone          TEXT,
    payment_url             TEXT NOT NULL DEFAULT '',
    status                  TEXT NOT NULL DEFAULT 'pending'
                            CHECK (status IN ('pending','completed','failed','expired','cancelled')),
    call_id                 TEXT,
    call_domain             TEXT,
    paid_at                 TIMESTAMPTZ,
    metadata                JSONB NOT NULL DEFAULT '{}',
    created_at              TIMESTAMPTZ NOT NULL DEFAULT now()
);
CREATE INDEX IF NOT EXISTS idx_payment_requests_remote ON payment_requests (provider, provider_payment_id);

CREATE TABLE IF NOT EXISTS incoming_deposits (
    id                      UUID PRIMARY KEY,
    user_id                 UUID NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    provider                TEXT NOT NULL CHECK (provider IN ('square','stripe','crypto','ach')),
    remote_id               TEXT,
    order_id                TEXT NOT NULL,
    amount                  NUMERIC(20,8) NOT NULL,
    currency                TEXT NOT NULL DEFAULT 'USD',
    status                  TEXT NOT NULL DEFAULT 'pending',
    credited                BOOLEAN NOT NULL DEFAULT FALSE,
    credit_transaction_id   UUID REFERENCES transactions(id),
    raw_payload             JSONB,
    created_at              TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at              TIMESTAMPTZ NOT NULL DEFAULT now(),
    UNIQUE (provider, order_id)
);
"#;

/// Create all control-plane tables if they do not exist.
pub async fn bootstrap_schema(pool: &DbPool) -> Result<()> {
    let conn = pool.get().await?;
    conn.batch_execute(SCHEMA).await?;
    info!("Database schema bootstrapped");
    Ok(())
}
