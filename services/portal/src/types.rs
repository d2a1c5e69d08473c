//! Domain types
//!
//! Row-backed entities and their status enums. Statuses are stored as text;
//! each enum carries its wire/storage form via `as_str` and `parse_str`.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;
use voxway_db::Row;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    Credit,
    Debit,
    Adjustment,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Credit => "credit",
            Self::Debit => "debit",
            Self::Adjustment => "adjustment",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub user_id: Uuid,
    pub amount: Decimal,
    pub description: String,
    pub kind: String,
    pub payment_method: Option<String>,
    pub reference_id: Option<String>,
    pub balance_before: Decimal,
    pub balance_after: Decimal,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    pub fn from_row(row: &Row) -> Self {
        Self {
            id: row.get("id"),
            user_id: row.get("user_id"),
            amount: row.get("amount"),
            description: row.get("description"),
            kind: row.get("kind"),
            payment_method: row.get("payment_method"),
            reference_id: row.get("reference_id"),
            balance_before: row.get("balance_before"),
            balance_after: row.get("balance_after"),
            status: row.get("status"),
            created_at: row.get("created_at"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub balance: Decimal,
    pub is_active: bool,
    pub is_admin: bool,
    pub suspended: bool,
    pub transfer_number: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn from_row(row: &Row) -> Self {
        Self {
            id: row.get("id"),
            username: row.get("username"),
            email: row.get("email"),
            balance: row.get("balance"),
            is_active: row.get("is_active"),
            is_admin: row.get("is_admin"),
            suspended: row.get("suspended"),
            transfer_number: row.get("transfer_number"),
            created_at: row.get("created_at"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: Uuid,
    pub user_id: Uuid,
    pub display_name: String,
    pub greeting: String,
    pub prompt: String,
    pub voice_id: String,
    pub background_audio_url: Option<String>,
    pub background_audio_gain: Option<f32>,
    pub transfer_to_number: Option<String>,
    pub inbound_transfer_enabled: bool,
    pub inbound_transfer_number: Option<String>,
    pub runtime_service_name: String,
    pub runtime_secret_set_name: String,
    pub runtime_region: String,
    pub action_token_hash: Option<String>,
    pub default_doc_template_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl Agent {
    pub fn from_row(row: &Row) -> Self {
        Self {
            id: row.get("id"),
            user_id: row.get("user_id"),
            display_name: row.get("display_name"),
            greeting: row.get("greeting"),
            prompt: row.get("prompt"),
            voice_id: row.get("voice_id"),
            background_audio_url: row.get("background_audio_url"),
            background_audio_gain: row.get("background_audio_gain"),
            transfer_to_number: row.get("transfer_to_number"),
            inbound_transfer_enabled: row.get("inbound_transfer_enabled"),
            inbound_transfer_number: row.get("inbound_transfer_number"),
            runtime_service_name: row.get("runtime_service_name"),
            runtime_secret_set_name: row.get("runtime_secret_set_name"),
            runtime_region: row.get("runtime_region"),
            action_token_hash: row.get("action_token_hash"),
            default_doc_template_id: row.get("default_doc_template_id"),
            created_at: row.get("created_at"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalNumber {
    pub id: Uuid,
    pub user_id: Uuid,
    pub provider_number_id: String,
    pub phone_number: String,
    pub assigned_agent_id: Option<Uuid>,
    pub dialin_config_id: Option<String>,
    pub cancel_pending: bool,
    pub cancel_pending_since: Option<DateTime<Utc>>,
    pub cancel_after: Option<DateTime<Utc>>,
    pub cancel_billed_to: Option<DateTime<Utc>>,
    pub notice_initial_sent_at: Option<DateTime<Utc>>,
    pub notice_reminder_sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ExternalNumber {
    pub fn from_row(row: &Row) -> Self {
        Self {
            id: row.get("id"),
            user_id: row.get("user_id"),
            provider_number_id: row.get("provider_number_id"),
            phone_number: row.get("phone_number"),
            assigned_agent_id: row.get("assigned_agent_id"),
            dialin_config_id: row.get("dialin_config_id"),
            cancel_pending: row.get("cancel_pending"),
            cancel_pending_since: row.get("cancel_pending_since"),
            cancel_after: row.get("cancel_after"),
            cancel_billed_to: row.get("cancel_billed_to"),
            notice_initial_sent_at: row.get("notice_initial_sent_at"),
            notice_reminder_sent_at: row.get("notice_reminder_sent_at"),
            created_at: row.get("created_at"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    Pending,
    BlockedInsufficientFunds,
    BlockedBalanceCheckFailed,
    PipecatStarted,
    PipecatStartFailed,
    Connected,
    Warning,
    Completed,
    Missed,
    Error,
}

impl CallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::BlockedInsufficientFunds => "blocked_insufficient_funds",
            Self::BlockedBalanceCheckFailed => "blocked_balance_check_failed",
            Self::PipecatStarted => "pipecat_started",
            Self::PipecatStartFailed => "pipecat_start_failed",
            Self::Connected => "connected",
            Self::Warning => "warning",
            Self::Completed => "completed",
            Self::Missed => "missed",
            Self::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Missed | Self::Error)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallLog {
    pub id: Uuid,
    pub call_id: String,
    pub call_domain: String,
    pub event_call_id: Option<String>,
    pub event_call_domain: Option<String>,
    pub user_id: Uuid,
    pub agent_id: Option<Uuid>,
    pub external_number_id: Option<Uuid>,
    pub direction: String,
    pub from_number: String,
    pub to_number: String,
    pub time_start: DateTime<Utc>,
    pub time_connect: Option<DateTime<Utc>>,
    pub time_end: Option<DateTime<Utc>>,
    pub duration_sec: Option<i32>,
    pub billsec: Option<i32>,
    pub price: Option<Decimal>,
    pub billed: bool,
    pub billing_transaction_id: Option<Uuid>,
    pub status: String,
}

impl CallLog {
    pub fn from_row(row: &Row) -> Self {
        Self {
            id: row.get("id"),
            call_id: row.get("call_id"),
            call_domain: row.get("call_domain"),
            event_call_id: row.get("event_call_id"),
            event_call_domain: row.get("event_call_domain"),
            user_id: row.get("user_id"),
            agent_id: row.get("agent_id"),
            external_number_id: row.get("external_number_id"),
            direction: row.get("direction"),
            from_number: row.get("from_number"),
            to_number: row.get("to_number"),
            time_start: row.get("time_start"),
            time_connect: row.get("time_connect"),
            time_end: row.get("time_end"),
            duration_sec: row.get("duration_sec"),
            billsec: row.get("billsec"),
            price: row.get("price"),
            billed: row.get("billed"),
            billing_transaction_id: row.get("billing_transaction_id"),
            status: row.get("status"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallMessage {
    pub id: Uuid,
    pub user_id: Uuid,
    pub agent_id: Option<Uuid>,
    pub call_domain: String,
    pub call_id: String,
    pub message_id: String,
    pub role: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl CallMessage {
    pub fn from_row(row: &Row) -> Self {
        Self {
            id: row.get("id"),
            user_id: row.get("user_id"),
            agent_id: row.get("agent_id"),
            call_domain: row.get("call_domain"),
            call_id: row.get("call_id"),
            message_id: row.get("message_id"),
            role: row.get("role"),
            content: row.get("content"),
            created_at: row.get("created_at"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CampaignStatus {
    Draft,
    Running,
    Paused,
    Completed,
    Deleted,
}

impl CampaignStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Deleted => "deleted",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(Self::Draft),
            "running" => Some(Self::Running),
            "paused" => Some(Self::Paused),
            "completed" => Some(Self::Completed),
            "deleted" => Some(Self::Deleted),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub ai_agent_id: Option<Uuid>,
    pub concurrency_limit: i32,
    pub status: String,
    pub has_audio: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_started_at: Option<DateTime<Utc>>,
    pub last_paused_at: Option<DateTime<Utc>>,
}

impl Campaign {
    pub fn from_row(row: &Row) -> Self {
        Self {
            id: row.get("id"),
            user_id: row.get("user_id"),
            name: row.get("name"),
            ai_agent_id: row.get("ai_agent_id"),
            concurrency_limit: row.get("concurrency_limit"),
            status: row.get("status"),
            has_audio: row.get::<_, Option<String>>("campaign_audio_token").is_some(),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
            last_started_at: row.get("last_started_at"),
            last_paused_at: row.get("last_paused_at"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeadStatus {
    Pending,
    Queued,
    Dialing,
    Answered,
    Voicemail,
    Transferred,
    Failed,
    Completed,
}

impl LeadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Queued => "queued",
            Self::Dialing => "dialing",
            Self::Answered => "answered",
            Self::Voicemail => "voicemail",
            Self::Transferred => "transferred",
            Self::Failed => "failed",
            Self::Completed => "completed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lead {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub user_id: Uuid,
    pub phone_number: String,
    pub lead_name: Option<String>,
    pub metadata: Value,
    pub status: String,
    pub attempt_count: i32,
    pub last_call_at: Option<DateTime<Utc>>,
}

impl Lead {
    pub fn from_row(row: &Row) -> Self {
        Self {
            id: row.get("id"),
            campaign_id: row.get("campaign_id"),
            user_id: row.get("user_id"),
            phone_number: row.get("phone_number"),
            lead_name: row.get("lead_name"),
            metadata: row.get("metadata"),
            status: row.get("status"),
            attempt_count: row.get("attempt_count"),
            last_call_at: row.get("last_call_at"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Email,
    Sms,
    Mail,
    Meeting,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Sms => "sms",
            Self::Mail => "mail",
            Self::Meeting => "meeting",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionStatus {
    Pending,
    Completed,
    Failed,
}

impl ActionStatus {
    pub fn parse_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionSend {
    pub id: Uuid,
    pub user_id: Uuid,
    pub agent_id: Option<Uuid>,
    pub kind: String,
    pub dedupe_key: String,
    pub call_id: Option<String>,
    pub call_domain: Option<String>,
    pub recipient: String,
    pub status: String,
    pub attempt_count: i32,
    pub provider_message_id: Option<String>,
    pub provider_batch_id: Option<String>,
    pub tracking_number: Option<String>,
    pub amount: Option<Decimal>,
    pub billed: bool,
    pub billing_transaction_id: Option<Uuid>,
    pub refund_status: String,
    pub refund_amount: Option<Decimal>,
    pub refund_transaction_id: Option<Uuid>,
    pub error: Option<String>,
}

impl ActionSend {
    pub fn from_row(row: &Row) -> Self {
        Self {
            id: row.get("id"),
            user_id: row.get("user_id"),
            agent_id: row.get("agent_id"),
            kind: row.get("kind"),
            dedupe_key: row.get("dedupe_key"),
            call_id: row.get("call_id"),
            call_domain: row.get("call_domain"),
            recipient: row.get("recipient"),
            status: row.get("status"),
            attempt_count: row.get("attempt_count"),
            provider_message_id: row.get("provider_message_id"),
            provider_batch_id: row.get("provider_batch_id"),
            tracking_number: row.get("tracking_number"),
            amount: row.get("amount"),
            billed: row.get("billed"),
            billing_transaction_id: row.get("billing_transaction_id"),
            refund_status: row.get("refund_status"),
            refund_amount: row.get("refund_amount"),
            refund_transaction_id: row.get("refund_transaction_id"),
            error: row.get("error"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentRequest {
    pub id: Uuid,
    pub user_id: Uuid,
    pub provider: String,
    pub provider_payment_id: Option<String>,
    pub provider_checkout_id: Option<String>,
    pub amount_cents: i64,
    pub currency: String,
    pub description: String,
    pub payment_url: String,
    pub status: String,
    pub call_id: Option<String>,
    pub call_domain: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
}

impl PaymentRequest {
    pub fn from_row(row: &Row) -> Self {
        Self {
            id: row.get("id"),
            user_id: row.get("user_id"),
            provider: row.get("provider"),
            provider_payment_id: row.get("provider_payment_id"),
            provider_checkout_id: row.get("provider_checkout_id"),
            amount_cents: row.get("amount_cents"),
            currency: row.get("currency"),
            description: row.get("description"),
            payment_url: row.get("payment_url"),
            status: row.get("status"),
            call_id: row.get("call_id"),
            call_domain: row.get("call_domain"),
            paid_at: row.get("paid_at"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncomingDeposit {
    pub id: Uuid,
    pub user_id: Uuid,
    pub provider: String,
    pub remote_id: Option<String>,
    pub order_id: String,
    pub amount: Decimal,
    pub currency: String,
    pub status: String,
    pub credited: bool,
    pub credit_transaction_id: Option<Uuid>,
}

impl IncomingDeposit {
    pub fn from_row(row: &Row) -> Self {
        Self {
            id: row.get("id"),
            user_id: row.get("user_id"),
            provider: row.get("provider"),
            remote_id: row.get("remote_id"),
            order_id: row.get("order_id"),
            amount: row.get("amount"),
            currency: row.get("currency"),
            status: row.get("status"),
            credited: row.get("credited"),
            credit_transaction_id: row.get("credit_transaction_id"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct UserSmtpSettings {
    pub user_id: Uuid,
    pub host: String,
    pub port: i32,
    pub secure: bool,
    pub username: String,
    pub password: voxway_core::SealedSecret,
    pub from_address: String,
}

impl UserSmtpSettings {
    pub fn from_row(row: &Row) -> Self {
        Self {
            user_id: row.get("user_id"),
            host: row.get("host"),
            port: row.get("port"),
            secure: row.get("secure"),
            username: row.get("username"),
            password: voxway_core::SealedSecret {
                ciphertext: row.get("password_ciphertext"),
                iv: row.get("password_iv"),
                tag: row.get("password_tag"),
            },
            from_address: row.get("from_address"),
        }
    }
}
