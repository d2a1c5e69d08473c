//! Portal configuration
//!
//! Everything is read from the environment once at startup. Money values are
//! decimals so sub-cent per-second rates survive parsing intact.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use voxway_core::{EncryptionKey, Result, VoxwayError};

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_opt(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_decimal(name: &str, default: Decimal) -> Decimal {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_bool(name: &str, default: bool) -> bool {
    std::env::var(name)
        .ok()
        .map(|s| matches!(s.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}

fn env_u32(name: &str, default: u32) -> u32 {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_i64(name: &str, default: i64) -> i64 {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

#[derive(Debug, Clone)]
pub struct PortalConfig {
    pub http_bind: String,
    pub public_base_url: String,
    pub rates: RateConfig,
    pub inbound: InboundConfig,
    pub caller_memory: CallerMemoryConfig,
    pub dialer: DialerConfig,
    pub billing_interval_minutes: u32,
    pub runtime: RuntimeConfig,
    pub telephony: TelephonyConfig,
    pub mail: MailConfig,
    pub payments: PaymentsConfig,
    pub platform_email: PlatformEmailConfig,
    pub sms: SmsConfig,
}

impl PortalConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            http_bind: env_or("HTTP_BIND", "0.0.0.0:8080"),
            public_base_url: env_or("PUBLIC_BASE_URL", "http://localhost:8080"),
            rates: RateConfig::from_env(),
            inbound: InboundConfig::from_env(),
            caller_memory: CallerMemoryConfig::from_env(),
            dialer: DialerConfig::from_env()?,
            billing_interval_minutes: env_u32("BILLING_MARKUP_INTERVAL_MINUTES", 10),
            runtime: RuntimeConfig::from_env(),
            telephony: TelephonyConfig::from_env(),
            mail: MailConfig::from_env(),
            payments: PaymentsConfig::from_env()?,
            platform_email: PlatformEmailConfig::from_env(),
            sms: SmsConfig::from_env(),
        })
    }

    /// The per-user secret encryption key. Absence is tolerated until the
    /// first secret-bearing row must be written, which is then fatal for
    /// that operation.
    pub fn encryption_key() -> Result<Option<EncryptionKey>> {
        match env_opt("USER_SMTP_ENCRYPTION_KEY") {
            Some(encoded) => Ok(Some(EncryptionKey::from_base64(&encoded)?)),
            None => Ok(None),
        }
    }
}

/// Rate tables input. All pure pricing functions read from this.
#[derive(Debug, Clone)]
pub struct RateConfig {
    pub did_local_monthly_fee: Decimal,
    pub did_tollfree_monthly_fee: Decimal,
    pub inbound_local_rate_per_min: Decimal,
    pub inbound_tollfree_rate_per_min: Decimal,
    pub inbound_round_up_to_minute: bool,
    pub dialer_rate_per_min: Decimal,
    pub dialer_round_up_to_minute: bool,
    pub email_cost: Decimal,
    pub sms_cost: Decimal,
    pub meeting_link_cost: Decimal,
    pub mail_markup_flat: Decimal,
    pub mail_markup_percent: Decimal,
}

impl RateConfig {
    pub fn from_env() -> Self {
        Self {
            did_local_monthly_fee: env_decimal("AI_DID_LOCAL_MONTHLY_FEE", dec!(2.00)),
            did_tollfree_monthly_fee: env_decimal("AI_DID_TOLLFREE_MONTHLY_FEE", dec!(4.00)),
            inbound_local_rate_per_min: env_decimal("AI_INBOUND_LOCAL_RATE_PER_MIN", dec!(0.05)),
            inbound_tollfree_rate_per_min: env_decimal("AI_INBOUND_TOLLFREE_RATE_PER_MIN", dec!(0.08)),
            inbound_round_up_to_minute: env_bool("AI_INBOUND_BILLING_ROUND_UP_TO_MINUTE", false),
            dialer_rate_per_min: env_decimal("DIALER_OUTBOUND_RATE_PER_MIN", dec!(0.05)),
            dialer_round_up_to_minute: env_bool("DIALER_OUTBOUND_BILLING_ROUND_UP_TO_MINUTE", false),
            email_cost: env_decimal("AI_EMAIL_COST", dec!(0.10)),
            sms_cost: env_decimal("AI_SMS_COST", dec!(0.05)),
            meeting_link_cost: env_decimal("AI_VIDEO_MEETING_LINK_COST", dec!(0.25)),
            mail_markup_flat: env_decimal("AI_MAIL_MARKUP_FLAT", dec!(0.50)),
            mail_markup_percent: env_decimal("AI_MAIL_MARKUP_PERCENT", dec!(0.15)),
        }
    }
}

/// Inbound admission and non-payment policy.
#[derive(Debug, Clone)]
pub struct InboundConfig {
    pub min_credit: Decimal,
    pub disable_numbers_when_balance_low: bool,
    pub balance_fail_closed: bool,
    pub cancel_on_insufficient_balance: bool,
    pub grace_days: i64,
}

impl InboundConfig {
    pub fn from_env() -> Self {
        Self {
            min_credit: env_decimal("AI_INBOUND_MIN_CREDIT", dec!(0.25)),
            disable_numbers_when_balance_low: env_bool("AI_INBOUND_DISABLE_NUMBERS_WHEN_BALANCE_LOW", true),
            balance_fail_closed: env_bool("AI_INBOUND_BALANCE_FAIL_CLOSED", false),
            cancel_on_insufficient_balance: env_bool("AI_MONTHLY_CANCEL_ON_INSUFFICIENT_BALANCE", true),
            grace_days: env_i64("AI_MONTHLY_GRACE_DAYS", 3),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CallerMemoryConfig {
    pub enable: bool,
    pub max_calls: i64,
    pub max_messages: i64,
    pub max_chars_per_message: usize,
    pub max_days: i64,
}

impl CallerMemoryConfig {
    pub fn from_env() -> Self {
        Self {
            enable: env_bool("AI_CALLER_MEMORY_ENABLE", true),
            max_calls: env_i64("AI_CALLER_MEMORY_MAX_CALLS", 3),
            max_messages: env_i64("AI_CALLER_MEMORY_MAX_MESSAGES", 20),
            max_chars_per_message: env_u32("AI_CALLER_MEMORY_MAX_CHARS_PER_MESSAGE", 500) as usize,
            max_days: env_i64("AI_CALLER_MEMORY_MAX_DAYS", 30),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DialerConfig {
    pub min_concurrency: u32,
    pub max_concurrency: u32,
    pub worker_interval_seconds: u64,
}

impl DialerConfig {
    pub fn from_env() -> Result<Self> {
        let min_concurrency = env_u32("DIALER_MIN_CONCURRENCY", 1);
        let max_concurrency = env_u32("DIALER_MAX_CONCURRENCY", 20);
        if min_concurrency == 0 || min_concurrency > max_concurrency {
            return Err(VoxwayError::Config(format!(
                "Invalid dialer concurrency bounds: {}..{}",
                min_concurrency, max_concurrency
            )));
        }
        Ok(Self {
            min_concurrency,
            max_concurrency,
            worker_interval_seconds: env_u32("DIALER_WORKER_INTERVAL_SECONDS", 10) as u64,
        })
    }
}

/// Agent-runtime provider (hosted session runner).
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub base_url: String,
    pub private_api_key: String,
    pub public_api_key: String,
    pub agent_image: String,
    pub region: String,
    pub org_id: String,
    /// Shared service that plays audio-only campaign announcements.
    pub announcer_service: String,
    pub stt_api_key: String,
    pub tts_api_key: String,
    pub llm_api_key: String,
}

impl RuntimeConfig {
    pub fn from_env() -> Self {
        Self {
            base_url: env_or("PIPECAT_API_BASE_URL", "https://api.pipecat.daily.co/v1"),
            private_api_key: env_or("PIPECAT_PRIVATE_API_KEY", ""),
            public_api_key: env_or("PIPECAT_PUBLIC_API_KEY", ""),
            agent_image: env_or("PIPECAT_AGENT_IMAGE", ""),
            region: env_or("PIPECAT_REGION", "us-west-2"),
            org_id: env_or("PIPECAT_ORG_ID", ""),
            announcer_service: env_or("PIPECAT_ANNOUNCER_SERVICE", "vx-announcer"),
            stt_api_key: env_or("STT_API_KEY", ""),
            tts_api_key: env_or("TTS_API_KEY", ""),
            llm_api_key: env_or("LLM_API_KEY", ""),
        }
    }
}

/// Telephony/room provider (PSTN numbers, dial-in routing, events).
#[derive(Debug, Clone)]
pub struct TelephonyConfig {
    pub base_url: String,
    pub api_key: String,
    pub dialin_webhook_token: Option<String>,
}

impl TelephonyConfig {
    pub fn from_env() -> Self {
        Self {
            base_url: env_or("DAILY_API_BASE_URL", "https://api.daily.co/v1"),
            api_key: env_or("DAILY_API_KEY", ""),
            dialin_webhook_token: env_opt("DAILY_DIALIN_WEBHOOK_TOKEN"),
        }
    }
}

/// Print-and-mail provider plus markup policy.
#[derive(Debug, Clone)]
pub struct MailConfig {
    pub enabled: bool,
    pub base_url: String,
    pub username: String,
    pub password: String,
    pub font_dir: String,
    pub font_family: String,
}

impl MailConfig {
    pub fn from_env() -> Self {
        Self {
            enabled: env_bool("AI_PHYSICAL_MAIL_ENABLED", false),
            base_url: env_or("CLICK2MAIL_BASE_URL", "https://rest.click2mail.com"),
            username: env_or("CLICK2MAIL_USERNAME", ""),
            password: env_or("CLICK2MAIL_PASSWORD", ""),
            font_dir: env_or("MAIL_FONT_DIR", "/usr/share/fonts/truetype/liberation"),
            font_family: env_or("MAIL_FONT_FAMILY", "LiberationSans"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardProvider {
    Square,
    Stripe,
}

#[derive(Debug, Clone)]
pub struct PaymentsConfig {
    pub card_provider: CardProvider,
    pub checkout_min_amount: Decimal,
    pub checkout_max_amount: Decimal,
    pub square_access_token: Option<String>,
    pub square_location_id: Option<String>,
    pub square_webhook_signature_key: Option<String>,
    pub square_notification_url: Option<String>,
    pub square_base_url: String,
    pub stripe_secret_key: Option<String>,
    pub stripe_webhook_secret: Option<String>,
    pub stripe_base_url: String,
    pub crypto_api_key: Option<String>,
    pub crypto_ipn_secret: Option<String>,
    pub crypto_base_url: String,
    pub ach_base_url: String,
    pub ach_username: Option<String>,
    pub ach_password: Option<String>,
    pub ach_dev_key: Option<String>,
    pub ach_webhook_secret: Option<String>,
}

impl PaymentsConfig {
    pub fn from_env() -> Result<Self> {
        let card_provider = match env_or("CARD_PAYMENT_PROVIDER", "square").to_lowercase().as_str() {
            "square" => CardProvider::Square,
            "stripe" => CardProvider::Stripe,
            other => {
                return Err(VoxwayError::Config(format!(
                    "Unknown CARD_PAYMENT_PROVIDER: {}",
                    other
                )))
            }
        };
        Ok(Self {
            card_provider,
            checkout_min_amount: env_decimal("CHECKOUT_MIN_AMOUNT", dec!(5.00)),
            checkout_max_amount: env_decimal("CHECKOUT_MAX_AMOUNT", dec!(1000.00)),
            square_access_token: env_opt("SQUARE_ACCESS_TOKEN"),
            square_location_id: env_opt("SQUARE_LOCATION_ID"),
            square_webhook_signature_key: env_opt("SQUARE_WEBHOOK_SIGNATURE_KEY"),
            square_notification_url: env_opt("SQUARE_NOTIFICATION_URL"),
            square_base_url: env_or("SQUARE_API_BASE_URL", "https://connect.squareup.com"),
            stripe_secret_key: env_opt("STRIPE_SECRET_KEY"),
            stripe_webhook_secret: env_opt("STRIPE_WEBHOOK_SECRET"),
            stripe_base_url: env_or("STRIPE_API_BASE_URL", "https://api.stripe.com"),
            crypto_api_key: env_opt("NOWPAYMENTS_API_KEY"),
            crypto_ipn_secret: env_opt("NOWPAYMENTS_IPN_SECRET"),
            crypto_base_url: env_or("NOWPAYMENTS_API_BASE_URL", "https://api.nowpayments.io/v1"),
            ach_base_url: env_or("ACH_API_BASE_URL", ""),
            ach_username: env_opt("ACH_USERNAME"),
            ach_password: env_opt("ACH_PASSWORD"),
            ach_dev_key: env_opt("ACH_DEV_KEY"),
            ach_webhook_secret: env_opt("ACH_WEBHOOK_SECRET"),
        })
    }
}

/// Platform-originated email (non-payment notices) via a transactional API.
#[derive(Debug, Clone)]
pub struct PlatformEmailConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub from_address: String,
}

impl PlatformEmailConfig {
    pub fn from_env() -> Self {
        Self {
            api_key: env_opt("SMTP2GO_API_KEY"),
            base_url: env_or("SMTP2GO_API_BASE_URL", "https://api.smtp2go.com/v3"),
            from_address: env_or("PLATFORM_EMAIL_FROM", "no-reply@voxway.io"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SmsConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub from_number: Option<String>,
}

impl SmsConfig {
    pub fn from_env() -> Self {
        Self {
            api_key: env_opt("SMS_API_KEY"),
            base_url: env_or("SMS_API_BASE_URL", ""),
            from_number: env_opt("SMS_FROM_NUMBER"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_defaults() {
        let rates = RateConfig::from_env();
        assert!(rates.did_tollfree_monthly_fee >= rates.did_local_monthly_fee);
        assert!(rates.inbound_local_rate_per_min > Decimal::ZERO);
    }

    #[test]
    fn test_inbound_defaults() {
        let inbound = InboundConfig::from_env();
        assert_eq!(inbound.grace_days, 3);
        assert!(inbound.cancel_on_insufficient_balance);
    }
}
