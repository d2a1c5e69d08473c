//! Shared application state
//!
//! Constructed once at startup and cloned into every handler and worker.
//! All mutable state lives in the database; this struct only carries the
//! pool, configuration, and provider clients.

use std::sync::Arc;

use voxway_core::{EncryptionKey, Result, VoxwayError};
use voxway_db::DbPool;

use crate::billing::ChargeEngine;
use crate::config::PortalConfig;
use crate::ledger::Ledger;
use crate::providers::notify::{PlatformMailer, SmsClient};
use crate::providers::printmail::PrintMailClient;
use crate::providers::runtime::RuntimeClient;
use crate::providers::telephony::TelephonyClient;

pub(crate) fn db_err(e: tokio_postgres::Error) -> VoxwayError {
    VoxwayError::Database(e.to_string())
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<PortalConfig>,
    pub pool: DbPool,
    pub ledger: Ledger,
    pub charges: ChargeEngine,
    pub runtime: RuntimeClient,
    pub telephony: TelephonyClient,
    pub printmail: PrintMailClient,
    pub mailer: PlatformMailer,
    pub sms: SmsClient,
    pub encryption_key: Option<EncryptionKey>,
}

impl AppState {
    pub fn new(config: PortalConfig, pool: DbPool, encryption_key: Option<EncryptionKey>) -> Self {
        Self {
            ledger: Ledger::new(pool.clone()),
            charges: ChargeEngine::new(pool.clone()),
            runtime: RuntimeClient::new(config.runtime.clone()),
            telephony: TelephonyClient::new(config.telephony.clone()),
            printmail: PrintMailClient::new(config.mail.clone()),
            mailer: PlatformMailer::new(config.platform_email.clone()),
            sms: SmsClient::new(config.sms.clone()),
            config: Arc::new(config),
            pool,
            encryption_key,
        }
    }

    /// The encryption key, required for any operation touching sealed secrets.
    pub fn require_key(&self) -> Result<&EncryptionKey> {
        self.encryption_key.as_ref().ok_or_else(|| {
            VoxwayError::Config("USER_SMTP_ENCRYPTION_KEY is not configured".to_string())
        })
    }
}
