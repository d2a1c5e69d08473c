//! Voxway Portal
//!
//! Control plane for the hosted AI-telephony platform:
//! - Wallet ledger and idempotent charge/refund discipline
//! - AI number lifecycle with grace-period non-payment cancellation
//! - Inbound call coordination and provider event reduction
//! - Outbound dialer campaigns with per-campaign concurrency caps
//! - Agent projection into the hosted runtime
//! - Tool action endpoints and deposit processor webhooks

use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

use voxway_core::{HealthStatus, Result, ServiceRuntime, VoxwayError, VoxwayService};
use voxway_db::{bootstrap_schema, DbPool, PoolConfig};

mod actions;
mod agents;
mod api;
mod billing;
mod calls;
mod config;
mod deposits;
mod dialer;
mod ledger;
mod numbers;
mod providers;
mod scheduler;
mod state;
mod types;
mod users;
mod webhooks;

#[cfg(test)]
mod tests;

use config::PortalConfig;
use state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("portal=info".parse().expect("valid tracing directive")),
        )
        .json()
        .init();

    info!("Starting Voxway portal");

    let service = Arc::new(PortalService::new().await?);
    ServiceRuntime::run(service).await
}

pub struct PortalService {
    state: AppState,
    shutdown_tx: watch::Sender<bool>,
    start_time: std::time::Instant,
}

impl PortalService {
    pub async fn new() -> Result<Self> {
        let config = PortalConfig::from_env()?;
        let encryption_key = PortalConfig::encryption_key()?;
        if encryption_key.is_none() {
            warn!("USER_SMTP_ENCRYPTION_KEY not set; secret-bearing operations will fail");
        }

        // DB unreachable at startup is fatal.
        let pool = DbPool::new(PoolConfig::from_env())
            .await
            .map_err(VoxwayError::from)?;
        if !pool.is_healthy().await {
            return Err(VoxwayError::Database("Database is unreachable".into()));
        }
        bootstrap_schema(&pool).await.map_err(VoxwayError::from)?;

        let state = AppState::new(config, pool, encryption_key);
        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            state,
            shutdown_tx,
            start_time: std::time::Instant::now(),
        })
    }

    /// Subscribe the telephony provider's domain webhook to call events.
    /// Best effort: a failure only degrades event delivery, not startup.
    async fn register_event_webhook(&self) {
        let events_url = match &self.state.config.telephony.dialin_webhook_token {
            Some(token) => format!(
                "{}/events?token={}",
                self.state.config.public_base_url, token
            ),
            None => format!("{}/events", self.state.config.public_base_url),
        };
        if let Err(e) = self.state.telephony.register_domain_webhook(&events_url).await {
            warn!(error = %e, "Domain webhook registration failed");
        }
    }
}

#[async_trait::async_trait]
impl VoxwayService for PortalService {
    fn service_id(&self) -> &'static str {
        "portal"
    }

    async fn health(&self) -> HealthStatus {
        HealthStatus {
            healthy: self.state.pool.is_healthy().await,
            service_id: self.service_id().to_string(),
            version: self.version().to_string(),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }

    async fn shutdown(&self) -> Result<()> {
        info!("Shutting down portal");
        let _ = self.shutdown_tx.send(true);
        Ok(())
    }

    async fn start(&self) -> Result<()> {
        self.register_event_webhook().await;

        // Background workers share the shutdown signal.
        tokio::spawn(scheduler::run(
            self.state.clone(),
            self.shutdown_tx.subscribe(),
        ));
        tokio::spawn(dialer::scheduler::run(
            self.state.clone(),
            self.shutdown_tx.subscribe(),
        ));

        let router = api::rest::create_router(self.state.clone());
        let bind = &self.state.config.http_bind;
        info!(bind = %bind, "Starting HTTP server");

        let listener = tokio::net::TcpListener::bind(bind).await?;
        axum::serve(listener, router)
            .await
            .map_err(|e| VoxwayError::Internal(e.to_string()))?;

        Ok(())
    }
}
