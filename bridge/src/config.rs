//! Bridge configuration loaded via OrthoConfig.
//!
//! Every value may come from CLI flags, `BRIDGE_*` environment variables or a
//! config file. Absent values fall back to the defaults exposed through the
//! accessor methods.

use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::Deserialize;

use crate::domain::ports::OutboundError;
use crate::domain::{DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_DELAY, RetryPolicy};
use crate::outbound::http::{ReqwestClient, RetryingClient, connection_reset_policy};
use crate::outbound::persistence::PoolConfig;
use crate::runtime::ReactorConfig;

const DEFAULT_OUTBOUND_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";

/// Runtime settings for the reactor, outbound retry and persistence.
#[derive(Debug, Clone, Deserialize, OrthoConfig)]
#[ortho_config(prefix = "BRIDGE")]
pub struct BridgeSettings {
    /// Worker threads on the compute lane.
    pub compute_threads: Option<usize>,
    /// Upper bound of the blocking lane's thread pool.
    pub blocking_threads: Option<usize>,
    /// Attempts made for retryable outbound failures, including the first.
    pub retry_max_attempts: Option<u32>,
    /// Fixed pause between outbound attempts in milliseconds.
    pub retry_delay_ms: Option<u64>,
    /// Per-request outbound timeout in milliseconds.
    pub outbound_timeout_ms: Option<u64>,
    /// PostgreSQL connection URL. Persistence is disabled when absent.
    pub database_url: Option<String>,
    /// Socket address the HTTP server binds to.
    pub bind_addr: Option<String>,
}

impl BridgeSettings {
    /// Reactor sizing, starting from the host defaults.
    pub fn reactor_config(&self) -> ReactorConfig {
        let mut config = ReactorConfig::default();
        if let Some(threads) = self.compute_threads {
            config = config.with_compute_threads(threads);
        }
        if let Some(threads) = self.blocking_threads {
            config = config.with_blocking_threads(threads);
        }
        config
    }

    /// Total outbound attempts.
    pub fn retry_max_attempts(&self) -> u32 {
        self.retry_max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS)
    }

    /// Pause between outbound attempts.
    pub fn retry_delay(&self) -> Duration {
        self.retry_delay_ms
            .map_or(DEFAULT_RETRY_DELAY, Duration::from_millis)
    }

    /// Connection-reset retry policy with the configured bound and delay.
    pub fn retry_policy(&self) -> RetryPolicy<OutboundError> {
        connection_reset_policy()
            .with_max_attempts(self.retry_max_attempts())
            .with_delay(self.retry_delay())
    }

    /// Per-request outbound timeout.
    pub fn outbound_timeout(&self) -> Duration {
        self.outbound_timeout_ms
            .map_or(DEFAULT_OUTBOUND_TIMEOUT, Duration::from_millis)
    }

    /// Outbound client with the configured timeout, wrapped in the retry
    /// policy.
    ///
    /// # Errors
    ///
    /// Returns [`OutboundError::InvalidRequest`] when the HTTP client cannot
    /// be constructed.
    pub fn outbound_client(&self) -> Result<RetryingClient<ReqwestClient>, OutboundError> {
        let inner = ReqwestClient::new(self.outbound_timeout())?;
        Ok(RetryingClient::new(inner).with_policy(self.retry_policy()))
    }

    /// Pool configuration, when a database URL is configured.
    pub fn pool_config(&self) -> Option<PoolConfig> {
        self.database_url.as_deref().map(PoolConfig::new)
    }

    /// Address the HTTP server binds to.
    pub fn bind_addr(&self) -> &str {
        self.bind_addr.as_deref().unwrap_or(DEFAULT_BIND_ADDR)
    }
}
