//! # Uplink Module
//!
//! Builds telemetry records from the current fix and delivers them through
//! the active connectivity provider with a bounded retry budget.
//!
//! Failures never propagate as errors: [`UplinkClient::send`] reports a
//! boolean and bumps a [`FailureCounter`] that the scheduler uses to decide
//! when to escalate.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::UplinkConfig;
use crate::connectivity::{CellInfo, ConnectionType, ConnectivityProvider};
use crate::gnss::FixState;
use crate::indicator::{pulse, Color, StatusIndicator, FAILURE_PULSE, SUCCESS_PULSE};

/// HTTP status accepted as a successful delivery
pub const HTTP_OK: u16 = 200;

/// One telemetry payload
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetryRecord {
    pub device_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp: String,
    pub connection_type: ConnectionType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cell_info: Option<CellInfo>,
}

impl TelemetryRecord {
    /// Snapshot the fix for a given device and transport
    pub fn from_fix(
        fix: &FixState,
        device_id: String,
        connection_type: ConnectionType,
        cell_info: Option<CellInfo>,
    ) -> Self {
        Self {
            device_id,
            latitude: fix.latitude,
            longitude: fix.longitude,
            timestamp: fix.timestamp.clone(),
            connection_type,
            cell_info,
        }
    }

    pub fn to_json(&self) -> crate::error::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Why a single delivery attempt failed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendErrorKind {
    /// No HTTP status was received
    #[error("transport failure")]
    Transport,

    /// Server answered with something other than 200
    #[error("server returned HTTP {0}")]
    Status(u16),

    #[error("payload serialization failed")]
    Serialize,
}

/// Consecutive exhausted retry budgets
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FailureCounter(u32);

impl FailureCounter {
    pub fn increment(&mut self) {
        self.0 = self.0.saturating_add(1);
    }

    pub fn reset(&mut self) {
        self.0 = 0;
    }

    pub fn get(&self) -> u32 {
        self.0
    }
}

/// Attempt budget for one send
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Pause between attempts; not applied after the last one
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &UplinkConfig) -> Self {
        Self {
            max_attempts: config.max_retry_attempts.max(1),
            delay: config.retry_delay(),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&UplinkConfig::default())
    }
}

/// Delivers telemetry to one endpoint
#[derive(Debug)]
pub struct UplinkClient {
    url: String,
    policy: RetryPolicy,
    failures: FailureCounter,
    last_success: Option<DateTime<Utc>>,
    last_error: Option<SendErrorKind>,
}

impl UplinkClient {
    pub fn new(url: impl Into<String>, policy: RetryPolicy) -> Self {
        Self {
            url: url.into(),
            policy,
            failures: FailureCounter::default(),
            last_success: None,
            last_error: None,
        }
    }

    /// Deliver the fix, retrying up to the policy's attempt budget
    ///
    /// Returns `true` on the first HTTP 200. Every attempt rebuilds the record
    /// so cellular serving-cell details are refreshed; a failed cell query
    /// only drops `cell_info` from that attempt.
    pub async fn send(
        &mut self,
        fix: &FixState,
        provider: &mut dyn ConnectivityProvider,
        indicator: &mut dyn StatusIndicator,
    ) -> bool {
        let attempts = self.policy.max_attempts;

        for attempt in 1..=attempts {
            match self.attempt(fix, provider).await {
                Ok(()) => {
                    info!("Telemetry sent (attempt {}/{})", attempt, attempts);
                    self.failures.reset();
                    self.last_success = Some(Utc::now());
                    self.last_error = None;
                    pulse(indicator, Color::SEND_SUCCESS, SUCCESS_PULSE).await;
                    return true;
                }
                Err(kind) => {
                    warn!("Send attempt {}/{} failed: {}", attempt, attempts, kind);
                    self.last_error = Some(kind);
                }
            }

            if attempt < attempts {
                sleep(self.policy.delay).await;
            }
        }

        self.failures.increment();
        warn!(
            "Telemetry not delivered after {} attempts ({} consecutive failures)",
            attempts,
            self.failures.get()
        );
        pulse(indicator, Color::SEND_FAILURE, FAILURE_PULSE).await;
        false
    }

    async fn attempt(
        &self,
        fix: &FixState,
        provider: &mut dyn ConnectivityProvider,
    ) -> std::result::Result<(), SendErrorKind> {
        let cell_info = match provider.cell_info().await {
            Ok(cell) => cell,
            Err(e) => {
                warn!("Cell info query failed, sending without it: {}", e);
                None
            }
        };

        let record = TelemetryRecord::from_fix(
            fix,
            provider.device_identity(),
            provider.connection_type(),
            cell_info,
        );
        let body = record.to_json().map_err(|e| {
            warn!("Could not serialize telemetry: {}", e);
            SendErrorKind::Serialize
        })?;
        debug!("POST {} {}", self.url, body);

        match provider.post(&self.url, &body).await {
            Ok(HTTP_OK) => Ok(()),
            Ok(code) => Err(SendErrorKind::Status(code)),
            Err(e) => {
                debug!("Transport error: {}", e);
                Err(SendErrorKind::Transport)
            }
        }
    }

    /// Consecutive exhausted retry budgets
    pub fn failures(&self) -> u32 {
        self.failures.get()
    }

    pub fn reset_failures(&mut self) {
        self.failures.reset();
    }

    pub fn last_success(&self) -> Option<DateTime<Utc>> {
        self.last_success
    }

    pub fn last_error(&self) -> Option<&SendErrorKind> {
        self.last_error.as_ref()
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}
