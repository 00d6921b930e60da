//! # Connectivity Module
//!
//! One connect / check / reconnect contract over two transports:
//!
//! - [`wifi::WifiProvider`]: station association over a [`wifi::WifiStation`] driver,
//!   uplink over HTTP
//! - [`cellular::CellularProvider`]: network registration plus bearer setup on an
//!   LTE modem, uplink through the modem's HTTP stack
//!
//! The variant is chosen once at startup from configuration; the rest of the
//! tracker only sees `dyn ConnectivityProvider`.

pub mod at;
pub mod cellular;
pub mod wifi;

pub use cellular::CellInfo;

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::config::{Config, Transport};
use crate::error::Result;
use crate::indicator::StatusIndicator;
use crate::serial;
use cellular::{AtModem, CellularProvider};
use wifi::{NmcliStation, UreqTransport, WifiProvider};

/// Link state reported by a provider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityStatus {
    Disconnected,
    Connected,
}

impl ConnectivityStatus {
    pub fn is_connected(self) -> bool {
        self == ConnectivityStatus::Connected
    }
}

/// Transport tag carried in every telemetry record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionType {
    Wifi,
    Cellular,
}

impl std::fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionType::Wifi => write!(f, "wifi"),
            ConnectionType::Cellular => write!(f, "cellular"),
        }
    }
}

/// Transport-neutral connectivity contract
///
/// Every method may be called at any time, including while already connected.
/// Device identity is derived once when the provider is built and never changes.
#[async_trait]
pub trait ConnectivityProvider: Send {
    fn connection_type(&self) -> ConnectionType;

    /// Stable identity used as `device_id` in telemetry
    fn device_identity(&self) -> String;

    /// Bring the link up, showing progress on the indicator
    async fn connect(&mut self, indicator: &mut dyn StatusIndicator) -> ConnectivityStatus;

    /// Cheap health check
    async fn is_connected(&mut self) -> bool;

    /// Full reconnection used on escalation: re-association or re-registration
    /// followed by bearer setup
    async fn reconnect(&mut self, indicator: &mut dyn StatusIndicator) -> ConnectivityStatus {
        self.connect(indicator).await
    }

    /// Serving cell details, `Ok(None)` for transports without them
    async fn cell_info(&mut self) -> Result<Option<CellInfo>> {
        Ok(None)
    }

    /// POST a JSON body; returns the HTTP status code
    ///
    /// `Err` means no status was obtained at all (transport failure).
    async fn post(&mut self, url: &str, body: &str) -> Result<u16>;
}

#[async_trait]
impl<T: ConnectivityProvider + ?Sized> ConnectivityProvider for Box<T> {
    fn connection_type(&self) -> ConnectionType {
        (**self).connection_type()
    }

    fn device_identity(&self) -> String {
        (**self).device_identity()
    }

    async fn connect(&mut self, indicator: &mut dyn StatusIndicator) -> ConnectivityStatus {
        (**self).connect(indicator).await
    }

    async fn is_connected(&mut self) -> bool {
        (**self).is_connected().await
    }

    async fn reconnect(&mut self, indicator: &mut dyn StatusIndicator) -> ConnectivityStatus {
        (**self).reconnect(indicator).await
    }

    async fn cell_info(&mut self) -> Result<Option<CellInfo>> {
        (**self).cell_info().await
    }

    async fn post(&mut self, url: &str, body: &str) -> Result<u16> {
        (**self).post(url, body).await
    }
}

/// Build the provider selected by `[network] transport`
///
/// For cellular this opens the modem port and runs the modem startup
/// sequence, so the indicator shows modem progress.
///
/// # Errors
///
/// Fails when the device identity cannot be derived or the modem port
/// cannot be opened.
pub async fn build_provider(
    config: &Config,
    indicator: &mut dyn StatusIndicator,
) -> Result<Box<dyn ConnectivityProvider>> {
    match config.network.transport {
        Transport::Wifi => {
            info!("Using WiFi transport on {}", config.wifi.interface);
            let station = NmcliStation::new(&config.wifi.interface);
            let transport = Arc::new(UreqTransport::new(Duration::from_secs(
                config.wifi.http_timeout_s,
            )));
            Ok(Box::new(WifiProvider::new(station, transport, &config.wifi)?))
        }
        Transport::Cellular => {
            info!("Using cellular transport on {}", config.cellular.port);
            let port = serial::open_port(&config.cellular.port, config.cellular.baud_rate)?;
            let modem = AtModem::new(port, &config.cellular);
            Ok(Box::new(
                CellularProvider::start(modem, &config.cellular, indicator).await?,
            ))
        }
    }
}
