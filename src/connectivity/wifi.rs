//! # WiFi Connectivity
//!
//! Station-mode variant of [`ConnectivityProvider`]. Association is driven
//! through a [`WifiStation`] and uploads go over plain HTTP(S) via an
//! [`HttpTransport`].

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use super::{ConnectionType, ConnectivityProvider, ConnectivityStatus};
use crate::config::WifiConfig;
use crate::error::{Result, TrackerError};
use crate::indicator::{Color, StatusIndicator};

/// Prefix that keeps WiFi identities apart from cellular ones
pub const IDENTITY_PREFIX: &str = "wifi-";

/// WiFi station driver
#[async_trait]
pub trait WifiStation: Send {
    /// Start associating with a network; completion is observed via `is_associated`
    async fn associate(&mut self, ssid: &str, password: &str) -> Result<()>;

    async fn is_associated(&mut self) -> bool;

    async fn disconnect(&mut self) -> Result<()>;

    /// Link-layer address as `aa:bb:cc:dd:ee:ff`
    fn mac_address(&self) -> Result<String>;
}

/// Station driven through NetworkManager's `nmcli`, with link state read from sysfs
#[derive(Debug, Clone)]
pub struct NmcliStation {
    interface: String,
    sys_root: PathBuf,
}

impl NmcliStation {
    pub fn new(interface: &str) -> Self {
        Self::with_sys_root(interface, "/sys/class/net")
    }

    pub fn with_sys_root(interface: &str, sys_root: impl Into<PathBuf>) -> Self {
        Self {
            interface: interface.to_string(),
            sys_root: sys_root.into(),
        }
    }

    fn attribute(&self, name: &str) -> PathBuf {
        self.sys_root.join(&self.interface).join(name)
    }

    async fn nmcli(&self, args: &[&str]) -> Result<()> {
        let output = Command::new("nmcli").args(args).output().await?;
        if output.status.success() {
            Ok(())
        } else {
            Err(TrackerError::Wifi(format!(
                "nmcli exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }
}

#[async_trait]
impl WifiStation for NmcliStation {
    async fn associate(&mut self, ssid: &str, password: &str) -> Result<()> {
        let mut args = vec!["--wait", "0", "device", "wifi", "connect", ssid];
        if !password.is_empty() {
            args.extend(["password", password]);
        }
        args.extend(["ifname", self.interface.as_str()]);
        self.nmcli(&args).await
    }

    async fn is_associated(&mut self) -> bool {
        match tokio::fs::read_to_string(self.attribute("operstate")).await {
            Ok(state) => state.trim() == "up",
            Err(e) => {
                debug!("Cannot read {} operstate: {}", self.interface, e);
                false
            }
        }
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.nmcli(&["device", "disconnect", self.interface.as_str()]).await
    }

    fn mac_address(&self) -> Result<String> {
        std::fs::read_to_string(self.attribute("address"))
            .map(|mac| mac.trim().to_string())
            .map_err(|e| TrackerError::Identity(format!("no MAC address for {}: {}", self.interface, e)))
    }
}

/// Blocking HTTP POST used by the WiFi uplink
#[cfg_attr(test, mockall::automock)]
pub trait HttpTransport: Send + Sync {
    /// POST a JSON body; any received status is `Ok`, only transport failures are `Err`
    fn post_json(&self, url: &str, body: &str) -> Result<u16>;
}

/// [`HttpTransport`] backed by a `ureq` agent
pub struct UreqTransport {
    agent: ureq::Agent,
}

impl UreqTransport {
    pub fn new(timeout: Duration) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
        }
    }
}

impl HttpTransport for UreqTransport {
    fn post_json(&self, url: &str, body: &str) -> Result<u16> {
        match self
            .agent
            .post(url)
            .set("Content-Type", "application/json")
            .send_string(body)
        {
            Ok(response) => Ok(response.status()),
            Err(ureq::Error::Status(code, _)) => Ok(code),
            Err(ureq::Error::Transport(e)) => Err(TrackerError::Http(e.to_string())),
        }
    }
}

/// `wifi-` followed by the colon-stripped lowercase MAC
pub fn identity_from_mac(mac: &str) -> Result<String> {
    let hex: String = mac
        .trim()
        .chars()
        .filter(|c| *c != ':' && *c != '-')
        .collect::<String>()
        .to_ascii_lowercase();

    if hex.len() != 12 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(TrackerError::Identity(format!("invalid MAC address '{}'", mac)));
    }
    if hex.chars().all(|c| c == '0') {
        return Err(TrackerError::Identity("MAC address is all zeros".to_string()));
    }
    Ok(format!("{}{}", IDENTITY_PREFIX, hex))
}

/// WiFi connectivity over a [`WifiStation`]
pub struct WifiProvider<S: WifiStation> {
    station: S,
    transport: Arc<dyn HttpTransport>,
    ssid: String,
    password: String,
    connect_timeout: Duration,
    blink_interval: Duration,
    identity: String,
}

impl<S: WifiStation> WifiProvider<S> {
    /// # Errors
    ///
    /// Returns `Identity` when the station has no usable MAC address.
    pub fn new(station: S, transport: Arc<dyn HttpTransport>, config: &WifiConfig) -> Result<Self> {
        let identity = identity_from_mac(&station.mac_address()?)?;
        info!("Device identity: {}", identity);
        Ok(Self {
            station,
            transport,
            ssid: config.ssid.clone(),
            password: config.password.clone(),
            connect_timeout: Duration::from_secs(config.connect_timeout_s),
            blink_interval: Duration::from_millis(config.blink_interval_ms),
            identity,
        })
    }

    /// Blink the connecting color until associated or out of time
    async fn wait_for_association(&mut self, indicator: &mut dyn StatusIndicator) -> bool {
        let deadline = Instant::now() + self.connect_timeout;
        let mut lit = false;

        while Instant::now() < deadline {
            lit = !lit;
            indicator.set_color(if lit { Color::CONNECTING } else { Color::OFF });
            sleep(self.blink_interval).await;
            if self.station.is_associated().await {
                return true;
            }
        }
        false
    }
}

#[async_trait]
impl<S: WifiStation> ConnectivityProvider for WifiProvider<S> {
    fn connection_type(&self) -> ConnectionType {
        ConnectionType::Wifi
    }

    fn device_identity(&self) -> String {
        self.identity.clone()
    }

    async fn connect(&mut self, indicator: &mut dyn StatusIndicator) -> ConnectivityStatus {
        if self.station.is_associated().await {
            return ConnectivityStatus::Connected;
        }

        info!("Connecting to WiFi network '{}'...", self.ssid);
        if let Err(e) = self.station.associate(&self.ssid, &self.password).await {
            warn!("WiFi association request failed: {}", e);
        }

        if self.wait_for_association(indicator).await {
            indicator.set_color(Color::OFF);
            info!("WiFi connected");
            ConnectivityStatus::Connected
        } else {
            indicator.set_color(Color::CONNECT_FAILED);
            warn!("WiFi connection timed out after {:?}", self.connect_timeout);
            ConnectivityStatus::Disconnected
        }
    }

    async fn is_connected(&mut self) -> bool {
        self.station.is_associated().await
    }

    async fn reconnect(&mut self, indicator: &mut dyn StatusIndicator) -> ConnectivityStatus {
        if let Err(e) = self.station.disconnect().await {
            debug!("WiFi disconnect before reconnect failed: {}", e);
        }
        self.connect(indicator).await
    }

    async fn post(&mut self, url: &str, body: &str) -> Result<u16> {
        let transport = Arc::clone(&self.transport);
        let url = url.to_string();
        let body = body.to_string();
        tokio::task::spawn_blocking(move || transport.post_json(&url, &body))
            .await
            .map_err(|e| TrackerError::Http(format!("HTTP task failed: {}", e)))?
    }
}
