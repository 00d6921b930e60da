//! # Cellular Connectivity
//!
//! LTE modem variant of [`ConnectivityProvider`].
//!
//! Connecting is two explicit steps: network registration, then bearer
//! (PDP context) activation. The link counts as up only while the modem
//! reports registration status `1` (home) or `5` (roaming).
//!
//! The device identity is the hex SHA-256 digest of the modem IMEI, so the
//! raw hardware serial never appears in telemetry.

use async_trait::async_trait;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::at::AtChannel;
use super::{ConnectionType, ConnectivityProvider, ConnectivityStatus};
use crate::config::CellularConfig;
use crate::error::{Result, TrackerError};
use crate::indicator::{Color, StatusIndicator};
use crate::serial::SerialPortIO;

/// Registration codes that count as connected
pub const REGISTERED_HOME: &str = "1";
pub const REGISTERED_ROAMING: &str = "5";

/// Low bits of an E-UTRAN cell identity that select the sector within the eNodeB
const CELL_ID_SECTOR_BITS: u32 = 8;

/// Serving cell snapshot attached to cellular telemetry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CellInfo {
    pub rat: String,
    pub mcc: u32,
    pub mnc: u32,
    #[serde(rename = "cellid")]
    pub cell_id: u32,
    #[serde(rename = "enbid")]
    pub enb_id: u32,
    pub tac: u32,
    pub rssi: i32,
    pub rsrp: i32,
}

/// eNodeB ID is the cell identity without its sector byte
///
/// # Examples
///
/// ```
/// use gnss_tracker::connectivity::cellular::enb_id_from_cell_id;
///
/// assert_eq!(enb_id_from_cell_id(0xB0DD811), 723_706);
/// ```
pub fn enb_id_from_cell_id(cell_id: u32) -> u32 {
    cell_id >> CELL_ID_SECTOR_BITS
}

/// Hex SHA-256 of the modem hardware identifier
pub fn identity_from_imei(imei: &str) -> String {
    hex::encode(Sha256::digest(imei.as_bytes()))
}

/// Whether a registration status code means the modem is on a network
pub fn is_registered(code: &str) -> bool {
    code == REGISTERED_HOME || code == REGISTERED_ROAMING
}

/// Parse a serving cell report
///
/// Expected layout:
/// `+QENG: "servingcell",<state>,<RAT>,<is_tdd>,<MCC>,<MNC>,<cellID>,<PCI>,<EARFCN>,<band>,<UL_bw>,<DL_bw>,<TAC>,<RSRP>,<RSRQ>,<RSSI>,<SINR>,<srxlev>`
/// where cellID and TAC are hexadecimal.
pub fn parse_serving_cell(line: &str) -> Result<CellInfo> {
    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    if fields.len() < 16 {
        return Err(TrackerError::Modem(format!(
            "serving cell report has {} fields: {}",
            fields.len(),
            line
        )));
    }

    let bad = |what: &str, value: &str| TrackerError::Modem(format!("bad {} '{}' in serving cell report", what, value));
    let dec = |i: usize, what: &str| -> Result<i64> { fields[i].parse::<i64>().map_err(|_| bad(what, fields[i])) };
    let hex_field = |i: usize, what: &str| -> Result<u32> { u32::from_str_radix(fields[i], 16).map_err(|_| bad(what, fields[i])) };

    let rat = fields[2].trim_matches('"').to_string();
    let cell_id = hex_field(6, "cell id")?;

    Ok(CellInfo {
        rat,
        mcc: u32::try_from(dec(4, "MCC")?).map_err(|_| bad("MCC", fields[4]))?,
        mnc: u32::try_from(dec(5, "MNC")?).map_err(|_| bad("MNC", fields[5]))?,
        cell_id,
        enb_id: enb_id_from_cell_id(cell_id),
        tac: hex_field(12, "TAC")?,
        rsrp: i32::try_from(dec(13, "RSRP")?).map_err(|_| bad("RSRP", fields[13]))?,
        rssi: i32::try_from(dec(15, "RSSI")?).map_err(|_| bad("RSSI", fields[15]))?,
    })
}

/// Modem capabilities the cellular provider relies on
#[async_trait]
pub trait Modem: Send {
    /// Wait until the modem answers commands
    async fn wait_ready(&mut self) -> Result<()>;

    async fn imei(&mut self) -> Result<String>;

    /// Select a network and wait for registration
    async fn register_network(&mut self) -> Result<()>;

    /// Raw registration status code ("1", "5", "2", ...)
    async fn registration_status(&mut self) -> Result<String>;

    /// Activate the packet data context
    async fn setup_bearer(&mut self) -> Result<()>;

    /// Deactivate the packet data context and detach from the network
    async fn teardown(&mut self) -> Result<()>;

    async fn set_scan_sequence(&mut self, sequence: &str) -> Result<()>;

    async fn set_http_context(&mut self, context_id: u8) -> Result<()>;

    async fn set_server_url(&mut self, url: &str) -> Result<()>;

    /// Raw serving cell report line
    async fn serving_cell(&mut self) -> Result<String>;

    /// POST a body to the configured server URL; returns the HTTP status
    async fn http_post(&mut self, body: &str) -> Result<u16>;
}

/// Cellular connectivity over any [`Modem`]
pub struct CellularProvider<M: Modem> {
    modem: M,
    identity: String,
    server_url: String,
}

impl<M: Modem> std::fmt::Debug for CellularProvider<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CellularProvider")
            .field("identity", &self.identity)
            .field("server_url", &self.server_url)
            .finish_non_exhaustive()
    }
}

impl<M: Modem> CellularProvider<M> {
    /// Bring the modem up and derive the device identity
    ///
    /// Shows red while waiting for the modem and magenta once it answers.
    ///
    /// # Errors
    ///
    /// Returns `Identity` if the IMEI cannot be read; the tracker cannot tag
    /// telemetry without it. Other setup failures are returned as `Modem`.
    pub async fn start(
        mut modem: M,
        config: &CellularConfig,
        indicator: &mut dyn StatusIndicator,
    ) -> Result<Self> {
        indicator.set_color(Color::WAITING_FOR_MODEM);
        info!("Waiting for modem...");
        modem.wait_ready().await?;
        indicator.set_color(Color::MODEM_READY);

        let imei = modem
            .imei()
            .await
            .map_err(|e| TrackerError::Identity(format!("could not read IMEI: {}", e)))?;
        if imei.trim().is_empty() {
            return Err(TrackerError::Identity("modem returned an empty IMEI".to_string()));
        }
        let identity = identity_from_imei(imei.trim());
        info!("Device identity: {}", identity);

        modem.set_scan_sequence(&config.scan_sequence).await?;
        modem.set_http_context(config.context_id).await?;
        modem.set_server_url(&config.url).await?;

        Ok(Self {
            modem,
            identity,
            server_url: config.url.clone(),
        })
    }
}

#[async_trait]
impl<M: Modem> ConnectivityProvider for CellularProvider<M> {
    fn connection_type(&self) -> ConnectionType {
        ConnectionType::Cellular
    }

    fn device_identity(&self) -> String {
        self.identity.clone()
    }

    async fn connect(&mut self, indicator: &mut dyn StatusIndicator) -> ConnectivityStatus {
        info!("Registering to LTE network...");
        if let Err(e) = self.modem.register_network().await {
            warn!("Network registration failed: {}", e);
            indicator.set_color(Color::CONNECT_FAILED);
            return ConnectivityStatus::Disconnected;
        }

        info!("Configuring PDP...");
        if let Err(e) = self.modem.setup_bearer().await {
            warn!("Bearer setup failed: {}", e);
            indicator.set_color(Color::CONNECT_FAILED);
            return ConnectivityStatus::Disconnected;
        }

        info!("LTE connected");
        ConnectivityStatus::Connected
    }

    async fn reconnect(&mut self, indicator: &mut dyn StatusIndicator) -> ConnectivityStatus {
        info!("Tearing down LTE link...");
        if let Err(e) = self.modem.teardown().await {
            warn!("LTE teardown failed, re-registering anyway: {}", e);
        }
        self.connect(indicator).await
    }

    async fn is_connected(&mut self) -> bool {
        match self.modem.registration_status().await {
            Ok(code) => {
                debug!("Registration status: {}", code);
                is_registered(&code)
            }
            Err(e) => {
                debug!("Registration query failed: {}", e);
                false
            }
        }
    }

    async fn cell_info(&mut self) -> Result<Option<CellInfo>> {
        let line = self.modem.serving_cell().await?;
        parse_serving_cell(&line).map(Some)
    }

    async fn post(&mut self, url: &str, body: &str) -> Result<u16> {
        if url != self.server_url {
            self.modem.set_server_url(url).await?;
            self.server_url = url.to_string();
        }
        self.modem.http_post(body).await
    }
}

/// Attempts at `AT` before giving up on the modem
const READY_ATTEMPTS: u32 = 30;

/// Registration polls before `register_network` fails
const REGISTRATION_POLLS: u32 = 60;

/// Delay between readiness and registration polls
const POLL_DELAY: Duration = Duration::from_secs(1);

/// Bearer deactivation and network detach can each take this long
const DETACH_TIMEOUT: Duration = Duration::from_secs(40);

/// Upper bound for HTTP exchanges through the modem, in seconds
const HTTP_TIMEOUT_S: u64 = 60;

/// Quectel-style LTE modem driven over an [`AtChannel`]
pub struct AtModem<P: SerialPortIO> {
    at: AtChannel<P>,
    context_id: u8,
    apn: Option<String>,
}

impl<P: SerialPortIO> AtModem<P> {
    pub fn new(port: P, config: &CellularConfig) -> Self {
        Self {
            at: AtChannel::new(port, Duration::from_millis(config.command_timeout_ms)),
            context_id: config.context_id,
            apn: config.apn.clone(),
        }
    }

    async fn bearer_active(&mut self) -> Result<bool> {
        let lines = self.at.command("AT+QIACT?").await?;
        let prefix = format!("+QIACT: {},1", self.context_id);
        Ok(lines.iter().any(|l| l.starts_with(&prefix)))
    }
}

/// Extract `<stat>` from `+CEREG: <n>,<stat>[,...]`
pub fn parse_registration(lines: &[String]) -> Result<String> {
    lines
        .iter()
        .find_map(|line| line.strip_prefix("+CEREG:"))
        .and_then(|rest| rest.split(',').nth(1))
        .map(|stat| stat.trim().to_string())
        .ok_or_else(|| TrackerError::Modem("no +CEREG status in response".to_string()))
}

/// Extract the HTTP status from `+QHTTPPOST: <err>,<httprspcode>[,<len>]`
pub fn parse_http_post_result(line: &str) -> Result<u16> {
    let rest = line
        .strip_prefix("+QHTTPPOST:")
        .ok_or_else(|| TrackerError::Modem(format!("unexpected HTTP result '{}'", line)))?;
    let mut parts = rest.split(',').map(str::trim);

    let err = parts.next().unwrap_or("");
    if err != "0" {
        return Err(TrackerError::Http(format!("modem HTTP error {}", err)));
    }
    parts
        .next()
        .and_then(|code| code.parse().ok())
        .ok_or_else(|| TrackerError::Modem(format!("missing HTTP status in '{}'", line)))
}

#[async_trait]
impl<P: SerialPortIO> Modem for AtModem<P> {
    async fn wait_ready(&mut self) -> Result<()> {
        for attempt in 1..=READY_ATTEMPTS {
            match self.at.command("AT").await {
                Ok(_) => {
                    // Echo off keeps responses to information lines only
                    self.at.command("ATE0").await?;
                    return Ok(());
                }
                Err(e) => debug!("Modem not ready (attempt {}): {}", attempt, e),
            }
            sleep(POLL_DELAY).await;
        }
        Err(TrackerError::Modem("modem did not answer AT".to_string()))
    }

    async fn imei(&mut self) -> Result<String> {
        let lines = self.at.command("AT+GSN").await?;
        lines
            .into_iter()
            .find(|l| !l.is_empty() && l.chars().all(|c| c.is_ascii_digit()))
            .ok_or_else(|| TrackerError::Modem("no IMEI in AT+GSN response".to_string()))
    }

    async fn register_network(&mut self) -> Result<()> {
        self.at.command("AT+CEREG=0").await?;
        self.at.command("AT+COPS=0").await?;
        for _ in 0..REGISTRATION_POLLS {
            let status = self.registration_status().await?;
            if is_registered(&status) {
                return Ok(());
            }
            sleep(POLL_DELAY).await;
        }
        Err(TrackerError::Modem("network registration timed out".to_string()))
    }

    async fn registration_status(&mut self) -> Result<String> {
        let lines = self.at.command("AT+CEREG?").await?;
        parse_registration(&lines)
    }

    async fn setup_bearer(&mut self) -> Result<()> {
        if self.bearer_active().await? {
            debug!("PDP context {} already active", self.context_id);
            return Ok(());
        }
        if let Some(apn) = self.apn.clone() {
            self.at
                .command(&format!("AT+QICSGP={},1,\"{}\",\"\",\"\",1", self.context_id, apn))
                .await?;
        }
        self.at
            .command_with_timeout(
                &format!("AT+QIACT={}", self.context_id),
                Duration::from_secs(150),
            )
            .await?;
        Ok(())
    }

    async fn teardown(&mut self) -> Result<()> {
        self.at
            .command_with_timeout(&format!("AT+QIDEACT={}", self.context_id), DETACH_TIMEOUT)
            .await?;
        self.at.command_with_timeout("AT+COPS=2", DETACH_TIMEOUT).await?;
        Ok(())
    }

    async fn set_scan_sequence(&mut self, sequence: &str) -> Result<()> {
        self.at
            .command(&format!("AT+QCFG=\"nwscanseq\",{}", sequence))
            .await?;
        Ok(())
    }

    async fn set_http_context(&mut self, context_id: u8) -> Result<()> {
        self.at
            .command(&format!("AT+QHTTPCFG=\"contextid\",{}", context_id))
            .await?;
        self.at.command("AT+QHTTPCFG=\"contenttype\",4").await?;
        Ok(())
    }

    async fn set_server_url(&mut self, url: &str) -> Result<()> {
        self.at
            .command_expect_connect(&format!("AT+QHTTPURL={},{}", url.len(), HTTP_TIMEOUT_S))
            .await?;
        self.at
            .send_payload(url.as_bytes(), Duration::from_secs(HTTP_TIMEOUT_S))
            .await
    }

    async fn serving_cell(&mut self) -> Result<String> {
        let lines = self.at.command("AT+QENG=\"servingcell\"").await?;
        lines
            .into_iter()
            .find(|l| l.starts_with("+QENG:"))
            .ok_or_else(|| TrackerError::Modem("no +QENG line in response".to_string()))
    }

    async fn http_post(&mut self, body: &str) -> Result<u16> {
        self.at
            .command_expect_connect(&format!(
                "AT+QHTTPPOST={},{},{}",
                body.len(),
                HTTP_TIMEOUT_S,
                HTTP_TIMEOUT_S
            ))
            .await?;
        self.at
            .send_payload(body.as_bytes(), Duration::from_secs(HTTP_TIMEOUT_S))
            .await?;
        let result = self
            .at
            .wait_for_urc("+QHTTPPOST:", Duration::from_secs(HTTP_TIMEOUT_S))
            .await?;
        parse_http_post_result(&result)
    }
}
