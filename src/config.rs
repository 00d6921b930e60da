//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.
//!
//! Configuration is read once at startup and is not hot-reloadable.

use serde::de::Error;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::{Result, TrackerError};

/// Main configuration structure
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub gnss: GnssConfig,
    pub network: NetworkConfig,
    #[serde(default)]
    pub wifi: WifiConfig,
    #[serde(default)]
    pub cellular: CellularConfig,
    #[serde(default)]
    pub uplink: UplinkConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub indicator: IndicatorConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// GNSS receiver serial configuration
#[derive(Debug, Deserialize, Clone)]
pub struct GnssConfig {
    #[serde(default = "default_gnss_port")]
    pub port: String,

    #[serde(default = "default_gnss_baud_rate")]
    pub baud_rate: u32,

    /// Tried in order when `port` cannot be opened
    #[serde(default)]
    pub fallback_ports: Vec<String>,
}

impl GnssConfig {
    /// `port` followed by the fallbacks
    pub fn candidate_ports(&self) -> Vec<&str> {
        std::iter::once(self.port.as_str())
            .chain(self.fallback_ports.iter().map(String::as_str))
            .collect()
    }
}

/// Which transport carries the uplink
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    Wifi,
    Cellular,
}

/// Network transport selection
#[derive(Debug, Deserialize, Clone)]
pub struct NetworkConfig {
    #[serde(default = "default_transport")]
    pub transport: Transport,
}

/// WiFi station configuration
#[derive(Debug, Deserialize, Clone)]
pub struct WifiConfig {
    #[serde(default)]
    pub ssid: String,

    #[serde(default)]
    pub password: String,

    #[serde(default = "default_wifi_interface")]
    pub interface: String,

    #[serde(default = "default_connect_timeout_s")]
    pub connect_timeout_s: u64,

    #[serde(default = "default_blink_interval_ms")]
    pub blink_interval_ms: u64,

    #[serde(default = "default_uplink_url")]
    pub url: String,

    #[serde(default = "default_http_timeout_s")]
    pub http_timeout_s: u64,
}

/// Cellular modem configuration
#[derive(Debug, Deserialize, Clone)]
pub struct CellularConfig {
    #[serde(default = "default_modem_port")]
    pub port: String,

    #[serde(default = "default_modem_baud_rate")]
    pub baud_rate: u32,

    #[serde(default = "default_uplink_url")]
    pub url: String,

    #[serde(default)]
    pub apn: Option<String>,

    #[serde(default = "default_context_id")]
    pub context_id: u8,

    /// Network scan sequence written to the modem at startup
    #[serde(default = "default_scan_sequence")]
    pub scan_sequence: String,

    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,
}

/// Uplink retry policy
#[derive(Debug, Deserialize, Clone)]
pub struct UplinkConfig {
    #[serde(default = "default_send_interval_s")]
    pub send_interval_s: u64,

    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,

    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    #[serde(default = "default_escalation_threshold")]
    pub escalation_threshold: u32,
}

/// Control loop timing
#[derive(Debug, Deserialize, Clone)]
pub struct SchedulerConfig {
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,

    #[serde(default = "default_status_interval_s")]
    pub status_interval_s: u64,
}

/// Status LED configuration
#[derive(Debug, Deserialize, Clone)]
pub struct IndicatorConfig {
    #[serde(default = "default_indicator_enabled")]
    pub enabled: bool,

    #[serde(default = "default_led_red")]
    pub red: String,

    #[serde(default = "default_led_green")]
    pub green: String,

    #[serde(default = "default_led_blue")]
    pub blue: String,
}

/// Log output configuration
#[derive(Debug, Deserialize, Clone, Default)]
pub struct LoggingConfig {
    /// Directory for daily-rolling log files; stdout only when unset
    #[serde(default)]
    pub log_dir: Option<String>,
}

// Default value functions
fn default_gnss_port() -> String { "/dev/ttyS0".to_string() }
fn default_gnss_baud_rate() -> u32 { crate::serial::GNSS_BAUD_RATE }

fn default_transport() -> Transport { Transport::Cellular }

fn default_wifi_interface() -> String { "wlan0".to_string() }
fn default_connect_timeout_s() -> u64 { 30 }
fn default_blink_interval_ms() -> u64 { 500 }
fn default_uplink_url() -> String { "https://jax.xzinternal.com/api/data/uplink".to_string() }
fn default_http_timeout_s() -> u64 { 30 }

fn default_modem_port() -> String { "/dev/ttyUSB2".to_string() }
fn default_modem_baud_rate() -> u32 { 115200 }
fn default_context_id() -> u8 { 1 }
fn default_scan_sequence() -> String { "00".to_string() }
fn default_command_timeout_ms() -> u64 { 5000 }

fn default_send_interval_s() -> u64 { 60 }
fn default_max_retry_attempts() -> u32 { 3 }
fn default_retry_delay_ms() -> u64 { 5000 }
fn default_escalation_threshold() -> u32 { 3 }

fn default_tick_ms() -> u64 { 500 }
fn default_status_interval_s() -> u64 { 30 }

fn default_indicator_enabled() -> bool { true }
fn default_led_red() -> String { "rgb:red".to_string() }
fn default_led_green() -> String { "rgb:green".to_string() }
fn default_led_blue() -> String { "rgb:blue".to_string() }

impl Default for WifiConfig {
    fn default() -> Self {
        Self {
            ssid: String::new(),
            password: String::new(),
            interface: default_wifi_interface(),
            connect_timeout_s: default_connect_timeout_s(),
            blink_interval_ms: default_blink_interval_ms(),
            url: default_uplink_url(),
            http_timeout_s: default_http_timeout_s(),
        }
    }
}

impl Default for CellularConfig {
    fn default() -> Self {
        Self {
            port: default_modem_port(),
            baud_rate: default_modem_baud_rate(),
            url: default_uplink_url(),
            apn: None,
            context_id: default_context_id(),
            scan_sequence: default_scan_sequence(),
            command_timeout_ms: default_command_timeout_ms(),
        }
    }
}

impl Default for UplinkConfig {
    fn default() -> Self {
        Self {
            send_interval_s: default_send_interval_s(),
            max_retry_attempts: default_max_retry_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            escalation_threshold: default_escalation_threshold(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_ms: default_tick_ms(),
            status_interval_s: default_status_interval_s(),
        }
    }
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            enabled: default_indicator_enabled(),
            red: default_led_red(),
            green: default_led_green(),
            blue: default_led_blue(),
        }
    }
}

fn invalid(msg: impl std::fmt::Display) -> TrackerError {
    TrackerError::Config(toml::de::Error::custom(msg))
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use gnss_tracker::config::Config;
    ///
    /// let config = Config::load("config/default.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// URL the uplink posts to for the selected transport
    pub fn uplink_url(&self) -> &str {
        match self.network.transport {
            Transport::Wifi => &self.wifi.url,
            Transport::Cellular => &self.cellular.url,
        }
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    fn validate(&self) -> Result<()> {
        if self.gnss.port.is_empty() {
            return Err(invalid("gnss port cannot be empty"));
        }
        if self.gnss.fallback_ports.iter().any(String::is_empty) {
            return Err(invalid("gnss fallback_ports cannot contain empty paths"));
        }

        if ![4800, 9600, 19200, 38400, 57600, 115200].contains(&self.gnss.baud_rate) {
            return Err(invalid(
                "gnss baud_rate must be one of: 4800, 9600, 19200, 38400, 57600, 115200",
            ));
        }

        match self.network.transport {
            Transport::Wifi => {
                if self.wifi.ssid.is_empty() {
                    return Err(invalid("wifi ssid cannot be empty when transport is wifi"));
                }
                if self.wifi.interface.is_empty() {
                    return Err(invalid("wifi interface cannot be empty"));
                }
                if self.wifi.connect_timeout_s == 0 || self.wifi.connect_timeout_s > 600 {
                    return Err(invalid("connect_timeout_s must be between 1 and 600"));
                }
                if self.wifi.blink_interval_ms == 0 || self.wifi.blink_interval_ms > 10000 {
                    return Err(invalid("blink_interval_ms must be between 1 and 10000"));
                }
                if self.wifi.http_timeout_s == 0 {
                    return Err(invalid("http_timeout_s must be greater than 0"));
                }
            }
            Transport::Cellular => {
                if self.cellular.port.is_empty() {
                    return Err(invalid("cellular port cannot be empty"));
                }
                if self.cellular.command_timeout_ms == 0 || self.cellular.command_timeout_ms > 60000 {
                    return Err(invalid("command_timeout_ms must be between 1 and 60000"));
                }
                if self.cellular.context_id == 0 || self.cellular.context_id > 16 {
                    return Err(invalid("context_id must be between 1 and 16"));
                }
                if self.cellular.scan_sequence.is_empty()
                    || !self.cellular.scan_sequence.chars().all(|c| c.is_ascii_digit())
                {
                    return Err(invalid("scan_sequence must be a non-empty string of digits"));
                }
            }
        }

        let url = self.uplink_url();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(invalid(format!("uplink url must start with http:// or https://, got '{}'", url)));
        }

        if self.uplink.send_interval_s == 0 {
            return Err(invalid("send_interval_s must be greater than 0"));
        }

        if self.uplink.max_retry_attempts == 0 || self.uplink.max_retry_attempts > 10 {
            return Err(invalid("max_retry_attempts must be between 1 and 10"));
        }

        if self.uplink.retry_delay_ms > 60000 {
            return Err(invalid("retry_delay_ms must be at most 60000"));
        }

        if self.uplink.escalation_threshold == 0 {
            return Err(invalid("escalation_threshold must be greater than 0"));
        }

        if self.scheduler.tick_ms == 0 || self.scheduler.tick_ms > 10000 {
            return Err(invalid("tick_ms must be between 1 and 10000"));
        }

        if self.scheduler.status_interval_s == 0 {
            return Err(invalid("status_interval_s must be greater than 0"));
        }

        if self.indicator.enabled
            && (self.indicator.red.is_empty()
                || self.indicator.green.is_empty()
                || self.indicator.blue.is_empty())
        {
            return Err(invalid("indicator led names cannot be empty when enabled"));
        }

        Ok(())
    }
}

impl UplinkConfig {
    pub fn send_interval(&self) -> Duration {
        Duration::from_secs(self.send_interval_s)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl SchedulerConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub fn status_interval(&self) -> Duration {
        Duration::from_secs(self.status_interval_s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_valid_config() -> Config {
        Config {
            gnss: GnssConfig {
                port: default_gnss_port(),
                baud_rate: default_gnss_baud_rate(),
                fallback_ports: Vec::new(),
            },
            network: NetworkConfig {
                transport: Transport::Cellular,
            },
            wifi: WifiConfig::default(),
            cellular: CellularConfig::default(),
            uplink: UplinkConfig::default(),
            scheduler: SchedulerConfig::default(),
            indicator: IndicatorConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    fn wifi_config() -> Config {
        let mut config = create_valid_config();
        config.network.transport = Transport::Wifi;
        config.wifi.ssid = "field-ap".to_string();
        config.wifi.password = "hunter22".to_string();
        config
    }

    #[test]
    fn test_default_config() {
        assert!(create_valid_config().validate().is_ok());
    }

    #[test]
    fn test_load_config_from_file() {
        use std::io::Write;
        use tempfile::NamedTempFile;

        let toml_content = r#"
[gnss]
port = "/dev/ttyAMA0"

[network]
transport = "wifi"

[wifi]
ssid = "field-ap"
password = "secret"
url = "http://192.168.1.10:8080/api/data/uplink"

[uplink]
send_interval_s = 120
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(toml_content.as_bytes()).unwrap();
        temp_file.flush().unwrap();

        let config = Config::load(temp_file.path()).unwrap();
        assert_eq!(config.network.transport, Transport::Wifi);
        assert_eq!(config.gnss.port, "/dev/ttyAMA0");
        assert_eq!(config.gnss.baud_rate, 9600);
        assert_eq!(config.uplink.send_interval_s, 120);
        assert_eq!(config.uplink.max_retry_attempts, 3);
        assert_eq!(config.uplink_url(), "http://192.168.1.10:8080/api/data/uplink");
    }

    #[test]
    fn test_load_minimal_cellular_config() {
        use std::io::Write;
        use tempfile::NamedTempFile;

        let toml_content = r#"
[gnss]

[network]
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(toml_content.as_bytes()).unwrap();
        temp_file.flush().unwrap();

        let config = Config::load(temp_file.path()).unwrap();
        assert_eq!(config.network.transport, Transport::Cellular);
        assert_eq!(config.cellular.scan_sequence, "00");
        assert_eq!(config.uplink_url(), default_uplink_url());
    }

    #[test]
    fn test_unknown_transport_rejected() {
        let result: std::result::Result<Config, _> = toml::from_str(
            r#"
[gnss]
[network]
transport = "lora"
"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_load_missing_file() {
        let result = Config::load("/nonexistent/tracker.toml");
        assert!(matches!(result, Err(TrackerError::Io(_))));
    }

    #[test]
    fn test_empty_gnss_port() {
        let mut config = create_valid_config();
        config.gnss.port = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_gnss_fallback_port() {
        let mut config = create_valid_config();
        config.gnss.fallback_ports = vec!["/dev/ttyAMA0".to_string(), String::new()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_gnss_candidate_ports_in_order() {
        let config: Config = toml::from_str(
            "[gnss]\nport = \"/dev/ttyS0\"\nfallback_ports = [\"/dev/ttyAMA0\", \"/dev/ttyUSB0\"]\n[network]\n",
        )
        .unwrap();
        assert_eq!(
            config.gnss.candidate_ports(),
            vec!["/dev/ttyS0", "/dev/ttyAMA0", "/dev/ttyUSB0"]
        );

        let config: Config = toml::from_str("[gnss]\n[network]\n").unwrap();
        assert_eq!(config.gnss.candidate_ports(), vec!["/dev/ttyS0"]);
    }

    #[test]
    fn test_invalid_gnss_baud_rate() {
        let mut config = create_valid_config();
        config.gnss.baud_rate = 420000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_wifi_requires_ssid() {
        let mut config = wifi_config();
        assert!(config.validate().is_ok());
        config.wifi.ssid = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_ssid_not_required_for_cellular() {
        let mut config = create_valid_config();
        config.wifi.ssid = String::new();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_connect_timeout_zero() {
        let mut config = wifi_config();
        config.wifi.connect_timeout_s = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_scan_sequence_must_be_digits() {
        let mut config = create_valid_config();
        config.cellular.scan_sequence = "auto".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_context_id_range() {
        let mut config = create_valid_config();
        config.cellular.context_id = 0;
        assert!(config.validate().is_err());
        config.cellular.context_id = 17;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_url_scheme() {
        let mut config = create_valid_config();
        config.cellular.url = "ftp://example.com/uplink".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_url_checked_for_selected_transport_only() {
        let mut config = wifi_config();
        config.cellular.url = "not a url".to_string();
        assert!(config.validate().is_ok());
        config.wifi.url = "not a url".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_max_retry_attempts_range() {
        let mut config = create_valid_config();
        config.uplink.max_retry_attempts = 0;
        assert!(config.validate().is_err());
        config.uplink.max_retry_attempts = 11;
        assert!(config.validate().is_err());
        config.uplink.max_retry_attempts = 10;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_retry_delay_too_high() {
        let mut config = create_valid_config();
        config.uplink.retry_delay_ms = 60001;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_retry_delay_allowed() {
        let mut config = create_valid_config();
        config.uplink.retry_delay_ms = 0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_send_interval_zero() {
        let mut config = create_valid_config();
        config.uplink.send_interval_s = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_tick_range() {
        let mut config = create_valid_config();
        config.scheduler.tick_ms = 0;
        assert!(config.validate().is_err());
        config.scheduler.tick_ms = 10001;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_led_name_when_enabled() {
        let mut config = create_valid_config();
        config.indicator.green = String::new();
        assert!(config.validate().is_err());
        config.indicator.enabled = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_duration_helpers() {
        let config = create_valid_config();
        assert_eq!(config.uplink.send_interval(), Duration::from_secs(60));
        assert_eq!(config.uplink.retry_delay(), Duration::from_millis(5000));
        assert_eq!(config.scheduler.tick(), Duration::from_millis(500));
        assert_eq!(config.scheduler.status_interval(), Duration::from_secs(30));
    }

    #[test]
    fn test_default_functions() {
        assert_eq!(default_gnss_port(), "/dev/ttyS0");
        assert_eq!(default_gnss_baud_rate(), 9600);
        assert_eq!(default_transport(), Transport::Cellular);
        assert_eq!(default_connect_timeout_s(), 30);
        assert_eq!(default_blink_interval_ms(), 500);
        assert_eq!(default_modem_baud_rate(), 115200);
        assert_eq!(default_send_interval_s(), 60);
        assert_eq!(default_max_retry_attempts(), 3);
        assert_eq!(default_retry_delay_ms(), 5000);
        assert_eq!(default_escalation_threshold(), 3);
        assert_eq!(default_tick_ms(), 500);
        assert_eq!(default_status_interval_s(), 30);
    }

    #[test]
    fn test_shipped_default_config_is_valid() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config/default.toml");
        let config = Config::load(path).unwrap();
        assert_eq!(config.network.transport, Transport::Cellular);
        assert_eq!(config.cellular.port, "/dev/ttyUSB2");
        assert_eq!(config.uplink_url(), default_uplink_url());
        assert!(config.logging.log_dir.is_none());
    }
}
