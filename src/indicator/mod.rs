//! # Status Indicator Module
//!
//! Drives the three-channel status LED. The LED has no feedback path; it only
//! exists so a bystander can tell what the tracker is doing.
//!
//! Colors:
//!
//! | State | RGB |
//! |---|---|
//! | Waiting for modem | (255, 0, 0) |
//! | Modem ready | (255, 0, 200) |
//! | Fix acquired (flash) | (100, 255, 0) |
//! | Idle with fix | (0, 0, 100) |
//! | No fix | (255, 0, 20) |
//! | WiFi connecting (blink) | (0, 0, 255) |
//! | Connect failed | (255, 0, 0) |
//! | Send success (pulse) | (0, 255, 0) |
//! | Send failure (pulse) | (255, 100, 0) |
//! | Escalation | (255, 0, 255) |

use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, trace};

use crate::config::IndicatorConfig;

/// RGB color
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    pub const OFF: Color = Color::rgb(0, 0, 0);
    pub const WAITING_FOR_MODEM: Color = Color::rgb(255, 0, 0);
    pub const MODEM_READY: Color = Color::rgb(255, 0, 200);
    pub const FIX_ACQUIRED: Color = Color::rgb(100, 255, 0);
    pub const IDLE: Color = Color::rgb(0, 0, 100);
    pub const NO_FIX: Color = Color::rgb(255, 0, 20);
    pub const CONNECTING: Color = Color::rgb(0, 0, 255);
    pub const CONNECT_FAILED: Color = Color::rgb(255, 0, 0);
    pub const SEND_SUCCESS: Color = Color::rgb(0, 255, 0);
    pub const SEND_FAILURE: Color = Color::rgb(255, 100, 0);
    pub const ESCALATION: Color = Color::rgb(255, 0, 255);
}

/// Flash after a new fix is published
pub const FIX_FLASH: Duration = Duration::from_millis(50);

/// Pulse after a successful send
pub const SUCCESS_PULSE: Duration = Duration::from_millis(200);

/// Pulse after an exhausted retry budget
pub const FAILURE_PULSE: Duration = Duration::from_millis(500);

/// Anything that can show a color
pub trait StatusIndicator: Send {
    fn set_color(&mut self, color: Color);

    /// Color currently shown
    fn color(&self) -> Color;
}

impl<T: StatusIndicator + ?Sized> StatusIndicator for Box<T> {
    fn set_color(&mut self, color: Color) {
        (**self).set_color(color)
    }

    fn color(&self) -> Color {
        (**self).color()
    }
}

/// Show `color` for `duration`, then restore whatever was shown before
pub async fn pulse(indicator: &mut dyn StatusIndicator, color: Color, duration: Duration) {
    let previous = indicator.color();
    indicator.set_color(color);
    tokio::time::sleep(duration).await;
    indicator.set_color(previous);
}

/// RGB LED exposed through the Linux LED class (`/sys/class/leds/<name>/brightness`)
#[derive(Debug)]
pub struct SysfsRgbIndicator {
    channels: [PathBuf; 3],
    current: Color,
}

impl SysfsRgbIndicator {
    /// Build from the three LED class names (e.g. "rgb:red")
    pub fn new(red: &str, green: &str, blue: &str) -> Self {
        Self::with_root("/sys/class/leds", red, green, blue)
    }

    pub fn with_root(root: impl Into<PathBuf>, red: &str, green: &str, blue: &str) -> Self {
        let root = root.into();
        Self {
            channels: [
                root.join(red).join("brightness"),
                root.join(green).join("brightness"),
                root.join(blue).join("brightness"),
            ],
            current: Color::OFF,
        }
    }
}

impl StatusIndicator for SysfsRgbIndicator {
    fn set_color(&mut self, color: Color) {
        self.current = color;
        for (path, value) in self.channels.iter().zip([color.r, color.g, color.b]) {
            if let Err(e) = std::fs::write(path, value.to_string()) {
                debug!("Failed to write LED channel {}: {}", path.display(), e);
            }
        }
    }

    fn color(&self) -> Color {
        self.current
    }
}

/// Indicator that only logs color changes, for boards without an LED
#[derive(Debug, Default)]
pub struct LogIndicator {
    current: Color,
}

impl LogIndicator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StatusIndicator for LogIndicator {
    fn set_color(&mut self, color: Color) {
        if color != self.current {
            trace!("Indicator -> ({}, {}, {})", color.r, color.g, color.b);
        }
        self.current = color;
    }

    fn color(&self) -> Color {
        self.current
    }
}

/// Sysfs LED when enabled, log-only otherwise
pub fn from_config(config: &IndicatorConfig) -> Box<dyn StatusIndicator> {
    if config.enabled {
        info!("Status LED: {}/{}/{}", config.red, config.green, config.blue);
        Box::new(SysfsRgbIndicator::new(&config.red, &config.green, &config.blue))
    } else {
        info!("Status LED disabled, logging colors only");
        Box::new(LogIndicator::new())
    }
}


#[cfg(test)]
mod tests {
    use super::mocks::RecordingIndicator;
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_pulse_restores_previous_color() {
        let mut indicator = RecordingIndicator::new();
        indicator.set_color(Color::IDLE);

        let start = tokio::time::Instant::now();
        pulse(&mut indicator, Color::SEND_SUCCESS, SUCCESS_PULSE).await;

        assert_eq!(start.elapsed(), SUCCESS_PULSE);
        assert_eq!(indicator.history, vec![Color::IDLE, Color::SEND_SUCCESS, Color::IDLE]);
        assert_eq!(indicator.color(), Color::IDLE);
    }

    #[test]
    fn test_sysfs_indicator_writes_channels() {
        let root = tempfile::tempdir().unwrap();
        for name in ["r", "g", "b"] {
            std::fs::create_dir(root.path().join(name)).unwrap();
        }

        let mut indicator = SysfsRgbIndicator::with_root(root.path(), "r", "g", "b");
        indicator.set_color(Color::MODEM_READY);

        let read = |name: &str| std::fs::read_to_string(root.path().join(name).join("brightness")).unwrap();
        assert_eq!(read("r"), "255");
        assert_eq!(read("g"), "0");
        assert_eq!(read("b"), "200");
        assert_eq!(indicator.color(), Color::MODEM_READY);
    }

    #[test]
    fn test_sysfs_indicator_missing_led_is_not_fatal() {
        let mut indicator = SysfsRgbIndicator::with_root("/nonexistent/leds", "r", "g", "b");
        indicator.set_color(Color::NO_FIX);
        assert_eq!(indicator.color(), Color::NO_FIX);
    }

    #[test]
    fn test_from_config_disabled_uses_log_indicator() {
        let config = IndicatorConfig {
            enabled: false,
            ..IndicatorConfig::default()
        };
        let mut indicator = from_config(&config);
        indicator.set_color(Color::IDLE);
        assert_eq!(indicator.color(), Color::IDLE);
    }

    #[test]
    fn test_log_indicator_tracks_color() {
        let mut indicator = LogIndicator::new();
        assert_eq!(indicator.color(), Color::OFF);
        indicator.set_color(Color::ESCALATION);
        assert_eq!(indicator.color(), Color::ESCALATION);
    }
}
