//! # Serial Communication Module
//!
//! UART handling for the GNSS receiver and the cellular modem.
//!
//! This module handles:
//! - Opening serial ports with 8N1 framing at the configured baud rate
//! - Trying a list of candidate device paths in order
//! - Non-blocking "bytes available now" reads via [`SerialPortIO`]

pub mod port_trait;

pub use port_trait::{SerialPortIO, TokioSerialPort};

use crate::error::{Result, TrackerError};
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, info, warn};

/// Default GNSS receiver baud rate
pub const GNSS_BAUD_RATE: u32 = 9600;

/// Open a serial port, trying each candidate path in order
///
/// # Arguments
///
/// * `paths` - Device paths to try (e.g., &["/dev/ttyS0", "/dev/ttyAMA0"])
/// * `baud_rate` - Line speed
///
/// # Errors
///
/// Returns `SerialPortNotFound` listing every path tried when none opens
///
/// # Examples
///
/// ```no_run
/// use gnss_tracker::serial::open_with_paths;
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let port = open_with_paths(&["/dev/ttyS0"], 9600)?;
///     println!("Opened {}", port.device_path());
///     Ok(())
/// }
/// ```
pub fn open_with_paths(paths: &[&str], baud_rate: u32) -> Result<TokioSerialPort> {
    for path in paths {
        debug!("Trying to open serial port: {}", path);

        match open_port(path, baud_rate) {
            Ok(port) => {
                info!("Opened serial device at {} ({} baud)", path, baud_rate);
                return Ok(port);
            }
            Err(e) => {
                warn!("Failed to open {}: {}", path, e);
                continue;
            }
        }
    }

    Err(TrackerError::SerialPortNotFound(paths.join(", ")))
}

/// Open a specific serial port with 8N1 framing and no flow control
///
/// Must be called from within a tokio runtime.
pub fn open_port(path: &str, baud_rate: u32) -> Result<TokioSerialPort> {
    let port = tokio_serial::new(path, baud_rate)
        .data_bits(tokio_serial::DataBits::Eight)
        .parity(tokio_serial::Parity::None)
        .stop_bits(tokio_serial::StopBits::One)
        .flow_control(tokio_serial::FlowControl::None)
        .open_native_async()
        .map_err(|e| TrackerError::Serial(format!("Failed to open {}: {}", path, e)))?;

    Ok(TokioSerialPort::new(port, path))
}
