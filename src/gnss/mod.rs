//! # GNSS Module
//!
//! Reads the positioning receiver's serial stream and maintains the current fix.
//!
//! This module handles:
//! - NMEA sentence reassembly and checksum validation ([`sentence`])
//! - ISO-8601 timestamp construction ([`timestamp`])
//! - Fix state tracking with change suppression ([`decoder`])
//! - Non-blocking serial polling with automatic port reopen ([`GnssReader`])

pub mod decoder;
pub mod sentence;
pub mod timestamp;

pub use decoder::{FixDecoder, FixState, FixUpdate};

use crate::error::Result;
use crate::serial::SerialPortIO;
use tracing::{info, warn};

/// Read buffer size per serial read
const READ_CHUNK: usize = 256;

/// Upper bound on reads per poll so one poll cannot spin on a chatty port
const MAX_READS_PER_POLL: usize = 16;

/// Opens (or reopens) the receiver's serial port
pub type PortOpener<P> = Box<dyn FnMut() -> Result<P> + Send>;

/// Owns the receiver port and the decoder
///
/// A read error drops the port; the next poll tries to reopen it.
pub struct GnssReader<P: SerialPortIO> {
    port: Option<P>,
    opener: PortOpener<P>,
    decoder: FixDecoder,
}

impl<P: SerialPortIO> GnssReader<P> {
    /// Create a reader; the port is opened lazily on the first poll
    pub fn new(opener: PortOpener<P>) -> Self {
        Self {
            port: None,
            opener,
            decoder: FixDecoder::new(),
        }
    }

    /// Read whatever the receiver has sent since the last poll and decode it
    ///
    /// Never waits for data and never fails: serial problems are logged and
    /// the current fix is re-evaluated from what has been decoded so far.
    pub async fn poll(&mut self) -> FixUpdate {
        if self.port.is_none() {
            match (self.opener)() {
                Ok(port) => {
                    info!("GNSS receiver port opened");
                    self.port = Some(port);
                }
                Err(e) => warn!("GNSS receiver port unavailable: {}", e),
            }
        }

        let mut buf = [0u8; READ_CHUNK];
        let mut received = Vec::new();

        if let Some(port) = self.port.as_mut() {
            for _ in 0..MAX_READS_PER_POLL {
                match port.read_available(&mut buf).await {
                    Ok(0) => break,
                    Ok(n) => received.extend_from_slice(&buf[..n]),
                    Err(e) => {
                        warn!("GNSS serial read failed, will reopen: {}", e);
                        self.port = None;
                        break;
                    }
                }
            }
        }

        self.decoder.feed(&received)
    }

    pub fn fix(&self) -> &FixState {
        self.decoder.fix()
    }

    pub fn decoder(&self) -> &FixDecoder {
        &self.decoder
    }

    pub fn is_port_open(&self) -> bool {
        self.port.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TrackerError;
    use crate::gnss::sentence::with_checksum;
    use crate::serial::port_trait::mocks::MockSerialPort;
    use std::io;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn fix_sentences() -> String {
        format!(
            "{}{}",
            with_checksum("GPRMC,010203.00,A,3345.0000,S,15112.0000,W,0.02,,040506,,,A"),
            with_checksum("GPGGA,010203.00,3345.0000,S,15112.0000,W,1,07,1.2,35.0,M,,M,,"),
        )
    }

    fn reader_for(port: &MockSerialPort) -> GnssReader<MockSerialPort> {
        let port = port.clone();
        GnssReader::new(Box::new(move || Ok(port.clone())))
    }

    #[tokio::test]
    async fn test_poll_decodes_available_bytes() {
        let port = MockSerialPort::new();
        let mut reader = reader_for(&port);

        assert_eq!(reader.poll().await, FixUpdate::NoFix);
        assert!(reader.is_port_open());

        port.push_incoming(fix_sentences().as_bytes());
        assert_eq!(reader.poll().await, FixUpdate::Published);
        assert_eq!(reader.fix().timestamp, "2006-05-04T01:02:03Z");

        assert_eq!(reader.poll().await, FixUpdate::Unchanged);
    }

    #[tokio::test]
    async fn test_large_backlog_drained_in_one_poll() {
        let port = MockSerialPort::new();
        let mut reader = reader_for(&port);

        let filler = with_checksum("GPGSV,3,1,12,10,63,137,17,07,61,098,15,05,59,290,20,08,54,157,30");
        let mut backlog = filler.repeat(20);
        backlog.push_str(&fix_sentences());
        assert!(backlog.len() > READ_CHUNK * 4);
        port.push_incoming(backlog.as_bytes());

        assert_eq!(reader.poll().await, FixUpdate::Published);
        assert_eq!(reader.fix().satellites_in_view, 12);
    }

    #[tokio::test]
    async fn test_read_error_reopens_port() {
        let port = MockSerialPort::new();
        let opens = Arc::new(AtomicUsize::new(0));
        let opens_in_opener = Arc::clone(&opens);
        let port_for_opener = port.clone();
        let mut reader: GnssReader<MockSerialPort> = GnssReader::new(Box::new(move || {
            opens_in_opener.fetch_add(1, Ordering::SeqCst);
            Ok(port_for_opener.clone())
        }));

        reader.poll().await;
        assert_eq!(opens.load(Ordering::SeqCst), 1);

        port.set_read_error(Some(io::ErrorKind::BrokenPipe));
        reader.poll().await;
        assert!(!reader.is_port_open());

        port.set_read_error(None);
        port.push_incoming(fix_sentences().as_bytes());
        assert_eq!(reader.poll().await, FixUpdate::Published);
        assert_eq!(opens.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_open_failure_is_not_fatal() {
        let mut reader: GnssReader<MockSerialPort> = GnssReader::new(Box::new(|| {
            Err(TrackerError::SerialPortNotFound("/dev/ttyS0".to_string()))
        }));

        assert_eq!(reader.poll().await, FixUpdate::NoFix);
        assert!(!reader.is_port_open());
    }
}
