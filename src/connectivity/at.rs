//! # AT Command Channel
//!
//! Line-oriented request/response exchange with a modem over a serial port.
//!
//! A command is written with a trailing CR and the response lines are
//! collected until a final result code: `OK`, `ERROR`, `+CME ERROR: n` or
//! `+CMS ERROR: n`. Some commands switch to data mode and answer with
//! `CONNECT` instead; [`AtChannel::command_expect_connect`] handles those.

use bytes::BytesMut;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, trace};

use crate::error::{Result, TrackerError};
use crate::serial::SerialPortIO;

/// Interval between receive-buffer polls while waiting for a response
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Largest response kept before the buffer is considered garbage
const MAX_BUFFERED: usize = 4096;

/// Outcome of reading until a terminator
#[derive(Debug, Clone, PartialEq, Eq)]
enum Terminal {
    Ok,
    Connect,
}

/// AT command channel over any [`SerialPortIO`]
pub struct AtChannel<P: SerialPortIO> {
    port: P,
    rx: BytesMut,
    timeout: Duration,
}

impl<P: SerialPortIO> AtChannel<P> {
    /// Wrap a port; `timeout` bounds each command unless overridden
    pub fn new(port: P, timeout: Duration) -> Self {
        Self {
            port,
            rx: BytesMut::with_capacity(512),
            timeout,
        }
    }

    /// Run a command and return its information lines (echo and `OK` removed)
    pub async fn command(&mut self, cmd: &str) -> Result<Vec<String>> {
        self.command_with_timeout(cmd, self.timeout).await
    }

    pub async fn command_with_timeout(&mut self, cmd: &str, timeout: Duration) -> Result<Vec<String>> {
        self.send_line(cmd).await?;
        let (lines, terminal) = self.read_until_final(cmd, timeout, false).await?;
        match terminal {
            Terminal::Ok => Ok(lines),
            Terminal::Connect => Err(TrackerError::Modem(format!("{}: unexpected CONNECT", cmd))),
        }
    }

    /// Run a command that answers `CONNECT` before accepting a data payload
    pub async fn command_expect_connect(&mut self, cmd: &str) -> Result<()> {
        self.send_line(cmd).await?;
        let (_, terminal) = self.read_until_final(cmd, self.timeout, true).await?;
        match terminal {
            Terminal::Connect => Ok(()),
            Terminal::Ok => Err(TrackerError::Modem(format!("{}: expected CONNECT, got OK", cmd))),
        }
    }

    /// Write a data-mode payload and wait for the closing `OK`
    pub async fn send_payload(&mut self, payload: &[u8], timeout: Duration) -> Result<()> {
        self.port.write_all(payload).await?;
        self.port.flush().await?;
        let (_, terminal) = self.read_until_final("<payload>", timeout, false).await?;
        match terminal {
            Terminal::Ok => Ok(()),
            Terminal::Connect => Err(TrackerError::Modem("payload: unexpected CONNECT".to_string())),
        }
    }

    /// Wait for an unsolicited result line starting with `prefix`
    pub async fn wait_for_urc(&mut self, prefix: &str, timeout: Duration) -> Result<String> {
        let deadline = Instant::now() + timeout;
        loop {
            while let Some(line) = self.next_line() {
                if line.starts_with(prefix) {
                    return Ok(line);
                }
                trace!("Ignoring modem line while waiting for {}: {}", prefix, line);
            }
            if Instant::now() >= deadline {
                return Err(TrackerError::Modem(format!("timed out waiting for {}", prefix)));
            }
            self.fill().await?;
            sleep(POLL_INTERVAL).await;
        }
    }

    async fn send_line(&mut self, cmd: &str) -> Result<()> {
        // Stale URCs from before this command would be mistaken for its response
        self.drain_input().await?;
        debug!("AT > {}", cmd);
        self.port.write_all(format!("{}\r", cmd).as_bytes()).await?;
        self.port.flush().await?;
        Ok(())
    }

    async fn drain_input(&mut self) -> Result<()> {
        self.fill().await?;
        if !self.rx.is_empty() {
            trace!("Discarding {} stale modem bytes", self.rx.len());
            self.rx.clear();
        }
        Ok(())
    }

    async fn read_until_final(
        &mut self,
        cmd: &str,
        timeout: Duration,
        accept_connect: bool,
    ) -> Result<(Vec<String>, Terminal)> {
        let deadline = Instant::now() + timeout;
        let mut lines = Vec::new();

        loop {
            while let Some(line) = self.next_line() {
                trace!("AT < {}", line);
                if line == cmd {
                    continue; // echo
                }
                if line == "OK" {
                    return Ok((lines, Terminal::Ok));
                }
                if accept_connect && line.starts_with("CONNECT") {
                    return Ok((lines, Terminal::Connect));
                }
                if line == "ERROR" || line.starts_with("+CME ERROR") || line.starts_with("+CMS ERROR") {
                    return Err(TrackerError::Modem(format!("{}: {}", cmd, line)));
                }
                lines.push(line);
            }

            if Instant::now() >= deadline {
                return Err(TrackerError::Modem(format!("{}: timed out after {:?}", cmd, timeout)));
            }
            self.fill().await?;
            if !self.has_complete_line() {
                sleep(POLL_INTERVAL).await;
            }
        }
    }

    async fn fill(&mut self) -> Result<()> {
        let mut buf = [0u8; 256];
        loop {
            let n = self.port.read_available(&mut buf).await?;
            if n == 0 {
                return Ok(());
            }
            self.rx.extend_from_slice(&buf[..n]);
            if self.rx.len() > MAX_BUFFERED {
                self.rx.clear();
                return Err(TrackerError::Modem("response overflow".to_string()));
            }
        }
    }

    fn has_complete_line(&self) -> bool {
        self.rx.iter().any(|&b| b == b'\n')
    }

    /// Pop the next non-empty line; `None` when no complete line is buffered
    fn next_line(&mut self) -> Option<String> {
        loop {
            let pos = self.rx.iter().position(|&b| b == b'\n')?;
            let raw = self.rx.split_to(pos + 1);
            let line = String::from_utf8_lossy(&raw).trim().to_string();
            if !line.is_empty() {
                return Some(line);
            }
        }
    }
}
