//! # Tracking Scheduler
//!
//! The tracker's single control loop. Every tick it:
//!
//! 1. polls the GNSS reader (never waits for data)
//! 2. logs a status line when the status interval has passed
//! 3. shows the no-fix color and stops if there is no fix
//! 4. once the send interval has passed since the last successful send,
//!    checks the link, reconnects if it is down, otherwise sends and
//!    escalates to a full reconnection after repeated failures
//!
//! then sleeps for the tick interval. Nothing in a tick returns an error;
//! every failure is logged and retried on a later tick.

use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::connectivity::ConnectivityProvider;
use crate::gnss::{FixUpdate, GnssReader};
use crate::indicator::{Color, StatusIndicator, FIX_FLASH};
use crate::serial::SerialPortIO;
use crate::uplink::{RetryPolicy, UplinkClient};

/// Loop timing and escalation knobs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackerSettings {
    pub tick: Duration,
    pub send_interval: Duration,
    pub status_interval: Duration,
    /// Consecutive failed sends that force a full reconnection
    pub escalation_threshold: u32,
}

impl TrackerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            tick: config.scheduler.tick(),
            send_interval: config.uplink.send_interval(),
            status_interval: config.scheduler.status_interval(),
            escalation_threshold: config.uplink.escalation_threshold.max(1),
        }
    }
}

/// What a single tick ended up doing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    NoFix,
    /// Fix held, send interval not yet elapsed
    Waiting,
    /// Link was down; reconnection attempted instead of sending
    Reconnecting,
    Sent,
    SendFailed,
    /// Send failed and the failure threshold forced a full reconnection
    Escalated,
}

/// GNSS tracker state owned by the control loop
pub struct Tracker<P, C, I>
where
    P: SerialPortIO,
    C: ConnectivityProvider,
    I: StatusIndicator,
{
    gnss: GnssReader<P>,
    provider: C,
    uplink: UplinkClient,
    indicator: I,
    settings: TrackerSettings,
    last_send: Option<Instant>,
    last_status: Option<Instant>,
    link_up: bool,
    had_fix: bool,
}

impl<P, C, I> Tracker<P, C, I>
where
    P: SerialPortIO,
    C: ConnectivityProvider,
    I: StatusIndicator,
{
    pub fn new(gnss: GnssReader<P>, provider: C, uplink: UplinkClient, indicator: I, settings: TrackerSettings) -> Self {
        Self {
            gnss,
            provider,
            uplink,
            indicator,
            settings,
            last_send: None,
            last_status: None,
            link_up: false,
            had_fix: false,
        }
    }

    /// Build from configuration with the uplink URL and retry policy it names
    pub fn from_config(gnss: GnssReader<P>, provider: C, indicator: I, config: &Config) -> Self {
        let uplink = UplinkClient::new(config.uplink_url(), RetryPolicy::from_config(&config.uplink));
        Self::new(gnss, provider, uplink, indicator, TrackerSettings::from_config(config))
    }

    /// Run forever: tick, then sleep for the tick interval
    pub async fn run(&mut self) {
        info!(
            "Tracking started (send every {:?}, tick {:?})",
            self.settings.send_interval, self.settings.tick
        );
        loop {
            let outcome = self.tick().await;
            debug!("Tick: {:?}", outcome);
            sleep(self.settings.tick).await;
        }
    }

    /// One iteration of the control loop, without the trailing sleep
    pub async fn tick(&mut self) -> TickOutcome {
        let update = self.gnss.poll().await;
        self.log_status_if_due();

        match update {
            FixUpdate::NoFix => {
                if self.had_fix {
                    info!("GNSS fix lost");
                } else {
                    debug!("No GNSS fix");
                }
                self.had_fix = false;
                self.indicator.set_color(Color::NO_FIX);
                return TickOutcome::NoFix;
            }
            FixUpdate::Published => self.announce_fix().await,
            FixUpdate::Unchanged => {}
        }
        self.had_fix = true;

        if !self.send_due() {
            return TickOutcome::Waiting;
        }

        self.link_up = self.provider.is_connected().await;
        if !self.link_up {
            warn!("Connectivity lost, reconnecting before next send");
            let status = self.provider.connect(&mut self.indicator).await;
            self.link_up = status.is_connected();
            if !self.link_up {
                warn!("Reconnection failed, will retry");
            }
            return TickOutcome::Reconnecting;
        }

        let fix = self.gnss.fix().clone();
        if self.uplink.send(&fix, &mut self.provider, &mut self.indicator).await {
            self.last_send = Some(Instant::now());
            return TickOutcome::Sent;
        }

        if self.uplink.failures() >= self.settings.escalation_threshold {
            self.escalate().await;
            return TickOutcome::Escalated;
        }
        TickOutcome::SendFailed
    }

    async fn announce_fix(&mut self) {
        let fix = self.gnss.fix();
        info!(
            "GNSS fix: lat={:.6} lon={:.6} time={} satellites={} in use / {} in view",
            fix.latitude, fix.longitude, fix.timestamp, fix.satellites_in_use, fix.satellites_in_view
        );
        self.indicator.set_color(Color::FIX_ACQUIRED);
        sleep(FIX_FLASH).await;
        self.indicator.set_color(Color::IDLE);
    }

    /// Full reconnection; the counter resets whatever the outcome
    async fn escalate(&mut self) {
        warn!(
            "{} consecutive send failures, forcing full reconnection",
            self.uplink.failures()
        );
        self.indicator.set_color(Color::ESCALATION);
        let status = self.provider.reconnect(&mut self.indicator).await;
        self.link_up = status.is_connected();
        if self.link_up {
            info!("Escalation reconnect succeeded");
        } else {
            warn!("Escalation reconnect failed");
        }
        self.uplink.reset_failures();
    }

    fn send_due(&self) -> bool {
        self.last_send
            .map_or(true, |at| at.elapsed() >= self.settings.send_interval)
    }

    fn log_status_if_due(&mut self) {
        let due = self
            .last_status
            .map_or(true, |at| at.elapsed() >= self.settings.status_interval);
        if !due {
            return;
        }
        self.last_status = Some(Instant::now());

        let fix = self.gnss.fix();
        let (parsed, rejected) = self.gnss.decoder().sentence_counts();
        let last_success = self
            .uplink
            .last_success()
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "never".to_string());
        info!(
            "Status: fix={} lat={:.6} lon={:.6} sats={}/{} link={} ({}) failures={} last_send={} nmea={}/{} rejected port={}",
            fix.has_fix,
            fix.latitude,
            fix.longitude,
            fix.satellites_in_use,
            fix.satellites_in_view,
            if self.link_up { "up" } else { "down" },
            self.provider.connection_type(),
            self.uplink.failures(),
            last_success,
            parsed,
            rejected,
            if self.gnss.is_port_open() { "open" } else { "closed" },
        );
    }

    pub fn provider(&self) -> &C {
        &self.provider
    }

    pub fn indicator(&self) -> &I {
        &self.indicator
    }

    pub fn uplink(&self) -> &UplinkClient {
        &self.uplink
    }

    pub fn gnss(&self) -> &GnssReader<P> {
        &self.gnss
    }
}
