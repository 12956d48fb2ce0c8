//! Status poller
//!
//! Writes a status request (`?`) every `interval` while the run is active. It never reads:
//! the reports come back through the RX thread like any other line.

use crate::error::DriverError;
use crate::link::LinkWriter;
use crate::state::RunControl;
use grbl_protocol::RealtimeCommand;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

/// Shortest accepted polling interval
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Longest single sleep, so a stop is noticed promptly
const SLEEP_SLICE: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollerConfig {
    pub interval: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
        }
    }
}

impl PollerConfig {
    pub fn validate(&self) -> Result<(), DriverError> {
        if self.interval < MIN_POLL_INTERVAL {
            return Err(DriverError::Config(format!(
                "status interval {:?} is below the minimum of {:?}",
                self.interval, MIN_POLL_INTERVAL
            )));
        }
        Ok(())
    }
}

/// Background status requester
///
/// The thread exits when the run-active flag clears, when the link goes away, or when
/// the poller is dropped.
pub struct StatusPoller {
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl StatusPoller {
    pub fn spawn(
        writer: LinkWriter,
        control: Arc<RunControl>,
        config: PollerConfig,
    ) -> Result<Self, DriverError> {
        config.validate()?;
        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = shutdown.clone();
        let handle = thread::Builder::new()
            .name("grbl-poller".into())
            .spawn(move || poll_loop(writer, control, config.interval, flag))
            .map_err(grbl_serial::SerialError::from)?;
        Ok(Self {
            shutdown,
            handle: Some(handle),
        })
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop and wait for the thread
    pub fn stop(mut self) {
        self.shutdown_and_join();
    }

    fn shutdown_and_join(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            warn!("Status poller thread panicked");
        }
    }
}

impl Drop for StatusPoller {
    fn drop(&mut self) {
        self.shutdown_and_join();
    }
}

fn poll_loop(
    writer: LinkWriter,
    control: Arc<RunControl>,
    interval: Duration,
    shutdown: Arc<AtomicBool>,
) {
    debug!("Status poller started, interval {:?}", interval);
    let keep_going = || control.is_run_active() && !shutdown.load(Ordering::Acquire);

    while keep_going() {
        if writer.realtime(RealtimeCommand::StatusRequest).is_err() {
            debug!("Status poller: link closed");
            break;
        }

        let mut remaining = interval;
        while !remaining.is_zero() && keep_going() {
            let slice = remaining.min(SLEEP_SLICE);
            spin_sleep::sleep(slice);
            remaining -= slice;
        }
    }
    debug!("Status poller stopped");
}
