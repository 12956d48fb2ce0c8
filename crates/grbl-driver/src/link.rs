//! Controller link
//!
//! [`GrblLink`] owns the serial adapter after the start-up handshake: it splits it and
//! runs one RX and one TX thread (see [`crate::pipeline`]). The link owner is the only
//! consumer of classified responses; everybody else writes through a [`LinkWriter`].

use crate::error::DriverError;
use crate::executor::StreamLink;
use crate::metrics::{LinkMetrics, MetricsSnapshot};
use crate::pipeline::{LinkEvent, TxRequest, rx_loop, tx_loop};
use crate::state::{LinkContext, MachineStatus};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use grbl_protocol::{ControllerResponse, LineCommand, RealtimeCommand, StatusReport, StreamBlock};
use grbl_serial::{SerialAdapter, SerialError, SplittableAdapter};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

/// How long `Drop` waits for each IO thread
const IO_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Join an IO thread that was told to stop; after `timeout` it is left detached.
/// Returns whether it exited cleanly.
fn join_io_thread(handle: JoinHandle<()>, timeout: Duration) -> bool {
    let name = handle.thread().name().unwrap_or("io").to_string();
    let deadline = Instant::now() + timeout;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            error!("{} thread still running after {:?}, detaching it", name, timeout);
            return false;
        }
        thread::sleep(Duration::from_millis(5));
    }
    if handle.join().is_err() {
        error!("{} thread panicked", name);
        return false;
    }
    true
}

/// Link timing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkConfig {
    /// No response at all for this long is a stalled link
    pub stall_timeout: Duration,
    /// Read timeout of the RX thread; bounds shutdown latency
    pub poll_timeout: Duration,
    /// Wait after waking the controller, before flushing its output
    pub settle: Duration,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            stall_timeout: Duration::from_secs(5),
            poll_timeout: Duration::from_millis(100),
            settle: Duration::from_secs(1),
        }
    }
}

/// Wake the controller and reset it
///
/// Reads whatever start-up output is already there, writes `"\r\n\r\n"`, waits
/// `settle`, flushes input, sends a soft reset and waits up to `stall_timeout` for the
/// `Grbl ...` banner. Returns the banner without its help hint.
pub fn handshake<A>(adapter: &mut A, config: &LinkConfig) -> Result<String, DriverError>
where
    A: SerialAdapter + ?Sized,
{
    adapter.set_read_timeout(config.settle)?;
    if let Some(line) = adapter.try_read_line()? {
        debug!("Start-up output: {}", line.trim());
    }

    adapter.write(b"\r\n\r\n")?;
    thread::sleep(config.settle);
    adapter.clear_input()?;
    adapter.write(&[RealtimeCommand::SoftReset.byte()])?;

    adapter.set_read_timeout(config.poll_timeout)?;
    let deadline = Instant::now() + config.stall_timeout;
    loop {
        match adapter.try_read_line() {
            Ok(Some(line)) if line.contains("Grbl") => {
                let banner = line.split('[').next().unwrap_or(&line).trim().to_string();
                info!("Controller ready: {}", banner);
                return Ok(banner);
            },
            Ok(Some(line)) => debug!("Ignoring pre-banner output: {}", line.trim()),
            Ok(None) | Err(SerialError::InvalidUtf8) => {},
            Err(e) => return Err(e.into()),
        }
        if Instant::now() >= deadline {
            return Err(DriverError::Handshake(format!(
                "no Grbl banner within {:?} after soft reset",
                config.stall_timeout
            )));
        }
    }
}

/// Cloneable write handle for realtime traffic (poller, operator console)
#[derive(Debug, Clone)]
pub struct LinkWriter {
    requests: Sender<TxRequest>,
}

impl LinkWriter {
    pub fn realtime(&self, cmd: RealtimeCommand) -> Result<(), DriverError> {
        trace!("TX realtime {:?}", cmd);
        self.requests
            .send(TxRequest::Realtime(cmd))
            .map_err(|_| DriverError::ChannelClosed)
    }

    pub(crate) fn block(&self, block: StreamBlock) -> Result<(), DriverError> {
        trace!("TX -> {}", block.text());
        self.requests.send(TxRequest::Block(block)).map_err(|_| DriverError::ChannelClosed)
    }
}

/// Running link to a controller
pub struct GrblLink {
    writer: LinkWriter,
    events: Receiver<LinkEvent>,
    ctx: Arc<LinkContext>,
    metrics: Arc<LinkMetrics>,
    is_running: Arc<AtomicBool>,
    rx_thread: Option<JoinHandle<()>>,
    tx_thread: Option<JoinHandle<()>>,
    config: LinkConfig,
    banner: Option<String>,
}

impl GrblLink {
    /// Handshake, then start the IO threads
    pub fn connect<A>(mut adapter: A, config: LinkConfig) -> Result<Self, DriverError>
    where
        A: SplittableAdapter + Send + 'static,
        A::RxAdapter: Send + 'static,
        A::TxAdapter: Send + 'static,
    {
        let banner = handshake(&mut adapter, &config)?;
        let mut link = Self::start(adapter, config)?;
        link.banner = Some(banner);
        Ok(link)
    }

    /// Start the IO threads without a handshake
    pub fn start<A>(mut adapter: A, config: LinkConfig) -> Result<Self, DriverError>
    where
        A: SplittableAdapter + Send + 'static,
        A::RxAdapter: Send + 'static,
        A::TxAdapter: Send + 'static,
    {
        adapter.set_read_timeout(config.poll_timeout)?;
        let (rx_adapter, tx_adapter) = adapter.split()?;

        let (requests_tx, requests_rx) = crossbeam_channel::unbounded::<TxRequest>();
        let (events_tx, events_rx) = crossbeam_channel::unbounded::<LinkEvent>();

        let ctx = Arc::new(LinkContext::new());
        let is_running = Arc::new(AtomicBool::new(true));
        let metrics = Arc::new(LinkMetrics::new());

        let rx_thread = {
            let events = events_tx.clone();
            let ctx = ctx.clone();
            let is_running = is_running.clone();
            let metrics = metrics.clone();
            thread::Builder::new()
                .name("grbl-rx".into())
                .spawn(move || rx_loop(rx_adapter, events, ctx, is_running, metrics))
                .map_err(SerialError::from)?
        };

        let tx_thread = {
            let is_running = is_running.clone();
            let metrics = metrics.clone();
            thread::Builder::new()
                .name("grbl-tx".into())
                .spawn(move || tx_loop(tx_adapter, requests_rx, events_tx, is_running, metrics))
                .map_err(SerialError::from)?
        };

        debug!("Link IO threads started");

        Ok(Self {
            writer: LinkWriter {
                requests: requests_tx,
            },
            events: events_rx,
            ctx,
            metrics,
            is_running,
            rx_thread: Some(rx_thread),
            tx_thread: Some(tx_thread),
            config,
            banner: None,
        })
    }

    pub fn banner(&self) -> Option<&str> {
        self.banner.as_deref()
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    pub fn writer(&self) -> LinkWriter {
        self.writer.clone()
    }

    pub fn realtime(&self, cmd: RealtimeCommand) -> Result<(), DriverError> {
        self.writer.realtime(cmd)
    }

    /// Write a block; the caller accounts for its receive-buffer space
    pub fn send_block(&self, block: StreamBlock) -> Result<(), DriverError> {
        self.writer.block(block)
    }

    /// Next classified line
    ///
    /// # Errors
    /// - [`DriverError::Stalled`]: nothing arrived within the stall timeout
    /// - [`DriverError::Serial`]: the link failed
    /// - [`DriverError::ChannelClosed`]: the IO threads are gone
    pub fn recv(&self) -> Result<ControllerResponse, DriverError> {
        match self.events.recv_timeout(self.config.stall_timeout) {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(e)) => Err(e.into()),
            Err(RecvTimeoutError::Timeout) => {
                warn!("No controller output for {:?}", self.config.stall_timeout);
                Err(DriverError::Stalled(self.config.stall_timeout))
            },
            Err(RecvTimeoutError::Disconnected) => Err(DriverError::ChannelClosed),
        }
    }

    /// Whether classified lines are waiting to be read
    pub fn has_pending(&self) -> bool {
        !self.events.is_empty()
    }

    /// Send one block with nothing else in flight and wait for its answer
    ///
    /// Status reports and device messages received meanwhile are skipped (they are
    /// already published to the shared status).
    pub fn execute(&self, text: &str) -> Result<(), DriverError> {
        self.send_block(StreamBlock::new(text))?;
        loop {
            match self.recv()? {
                ControllerResponse::Ack => return Ok(()),
                ControllerResponse::Error(error) => {
                    return Err(DriverError::Rejected {
                        command: text.to_string(),
                        error,
                    });
                },
                ControllerResponse::Status(_) => {},
                ControllerResponse::Other(message) => debug!("Device: {}", message),
            }
        }
    }

    pub fn command(&self, cmd: LineCommand) -> Result<(), DriverError> {
        info!("Sending {}", cmd.as_str());
        self.execute(cmd.as_str())
    }

    /// Wait for a status report satisfying `done`; status requests must be flowing
    pub fn wait_for_status<F>(&self, mut done: F) -> Result<StatusReport, DriverError>
    where
        F: FnMut(&StatusReport) -> bool,
    {
        loop {
            match self.recv()? {
                ControllerResponse::Status(report) if done(&report) => return Ok(report),
                ControllerResponse::Status(_) => {},
                ControllerResponse::Other(message) => debug!("Device: {}", message),
                unexpected => warn!("Unexpected response while waiting: {:?}", unexpected),
            }
        }
    }

    pub fn status(&self) -> Arc<MachineStatus> {
        self.ctx.status()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Both IO threads alive and the link not failed
    pub fn is_healthy(&self) -> bool {
        let alive = |h: &Option<JoinHandle<()>>| h.as_ref().is_some_and(|h| !h.is_finished());
        self.is_running.load(Ordering::Acquire) && alive(&self.rx_thread) && alive(&self.tx_thread)
    }
}

impl StreamLink for GrblLink {
    fn submit(&mut self, block: StreamBlock) -> Result<(), DriverError> {
        self.send_block(block)
    }

    fn recv(&mut self) -> Result<ControllerResponse, DriverError> {
        GrblLink::recv(self)
    }

    fn has_pending(&self) -> bool {
        GrblLink::has_pending(self)
    }
}

impl Drop for GrblLink {
    fn drop(&mut self) {
        self.is_running.store(false, Ordering::Release);

        for handle in [self.rx_thread.take(), self.tx_thread.take()].into_iter().flatten() {
            join_io_thread(handle, IO_JOIN_TIMEOUT);
        }

        debug!("Link closed");
    }
}
