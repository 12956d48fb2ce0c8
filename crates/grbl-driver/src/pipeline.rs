//! Pipeline IO loops
//!
//! Two threads share one serial link:
//!
//! - `tx_loop` is the only writer. The executor, the status poller and the operator
//!   console all submit [`TxRequest`]s through clones of one channel, so every write is
//!   whole and writes never interleave.
//! - `rx_loop` is the only reader. It classifies each line and forwards the result as a
//!   [`LinkEvent`]; status reports and device messages are also published to the shared
//!   [`LinkContext`].

use crate::metrics::LinkMetrics;
use crate::state::LinkContext;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use grbl_protocol::{ControllerResponse, RealtimeCommand, StreamBlock, classify_strict};
use grbl_serial::{RxAdapter, SerialError, TxAdapter};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{error, trace, warn};

/// How long the TX thread waits for a request before re-checking the run flag
const TX_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// A write request for the TX thread
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxRequest {
    /// A normalized block, sent with its terminator
    Block(StreamBlock),
    /// A single realtime byte
    Realtime(RealtimeCommand),
}

impl TxRequest {
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            TxRequest::Block(block) => block.to_bytes(),
            TxRequest::Realtime(cmd) => vec![cmd.byte()],
        }
    }
}

/// What the RX thread forwards: a classified line, or the transport failure that ended it
pub type LinkEvent = Result<ControllerResponse, SerialError>;

/// TX thread main loop
///
/// # Parameters
/// - `tx`: write half of the adapter
/// - `requests`: the single ordered write queue
/// - `events`: used to report a fatal write failure to the reader side
/// - `is_running`: lifecycle flag shared with the RX thread
/// - `metrics`: traffic counters
pub fn tx_loop(
    mut tx: impl TxAdapter,
    requests: Receiver<TxRequest>,
    events: Sender<LinkEvent>,
    is_running: Arc<AtomicBool>,
    metrics: Arc<LinkMetrics>,
) {
    loop {
        if !is_running.load(Ordering::Acquire) {
            trace!("TX thread: is_running flag is false, exiting");
            break;
        }

        let request = match requests.recv_timeout(TX_POLL_INTERVAL) {
            Ok(request) => request,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                trace!("TX thread: request channel disconnected");
                break;
            },
        };

        let bytes = request.to_bytes();
        match tx.write(&bytes) {
            Ok(()) => {
                match request {
                    TxRequest::Block(_) => LinkMetrics::incr(&metrics.tx_lines),
                    TxRequest::Realtime(_) => LinkMetrics::incr(&metrics.tx_realtime),
                }
                metrics.tx_bytes.fetch_add(bytes.len() as u64, Ordering::Relaxed);
            },
            Err(e) => {
                error!("TX thread: failed to write {:?}: {}", request, e);
                LinkMetrics::incr(&metrics.tx_errors);
                is_running.store(false, Ordering::Release);
                let _ = events.send(Err(e));
                break;
            },
        }
    }

    trace!("TX thread: loop exited");
}

/// RX thread main loop
///
/// Read timeouts are normal (they only let the loop re-check `is_running`). A status
/// report that cannot be decoded is logged, counted as malformed and forwarded as
/// [`ControllerResponse::Other`]; it never stops the stream.
pub fn rx_loop(
    mut rx: impl RxAdapter,
    events: Sender<LinkEvent>,
    ctx: Arc<LinkContext>,
    is_running: Arc<AtomicBool>,
    metrics: Arc<LinkMetrics>,
) {
    loop {
        if !is_running.load(Ordering::Acquire) {
            trace!("RX thread: is_running flag is false, exiting");
            break;
        }

        let line = match rx.read_line() {
            Ok(line) => line,
            Err(SerialError::Timeout) => {
                LinkMetrics::incr(&metrics.rx_timeouts);
                continue;
            },
            Err(e) if !e.is_fatal() => {
                warn!("RX thread: dropping unreadable line: {}", e);
                LinkMetrics::incr(&metrics.rx_malformed);
                continue;
            },
            Err(e) => {
                error!("RX thread: fatal read error: {}", e);
                is_running.store(false, Ordering::Release);
                let _ = events.send(Err(e));
                break;
            },
        };

        LinkMetrics::incr(&metrics.rx_lines);
        let text = line.trim();
        if text.is_empty() {
            continue;
        }
        trace!("RX <- {}", text);

        let response = classify_strict(text).unwrap_or_else(|e| {
            warn!("Malformed status report {:?}: {}", text, e);
            LinkMetrics::incr(&metrics.rx_malformed);
            ControllerResponse::Other(text.to_string())
        });

        match &response {
            ControllerResponse::Ack => LinkMetrics::incr(&metrics.rx_acks),
            ControllerResponse::Error(_) => LinkMetrics::incr(&metrics.rx_errors),
            ControllerResponse::Status(report) => {
                LinkMetrics::incr(&metrics.rx_status);
                ctx.publish_report(*report);
            },
            ControllerResponse::Other(message) => {
                LinkMetrics::incr(&metrics.rx_other);
                ctx.publish_message(message);
            },
        }

        if events.send(Ok(response)).is_err() {
            trace!("RX thread: event channel disconnected");
            break;
        }
    }

    trace!("RX thread: loop exited");
}
