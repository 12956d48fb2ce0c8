//! # Grbl Driver
//!
//! Streaming engine for Grbl controllers:
//!
//! - IO threads (one reader, one writer) over a split serial adapter
//! - receive-buffer flow control (buffered and simple modes)
//! - cycle execution with piece counting, statistics and the error-abort threshold
//! - background status polling
//! - operator overrides (hold/resume/reset, feed and power steps, stop requests)
//! - multi-cycle jobs with ledger resume
//!
//! Machine status is published lock-free through `ArcSwap`; run flags and override
//! offsets are plain atomics.

mod error;
pub mod executor;
pub mod flow;
pub mod job;
pub mod link;
pub mod metrics;
pub mod observer;
pub mod overrides;
pub mod pipeline;
pub mod poller;
pub mod state;

pub use error::DriverError;
pub use executor::{
    CycleExecutor, CycleStats, DEFAULT_ERROR_THRESHOLD, DEFAULT_PIECE_DISTANCE, ExecutorConfig,
    PassContext, PassOutcome, StreamLink,
};
pub use flow::{BufferTracker, FlowState, GRBL_RX_BUFFER_SIZE, InFlight, StreamMode};
pub use job::{JobConfig, JobReport, JobRunner, start_position};
pub use link::{GrblLink, LinkConfig, LinkWriter, handshake};
pub use metrics::{LinkMetrics, MetricsSnapshot};
pub use observer::{AlertKind, CycleObserver, CycleSummary, Progress};
pub use overrides::{OverrideCommand, OverrideController, OverrideOutcome, RealtimeSink};
pub use pipeline::{LinkEvent, TxRequest, rx_loop, tx_loop};
pub use poller::{MIN_POLL_INTERVAL, PollerConfig, StatusPoller};
pub use state::*;
