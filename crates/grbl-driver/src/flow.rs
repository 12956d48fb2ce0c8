//! Buffer occupancy flow control
//!
//! The controller holds unacknowledged blocks in a fixed receive buffer (128 bytes on
//! Grbl 1.1). The tracker mirrors that buffer as a FIFO of in-flight block lengths:
//! a block is pushed when written and popped when its `ok`/`error:N` arrives. Responses
//! arrive in send order, so popping the front is always correct.
//!
//! One byte of the buffer is kept free; the sum of in-flight lengths never exceeds
//! `capacity - 1`.
//!
//! ```text
//! Idle --push--> Streaming --needs_drain--> Draining --push--> Streaming
//!                    |                         |
//!                    +---------stop------------+----> Stopped
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;

/// Receive buffer size of Grbl 1.1
pub const GRBL_RX_BUFFER_SIZE: usize = 128;

/// Streaming discipline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamMode {
    /// Keep the receive buffer as full as possible
    #[default]
    Buffered,
    /// One block in flight at a time (call-response)
    Simple,
}

impl FromStr for StreamMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "buffered" => Ok(StreamMode::Buffered),
            "simple" => Ok(StreamMode::Simple),
            _ => Err(format!("unknown stream mode {s:?} (expected buffered or simple)")),
        }
    }
}

impl fmt::Display for StreamMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamMode::Buffered => write!(f, "buffered"),
            StreamMode::Simple => write!(f, "simple"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    Idle,
    Streaming,
    Draining,
    /// Terminal: nothing more may be sent
    Stopped,
}

/// A block awaiting its response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InFlight {
    /// Send sequence index
    pub seq: u64,
    /// Bytes on the wire including terminator
    pub len: usize,
}

/// Mirror of the controller's receive buffer
#[derive(Debug)]
pub struct BufferTracker {
    capacity: usize,
    mode: StreamMode,
    queue: VecDeque<InFlight>,
    used: usize,
    state: FlowState,
}

impl BufferTracker {
    pub fn new(capacity: usize, mode: StreamMode) -> Self {
        Self {
            capacity,
            mode,
            queue: VecDeque::new(),
            used: 0,
            state: FlowState::Idle,
        }
    }

    pub fn mode(&self) -> StreamMode {
        self.mode
    }

    pub fn state(&self) -> FlowState {
        self.state
    }

    /// Largest number of bytes that may be in flight
    #[inline]
    pub fn limit(&self) -> usize {
        self.capacity.saturating_sub(1)
    }

    /// Whether a block of `len` bytes can ever be sent
    pub fn fits(&self, len: usize) -> bool {
        len <= self.limit()
    }

    /// Bytes currently in flight
    #[inline]
    pub fn used(&self) -> usize {
        self.used
    }

    pub fn in_flight(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Whether a response must be read before sending a block of `len` bytes
    ///
    /// `responses_pending` reports whether controller output is already waiting to be
    /// read; buffered mode drains it first so acknowledgements are never left behind.
    pub fn needs_drain(&mut self, len: usize, responses_pending: bool) -> bool {
        if self.state == FlowState::Stopped {
            return false;
        }
        let drain = match self.mode {
            StreamMode::Buffered => responses_pending || self.used + len >= self.capacity,
            StreamMode::Simple => !self.queue.is_empty(),
        };
        if drain {
            self.state = FlowState::Draining;
        }
        drain
    }

    /// Record a block as written
    pub fn push(&mut self, seq: u64, len: usize) {
        self.queue.push_back(InFlight { seq, len });
        self.used += len;
        self.state = FlowState::Streaming;
        debug_assert!(self.mode == StreamMode::Simple || self.used <= self.limit());
    }

    /// Release the oldest in-flight block (on `ok` or `error:N`)
    ///
    /// Returns `None` for a response nobody was waiting for.
    pub fn pop(&mut self) -> Option<InFlight> {
        let block = self.queue.pop_front()?;
        self.used -= block.len;
        Some(block)
    }

    pub fn stop(&mut self) {
        self.state = FlowState::Stopped;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_buffered_fills_to_limit() {
        let mut tracker = BufferTracker::new(GRBL_RX_BUFFER_SIZE, StreamMode::Buffered);
        assert_eq!(tracker.state(), FlowState::Idle);
        assert_eq!(tracker.limit(), 127);

        // 12 blocks of 10 bytes = 120
        for seq in 0..12 {
            assert!(!tracker.needs_drain(10, false));
            tracker.push(seq, 10);
        }
        assert_eq!(tracker.used(), 120);
        assert!(!tracker.needs_drain(7, false));
        assert!(tracker.needs_drain(8, false));
        assert_eq!(tracker.state(), FlowState::Draining);

        assert_eq!(tracker.pop(), Some(InFlight { seq: 0, len: 10 }));
        assert!(!tracker.needs_drain(8, false));
    }

    #[test]
    fn test_buffered_drains_pending_responses_first() {
        let mut tracker = BufferTracker::new(GRBL_RX_BUFFER_SIZE, StreamMode::Buffered);
        assert!(tracker.needs_drain(5, true));
    }

    #[test]
    fn test_simple_mode_one_block_in_flight() {
        let mut tracker = BufferTracker::new(GRBL_RX_BUFFER_SIZE, StreamMode::Simple);
        assert!(!tracker.needs_drain(5, false));
        tracker.push(1, 5);
        assert!(tracker.needs_drain(5, false));
        tracker.pop();
        assert!(!tracker.needs_drain(5, true));
    }

    #[test]
    fn test_stopped_never_drains() {
        let mut tracker = BufferTracker::new(GRBL_RX_BUFFER_SIZE, StreamMode::Buffered);
        tracker.push(1, 100);
        tracker.stop();
        assert!(!tracker.needs_drain(100, true));
        assert_eq!(tracker.state(), FlowState::Stopped);
    }

    #[test]
    fn test_unexpected_ack() {
        let mut tracker = BufferTracker::new(GRBL_RX_BUFFER_SIZE, StreamMode::Buffered);
        assert_eq!(tracker.pop(), None);
        assert_eq!(tracker.used(), 0);
    }

    #[test]
    fn test_fits() {
        let tracker = BufferTracker::new(GRBL_RX_BUFFER_SIZE, StreamMode::Buffered);
        assert!(tracker.fits(127));
        assert!(!tracker.fits(128));
    }

    #[test]
    fn test_stream_mode_parse() {
        assert_eq!("Simple".parse::<StreamMode>().unwrap(), StreamMode::Simple);
        assert_eq!(StreamMode::default().to_string(), "buffered");
        assert!("fast".parse::<StreamMode>().is_err());
    }

    #[derive(Debug, Clone)]
    enum Step {
        Send(usize),
        Ack,
    }

    fn step() -> impl Strategy<Value = Step> {
        prop_oneof![
            3 => (1usize..=127).prop_map(Step::Send),
            2 => Just(Step::Ack),
        ]
    }

    proptest! {
        /// Sum of in-flight lengths never exceeds capacity - 1 right after a send
        #[test]
        fn prop_capacity_invariant(capacity in 2usize..=256, steps in prop::collection::vec(step(), 1..200)) {
            let mut tracker = BufferTracker::new(capacity, StreamMode::Buffered);
            let mut seq = 0;
            for step in steps {
                match step {
                    Step::Send(len) => {
                        if !tracker.fits(len) {
                            continue;
                        }
                        while tracker.needs_drain(len, false) {
                            prop_assert!(tracker.pop().is_some());
                        }
                        tracker.push(seq, len);
                        seq += 1;
                        prop_assert!(tracker.used() <= capacity - 1);
                    },
                    Step::Ack => {
                        tracker.pop();
                    },
                }
            }
        }

        /// The Nth release corresponds to the Nth block sent
        #[test]
        fn prop_fifo_order(lens in prop::collection::vec(1usize..=40, 1..100)) {
            let mut tracker = BufferTracker::new(GRBL_RX_BUFFER_SIZE, StreamMode::Buffered);
            let mut released = Vec::new();
            for (seq, &len) in lens.iter().enumerate() {
                while tracker.needs_drain(len, false) {
                    released.push(tracker.pop().unwrap());
                }
                tracker.push(seq as u64, len);
            }
            while let Some(block) = tracker.pop() {
                released.push(block);
            }
            let expected: Vec<InFlight> = lens
                .iter()
                .enumerate()
                .map(|(seq, &len)| InFlight { seq: seq as u64, len })
                .collect();
            prop_assert_eq!(released, expected);
        }
    }
}
