//! Scripted in-memory controller
//!
//! Behaves enough like Grbl 1.1 to exercise the streaming engine without hardware:
//!
//! - every `\n`-terminated block enters a simulated receive buffer and is acknowledged
//!   (`ok`, or whatever the line responder returns) once it has "executed"
//! - `?` queues a status report built from the current state and position
//! - soft reset (0x18) empties the buffer and queues the start-up banner
//! - other realtime bytes are only recorded
//!
//! The peak receive-buffer occupancy is tracked so tests can check the host never
//! overflows the device.

use crate::{RxAdapter, SerialAdapter, SerialError, SplittableAdapter, TxAdapter};
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

pub const BANNER: &str = "Grbl 1.1h ['$' for help]";

type LineResponder = Box<dyn FnMut(&str) -> String + Send>;

struct Block {
    len: usize,
    reply: String,
    queued_at: Instant,
}

struct MockState {
    incoming: VecDeque<String>,
    executing: VecDeque<Block>,
    written: Vec<Vec<u8>>,
    responder: LineResponder,
    execution_time: Duration,
    read_timeout: Duration,
    machine_state: String,
    position: (f64, f64),
    peak_occupancy: usize,
    disconnected: bool,
}

impl MockState {
    fn occupancy(&self) -> usize {
        self.executing.iter().map(|b| b.len).sum()
    }

    fn status_line(&self) -> String {
        format!(
            "<{}|WPos:{:.3},{:.3},0.000|FS:0,0>",
            self.machine_state, self.position.0, self.position.1
        )
    }

    fn accept(&mut self, bytes: &[u8]) {
        self.written.push(bytes.to_vec());

        if bytes.last() == Some(&b'\n') {
            let text = String::from_utf8_lossy(bytes).trim().to_string();
            if text.is_empty() {
                return;
            }
            let reply = (self.responder)(&text);
            self.executing.push_back(Block {
                len: bytes.len(),
                reply,
                queued_at: Instant::now(),
            });
            self.peak_occupancy = self.peak_occupancy.max(self.occupancy());
            return;
        }

        for &byte in bytes {
            match byte {
                b'?' => {
                    let line = self.status_line();
                    self.incoming.push_back(line);
                },
                0x18 => {
                    self.executing.clear();
                    self.incoming.push_back(BANNER.to_string());
                },
                _ => {},
            }
        }
    }

    fn next_line(&mut self) -> Option<String> {
        if let Some(line) = self.incoming.pop_front() {
            return Some(line);
        }
        let ready = self
            .executing
            .front()
            .is_some_and(|b| b.queued_at.elapsed() >= self.execution_time);
        if ready {
            return self.executing.pop_front().map(|b| b.reply);
        }
        None
    }
}

struct Shared {
    state: Mutex<MockState>,
    ready: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self, bytes: &[u8]) -> Result<(), SerialError> {
        let mut state = self.lock();
        if state.disconnected {
            return Err(SerialError::Disconnected);
        }
        state.accept(bytes);
        drop(state);
        self.ready.notify_all();
        Ok(())
    }

    fn read_line(&self) -> Result<String, SerialError> {
        let mut state = self.lock();
        let deadline = Instant::now() + state.read_timeout;
        loop {
            if state.disconnected {
                return Err(SerialError::Disconnected);
            }
            if let Some(line) = state.next_line() {
                return Ok(line);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(SerialError::Timeout);
            }
            let mut wait = deadline - now;
            if !state.executing.is_empty() {
                wait = wait.min(Duration::from_millis(1));
            }
            state = self
                .ready
                .wait_timeout(state, wait)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}

/// In-memory Grbl stand-in implementing the adapter traits
pub struct MockController {
    shared: Arc<Shared>,
}

/// Inspection and scripting handle, usable after the controller was moved into a link
#[derive(Clone)]
pub struct MockHandle {
    shared: Arc<Shared>,
}

impl MockController {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(MockState {
                    incoming: VecDeque::new(),
                    executing: VecDeque::new(),
                    written: Vec::new(),
                    responder: Box::new(|_| "ok".to_string()),
                    execution_time: Duration::ZERO,
                    read_timeout: Duration::from_millis(20),
                    machine_state: "Idle".to_string(),
                    position: (0.0, 0.0),
                    peak_occupancy: 0,
                    disconnected: false,
                }),
                ready: Condvar::new(),
            }),
        }
    }

    /// Reply for each block (default: always `ok`)
    pub fn with_responder(self, responder: impl FnMut(&str) -> String + Send + 'static) -> Self {
        self.shared.lock().responder = Box::new(responder);
        self
    }

    /// Minimum time a block stays in the receive buffer before it is acknowledged
    pub fn with_execution_time(self, execution_time: Duration) -> Self {
        self.shared.lock().execution_time = execution_time;
        self
    }

    pub fn handle(&self) -> MockHandle {
        MockHandle {
            shared: self.shared.clone(),
        }
    }
}

impl Default for MockController {
    fn default() -> Self {
        Self::new()
    }
}

impl MockHandle {
    /// Every write, in order
    pub fn written(&self) -> Vec<Vec<u8>> {
        self.shared.lock().written.clone()
    }

    /// Non-empty blocks written, without terminator
    pub fn written_lines(&self) -> Vec<String> {
        self.written()
            .iter()
            .filter(|w| w.last() == Some(&b'\n'))
            .map(|w| String::from_utf8_lossy(w).trim().to_string())
            .filter(|l| !l.is_empty())
            .collect()
    }

    /// Realtime bytes written, in order (status requests included)
    pub fn realtime_bytes(&self) -> Vec<u8> {
        self.written()
            .iter()
            .filter(|w| w.last() != Some(&b'\n'))
            .flatten()
            .copied()
            .collect()
    }

    /// Queue an asynchronous device message
    pub fn push_line(&self, line: impl Into<String>) {
        self.shared.lock().incoming.push_back(line.into());
        self.shared.ready.notify_all();
    }

    pub fn set_machine_state(&self, state: &str) {
        self.shared.lock().machine_state = state.to_string();
    }

    pub fn set_position(&self, x: f64, y: f64) {
        self.shared.lock().position = (x, y);
    }

    /// Highest number of bytes ever held in the simulated receive buffer
    pub fn peak_occupancy(&self) -> usize {
        self.shared.lock().peak_occupancy
    }

    pub fn disconnect(&self) {
        self.shared.lock().disconnected = true;
        self.shared.ready.notify_all();
    }
}

impl SerialAdapter for MockController {
    fn write(&mut self, bytes: &[u8]) -> Result<(), SerialError> {
        self.shared.write(bytes)
    }

    fn read_line(&mut self) -> Result<String, SerialError> {
        self.shared.read_line()
    }

    fn bytes_waiting(&mut self) -> Result<usize, SerialError> {
        let state = self.shared.lock();
        Ok(state.incoming.iter().map(|l| l.len() + 1).sum())
    }

    fn clear_input(&mut self) -> Result<(), SerialError> {
        self.shared.lock().incoming.clear();
        Ok(())
    }

    fn set_read_timeout(&mut self, timeout: Duration) -> Result<(), SerialError> {
        self.shared.lock().read_timeout = timeout;
        Ok(())
    }
}

impl SplittableAdapter for MockController {
    type RxAdapter = MockRx;
    type TxAdapter = MockTx;

    fn split(self) -> Result<(Self::RxAdapter, Self::TxAdapter), SerialError> {
        Ok((
            MockRx {
                shared: self.shared.clone(),
            },
            MockTx {
                shared: self.shared,
            },
        ))
    }
}

pub struct MockRx {
    shared: Arc<Shared>,
}

impl RxAdapter for MockRx {
    fn read_line(&mut self) -> Result<String, SerialError> {
        self.shared.read_line()
    }
}

pub struct MockTx {
    shared: Arc<Shared>,
}

impl TxAdapter for MockTx {
    fn write(&mut self, bytes: &[u8]) -> Result<(), SerialError> {
        self.shared.write(bytes)
    }
}
