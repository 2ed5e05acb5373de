//! Command scheduling with flow control and acknowledgment tracking
//!
//! Implements the GRBL streaming protocol's bookkeeping: a pending FIFO of
//! lines waiting to be written and an in-flight FIFO of lines written but not
//! yet answered. GRBL answers lines strictly in order, so every `ok` or
//! `error:<n>` retires the oldest in-flight line.
//!
//! # Flow control
//! - A line-count threshold (`max_in_flight_lines`) bounds unanswered lines.
//! - An optional byte budget (`rx_buffer_bytes`) additionally bounds the sum
//!   of in-flight line lengths, newline included, against the device's
//!   receive buffer.
//!
//! Both are conservative estimates, not guarantees from the protocol.
//!
//! The scheduler performs no I/O; the writer drains [`CommandScheduler::take_sendable`].

use grblkit_core::{CommandOutcome, ControllerError};
use std::collections::VecDeque;
use tokio::sync::oneshot;

/// Who submitted a line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineOrigin {
    /// A facade operation or `send_command`
    Command,
    /// The job streamer
    Job,
}

/// A line waiting in, or travelling through, the scheduler
#[derive(Debug)]
pub struct QueuedLine {
    /// Text without the trailing newline
    pub text: String,
    /// Submitter
    pub origin: LineOrigin,
    /// Whether the line causes motion
    pub motion: bool,
    ack: Option<oneshot::Sender<CommandOutcome>>,
}

impl QueuedLine {
    /// Create a line nobody waits on
    pub fn new(text: impl Into<String>, origin: LineOrigin, motion: bool) -> Self {
        Self {
            text: text.into(),
            origin,
            motion,
            ack: None,
        }
    }

    /// Attach a waiter, resolved when the line is answered or flushed
    pub fn with_ack(mut self) -> (Self, oneshot::Receiver<CommandOutcome>) {
        let (tx, rx) = oneshot::channel();
        self.ack = Some(tx);
        (self, rx)
    }

    /// Bytes this line occupies in the device receive buffer
    pub fn wire_len(&self) -> usize {
        self.text.len() + 1
    }

    fn resolve(mut self, outcome: CommandOutcome) -> RetiredLine {
        if let Some(ack) = self.ack.take() {
            // The waiter may have timed out and gone away
            let _ = ack.send(outcome);
        }
        RetiredLine {
            text: self.text,
            origin: self.origin,
            outcome,
        }
    }
}

/// A line that left the scheduler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetiredLine {
    /// Text of the line
    pub text: String,
    /// Submitter
    pub origin: LineOrigin,
    /// How it was resolved
    pub outcome: CommandOutcome,
}

/// Configuration for the command scheduler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSchedulerConfig {
    /// Maximum unanswered lines
    pub max_in_flight_lines: usize,
    /// Optional byte budget for unanswered lines
    pub rx_buffer_bytes: Option<usize>,
    /// Maximum number of pending lines
    pub queue_size: usize,
}

impl Default for CommandSchedulerConfig {
    fn default() -> Self {
        Self {
            max_in_flight_lines: 4,
            rx_buffer_bytes: None,
            queue_size: 128,
        }
    }
}

/// Pending and in-flight line queues
#[derive(Debug)]
pub struct CommandScheduler {
    config: CommandSchedulerConfig,
    pending: VecDeque<QueuedLine>,
    in_flight: VecDeque<QueuedLine>,
    in_flight_bytes: usize,
}

impl CommandScheduler {
    /// Create a new scheduler
    pub fn new(config: CommandSchedulerConfig) -> Self {
        Self {
            config,
            pending: VecDeque::new(),
            in_flight: VecDeque::new(),
            in_flight_bytes: 0,
        }
    }

    /// Get the configuration
    pub fn config(&self) -> &CommandSchedulerConfig {
        &self.config
    }

    /// Queue a line for sending
    pub fn enqueue(&mut self, line: QueuedLine) -> Result<(), ControllerError> {
        if self.pending.len() >= self.config.queue_size {
            return Err(ControllerError::BufferOverflow {
                message: format!(
                    "{} lines already pending (queue size {})",
                    self.pending.len(),
                    self.config.queue_size
                ),
            });
        }
        self.pending.push_back(line);
        Ok(())
    }

    /// Check if there is room in the device for a line of this many bytes
    fn has_room(&self, wire_len: usize) -> bool {
        if self.in_flight.len() >= self.config.max_in_flight_lines {
            return false;
        }
        match self.config.rx_buffer_bytes {
            // An oversized line still goes out once nothing else is in flight
            Some(budget) => self.in_flight.is_empty() || self.in_flight_bytes + wire_len <= budget,
            None => true,
        }
    }

    /// Move lines from pending to in-flight while the device has headroom.
    ///
    /// Returns the texts to write, in order. Lines are marked in flight
    /// before they are written so an answer can never outrun its line.
    pub fn take_sendable(&mut self) -> Vec<String> {
        let mut out = Vec::new();
        while let Some(front) = self.pending.front() {
            if !self.has_room(front.wire_len()) {
                break;
            }
            let Some(line) = self.pending.pop_front() else {
                break;
            };
            self.in_flight_bytes += line.wire_len();
            out.push(line.text.clone());
            self.in_flight.push_back(line);
        }
        out
    }

    fn retire(&mut self, outcome: CommandOutcome) -> Option<RetiredLine> {
        let line = self.in_flight.pop_front()?;
        self.in_flight_bytes = self.in_flight_bytes.saturating_sub(line.wire_len());
        Some(line.resolve(outcome))
    }

    /// Handle `ok` from the device
    pub fn acknowledge(&mut self) -> Option<RetiredLine> {
        self.retire(CommandOutcome::Acknowledged)
    }

    /// Handle `error:<n>` from the device
    pub fn reject(&mut self, code: u8) -> Option<RetiredLine> {
        self.retire(CommandOutcome::Rejected(code))
    }

    /// Drop every in-flight line (device reset); waiters see `Flushed`
    pub fn flush_in_flight(&mut self) -> Vec<RetiredLine> {
        self.in_flight_bytes = 0;
        self.in_flight
            .drain(..)
            .map(|line| line.resolve(CommandOutcome::Flushed))
            .collect()
    }

    /// Drop every pending and in-flight line; waiters see `Flushed`
    pub fn flush_all(&mut self) -> Vec<RetiredLine> {
        let mut retired = self.flush_in_flight();
        retired.extend(
            self.pending
                .drain(..)
                .map(|line| line.resolve(CommandOutcome::Flushed)),
        );
        retired
    }

    /// Number of lines waiting to be written
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Number of job lines waiting to be written
    pub fn pending_job_lines(&self) -> usize {
        self.pending
            .iter()
            .filter(|l| l.origin == LineOrigin::Job)
            .count()
    }

    /// Number of unanswered lines
    pub fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }

    /// Bytes of unanswered lines, newlines included
    pub fn in_flight_bytes(&self) -> usize {
        self.in_flight_bytes
    }

    /// Whether both queues are empty
    pub fn is_idle(&self) -> bool {
        self.pending.is_empty() && self.in_flight.is_empty()
    }
}

impl Default for CommandScheduler {
    fn default() -> Self {
        Self::new(CommandSchedulerConfig::default())
    }
}
