//! Program streaming
//!
//! A [`JobStreamer`] holds the immutable program and a cursor. The writer
//! context asks it to top up the scheduler; the decoder reports every
//! resolved job line back to it. Only the decoder moves a job to `Complete`.

use grblkit_core::{JobPhase, JobSummary};

use super::utils;
use crate::communication::{CommandScheduler, LineOrigin, QueuedLine};

/// Whether a program line is transmitted: something is left once comments
/// are removed
pub fn is_sendable(line: &str) -> bool {
    !utils::strip_comments(line).is_empty()
}

/// One active job
#[derive(Debug)]
pub struct JobStreamer {
    lines: Vec<String>,
    cursor: usize,
    summary: JobSummary,
}

impl JobStreamer {
    /// Start a job; `None` if the program has nothing to send
    pub fn new(lines: Vec<String>) -> Option<Self> {
        let sendable = lines.iter().filter(|l| is_sendable(l)).count();
        if sendable == 0 {
            return None;
        }
        let mut job = Self {
            summary: JobSummary::new(lines.len(), sendable),
            lines,
            cursor: 0,
        };
        job.skip_unsendable();
        Some(job)
    }

    fn skip_unsendable(&mut self) {
        while self
            .lines
            .get(self.cursor)
            .is_some_and(|line| !is_sendable(line))
        {
            self.cursor += 1;
        }
    }

    /// Current phase
    pub fn phase(&self) -> JobPhase {
        self.summary.phase
    }

    /// Progress so far
    pub fn summary(&self) -> &JobSummary {
        &self.summary
    }

    /// Index of the next line to send
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Whether every sendable line has been handed to the scheduler
    pub fn all_queued(&self) -> bool {
        self.cursor >= self.lines.len()
    }

    /// Whether the device has answered every sendable line
    pub fn all_resolved(&self) -> bool {
        self.all_queued() && self.summary.resolved >= self.summary.sendable_lines
    }

    /// Hand lines to the scheduler while streaming, keeping at most
    /// `max_pending` job lines waiting. Returns how many were queued.
    pub fn feed(&mut self, scheduler: &mut CommandScheduler, max_pending: usize) -> usize {
        let mut queued = 0;
        while self.summary.phase == JobPhase::Streaming
            && !self.all_queued()
            && scheduler.pending_job_lines() < max_pending
        {
            let text = self.lines[self.cursor].trim().to_string();
            if let Err(e) = scheduler.enqueue(QueuedLine::new(text, LineOrigin::Job, true)) {
                tracing::debug!("Job feed paused: {}", e);
                break;
            }
            self.cursor += 1;
            self.summary.queued += 1;
            queued += 1;
            self.skip_unsendable();
        }
        queued
    }

    /// Account for one job line answered by the device
    pub fn line_resolved(&mut self, rejected: bool) {
        self.summary.resolved += 1;
        if rejected {
            self.summary.rejected += 1;
        }
    }

    /// `Streaming → Paused`
    pub fn pause(&mut self) -> bool {
        if self.summary.phase != JobPhase::Streaming {
            return false;
        }
        self.summary.phase = JobPhase::Paused;
        true
    }

    /// `Paused → Streaming`
    pub fn resume(&mut self) -> bool {
        if self.summary.phase != JobPhase::Paused {
            return false;
        }
        self.summary.phase = JobPhase::Streaming;
        true
    }

    /// Move to `Complete` if streaming and every line is resolved.
    ///
    /// While paused, completion is deferred until the job resumes.
    pub fn try_complete(&mut self) -> Option<JobSummary> {
        if self.summary.phase != JobPhase::Streaming || !self.all_resolved() {
            return None;
        }
        self.summary.finish(JobPhase::Complete);
        Some(self.summary.clone())
    }

    /// Abort; returns the final summary
    pub fn stop(mut self) -> JobSummary {
        self.summary.finish(JobPhase::Stopped);
        self.summary
    }
}
