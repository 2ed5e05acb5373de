//! Job bookkeeping shared between the streamer and event consumers

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Lifecycle phase of a streamed program
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobPhase {
    /// No job has been started
    Idle,
    /// Lines are being fed to the scheduler
    Streaming,
    /// Feed hold issued; queued lines still drain
    Paused,
    /// Every line was resolved by the device
    Complete,
    /// Aborted by the caller
    Stopped,
}

impl JobPhase {
    /// Whether the job still occupies the controller
    pub fn is_active(&self) -> bool {
        matches!(self, JobPhase::Streaming | JobPhase::Paused)
    }

    /// Whether no further transition is possible
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobPhase::Complete | JobPhase::Stopped)
    }
}

impl fmt::Display for JobPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobPhase::Idle => "Idle",
            JobPhase::Streaming => "Streaming",
            JobPhase::Paused => "Paused",
            JobPhase::Complete => "Complete",
            JobPhase::Stopped => "Stopped",
        };
        f.write_str(name)
    }
}

/// Progress and outcome of one job
///
/// A summary outlives the job it describes so that completion and stop events
/// can be persisted by a collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSummary {
    /// Unique job identifier
    pub id: Uuid,
    /// Lines in the submitted program, including blanks and comments
    pub total_lines: usize,
    /// Lines that will actually be transmitted
    pub sendable_lines: usize,
    /// Lines handed to the command scheduler so far
    pub queued: usize,
    /// Lines acknowledged or rejected by the device
    pub resolved: usize,
    /// Lines rejected with `error:<n>`
    pub rejected: usize,
    /// When streaming started
    pub started_at: DateTime<Utc>,
    /// When the job reached a terminal phase
    pub finished_at: Option<DateTime<Utc>>,
    /// Current phase
    pub phase: JobPhase,
}

impl JobSummary {
    /// Summary for a job that is about to start streaming
    pub fn new(total_lines: usize, sendable_lines: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            total_lines,
            sendable_lines,
            queued: 0,
            resolved: 0,
            rejected: 0,
            started_at: Utc::now(),
            finished_at: None,
            phase: JobPhase::Streaming,
        }
    }

    /// Fraction of sendable lines resolved, in `0.0..=1.0`
    pub fn progress(&self) -> f64 {
        if self.sendable_lines == 0 {
            return 1.0;
        }
        self.resolved as f64 / self.sendable_lines as f64
    }

    /// Time spent streaming, up to now or until the job finished
    pub fn elapsed(&self) -> chrono::Duration {
        self.finished_at.unwrap_or_else(Utc::now) - self.started_at
    }

    /// Move into a terminal phase and stamp the finish time
    pub fn finish(&mut self, phase: JobPhase) {
        self.phase = phase;
        self.finished_at = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_progress() {
        let mut summary = JobSummary::new(5, 4);
        assert_eq!(summary.phase, JobPhase::Streaming);
        assert!(summary.phase.is_active());
        summary.resolved = 2;
        assert!((summary.progress() - 0.5).abs() < f64::EPSILON);

        summary.finish(JobPhase::Complete);
        assert!(summary.phase.is_terminal());
        assert!(summary.finished_at.is_some());
        assert!(summary.elapsed() >= chrono::Duration::zero());
    }

    #[test]
    fn test_summary_serializes() {
        let summary = JobSummary::new(3, 3);
        let json = serde_json::to_string(&summary).unwrap();
        let back: JobSummary = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, summary.id);
        assert_eq!(back.phase, JobPhase::Streaming);
    }
}
