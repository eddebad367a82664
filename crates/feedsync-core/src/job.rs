//! Job types for scheduled pipeline work.
//!
//! The sync-status poller is a recurring job bound to one feed configuration.
//! Its lifecycle:
//! ```text
//! SCHEDULED --(first firing)--> POLLING --(generation changed)--> DONE
//!                                  |  ^
//!                                  +--+ (unchanged / first observation: +15 min)
//! ```
//!
//! A job in DONE is inactive and removed by the scheduler on exit.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

/// Prefix of sync-status poller job codes.
pub const SYNC_STATUS_JOB_PREFIX: &str = "sync-status-";

// =============================================================================
// Job State
// =============================================================================

/// Poller state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// Created by the strategy, not fired yet.
    Scheduled,
    /// Fired at least once and waiting for a generation change.
    Polling,
    /// Observed the remote swap. Terminal.
    Done,
}

impl JobState {
    /// Returns the string representation for database storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Scheduled => "scheduled",
            JobState::Polling => "polling",
            JobState::Done => "done",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Done)
    }
}

/// Error type for parsing JobState from string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseJobStateError(String);

impl std::fmt::Display for ParseJobStateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid job state: {}", self.0)
    }
}

impl std::error::Error for ParseJobStateError {}

impl std::str::FromStr for JobState {
    type Err = ParseJobStateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(JobState::Scheduled),
            "polling" => Ok(JobState::Polling),
            "done" => Ok(JobState::Done),
            _ => Err(ParseJobStateError(s.to_string())),
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Trigger
// =============================================================================

/// Activation record causing a job to fire at a future time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trigger {
    pub activation_time: DateTime<Utc>,
    pub active: bool,
}

impl Trigger {
    /// An active trigger firing at `activation_time`.
    pub fn at(activation_time: DateTime<Utc>) -> Self {
        Self {
            activation_time,
            active: true,
        }
    }

    /// Returns true if the trigger should fire at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.active && self.activation_time <= now
    }
}

// =============================================================================
// Poller Job
// =============================================================================

/// A sync-status poller job bound to one feed configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollerJob {
    /// Unique job code.
    pub code: String,
    /// Name of the polled [`IndexRunConfig`](crate::models::IndexRunConfig).
    pub config_name: String,
    pub state: JobState,
    pub active: bool,
    /// Delete the job after its final firing.
    pub remove_on_exit: bool,
    /// The single trigger of this job.
    pub trigger: Option<Trigger>,
}

impl PollerJob {
    /// Creates a scheduled job whose first firing is `first_delay` from `now`.
    pub fn scheduled(config_name: impl Into<String>, now: DateTime<Utc>, first_delay: TimeDelta) -> Self {
        Self {
            code: format!("{}{}", SYNC_STATUS_JOB_PREFIX, now.timestamp_millis()),
            config_name: config_name.into(),
            state: JobState::Scheduled,
            active: true,
            remove_on_exit: false,
            trigger: Some(Trigger::at(now + first_delay)),
        }
    }

    /// Returns true if the job should fire at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.active && self.trigger.as_ref().is_some_and(|t| t.is_due(now))
    }

    /// Reuses the existing trigger (or creates one) and moves it to `activation_time`.
    pub fn reschedule(&mut self, activation_time: DateTime<Utc>) {
        let trigger = self.trigger.get_or_insert_with(|| Trigger::at(activation_time));
        trigger.activation_time = activation_time;
        trigger.active = true;
        self.state = JobState::Polling;
    }

    /// Terminal transition: inactive and removed on exit.
    pub fn finish(&mut self) {
        self.state = JobState::Done;
        self.active = false;
        self.remove_on_exit = true;
    }
}

// =============================================================================
// Perform Result
// =============================================================================

/// Outcome flag of a job firing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobResult {
    Success,
    Failure,
    /// The job will fire again; no verdict yet.
    Unknown,
}

/// Status of the job after a firing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Finished,
    Aborted,
    Running,
}

/// Result reported by a job firing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PerformResult {
    pub result: JobResult,
    pub status: JobStatus,
}

impl PerformResult {
    pub const SUCCESS: PerformResult = PerformResult {
        result: JobResult::Success,
        status: JobStatus::Finished,
    };
    pub const FAILURE: PerformResult = PerformResult {
        result: JobResult::Failure,
        status: JobStatus::Aborted,
    };
    pub const RESCHEDULED: PerformResult = PerformResult {
        result: JobResult::Unknown,
        status: JobStatus::Running,
    };
}
