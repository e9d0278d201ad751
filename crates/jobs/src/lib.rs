use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;
use uuid::Uuid;

mod context;
mod log;
mod queue;
mod runner;
mod supervisor;

pub use context::{AppContext, ConvertError};
pub use log::ConversionLog;
pub use queue::{ConversionQueue, QueueError};
pub use runner::Runner;
pub use supervisor::{unique_destination, JobOutcome, Supervisor, SupervisorEvent};

pub const STATUS_WAITING: &str = "Waiting...";
pub const STATUS_STARTING: &str = "Starting conversion...";
pub const STATUS_CONVERTING: &str = "Converting...";
pub const STATUS_COMPLETED: &str = "Completed";
pub const STATUS_ERROR: &str = "Error";

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("ffmpeg is not available, conversion failed")]
    ToolUnavailable,
    #[error("no output extension given")]
    MissingExtension,
    #[error("source has no file name: {0}")]
    InvalidSource(PathBuf),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed(String),
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed(_))
    }
}

/// What a runner reports about its job.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressKind {
    DurationDiscovered(f64),
    TimeAdvanced { seconds: f64, percent: u8 },
    StatusChanged(String),
    Completed { source: PathBuf, destination: PathBuf },
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProgressEvent {
    pub job_id: JobId,
    pub kind: ProgressKind,
}

/// One source to destination conversion and where it currently stands.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub source: PathBuf,
    pub destination: PathBuf,
    pub status: JobStatus,
    pub progress: u8,
    pub duration: Option<f64>,
}

impl Job {
    pub fn new(source: PathBuf, destination: PathBuf) -> Self {
        Self {
            id: JobId::new(),
            source,
            destination,
            status: JobStatus::Pending,
            progress: 0,
            duration: None,
        }
    }

    /// Fold a runner event into the job. Returns the new percent when the
    /// visible progress changed.
    ///
    /// Progress never goes backwards and stays at or below 99 until the job
    /// completes.
    pub fn apply(&mut self, kind: &ProgressKind) -> Option<u8> {
        if self.status.is_terminal() {
            return None;
        }
        match kind {
            ProgressKind::DurationDiscovered(secs) => {
                self.duration = Some(*secs);
                None
            }
            ProgressKind::TimeAdvanced { percent, .. } => {
                self.status = JobStatus::Running;
                let next = (*percent).min(99).max(self.progress);
                if next != self.progress {
                    self.progress = next;
                    Some(next)
                } else {
                    None
                }
            }
            ProgressKind::StatusChanged(_) => {
                if self.status == JobStatus::Pending {
                    self.status = JobStatus::Running;
                }
                None
            }
            ProgressKind::Completed { .. } => {
                self.status = JobStatus::Completed;
                self.progress = 100;
                Some(100)
            }
            ProgressKind::Failed(reason) => {
                self.status = JobStatus::Failed(reason.clone());
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn advanced(percent: u8) -> ProgressKind {
        ProgressKind::TimeAdvanced {
            seconds: percent as f64,
            percent,
        }
    }

    #[test]
    fn test_progress_is_monotonic() {
        let mut job = Job::new("a.mp4".into(), "a.mkv".into());
        assert_eq!(job.apply(&advanced(10)), Some(10));
        assert_eq!(job.apply(&advanced(5)), None);
        assert_eq!(job.progress, 10);
        assert_eq!(job.apply(&advanced(10)), None);
        assert_eq!(job.apply(&advanced(40)), Some(40));
        assert_eq!(job.status, JobStatus::Running);
    }

    #[test]
    fn test_progress_clamped_until_completed() {
        let mut job = Job::new("a.mp4".into(), "a.mkv".into());
        assert_eq!(job.apply(&advanced(100)), Some(99));
        let done = ProgressKind::Completed {
            source: "a.mp4".into(),
            destination: "a.mkv".into(),
        };
        assert_eq!(job.apply(&done), Some(100));
        assert_eq!(job.status, JobStatus::Completed);
        // nothing moves a finished job
        assert_eq!(job.apply(&ProgressKind::Failed("late".into())), None);
        assert_eq!(job.status, JobStatus::Completed);
    }

    #[test]
    fn test_duration_and_failure() {
        let mut job = Job::new("a.mp4".into(), "a.mkv".into());
        job.apply(&ProgressKind::DurationDiscovered(120.0));
        assert_eq!(job.duration, Some(120.0));
        assert_eq!(job.status, JobStatus::Pending);
        job.apply(&ProgressKind::StatusChanged(STATUS_STARTING.into()));
        assert_eq!(job.status, JobStatus::Running);
        job.apply(&ProgressKind::Failed("exit code 1".into()));
        assert_eq!(job.status, JobStatus::Failed("exit code 1".into()));
        assert!(job.status.is_terminal());
        assert_eq!(job.progress, 0);
    }
}
