//! Job status symbols and the numeric codec used by the scheduler.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::{CondorError, Result};

/// Symbolic state of a job, as reported by the scheduler.
///
/// The numeric codes follow the scheduler's `JobStatus` attribute. `Various`
/// is never reported by the scheduler itself; it is the aggregate state of a
/// multi-instance job whose instances disagree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobStatus {
    Unexpanded,
    Idle,
    Running,
    Removed,
    Completed,
    Held,
    SubmissionErr,
    Various,
}

impl JobStatus {
    /// Map a scheduler status code to its symbolic state.
    pub fn from_code(code: i32) -> Result<Self> {
        match code {
            0 => Ok(JobStatus::Unexpanded),
            1 => Ok(JobStatus::Idle),
            2 => Ok(JobStatus::Running),
            3 => Ok(JobStatus::Removed),
            4 => Ok(JobStatus::Completed),
            5 => Ok(JobStatus::Held),
            6 => Ok(JobStatus::SubmissionErr),
            _ => Err(CondorError::UnknownStatusCode(code)),
        }
    }

    /// The scheduler code for this state, or `None` for the synthetic
    /// `Various` aggregate.
    pub fn code(&self) -> Option<i32> {
        match self {
            JobStatus::Unexpanded => Some(0),
            JobStatus::Idle => Some(1),
            JobStatus::Running => Some(2),
            JobStatus::Removed => Some(3),
            JobStatus::Completed => Some(4),
            JobStatus::Held => Some(5),
            JobStatus::SubmissionErr => Some(6),
            JobStatus::Various => None,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobStatus::Unexpanded => "Unexpanded",
            JobStatus::Idle => "Idle",
            JobStatus::Running => "Running",
            JobStatus::Removed => "Removed",
            JobStatus::Completed => "Completed",
            JobStatus::Held => "Held",
            JobStatus::SubmissionErr => "Submission_err",
            JobStatus::Various => "Various",
        };
        write!(f, "{}", name)
    }
}

/// Per-state counts for the nodes of a workflow.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusTally {
    pub unexpanded: usize,
    pub idle: usize,
    pub running: usize,
    pub removed: usize,
    pub completed: usize,
    pub held: usize,
    pub submission_err: usize,
    pub various: usize,
}

impl StatusTally {
    pub fn record(&mut self, status: JobStatus) {
        match status {
            JobStatus::Unexpanded => self.unexpanded += 1,
            JobStatus::Idle => self.idle += 1,
            JobStatus::Running => self.running += 1,
            JobStatus::Removed => self.removed += 1,
            JobStatus::Completed => self.completed += 1,
            JobStatus::Held => self.held += 1,
            JobStatus::SubmissionErr => self.submission_err += 1,
            JobStatus::Various => self.various += 1,
        }
    }

    pub fn get(&self, status: JobStatus) -> usize {
        match status {
            JobStatus::Unexpanded => self.unexpanded,
            JobStatus::Idle => self.idle,
            JobStatus::Running => self.running,
            JobStatus::Removed => self.removed,
            JobStatus::Completed => self.completed,
            JobStatus::Held => self.held,
            JobStatus::SubmissionErr => self.submission_err,
            JobStatus::Various => self.various,
        }
    }

    /// Total number of recorded nodes.
    pub fn total(&self) -> usize {
        self.unexpanded
            + self.idle
            + self.running
            + self.removed
            + self.completed
            + self.held
            + self.submission_err
            + self.various
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_round_trip() {
        for code in 0..=6 {
            let status = JobStatus::from_code(code).unwrap();
            assert_eq!(status.code(), Some(code));
        }
    }

    #[test]
    fn test_unknown_code() {
        assert!(matches!(
            JobStatus::from_code(7),
            Err(CondorError::UnknownStatusCode(7))
        ));
        assert!(JobStatus::from_code(-1).is_err());
    }

    #[test]
    fn test_various_has_no_code() {
        assert_eq!(JobStatus::Various.code(), None);
    }

    #[test]
    fn test_display_matches_scheduler_spelling() {
        assert_eq!(JobStatus::SubmissionErr.to_string(), "Submission_err");
        assert_eq!(JobStatus::Idle.to_string(), "Idle");
    }

    #[test]
    fn test_tally() {
        let mut tally = StatusTally::default();
        tally.record(JobStatus::Completed);
        tally.record(JobStatus::Completed);
        tally.record(JobStatus::Idle);

        assert_eq!(tally.get(JobStatus::Completed), 2);
        assert_eq!(tally.get(JobStatus::Idle), 1);
        assert_eq!(tally.get(JobStatus::Running), 0);
        assert_eq!(tally.total(), 3);
    }
}
