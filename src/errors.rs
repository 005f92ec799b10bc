//! Error types for job and workflow operations.

use thiserror::Error;

/// Errors produced while building, submitting, or querying jobs and workflows.
#[derive(Debug, Error)]
pub enum CondorError {
    /// Submission was attempted without an `executable` attribute set.
    #[error("cannot submit a job without an executable")]
    NoExecutable,

    /// A node was found in its own set of ancestors or descendants.
    #[error("node '{node}' contains itself in its list of dependencies")]
    CircularDependency { node: String },

    /// The scheduler reported a non-benign error, or a status query matched
    /// no job.
    #[error("scheduler error: {0}")]
    Scheduler(String),

    /// An absolute initial directory was configured together with a remote
    /// execution target. Remote initial directories must be relative to the
    /// session's scratch root.
    #[error("cannot use absolute initial directory '{path}' with a remote scheduler")]
    RemoteConfiguration { path: String },

    /// A `$(name)` reference chain refers back to an attribute that is
    /// already being resolved.
    #[error("macro reference cycle detected while resolving attribute '{0}'")]
    MacroCycle(String),

    /// The scheduler reported a status code outside the known table.
    #[error("unknown scheduler status code {0}")]
    UnknownStatusCode(i32),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CondorError>;
