//! Error taxonomy of the job control engine.

use std::io;
use std::path::PathBuf;

use nix::errno::Errno;
use thiserror::Error;

use crate::command::{EXEC_FAILED_STATUS, ExitCode, NOT_FOUND_STATUS};
use crate::job::JobId;

#[derive(Error, Debug)]
pub enum JobError {
    #[error("{0}: command not found")]
    ProgramNotFound(String),

    #[error("fork failed: {0}")]
    ForkFailed(#[source] io::Error),

    #[error("{program}: cannot execute: {source}")]
    ExecFailed {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("{}: {source}", path.display())]
    Redirection {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{0}: no such job")]
    NoSuchJob(String),

    #[error("({0}) - no such process")]
    NoSuchProcess(i32),

    #[error("({0}) - operation not permitted")]
    PermissionDenied(i32),

    #[error("job {0} already in background")]
    JobNotStopped(JobId),

    #[error("no current job")]
    NoCurrentJob,

    #[error("terminal control failed: {0}")]
    Terminal(#[source] Errno),

    #[error("signal setup failed: {0}")]
    Signal(#[source] Errno),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl JobError {
    /// Status reported to the caller for a command that failed with this error.
    pub fn exit_code(&self) -> ExitCode {
        match self {
            JobError::ProgramNotFound(_) => NOT_FOUND_STATUS,
            JobError::ExecFailed { .. } | JobError::PermissionDenied(_) => EXEC_FAILED_STATUS,
            _ => 1,
        }
    }

    /// Whether the failure is only worth a warning (the command was a no-op).
    pub fn is_warning(&self) -> bool {
        matches!(self, JobError::JobNotStopped(_))
    }
}

pub type Result<T> = std::result::Result<T, JobError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_follow_shell_conventions() {
        assert_eq!(JobError::ProgramNotFound("nope".into()).exit_code(), 127);
        let exec = JobError::ExecFailed {
            program: "/tmp/x".into(),
            source: io::Error::from(io::ErrorKind::PermissionDenied),
        };
        assert_eq!(exec.exit_code(), 126);
        assert_eq!(JobError::NoSuchJob("%3".into()).exit_code(), 1);
    }

    #[test]
    fn only_job_not_stopped_is_a_warning() {
        assert!(JobError::JobNotStopped(JobId(1)).is_warning());
        assert!(!JobError::NoSuchProcess(42).is_warning());
        assert_eq!(JobError::NoSuchJob("%3".into()).to_string(), "%3: no such job");
    }
}
