//! Jobs: one launched command line each.

use std::fmt;

use nix::sys::signal::Signal;
use nix::unistd::Pid;

use crate::command::{ExitCode, SIGNAL_STATUS_BASE};

/// User-visible job number, the `N` in `[N]` and `%N`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct JobId(pub usize);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for JobId {
    type Err = std::num::ParseIntError;

    /// Accepts both `3` and `%3`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.strip_prefix('%').unwrap_or(s);
        digits.parse().map(JobId)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Running,
    Stopped,
    Done(ExitCode),
    Signaled(Signal),
}

impl JobState {
    /// `Done` and `Signaled` are final.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Done(_) | JobState::Signaled(_))
    }

    pub fn word(&self) -> &'static str {
        match self {
            JobState::Running => "Running",
            JobState::Stopped => "Stopped",
            JobState::Done(_) | JobState::Signaled(_) => "Done",
        }
    }

    /// Exit status for a terminal state.
    pub fn exit_code(&self) -> Option<ExitCode> {
        match self {
            JobState::Done(code) => Some(*code),
            JobState::Signaled(sig) => Some(SIGNAL_STATUS_BASE + *sig as i32),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    /// Process group of the job; equal to the pid of its only process.
    pub pgid: Pid,
    pub command_text: String,
    pub state: JobState,
    pub is_background: bool,
    /// The latest transition has already been shown to the user.
    pub notified: bool,
    /// Launch order, used to pick the current job for `fg`/`bg` without arguments.
    pub(crate) seq: u64,
}

impl Job {
    pub fn new(pgid: Pid, command_text: impl Into<String>, is_background: bool) -> Self {
        Self {
            id: JobId(0),
            pgid,
            command_text: command_text.into(),
            state: JobState::Running,
            is_background,
            notified: true,
            seq: 0,
        }
    }

    /// Still owns OS resources: running or stopped.
    pub fn is_live(&self) -> bool {
        !self.state.is_terminal()
    }

    /// Terminal and reported, so the entry may be dropped.
    pub fn is_reapable(&self) -> bool {
        self.state.is_terminal() && self.notified
    }

    /// Command text as `jobs` shows it, with `&` for background jobs.
    pub fn display_command(&self) -> String {
        if self.is_background {
            format!("{} &", self.command_text)
        } else {
            self.command_text.clone()
        }
    }

    /// `[1]  Running   sleep 10 &`
    pub fn status_line(&self) -> String {
        format!(
            "[{}]  {:<8}  {}",
            self.id,
            self.state.word(),
            self.display_command()
        )
    }

    /// `[1]+  Done    sleep 10`
    pub fn done_notice(&self) -> String {
        format!("[{}]+  Done    {}", self.id, self.command_text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(state: JobState, background: bool) -> Job {
        let mut job = Job::new(Pid::from_raw(4242), "sleep 10", background);
        job.id = JobId(1);
        job.state = state;
        job
    }

    #[test]
    fn status_lines() {
        assert_eq!(
            job(JobState::Running, true).status_line(),
            "[1]  Running   sleep 10 &"
        );
        assert_eq!(
            job(JobState::Stopped, false).status_line(),
            "[1]  Stopped   sleep 10"
        );
        assert_eq!(
            job(JobState::Done(0), true).status_line(),
            "[1]  Done      sleep 10 &"
        );
    }

    #[test]
    fn done_notice_has_no_ampersand() {
        assert_eq!(
            job(JobState::Done(0), true).done_notice(),
            "[1]+  Done    sleep 10"
        );
    }

    #[test]
    fn terminal_states_and_codes() {
        assert!(!JobState::Running.is_terminal());
        assert!(!JobState::Stopped.is_terminal());
        assert!(JobState::Done(3).is_terminal());
        assert_eq!(JobState::Done(3).exit_code(), Some(3));
        assert_eq!(JobState::Signaled(Signal::SIGTERM).exit_code(), Some(143));
        assert_eq!(JobState::Stopped.exit_code(), None);
    }

    #[test]
    fn reapable_only_after_report() {
        let mut j = job(JobState::Done(0), true);
        j.notified = false;
        assert!(!j.is_reapable());
        j.notified = true;
        assert!(j.is_reapable());
        assert!(!job(JobState::Stopped, false).is_reapable());
    }

    #[test]
    fn job_id_parses_percent_form() {
        assert_eq!("3".parse::<JobId>(), Ok(JobId(3)));
        assert_eq!("%12".parse::<JobId>(), Ok(JobId(12)));
        assert!("%x".parse::<JobId>().is_err());
    }
}
