//! Orchestration of jobs: launching, waiting, `fg`, `bg`, `kill` and reporting.
//!
//! All state changes flow through here on the shell's thread. Child facts
//! recorded by the [`SignalBridge`] are applied only at two kinds of safe
//! points: inside a foreground wait, and when the command loop asks for
//! pending notices before drawing the prompt.

use std::str::FromStr;

use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tracing::{debug, info, trace, warn};

use crate::command::{CommandDescriptor, ExitCode, SIGNAL_STATUS_BASE};
use crate::env::Environment;
use crate::errors::{JobError, Result};
use crate::job::{Job, JobId, JobState};
use crate::job_table::JobTable;
use crate::launcher::ProcessLauncher;
use crate::signals::{ChildSignalMask, SignalBridge};
use crate::terminal::TerminalArbiter;

/// How a foreground wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForegroundOutcome {
    Exited(ExitCode),
    Signaled(Signal),
    /// The job stopped and stays in the table under this id.
    Stopped(JobId),
}

impl ForegroundOutcome {
    pub fn exit_code(&self) -> ExitCode {
        match self {
            ForegroundOutcome::Exited(code) => *code,
            ForegroundOutcome::Signaled(sig) => SIGNAL_STATUS_BASE + *sig as i32,
            ForegroundOutcome::Stopped(_) => SIGNAL_STATUS_BASE + Signal::SIGTSTP as i32,
        }
    }
}

/// What `kill` is aimed at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillTarget {
    /// A raw OS process id.
    Pid(i32),
    /// `%N`: the whole process group of a job.
    Job(JobId),
}

impl FromStr for KillTarget {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        if s.starts_with('%') {
            s.parse().map(KillTarget::Job)
        } else {
            s.parse().map(KillTarget::Pid)
        }
    }
}

pub struct JobController {
    table: JobTable,
    launcher: ProcessLauncher,
    bridge: SignalBridge,
    terminal: TerminalArbiter,
}

impl JobController {
    pub fn new(bridge: SignalBridge, terminal: TerminalArbiter) -> Self {
        let launcher = ProcessLauncher::new(terminal.is_attached());
        Self {
            table: JobTable::new(),
            launcher,
            bridge,
            terminal,
        }
    }

    pub fn table(&self) -> &JobTable {
        &self.table
    }

    pub fn terminal(&self) -> &TerminalArbiter {
        &self.terminal
    }

    /// Run a command and block until it finishes or stops.
    pub fn launch_foreground(
        &mut self,
        desc: &CommandDescriptor,
        env: &Environment,
    ) -> Result<ForegroundOutcome> {
        let id = self.spawn(desc, env, false)?;
        self.wait_in_foreground(id, false)
    }

    /// Start a command without waiting; returns its job id and pid.
    pub fn launch_background(
        &mut self,
        desc: &CommandDescriptor,
        env: &Environment,
    ) -> Result<(JobId, Pid)> {
        let id = self.spawn(desc, env, true)?;
        let pgid = self.job(id)?.pgid;
        info!(job = %id, pid = %pgid, "started in background");
        Ok((id, pgid))
    }

    fn spawn(&mut self, desc: &CommandDescriptor, env: &Environment, background: bool) -> Result<JobId> {
        // Masked so the reaper cannot race the standard library's own
        // bookkeeping of a child whose exec failed.
        let spawned = {
            let _mask = ChildSignalMask::block()?;
            self.launcher.launch(desc, env)?
        };
        let job = Job::new(spawned.pgid, &desc.text, background);
        Ok(self.table.register(job))
    }

    /// Status lines of all jobs, by ascending id.
    pub fn jobs(&self) -> Vec<String> {
        self.table.list().map(Job::status_line).collect()
    }

    /// Resolve an explicit job id, or pick the current job.
    pub fn resolve(&self, spec: Option<JobId>) -> Result<JobId> {
        match spec {
            Some(id) => match self.table.lookup(id) {
                Some(job) if job.is_live() => Ok(id),
                _ => Err(JobError::NoSuchJob(format!("%{id}"))),
            },
            None => self.table.current().ok_or(JobError::NoCurrentJob),
        }
    }

    /// `fg`: continue the job if needed, give it the terminal and wait.
    ///
    /// The job is always sent SIGCONT: it may have been stopped by a signal
    /// whose fact has not been recorded yet.
    pub fn foreground(&mut self, spec: Option<JobId>) -> Result<ForegroundOutcome> {
        self.sync();
        let id = self.resolve(spec)?;
        self.job_mut(id)?.is_background = false;
        self.wait_in_foreground(id, true)
    }

    /// `bg`: continue a stopped job without giving it the terminal.
    pub fn background(&mut self, spec: Option<JobId>) -> Result<JobId> {
        self.sync();
        let id = self.resolve(spec)?;
        let job = self.job_mut(id)?;
        if job.state != JobState::Stopped {
            return Err(JobError::JobNotStopped(id));
        }
        let pgid = job.pgid;
        signal::killpg(pgid, Signal::SIGCONT).map_err(|e| signal_error(pgid.as_raw(), e))?;
        let job = self.job_mut(id)?;
        job.state = JobState::Running;
        job.is_background = true;
        job.notified = true;
        debug!(job = %id, "continued in background");
        Ok(id)
    }

    /// Send `sig` to a process or a job's process group.
    ///
    /// The table is not touched; the resulting state change arrives as a child
    /// fact like any other.
    pub fn kill(&self, target: KillTarget, sig: Signal) -> Result<()> {
        match target {
            KillTarget::Pid(raw) if raw <= 0 => Err(JobError::NoSuchProcess(raw)),
            KillTarget::Pid(raw) => {
                debug!(pid = raw, ?sig, "sending signal");
                signal::kill(Pid::from_raw(raw), sig).map_err(|e| signal_error(raw, e))
            }
            KillTarget::Job(id) => {
                let job = match self.table.lookup(id) {
                    Some(job) if job.is_live() => job,
                    _ => return Err(JobError::NoSuchJob(format!("%{id}"))),
                };
                debug!(job = %id, pgid = %job.pgid, ?sig, "signalling job");
                signal::killpg(job.pgid, sig).map_err(|e| signal_error(job.pgid.as_raw(), e))?;
                // A stopped job only acts on a terminating signal once continued.
                if job.state == JobState::Stopped && !matches!(sig, Signal::SIGCONT | Signal::SIGSTOP | Signal::SIGTSTP) {
                    signal::killpg(job.pgid, Signal::SIGCONT)
                        .map_err(|e| signal_error(job.pgid.as_raw(), e))?;
                }
                Ok(())
            }
        }
    }

    /// Apply every child fact recorded since the last safe point.
    pub fn sync(&mut self) {
        apply_facts(&self.bridge, &mut self.table);
    }

    /// Safe point before a prompt: apply pending facts, report unreported
    /// transitions and drop finished jobs that have now been reported.
    pub fn reap_and_notify(&mut self) -> Vec<String> {
        self.sync();
        let mut notices = Vec::new();
        for id in self.table.unreported() {
            let Some(job) = self.table.lookup_mut(id) else {
                continue;
            };
            job.notified = true;
            match job.state {
                JobState::Done(_) | JobState::Signaled(_) => {
                    notices.push(job.done_notice());
                    self.table.remove(id);
                }
                JobState::Stopped => notices.push(job.status_line()),
                JobState::Running => {}
            }
        }
        notices
    }

    /// Terminate every job that is still running or stopped. Returns how many
    /// jobs were signalled.
    pub fn shutdown(&mut self) -> usize {
        self.sync();
        let live: Vec<(JobId, Pid, JobState)> = self
            .table
            .live()
            .map(|job| (job.id, job.pgid, job.state))
            .collect();
        for (id, pgid, state) in &live {
            debug!(job = %id, %pgid, "terminating on exit");
            if let Err(e) = signal::killpg(*pgid, Signal::SIGTERM) {
                warn!(job = %id, "failed to terminate job: {e}");
                continue;
            }
            if *state == JobState::Stopped {
                if let Err(e) = signal::killpg(*pgid, Signal::SIGCONT) {
                    warn!(job = %id, "failed to continue job for termination: {e}");
                }
            }
        }
        live.len()
    }

    fn wait_in_foreground(&mut self, id: JobId, resume: bool) -> Result<ForegroundOutcome> {
        self.shield();
        let outcome = self.run_in_foreground(id, resume);
        self.shield();
        outcome
    }

    fn shield(&self) {
        if let Err(e) = self.bridge.shield_shell() {
            warn!("failed to restore shell signal dispositions: {e}");
        }
    }

    fn run_in_foreground(&mut self, id: JobId, resume: bool) -> Result<ForegroundOutcome> {
        let pgid = self.job(id)?.pgid;
        let _terminal = self.terminal.foreground(pgid);

        if resume {
            match signal::killpg(pgid, Signal::SIGCONT) {
                // Already gone; its exit fact is still on the way.
                Ok(()) | Err(Errno::ESRCH) => {}
                Err(e) => return Err(signal_error(pgid.as_raw(), e)),
            }
            if let Some(job) = self.table.lookup_mut(id) {
                if job.state == JobState::Stopped {
                    job.state = JobState::Running;
                    job.notified = true;
                }
            }
            debug!(job = %id, "continued in foreground");
        }

        loop {
            apply_facts(&self.bridge, &mut self.table);
            let job = self
                .table
                .lookup_mut(id)
                .ok_or_else(|| JobError::NoSuchJob(format!("%{id}")))?;
            let outcome = match job.state {
                JobState::Running => None,
                JobState::Stopped => Some(ForegroundOutcome::Stopped(id)),
                JobState::Done(code) => Some(ForegroundOutcome::Exited(code)),
                JobState::Signaled(sig) => Some(ForegroundOutcome::Signaled(sig)),
            };
            match outcome {
                None => self.bridge.wait_for_activity()?,
                Some(outcome) => {
                    // The caller reports the outcome itself.
                    job.notified = true;
                    if !matches!(outcome, ForegroundOutcome::Stopped(_)) {
                        self.table.remove(id);
                    }
                    debug!(job = %id, ?outcome, "foreground wait finished");
                    return Ok(outcome);
                }
            }
        }
    }

    fn job(&self, id: JobId) -> Result<&Job> {
        self.table
            .lookup(id)
            .ok_or_else(|| JobError::NoSuchJob(format!("%{id}")))
    }

    fn job_mut(&mut self, id: JobId) -> Result<&mut Job> {
        self.table
            .lookup_mut(id)
            .ok_or_else(|| JobError::NoSuchJob(format!("%{id}")))
    }
}

fn apply_facts(bridge: &SignalBridge, table: &mut JobTable) {
    for event in bridge.drain() {
        trace!(?event, "child fact");
        if table.update_state(event.pid(), event.state()).is_none() {
            debug!(pid = %event.pid(), "fact for a child that is not a job");
        }
    }
}

fn signal_error(pid: i32, err: Errno) -> JobError {
    match err {
        Errno::ESRCH => JobError::NoSuchProcess(pid),
        Errno::EPERM => JobError::PermissionDenied(pid),
        other => JobError::Signal(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_exit_codes() {
        assert_eq!(ForegroundOutcome::Exited(3).exit_code(), 3);
        assert_eq!(ForegroundOutcome::Signaled(Signal::SIGINT).exit_code(), 130);
        assert_eq!(ForegroundOutcome::Stopped(JobId(1)).exit_code(), 148);
    }

    #[test]
    fn kill_targets_parse() {
        assert_eq!("1234".parse::<KillTarget>(), Ok(KillTarget::Pid(1234)));
        assert_eq!("%2".parse::<KillTarget>(), Ok(KillTarget::Job(JobId(2))));
        assert!("abc".parse::<KillTarget>().is_err());
        assert!("%".parse::<KillTarget>().is_err());
    }

    #[test]
    fn errno_maps_to_taxonomy() {
        assert!(matches!(signal_error(5, Errno::ESRCH), JobError::NoSuchProcess(5)));
        assert!(matches!(signal_error(5, Errno::EPERM), JobError::PermissionDenied(5)));
        assert!(matches!(signal_error(5, Errno::EINVAL), JobError::Signal(Errno::EINVAL)));
    }
}
