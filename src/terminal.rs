//! Ownership of the controlling terminal.
//!
//! Exactly one process group is the terminal's foreground group at a time:
//! either the shell itself or the job it is waiting on. Handing the terminal
//! to a job goes through [`TerminalArbiter::foreground`], whose guard hands it
//! back on every exit path.

use std::io;
use std::os::fd::AsFd;

use nix::errno::Errno;
use nix::sys::signal::{Signal, killpg};
use nix::sys::termios::{SetArg, Termios, tcgetattr, tcsetattr};
use nix::unistd::{Pid, getpgrp, getpid, setpgid, tcgetpgrp, tcsetpgrp};
use tracing::{debug, warn};

use crate::errors::{JobError, Result};

#[derive(Clone)]
pub struct TerminalArbiter {
    shell_pgid: Pid,
    attached: bool,
    shell_modes: Option<Termios>,
}

impl TerminalArbiter {
    /// An arbiter that never touches the terminal, for non-interactive use.
    pub fn detached() -> Self {
        Self {
            shell_pgid: getpgrp(),
            attached: false,
            shell_modes: None,
        }
    }

    /// Block until the shell's process group owns the terminal.
    ///
    /// A shell started in the background stops itself with SIGTTIN until the
    /// user brings it forward, so this must run while SIGTTIN still has its
    /// default disposition.
    pub fn wait_for_foreground() -> Result<()> {
        let stdin = io::stdin();
        loop {
            let pgrp = getpgrp();
            let owner = tcgetpgrp(stdin.as_fd()).map_err(JobError::Terminal)?;
            if owner == pgrp {
                return Ok(());
            }
            debug!(%pgrp, %owner, "not in the foreground yet");
            killpg(pgrp, Signal::SIGTTIN).map_err(JobError::Signal)?;
        }
    }

    /// Put the shell in its own process group and make that group the
    /// terminal's foreground group.
    ///
    /// Call [`TerminalArbiter::wait_for_foreground`] first. The shell must
    /// already ignore SIGTTOU (see [`crate::SignalBridge::shield_shell`]).
    pub fn attach() -> Result<Self> {
        let stdin = io::stdin();
        let pid = getpid();
        match setpgid(pid, pid) {
            // A session leader already leads its own group.
            Ok(()) | Err(Errno::EPERM) => {}
            Err(e) => return Err(JobError::Terminal(e)),
        }
        let shell_pgid = getpgrp();
        tcsetpgrp(stdin.as_fd(), shell_pgid).map_err(JobError::Terminal)?;
        let shell_modes = tcgetattr(stdin.as_fd()).ok();

        debug!(%shell_pgid, "attached to the controlling terminal");
        Ok(Self {
            shell_pgid,
            attached: true,
            shell_modes,
        })
    }

    pub fn is_attached(&self) -> bool {
        self.attached
    }

    pub fn shell_pgid(&self) -> Pid {
        self.shell_pgid
    }

    pub fn give_terminal_to(&self, pgid: Pid) -> Result<()> {
        if !self.attached {
            return Ok(());
        }
        debug!(%pgid, "giving terminal away");
        tcsetpgrp(io::stdin().as_fd(), pgid).map_err(JobError::Terminal)
    }

    /// Make the shell's group the foreground group again and restore the
    /// terminal modes it had at start-up.
    pub fn reclaim_for_shell(&self) -> Result<()> {
        if !self.attached {
            return Ok(());
        }
        let stdin = io::stdin();
        tcsetpgrp(stdin.as_fd(), self.shell_pgid).map_err(JobError::Terminal)?;
        if let Some(modes) = &self.shell_modes {
            tcsetattr(stdin.as_fd(), SetArg::TCSADRAIN, modes).map_err(JobError::Terminal)?;
        }
        debug!(shell_pgid = %self.shell_pgid, "terminal reclaimed");
        Ok(())
    }

    /// Hand the terminal to `pgid` for the lifetime of the returned guard.
    ///
    /// A failed hand-over is not fatal: the job may already have exited, in
    /// which case the wait that follows returns immediately.
    pub fn foreground(&self, pgid: Pid) -> ForegroundGuard<'_> {
        if let Err(e) = self.give_terminal_to(pgid) {
            debug!(%pgid, "terminal hand-over failed: {e}");
        }
        ForegroundGuard { arbiter: self }
    }
}

/// Returns the terminal to the shell when dropped.
pub struct ForegroundGuard<'a> {
    arbiter: &'a TerminalArbiter,
}

impl Drop for ForegroundGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.arbiter.reclaim_for_shell() {
            warn!("failed to reclaim terminal: {e}");
        }
    }
}

/// Child-side half of a foreground hand-over, run between fork and exec.
///
/// Both parent and child set the foreground group so that neither order of
/// execution leaves the child reading from a terminal it does not own.
pub(crate) fn claim_for_self() {
    // SAFETY: fd 0 stays open for the duration of this call.
    let stdin = unsafe { std::os::fd::BorrowedFd::borrow_raw(0) };
    // Fails with ENOTTY when stdin is not a terminal, e.g. redirected from a file.
    let _ = tcsetpgrp(stdin, getpid());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detached_arbiter_is_a_no_op() {
        let arbiter = TerminalArbiter::detached();
        assert!(!arbiter.is_attached());
        assert_eq!(arbiter.shell_pgid(), getpgrp());
        assert!(arbiter.give_terminal_to(Pid::from_raw(1)).is_ok());
        assert!(arbiter.reclaim_for_shell().is_ok());
        drop(arbiter.foreground(Pid::from_raw(1)));
    }
}
