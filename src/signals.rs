//! Translation of asynchronous child notifications into queued facts.
//!
//! The SIGCHLD action does the minimum that is safe in a signal handler: it
//! reaps children with `waitpid` and records every `(pid, condition)` pair as a
//! single atomic word in a fixed-capacity ring. It never allocates, never logs
//! and never touches the job table. The shell thread drains the ring at its safe
//! points and applies the facts synchronously.
//!
//! A second SIGCHLD action writes a byte into a wake pipe, which is what a
//! foreground wait blocks on.

use std::hint;
use std::io::{self, Read};
use std::os::unix::net::UnixStream;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use nix::sys::signal::{self, SigHandler, SigSet, SigmaskHow, Signal};
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::Pid;
use signal_hook::consts::SIGCHLD;
use signal_hook::low_level;
use tracing::{debug, warn};

use crate::errors::{JobError, Result};
use crate::job::JobState;

/// Number of facts the ring holds before the handler stops reaping.
pub const QUEUE_CAPACITY: usize = 256;

/// Keyboard and tty-access signals. An interactive shell ignores them for
/// itself; children get the default dispositions back before exec.
pub const JOB_CONTROL_SIGNALS: [Signal; 5] = [
    Signal::SIGINT,
    Signal::SIGQUIT,
    Signal::SIGTSTP,
    Signal::SIGTTIN,
    Signal::SIGTTOU,
];

static INSTALLED: AtomicBool = AtomicBool::new(false);

/// One observed change of a child's condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildEvent {
    Exited(Pid, i32),
    Signaled(Pid, Signal),
    Stopped(Pid, Signal),
    Continued(Pid),
}

const KIND_EXITED: u64 = 1;
const KIND_SIGNALED: u64 = 2;
const KIND_STOPPED: u64 = 3;
const KIND_CONTINUED: u64 = 4;

impl ChildEvent {
    pub fn from_wait_status(status: WaitStatus) -> Option<Self> {
        match status {
            WaitStatus::Exited(pid, code) => Some(ChildEvent::Exited(pid, code)),
            WaitStatus::Signaled(pid, sig, _) => Some(ChildEvent::Signaled(pid, sig)),
            WaitStatus::Stopped(pid, sig) => Some(ChildEvent::Stopped(pid, sig)),
            WaitStatus::Continued(pid) => Some(ChildEvent::Continued(pid)),
            _ => None,
        }
    }

    pub fn pid(&self) -> Pid {
        match *self {
            ChildEvent::Exited(pid, _)
            | ChildEvent::Signaled(pid, _)
            | ChildEvent::Stopped(pid, _)
            | ChildEvent::Continued(pid) => pid,
        }
    }

    /// The job state this event moves its job into.
    pub fn state(&self) -> JobState {
        match *self {
            ChildEvent::Exited(_, code) => JobState::Done(code),
            ChildEvent::Signaled(_, sig) => JobState::Signaled(sig),
            ChildEvent::Stopped(..) => JobState::Stopped,
            ChildEvent::Continued(_) => JobState::Running,
        }
    }

    /// Layout: kind in bits 56..64, value in bits 32..56, pid in bits 0..32.
    fn pack(self) -> u64 {
        let (kind, value) = match self {
            ChildEvent::Exited(_, code) => (KIND_EXITED, code),
            ChildEvent::Signaled(_, sig) => (KIND_SIGNALED, sig as i32),
            ChildEvent::Stopped(_, sig) => (KIND_STOPPED, sig as i32),
            ChildEvent::Continued(_) => (KIND_CONTINUED, 0),
        };
        let pid = self.pid().as_raw() as u32 as u64;
        (kind << 56) | ((value as u32 as u64 & 0xFF_FFFF) << 32) | pid
    }

    fn unpack(word: u64) -> Option<Self> {
        let pid = Pid::from_raw(word as u32 as i32);
        let value = ((word >> 32) & 0xFF_FFFF) as i32;
        match word >> 56 {
            KIND_EXITED => Some(ChildEvent::Exited(pid, value)),
            KIND_SIGNALED => Signal::try_from(value).ok().map(|sig| ChildEvent::Signaled(pid, sig)),
            KIND_STOPPED => Signal::try_from(value).ok().map(|sig| ChildEvent::Stopped(pid, sig)),
            KIND_CONTINUED => Some(ChildEvent::Continued(pid)),
            _ => None,
        }
    }
}

/// Bounded, allocation-free queue of child events.
///
/// Producers (the SIGCHLD action, or a sweep from the shell thread) are
/// serialised by a spin flag; a thread must have SIGCHLD blocked while it
/// holds that flag. Consumers never take the flag, so a handler interrupting
/// a consumer cannot deadlock.
pub struct FactQueue {
    slots: [AtomicU64; QUEUE_CAPACITY],
    head: AtomicUsize,
    tail: AtomicUsize,
    producing: AtomicBool,
}

struct ProducerGuard<'a>(&'a AtomicBool);

impl Drop for ProducerGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl FactQueue {
    pub fn new() -> Self {
        Self {
            slots: [const { AtomicU64::new(0) }; QUEUE_CAPACITY],
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
            producing: AtomicBool::new(false),
        }
    }

    fn lock_producer(&self) -> ProducerGuard<'_> {
        while self
            .producing
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            hint::spin_loop();
        }
        ProducerGuard(&self.producing)
    }

    pub fn len(&self) -> usize {
        let tail = self.tail.load(Ordering::Acquire);
        let head = self.head.load(Ordering::Acquire);
        tail.wrapping_sub(head)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn is_full(&self) -> bool {
        self.len() >= QUEUE_CAPACITY
    }

    /// Append an event; `false` when the ring is full.
    pub fn push(&self, event: ChildEvent) -> bool {
        let _producer = self.lock_producer();
        self.push_locked(event)
    }

    fn push_locked(&self, event: ChildEvent) -> bool {
        let tail = self.tail.load(Ordering::Relaxed);
        let head = self.head.load(Ordering::Acquire);
        if tail.wrapping_sub(head) >= QUEUE_CAPACITY {
            return false;
        }
        self.slots[tail % QUEUE_CAPACITY].store(event.pack(), Ordering::Relaxed);
        self.tail.store(tail.wrapping_add(1), Ordering::Release);
        true
    }

    pub fn pop(&self) -> Option<ChildEvent> {
        loop {
            let head = self.head.load(Ordering::Acquire);
            let tail = self.tail.load(Ordering::Acquire);
            if head == tail {
                return None;
            }
            let word = self.slots[head % QUEUE_CAPACITY].load(Ordering::Relaxed);
            if self
                .head
                .compare_exchange(head, head.wrapping_add(1), Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                if let Some(event) = ChildEvent::unpack(word) {
                    return Some(event);
                }
            }
        }
    }

    /// Collect every pending child status change while there is room to
    /// record it. Async-signal-safe.
    pub fn reap(&self) -> usize {
        let _producer = self.lock_producer();
        let flags = WaitPidFlag::WNOHANG | WaitPidFlag::WUNTRACED | WaitPidFlag::WCONTINUED;
        let mut recorded = 0;
        while !self.is_full() {
            match waitpid(Pid::from_raw(-1), Some(flags)) {
                Ok(WaitStatus::StillAlive) | Err(_) => break,
                Ok(status) => {
                    if let Some(event) = ChildEvent::from_wait_status(status) {
                        if self.push_locked(event) {
                            recorded += 1;
                        }
                    }
                }
            }
        }
        recorded
    }
}

impl Default for FactQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Blocks SIGCHLD for the calling thread until dropped.
pub struct ChildSignalMask {
    previous: SigSet,
}

impl ChildSignalMask {
    pub fn block() -> Result<Self> {
        let mut set = SigSet::empty();
        set.add(Signal::SIGCHLD);
        let mut previous = SigSet::empty();
        signal::pthread_sigmask(SigmaskHow::SIG_BLOCK, Some(&set), Some(&mut previous))
            .map_err(JobError::Signal)?;
        Ok(Self { previous })
    }
}

impl Drop for ChildSignalMask {
    fn drop(&mut self) {
        if let Err(e) = signal::pthread_sigmask(SigmaskHow::SIG_SETMASK, Some(&self.previous), None) {
            warn!("failed to restore signal mask: {e}");
        }
    }
}

struct Inner {
    queue: Arc<FactQueue>,
    wake: UnixStream,
    interactive: bool,
}

/// Process-wide SIGCHLD plumbing, shared by handle.
///
/// Only one bridge may be installed per process; clone the handle instead.
#[derive(Clone)]
pub struct SignalBridge {
    inner: Arc<Inner>,
}

impl SignalBridge {
    /// Register the SIGCHLD actions. An interactive shell additionally
    /// ignores the keyboard and tty-access signals for itself.
    pub fn install(interactive: bool) -> Result<Self> {
        if INSTALLED.swap(true, Ordering::SeqCst) {
            return Err(JobError::Io(io::Error::new(
                io::ErrorKind::AlreadyExists,
                "signal bridge already installed",
            )));
        }

        let queue = Arc::new(FactQueue::new());
        let (wake, notify) = UnixStream::pair()?;
        notify.set_nonblocking(true)?;

        let reaper = Arc::clone(&queue);
        // SAFETY: the action only calls waitpid and operates on atomics, both of
        // which are async-signal-safe. It allocates nothing and takes no locks
        // shared with code it can interrupt.
        unsafe {
            low_level::register(SIGCHLD, move || {
                reaper.reap();
            })?;
        }
        // Registered second so the wake-up always follows the recorded facts.
        low_level::pipe::register(SIGCHLD, notify)?;

        let bridge = Self {
            inner: Arc::new(Inner {
                queue,
                wake,
                interactive,
            }),
        };
        bridge.shield_shell()?;
        debug!(interactive, "signal bridge installed");
        Ok(bridge)
    }

    pub fn is_interactive(&self) -> bool {
        self.inner.interactive
    }

    /// Ignore keyboard and tty-access signals in the shell itself, so a stray
    /// Ctrl-C or Ctrl-Z between jobs cannot kill or stop it.
    pub fn shield_shell(&self) -> Result<()> {
        if !self.inner.interactive {
            return Ok(());
        }
        for sig in JOB_CONTROL_SIGNALS {
            // SAFETY: SigIgn installs no handler code.
            unsafe { signal::signal(sig, SigHandler::SigIgn) }.map_err(JobError::Signal)?;
        }
        Ok(())
    }

    /// Take every fact recorded so far, oldest first.
    ///
    /// Also sweeps for children the handler had to leave behind while the ring
    /// was full.
    pub fn drain(&self) -> Vec<ChildEvent> {
        match ChildSignalMask::block() {
            Ok(_mask) => {
                let swept = self.inner.queue.reap();
                if swept > 0 {
                    debug!(swept, "collected child events outside the handler");
                }
            }
            Err(e) => warn!("skipping child sweep: {e}"),
        }
        std::iter::from_fn(|| self.inner.queue.pop()).collect()
    }

    /// Block until the next SIGCHLD (or return at once if one arrived since the
    /// last wake-up).
    pub fn wait_for_activity(&self) -> Result<()> {
        let mut buf = [0u8; 64];
        loop {
            match (&self.inner.wake).read(&mut buf) {
                Ok(0) => {
                    return Err(JobError::Io(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "SIGCHLD wake pipe closed",
                    )));
                }
                Ok(_) => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }
}

/// Restore default dispositions for the job control signals.
///
/// Runs in a freshly forked child before exec; ignored dispositions would
/// otherwise survive the exec.
pub fn reset_for_child() -> io::Result<()> {
    for sig in JOB_CONTROL_SIGNALS {
        // SAFETY: sigaction is async-signal-safe and SigDfl installs no code.
        unsafe { signal::signal(sig, SigHandler::SigDfl) }.map_err(io::Error::from)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pid(n: i32) -> Pid {
        Pid::from_raw(n)
    }

    #[test]
    fn events_survive_packing() {
        let events = [
            ChildEvent::Exited(pid(4_194_303), 255),
            ChildEvent::Exited(pid(1), 0),
            ChildEvent::Signaled(pid(77), Signal::SIGKILL),
            ChildEvent::Stopped(pid(78), Signal::SIGTSTP),
            ChildEvent::Continued(pid(79)),
        ];
        for event in events {
            assert_eq!(ChildEvent::unpack(event.pack()), Some(event));
        }
        assert_eq!(ChildEvent::unpack(0), None);
    }

    #[test]
    fn events_map_to_job_states() {
        assert_eq!(ChildEvent::Exited(pid(1), 3).state(), JobState::Done(3));
        assert_eq!(
            ChildEvent::Signaled(pid(1), Signal::SIGTERM).state(),
            JobState::Signaled(Signal::SIGTERM)
        );
        assert_eq!(ChildEvent::Stopped(pid(1), Signal::SIGTTIN).state(), JobState::Stopped);
        assert_eq!(ChildEvent::Continued(pid(1)).state(), JobState::Running);
    }

    #[test]
    fn wait_status_conversion_skips_still_alive() {
        assert_eq!(ChildEvent::from_wait_status(WaitStatus::StillAlive), None);
        assert_eq!(
            ChildEvent::from_wait_status(WaitStatus::Exited(pid(9), 1)),
            Some(ChildEvent::Exited(pid(9), 1))
        );
    }

    #[test]
    fn queue_is_fifo() {
        let queue = FactQueue::new();
        assert!(queue.is_empty());
        assert!(queue.push(ChildEvent::Stopped(pid(5), Signal::SIGTSTP)));
        assert!(queue.push(ChildEvent::Continued(pid(5))));
        assert!(queue.push(ChildEvent::Exited(pid(5), 0)));
        assert_eq!(queue.len(), 3);

        assert_eq!(queue.pop(), Some(ChildEvent::Stopped(pid(5), Signal::SIGTSTP)));
        assert_eq!(queue.pop(), Some(ChildEvent::Continued(pid(5))));
        assert_eq!(queue.pop(), Some(ChildEvent::Exited(pid(5), 0)));
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn queue_rejects_when_full_and_wraps() {
        let queue = FactQueue::new();
        for n in 0..QUEUE_CAPACITY {
            assert!(queue.push(ChildEvent::Exited(pid(n as i32 + 1), 0)));
        }
        assert!(!queue.push(ChildEvent::Exited(pid(9999), 0)));

        assert_eq!(queue.pop(), Some(ChildEvent::Exited(pid(1), 0)));
        assert!(queue.push(ChildEvent::Exited(pid(9999), 0)));

        let drained: Vec<_> = std::iter::from_fn(|| queue.pop()).collect();
        assert_eq!(drained.len(), QUEUE_CAPACITY);
        assert_eq!(drained.last(), Some(&ChildEvent::Exited(pid(9999), 0)));
    }

    #[test]
    fn concurrent_producers_lose_nothing() {
        let queue = Arc::new(FactQueue::new());
        let producers: Vec<_> = (0..4)
            .map(|t| {
                let queue = Arc::clone(&queue);
                std::thread::spawn(move || {
                    for n in 0..50 {
                        assert!(queue.push(ChildEvent::Exited(pid(t * 100 + n + 1), 0)));
                    }
                })
            })
            .collect();
        for p in producers {
            p.join().unwrap();
        }
        let mut pids: Vec<i32> = std::iter::from_fn(|| queue.pop())
            .map(|e| e.pid().as_raw())
            .collect();
        pids.sort_unstable();
        pids.dedup();
        assert_eq!(pids.len(), 200);
    }
}
