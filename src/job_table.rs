//! The registry of launched jobs.
//!
//! The table is owned by the shell's single thread of control and is only
//! mutated synchronously: by the controller when it launches or resumes a job,
//! and when it applies child state facts drained from the signal bridge.

use std::collections::BTreeMap;

use nix::unistd::Pid;
use tracing::{debug, warn};

use crate::job::{Job, JobId, JobState};

#[derive(Debug, Default)]
pub struct JobTable {
    jobs: BTreeMap<JobId, Job>,
    launches: u64,
}

impl JobTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a job under the smallest unused id and return that id.
    pub fn register(&mut self, mut job: Job) -> JobId {
        let id = (1..)
            .map(JobId)
            .find(|id| !self.jobs.contains_key(id))
            .unwrap_or(JobId(self.jobs.len() + 1));
        self.launches += 1;
        job.id = id;
        job.seq = self.launches;
        debug!(job = %id, pgid = %job.pgid, command = %job.command_text, "registered job");
        self.jobs.insert(id, job);
        id
    }

    pub fn lookup(&self, id: JobId) -> Option<&Job> {
        self.jobs.get(&id)
    }

    pub fn lookup_mut(&mut self, id: JobId) -> Option<&mut Job> {
        self.jobs.get_mut(&id)
    }

    pub fn find_by_pgid(&self, pgid: Pid) -> Option<&Job> {
        self.jobs.values().find(|job| job.pgid == pgid)
    }

    /// Record a new state for the job owning `pgid`.
    ///
    /// A changed state clears the job's `notified` flag so the transition gets
    /// reported exactly once. Facts about finished jobs are ignored: a terminal
    /// state never changes again.
    pub fn update_state(&mut self, pgid: Pid, state: JobState) -> Option<JobId> {
        let job = self.jobs.values_mut().find(|job| job.pgid == pgid)?;
        if job.state.is_terminal() {
            warn!(job = %job.id, ?state, "ignoring state change of a finished job");
            return Some(job.id);
        }
        if job.state != state {
            debug!(job = %job.id, from = ?job.state, to = ?state, "job state changed");
            job.state = state;
            job.notified = false;
        }
        Some(job.id)
    }

    /// All jobs in ascending id order.
    pub fn list(&self) -> impl Iterator<Item = &Job> {
        self.jobs.values()
    }

    /// Drop a job that has finished and been reported.
    ///
    /// Returns `None` (and keeps the entry) for jobs that are still alive or
    /// whose final state has not been shown yet.
    pub fn remove(&mut self, id: JobId) -> Option<Job> {
        match self.jobs.get(&id) {
            Some(job) if job.is_reapable() => {
                debug!(job = %id, "removed job");
                self.jobs.remove(&id)
            }
            Some(job) => {
                warn!(job = %id, state = ?job.state, notified = job.notified, "refusing to remove unreported job");
                None
            }
            None => None,
        }
    }

    /// The job `fg`/`bg` act on by default: the most recently launched stopped
    /// job, otherwise the most recently launched live job.
    pub fn current(&self) -> Option<JobId> {
        let latest = |stopped_only: bool| {
            self.jobs
                .values()
                .filter(|job| job.is_live())
                .filter(|job| !stopped_only || job.state == JobState::Stopped)
                .max_by_key(|job| job.seq)
                .map(|job| job.id)
        };
        latest(true).or_else(|| latest(false))
    }

    /// Jobs with a transition nobody has been told about yet.
    pub fn unreported(&self) -> Vec<JobId> {
        self.jobs
            .values()
            .filter(|job| !job.notified)
            .map(|job| job.id)
            .collect()
    }

    pub fn live(&self) -> impl Iterator<Item = &Job> {
        self.jobs.values().filter(|job| job.is_live())
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::sys::signal::Signal;

    fn job(pid: i32) -> Job {
        Job::new(Pid::from_raw(pid), format!("cmd {pid}"), true)
    }

    fn finish(table: &mut JobTable, pid: i32) -> JobId {
        let id = table
            .update_state(Pid::from_raw(pid), JobState::Done(0))
            .unwrap();
        table.lookup_mut(id).unwrap().notified = true;
        id
    }

    #[test]
    fn ids_are_smallest_unused() {
        let mut table = JobTable::new();
        assert_eq!(table.register(job(100)), JobId(1));
        assert_eq!(table.register(job(101)), JobId(2));
        assert_eq!(table.register(job(102)), JobId(3));

        let b = finish(&mut table, 101);
        assert!(table.remove(b).is_some());

        assert_eq!(table.register(job(103)), JobId(2));
        assert_eq!(table.register(job(104)), JobId(4));
    }

    #[test]
    fn list_is_ordered_by_id() {
        let mut table = JobTable::new();
        for pid in [10, 11, 12] {
            table.register(job(pid));
        }
        let first = finish(&mut table, 10);
        table.remove(first);
        table.register(job(13));

        let ids: Vec<_> = table.list().map(|j| j.id.0).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(table.lookup(JobId(1)).unwrap().pgid, Pid::from_raw(13));
    }

    #[test]
    fn remove_requires_reported_terminal_state() {
        let mut table = JobTable::new();
        let id = table.register(job(200));
        assert!(table.remove(id).is_none());

        table.update_state(Pid::from_raw(200), JobState::Signaled(Signal::SIGKILL));
        assert!(!table.lookup(id).unwrap().notified);
        assert!(table.remove(id).is_none());

        table.lookup_mut(id).unwrap().notified = true;
        assert!(table.remove(id).is_some());
        assert!(table.is_empty());
    }

    #[test]
    fn update_state_marks_unreported() {
        let mut table = JobTable::new();
        let id = table.register(job(300));
        assert!(table.unreported().is_empty());

        table.update_state(Pid::from_raw(300), JobState::Stopped);
        assert_eq!(table.unreported(), vec![id]);

        assert_eq!(table.update_state(Pid::from_raw(999), JobState::Stopped), None);
    }

    #[test]
    fn terminal_state_is_sticky() {
        let mut table = JobTable::new();
        let id = table.register(job(400));
        table.update_state(Pid::from_raw(400), JobState::Done(1));
        table.update_state(Pid::from_raw(400), JobState::Running);
        assert_eq!(table.lookup(id).unwrap().state, JobState::Done(1));
    }

    #[test]
    fn current_prefers_latest_stopped() {
        let mut table = JobTable::new();
        assert_eq!(table.current(), None);

        let a = table.register(job(1));
        let b = table.register(job(2));
        table.register(job(3));
        assert_eq!(table.current(), Some(JobId(3)));

        table.update_state(Pid::from_raw(1), JobState::Stopped);
        assert_eq!(table.current(), Some(a));
        table.update_state(Pid::from_raw(2), JobState::Stopped);
        assert_eq!(table.current(), Some(b));
    }
}
