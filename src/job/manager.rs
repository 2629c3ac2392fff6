//! Single-worker job queue.
//!
//! A [`JobManager`] owns one named thread that runs queued jobs one at a
//! time. A job leaves the worker finished, paused, or suspended; suspended
//! jobs go back on the queue when woken. A wake that arrives while the job
//! is still running is remembered and re-queues it as soon as it returns.

use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, HashSet, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use super::{JobError, JobHandle, JobId, RunOutcome, StopReason, ValidationJob};
use crate::types::TokenId;

#[derive(Default)]
struct Queues {
    current: Option<Arc<ValidationJob>>,
    pending: VecDeque<Arc<ValidationJob>>,
    paused: HashMap<JobId, Arc<ValidationJob>>,
    suspended: HashMap<JobId, Arc<ValidationJob>>,
    rewake: bool,
    all: HashSet<JobId>,
}

impl Queues {
    fn is_current(&self, id: JobId) -> bool {
        self.current.as_ref().is_some_and(|j| j.id() == id)
    }

    fn take_idle(&mut self, id: JobId) -> Option<Arc<ValidationJob>> {
        if let Some(pos) = self.pending.iter().position(|j| j.id() == id) {
            return self.pending.remove(pos);
        }
        self.paused.remove(&id).or_else(|| self.suspended.remove(&id))
    }
}

pub(crate) struct ManagerShared {
    name: String,
    queues: Mutex<Queues>,
    wakeup: Condvar,
    killing: AtomicBool,
}

impl ManagerShared {
    pub(crate) fn wake(&self, id: JobId) {
        let mut q = self.queues.lock();
        if q.is_current(id) {
            q.rewake = true;
        } else if let Some(job) = q.suspended.remove(&id) {
            q.pending.push_back(job);
            self.wakeup.notify_one();
        }
    }

    pub(crate) fn pause(&self, job: &Arc<ValidationJob>) -> bool {
        let mut q = self.queues.lock();
        let id = job.id();
        if q.is_current(id) {
            job.request_stop();
            return true;
        }
        match q.take_idle(id) {
            Some(job) => {
                q.paused.insert(id, job);
                true
            }
            None => false,
        }
    }

    fn next_job(&self) -> Option<Arc<ValidationJob>> {
        let mut q = self.queues.lock();
        loop {
            if self.killing.load(Ordering::SeqCst) {
                return None;
            }
            if let Some(job) = q.pending.pop_front() {
                q.current = Some(job.clone());
                q.rewake = false;
                return Some(job);
            }
            self.wakeup.wait(&mut q);
        }
    }

    fn worker(self: Arc<Self>) {
        tracing::debug!(manager = %self.name, "job manager started");
        while let Some(job) = self.next_job() {
            let outcome = match catch_unwind(AssertUnwindSafe(|| job.run())) {
                Ok(RunOutcome::Finished(reason)) => RunOutcome::Finished(reason),
                // Killed while running; it may never be woken again.
                Ok(_) if job.is_killed() => RunOutcome::Finished(StopReason::Killed),
                Ok(outcome) => outcome,
                Err(_) => RunOutcome::Finished(StopReason::Crashed("job panicked".into())),
            };

            let mut q = self.queues.lock();
            q.current = None;
            match outcome {
                RunOutcome::Finished(reason) => {
                    q.all.remove(&job.id());
                    drop(q);
                    job.finish(reason);
                }
                RunOutcome::Paused => {
                    q.paused.insert(job.id(), job);
                }
                RunOutcome::Suspended if q.rewake => q.pending.push_back(job),
                RunOutcome::Suspended => {
                    q.suspended.insert(job.id(), job);
                }
            }
        }

        let remaining: Vec<_> = {
            let mut q = self.queues.lock();
            let mut jobs: Vec<_> = q.pending.drain(..).collect();
            jobs.extend(q.paused.drain().map(|(_, j)| j));
            jobs.extend(q.suspended.drain().map(|(_, j)| j));
            q.all.clear();
            jobs
        };
        for job in remaining {
            job.finish(StopReason::Killed);
        }
        tracing::debug!(manager = %self.name, "job manager stopped");
    }
}

/// Queue of validation jobs run by one worker thread.
pub struct JobManager {
    shared: Arc<ManagerShared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for JobManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobManager").field("name", &self.shared.name).finish()
    }
}

impl JobManager {
    /// Start a manager and its worker thread.
    pub fn new(name: impl Into<String>) -> Result<Self, JobError> {
        let name = name.into();
        let shared = Arc::new(ManagerShared {
            name: name.clone(),
            queues: Mutex::new(Queues::default()),
            wakeup: Condvar::new(),
            killing: AtomicBool::new(false),
        });
        let worker = shared.clone();
        let thread = std::thread::Builder::new()
            .name(format!("slp-jobs-{}", name))
            .spawn(move || worker.worker())?;
        Ok(Self { shared, thread: Mutex::new(Some(thread)) })
    }

    /// Manager name.
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Queue a job.
    pub fn add_job(&self, job: &JobHandle) -> Result<(), JobError> {
        if self.shared.killing.load(Ordering::SeqCst) {
            return Err(JobError::ManagerKilled);
        }
        let mut q = self.shared.queues.lock();
        let id = job.id();
        if q.all.contains(&id) || !job.job().attach(Arc::downgrade(&self.shared)) {
            return Err(JobError::AlreadyQueued(id));
        }
        q.all.insert(id);
        q.pending.push_back(job.job().clone());
        self.shared.wakeup.notify_one();
        Ok(())
    }

    /// Pause a running or queued job. Returns false if it is neither.
    pub fn pause_job(&self, job: &JobHandle) -> bool {
        self.shared.pause(job.job())
    }

    /// Queue a paused job again.
    pub fn unpause_job(&self, job: &JobHandle) -> Result<(), JobError> {
        let mut q = self.shared.queues.lock();
        let paused = q.paused.remove(&job.id()).ok_or(JobError::NotPaused(job.id()))?;
        q.pending.push_back(paused);
        self.shared.wakeup.notify_one();
        Ok(())
    }

    /// Re-queue a suspended job, or flag the running one for another pass.
    pub fn wake(&self, id: JobId) {
        self.shared.wake(id);
    }

    /// Kill every job on `token_id`. Idle jobs finish immediately; the
    /// running one stops at its next loop check. Returns the number hit.
    pub fn cancel_token(&self, token_id: TokenId) -> usize {
        let (idle, running) = {
            let mut q = self.shared.queues.lock();
            let mut running = 0;
            if let Some(current) = q.current.as_ref().filter(|j| j.token_id() == token_id) {
                current.kill();
                running = 1;
            }
            let ids: Vec<JobId> = q
                .pending
                .iter()
                .chain(q.paused.values())
                .chain(q.suspended.values())
                .filter(|j| j.token_id() == token_id)
                .map(|j| j.id())
                .collect();
            let mut jobs = Vec::with_capacity(ids.len());
            for id in ids {
                if let Some(job) = q.take_idle(id) {
                    q.all.remove(&id);
                    jobs.push(job);
                }
            }
            (jobs, running)
        };
        let count = idle.len() + running;
        for job in idle {
            job.finish(StopReason::Killed);
        }
        count
    }

    /// Job on the worker right now.
    pub fn current_job(&self) -> Option<JobId> {
        self.shared.queues.lock().current.as_ref().map(|j| j.id())
    }

    /// Jobs queued, running, paused or suspended.
    pub fn job_count(&self) -> usize {
        self.shared.queues.lock().all.len()
    }

    /// Stop the worker. Every unfinished job finishes as killed.
    pub fn kill(&self) {
        if self.shared.killing.swap(true, Ordering::SeqCst) {
            return;
        }
        {
            let q = self.shared.queues.lock();
            if let Some(current) = &q.current {
                current.kill();
            }
            self.shared.wakeup.notify_all();
        }
        let handle = self.thread.lock().take();
        if let Some(handle) = handle {
            if handle.thread().id() == std::thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                tracing::error!(manager = %self.shared.name, "job manager thread panicked");
            }
        }
    }
}

impl Drop for JobManager {
    fn drop(&mut self) {
        self.kill();
    }
}
