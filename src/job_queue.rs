/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Background job scheduling.
//!
//! The [`LedgerMaster`](crate::ledger_master::LedgerMaster) never does long-running work on the caller's
//! thread. Publishing ledgers, backfilling history, path-finding, and processing received fetch packs
//! all run as jobs handed to a [`JobScheduler`].
//!
//! Jobs are cooperative: a long-running job polls [`Job::should_cancel`] and returns early when it is
//! set, leaving behind whatever progress it has already committed.
//!
//! [`JobQueue`] is a fixed-size thread pool implementation of `JobScheduler`. Dropping it cancels
//! running jobs, discards jobs that have not started, and joins its worker threads.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::{self, Receiver, Sender},
        Arc, Mutex,
    },
    thread::{self, JoinHandle},
};

/// Kinds of jobs, counted separately by schedulers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum JobType {
    /// Publish newly validated ledgers, or acquire and backfill history.
    Advance,
    /// Recompute path-finding requests against a new ledger.
    UpdatePaths,
    /// Process a received fetch pack.
    LedgerData,
    /// Publish or persist a historical ledger.
    PubOldLedger,
}

/// Handle given to a running job.
pub struct Job {
    job_type: JobType,
    name: &'static str,
    cancel: Arc<AtomicBool>,
}

impl Job {
    pub fn new(job_type: JobType, name: &'static str, cancel: Arc<AtomicBool>) -> Job {
        Job {
            job_type,
            name,
            cancel,
        }
    }

    pub fn job_type(&self) -> JobType {
        self.job_type
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Whether the job should stop at its next opportunity.
    pub fn should_cancel(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }
}

pub type JobFn = Box<dyn FnOnce(&Job) + Send + 'static>;

pub trait JobScheduler: Send + Sync {
    /// Run `job` in the background. Returns false if the scheduler is shutting down and the job was
    /// dropped.
    fn schedule(&self, job_type: JobType, name: &'static str, job: JobFn) -> bool;

    /// Number of jobs of `job_type` that are queued or running.
    fn job_count(&self, job_type: JobType) -> usize;
}

type JobCounts = Arc<Mutex<HashMap<JobType, usize>>>;

pub struct JobQueue {
    sender: Mutex<Option<Sender<(Job, JobFn)>>>,
    workers: Vec<JoinHandle<()>>,
    counts: JobCounts,
    cancel: Arc<AtomicBool>,
}

impl JobQueue {
    /// Start a job queue with `threads` worker threads (at least one).
    pub fn new(threads: usize) -> JobQueue {
        let (sender, receiver) = mpsc::channel::<(Job, JobFn)>();
        let receiver = Arc::new(Mutex::new(receiver));
        let counts: JobCounts = Arc::new(Mutex::new(HashMap::new()));

        let workers = (0..threads.max(1))
            .map(|_| start_worker(receiver.clone(), counts.clone()))
            .collect();

        JobQueue {
            sender: Mutex::new(Some(sender)),
            workers,
            counts,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Stop accepting jobs and ask running jobs to cancel. Does not wait for the workers.
    pub fn stop(&self) {
        self.cancel.store(true, Ordering::Release);
        if let Ok(mut sender) = self.sender.lock() {
            sender.take();
        }
    }
}

fn start_worker(receiver: Arc<Mutex<Receiver<(Job, JobFn)>>>, counts: JobCounts) -> JoinHandle<()> {
    thread::spawn(move || loop {
        let next = match receiver.lock() {
            Ok(receiver) => receiver.recv(),
            Err(_) => return,
        };

        let Ok((job, job_fn)) = next else {
            return;
        };

        log::trace!("Running job {}", job.name());
        job_fn(&job);

        if let Ok(mut counts) = counts.lock() {
            if let Some(count) = counts.get_mut(&job.job_type()) {
                *count = count.saturating_sub(1);
            }
        }
    })
}

impl JobScheduler for JobQueue {
    fn schedule(&self, job_type: JobType, name: &'static str, job: JobFn) -> bool {
        if self.cancel.load(Ordering::Acquire) {
            return false;
        }

        let Ok(sender) = self.sender.lock() else {
            return false;
        };
        let Some(sender) = sender.as_ref() else {
            return false;
        };

        if let Ok(mut counts) = self.counts.lock() {
            *counts.entry(job_type).or_insert(0) += 1;
        }

        let queued = sender
            .send((Job::new(job_type, name, self.cancel.clone()), job))
            .is_ok();
        if !queued {
            if let Ok(mut counts) = self.counts.lock() {
                if let Some(count) = counts.get_mut(&job_type) {
                    *count = count.saturating_sub(1);
                }
            }
        }
        queued
    }

    fn job_count(&self, job_type: JobType) -> usize {
        self.counts
            .lock()
            .map(|counts| counts.get(&job_type).copied().unwrap_or(0))
            .unwrap_or(0)
    }
}

impl Drop for JobQueue {
    fn drop(&mut self) {
        self.stop();
        // The last reference to the queue may be released by a job running on one of its workers.
        let current = thread::current().id();
        for worker in self.workers.drain(..) {
            if worker.thread().id() != current {
                let _ = worker.join();
            }
        }
    }
}
