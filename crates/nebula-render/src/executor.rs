//! Named worker threads that run compile jobs pulled from a channel.

use std::io;
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender, unbounded};

/// A unit of work for the executor.
pub(crate) type JobFn = Box<dyn FnOnce() + Send + 'static>;

pub(crate) enum Job {
    Run(JobFn),
    Stop,
}

/// Fixed pool of worker threads.
///
/// Workers exit when they receive [`Job::Stop`]; [`Self::shutdown`] sends one
/// per worker and joins them.
pub(crate) struct CompileExecutor {
    jobs: Sender<Job>,
    backlog: Receiver<Job>,
    workers: Vec<JoinHandle<()>>,
}

impl CompileExecutor {
    /// Spawns `threads` workers named `{name}-{i}`.
    pub(crate) fn new(threads: usize, name: &str) -> io::Result<Self> {
        let (jobs, backlog) = unbounded::<Job>();
        let mut executor = Self {
            jobs,
            backlog,
            workers: Vec::with_capacity(threads),
        };
        for i in 0..threads.max(1) {
            let rx = executor.backlog.clone();
            let spawned = std::thread::Builder::new()
                .name(format!("{name}-{i}"))
                .spawn(move || {
                    while let Ok(Job::Run(job)) = rx.recv() {
                        job();
                    }
                });
            match spawned {
                Ok(handle) => executor.workers.push(handle),
                Err(err) => {
                    executor.shutdown();
                    return Err(err);
                }
            }
        }
        tracing::debug!("Spawned {} compile workers", executor.workers.len());
        Ok(executor)
    }

    /// Sender for submitting jobs; usable from any thread.
    pub(crate) fn sender(&self) -> Sender<Job> {
        self.jobs.clone()
    }

    /// Number of live workers.
    pub(crate) fn thread_count(&self) -> usize {
        self.workers.len()
    }

    /// Stops and joins every worker, then drops jobs nobody picked up.
    ///
    /// Jobs queued ahead of the stop messages still run. Idempotent.
    pub(crate) fn shutdown(&mut self) {
        for _ in 0..self.workers.len() {
            let _ = self.jobs.send(Job::Stop);
        }
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                tracing::warn!("Compile worker exited by panic");
            }
        }
        while self.backlog.try_recv().is_ok() {}
    }
}

impl Drop for CompileExecutor {
    fn drop(&mut self) {
        self.shutdown();
    }
}
