//! Fixed size worker pool: typed jobs in, typed results out.
use crossbeam_channel::unbounded;
use crossbeam_utils::thread::scope;
use log::{debug, error};

use crate::prelude::Error;

/// [WorkerPool] runs independent jobs on a fixed number of scoped threads.
/// [WorkerPool::map] only returns once every job returned, which makes it
/// a barrier between stacking iterations.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WorkerPool {
    workers: usize,
}

impl WorkerPool {
    /// Builds a new [WorkerPool], with at least one worker
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Runs `f` on every job and returns the results in job order.
    /// ## Input
    /// - jobs: job payloads
    /// - f: job processor, shared by all workers
    /// ## Returns
    /// - one result per job
    /// - [Error::WorkerPanicked] if any job panicked
    pub fn map<J, R, F>(&self, jobs: Vec<J>, f: F) -> Result<Vec<R>, Error>
    where
        J: Send,
        R: Send,
        F: Fn(J) -> R + Sync,
    {
        let total = jobs.len();
        if total == 0 {
            return Ok(Vec::new());
        }

        let (sx_job, rx_job) = unbounded();
        let (sx_result, rx_result) = unbounded();

        for job in jobs.into_iter().enumerate() {
            // receiver is alive: cannot fail
            let _ = sx_job.send(job);
        }
        drop(sx_job);

        let workers = self.workers.min(total);
        debug!("dispatching {} jobs over {} workers", total, workers);

        let f = &f;
        let scoped = scope(|scope| {
            for _ in 0..workers {
                let rx_job = rx_job.clone();
                let sx_result = sx_result.clone();
                scope.spawn(move |_| {
                    for (index, job) in rx_job.iter() {
                        if sx_result.send((index, f(job))).is_err() {
                            break;
                        }
                    }
                });
            }
        });

        drop(sx_result);

        if scoped.is_err() {
            error!("worker panicked");
            return Err(Error::WorkerPanicked);
        }

        let mut results = rx_result.iter().collect::<Vec<_>>();
        if results.len() != total {
            return Err(Error::WorkerPanicked);
        }

        results.sort_by_key(|(index, _)| *index);
        Ok(results.into_iter().map(|(_, result)| result).collect())
    }
}
