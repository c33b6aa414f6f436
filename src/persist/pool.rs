//! Bounded persistence worker pool.
//!
//! Jobs are queued on a bounded channel drained by a fixed set of worker
//! threads.  When the queue is full the submitting thread runs the job
//! itself: the job is never dropped and the number of threads never grows.
//! Submission must happen outside the cache lock.

use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use tracing::{error, trace, warn};

use super::{PersistCause, Persister};
use crate::filter::BloomFilter;

/// One unit of write-back work.  The filter is encoded on the thread that
/// runs the job, not while the cache lock is held.
pub(crate) struct PersistJob {
    pub(crate) key: String,
    pub(crate) filter: BloomFilter,
    pub(crate) cause: PersistCause,
}

pub(crate) struct PersistPool {
    tx: Sender<PersistJob>,
    persister: Arc<dyn Persister>,
}

impl PersistPool {
    /// Spawns `workers` threads sharing a queue of `queue_depth` jobs.
    ///
    /// Workers exit once the pool is dropped and the queue is drained; jobs
    /// already queued are not cancelled.
    pub(crate) fn new(
        persister: Arc<dyn Persister>,
        workers: usize,
        queue_depth: usize,
    ) -> io::Result<Self> {
        let (tx, rx): (Sender<PersistJob>, Receiver<PersistJob>) = bounded(queue_depth);
        for i in 0..workers {
            let rx = rx.clone();
            let persister = Arc::clone(&persister);
            thread::Builder::new()
                .name(format!("bloomlru-persist-{i}"))
                .spawn(move || {
                    for job in rx.iter() {
                        run(&*persister, job);
                    }
                })?;
        }
        Ok(PersistPool { tx, persister })
    }

    /// Hands `job` to a worker, or runs it on the current thread if every
    /// queue slot is taken.
    pub(crate) fn submit(&self, job: PersistJob) {
        match self.tx.try_send(job) {
            Ok(()) => {}
            Err(TrySendError::Full(job)) => {
                warn!(key = %job.key, "persist queue full; writing back inline");
                run(&*self.persister, job);
            }
            Err(TrySendError::Disconnected(job)) => run(&*self.persister, job),
        }
    }
}

fn run(persister: &dyn Persister, job: PersistJob) {
    let state = match job.filter.to_bytes() {
        Ok(state) => state,
        Err(err) => {
            error!(key = %job.key, %err, "failed to encode filter state");
            return;
        }
    };

    match panic::catch_unwind(AssertUnwindSafe(|| persister.persist(&job.key, &state))) {
        Ok(Ok(())) => {
            trace!(key = %job.key, cause = ?job.cause, bytes = state.len(), "persisted");
        }
        Ok(Err(err)) => {
            warn!(key = %job.key, cause = ?job.cause, %err, "persister failed");
        }
        Err(_) => {
            error!(key = %job.key, cause = ?job.cause, "persister panicked");
        }
    }
}
