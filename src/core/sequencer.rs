//! Fixed pool of sequencer threads that perform all job execution.
//!
//! Each sequencer is a dedicated OS thread with its own single-threaded tokio
//! runtime. It blocks on the eligible-worker queue, runs one time slice on the
//! worker it receives, and hands the worker back. The pool size is fixed at
//! construction and independent of how many VMs exist.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error, warn};

use crate::core::queue::Entry;
use crate::core::{SchedulerError, Worker};

/// Where sequencers get workers from and return them to.
pub trait SequencerSource: Send + Sync + 'static {
    /// Block until a worker (or the termination sentinel) is available.
    fn take_worker(&self) -> Entry<Worker>;

    /// Return a worker after its slice. `idle` is true when it has no more
    /// queued jobs.
    fn put_back_worker(&self, worker: Arc<Worker>, idle: bool);
}

/// Decrements the live-thread count when the sequencer thread ends, panics
/// included.
struct LiveGuard(Arc<AtomicUsize>);

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Handle to one running sequencer thread.
#[derive(Debug)]
pub struct Sequencer {
    id: usize,
    handle: JoinHandle<()>,
}

impl Sequencer {
    /// Spawn sequencer `id`, pulling work from `source` and running slices of
    /// at most `time_slice`. `live` counts running sequencer threads.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::Internal` if the OS thread cannot be spawned.
    pub fn spawn<S: SequencerSource>(
        id: usize,
        source: Arc<S>,
        time_slice: Duration,
        live: Arc<AtomicUsize>,
    ) -> Result<Self, SchedulerError> {
        live.fetch_add(1, Ordering::AcqRel);
        let guard = LiveGuard(Arc::clone(&live));

        let handle = thread::Builder::new()
            .name(format!("vm-sequencer-{id}"))
            .spawn(move || {
                let _guard = guard;
                run(id, source.as_ref(), time_slice);
            })
            .map_err(|e| {
                // The closure (and its guard) was dropped with the failed spawn.
                SchedulerError::Internal(format!("failed to spawn sequencer {id}: {e}"))
            })?;

        Ok(Self { id, handle })
    }

    /// Sequencer index.
    #[must_use]
    pub const fn id(&self) -> usize {
        self.id
    }

    /// Whether the thread has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait up to `timeout` for the thread to exit. A thread that does not exit
    /// in time is detached.
    pub fn join_timeout(self, timeout: Duration) {
        let id = self.id;
        let (tx, rx) = crossbeam_channel::bounded(1);
        let join_thread = thread::spawn(move || {
            let result = self.handle.join();
            let _ = tx.send(result.is_ok());
        });

        match rx.recv_timeout(timeout) {
            Ok(true) => {
                debug!(sequencer_id = id, "sequencer joined");
                let _ = join_thread.join();
            }
            Ok(false) => {
                warn!(sequencer_id = id, "sequencer panicked");
                let _ = join_thread.join();
            }
            Err(_) => {
                warn!(sequencer_id = id, "sequencer did not exit within timeout - detaching");
            }
        }
    }
}

fn run<S: SequencerSource>(id: usize, source: &S, time_slice: Duration) {
    debug!(sequencer_id = id, "sequencer started");

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!(sequencer_id = id, error = %e, "failed to create sequencer runtime");
            return;
        }
    };

    loop {
        let worker = match source.take_worker() {
            Entry::Item(worker) => worker,
            Entry::Terminate => break,
        };

        debug!(sequencer_id = id, vm_id = %worker.id(), "running slice");
        worker.run_one_slice(time_slice, &runtime);

        let idle = !worker.can_work();
        source.put_back_worker(worker, idle);
    }

    debug!(sequencer_id = id, "sequencer exiting");
}
