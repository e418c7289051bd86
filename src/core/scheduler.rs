//! VM scheduler: worker registry, capacity policy, idle reclamation and
//! status fan-out over a fixed pool of sequencer threads.
//!
//! # Locking
//!
//! Registry mutations, status transitions and the sequencer handback are
//! serialized behind one `parking_lot::Mutex`. Script evaluation never runs
//! under that lock; it happens inside [`Worker::run_one_slice`] on a
//! sequencer thread. Lock order is scheduler state, then eligible queue, then
//! worker internals.
//!
//! # Idle reclamation
//!
//! Idle VMs are reclaimed lazily at the end of mutating calls, at most once
//! per cleanup interval. There is no timer thread: a farm that receives no
//! calls keeps its timed-out VMs until the next call arrives.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::config::SchedulerConfig;
use crate::core::queue::{BoundedDistinctQueue, Entry};
use crate::core::sequencer::{Sequencer, SequencerSource};
use crate::core::{
    EvaluatorRegistry, FarmStatus, Job, JobResult, JobStatus, ResultSink, SchedulerError,
    StatusSink, VmBindings, VmId, VmStatus, Worker, WorkerStatus,
};

const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(100);
const SEQUENCER_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Snapshot of scheduler utilization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerStats {
    /// Scheduler status.
    pub status: FarmStatus,
    /// Registered VMs.
    pub vm_count: usize,
    /// Workers currently waiting in the eligible queue.
    pub eligible_workers: usize,
    /// Jobs accepted so far.
    pub jobs_received: u64,
    /// Jobs that produced a result so far.
    pub jobs_completed: u64,
    /// Configured sequencer threads.
    pub sequencer_count: usize,
    /// Sequencer threads still running.
    pub live_sequencers: usize,
}

#[derive(Debug, Default)]
struct JobCounters {
    received: AtomicU64,
    completed: AtomicU64,
}

/// Counts every delivered result before forwarding it.
struct ResultCounter {
    inner: Arc<dyn ResultSink>,
    counters: Arc<JobCounters>,
}

impl ResultSink for ResultCounter {
    fn on_result(&self, result: JobResult) {
        self.counters.completed.fetch_add(1, Ordering::AcqRel);
        self.inner.on_result(result);
    }
}

struct SchedulerState {
    status: FarmStatus,
    workers: HashMap<VmId, Arc<Worker>>,
    status_sink: Arc<dyn StatusSink>,
    last_cleanup: Instant,
}

impl SchedulerState {
    fn set_status(&mut self, status: FarmStatus) {
        self.status = status;
        self.status_sink.scheduler_status_changed(status);
    }

    const fn ensure_active(&self) -> Result<(), SchedulerError> {
        if matches!(self.status, FarmStatus::Terminated) {
            return Err(SchedulerError::Terminated);
        }
        Ok(())
    }

    fn worker(&self, vm_id: &str) -> Result<&Arc<Worker>, SchedulerError> {
        self.workers
            .get(vm_id)
            .ok_or_else(|| SchedulerError::VmNotFound(vm_id.to_owned()))
    }
}

struct SchedulerInner {
    config: SchedulerConfig,
    registry: Arc<dyn EvaluatorRegistry>,
    queue: BoundedDistinctQueue<Worker>,
    state: Mutex<SchedulerState>,
    results: Arc<dyn ResultSink>,
    counters: Arc<JobCounters>,
    live_sequencers: Arc<AtomicUsize>,
}

impl SchedulerInner {
    /// Remove `vm_id` from the registry and the eligible queue, terminate its
    /// worker and re-open capacity.
    fn terminate_locked(
        &self,
        state: &mut SchedulerState,
        vm_id: &str,
    ) -> Result<(), SchedulerError> {
        let worker = state
            .workers
            .remove(vm_id)
            .ok_or_else(|| SchedulerError::VmNotFound(vm_id.to_owned()))?;
        self.queue.remove(&worker);
        worker.terminate();
        state.status_sink.vm_status_changed(vm_id, VmStatus::NotFound);
        info!(vm_id = %vm_id, "vm terminated");

        if state.workers.len() < self.config.max_vms && state.status == FarmStatus::ActiveFull {
            state.set_status(FarmStatus::Active);
        }
        Ok(())
    }

    /// Reclaim VMs idle for longer than the VM timeout, if the cleanup
    /// interval has elapsed since the last sweep.
    fn cleanup(&self, state: &mut SchedulerState) {
        let now = Instant::now();
        if now.saturating_duration_since(state.last_cleanup) < self.config.cleanup_interval() {
            return;
        }

        let timeout = self.config.vm_timeout();
        let expired: Vec<VmId> = state
            .workers
            .iter()
            .filter(|(_, worker)| worker.idle_longer_than(timeout, now))
            .map(|(vm_id, _)| vm_id.clone())
            .collect();

        for vm_id in expired {
            info!(vm_id = %vm_id, "reclaiming idle vm");
            if let Err(e) = self.terminate_locked(state, &vm_id) {
                // Already gone.
                debug!(vm_id = %vm_id, error = %e, "idle vm vanished before reclamation");
            }
        }

        state.last_cleanup = now;
    }

    /// Put a claimed worker on the eligible queue. Registered workers are
    /// claimed at most once and never exceed the queue capacity.
    fn offer(&self, worker: &Arc<Worker>) {
        if !self.queue.offer_distinct(worker) {
            error!(vm_id = %worker.id(), "eligible queue rejected a claimed worker");
        }
    }

    /// Flip to `Terminated`, stop the sequencers and terminate every VM.
    fn signal_shutdown(&self) -> Result<(), SchedulerError> {
        let mut state = self.state.lock();
        state.ensure_active()?;
        info!(vm_count = state.workers.len(), "shutting down vm scheduler");
        state.status = FarmStatus::Terminated;

        self.queue.clear();
        for _ in 0..self.config.sequencer_count {
            self.queue.offer_terminate();
        }

        let workers: Vec<_> = state.workers.drain().collect();
        for (vm_id, worker) in workers {
            worker.terminate();
            state.status_sink.vm_status_changed(&vm_id, VmStatus::NotFound);
        }

        state.set_status(FarmStatus::Terminated);
        Ok(())
    }
}

impl SequencerSource for SchedulerInner {
    fn take_worker(&self) -> Entry<Worker> {
        self.queue.take()
    }

    fn put_back_worker(&self, worker: Arc<Worker>, idle: bool) {
        let mut state = self.state.lock();
        let registered = state
            .workers
            .get(worker.id())
            .is_some_and(|current| Arc::ptr_eq(current, &worker));

        if worker.status() == WorkerStatus::Terminated {
            // Crashed during its slice, unless it was terminated explicitly and
            // is no longer registered.
            if registered {
                error!(vm_id = %worker.id(), "vm crashed during slice, terminating");
                if let Err(e) = self.terminate_locked(&mut state, worker.id()) {
                    error!(vm_id = %worker.id(), error = %e, "failed to terminate crashed vm");
                }
            }
            return;
        }

        if state.status == FarmStatus::Terminated || !registered {
            return;
        }

        // Re-checked under the worker's lock: a job may have arrived after
        // `idle` was computed.
        let rerun = worker.end_slice();
        debug!(vm_id = %worker.id(), idle, rerun, "worker handed back");
        if rerun {
            self.offer(&worker);
        }
    }
}

/// Multiplexes a fixed pool of sequencer threads over an unbounded set of
/// addressable VMs.
///
/// All operations take `&self` and may be called from any thread.
pub struct VmScheduler {
    inner: Arc<SchedulerInner>,
    sequencers: Mutex<Vec<Sequencer>>,
}

impl VmScheduler {
    /// Create a scheduler and start its sequencer threads.
    ///
    /// Fires `scheduler_status_changed(Active)` on `status_sink`.
    ///
    /// # Errors
    ///
    /// - `SchedulerError::InvalidConfig` if the configuration is invalid
    /// - `SchedulerError::Internal` if a sequencer thread cannot be spawned
    pub fn new(
        config: SchedulerConfig,
        registry: Arc<dyn EvaluatorRegistry>,
        result_sink: Arc<dyn ResultSink>,
        status_sink: Arc<dyn StatusSink>,
    ) -> Result<Self, SchedulerError> {
        config.validate().map_err(SchedulerError::InvalidConfig)?;

        let counters = Arc::new(JobCounters::default());
        let results: Arc<dyn ResultSink> = Arc::new(ResultCounter {
            inner: result_sink,
            counters: Arc::clone(&counters),
        });

        let inner = Arc::new(SchedulerInner {
            queue: BoundedDistinctQueue::new(config.max_vms),
            state: Mutex::new(SchedulerState {
                status: FarmStatus::Active,
                workers: HashMap::new(),
                status_sink,
                last_cleanup: Instant::now(),
            }),
            registry,
            results,
            counters,
            live_sequencers: Arc::new(AtomicUsize::new(0)),
            config,
        });

        let mut sequencers = Vec::with_capacity(inner.config.sequencer_count);
        for id in 0..inner.config.sequencer_count {
            match Sequencer::spawn(
                id,
                Arc::clone(&inner),
                inner.config.time_slice(),
                Arc::clone(&inner.live_sequencers),
            ) {
                Ok(sequencer) => sequencers.push(sequencer),
                Err(e) => {
                    for _ in 0..sequencers.len() {
                        inner.queue.offer_terminate();
                    }
                    return Err(e);
                }
            }
        }

        info!(
            max_vms = inner.config.max_vms,
            max_jobs_per_vm = inner.config.max_jobs_per_vm,
            sequencer_count = inner.config.sequencer_count,
            time_slice_ms = inner.config.time_slice_ms,
            "vm scheduler initialized"
        );
        inner.state.lock().set_status(FarmStatus::Active);

        Ok(Self {
            inner,
            sequencers: Mutex::new(sequencers),
        })
    }

    /// Replace the status sink.
    pub fn set_status_sink(&self, status_sink: Arc<dyn StatusSink>) {
        self.inner.state.lock().status_sink = status_sink;
    }

    /// Create a VM `vm_id` running evaluators of `species`.
    ///
    /// Fires `vm_status_changed(vm_id, Active)`, and
    /// `scheduler_status_changed(ActiveFull)` if the scheduler is now full.
    ///
    /// # Errors
    ///
    /// - `Terminated` after shutdown
    /// - `FarmIsBusy` if the scheduler is full
    /// - `InvalidValue` if `vm_id` is empty
    /// - `SpeciesNotSupported` if `species` is empty or unknown
    /// - `VmAlreadyExists` if `vm_id` is registered
    pub fn spawn(&self, vm_id: &str, species: &str) -> Result<(), SchedulerError> {
        let inner = &self.inner;
        let mut state = inner.state.lock();
        state.ensure_active()?;

        info!(vm_id = %vm_id, species = %species, "spawning vm");

        if state.status == FarmStatus::ActiveFull {
            warn!(vm_id = %vm_id, "spawn rejected: scheduler full");
            return Err(SchedulerError::FarmIsBusy);
        }
        if vm_id.is_empty() {
            return Err(SchedulerError::InvalidValue("empty vm id".into()));
        }
        if species.is_empty() {
            return Err(SchedulerError::SpeciesNotSupported(species.to_owned()));
        }
        if state.workers.contains_key(vm_id) {
            return Err(SchedulerError::VmAlreadyExists(vm_id.to_owned()));
        }
        let evaluator = inner
            .registry
            .lookup(species)
            .ok_or_else(|| SchedulerError::SpeciesNotSupported(species.to_owned()))?;

        let worker = Arc::new(Worker::new(
            vm_id,
            species,
            evaluator,
            inner.config.max_jobs_per_vm,
            Arc::clone(&inner.results),
        ));
        state.workers.insert(vm_id.to_owned(), worker);
        if state.workers.len() >= inner.config.max_vms {
            state.set_status(FarmStatus::ActiveFull);
        }
        state.status_sink.vm_status_changed(vm_id, VmStatus::Active);

        inner.cleanup(&mut state);
        Ok(())
    }

    /// Destroy VM `vm_id`. Every job still queued on it is reported as
    /// aborted; an evaluation already in flight finishes.
    ///
    /// # Errors
    ///
    /// `Terminated` after shutdown, `VmNotFound` if `vm_id` is unknown.
    pub fn terminate(&self, vm_id: &str) -> Result<(), SchedulerError> {
        let mut state = self.inner.state.lock();
        state.ensure_active()?;
        self.inner.terminate_locked(&mut state, vm_id)?;
        self.inner.cleanup(&mut state);
        Ok(())
    }

    /// Queue `job` on VM `vm_id` and make the VM eligible for a slice.
    ///
    /// # Errors
    ///
    /// - `Terminated` after shutdown
    /// - `VmNotFound` if `vm_id` is unknown
    /// - `JobAlreadyExists` if the job id is queued or running on the VM
    /// - `VmIsBusy` if the VM's queue is full
    pub fn schedule_job(&self, vm_id: &str, job: Job) -> Result<(), SchedulerError> {
        let inner = &self.inner;
        let mut state = inner.state.lock();
        state.ensure_active()?;

        let worker = Arc::clone(state.worker(vm_id)?);
        let job_id = job.id.clone();
        worker
            .add_job(job, || {
                inner.counters.received.fetch_add(1, Ordering::AcqRel);
            })
            .inspect_err(|e| {
                warn!(vm_id = %vm_id, job_id = %job_id, error = %e, "job rejected");
            })?;
        debug!(vm_id = %vm_id, job_id = %job_id, "job scheduled");

        // A worker held by a sequencer is re-offered on handback instead.
        if worker.try_schedule() {
            inner.offer(&worker);
        }

        inner.cleanup(&mut state);
        Ok(())
    }

    /// Abort a job that has not started yet. Produces one aborted result.
    ///
    /// # Errors
    ///
    /// `Terminated` after shutdown, `VmNotFound` if `vm_id` is unknown,
    /// `JobNotFound` if the job is not queued (including when it is already
    /// being evaluated).
    pub fn abort_job(&self, vm_id: &str, job_id: &str) -> Result<(), SchedulerError> {
        let mut state = self.inner.state.lock();
        state.ensure_active()?;
        state.worker(vm_id)?.abort_job(job_id)?;
        self.inner.cleanup(&mut state);
        Ok(())
    }

    /// Scheduler status.
    #[must_use]
    pub fn status(&self) -> FarmStatus {
        self.inner.state.lock().status
    }

    /// Status of VM `vm_id`.
    #[must_use]
    pub fn vm_status(&self, vm_id: &str) -> VmStatus {
        if self.inner.state.lock().workers.contains_key(vm_id) {
            VmStatus::Active
        } else {
            VmStatus::NotFound
        }
    }

    /// Status of job `job_id` on VM `vm_id`.
    ///
    /// # Errors
    ///
    /// `VmNotFound` if `vm_id` is unknown, `JobNotFound` if the job is neither
    /// queued nor running.
    pub fn job_status(&self, vm_id: &str, job_id: &str) -> Result<JobStatus, SchedulerError> {
        let state = self.inner.state.lock();
        if state.worker(vm_id)?.job_exists(job_id) {
            Ok(JobStatus::InProgress)
        } else {
            Err(SchedulerError::JobNotFound(job_id.to_owned()))
        }
    }

    /// Snapshot of the named bindings of VM `vm_id`. Unknown names are
    /// skipped. Waits for an evaluation in flight on that VM.
    ///
    /// # Errors
    ///
    /// `Terminated` after shutdown, `VmNotFound` if `vm_id` is unknown.
    pub fn get_bindings<'a, I>(&self, vm_id: &str, names: I) -> Result<VmBindings, SchedulerError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let worker = self.registered_worker(vm_id)?;
        worker.get_bindings(names)
    }

    /// Merge `bindings` into VM `vm_id`'s bindings. Waits for an evaluation in
    /// flight on that VM.
    ///
    /// # Errors
    ///
    /// `Terminated` after shutdown, `VmNotFound` if `vm_id` is unknown.
    pub fn set_bindings(&self, vm_id: &str, bindings: VmBindings) -> Result<(), SchedulerError> {
        let worker = self.registered_worker(vm_id)?;
        worker.set_bindings(bindings)
    }

    /// Shut down: reject further calls, stop every sequencer and terminate
    /// every VM, aborting their queued jobs. Waits up to two seconds per
    /// sequencer for it to exit; stragglers are detached.
    ///
    /// # Errors
    ///
    /// `Terminated` if already shut down.
    pub fn shutdown(&self) -> Result<(), SchedulerError> {
        self.inner.signal_shutdown()?;

        let sequencers = std::mem::take(&mut *self.sequencers.lock());
        let count = sequencers.len();
        for sequencer in sequencers {
            sequencer.join_timeout(SEQUENCER_JOIN_TIMEOUT);
        }

        info!(sequencer_count = count, "vm scheduler shut down");
        Ok(())
    }

    /// Block until every accepted job has produced a result.
    ///
    /// Polls without holding the scheduler lock. Blocks forever if a job never
    /// finishes (an evaluator that hangs, for instance); prefer
    /// [`drain_timeout`](Self::drain_timeout) outside tests.
    pub fn drain_and_wait(&self) {
        while !self.is_drained() {
            thread::sleep(DRAIN_POLL_INTERVAL);
        }
    }

    /// Like [`drain_and_wait`](Self::drain_and_wait) but gives up after
    /// `timeout`. Returns whether the scheduler drained.
    #[must_use]
    pub fn drain_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.is_drained() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            thread::sleep(DRAIN_POLL_INTERVAL.min(deadline - now));
        }
    }

    /// Jobs accepted so far.
    #[must_use]
    pub fn jobs_received(&self) -> u64 {
        self.inner.counters.received.load(Ordering::Acquire)
    }

    /// Jobs that produced a result so far.
    #[must_use]
    pub fn jobs_completed(&self) -> u64 {
        self.inner.counters.completed.load(Ordering::Acquire)
    }

    /// Sequencer threads still running.
    #[must_use]
    pub fn live_sequencers(&self) -> usize {
        self.inner.live_sequencers.load(Ordering::Acquire)
    }

    /// Species this scheduler can spawn.
    #[must_use]
    pub fn species(&self) -> Vec<String> {
        self.inner.registry.species()
    }

    /// Ids of registered VMs, sorted.
    #[must_use]
    pub fn vm_ids(&self) -> Vec<VmId> {
        let mut ids: Vec<_> = self.inner.state.lock().workers.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Configuration the scheduler was built with.
    #[must_use]
    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    /// Current utilization snapshot.
    #[must_use]
    pub fn stats(&self) -> SchedulerStats {
        let state = self.inner.state.lock();
        SchedulerStats {
            status: state.status,
            vm_count: state.workers.len(),
            eligible_workers: self.inner.queue.len(),
            jobs_received: self.jobs_received(),
            jobs_completed: self.jobs_completed(),
            sequencer_count: self.inner.config.sequencer_count,
            live_sequencers: self.live_sequencers(),
        }
    }

    fn is_drained(&self) -> bool {
        // Completed first: it can only catch up with received, never pass it.
        let completed = self.jobs_completed();
        completed >= self.jobs_received()
    }

    fn registered_worker(&self, vm_id: &str) -> Result<Arc<Worker>, SchedulerError> {
        let state = self.inner.state.lock();
        state.ensure_active()?;
        state.worker(vm_id).map(Arc::clone)
    }
}

impl Drop for VmScheduler {
    fn drop(&mut self) {
        // Signal shutdown but don't join sequencers here; an evaluation in
        // flight could stall the drop.
        if self.inner.signal_shutdown().is_ok() {
            debug!("VmScheduler dropped without explicit shutdown - sequencers will be detached");
        }
    }
}

impl std::fmt::Debug for VmScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VmScheduler")
            .field("config", &self.inner.config)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}
