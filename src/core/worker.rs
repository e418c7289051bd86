//! Execution state of a single VM.
//!
//! A `Worker` owns one evaluator, a bounded FIFO of pending jobs and the VM's
//! bindings. Queue bookkeeping and evaluation use separate locks: callers can
//! enqueue, abort and query while a sequencer is evaluating, and only binding
//! access waits for the evaluation in flight to finish.

use std::any::Any;
use std::collections::VecDeque;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::runtime::Runtime;
use tracing::{debug, error};

use crate::core::{
    BindingValue, EvalError, Evaluator, Job, JobId, JobResult, ResultSink, SchedulerError,
    VmBindings, VmId,
};

/// Lifecycle of a worker. `Terminated` is absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerStatus {
    /// Usable.
    Active,
    /// Terminated explicitly, by shutdown, or after an evaluator crash.
    Terminated,
}

struct WorkerState {
    jobs: VecDeque<Job>,
    /// Job currently being evaluated by a sequencer.
    current: Option<JobId>,
    status: WorkerStatus,
    last_active: Instant,
    /// Held by the eligible queue or by a sequencer.
    scheduled: bool,
}

struct Engine {
    evaluator: Option<Box<dyn Evaluator>>,
    bindings: VmBindings,
}

/// One VM: evaluator, job queue, bindings, activity timestamp and status.
pub struct Worker {
    id: VmId,
    species: String,
    capacity: usize,
    state: Mutex<WorkerState>,
    engine: Mutex<Engine>,
    results: Arc<dyn ResultSink>,
}

impl Worker {
    /// Create an active worker with an empty queue of `capacity` jobs.
    #[must_use]
    pub fn new(
        id: impl Into<VmId>,
        species: impl Into<String>,
        evaluator: Box<dyn Evaluator>,
        capacity: usize,
        results: Arc<dyn ResultSink>,
    ) -> Self {
        Self {
            id: id.into(),
            species: species.into(),
            capacity,
            state: Mutex::new(WorkerState {
                jobs: VecDeque::with_capacity(capacity.min(1024)),
                current: None,
                status: WorkerStatus::Active,
                last_active: Instant::now(),
                scheduled: false,
            }),
            engine: Mutex::new(Engine {
                evaluator: Some(evaluator),
                bindings: VmBindings::new(),
            }),
            results,
        }
    }

    /// VM identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Species the evaluator was created for.
    #[must_use]
    pub fn species(&self) -> &str {
        &self.species
    }

    /// Current lifecycle status.
    #[must_use]
    pub fn status(&self) -> WorkerStatus {
        self.state.lock().status
    }

    /// Last time a job finished or the worker was created.
    #[must_use]
    pub fn last_active(&self) -> Instant {
        self.state.lock().last_active
    }

    /// Number of queued (not yet started) jobs.
    #[must_use]
    pub fn queued_jobs(&self) -> usize {
        self.state.lock().jobs.len()
    }

    /// Append `job` to the queue.
    ///
    /// `on_accept` runs under the queue lock just before the job becomes
    /// visible to sequencers, so anything it counts happens-before the job's
    /// result.
    ///
    /// # Errors
    ///
    /// - `VmNotFound` if the worker is terminated
    /// - `JobAlreadyExists` if a job with the same id is queued or running
    /// - `VmIsBusy` if the queue is at capacity
    pub fn add_job(&self, job: Job, on_accept: impl FnOnce()) -> Result<(), SchedulerError> {
        let mut state = self.state.lock();
        if state.status == WorkerStatus::Terminated {
            return Err(SchedulerError::VmNotFound(self.id.clone()));
        }
        if state.current.as_deref() == Some(job.id.as_str())
            || state.jobs.iter().any(|queued| queued.id == job.id)
        {
            return Err(SchedulerError::JobAlreadyExists(job.id));
        }
        if state.jobs.len() >= self.capacity {
            return Err(SchedulerError::VmIsBusy(self.id.clone()));
        }
        on_accept();
        state.jobs.push_back(job);
        Ok(())
    }

    /// Remove a queued job that has not started and report it as aborted.
    ///
    /// # Errors
    ///
    /// `JobNotFound` if no such job is queued. A job that is already being
    /// evaluated cannot be aborted.
    pub fn abort_job(&self, job_id: &str) -> Result<(), SchedulerError> {
        let job = {
            let mut state = self.state.lock();
            let position = state
                .jobs
                .iter()
                .position(|queued| queued.id == job_id)
                .ok_or_else(|| SchedulerError::JobNotFound(job_id.to_owned()))?;
            state.jobs.remove(position)
        };
        if let Some(job) = job {
            debug!(vm_id = %self.id, job_id = %job.id, "job aborted");
            self.results
                .on_result(JobResult::aborted(&self.id, job.id, "aborted by request"));
        }
        Ok(())
    }

    /// Whether `job_id` is queued or being evaluated.
    #[must_use]
    pub fn job_exists(&self, job_id: &str) -> bool {
        let state = self.state.lock();
        state.current.as_deref() == Some(job_id) || state.jobs.iter().any(|job| job.id == job_id)
    }

    /// Whether the worker has queued jobs to run.
    #[must_use]
    pub fn can_work(&self) -> bool {
        let state = self.state.lock();
        state.status == WorkerStatus::Active && !state.jobs.is_empty()
    }

    /// Claim the worker for the eligible queue.
    ///
    /// Returns `true` if the caller must offer it: the worker is active, has
    /// queued jobs and is neither queued nor held by a sequencer.
    pub fn try_schedule(&self) -> bool {
        let mut state = self.state.lock();
        if state.scheduled || state.status != WorkerStatus::Active || state.jobs.is_empty() {
            return false;
        }
        state.scheduled = true;
        true
    }

    /// Release the claim taken by [`try_schedule`](Self::try_schedule) after a
    /// slice, or after an offer that did not go through.
    ///
    /// Returns `true` if jobs arrived in the meantime and the worker was
    /// claimed again; the caller must then offer it.
    pub fn end_slice(&self) -> bool {
        let mut state = self.state.lock();
        state.scheduled = state.status == WorkerStatus::Active && !state.jobs.is_empty();
        state.scheduled
    }

    /// Whether the worker is queued or held by a sequencer.
    #[must_use]
    pub fn is_scheduled(&self) -> bool {
        self.state.lock().scheduled
    }

    /// Whether the worker has been idle (nothing queued, nothing running) for
    /// at least `timeout` as of `now`.
    #[must_use]
    pub fn idle_longer_than(&self, timeout: Duration, now: Instant) -> bool {
        let state = self.state.lock();
        state.jobs.is_empty()
            && state.current.is_none()
            && now.saturating_duration_since(state.last_active) >= timeout
    }

    /// Evaluate queued jobs in FIFO order until the queue is empty or
    /// `max_duration` has elapsed. At least one job runs if any is queued.
    ///
    /// Each job yields exactly one result, delivered as soon as it finishes.
    /// An evaluator fault or panic terminates the worker: the faulting job and
    /// every job still queued are reported as aborted.
    pub fn run_one_slice(&self, max_duration: Duration, runtime: &Runtime) {
        let start = Instant::now();
        let mut engine = self.engine.lock();

        loop {
            let job = {
                let mut state = self.state.lock();
                if state.status == WorkerStatus::Terminated {
                    break;
                }
                let Some(job) = state.jobs.pop_front() else {
                    break;
                };
                state.current = Some(job.id.clone());
                job
            };

            debug!(vm_id = %self.id, job_id = %job.id, "evaluating job");
            let outcome = evaluate(&mut engine, runtime, &job.source);

            {
                let mut state = self.state.lock();
                state.current = None;
                state.last_active = Instant::now();
            }

            match outcome {
                Ok(value) => {
                    self.results
                        .on_result(JobResult::completed(&self.id, job.id, value));
                }
                Err(EvalError::Script(detail)) => {
                    self.results
                        .on_result(JobResult::evaluation_error(&self.id, job.id, detail));
                }
                Err(EvalError::Fault(detail)) => {
                    error!(vm_id = %self.id, job_id = %job.id, error = %detail, "evaluator crashed");
                    engine.evaluator = None;
                    self.results.on_result(JobResult::aborted(
                        &self.id,
                        job.id,
                        format!("evaluator crashed: {detail}"),
                    ));
                    self.terminate_with("evaluator crashed");
                    break;
                }
            }

            if start.elapsed() >= max_duration {
                break;
            }
        }

        // Terminated while a job was in flight; release the evaluator now.
        if engine.evaluator.is_some() && self.status() == WorkerStatus::Terminated {
            engine.evaluator = None;
        }
    }

    /// Snapshot of the requested bindings. Waits for an evaluation in flight.
    ///
    /// # Errors
    ///
    /// `VmNotFound` if the worker is terminated.
    pub fn get_bindings<'a, I>(&self, names: I) -> Result<VmBindings, SchedulerError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        self.ensure_active()?;
        Ok(self.engine.lock().bindings.subset(names))
    }

    /// Merge `bindings` into the VM's bindings, overwriting on collision.
    /// Waits for an evaluation in flight.
    ///
    /// # Errors
    ///
    /// `VmNotFound` if the worker is terminated.
    pub fn set_bindings(&self, bindings: VmBindings) -> Result<(), SchedulerError> {
        self.ensure_active()?;
        self.engine.lock().bindings.merge(bindings);
        Ok(())
    }

    /// Terminate the worker, reporting every queued job as aborted and
    /// releasing the evaluator. An evaluation already in flight finishes
    /// normally. Idempotent.
    pub fn terminate(&self) {
        self.terminate_with("vm terminated");
    }

    fn terminate_with(&self, reason: &str) {
        let drained: Vec<Job> = {
            let mut state = self.state.lock();
            state.status = WorkerStatus::Terminated;
            state.jobs.drain(..).collect()
        };
        // If a sequencer holds the engine, it releases the evaluator when its
        // slice ends.
        if let Some(mut engine) = self.engine.try_lock() {
            engine.evaluator = None;
        }
        for job in drained {
            self.results
                .on_result(JobResult::aborted(&self.id, job.id, reason));
        }
    }

    fn ensure_active(&self) -> Result<(), SchedulerError> {
        if self.status() == WorkerStatus::Terminated {
            return Err(SchedulerError::VmNotFound(self.id.clone()));
        }
        Ok(())
    }
}

impl fmt::Debug for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Worker")
            .field("id", &self.id)
            .field("species", &self.species)
            .field("status", &state.status)
            .field("queued_jobs", &state.jobs.len())
            .field("current", &state.current)
            .field("scheduled", &state.scheduled)
            .finish_non_exhaustive()
    }
}

/// Run one evaluation, converting panics into faults.
fn evaluate(engine: &mut Engine, runtime: &Runtime, source: &str) -> Result<BindingValue, EvalError> {
    let Engine {
        evaluator,
        bindings,
    } = engine;
    let Some(evaluator) = evaluator.as_mut() else {
        return Err(EvalError::Fault("evaluator released".into()));
    };
    panic::catch_unwind(AssertUnwindSafe(|| {
        runtime.block_on(evaluator.evaluate(source, bindings))
    }))
    .unwrap_or_else(|payload| Err(EvalError::Fault(panic_detail(payload.as_ref()))))
}

fn panic_detail(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "evaluator panicked".to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ErrorKind, InMemoryEventLog, JobOutcome};
    use async_trait::async_trait;

    /// Understands `sleep <ms>`, `set <name> <value>`, `get <name>`, `fail`,
    /// `crash`, `panic`; echoes anything else.
    struct ScriptedEvaluator;

    #[async_trait]
    impl Evaluator for ScriptedEvaluator {
        async fn evaluate(
            &mut self,
            source: &str,
            bindings: &mut VmBindings,
        ) -> Result<BindingValue, EvalError> {
            let mut parts = source.split_whitespace();
            match (parts.next(), parts.next(), parts.next()) {
                (Some("sleep"), Some(ms), _) => {
                    let ms: u64 = ms.parse().unwrap();
                    std::thread::sleep(Duration::from_millis(ms));
                    Ok(BindingValue::Number(ms as f64))
                }
                (Some("set"), Some(name), Some(value)) => {
                    bindings.insert(name, value);
                    Ok(BindingValue::Boolean(true))
                }
                (Some("get"), Some(name), _) => bindings
                    .get(name)
                    .cloned()
                    .ok_or_else(|| EvalError::Script(format!("{name} is not bound"))),
                (Some("fail"), _, _) => Err(EvalError::Script("failed on purpose".into())),
                (Some("crash"), _, _) => Err(EvalError::Fault("corrupted".into())),
                (Some("panic"), _, _) => panic!("evaluator blew up"),
                _ => Ok(BindingValue::String(source.to_owned())),
            }
        }
    }

    fn runtime() -> Runtime {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap()
    }

    fn worker(capacity: usize) -> (Worker, InMemoryEventLog) {
        let log = InMemoryEventLog::new(256);
        let worker = Worker::new(
            "vm@farm/1",
            "scripted",
            Box::new(ScriptedEvaluator),
            capacity,
            Arc::new(log.clone()),
        );
        (worker, log)
    }

    fn job(id: &str, source: &str) -> Job {
        Job::new(id, source).unwrap()
    }

    #[test]
    fn test_add_job_respects_capacity() {
        let (w, _) = worker(2);
        w.add_job(job("1", "a"), || {}).unwrap();
        w.add_job(job("2", "b"), || {}).unwrap();

        let err = w.add_job(job("3", "c"), || {}).unwrap_err();
        assert_eq!(err, SchedulerError::VmIsBusy("vm@farm/1".into()));
        assert_eq!(w.queued_jobs(), 2);
    }

    #[test]
    fn test_add_job_rejects_duplicate_id() {
        let (w, _) = worker(4);
        let mut accepted = 0;
        w.add_job(job("1", "a"), || accepted += 1).unwrap();
        let err = w.add_job(job("1", "b"), || accepted += 1).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::JobAlreadyExists);
        assert_eq!(accepted, 1);
    }

    #[test]
    fn test_slice_runs_jobs_in_fifo_order() {
        let (w, log) = worker(8);
        for (id, src) in [("1", "one"), ("2", "two"), ("3", "three")] {
            w.add_job(job(id, src), || {}).unwrap();
        }
        assert!(w.can_work());

        w.run_one_slice(Duration::from_secs(5), &runtime());

        let ids: Vec<_> = log.results().into_iter().map(|r| r.job_id).collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
        assert!(!w.can_work());
    }

    #[test]
    fn test_slice_stops_after_time_budget() {
        let (w, log) = worker(8);
        w.add_job(job("1", "sleep 30"), || {}).unwrap();
        w.add_job(job("2", "sleep 30"), || {}).unwrap();
        w.add_job(job("3", "sleep 30"), || {}).unwrap();

        w.run_one_slice(Duration::from_millis(10), &runtime());

        assert_eq!(log.results().len(), 1);
        assert!(w.can_work());
        assert_eq!(w.queued_jobs(), 2);
    }

    #[test]
    fn test_bindings_visible_to_scripts() {
        let (w, log) = worker(8);
        w.set_bindings(VmBindings::new().with("greeting", "hi")).unwrap();
        w.add_job(job("1", "get greeting"), || {}).unwrap();
        w.add_job(job("2", "set answer 42"), || {}).unwrap();
        w.add_job(job("3", "get nothing"), || {}).unwrap();
        w.run_one_slice(Duration::from_secs(5), &runtime());

        let results = log.results();
        assert_eq!(results[0].value(), Some(&BindingValue::from("hi")));
        assert_eq!(results[2].error_kind(), Some(ErrorKind::EvaluationError));

        let snapshot = w.get_bindings(["answer", "greeting", "missing"]).unwrap();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.get("answer"), Some(&BindingValue::from("42")));
        assert_eq!(w.status(), WorkerStatus::Active);
    }

    #[test]
    fn test_abort_queued_job() {
        let (w, log) = worker(8);
        w.add_job(job("1", "a"), || {}).unwrap();
        w.add_job(job("2", "b"), || {}).unwrap();

        w.abort_job("1").unwrap();
        assert!(!w.job_exists("1"));
        assert!(w.job_exists("2"));
        assert_eq!(
            w.abort_job("1").unwrap_err(),
            SchedulerError::JobNotFound("1".into())
        );

        let results = log.results();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].job_id, "1");
        assert_eq!(results[0].error_kind(), Some(ErrorKind::JobAborted));
    }

    #[test]
    fn test_fault_terminates_and_drains() {
        let (w, log) = worker(8);
        w.add_job(job("1", "ok"), || {}).unwrap();
        w.add_job(job("2", "crash"), || {}).unwrap();
        w.add_job(job("3", "never"), || {}).unwrap();
        w.add_job(job("4", "never"), || {}).unwrap();

        w.run_one_slice(Duration::from_secs(5), &runtime());

        assert_eq!(w.status(), WorkerStatus::Terminated);
        let results = log.results();
        assert_eq!(results.len(), 4);
        assert!(results[0].value().is_some());
        for result in &results[1..] {
            assert_eq!(result.error_kind(), Some(ErrorKind::JobAborted));
        }
        assert!(matches!(
            &results[1].outcome,
            JobOutcome::Aborted { detail } if detail.contains("corrupted")
        ));
        assert!(w.get_bindings(["x"]).is_err());
    }

    #[test]
    fn test_panic_is_treated_as_fault() {
        let (w, log) = worker(8);
        w.add_job(job("1", "panic"), || {}).unwrap();
        w.add_job(job("2", "after"), || {}).unwrap();

        w.run_one_slice(Duration::from_secs(5), &runtime());

        assert_eq!(w.status(), WorkerStatus::Terminated);
        let results = log.results();
        assert_eq!(results.len(), 2);
        assert!(matches!(
            &results[0].outcome,
            JobOutcome::Aborted { detail } if detail.contains("evaluator blew up")
        ));
    }

    #[test]
    fn test_terminate_aborts_each_queued_job_once() {
        let (w, log) = worker(8);
        for i in 0..5 {
            w.add_job(job(&i.to_string(), "x"), || {}).unwrap();
        }

        w.terminate();
        w.terminate();

        assert_eq!(log.results().len(), 5);
        assert!(!w.can_work());
        assert_eq!(
            w.add_job(job("9", "x"), || {}).unwrap_err().kind(),
            ErrorKind::VmNotFound
        );
    }

    #[test]
    fn test_idle_detection() {
        let (w, _) = worker(8);
        let created = w.last_active();
        assert!(!w.idle_longer_than(Duration::from_secs(60), created));
        assert!(w.idle_longer_than(
            Duration::from_secs(60),
            created + Duration::from_secs(61)
        ));

        w.add_job(job("1", "x"), || {}).unwrap();
        assert!(!w.idle_longer_than(Duration::ZERO, Instant::now()));
    }

    #[test]
    fn test_schedule_claim_is_exclusive() {
        let (w, _) = worker(8);
        assert!(!w.try_schedule());

        w.add_job(job("1", "x"), || {}).unwrap();
        assert!(w.try_schedule());
        // Held: more jobs must not produce another offer.
        w.add_job(job("2", "x"), || {}).unwrap();
        assert!(!w.try_schedule());
        assert!(w.is_scheduled());

        // Jobs still queued at handback keep the claim for another round.
        assert!(w.end_slice());
        assert!(w.is_scheduled());

        let rt = runtime();
        w.run_one_slice(Duration::from_secs(5), &rt);
        assert!(!w.end_slice());
        assert!(!w.is_scheduled());
        assert!(!w.try_schedule());
    }

    #[test]
    fn test_terminated_worker_is_never_claimed() {
        let (w, _) = worker(8);
        w.add_job(job("1", "x"), || {}).unwrap();
        w.terminate();
        assert!(!w.try_schedule());
        assert!(!w.end_slice());
    }
}
