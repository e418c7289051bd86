//! Result and status sinks.
//!
//! Provides the listener traits the scheduler reports to, a channel-backed
//! sink for front ends, and a bounded in-memory event log for testing and dev.

use std::collections::VecDeque;
use std::sync::Arc;

use crossbeam_channel::Sender;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::{FarmStatus, JobResult, VmStatus};

/// Receives terminal job outcomes.
///
/// Called from sequencer threads as jobs finish, and from caller threads when
/// jobs are aborted or orphaned. Must not call back into the scheduler.
pub trait ResultSink: Send + Sync {
    /// Handle one job result. Called exactly once per accepted job.
    fn on_result(&self, result: JobResult);
}

/// Receives scheduler and VM status transitions.
///
/// Called while the scheduler lock is held; implementations must not call
/// back into the scheduler.
pub trait StatusSink: Send + Sync {
    /// The scheduler moved to `status`.
    fn scheduler_status_changed(&self, status: FarmStatus);

    /// The VM `vm_id` moved to `status`.
    fn vm_status_changed(&self, vm_id: &str, status: VmStatus);
}

/// Sink that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl ResultSink for NoopSink {
    fn on_result(&self, _result: JobResult) {}
}

impl StatusSink for NoopSink {
    fn scheduler_status_changed(&self, _status: FarmStatus) {}

    fn vm_status_changed(&self, _vm_id: &str, _status: VmStatus) {}
}

/// A status transition, as forwarded or recorded by the sinks in this module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "target", rename_all = "snake_case")]
pub enum StatusEvent {
    /// Scheduler status change.
    Scheduler {
        /// New status.
        status: FarmStatus,
    },
    /// VM status change.
    Vm {
        /// VM identifier.
        vm_id: String,
        /// New status.
        status: VmStatus,
    },
}

/// Forwards results and status events into crossbeam channels.
///
/// Disconnected receivers are tolerated; the event is dropped.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    results: Option<Sender<JobResult>>,
    events: Option<Sender<StatusEvent>>,
}

impl ChannelSink {
    /// Create a sink forwarding to the given senders. `None` discards that
    /// stream.
    #[must_use]
    pub const fn new(
        results: Option<Sender<JobResult>>,
        events: Option<Sender<StatusEvent>>,
    ) -> Self {
        Self { results, events }
    }

    fn send_event(&self, event: StatusEvent) {
        if let Some(tx) = &self.events {
            if tx.send(event).is_err() {
                debug!("status receiver disconnected, dropping event");
            }
        }
    }
}

impl ResultSink for ChannelSink {
    fn on_result(&self, result: JobResult) {
        if let Some(tx) = &self.results {
            if let Err(e) = tx.send(result) {
                debug!(job_id = %e.0.job_id, "result receiver disconnected, dropping result");
            }
        }
    }
}

impl StatusSink for ChannelSink {
    fn scheduler_status_changed(&self, status: FarmStatus) {
        self.send_event(StatusEvent::Scheduler { status });
    }

    fn vm_status_changed(&self, vm_id: &str, status: VmStatus) {
        self.send_event(StatusEvent::Vm {
            vm_id: vm_id.to_owned(),
            status,
        });
    }
}

#[derive(Debug)]
struct EventLogInner {
    results: VecDeque<JobResult>,
    events: VecDeque<StatusEvent>,
}

/// Bounded in-memory recorder of results and status events.
///
/// Each stream keeps at most `max_entries` items; the oldest is dropped first.
/// Clones share the same log.
#[derive(Debug, Clone)]
pub struct InMemoryEventLog {
    inner: Arc<Mutex<EventLogInner>>,
    max_entries: usize,
}

impl InMemoryEventLog {
    /// Create a new log with a bounded buffer per stream.
    #[must_use]
    pub fn new(max_entries: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(EventLogInner {
                results: VecDeque::with_capacity(max_entries.min(1024)),
                events: VecDeque::with_capacity(max_entries.min(1024)),
            })),
            max_entries,
        }
    }

    /// Snapshot of recorded results, oldest first.
    #[must_use]
    pub fn results(&self) -> Vec<JobResult> {
        self.inner.lock().results.iter().cloned().collect()
    }

    /// Snapshot of recorded status events, oldest first.
    #[must_use]
    pub fn events(&self) -> Vec<StatusEvent> {
        self.inner.lock().events.iter().cloned().collect()
    }

    /// Recorded results for one VM, oldest first.
    #[must_use]
    pub fn results_for(&self, vm_id: &str) -> Vec<JobResult> {
        self.inner
            .lock()
            .results
            .iter()
            .filter(|r| r.vm_id == vm_id)
            .cloned()
            .collect()
    }

    fn record_event(&self, event: StatusEvent) {
        let mut inner = self.inner.lock();
        if inner.events.len() >= self.max_entries {
            inner.events.pop_front();
        }
        inner.events.push_back(event);
    }
}

impl ResultSink for InMemoryEventLog {
    fn on_result(&self, result: JobResult) {
        let mut inner = self.inner.lock();
        if inner.results.len() >= self.max_entries {
            inner.results.pop_front();
        }
        inner.results.push_back(result);
    }
}

impl StatusSink for InMemoryEventLog {
    fn scheduler_status_changed(&self, status: FarmStatus) {
        self.record_event(StatusEvent::Scheduler { status });
    }

    fn vm_status_changed(&self, vm_id: &str, status: VmStatus) {
        self.record_event(StatusEvent::Vm {
            vm_id: vm_id.to_owned(),
            status,
        });
    }
}
