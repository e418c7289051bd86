//! Core scheduling abstractions: workers, sequencers and the VM scheduler.

pub mod bindings;
pub mod error;
pub mod evaluator;
pub mod job;
pub mod queue;
pub mod scheduler;
pub mod sequencer;
pub mod sink;
pub mod status;
pub mod worker;

pub use bindings::{BindingValue, VmBindings};
pub use error::{AppResult, ErrorKind, SchedulerError};
pub use evaluator::{EvalError, Evaluator, EvaluatorRegistry, SpeciesRegistry};
pub use job::{Job, JobId, JobOutcome, JobResult, Priority, VmId};
pub use queue::{BoundedDistinctQueue, Entry};
pub use scheduler::{SchedulerStats, VmScheduler};
pub use sequencer::{Sequencer, SequencerSource};
pub use sink::{ChannelSink, InMemoryEventLog, NoopSink, ResultSink, StatusEvent, StatusSink};
pub use status::{FarmStatus, JobStatus, VmStatus};
pub use worker::{Worker, WorkerStatus};
