//! # VM Scheduler
//!
//! A scheduler that multiplexes a fixed pool of OS threads over a large,
//! dynamic population of scripting virtual machines.
//!
//! Each VM owns an evaluator, a bounded queue of pending jobs and a set of
//! named bindings. A small pool of *sequencer* threads performs all script
//! execution: a sequencer takes an eligible VM from a shared queue, runs its
//! jobs for at most one time slice, and hands the VM back. A VM is never run
//! by two sequencers at once, and a VM is never queued twice.
//!
//! ## Key Features
//!
//! - **Bounded capacity**: at most `max_vms` VMs and `max_jobs_per_vm` queued
//!   jobs per VM; excess requests are rejected, never blocked
//! - **Fair time slicing**: VMs are served round-robin in FIFO order
//! - **Idle reclamation**: VMs unused for longer than the VM timeout are
//!   destroyed lazily
//! - **Crash isolation**: an evaluator fault or panic terminates only its VM
//! - **Asynchronous results**: results and status changes are pushed to sinks
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use vm_scheduler::builders::SchedulerBuilder;
//! use vm_scheduler::config::SchedulerConfig;
//! use vm_scheduler::core::{InMemoryEventLog, Job, SpeciesRegistry};
//!
//! let log = InMemoryEventLog::new(1024);
//! let scheduler = SchedulerBuilder::new(SchedulerConfig::new().with_sequencer_count(4))
//!     .registry(SpeciesRegistry::new().with("echo", || Box::new(Echo)))
//!     .result_sink(Arc::new(log.clone()))
//!     .status_sink(Arc::new(log.clone()))
//!     .build()?;
//!
//! scheduler.spawn("vm-1", "echo")?;
//! scheduler.schedule_job("vm-1", Job::new("job-1", "1 + 1")?)?;
//! scheduler.drain_and_wait();
//! scheduler.shutdown()?;
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Core scheduling abstractions: queue, workers, sequencers and the scheduler.
pub mod core;
/// Configuration model for capacity and timing policy.
pub mod config;
/// Builders to construct a scheduler from configuration.
pub mod builders;
/// Request/response facade for a farm front end.
pub mod runtime;
/// Shared utilities.
pub mod util;
