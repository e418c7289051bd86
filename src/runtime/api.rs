//! API-facing request/response models.
//!
//! A front end decodes a [`FarmRequest`], hands it to [`dispatch`] and encodes
//! the [`FarmResponse`]. Job results are not returned here; they arrive
//! through the scheduler's result sink.

use serde::{Deserialize, Serialize};

use crate::core::{
    ErrorKind, FarmStatus, Job, JobId, JobStatus, Priority, SchedulerError, VmBindings, VmId,
    VmScheduler, VmStatus,
};

/// A farm operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum FarmRequest {
    /// Create a VM.
    SpawnVm {
        /// VM identifier.
        vm_id: VmId,
        /// Evaluator species.
        species: String,
    },
    /// Destroy a VM.
    TerminateVm {
        /// VM identifier.
        vm_id: VmId,
    },
    /// Queue a script on a VM. A missing job id is generated.
    SubmitJob {
        /// VM identifier.
        vm_id: VmId,
        /// Job identifier.
        #[serde(default)]
        job_id: Option<JobId>,
        /// Script source.
        source: String,
        /// Job priority.
        #[serde(default)]
        priority: Option<i32>,
    },
    /// Abort a queued job.
    AbortJob {
        /// VM identifier.
        vm_id: VmId,
        /// Job identifier.
        job_id: JobId,
    },
    /// Query a job.
    JobStatus {
        /// VM identifier.
        vm_id: VmId,
        /// Job identifier.
        job_id: JobId,
    },
    /// Query a VM.
    VmStatus {
        /// VM identifier.
        vm_id: VmId,
    },
    /// Query the scheduler.
    FarmStatus,
    /// Read bindings.
    GetBindings {
        /// VM identifier.
        vm_id: VmId,
        /// Binding names.
        names: Vec<String>,
    },
    /// Merge bindings.
    SetBindings {
        /// VM identifier.
        vm_id: VmId,
        /// Bindings to merge.
        bindings: VmBindings,
    },
}

/// Outcome of a [`FarmRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FarmResponse {
    /// The operation succeeded with nothing to report.
    Ok,
    /// A job was accepted.
    JobAccepted {
        /// VM identifier.
        vm_id: VmId,
        /// Job identifier, generated if the request had none.
        job_id: JobId,
    },
    /// Job status.
    JobStatus {
        /// Job identifier.
        job_id: JobId,
        /// Status.
        status: JobStatus,
    },
    /// VM status.
    VmStatus {
        /// VM identifier.
        vm_id: VmId,
        /// Status.
        status: VmStatus,
    },
    /// Scheduler status.
    FarmStatus {
        /// Status.
        status: FarmStatus,
        /// Species available for spawning.
        species: Vec<String>,
    },
    /// Requested bindings.
    Bindings {
        /// VM identifier.
        vm_id: VmId,
        /// Bindings found.
        bindings: VmBindings,
    },
    /// The operation failed.
    Error {
        /// Wire error kind.
        kind: ErrorKind,
        /// Human-readable detail.
        message: String,
    },
}

impl From<SchedulerError> for FarmResponse {
    fn from(err: SchedulerError) -> Self {
        Self::Error {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Execute `request` against `scheduler`.
pub fn dispatch(scheduler: &VmScheduler, request: FarmRequest) -> FarmResponse {
    execute(scheduler, request).unwrap_or_else(FarmResponse::from)
}

fn execute(scheduler: &VmScheduler, request: FarmRequest) -> Result<FarmResponse, SchedulerError> {
    match request {
        FarmRequest::SpawnVm { vm_id, species } => {
            scheduler.spawn(&vm_id, &species)?;
            Ok(FarmResponse::Ok)
        }
        FarmRequest::TerminateVm { vm_id } => {
            scheduler.terminate(&vm_id)?;
            Ok(FarmResponse::Ok)
        }
        FarmRequest::SubmitJob {
            vm_id,
            job_id,
            source,
            priority,
        } => {
            let mut job = match job_id {
                Some(id) => Job::new(id, source)?,
                None => Job::with_generated_id(source),
            };
            if let Some(priority) = priority {
                job = job.with_priority(Priority::new(priority)?);
            }
            let job_id = job.id.clone();
            scheduler.schedule_job(&vm_id, job)?;
            Ok(FarmResponse::JobAccepted { vm_id, job_id })
        }
        FarmRequest::AbortJob { vm_id, job_id } => {
            scheduler.abort_job(&vm_id, &job_id)?;
            Ok(FarmResponse::Ok)
        }
        FarmRequest::JobStatus { vm_id, job_id } => {
            let status = scheduler.job_status(&vm_id, &job_id)?;
            Ok(FarmResponse::JobStatus { job_id, status })
        }
        FarmRequest::VmStatus { vm_id } => {
            let status = scheduler.vm_status(&vm_id);
            Ok(FarmResponse::VmStatus { vm_id, status })
        }
        FarmRequest::FarmStatus => Ok(FarmResponse::FarmStatus {
            status: scheduler.status(),
            species: scheduler.species(),
        }),
        FarmRequest::GetBindings { vm_id, names } => {
            let bindings = scheduler.get_bindings(&vm_id, names.iter().map(String::as_str))?;
            Ok(FarmResponse::Bindings { vm_id, bindings })
        }
        FarmRequest::SetBindings { vm_id, bindings } => {
            scheduler.set_bindings(&vm_id, bindings)?;
            Ok(FarmResponse::Ok)
        }
    }
}
