//! Error types for scheduler operations.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced by scheduler components.
///
/// Every caller-facing failure is one of these variants. Failures that happen
/// inside a running job never surface here; they are delivered as a
/// [`JobResult`](crate::core::JobResult) instead.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulerError {
    /// No VM is registered under the given id.
    #[error("vm not found: {0}")]
    VmNotFound(String),
    /// A VM is already registered under the given id.
    #[error("vm already exists: {0}")]
    VmAlreadyExists(String),
    /// The VM's job queue is at capacity.
    #[error("vm is busy: {0}")]
    VmIsBusy(String),
    /// The scheduler already hosts its maximum number of VMs.
    #[error("farm is busy")]
    FarmIsBusy,
    /// No evaluator is registered for the requested species.
    #[error("species not supported: {0:?}")]
    SpeciesNotSupported(String),
    /// No queued or running job has the given id.
    #[error("job not found: {0}")]
    JobNotFound(String),
    /// A job with the given id is already queued or running on the VM.
    #[error("job already exists: {0}")]
    JobAlreadyExists(String),
    /// A malformed argument, such as an empty identifier.
    #[error("invalid value: {0}")]
    InvalidValue(String),
    /// The scheduler has been shut down.
    #[error("scheduler has been terminated")]
    Terminated,
    /// Configuration validation failed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// Internal failure (sequencer thread could not be spawned, etc.).
    #[error("internal error: {0}")]
    Internal(String),
}

impl SchedulerError {
    /// Wire-level error kind for this failure.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::VmNotFound(_) => ErrorKind::VmNotFound,
            Self::VmAlreadyExists(_) => ErrorKind::VmAlreadyExists,
            Self::VmIsBusy(_) => ErrorKind::VmIsBusy,
            Self::FarmIsBusy => ErrorKind::FarmIsBusy,
            Self::SpeciesNotSupported(_) => ErrorKind::SpeciesNotSupported,
            Self::JobNotFound(_) => ErrorKind::JobNotFound,
            Self::JobAlreadyExists(_) => ErrorKind::JobAlreadyExists,
            Self::InvalidValue(_) | Self::InvalidConfig(_) => ErrorKind::InvalidValue,
            Self::Terminated | Self::Internal(_) => ErrorKind::InternalError,
        }
    }
}

/// Error taxonomy shared by caller-facing failures and terminal job results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Unknown VM.
    VmNotFound,
    /// Duplicate VM id.
    VmAlreadyExists,
    /// Per-VM job queue full.
    VmIsBusy,
    /// Scheduler at VM capacity.
    FarmIsBusy,
    /// Unknown evaluator species.
    SpeciesNotSupported,
    /// Unknown job.
    JobNotFound,
    /// Duplicate job id on a VM.
    JobAlreadyExists,
    /// Job was aborted or orphaned by VM termination.
    JobAborted,
    /// Evaluator raised an error while running the job.
    EvaluationError,
    /// Malformed argument.
    InvalidValue,
    /// Scheduler-side failure.
    InternalError,
}

impl ErrorKind {
    const ALL: [Self; 11] = [
        Self::VmNotFound,
        Self::VmAlreadyExists,
        Self::VmIsBusy,
        Self::FarmIsBusy,
        Self::SpeciesNotSupported,
        Self::JobNotFound,
        Self::JobAlreadyExists,
        Self::JobAborted,
        Self::EvaluationError,
        Self::InvalidValue,
        Self::InternalError,
    ];

    /// Wire name of this kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::VmNotFound => "vm_not_found",
            Self::VmAlreadyExists => "vm_already_exists",
            Self::VmIsBusy => "vm_is_busy",
            Self::FarmIsBusy => "farm_is_busy",
            Self::SpeciesNotSupported => "species_not_supported",
            Self::JobNotFound => "job_not_found",
            Self::JobAlreadyExists => "job_already_exists",
            Self::JobAborted => "job_aborted",
            Self::EvaluationError => "evaluation_error",
            Self::InvalidValue => "invalid_value",
            Self::InternalError => "internal_error",
        }
    }

    /// Look up a kind by its wire name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == name)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
