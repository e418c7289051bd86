//! Jobs submitted to VMs and the results they produce.

use serde::{Deserialize, Serialize};

use crate::core::{BindingValue, ErrorKind, SchedulerError};

/// Caller-supplied job identifier, unique per VM at a given time.
pub type JobId = String;

/// Opaque VM identifier.
pub type VmId = String;

/// Job priority in `[-128, 127]`.
///
/// Accepted and carried with the job, but jobs are evaluated in FIFO order
/// regardless of priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Priority(i8);

impl Priority {
    /// Lowest accepted priority.
    pub const LOWEST: Self = Self(i8::MIN);
    /// Highest accepted priority.
    pub const HIGHEST: Self = Self(i8::MAX);
    /// Priority given to jobs that do not specify one.
    pub const DEFAULT: Self = Self(0);

    /// Validate a priority supplied as a wider integer.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::InvalidValue` if `value` is outside `[-128, 127]`.
    pub fn new(value: i32) -> Result<Self, SchedulerError> {
        i8::try_from(value).map(Self).map_err(|_| {
            SchedulerError::InvalidValue(format!("priority {value} outside [-128, 127]"))
        })
    }

    /// Raw priority value.
    #[must_use]
    pub const fn value(self) -> i8 {
        self.0
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// A unit of submitted work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    /// Job identifier.
    pub id: JobId,
    /// Script text to evaluate.
    pub source: String,
    /// Priority (carried, not used for ordering).
    #[serde(default)]
    pub priority: Priority,
}

impl Job {
    /// Create a job with the default priority.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::InvalidValue` if `id` is empty.
    pub fn new(id: impl Into<JobId>, source: impl Into<String>) -> Result<Self, SchedulerError> {
        let id = id.into();
        if id.is_empty() {
            return Err(SchedulerError::InvalidValue("empty job id".into()));
        }
        Ok(Self {
            id,
            source: source.into(),
            priority: Priority::DEFAULT,
        })
    }

    /// Create a job with a freshly generated id.
    #[must_use]
    pub fn with_generated_id(source: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            source: source.into(),
            priority: Priority::DEFAULT,
        }
    }

    /// Set the job priority.
    #[must_use]
    pub const fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }
}

/// Terminal outcome of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum JobOutcome {
    /// The script evaluated to a value.
    Completed {
        /// Evaluation result.
        value: BindingValue,
    },
    /// The evaluator raised an error.
    EvaluationError {
        /// Evaluator-supplied detail.
        detail: String,
    },
    /// The job was aborted before it ran, orphaned by VM termination, or
    /// running when its VM crashed.
    Aborted {
        /// Why the job was aborted.
        detail: String,
    },
}

/// Outcome of one accepted job, delivered exactly once to the result sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    /// Job identifier.
    pub job_id: JobId,
    /// VM the job was submitted to.
    pub vm_id: VmId,
    /// Terminal outcome.
    #[serde(flatten)]
    pub outcome: JobOutcome,
}

impl JobResult {
    pub(crate) fn completed(vm_id: &str, job_id: JobId, value: BindingValue) -> Self {
        Self {
            job_id,
            vm_id: vm_id.to_owned(),
            outcome: JobOutcome::Completed { value },
        }
    }

    pub(crate) fn evaluation_error(vm_id: &str, job_id: JobId, detail: String) -> Self {
        Self {
            job_id,
            vm_id: vm_id.to_owned(),
            outcome: JobOutcome::EvaluationError { detail },
        }
    }

    pub(crate) fn aborted(vm_id: &str, job_id: JobId, detail: impl Into<String>) -> Self {
        Self {
            job_id,
            vm_id: vm_id.to_owned(),
            outcome: JobOutcome::Aborted {
                detail: detail.into(),
            },
        }
    }

    /// Value produced by a successful job.
    #[must_use]
    pub const fn value(&self) -> Option<&BindingValue> {
        match &self.outcome {
            JobOutcome::Completed { value } => Some(value),
            _ => None,
        }
    }

    /// Error kind of a failed job, `None` on success.
    #[must_use]
    pub const fn error_kind(&self) -> Option<ErrorKind> {
        match self.outcome {
            JobOutcome::Completed { .. } => None,
            JobOutcome::EvaluationError { .. } => Some(ErrorKind::EvaluationError),
            JobOutcome::Aborted { .. } => Some(ErrorKind::JobAborted),
        }
    }
}
