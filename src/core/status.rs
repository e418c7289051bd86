//! Status enums reported by the scheduler.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Status of the scheduler as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FarmStatus {
    /// Accepting new VMs.
    Active,
    /// Hosting the maximum number of VMs; spawns are rejected.
    #[serde(rename = "full")]
    ActiveFull,
    /// Shut down. Absorbing.
    Terminated,
}

impl fmt::Display for FarmStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Active => "active",
            Self::ActiveFull => "full",
            Self::Terminated => "terminated",
        })
    }
}

/// Status of a VM as seen from outside the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VmStatus {
    /// Registered and usable.
    Active,
    /// Not registered (never spawned, terminated, or reclaimed).
    NotFound,
}

impl fmt::Display for VmStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Active => "active",
            Self::NotFound => "not_found",
        })
    }
}

/// Status of a job. Finished jobs are not tracked; their outcome is delivered
/// through the result sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Queued or being evaluated.
    InProgress,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("in_progress")
    }
}
