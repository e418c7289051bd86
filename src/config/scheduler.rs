//! Scheduler configuration.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Environment variable prefix read by [`SchedulerConfig::from_env`].
pub const ENV_PREFIX: &str = "VM_SCHEDULER_";

/// Capacity, pool size and timing policy, read once at construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Maximum number of VMs hosted at once.
    pub max_vms: usize,
    /// Maximum queued jobs per VM.
    pub max_jobs_per_vm: usize,
    /// Number of sequencer threads.
    pub sequencer_count: usize,
    /// Time budget of one slice, in milliseconds.
    pub time_slice_ms: u64,
    /// Idle time after which a VM is reclaimed, in milliseconds.
    pub vm_timeout_ms: u64,
    /// Minimum time between idle-VM sweeps, in milliseconds.
    pub cleanup_interval_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_vms: 50,
            max_jobs_per_vm: 50,
            sequencer_count: num_cpus::get(),
            time_slice_ms: 100,
            vm_timeout_ms: 300_000,
            cleanup_interval_ms: 60_000,
        }
    }
}

impl SchedulerConfig {
    /// Default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of VMs.
    #[must_use]
    pub const fn with_max_vms(mut self, max_vms: usize) -> Self {
        self.max_vms = max_vms;
        self
    }

    /// Set the per-VM job queue capacity.
    #[must_use]
    pub const fn with_max_jobs_per_vm(mut self, max_jobs: usize) -> Self {
        self.max_jobs_per_vm = max_jobs;
        self
    }

    /// Set the number of sequencer threads.
    #[must_use]
    pub const fn with_sequencer_count(mut self, count: usize) -> Self {
        self.sequencer_count = count;
        self
    }

    /// Set the slice duration.
    #[must_use]
    pub const fn with_time_slice_ms(mut self, ms: u64) -> Self {
        self.time_slice_ms = ms;
        self
    }

    /// Set the idle VM timeout.
    #[must_use]
    pub const fn with_vm_timeout_ms(mut self, ms: u64) -> Self {
        self.vm_timeout_ms = ms;
        self
    }

    /// Set the cleanup interval.
    #[must_use]
    pub const fn with_cleanup_interval_ms(mut self, ms: u64) -> Self {
        self.cleanup_interval_ms = ms;
        self
    }

    /// Slice duration.
    #[must_use]
    pub const fn time_slice(&self) -> Duration {
        Duration::from_millis(self.time_slice_ms)
    }

    /// Idle VM timeout.
    #[must_use]
    pub const fn vm_timeout(&self) -> Duration {
        Duration::from_millis(self.vm_timeout_ms)
    }

    /// Cleanup interval.
    #[must_use]
    pub const fn cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.cleanup_interval_ms)
    }

    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Describes the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_vms == 0 {
            return Err("max_vms must be greater than 0".into());
        }
        if self.max_jobs_per_vm == 0 {
            return Err("max_jobs_per_vm must be greater than 0".into());
        }
        if self.sequencer_count == 0 {
            return Err("sequencer_count must be greater than 0".into());
        }
        if self.time_slice_ms == 0 {
            return Err("time_slice_ms must be greater than 0".into());
        }
        if self.vm_timeout_ms == 0 {
            return Err("vm_timeout_ms must be greater than 0".into());
        }
        Ok(())
    }

    /// Parse configuration from a JSON string and validate. Missing fields
    /// take their defaults.
    ///
    /// # Errors
    ///
    /// Returns a message on parse or validation failure.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Build configuration from `VM_SCHEDULER_*` environment variables,
    /// loading a `.env` file first if one exists. Unset variables take their
    /// defaults.
    ///
    /// # Errors
    ///
    /// Returns a message if a variable does not parse or validation fails.
    pub fn from_env() -> Result<Self, String> {
        // A missing .env file is fine.
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup using the same keys
    /// as [`from_env`](Self::from_env).
    ///
    /// # Errors
    ///
    /// Returns a message if a value does not parse or validation fails.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let cfg = Self {
            max_vms: read(&lookup, "MAX_VMS", defaults.max_vms)?,
            max_jobs_per_vm: read(&lookup, "MAX_JOBS_PER_VM", defaults.max_jobs_per_vm)?,
            sequencer_count: read(&lookup, "SEQUENCERS", defaults.sequencer_count)?,
            time_slice_ms: read(&lookup, "TIME_SLICE_MS", defaults.time_slice_ms)?,
            vm_timeout_ms: read(&lookup, "VM_TIMEOUT_MS", defaults.vm_timeout_ms)?,
            cleanup_interval_ms: read(
                &lookup,
                "CLEANUP_INTERVAL_MS",
                defaults.cleanup_interval_ms,
            )?,
        };
        cfg.validate()?;
        Ok(cfg)
    }
}

fn read<T, F>(lookup: &F, suffix: &str, default: T) -> Result<T, String>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    let key = format!("{ENV_PREFIX}{suffix}");
    match lookup(&key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| format!("{key}={raw:?} invalid: {e}")),
        None => Ok(default),
    }
}
