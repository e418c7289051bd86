//! Assemble a [`VmScheduler`] from configuration, an evaluator registry and
//! sinks.

use std::sync::Arc;

use crate::config::SchedulerConfig;
use crate::core::{
    EvaluatorRegistry, NoopSink, ResultSink, SchedulerError, SpeciesRegistry, StatusSink,
    VmScheduler,
};

/// Builder for [`VmScheduler`]. Unset sinks discard their notifications and
/// an unset registry supports no species.
pub struct SchedulerBuilder {
    config: SchedulerConfig,
    registry: Option<Arc<dyn EvaluatorRegistry>>,
    result_sink: Option<Arc<dyn ResultSink>>,
    status_sink: Option<Arc<dyn StatusSink>>,
}

impl SchedulerBuilder {
    /// Start from `config`.
    #[must_use]
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            registry: None,
            result_sink: None,
            status_sink: None,
        }
    }

    /// Start from `VM_SCHEDULER_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::InvalidConfig` if a variable is malformed.
    pub fn from_env() -> Result<Self, SchedulerError> {
        SchedulerConfig::from_env()
            .map(Self::new)
            .map_err(SchedulerError::InvalidConfig)
    }

    /// Configuration the scheduler will be built with.
    #[must_use]
    pub const fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Set the evaluator registry.
    #[must_use]
    pub fn registry(mut self, registry: impl EvaluatorRegistry + 'static) -> Self {
        self.registry = Some(Arc::new(registry));
        self
    }

    /// Set an already shared evaluator registry.
    #[must_use]
    pub fn shared_registry(mut self, registry: Arc<dyn EvaluatorRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Set the sink receiving job results.
    #[must_use]
    pub fn result_sink(mut self, sink: Arc<dyn ResultSink>) -> Self {
        self.result_sink = Some(sink);
        self
    }

    /// Set the sink receiving status changes.
    #[must_use]
    pub fn status_sink(mut self, sink: Arc<dyn StatusSink>) -> Self {
        self.status_sink = Some(sink);
        self
    }

    /// Validate the configuration and start the scheduler.
    ///
    /// # Errors
    ///
    /// See [`VmScheduler::new`].
    pub fn build(self) -> Result<VmScheduler, SchedulerError> {
        let registry = self
            .registry
            .unwrap_or_else(|| Arc::new(SpeciesRegistry::new()));
        let result_sink = self.result_sink.unwrap_or_else(|| Arc::new(NoopSink));
        let status_sink = self.status_sink.unwrap_or_else(|| Arc::new(NoopSink));
        VmScheduler::new(self.config, registry, result_sink, status_sink)
    }
}

impl std::fmt::Debug for SchedulerBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulerBuilder")
            .field("config", &self.config)
            .field("has_registry", &self.registry.is_some())
            .field("has_result_sink", &self.result_sink.is_some())
            .field("has_status_sink", &self.status_sink.is_some())
            .finish()
    }
}
