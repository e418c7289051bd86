//! Script evaluation capability and species registry.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::core::{BindingValue, VmBindings};

/// Failure raised by an evaluator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvalError {
    /// The script itself failed (syntax error, runtime exception, ...).
    /// Reported to the result sink as an evaluation error; the VM stays usable.
    Script(String),
    /// The evaluator is corrupted and cannot be used again. The owning VM is
    /// terminated.
    Fault(String),
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Script(msg) => write!(f, "script error: {msg}"),
            Self::Fault(msg) => write!(f, "evaluator fault: {msg}"),
        }
    }
}

impl std::error::Error for EvalError {}

/// A script evaluation engine bound to one VM.
///
/// Evaluations run on a sequencer thread inside that thread's
/// single-threaded tokio runtime, one at a time per VM. An evaluator may read
/// and update the VM's bindings.
///
/// # Example
///
/// ```rust,ignore
/// use async_trait::async_trait;
/// use vm_scheduler::core::{BindingValue, EvalError, Evaluator, VmBindings};
///
/// struct Echo;
///
/// #[async_trait]
/// impl Evaluator for Echo {
///     async fn evaluate(
///         &mut self,
///         source: &str,
///         _bindings: &mut VmBindings,
///     ) -> Result<BindingValue, EvalError> {
///         Ok(BindingValue::String(source.to_owned()))
///     }
/// }
/// ```
#[async_trait]
pub trait Evaluator: Send {
    /// Evaluate `source` against `bindings`.
    ///
    /// # Errors
    ///
    /// `EvalError::Script` for failures of the script, `EvalError::Fault` when
    /// the evaluator itself can no longer be trusted. Panics are treated as
    /// faults.
    async fn evaluate(
        &mut self,
        source: &str,
        bindings: &mut VmBindings,
    ) -> Result<BindingValue, EvalError>;
}

/// Lookup of evaluators by species name.
pub trait EvaluatorRegistry: Send + Sync {
    /// Create a fresh evaluator for `species`, or `None` if unsupported.
    fn lookup(&self, species: &str) -> Option<Box<dyn Evaluator>>;

    /// Names of all supported species.
    fn species(&self) -> Vec<String>;
}

type EvaluatorFactory = Arc<dyn Fn() -> Box<dyn Evaluator> + Send + Sync>;

/// Registry mapping species names to evaluator factories.
#[derive(Clone, Default)]
pub struct SpeciesRegistry {
    factories: HashMap<String, EvaluatorFactory>,
}

impl SpeciesRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory for `species`, replacing any previous one.
    pub fn register<F>(&mut self, species: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn Evaluator> + Send + Sync + 'static,
    {
        self.factories.insert(species.into(), Arc::new(factory));
    }

    /// Builder-style [`register`](Self::register).
    #[must_use]
    pub fn with<F>(mut self, species: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> Box<dyn Evaluator> + Send + Sync + 'static,
    {
        self.register(species, factory);
        self
    }
}

impl fmt::Debug for SpeciesRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpeciesRegistry")
            .field("species", &self.species())
            .finish()
    }
}

impl EvaluatorRegistry for SpeciesRegistry {
    fn lookup(&self, species: &str) -> Option<Box<dyn Evaluator>> {
        self.factories.get(species).map(|factory| factory())
    }

    fn species(&self) -> Vec<String> {
        let mut names: Vec<_> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Upper;

    #[async_trait]
    impl Evaluator for Upper {
        async fn evaluate(
            &mut self,
            source: &str,
            bindings: &mut VmBindings,
        ) -> Result<BindingValue, EvalError> {
            bindings.insert("last", source);
            Ok(BindingValue::String(source.to_uppercase()))
        }
    }

    #[tokio::test]
    async fn test_registry_lookup_creates_fresh_evaluators() {
        let registry = SpeciesRegistry::new().with("upper", || Box::new(Upper));
        assert_eq!(registry.species(), vec!["upper".to_string()]);
        assert!(registry.lookup("lisp").is_none());

        let mut evaluator = registry.lookup("upper").unwrap();
        let mut bindings = VmBindings::new();
        let value = evaluator.evaluate("abc", &mut bindings).await.unwrap();

        assert_eq!(value, BindingValue::from("ABC"));
        assert_eq!(bindings.get("last"), Some(&BindingValue::from("abc")));
    }

    #[test]
    fn test_eval_error_display() {
        assert_eq!(
            EvalError::Script("bad token".into()).to_string(),
            "script error: bad token"
        );
        assert_eq!(
            EvalError::Fault("heap".into()).to_string(),
            "evaluator fault: heap"
        );
    }
}
