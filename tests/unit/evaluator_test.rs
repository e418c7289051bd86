//! Tests for evaluators driven directly, outside a scheduler

use async_trait::async_trait;
use vm_scheduler::core::{
    BindingValue, EvalError, Evaluator, EvaluatorRegistry, SpeciesRegistry, VmBindings,
};

/// Adds the `step` binding to `total` on every call.
struct Accumulator;

#[async_trait]
impl Evaluator for Accumulator {
    async fn evaluate(
        &mut self,
        source: &str,
        bindings: &mut VmBindings,
    ) -> Result<BindingValue, EvalError> {
        let step = match bindings.get(source) {
            Some(BindingValue::Number(n)) => *n,
            Some(other) => {
                return Err(EvalError::Script(format!(
                    "{source} is a {}",
                    other.datatype()
                )))
            }
            None => return Err(EvalError::Script(format!("{source} is not bound"))),
        };
        tokio::task::yield_now().await;
        let total = match bindings.get("total") {
            Some(BindingValue::Number(n)) => n + step,
            _ => step,
        };
        bindings.insert("total", total);
        Ok(BindingValue::Number(total))
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_evaluator_mutates_bindings() {
    let registry = SpeciesRegistry::new().with("acc", || Box::new(Accumulator));
    let mut evaluator = registry.lookup("acc").unwrap();
    let mut bindings = VmBindings::new().with("step", 2.5);

    assert_eq!(
        evaluator.evaluate("step", &mut bindings).await,
        Ok(BindingValue::Number(2.5))
    );
    assert_eq!(
        evaluator.evaluate("step", &mut bindings).await,
        Ok(BindingValue::Number(5.0))
    );
    assert_eq!(bindings.get("total"), Some(&BindingValue::Number(5.0)));
}

#[tokio::test]
async fn test_evaluator_reports_script_errors() {
    let mut evaluator = Accumulator;
    let mut bindings = VmBindings::new().with("label", "five");

    let err = evaluator.evaluate("label", &mut bindings).await.unwrap_err();
    assert_eq!(err, EvalError::Script("label is a string".into()));
    assert!(evaluator.evaluate("missing", &mut bindings).await.is_err());
    assert!(bindings.get("total").is_none());
}
