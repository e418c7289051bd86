//! Tests for utility helpers

use vm_scheduler::util::init_tracing;

#[test]
fn test_init_tracing_is_idempotent() {
    init_tracing();
    init_tracing();
    tracing::info!(target: "vm_scheduler", "tracing initialized");
}
