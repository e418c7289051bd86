//! Tests for configuration loading and validation

use std::time::Duration;

use vm_scheduler::config::scheduler::ENV_PREFIX;
use vm_scheduler::config::SchedulerConfig;

#[test]
fn test_config_validation_rejects_zero_limits() {
    let valid = SchedulerConfig::new().with_sequencer_count(2);
    assert!(valid.validate().is_ok());

    assert!(valid.clone().with_max_vms(0).validate().is_err());
    assert!(valid.clone().with_max_jobs_per_vm(0).validate().is_err());
    assert!(valid.clone().with_sequencer_count(0).validate().is_err());
    assert!(valid.clone().with_time_slice_ms(0).validate().is_err());
    assert!(valid.clone().with_vm_timeout_ms(0).validate().is_err());
}

#[test]
fn test_zero_cleanup_interval_allowed() {
    let cfg = SchedulerConfig::new().with_cleanup_interval_ms(0);
    assert!(cfg.validate().is_ok());
    assert_eq!(cfg.cleanup_interval(), Duration::ZERO);
}

#[test]
fn test_config_from_json_partial() {
    let cfg = SchedulerConfig::from_json_str(r#"{"max_vms": 7, "time_slice_ms": 25}"#).unwrap();
    assert_eq!(cfg.max_vms, 7);
    assert_eq!(cfg.time_slice(), Duration::from_millis(25));
    assert_eq!(cfg.vm_timeout(), Duration::from_millis(300_000));
}

#[test]
fn test_config_from_json_invalid() {
    assert!(SchedulerConfig::from_json_str("not json").is_err());
    let err = SchedulerConfig::from_json_str(r#"{"sequencer_count": 0}"#).unwrap_err();
    assert!(err.contains("sequencer_count"));
}

#[test]
fn test_config_from_lookup_uses_prefix() {
    let cfg = SchedulerConfig::from_lookup(|key| match key.strip_prefix(ENV_PREFIX) {
        Some("MAX_JOBS_PER_VM") => Some("9".into()),
        Some("VM_TIMEOUT_MS") => Some("1000".into()),
        _ => None,
    })
    .unwrap();
    assert_eq!(cfg.max_jobs_per_vm, 9);
    assert_eq!(cfg.vm_timeout(), Duration::from_secs(1));
    assert_eq!(cfg.max_vms, 50);
}

#[test]
fn test_config_serialization_round_trip() {
    let cfg = SchedulerConfig::new().with_max_vms(3).with_sequencer_count(1);
    let json = serde_json::to_string(&cfg).unwrap();
    assert_eq!(SchedulerConfig::from_json_str(&json).unwrap(), cfg);
}
