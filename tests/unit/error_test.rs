//! Tests for error types and wire kinds

use vm_scheduler::core::{ErrorKind, SchedulerError};

#[test]
fn test_error_display() {
    assert_eq!(
        SchedulerError::Terminated.to_string(),
        "scheduler has been terminated"
    );
    assert!(SchedulerError::VmNotFound("vm-7".into())
        .to_string()
        .contains("vm-7"));
}

#[test]
fn test_error_kinds() {
    assert_eq!(SchedulerError::FarmIsBusy.kind(), ErrorKind::FarmIsBusy);
    assert_eq!(
        SchedulerError::JobAlreadyExists("j".into()).kind(),
        ErrorKind::JobAlreadyExists
    );
    assert_eq!(SchedulerError::Terminated.kind(), ErrorKind::InternalError);
    assert_eq!(
        SchedulerError::InvalidConfig("x".into()).kind(),
        ErrorKind::InvalidValue
    );
}

#[test]
fn test_error_kind_names() {
    assert_eq!(ErrorKind::SpeciesNotSupported.as_str(), "species_not_supported");
    assert_eq!(ErrorKind::from_name("job_aborted"), Some(ErrorKind::JobAborted));
    assert_eq!(ErrorKind::from_name("JOB_ABORTED"), None);
    assert_eq!(
        serde_json::to_string(&ErrorKind::VmIsBusy).unwrap(),
        "\"vm_is_busy\""
    );
}

#[test]
fn test_anyhow_conversion() {
    fn fails() -> vm_scheduler::core::AppResult<()> {
        Err(SchedulerError::JobNotFound("j".into()).into())
    }
    let err = fails().unwrap_err();
    assert_eq!(
        err.downcast_ref::<SchedulerError>(),
        Some(&SchedulerError::JobNotFound("j".into()))
    );
}
