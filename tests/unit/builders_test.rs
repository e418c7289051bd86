//! Tests for builder modules

use std::sync::Arc;

use vm_scheduler::builders::SchedulerBuilder;
use vm_scheduler::config::SchedulerConfig;
use vm_scheduler::core::{
    FarmStatus, InMemoryEventLog, SchedulerError, SpeciesRegistry, StatusEvent,
};

#[test]
fn test_builder_defaults() {
    let builder = SchedulerBuilder::new(SchedulerConfig::new().with_sequencer_count(1));
    assert_eq!(builder.config().sequencer_count, 1);

    let scheduler = builder.build().unwrap();
    assert!(scheduler.species().is_empty());
    assert!(matches!(
        scheduler.spawn("vm", "anything"),
        Err(SchedulerError::SpeciesNotSupported(_))
    ));
    scheduler.shutdown().unwrap();
}

#[test]
fn test_builder_wires_sinks() {
    let log = InMemoryEventLog::new(16);
    let scheduler = SchedulerBuilder::new(SchedulerConfig::new().with_sequencer_count(2))
        .shared_registry(Arc::new(SpeciesRegistry::new()))
        .status_sink(Arc::new(log.clone()))
        .build()
        .unwrap();
    assert_eq!(scheduler.live_sequencers(), 2);

    scheduler.shutdown().unwrap();
    assert_eq!(scheduler.live_sequencers(), 0);
    assert_eq!(
        log.events(),
        vec![
            StatusEvent::Scheduler {
                status: FarmStatus::Active
            },
            StatusEvent::Scheduler {
                status: FarmStatus::Terminated
            },
        ]
    );
}

#[test]
fn test_builder_rejects_invalid_config() {
    let err = SchedulerBuilder::new(SchedulerConfig::new().with_max_vms(0))
        .build()
        .unwrap_err();
    assert!(matches!(err, SchedulerError::InvalidConfig(_)));
}
