mod common;

use meterlink::config::{LoadConfig, RelayState};
use meterlink::controller::{ControllerBank, DecisionReason, LoadController};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

fn boiler() -> LoadConfig {
    LoadConfig {
        name: "boiler".to_string(),
        surplus_kw: 1.0,
        deficit_kw: 0.0,
        window_seconds: 1,
        min_dwell_seconds: 60,
        staleness_timeout_seconds: 30,
        initial_state: RelayState::Off,
        ..LoadConfig::default()
    }
}

fn exporting(kw: f64) -> Arc<meterlink::Snapshot> {
    Arc::new(common::power_snapshot(0.0, kw))
}

fn importing(kw: f64) -> Arc<meterlink::Snapshot> {
    Arc::new(common::power_snapshot(kw, 0.0))
}

#[test]
fn dip_inside_dwell_keeps_load_on() {
    let t0 = Instant::now();
    let at = |secs: u64| t0 + Duration::from_secs(secs);
    let mut controller = LoadController::new(boiler(), t0);

    // Window not covered yet
    assert!(controller.on_snapshot(&exporting(3.0), at(0)).is_none());

    let on = controller.on_snapshot(&exporting(3.0), at(1)).unwrap();
    assert_eq!(on.target, RelayState::On);
    assert_eq!(on.reason, DecisionReason::Surplus);
    assert!(on.snapshot.is_some());

    // Deficit right after switching: held by the dwell time
    for secs in 2..60 {
        assert!(controller.on_snapshot(&importing(5.0), at(secs)).is_none());
    }
    assert_eq!(controller.state(), RelayState::On);

    let off = controller.on_snapshot(&importing(5.0), at(62)).unwrap();
    assert_eq!(off.target, RelayState::Off);
    assert_eq!(off.reason, DecisionReason::Deficit);
}

#[test]
fn average_between_thresholds_changes_nothing() {
    let t0 = Instant::now();
    let mut controller = LoadController::new(boiler(), t0);
    for secs in 0..5 {
        let decision =
            controller.on_snapshot(&exporting(0.5), t0 + Duration::from_secs(secs));
        assert!(decision.is_none());
    }
    assert_eq!(controller.state(), RelayState::Off);
    assert_eq!(controller.average_surplus_kw(), Some(0.5));
}

#[test]
fn staleness_forces_off_and_clears_window() {
    let t0 = Instant::now();
    let config = LoadConfig {
        initial_state: RelayState::On,
        ..boiler()
    };
    let mut bank = ControllerBank::new(&[config], t0);
    assert_eq!(bank.next_deadline(), Some(t0 + Duration::from_secs(30)));

    assert!(bank.check_staleness(t0 + Duration::from_secs(29)).is_empty());
    let decisions = bank.check_staleness(t0 + Duration::from_secs(30));
    assert_eq!(decisions.len(), 1);
    assert_eq!(decisions[0].target, RelayState::Off);
    assert_eq!(decisions[0].reason, DecisionReason::Stale);
    assert_eq!(bank.stale_events(), 1);

    // Disarmed until the next snapshot
    assert_eq!(bank.next_deadline(), None);
    assert!(bank.controllers()[0].average_surplus_kw().is_none());
}

#[test]
fn disabled_loads_are_skipped() {
    let disabled = LoadConfig {
        name: "pool".to_string(),
        enabled: false,
        ..boiler()
    };
    let bank = ControllerBank::new(&[boiler(), disabled], Instant::now());
    assert_eq!(bank.controllers().len(), 1);
    assert_eq!(bank.controllers()[0].name(), "boiler");
}
