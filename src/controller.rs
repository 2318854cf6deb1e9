//! Load-switching controller
//!
//! One state machine per load. Each snapshot contributes a surplus sample
//! (negative net power) to a rolling time window. Once the window is
//! covered, the window average is compared against the load's thresholds:
//!
//! - Off -> On when the average surplus exceeds `surplus_kw`
//! - On -> Off when it falls below `deficit_kw`
//!
//! A transition is suppressed while the previous one is younger than the
//! dwell time. Missing data for longer than the staleness timeout forces the
//! load off regardless of dwell.
//!
//! Controllers only emit [`Decision`]s; driving the relay is the caller's job.

use crate::config::{LoadConfig, RelayState};
use crate::logging::{LogContext, StructuredLogger, get_logger_with_context};
use crate::snapshot::Snapshot;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

/// Why a transition happened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionReason {
    /// Window average surplus above the on-threshold
    Surplus,
    /// Window average surplus below the off-threshold
    Deficit,
    /// No snapshot within the staleness timeout
    Stale,
}

impl fmt::Display for DecisionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DecisionReason::Surplus => "surplus",
            DecisionReason::Deficit => "deficit",
            DecisionReason::Stale => "stale",
        };
        f.write_str(s)
    }
}

impl fmt::Display for RelayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RelayState::On => "on",
            RelayState::Off => "off",
        })
    }
}

/// A relay transition
#[derive(Debug, Clone)]
pub struct Decision {
    pub id: Uuid,
    pub load: String,
    pub target: RelayState,
    pub at: DateTime<Utc>,
    pub reason: DecisionReason,
    /// Window average that triggered the transition
    pub average_surplus_kw: Option<f64>,
    /// Triggering snapshot; absent for staleness
    pub snapshot: Option<Arc<Snapshot>>,
}

/// Time-bounded window of surplus samples
#[derive(Debug)]
struct SurplusWindow {
    length: Duration,
    samples: VecDeque<(Instant, f64)>,
    /// First sample since the window was last cleared
    since: Option<Instant>,
}

impl SurplusWindow {
    fn new(length: Duration) -> Self {
        Self {
            length,
            samples: VecDeque::new(),
            since: None,
        }
    }

    fn push(&mut self, at: Instant, surplus_kw: f64) {
        if self.since.is_none() {
            self.since = Some(at);
        }
        self.samples.push_back((at, surplus_kw));
        while let Some(&(t, _)) = self.samples.front() {
            if at.saturating_duration_since(t) > self.length {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    fn covered(&self, now: Instant) -> bool {
        self.since
            .is_some_and(|since| now.saturating_duration_since(since) >= self.length)
    }

    fn average(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        let sum: f64 = self.samples.iter().map(|(_, v)| v).sum();
        Some(sum / self.samples.len() as f64)
    }

    fn clear(&mut self) {
        self.samples.clear();
        self.since = None;
    }
}

/// State machine of one load
#[derive(Debug)]
pub struct LoadController {
    config: LoadConfig,
    state: RelayState,
    window: SurplusWindow,
    last_transition: Option<Instant>,
    last_seen: Instant,
    stale: bool,
    logger: StructuredLogger,
}

impl LoadController {
    pub fn new(config: LoadConfig, now: Instant) -> Self {
        let logger =
            get_logger_with_context(LogContext::new("controller").with_load(&config.name));
        Self {
            window: SurplusWindow::new(config.window()),
            state: config.initial_state,
            last_transition: None,
            last_seen: now,
            stale: false,
            config,
            logger,
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn state(&self) -> RelayState {
        self.state
    }

    /// Current window average, if any samples are held
    pub fn average_surplus_kw(&self) -> Option<f64> {
        self.window.average()
    }

    /// Feed a snapshot; returns a decision when the relay must change
    pub fn on_snapshot(&mut self, snapshot: &Arc<Snapshot>, now: Instant) -> Option<Decision> {
        if self.stale {
            self.logger.info("Snapshots resumed after staleness");
        }
        self.last_seen = now;
        self.stale = false;
        self.window.push(now, snapshot.surplus_kw());

        if !self.window.covered(now) {
            return None;
        }
        let average = self.window.average()?;

        let (target, reason) = match self.state {
            RelayState::Off if average > self.config.surplus_kw => {
                (RelayState::On, DecisionReason::Surplus)
            }
            RelayState::On if average < self.config.deficit_kw => {
                (RelayState::Off, DecisionReason::Deficit)
            }
            _ => return None,
        };

        if let Some(last) = self.last_transition {
            let elapsed = now.saturating_duration_since(last);
            if elapsed < self.config.min_dwell() {
                self.logger.debug(&format!(
                    "Holding {} for {}s more (average surplus {:.3} kW)",
                    self.state,
                    (self.config.min_dwell() - elapsed).as_secs(),
                    average
                ));
                return None;
            }
        }

        Some(self.transition(target, reason, now, Some(average), Some(snapshot.clone())))
    }

    /// When the staleness fail-safe fires next, if armed
    pub fn staleness_deadline(&self) -> Option<Instant> {
        (!self.stale).then(|| self.last_seen + self.config.staleness_timeout())
    }

    /// Fire the staleness fail-safe if its deadline passed
    pub fn check_staleness(&mut self, now: Instant) -> Option<Decision> {
        let deadline = self.staleness_deadline()?;
        if now < deadline {
            return None;
        }

        self.stale = true;
        self.window.clear();
        self.logger.warn(&format!(
            "{}",
            crate::error::MeterlinkError::Staleness {
                seconds: self.config.staleness_timeout_seconds
            }
        ));

        if self.state == RelayState::Off {
            return None;
        }
        Some(self.transition(RelayState::Off, DecisionReason::Stale, now, None, None))
    }

    fn transition(
        &mut self,
        target: RelayState,
        reason: DecisionReason,
        now: Instant,
        average_surplus_kw: Option<f64>,
        snapshot: Option<Arc<Snapshot>>,
    ) -> Decision {
        self.logger.info(&format!(
            "Switching {} -> {} ({})",
            self.state, target, reason
        ));
        self.state = target;
        self.last_transition = Some(now);
        Decision {
            id: Uuid::new_v4(),
            load: self.config.name.clone(),
            target,
            at: Utc::now(),
            reason,
            average_surplus_kw,
            snapshot,
        }
    }
}

/// All controllers, owned by the decision task
#[derive(Debug, Default)]
pub struct ControllerBank {
    controllers: Vec<LoadController>,
    stale_events: u64,
}

impl ControllerBank {
    /// One controller per enabled load
    pub fn new(loads: &[LoadConfig], now: Instant) -> Self {
        Self {
            controllers: loads
                .iter()
                .filter(|l| l.enabled)
                .map(|l| LoadController::new(l.clone(), now))
                .collect(),
            stale_events: 0,
        }
    }

    pub fn controllers(&self) -> &[LoadController] {
        &self.controllers
    }

    pub fn is_empty(&self) -> bool {
        self.controllers.is_empty()
    }

    pub fn on_snapshot(&mut self, snapshot: &Arc<Snapshot>, now: Instant) -> Vec<Decision> {
        self.controllers
            .iter_mut()
            .filter_map(|c| c.on_snapshot(snapshot, now))
            .collect()
    }

    pub fn check_staleness(&mut self, now: Instant) -> Vec<Decision> {
        let mut decisions = Vec::new();
        for controller in &mut self.controllers {
            let armed = controller.staleness_deadline().is_some();
            if let Some(decision) = controller.check_staleness(now) {
                decisions.push(decision);
            }
            if armed && controller.staleness_deadline().is_none() {
                self.stale_events += 1;
            }
        }
        decisions
    }

    /// Earliest pending staleness deadline
    pub fn next_deadline(&self) -> Option<Instant> {
        self.controllers
            .iter()
            .filter_map(LoadController::staleness_deadline)
            .min()
    }

    /// How often a controller went stale
    pub fn stale_events(&self) -> u64 {
        self.stale_events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::Snapshot;

    fn snapshot(net_kw: f64) -> Arc<Snapshot> {
        Arc::new(Snapshot {
            meter_id: "TEST".to_string(),
            received_at: Utc::now(),
            timestamp: None,
            version: None,
            equipment_id: None,
            energy: Default::default(),
            tariff: None,
            consumption_kw: net_kw.max(0.0),
            injection_kw: (-net_kw).max(0.0),
            phases: Default::default(),
            breaker: None,
            limiter_kw: None,
            fuse_threshold_a: None,
            message: None,
            gas: None,
            net_power_kw: net_kw,
            unknown: Vec::new(),
        })
    }

    fn load() -> LoadConfig {
        LoadConfig {
            name: "boiler".to_string(),
            surplus_kw: 1.0,
            deficit_kw: 0.0,
            window_seconds: 10,
            min_dwell_seconds: 60,
            staleness_timeout_seconds: 30,
            ..LoadConfig::default()
        }
    }

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    #[test]
    fn waits_until_window_is_covered() {
        let t0 = Instant::now();
        let mut c = LoadController::new(load(), t0);
        assert!(c.on_snapshot(&snapshot(-3.0), t0).is_none());
        assert!(c.on_snapshot(&snapshot(-3.0), t0 + secs(5)).is_none());
        let decision = c.on_snapshot(&snapshot(-3.0), t0 + secs(10)).unwrap();
        assert_eq!(decision.target, RelayState::On);
        assert_eq!(decision.reason, DecisionReason::Surplus);
        assert!(decision.snapshot.is_some());
        assert_eq!(c.state(), RelayState::On);
    }

    #[test]
    fn dwell_time_suppresses_flapping() {
        let t0 = Instant::now();
        let mut c = LoadController::new(load(), t0);
        for s in 0..=10 {
            c.on_snapshot(&snapshot(-2.0), t0 + secs(s));
        }
        assert_eq!(c.state(), RelayState::On);

        // Heavy consumption right after switching on
        for s in 11..70 {
            assert!(c.on_snapshot(&snapshot(3.0), t0 + secs(s)).is_none());
        }
        assert_eq!(c.state(), RelayState::On);

        let decision = c.on_snapshot(&snapshot(3.0), t0 + secs(70)).unwrap();
        assert_eq!(decision.target, RelayState::Off);
        assert_eq!(decision.reason, DecisionReason::Deficit);
    }

    #[test]
    fn window_average_between_thresholds_holds_state() {
        let t0 = Instant::now();
        let mut c = LoadController::new(load(), t0);
        for s in 0..=20 {
            assert!(c.on_snapshot(&snapshot(-0.5), t0 + secs(s)).is_none());
        }
        assert_eq!(c.state(), RelayState::Off);
        assert!((c.average_surplus_kw().unwrap() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn staleness_forces_off_and_clears_window() {
        let t0 = Instant::now();
        let mut c = LoadController::new(load(), t0);
        for s in 0..=10 {
            c.on_snapshot(&snapshot(-2.0), t0 + secs(s));
        }
        assert_eq!(c.state(), RelayState::On);
        assert_eq!(c.staleness_deadline(), Some(t0 + secs(40)));

        assert!(c.check_staleness(t0 + secs(39)).is_none());
        let decision = c.check_staleness(t0 + secs(40)).unwrap();
        assert_eq!(decision.target, RelayState::Off);
        assert_eq!(decision.reason, DecisionReason::Stale);
        assert!(decision.snapshot.is_none());
        assert!(c.average_surplus_kw().is_none());
        assert!(c.staleness_deadline().is_none());
        assert!(c.check_staleness(t0 + secs(100)).is_none());

        // Window must fill again before switching back on
        assert!(c.on_snapshot(&snapshot(-2.0), t0 + secs(200)).is_none());
    }

    #[test]
    fn bank_skips_disabled_loads() {
        let t0 = Instant::now();
        let mut disabled = load();
        disabled.name = "pool".to_string();
        disabled.enabled = false;
        let mut bank = ControllerBank::new(&[load(), disabled], t0);
        assert_eq!(bank.controllers().len(), 1);
        assert_eq!(bank.next_deadline(), Some(t0 + secs(30)));
        assert!(bank.check_staleness(t0 + secs(30)).is_empty());
        assert_eq!(bank.stale_events(), 1);
        assert!(bank.next_deadline().is_none());
    }
}
