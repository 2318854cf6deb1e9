//! Decision process
//!
//! Drains the control lane into the controller bank, applies the resulting
//! decisions to the relays and hands them to the export fan-out. Staleness
//! deadlines are tracked here so the fail-safe fires even when no snapshot
//! arrives at all.

use crate::config::LoadConfig;
use crate::controller::{ControllerBank, Decision};
use crate::export::{ExportDispatcher, ExportItem};
use crate::pipeline::ControlReceiver;
use crate::relay::{RelayDriver, build_relay};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, error, info};

/// Counters of the decision process
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecisionStats {
    pub snapshots: u64,
    pub decisions: u64,
    pub relay_failures: u64,
    pub stale_events: u64,
    pub control_overflow: u64,
}

impl fmt::Display for DecisionStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "snapshots={} decisions={} relay_failures={} stale_events={} control_overflow={}",
            self.snapshots,
            self.decisions,
            self.relay_failures,
            self.stale_events,
            self.control_overflow
        )
    }
}

pub struct DecisionLoop {
    bank: ControllerBank,
    relays: HashMap<String, Box<dyn RelayDriver>>,
    dispatcher: Option<ExportDispatcher>,
    stats: DecisionStats,
}

impl DecisionLoop {
    /// Controllers and relays for every enabled load
    pub fn new(loads: &[LoadConfig], dispatcher: Option<ExportDispatcher>) -> Self {
        let relays = loads
            .iter()
            .filter(|l| l.enabled)
            .map(|l| (l.name.clone(), build_relay(l)))
            .collect();
        Self::with_relays(ControllerBank::new(loads, Instant::now()), relays, dispatcher)
    }

    /// Assemble from parts (custom relay drivers)
    pub fn with_relays(
        bank: ControllerBank,
        relays: HashMap<String, Box<dyn RelayDriver>>,
        dispatcher: Option<ExportDispatcher>,
    ) -> Self {
        Self {
            bank,
            relays,
            dispatcher,
            stats: DecisionStats::default(),
        }
    }

    /// Run until shutdown or until the control lane closes
    pub async fn run(
        mut self,
        mut control: ControlReceiver,
        mut shutdown: watch::Receiver<bool>,
    ) -> DecisionStats {
        // Bring every relay to its configured starting state
        let initial: Vec<(String, _)> = self
            .bank
            .controllers()
            .iter()
            .map(|c| (c.name().to_string(), c.state()))
            .collect();
        for (load, state) in initial {
            self.drive(&load, state);
        }

        info!("Decision loop started with {} load(s)", self.relays.len());
        loop {
            if *shutdown.borrow() {
                break;
            }
            let deadline = self.bank.next_deadline();

            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                received = control.recv() => {
                    let Some(snapshot) = received else {
                        debug!("Control lane closed");
                        break;
                    };
                    self.stats.snapshots += 1;
                    let decisions = self.bank.on_snapshot(&snapshot, Instant::now());
                    self.apply(decisions);
                }
                _ = sleep_until_deadline(deadline) => {
                    let decisions = self.bank.check_staleness(Instant::now());
                    self.apply(decisions);
                }
            }
        }

        self.stats.stale_events = self.bank.stale_events();
        self.stats.control_overflow = control.overflow_count();
        info!("Decision loop stopped: {}", self.stats);
        self.stats
    }

    fn apply(&mut self, decisions: Vec<Decision>) {
        for decision in decisions {
            self.stats.decisions += 1;
            self.drive(&decision.load, decision.target);
            if let Some(dispatcher) = &self.dispatcher {
                dispatcher.dispatch(ExportItem::Decision(Arc::new(decision)));
            }
        }
    }

    fn drive(&mut self, load: &str, state: crate::config::RelayState) {
        let Some(relay) = self.relays.get(load) else {
            return;
        };
        if let Err(e) = relay.apply(load, state) {
            self.stats.relay_failures += 1;
            error!("{}", e);
        }
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
