//! Aggregate reporter: read-only observer of completed periods.
//!
//! RULE: observers never touch simulation state. The engine builds a
//! PeriodReport after the end-of-period checks pass and hands each
//! observer a shared reference to it.

use crate::{
    ledger::GlobalState,
    state::{AggregateState, PeriodSummary, SimulationState},
    types::Period,
};
use serde::{Deserialize, Serialize};
use std::any::Any;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodReport {
    pub period:          Period,
    pub ether_price:     f64,
    pub stable_price:    f64,
    pub active_at_start: usize,
    pub liquidated:      usize,
    pub closed:          usize,
    pub opened:          usize,
    pub adjusted:        usize,
    pub skipped:         usize,
    pub active_count:    usize,
    pub inactive_count:  usize,
    pub coll_added:      f64,
    pub coll_liquidated: f64,
    pub redeemed:        f64,
    /// Cumulative totals as of the end of this period.
    pub aggregates:      AggregateState,
    pub global:          GlobalState,
}

impl PeriodReport {
    pub fn from_state(state: &SimulationState, global: GlobalState) -> Self {
        let s: &PeriodSummary = &state.summary;
        Self {
            period:          s.period,
            ether_price:     s.ether_price,
            stable_price:    s.stable_price,
            active_at_start: s.active_at_start,
            liquidated:      s.liquidated.len(),
            closed:          s.closed.len(),
            opened:          s.opened.len(),
            adjusted:        s.adjusted,
            skipped:         s.skipped,
            active_count:    state.pool.active_count(),
            inactive_count:  state.pool.inactive_count(),
            coll_added:      s.coll_added,
            coll_liquidated: s.coll_liquidated,
            redeemed:        s.redeemed,
            aggregates:      state.aggregates.clone(),
            global,
        }
    }
}

/// Subscribes to period completion.
pub trait PeriodObserver: Send {
    fn name(&self) -> &'static str;

    fn on_period_complete(&mut self, report: &PeriodReport);

    fn as_any(&self) -> &dyn Any;
}

/// Keeps every report and exposes the latest cumulative totals.
#[derive(Debug, Default)]
pub struct AggregateReporter {
    history: Vec<PeriodReport>,
}

impl AggregateReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn history(&self) -> &[PeriodReport] {
        &self.history
    }

    pub fn latest(&self) -> Option<&PeriodReport> {
        self.history.last()
    }

    pub fn totals(&self) -> AggregateState {
        self.latest().map(|r| r.aggregates.clone()).unwrap_or_default()
    }

    /// Cumulative liquidated collateral over cumulative added collateral.
    pub fn liquidated_ratio(&self) -> f64 {
        self.totals().liquidated_ratio()
    }

    pub fn min_stable_price(&self) -> Option<f64> {
        self.history
            .iter()
            .map(|r| r.stable_price)
            .min_by(|a, b| a.total_cmp(b))
    }
}

impl PeriodObserver for AggregateReporter {
    fn name(&self) -> &'static str { "aggregate_reporter" }

    fn on_period_complete(&mut self, report: &PeriodReport) {
        self.history.push(report.clone());
    }

    fn as_any(&self) -> &dyn Any { self }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(period: Period, stable_price: f64, added: f64, liquidated: f64) -> PeriodReport {
        PeriodReport {
            period,
            ether_price: 2000.0,
            stable_price,
            active_at_start: 0,
            liquidated: 0,
            closed: 0,
            opened: 0,
            adjusted: 0,
            skipped: 0,
            active_count: 0,
            inactive_count: 0,
            coll_added: 0.0,
            coll_liquidated: 0.0,
            redeemed: 0.0,
            aggregates: AggregateState {
                coll_added: added,
                coll_liquidated: liquidated,
                ..Default::default()
            },
            global: GlobalState::default(),
        }
    }

    #[test]
    fn empty_reporter_has_zero_totals() {
        let reporter = AggregateReporter::new();
        assert_eq!(reporter.totals(), AggregateState::default());
        assert_eq!(reporter.liquidated_ratio(), 0.0);
        assert!(reporter.min_stable_price().is_none());
    }

    #[test]
    fn totals_follow_the_latest_report() {
        let mut reporter = AggregateReporter::new();
        reporter.on_period_complete(&report(1, 1.02, 100.0, 0.0));
        reporter.on_period_complete(&report(2, 0.97, 150.0, 30.0));
        assert_eq!(reporter.history().len(), 2);
        assert_eq!(reporter.totals().coll_added, 150.0);
        assert!((reporter.liquidated_ratio() - 0.2).abs() < 1e-12);
        assert_eq!(reporter.min_stable_price(), Some(0.97));
    }
}
