//! Simulation state: everything the phase pipeline reads and writes.
//!
//! The engine owns a single SimulationState and lends it to each
//! phase by `&mut`. No phase keeps a copy between periods.

use crate::{
    account_pool::AccountPool,
    error::{InvariantKind, SimError},
    stochastic::PricePath,
    types::{AccountId, Period},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Cumulative totals. Every field only ever grows.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateState {
    pub coll_added:      f64,
    pub coll_withdrawn:  f64,
    pub coll_liquidated: f64,
    pub stable_redeemed: f64,
    pub issuance_fees:   f64,
    pub liquidations:    u64,
    pub closures:        u64,
    pub openings:        u64,
}

impl AggregateState {
    /// Signed collateral movement: additions and withdrawals are kept apart.
    pub fn record_collateral_delta(&mut self, delta: f64) {
        if delta > 0.0 {
            self.coll_added += delta;
        } else {
            self.coll_withdrawn += -delta;
        }
    }

    pub fn record_liquidations(&mut self, count: usize, collateral: f64) {
        self.liquidations += count as u64;
        self.coll_liquidated += collateral.max(0.0);
    }

    /// Share of all collateral ever added that ended up liquidated.
    pub fn liquidated_ratio(&self) -> f64 {
        if self.coll_added > 0.0 {
            self.coll_liquidated / self.coll_added
        } else {
            0.0
        }
    }
}

/// Stability pool gain booked in one period, realized in the next.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StabilityGain {
    pub liquidation: f64,
    pub airdrop:     f64,
}

impl StabilityGain {
    pub fn total(&self) -> f64 {
        self.liquidation + self.airdrop
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StabilityState {
    pub gains:       BTreeMap<Period, StabilityGain>,
    /// Return realized in the settlement phase, read by the stability update.
    pub last_return: f64,
}

impl StabilityState {
    pub fn record(&mut self, period: Period, gain: StabilityGain) {
        self.gains.insert(period, gain);
    }

    pub fn gain_for(&self, period: Period) -> StabilityGain {
        self.gains.get(&period).copied().unwrap_or_default()
    }

    /// Remove and return the gain booked in `period`.
    pub fn take(&mut self, period: Period) -> StabilityGain {
        self.gains.remove(&period).unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketState {
    pub ether_price:      f64,
    pub stable_price:     f64,
    pub issuance_fee:     f64,
    pub supply:           f64,
    pub stability_demand: f64,
    pub liquidity_demand: f64,
}

impl MarketState {
    pub fn new(ether_price: f64) -> Self {
        Self {
            ether_price,
            stable_price: 1.0,
            issuance_fee: 0.0,
            supply: 0.0,
            stability_demand: 0.0,
            liquidity_demand: 0.0,
        }
    }
}

/// What happened during the period being run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PeriodSummary {
    pub period:               Period,
    pub ether_price:          f64,
    pub stable_price:         f64,
    pub active_at_start:      usize,
    pub active_after_opening: usize,
    pub liquidated:           Vec<AccountId>,
    pub closed:               Vec<AccountId>,
    pub opened:               Vec<AccountId>,
    pub adjusted:             usize,
    /// Ledger domain rejections absorbed this period.
    pub skipped:              usize,
    pub coll_added:           f64,
    pub coll_liquidated:      f64,
    pub redeemed:             f64,
}

impl PeriodSummary {
    pub fn new(period: Period, active_at_start: usize) -> Self {
        Self {
            period,
            active_at_start,
            ..Default::default()
        }
    }

    /// An account may leave the active set at most once per period.
    pub fn has_exited(&self, id: AccountId) -> bool {
        self.liquidated.contains(&id) || self.closed.contains(&id)
    }
}

pub struct SimulationState {
    pub pool:       AccountPool,
    pub aggregates: AggregateState,
    pub stability:  StabilityState,
    pub market:     MarketState,
    pub price_path: PricePath,
    pub summary:    PeriodSummary,
}

/// The slice of state attached to a fatal error report.
#[derive(Debug, Serialize)]
struct StateView<'a> {
    period:     Period,
    aggregates: &'a AggregateState,
    market:     &'a MarketState,
    active:     &'a [AccountId],
    summary:    &'a PeriodSummary,
}

impl SimulationState {
    pub fn new(population: usize, price_path: PricePath) -> Self {
        let market = MarketState::new(price_path.initial());
        Self {
            pool: AccountPool::new(population),
            aggregates: AggregateState::default(),
            stability: StabilityState::default(),
            market,
            price_path,
            summary: PeriodSummary::default(),
        }
    }

    pub fn begin_period(&mut self, period: Period) {
        self.summary = PeriodSummary::new(period, self.pool.active_count());
    }

    /// Build the fatal error for `kind`, with a JSON view of the state.
    pub fn invariant_violation(&self, period: Period, kind: InvariantKind) -> SimError {
        let view = StateView {
            period,
            aggregates: &self.aggregates,
            market: &self.market,
            active: self.pool.query_active(),
            summary: &self.summary,
        };
        let snapshot = serde_json::to_string(&view)
            .unwrap_or_else(|e| format!("<state not serializable: {e}>"));
        log::error!("period={period} invariant violated: {kind}");
        SimError::InvariantViolation {
            period,
            kind,
            snapshot,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collateral_deltas_split_into_added_and_withdrawn() {
        let mut agg = AggregateState::default();
        agg.record_collateral_delta(5.0);
        agg.record_collateral_delta(-2.0);
        agg.record_collateral_delta(1.0);
        assert_eq!(agg.coll_added, 6.0);
        assert_eq!(agg.coll_withdrawn, 2.0);
    }

    #[test]
    fn missing_gain_defaults_to_zero() {
        let mut stability = StabilityState::default();
        stability.record(3, StabilityGain { liquidation: 10.0, airdrop: 2.0 });
        assert_eq!(stability.gain_for(3).total(), 12.0);
        assert_eq!(stability.gain_for(2), StabilityGain::default());
        assert_eq!(stability.take(3).liquidation, 10.0);
        assert!(stability.gains.is_empty());
    }

    #[test]
    fn invariant_violation_carries_period_and_snapshot() {
        let path = PricePath::flat(2000.0, 3).unwrap();
        let mut state = SimulationState::new(2, path);
        state.begin_period(2);
        let err = state.invariant_violation(2, InvariantKind::NonPositivePrice { price: 0.0 });
        match err {
            SimError::InvariantViolation { period, snapshot, .. } => {
                assert_eq!(period, 2);
                assert!(snapshot.contains("\"period\":2"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }
}
