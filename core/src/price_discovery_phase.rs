//! Phase 8: clear the stablecoin market.
//!
//! Supply is the total debt outstanding. The stability pool absorbs part
//! of it; the rest must be held by the liquidity pool, whose demand is
//! `D(p) = depth · (1 + noise) · p^(-elasticity)`. Solving
//! `D(p) = supply - pool` gives the price, capped at the ceiling where
//! opening a position at the minimum CR and selling becomes profitable.

use crate::{
    config::MarketConfig,
    error::{InvariantKind, SimError, SimResult},
    event::SimEvent,
    ledger::Ledger,
    phase::SimPhase,
    rng::PhaseRng,
    state::SimulationState,
    stochastic::liquidity_noise,
    types::Period,
};

pub struct PriceDiscoveryPhase {
    config: MarketConfig,
}

impl PriceDiscoveryPhase {
    pub fn new(config: MarketConfig) -> Self {
        Self { config }
    }

    /// Clearing price for a given float and demand shock, before the ceiling.
    pub fn clearing_price(&self, float: f64, noise: f64) -> f64 {
        let float = float.max(self.config.min_float);
        (self.config.liquidity_depth * (1.0 + noise) / float).powf(1.0 / self.config.elasticity)
    }

    /// The clearing price under the ceiling, or `None` unless it is
    /// positive and finite. The check comes first: `f64::min` drops NaN.
    pub fn checked_price(&self, raw: f64) -> Option<f64> {
        (raw.is_finite() && raw > 0.0).then(|| raw.min(self.config.price_ceiling))
    }
}

impl SimPhase for PriceDiscoveryPhase {
    fn name(&self) -> &'static str { "price_discovery" }

    fn update(
        &mut self,
        period: Period,
        _events_in: &[SimEvent],
        state: &mut SimulationState,
        ledger: &mut dyn Ledger,
        rng: &mut PhaseRng,
    ) -> SimResult<Vec<SimEvent>> {
        let global = ledger
            .query_global_state()
            .map_err(|e| SimError::ledger(period, e))?;
        let supply = global.total_debt;
        let stability_demand = global.stability_pool_balance;
        let noise = liquidity_noise(self.config.sd_liquidity, rng);

        let raw = self.clearing_price(supply - stability_demand, noise);
        let Some(price) = self.checked_price(raw) else {
            return Err(state.invariant_violation(
                period,
                InvariantKind::NonPositivePrice { price: raw },
            ));
        };
        let liquidity_demand =
            self.config.liquidity_depth * (1.0 + noise) * price.powf(-self.config.elasticity);

        state.market.stable_price = price;
        state.market.supply = supply;
        state.market.stability_demand = stability_demand;
        state.market.liquidity_demand = liquidity_demand;
        state.summary.stable_price = price;

        log::debug!(
            "period={period} price_discovery: supply={supply:.0} pool={stability_demand:.0} noise={noise:+.4} price={price:.4}"
        );

        Ok(vec![SimEvent::StablePriceDetermined {
            period,
            price,
            supply,
            stability_demand,
            liquidity_demand,
        }])
    }

    fn as_any(&self) -> &dyn std::any::Any { self }
}
