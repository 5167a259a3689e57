use crate::{
    error::{SimError, SimResult},
    event::SimEvent,
    ledger::Ledger,
    phase::SimPhase,
    rng::PhaseRng,
    state::SimulationState,
    types::Period,
};

/// Phase 1: push this period's ether price to the ledger's oracle.
#[derive(Debug, Default)]
pub struct PriceUpdatePhase;

impl PriceUpdatePhase {
    pub fn new() -> Self {
        Self
    }
}

impl SimPhase for PriceUpdatePhase {
    fn name(&self) -> &'static str { "price_update" }

    fn update(
        &mut self,
        period: Period,
        _events_in: &[SimEvent],
        state: &mut SimulationState,
        ledger: &mut dyn Ledger,
        _rng: &mut PhaseRng,
    ) -> SimResult<Vec<SimEvent>> {
        let price = state.price_path.at(period).ok_or(SimError::HorizonExhausted {
            horizon: state.price_path.horizon(),
        })?;
        ledger
            .set_oracle_price(price)
            .map_err(|e| SimError::ledger(period, e))?;

        state.market.ether_price = price;
        state.summary.ether_price = price;
        log::debug!("period={period} price_update: ether={price:.2}");

        Ok(vec![SimEvent::OraclePriceSet { period, price }])
    }

    fn as_any(&self) -> &dyn std::any::Any { self }
}
