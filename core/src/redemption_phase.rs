use crate::{
    config::RedemptionConfig,
    error::{SimError, SimResult},
    event::SimEvent,
    ledger::Ledger,
    phase::{absorb, SimPhase},
    rng::PhaseRng,
    state::SimulationState,
    types::Period,
};

/// Phase 9: arbitrageurs redeem when the stablecoin trades below
/// `1 - fee`, pulling the market price back to that floor.
pub struct RedemptionPhase {
    config:  RedemptionConfig,
    max_fee: f64,
}

impl RedemptionPhase {
    pub fn new(config: RedemptionConfig, max_fee: f64) -> Self {
        Self { config, max_fee }
    }

    pub fn floor(&self) -> f64 {
        1.0 - self.config.fee
    }

    /// Amount worth redeeming at `price`, zero at or above the floor.
    pub fn redemption_amount(&self, price: f64, supply: f64, stability_demand: f64) -> f64 {
        let gap = self.floor() - price;
        if gap <= 0.0 {
            return 0.0;
        }
        let float = (supply - stability_demand).max(0.0);
        let cap = self.config.max_supply_share.max(0.0) * supply.max(0.0);
        (float * self.config.sensitivity.max(0.0) * gap).min(cap)
    }
}

impl SimPhase for RedemptionPhase {
    fn name(&self) -> &'static str { "redemption" }

    fn update(
        &mut self,
        period: Period,
        events_in: &[SimEvent],
        state: &mut SimulationState,
        ledger: &mut dyn Ledger,
        _rng: &mut PhaseRng,
    ) -> SimResult<Vec<SimEvent>> {
        let price = events_in
            .iter()
            .rev()
            .find_map(|e| match e {
                SimEvent::StablePriceDetermined { period: p, price, .. } if *p == period => {
                    Some(*price)
                }
                _ => None,
            })
            .unwrap_or(state.market.stable_price);

        let amount =
            self.redemption_amount(price, state.market.supply, state.market.stability_demand);
        if amount <= 0.0 {
            return Ok(vec![]);
        }

        let mut before = Vec::with_capacity(state.pool.active_count());
        for &id in state.pool.query_active() {
            let position = ledger
                .query_position_state(id)
                .map_err(|e| SimError::ledger(period, e))?;
            before.push((id, position));
        }

        let mut events = Vec::new();
        let redeemed = ledger.redeem_collateral(amount, self.max_fee);
        if let Some(outcome) = absorb(redeemed, period, self.name(), None, state, &mut events)? {
            // Per-position cuts; closure discounts them.
            for (id, was) in before {
                let now = ledger
                    .query_position_state(id)
                    .map_err(|e| SimError::ledger(period, e))?;
                if now.debt < was.debt {
                    state.pool.record_redemption(
                        id,
                        was.collateral - now.collateral,
                        was.debt - now.debt,
                    )?;
                }
            }
            state.aggregates.stable_redeemed += outcome.redeemed;
            state.summary.redeemed += outcome.redeemed;
            state.market.stable_price = self.floor();
            state.summary.stable_price = self.floor();
            log::debug!(
                "period={period} redemption: price={price:.4} redeemed={:.2} coll={:.4} fee={:.4}",
                outcome.redeemed,
                outcome.collateral_drawn,
                outcome.fee,
            );
            events.push(SimEvent::Redeemed {
                period,
                amount: outcome.redeemed,
                collateral_drawn: outcome.collateral_drawn,
                fee: outcome.fee,
            });
        }
        Ok(events)
    }

    fn as_any(&self) -> &dyn std::any::Any { self }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimConfig;

    #[test]
    fn nothing_to_redeem_at_or_above_the_floor() {
        let phase = RedemptionPhase::new(SimConfig::default_test().redemption, 0.05);
        assert_eq!(phase.redemption_amount(0.995, 1e7, 2e6), 0.0);
        assert_eq!(phase.redemption_amount(1.02, 1e7, 2e6), 0.0);
    }

    #[test]
    fn amount_is_capped_by_supply_share() {
        let phase = RedemptionPhase::new(SimConfig::default_test().redemption, 0.05);
        // float 8M × gap 0.095 = 760k, above the 5% cap of 500k.
        assert!((phase.redemption_amount(0.9, 1e7, 2e6) - 500_000.0).abs() < 1e-6);
        // float 8M × gap 0.015 = 120k, below the cap.
        assert!((phase.redemption_amount(0.98, 1e7, 2e6) - 120_000.0).abs() < 1e-6);
    }
}
