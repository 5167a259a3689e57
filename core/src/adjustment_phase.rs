//! Phase 5: attentive borrowers steer their CR back to target.
//!
//! Each remaining borrower, in stable order, rolls an attention draw.
//! If it reacts and its CR sits outside `[target - τ, target + τ]`:
//!   below the band → top up collateral, or repay debt some of the time
//!   above the band → draw more debt, or withdraw collateral some of the time

use crate::{
    account_pool::AttributeDelta,
    config::AdjustmentConfig,
    error::{SimError, SimResult},
    event::SimEvent,
    ledger::Ledger,
    phase::{absorb, SimPhase},
    rng::PhaseRng,
    state::SimulationState,
    stochastic::attention_draw,
    types::{Period, WHALE},
};

pub struct AdjustmentPhase {
    config: AdjustmentConfig,
}

impl AdjustmentPhase {
    pub fn new(config: AdjustmentConfig) -> Self {
        Self { config }
    }
}

/// Collateral and debt changes that bring a position back to `target_cr`.
fn rebalance(
    collateral: f64,
    debt: f64,
    price: f64,
    target_cr: f64,
    repay: bool,
    withdraw: bool,
    min_net_debt: f64,
) -> (f64, f64) {
    let cr = collateral * price / debt;
    if cr < target_cr {
        let target_debt = collateral * price / target_cr;
        if repay && target_debt >= min_net_debt {
            (0.0, target_debt - debt)
        } else {
            (target_cr * debt / price - collateral, 0.0)
        }
    } else if withdraw {
        (target_cr * debt / price - collateral, 0.0)
    } else {
        (0.0, collateral * price / target_cr - debt)
    }
}

impl SimPhase for AdjustmentPhase {
    fn name(&self) -> &'static str { "adjustment" }

    fn update(
        &mut self,
        period: Period,
        _events_in: &[SimEvent],
        state: &mut SimulationState,
        ledger: &mut dyn Ledger,
        rng: &mut PhaseRng,
    ) -> SimResult<Vec<SimEvent>> {
        let mut events = Vec::new();
        let price = state.market.ether_price;
        let min_net_debt = ledger.min_net_debt();
        let active: Vec<_> = state.pool.query_active().to_vec();

        for id in active {
            if id == WHALE {
                continue;
            }
            let (target_cr, tau) = {
                let account = state.pool.get(id)?;
                (account.target_cr, account.inattention)
            };
            if !attention_draw(tau, rng) {
                continue;
            }
            let before = ledger
                .query_position_state(id)
                .map_err(|e| SimError::ledger(period, e))?;
            if before.debt <= 0.0 || (before.cr >= target_cr - tau && before.cr <= target_cr + tau) {
                continue;
            }

            let below = before.cr < target_cr;
            let repay = below && rng.chance(self.config.repay_probability);
            let withdraw = !below && rng.chance(self.config.withdraw_probability);
            let (coll_delta, debt_delta) = rebalance(
                before.collateral,
                before.debt,
                price,
                target_cr,
                repay,
                withdraw,
                min_net_debt,
            );

            let adjusted = ledger.adjust_position(id, coll_delta, debt_delta);
            if absorb(adjusted, period, self.name(), Some(id), state, &mut events)?.is_none() {
                continue;
            }

            let after = ledger
                .query_position_state(id)
                .map_err(|e| SimError::ledger(period, e))?;
            state.pool.update_attributes(
                id,
                AttributeDelta {
                    collateral: after.collateral - before.collateral,
                    debt: after.debt - before.debt,
                    ..Default::default()
                },
            )?;
            state.pool.clear_redemptions(id)?;
            if coll_delta != 0.0 {
                state.aggregates.record_collateral_delta(coll_delta);
            }
            if coll_delta > 0.0 {
                state.summary.coll_added += coll_delta;
            }
            state.summary.adjusted += 1;
            events.push(SimEvent::PositionAdjusted {
                period,
                account: id,
                coll_delta,
                debt_delta,
            });
        }

        log::debug!(
            "period={period} adjustment: {} adjusted",
            state.summary.adjusted
        );
        Ok(events)
    }

    fn as_any(&self) -> &dyn std::any::Any { self }
}
