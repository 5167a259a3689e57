//! Phase 2: liquidate under-collateralized positions.
//!
//! Candidates are every active account whose live CR at the new
//! oracle price is below the liquidation line. The ledger decides
//! which of them actually go; each one it returns must still be
//! active, and must not have left the active set already this period.

use crate::{
    error::{InvariantKind, SimError, SimResult},
    event::SimEvent,
    ledger::Ledger,
    phase::SimPhase,
    rng::PhaseRng,
    state::{SimulationState, StabilityGain},
    types::Period,
};

pub struct LiquidationPhase {
    liquidation_cr:     f64,
    airdrop_per_period: f64,
}

impl LiquidationPhase {
    pub fn new(liquidation_cr: f64, airdrop_per_period: f64) -> Self {
        Self {
            liquidation_cr,
            airdrop_per_period,
        }
    }
}

impl SimPhase for LiquidationPhase {
    fn name(&self) -> &'static str { "liquidation" }

    fn update(
        &mut self,
        period: Period,
        _events_in: &[SimEvent],
        state: &mut SimulationState,
        ledger: &mut dyn Ledger,
        _rng: &mut PhaseRng,
    ) -> SimResult<Vec<SimEvent>> {
        let mut candidates = Vec::new();
        for &id in state.pool.query_active() {
            let position = ledger
                .query_position_state(id)
                .map_err(|e| SimError::ledger(period, e))?;
            if position.cr < self.liquidation_cr {
                candidates.push(id);
            }
        }

        let mut events = Vec::new();
        let mut gain = StabilityGain {
            liquidation: 0.0,
            airdrop:     self.airdrop_per_period.max(0.0),
        };

        if !candidates.is_empty() {
            let outcome = ledger
                .liquidate_positions(&candidates)
                .map_err(|e| SimError::ledger(period, e))?;

            for liquidated in &outcome.liquidated {
                let account = liquidated.account;
                if state.summary.has_exited(account) {
                    return Err(state.invariant_violation(
                        period,
                        InvariantKind::DoubleLiquidation { account },
                    ));
                }
                if !state.pool.is_active(account) {
                    return Err(state.invariant_violation(
                        period,
                        InvariantKind::UnknownLiquidation { account },
                    ));
                }
                state.pool.move_to_inactive(account)?;
                state.summary.liquidated.push(account);
                events.push(SimEvent::PositionLiquidated {
                    period,
                    account,
                    collateral: liquidated.collateral,
                    debt: liquidated.debt,
                });
            }

            state
                .aggregates
                .record_liquidations(outcome.liquidated.len(), outcome.coll_total);
            state.summary.coll_liquidated += outcome.coll_total;

            // Collateral not taken by the pool lands on the survivors and can
            // be liquidated again later, so it counts as added.
            let redistributed = outcome.coll_total - outcome.coll_to_stability_pool;
            if redistributed > 0.0 && state.pool.active_count() > 0 {
                state.aggregates.coll_added += redistributed;
            }

            // Collateral handed to depositors, valued at this period's price,
            // less the stablecoins they gave up for it.
            gain.liquidation =
                outcome.coll_to_stability_pool * state.market.ether_price - outcome.debt_offset;

            log::debug!(
                "period={period} liquidation: {} of {} candidates, coll={:.2} debt={:.2} offset={:.2}",
                outcome.liquidated.len(),
                candidates.len(),
                outcome.coll_total,
                outcome.debt_total,
                outcome.debt_offset,
            );

            events.push(SimEvent::LiquidationGainRecorded {
                period,
                liquidation_gain: gain.liquidation,
                airdrop_gain: gain.airdrop,
                debt_offset: outcome.debt_offset,
            });
        }

        state.stability.record(period, gain);
        Ok(events)
    }

    fn as_any(&self) -> &dyn std::any::Any { self }
}
