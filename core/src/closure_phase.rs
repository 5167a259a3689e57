use crate::{
    config::ClosureConfig,
    error::{InvariantKind, SimError, SimResult},
    event::SimEvent,
    ledger::Ledger,
    phase::{absorb, SimPhase},
    rng::PhaseRng,
    state::SimulationState,
    types::{Period, WHALE},
};

/// Phase 4: borrowers far above their target CR pay off and leave.
///
/// The trigger is the borrower's own CR: debt a redemption retired
/// since their last action is added back, so only price moves count.
pub struct ClosurePhase {
    config: ClosureConfig,
}

impl ClosurePhase {
    pub fn new(config: ClosureConfig) -> Self {
        Self { config }
    }

    fn payoff_line(&self, target_cr: f64) -> f64 {
        target_cr * (1.0 + self.config.payoff_margin.max(0.0))
    }
}

impl SimPhase for ClosurePhase {
    fn name(&self) -> &'static str { "closure" }

    fn update(
        &mut self,
        period: Period,
        _events_in: &[SimEvent],
        state: &mut SimulationState,
        ledger: &mut dyn Ledger,
        _rng: &mut PhaseRng,
    ) -> SimResult<Vec<SimEvent>> {
        let mut events = Vec::new();
        let active: Vec<_> = state.pool.query_active().to_vec();

        for id in active {
            if id == WHALE {
                continue;
            }
            let position = ledger
                .query_position_state(id)
                .map_err(|e| SimError::ledger(period, e))?;
            let account = state.pool.get(id)?;
            let own_cr = account.own_cr(position.collateral, position.debt, state.market.ether_price);
            if own_cr <= self.payoff_line(account.target_cr) {
                continue;
            }
            if state.summary.has_exited(id) {
                return Err(state.invariant_violation(
                    period,
                    InvariantKind::DoubleClosure { account: id },
                ));
            }

            let closed = ledger.close_position(id);
            if absorb(closed, period, self.name(), Some(id), state, &mut events)?.is_none() {
                continue;
            }
            state.pool.move_to_inactive(id)?;
            state.summary.closed.push(id);
            state.aggregates.closures += 1;
            events.push(SimEvent::PositionClosed {
                period,
                account: id,
                collateral: position.collateral,
                debt: position.debt,
                cr: position.cr,
            });
        }

        if !state.summary.closed.is_empty() {
            log::debug!("period={period} closure: {} closed", state.summary.closed.len());
        }
        Ok(events)
    }

    fn as_any(&self) -> &dyn std::any::Any { self }
}
