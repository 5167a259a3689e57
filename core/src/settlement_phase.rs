use crate::{
    error::{SimError, SimResult},
    event::SimEvent,
    ledger::Ledger,
    phase::{absorb, SimPhase},
    rng::PhaseRng,
    state::SimulationState,
    types::Period,
};

/// Phase 3: realize last period's stability pool gain.
///
/// Gains booked by the liquidation phase in period t-1 are paid out
/// in period t. Every depositor sweeps its ledger-side gains, and the
/// realized return feeds the stability update later this period.
#[derive(Debug, Default)]
pub struct SettlementPhase;

impl SettlementPhase {
    pub fn new() -> Self {
        Self
    }
}

impl SimPhase for SettlementPhase {
    fn name(&self) -> &'static str { "settlement" }

    fn update(
        &mut self,
        period: Period,
        _events_in: &[SimEvent],
        state: &mut SimulationState,
        ledger: &mut dyn Ledger,
        _rng: &mut PhaseRng,
    ) -> SimResult<Vec<SimEvent>> {
        let mut events = Vec::new();
        let realized_from = period.saturating_sub(1);
        let gain = state.stability.take(realized_from);

        let mut coll_withdrawn = 0.0;
        let mut tokens_withdrawn = 0.0;
        for depositor in ledger.stability_depositors() {
            let swept = ledger.withdraw_stability_gains(depositor);
            if let Some(gains) =
                absorb(swept, period, self.name(), Some(depositor), state, &mut events)?
            {
                coll_withdrawn += gains.collateral;
                tokens_withdrawn += gains.tokens;
            }
        }

        let balance = ledger
            .query_global_state()
            .map_err(|e| SimError::ledger(period, e))?
            .stability_pool_balance;
        let realized_return = if balance > 0.0 {
            gain.total() / balance
        } else {
            0.0
        };
        state.stability.last_return = realized_return;

        log::debug!(
            "period={period} settlement: gain[{realized_from}]={:.2} pool={balance:.2} return={realized_return:.6}",
            gain.total(),
        );

        events.push(SimEvent::StabilityGainsRealized {
            period,
            realized_from,
            realized_return,
            coll_withdrawn,
            tokens_withdrawn,
        });
        Ok(events)
    }

    fn as_any(&self) -> &dyn std::any::Any { self }
}
