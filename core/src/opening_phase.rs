//! Phase 6: inactive borrowers open new positions.
//!
//! The number of openings is drawn from demand (stable price and the
//! current issuance fee); each opener draws its collateral, target CR
//! and inattention, and borrows exactly enough that its CR lands on
//! target once the fee is added.

use crate::{
    account_pool::PositionAttrs,
    config::OpeningConfig,
    error::{InvariantKind, SimError, SimResult},
    event::SimEvent,
    ledger::Ledger,
    phase::{absorb, SimPhase},
    rng::PhaseRng,
    state::SimulationState,
    stochastic::{opening_count, OpeningDistributions, OpeningDraw},
    types::{AccountId, Period},
};

pub struct OpeningPhase {
    config:        OpeningConfig,
    distributions: OpeningDistributions,
    max_fee:       f64,
    population:    usize,
}

impl OpeningPhase {
    pub fn new(
        config: OpeningConfig,
        liquidation_cr: f64,
        max_fee: f64,
        population: usize,
    ) -> SimResult<Self> {
        let distributions = OpeningDistributions::from_config(&config, liquidation_cr)?;
        Ok(Self {
            config,
            distributions,
            max_fee,
            population,
        })
    }
}

/// Open a position for `id` sized from `draw`. Returns whether the
/// ledger accepted it. Shared with run setup.
#[allow(clippy::too_many_arguments)]
pub fn open_borrower(
    id: AccountId,
    draw: OpeningDraw,
    max_fee: f64,
    period: Period,
    phase: &'static str,
    state: &mut SimulationState,
    ledger: &mut dyn Ledger,
    events: &mut Vec<SimEvent>,
) -> SimResult<bool> {
    let price = state.market.ether_price;
    let fee_rate = ledger.borrowing_rate();
    let debt = draw.collateral * price / (draw.target_cr * (1.0 + fee_rate));

    let opened = ledger.open_position(max_fee, debt, draw.collateral, id);
    if absorb(opened, period, phase, Some(id), state, events)?.is_none() {
        return Ok(false);
    }

    let position = ledger
        .query_position_state(id)
        .map_err(|e| SimError::ledger(period, e))?;
    state.pool.move_to_active(
        id,
        PositionAttrs {
            collateral:  position.collateral,
            debt:        position.debt,
            target_cr:   draw.target_cr,
            inattention: draw.inattention,
            price,
        },
        period,
    )?;

    state.aggregates.coll_added += draw.collateral;
    state.aggregates.openings += 1;
    state.aggregates.issuance_fees += debt * fee_rate;
    state.summary.coll_added += draw.collateral;
    state.summary.opened.push(id);

    events.push(SimEvent::PositionOpened {
        period,
        account: id,
        collateral: draw.collateral,
        debt: position.debt,
        target_cr: draw.target_cr,
        fee_rate,
    });
    Ok(true)
}

impl SimPhase for OpeningPhase {
    fn name(&self) -> &'static str { "opening" }

    fn update(
        &mut self,
        period: Period,
        _events_in: &[SimEvent],
        state: &mut SimulationState,
        ledger: &mut dyn Ledger,
        rng: &mut PhaseRng,
    ) -> SimResult<Vec<SimEvent>> {
        let mut events = Vec::new();
        let fee_rate = ledger.borrowing_rate();
        state.market.issuance_fee = fee_rate;

        let count = opening_count(
            &self.config,
            state.market.stable_price,
            fee_rate,
            state.pool.inactive_borrowers().len(),
            self.population,
            rng,
        );

        for _ in 0..count {
            let eligible = state.pool.inactive_borrowers();
            if eligible.is_empty() {
                break;
            }
            let id = eligible[rng.next_u64_below(eligible.len() as u64) as usize];
            let draw = self.distributions.draw(rng);
            open_borrower(id, draw, self.max_fee, period, self.name(), state, ledger, &mut events)?;
        }

        let summary = &state.summary;
        let expected = (summary.active_at_start + summary.opened.len())
            .saturating_sub(summary.liquidated.len() + summary.closed.len());
        let actual = state.pool.active_count();
        state.summary.active_after_opening = actual;
        if actual != expected {
            return Err(state.invariant_violation(
                period,
                InvariantKind::ActiveCountMismatch { expected, actual },
            ));
        }

        log::debug!(
            "period={period} opening: {count} drawn, {} opened, fee={fee_rate:.4}, active={actual}",
            state.summary.opened.len(),
        );
        Ok(events)
    }

    fn as_any(&self) -> &dyn std::any::Any { self }
}
