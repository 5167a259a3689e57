//! Phase trait and the rejection-absorbing helper every phase shares.
//!
//! RULE: Every pipeline step implements SimPhase.
//! The engine calls update() on each registered phase
//! in registration order, once per period.
//! Execution order is fixed and documented in engine.rs.

use crate::{
    error::{SimError, SimResult},
    event::SimEvent,
    ledger::{Ledger, LedgerResult},
    rng::PhaseRng,
    state::SimulationState,
    types::{account_handle, AccountId, Period},
};
use std::any::Any;

/// The contract every pipeline phase must fulfill.
pub trait SimPhase: Send {
    /// Unique stable name for this phase.
    fn name(&self) -> &'static str;

    /// Called once per period by the engine.
    ///
    /// - `period`:    the current period number
    /// - `events_in`: events emitted by earlier phases this period
    /// - `state`:     the shared simulation state
    /// - `ledger`:    the external ledger
    /// - `rng`:       this phase's deterministic RNG for this period
    ///
    /// Returns the events this phase emitted.
    fn update(
        &mut self,
        period: Period,
        events_in: &[SimEvent],
        state: &mut SimulationState,
        ledger: &mut dyn Ledger,
        rng: &mut PhaseRng,
    ) -> SimResult<Vec<SimEvent>>;

    /// For downcasting in tests and tooling only.
    fn as_any(&self) -> &dyn Any;
}

/// Turn a ledger result into `Some(value)`, or `None` when the ledger
/// refused for a business reason. Refusals are logged, counted as
/// skipped and recorded as a `LedgerRejected` event. Every other
/// ledger error aborts the period.
pub fn absorb<T>(
    result: LedgerResult<T>,
    period: Period,
    phase: &'static str,
    account: Option<AccountId>,
    state: &mut SimulationState,
    events: &mut Vec<SimEvent>,
) -> SimResult<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_domain_rejection() => {
            let who = account.map(account_handle).unwrap_or_else(|| "-".into());
            log::debug!("period={period} {phase}: {who} skipped ({e})");
            state.summary.skipped += 1;
            events.push(SimEvent::LedgerRejected {
                period,
                phase: phase.to_string(),
                account,
                reason: e.reason_code().to_string(),
            });
            Ok(None)
        }
        Err(e) => Err(SimError::ledger(period, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ledger::{LedgerError, RejectionReason},
        stochastic::PricePath,
    };

    fn state() -> SimulationState {
        SimulationState::new(3, PricePath::flat(2000.0, 2).unwrap())
    }

    #[test]
    fn domain_rejection_is_skipped_and_recorded() {
        let mut state = state();
        let mut events = Vec::new();
        let result: LedgerResult<()> = Err(LedgerError::rejected(RejectionReason::BelowMinimumDebt));
        let out = absorb(result, 4, "opening", Some(2), &mut state, &mut events).unwrap();
        assert!(out.is_none());
        assert_eq!(state.summary.skipped, 1);
        assert!(matches!(
            &events[0],
            SimEvent::LedgerRejected { reason, account: Some(2), .. } if reason == "below_minimum_debt"
        ));
    }

    #[test]
    fn other_ledger_errors_abort() {
        let mut state = state();
        let mut events = Vec::new();
        let result: LedgerResult<()> = Err(LedgerError::PositionNotFound { account: 2 });
        let err = absorb(result, 4, "closure", Some(2), &mut state, &mut events).unwrap_err();
        assert!(matches!(err, SimError::Ledger { period: 4, .. }));
        assert!(events.is_empty());
        assert_eq!(state.summary.skipped, 0);
    }
}
