use crate::{
    config::StabilityConfig,
    error::SimResult,
    event::SimEvent,
    ledger::Ledger,
    phase::{absorb, SimPhase},
    rng::PhaseRng,
    state::SimulationState,
    types::{Period, WHALE},
};

/// Phase 7: the whale resizes its stability deposit.
///
/// Desired deposit = initial · ((1 + r) / (1 + natural_rate))^elasticity,
/// where r is the return realized in the settlement phase.
pub struct StabilityPhase {
    config: StabilityConfig,
}

impl StabilityPhase {
    pub fn new(config: StabilityConfig) -> Self {
        Self { config }
    }

    pub fn desired_deposit(&self, realized_return: f64) -> f64 {
        let relative = (1.0 + realized_return).max(0.0) / (1.0 + self.config.natural_rate);
        let desired = self.config.initial_deposit * relative.powf(self.config.elasticity);
        if desired.is_finite() {
            desired.clamp(0.0, self.config.max_deposit)
        } else {
            self.config.max_deposit
        }
    }
}

impl SimPhase for StabilityPhase {
    fn name(&self) -> &'static str { "stability" }

    fn update(
        &mut self,
        period: Period,
        _events_in: &[SimEvent],
        state: &mut SimulationState,
        ledger: &mut dyn Ledger,
        _rng: &mut PhaseRng,
    ) -> SimResult<Vec<SimEvent>> {
        let mut events = Vec::new();
        let desired = self.desired_deposit(state.stability.last_return);
        let current = ledger.stability_deposit(WHALE);
        let delta = desired - current;
        if delta.abs() < self.config.min_change.max(f64::EPSILON) {
            return Ok(events);
        }

        let result = if delta > 0.0 {
            ledger.provide_stability_deposit(WHALE, delta)
        } else {
            ledger.withdraw_from_stability_pool(WHALE, -delta)
        };
        if absorb(result, period, self.name(), Some(WHALE), state, &mut events)?.is_some() {
            log::debug!("period={period} stability: deposit {current:.2} -> {desired:.2}");
            events.push(SimEvent::StabilityDepositChanged {
                period,
                account: WHALE,
                delta,
                deposit: ledger.stability_deposit(WHALE),
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
    fn natural_return_keeps_the_initial_deposit() {
        let config = SimConfig::default_test().stability;
        let phase = StabilityPhase::new(config.clone());
        let desired = phase.desired_deposit(config.natural_rate);
        assert!((desired - config.initial_deposit).abs() < 1e-6);
    }

    #[test]
    fn desired_deposit_is_bounded() {
        let config = SimConfig::default_test().stability;
        let phase = StabilityPhase::new(config.clone());
        assert_eq!(phase.desired_deposit(10.0), config.max_deposit);
        assert_eq!(phase.desired_deposit(-2.0), 0.0);
        assert!(phase.desired_deposit(0.01) > config.initial_deposit);
    }
}
