//! Simulation clock: owns the period counter and the run horizon.

use crate::types::{Period, RunId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SimClock {
    pub run_id:         RunId,
    pub current_period: Period,
    pub horizon:        Period,
}

impl SimClock {
    pub fn new(run_id: RunId, horizon: Period) -> Self {
        Self {
            run_id,
            current_period: 0,
            horizon,
        }
    }

    /// Advance one period. Returns the new period number.
    /// Panics past the horizon; callers must check `is_finished`.
    pub fn advance(&mut self) -> Period {
        assert!(!self.is_finished(), "advance() called past the horizon");
        self.current_period += 1;
        self.current_period
    }

    pub fn is_finished(&self) -> bool {
        self.current_period >= self.horizon
    }

    pub fn remaining(&self) -> Period {
        self.horizon.saturating_sub(self.current_period)
    }
}
