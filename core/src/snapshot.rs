//! Snapshot serialization: run state to JSON.
//!
//! A snapshot is taken every SNAPSHOT_INTERVAL periods and after the
//! final period. It records enough to inspect a run mid-way without
//! replaying the event log from period 0.

use crate::{
    clock::SimClock,
    state::{AggregateState, MarketState, SimulationState},
    types::{AccountId, Period, RunId},
};
use serde::{Deserialize, Serialize};

pub const SNAPSHOT_INTERVAL: Period = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimSnapshot {
    pub run_id:     RunId,
    pub period:     Period,
    pub clock:      SimClock,
    pub aggregates: AggregateState,
    pub market:     MarketState,
    pub active:     Vec<AccountId>,
    pub inactive:   Vec<AccountId>,
}

impl SimSnapshot {
    pub fn capture(run_id: &str, clock: &SimClock, state: &SimulationState) -> Self {
        Self {
            run_id:     run_id.to_string(),
            period:     clock.current_period,
            clock:      clock.clone(),
            aggregates: state.aggregates.clone(),
            market:     state.market.clone(),
            active:     state.pool.query_active().to_vec(),
            inactive:   state.pool.inactive().collect(),
        }
    }
}
