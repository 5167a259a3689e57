//! Monte-Carlo trove simulation harness.
//!
//! A seeded, period-by-period simulation of borrowers, liquidations,
//! the stability pool and redemptions, run against any implementation
//! of the `Ledger` trait. See `engine` for the pipeline order.

pub mod account_pool;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod ledger;
pub mod phase;
pub mod reporter;
pub mod rng;
pub mod snapshot;
pub mod state;
pub mod stochastic;
pub mod store;
pub mod types;

pub mod adjustment_phase;
pub mod closure_phase;
pub mod liquidation_phase;
pub mod opening_phase;
pub mod price_discovery_phase;
pub mod price_update_phase;
pub mod redemption_phase;
pub mod settlement_phase;
pub mod stability_phase;
