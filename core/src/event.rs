//! The event log: every ledger call and decision the pipeline makes.
//!
//! RULE: phases report what they did ONLY through events.
//! Reporting and persistence subscribe to events; phases never print.

use crate::types::{AccountId, Period, RunId};
use serde::{Deserialize, Serialize};

/// Every event emitted during simulation.
/// Variants are appended, never removed or reordered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SimEvent {
    // ── Engine events ──────────────────────────────
    PeriodStarted {
        period: Period,
    },
    PeriodCompleted {
        period: Period,
    },
    RunInitialized {
        run_id: RunId,
        seed: u64,
    },

    // ── Positions ──────────────────────────────────
    OraclePriceSet {
        period: Period,
        price: f64,
    },
    PositionOpened {
        period: Period,
        account: AccountId,
        collateral: f64,
        debt: f64,
        target_cr: f64,
        fee_rate: f64,
    },
    PositionLiquidated {
        period: Period,
        account: AccountId,
        collateral: f64,
        debt: f64,
    },
    PositionClosed {
        period: Period,
        account: AccountId,
        collateral: f64,
        debt: f64,
        cr: f64,
    },
    PositionAdjusted {
        period: Period,
        account: AccountId,
        coll_delta: f64,
        debt_delta: f64,
    },
    LedgerRejected {
        period: Period,
        phase: String,
        account: Option<AccountId>,
        reason: String,
    },

    // ── Stability pool ─────────────────────────────
    LiquidationGainRecorded {
        period: Period,
        liquidation_gain: f64,
        airdrop_gain: f64,
        debt_offset: f64,
    },
    StabilityGainsRealized {
        period: Period,
        realized_from: Period,
        realized_return: f64,
        coll_withdrawn: f64,
        tokens_withdrawn: f64,
    },
    StabilityDepositChanged {
        period: Period,
        account: AccountId,
        delta: f64,
        deposit: f64,
    },

    // ── Market ─────────────────────────────────────
    StablePriceDetermined {
        period: Period,
        price: f64,
        supply: f64,
        stability_demand: f64,
        liquidity_demand: f64,
    },
    Redeemed {
        period: Period,
        amount: f64,
        collateral_drawn: f64,
        fee: f64,
    },
}

impl SimEvent {
    /// Stable string name used for the event_type column.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::PeriodStarted { .. }           => "period_started",
            Self::PeriodCompleted { .. }         => "period_completed",
            Self::RunInitialized { .. }          => "run_initialized",
            Self::OraclePriceSet { .. }          => "oracle_price_set",
            Self::PositionOpened { .. }          => "position_opened",
            Self::PositionLiquidated { .. }      => "position_liquidated",
            Self::PositionClosed { .. }          => "position_closed",
            Self::PositionAdjusted { .. }        => "position_adjusted",
            Self::LedgerRejected { .. }          => "ledger_rejected",
            Self::LiquidationGainRecorded { .. } => "liquidation_gain_recorded",
            Self::StabilityGainsRealized { .. }  => "stability_gains_realized",
            Self::StabilityDepositChanged { .. } => "stability_deposit_changed",
            Self::StablePriceDetermined { .. }   => "stable_price_determined",
            Self::Redeemed { .. }                => "redeemed",
        }
    }
}

/// The event log entry as persisted to SQLite.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLogEntry {
    pub id:         Option<i64>,
    pub run_id:     RunId,
    pub period:     Period,
    pub phase:      String,
    pub event_type: String,
    pub payload:    String, // JSON-serialized SimEvent
}
