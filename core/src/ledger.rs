//! The ledger contract: the external, stateful collaborator.
//!
//! RULE: the pipeline touches positions, the stability pool and
//! the oracle ONLY through this trait. Every call is synchronous
//! and atomic; the caller waits for the result before moving on.
//!
//! Errors split in two: domain rejections (the ledger said no for a
//! business reason; the caller skips that account) and everything
//! else (the run is misconfigured or buggy; the caller aborts).

mod memory;

pub use memory::MemoryLedger;

use crate::types::{account_handle, AccountId, PositionId};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionState {
    pub collateral: f64,
    pub debt:       f64,
    pub cr:         f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GlobalState {
    pub total_collateral:       f64,
    pub total_debt:             f64,
    pub stability_pool_balance: f64,
    pub price:                  f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LiquidatedPosition {
    pub account:    AccountId,
    pub collateral: f64,
    pub debt:       f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LiquidationOutcome {
    pub liquidated:             Vec<LiquidatedPosition>,
    pub coll_total:             f64,
    pub debt_total:             f64,
    /// Debt cancelled against stability deposits.
    pub debt_offset:            f64,
    /// Collateral handed to stability depositors for that offset.
    pub coll_to_stability_pool: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StabilityGains {
    pub collateral: f64,
    pub tokens:     f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RedemptionOutcome {
    pub redeemed:         f64,
    pub collateral_drawn: f64,
    pub fee:              f64,
}

/// Business reasons a ledger may turn a request down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    BelowMinimumDebt,
    BelowMinimumCollateralRatio,
    FeeExceedsMaximum,
    InsufficientDeposit,
    NothingToRedeem,
    LastPosition,
}

impl RejectionReason {
    pub fn code(&self) -> &'static str {
        match self {
            Self::BelowMinimumDebt => "below_minimum_debt",
            Self::BelowMinimumCollateralRatio => "below_minimum_collateral_ratio",
            Self::FeeExceedsMaximum => "fee_exceeds_maximum",
            Self::InsufficientDeposit => "insufficient_deposit",
            Self::NothingToRedeem => "nothing_to_redeem",
            Self::LastPosition => "last_position",
        }
    }
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LedgerError {
    #[error("rejected: {reason}")]
    Rejected { reason: RejectionReason },

    #[error("no open position for {}", account_handle(*account))]
    PositionNotFound { account: AccountId },

    #[error("{} already has an open position", account_handle(*account))]
    PositionAlreadyOpen { account: AccountId },

    #[error("invalid amount {amount} passed to {op}")]
    InvalidAmount { op: &'static str, amount: f64 },

    #[error("oracle price has not been set")]
    OracleUnset,
}

impl LedgerError {
    pub fn rejected(reason: RejectionReason) -> Self {
        Self::Rejected { reason }
    }

    /// Expected refusals the pipeline absorbs by skipping the account.
    pub fn is_domain_rejection(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }

    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::Rejected { reason } => reason.code(),
            Self::PositionNotFound { .. } => "position_not_found",
            Self::PositionAlreadyOpen { .. } => "position_already_open",
            Self::InvalidAmount { .. } => "invalid_amount",
            Self::OracleUnset => "oracle_unset",
        }
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;

/// Operations the simulation consumes from the collateralized-debt system.
pub trait Ledger: Send {
    fn set_oracle_price(&mut self, price: f64) -> LedgerResult<()>;

    /// Open a position with `debt` requested (before fee) against `collateral`.
    fn open_position(
        &mut self,
        max_fee: f64,
        debt: f64,
        collateral: f64,
        account: AccountId,
    ) -> LedgerResult<PositionId>;

    fn close_position(&mut self, account: AccountId) -> LedgerResult<()>;

    /// Positive deltas add, negative deltas withdraw / repay.
    fn adjust_position(
        &mut self,
        account: AccountId,
        coll_delta: f64,
        debt_delta: f64,
    ) -> LedgerResult<()>;

    /// Liquidate whichever of `candidates` are under-collateralized at the
    /// current oracle price. Healthy candidates are skipped.
    fn liquidate_positions(&mut self, candidates: &[AccountId]) -> LedgerResult<LiquidationOutcome>;

    fn provide_stability_deposit(&mut self, account: AccountId, amount: f64) -> LedgerResult<()>;

    fn withdraw_from_stability_pool(&mut self, account: AccountId, amount: f64) -> LedgerResult<()>;

    fn withdraw_stability_gains(&mut self, account: AccountId) -> LedgerResult<StabilityGains>;

    fn redeem_collateral(&mut self, amount: f64, max_fee: f64) -> LedgerResult<RedemptionOutcome>;

    fn query_position_state(&self, account: AccountId) -> LedgerResult<PositionState>;

    fn query_global_state(&self) -> LedgerResult<GlobalState>;

    fn stability_deposit(&self, account: AccountId) -> f64;

    /// Depositors with a non-zero deposit or unclaimed gains, ascending.
    fn stability_depositors(&self) -> Vec<AccountId>;

    /// Fee rate a new borrow would pay right now.
    fn borrowing_rate(&self) -> f64;

    fn min_net_debt(&self) -> f64;

    /// Accounts with an open position, ascending.
    fn open_positions(&self) -> Vec<AccountId>;
}
