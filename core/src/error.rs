use crate::{
    account_pool::PoolError,
    ledger::LedgerError,
    types::{account_handle, AccountId, Period},
};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SimError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Unexpected ledger failure in period {period}: {source}")]
    Ledger {
        period: Period,
        #[source]
        source: LedgerError,
    },

    #[error("Account pool error: {0}")]
    Pool(#[from] PoolError),

    #[error("Invariant violated in period {period}: {kind} (state: {snapshot})")]
    InvariantViolation {
        period:   Period,
        kind:     InvariantKind,
        snapshot: String,
    },

    #[error("Horizon of {horizon} periods already reached")]
    HorizonExhausted { horizon: Period },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SimError {
    pub fn ledger(period: Period, source: LedgerError) -> Self {
        Self::Ledger { period, source }
    }

    /// True for errors that signal a broken run rather than bad input.
    pub fn is_fatal_invariant(&self) -> bool {
        matches!(self, Self::InvariantViolation { .. })
    }
}

pub type SimResult<T> = Result<T, SimError>;

/// What exactly went wrong when a run aborts on an invariant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InvariantKind {
    NonPositivePrice { price: f64 },
    DoubleLiquidation { account: AccountId },
    DoubleClosure { account: AccountId },
    UnknownLiquidation { account: AccountId },
    AccountingMismatch { coll_liquidated: f64, coll_added: f64 },
    ActiveCountMismatch { expected: usize, actual: usize },
    LedgerOutOfSync { active: Vec<AccountId>, ledger: Vec<AccountId> },
    PartitionBroken { reason: String },
}

impl fmt::Display for InvariantKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NonPositivePrice { price } => {
                write!(f, "stablecoin price {price} is not strictly positive")
            }
            Self::DoubleLiquidation { account } => {
                write!(f, "{} liquidated twice in one period", account_handle(*account))
            }
            Self::DoubleClosure { account } => {
                write!(f, "{} closed twice in one period", account_handle(*account))
            }
            Self::UnknownLiquidation { account } => {
                write!(f, "ledger liquidated {} which is not active", account_handle(*account))
            }
            Self::AccountingMismatch { coll_liquidated, coll_added } => write!(
                f,
                "liquidated collateral {coll_liquidated:.4} exceeds added collateral {coll_added:.4}"
            ),
            Self::ActiveCountMismatch { expected, actual } => {
                write!(f, "expected {expected} active accounts after opening, found {actual}")
            }
            Self::LedgerOutOfSync { active, ledger } => write!(
                f,
                "{} active accounts but {} open positions on the ledger",
                active.len(),
                ledger.len()
            ),
            Self::PartitionBroken { reason } => write!(f, "account partition broken: {reason}"),
        }
    }
}
