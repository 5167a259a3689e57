//! Shared primitive types used across the entire simulation.

/// A simulation period. Period 0 is setup; periods 1..=N are simulated.
pub type Period = u64;

/// Stable identifier of a simulated actor. Doubles as its index in the
/// account table, so it never changes once assigned.
pub type AccountId = u32;

/// Ledger-side identifier handed out when a position is opened.
pub type PositionId = u64;

/// The canonical run identifier.
pub type RunId = String;

/// The account that anchors the system: first position, first stability deposit.
pub const WHALE: AccountId = 0;

/// Human-readable handle used in logs and error messages.
pub fn account_handle(id: AccountId) -> String {
    format!("acct-{id:04}")
}
