//! In-memory reference ledger.
//!
//! Simplified trove mechanics, enough to drive the pipeline end to end:
//! MCR check on open/adjust, minimum net debt, a decaying base rate that
//! redemptions bump, stability-pool offset with redistribution of the
//! remainder, a per-update reward for depositors, and partial
//! redemptions against the lowest-CR positions.

use super::{
    GlobalState, Ledger, LedgerError, LedgerResult, LiquidatedPosition, LiquidationOutcome,
    PositionState, RedemptionOutcome, RejectionReason, StabilityGains,
};
use crate::{
    config::LedgerParams,
    types::{AccountId, PositionId},
};
use std::collections::BTreeMap;

/// Fraction of the redeemed share of supply added to the base rate.
const REDEMPTION_BETA: f64 = 0.5;

#[derive(Debug, Clone)]
struct Position {
    id:         PositionId,
    collateral: f64,
    debt:       f64,
}

#[derive(Debug, Clone, Default)]
struct Deposit {
    amount:     f64,
    coll_gain:  f64,
    token_gain: f64,
}

#[derive(Debug, Clone)]
pub struct MemoryLedger {
    params:           LedgerParams,
    price:            Option<f64>,
    positions:        BTreeMap<AccountId, Position>,
    deposits:         BTreeMap<AccountId, Deposit>,
    next_position_id: PositionId,
    base_rate:        f64,
}

impl MemoryLedger {
    pub fn new(params: LedgerParams) -> Self {
        Self {
            params,
            price: None,
            positions: BTreeMap::new(),
            deposits: BTreeMap::new(),
            next_position_id: 1,
            base_rate: 0.0,
        }
    }

    pub fn params(&self) -> &LedgerParams {
        &self.params
    }

    pub fn base_rate(&self) -> f64 {
        self.base_rate
    }

    fn price(&self) -> LedgerResult<f64> {
        self.price.ok_or(LedgerError::OracleUnset)
    }

    fn cr(position: &Position, price: f64) -> f64 {
        if position.debt > 0.0 {
            position.collateral * price / position.debt
        } else {
            f64::INFINITY
        }
    }

    fn check_amount(op: &'static str, amount: f64) -> LedgerResult<()> {
        if amount.is_finite() && amount > 0.0 {
            Ok(())
        } else {
            Err(LedgerError::InvalidAmount { op, amount })
        }
    }

    fn total_deposits(&self) -> f64 {
        self.deposits.values().map(|d| d.amount).sum()
    }

    /// Cancel `debt` against deposits pro-rata and hand out `coll` the same way.
    fn offset_against_pool(&mut self, debt: f64, coll: f64) {
        let total = self.total_deposits();
        if total <= 0.0 {
            return;
        }
        for deposit in self.deposits.values_mut() {
            let share = deposit.amount / total;
            deposit.amount = (deposit.amount - debt * share).max(0.0);
            deposit.coll_gain += coll * share;
        }
    }

    /// Spread debt and collateral over surviving positions by collateral share.
    fn redistribute(&mut self, debt: f64, coll: f64) {
        let total_coll: f64 = self.positions.values().map(|p| p.collateral).sum();
        if total_coll <= 0.0 {
            if debt > 0.0 {
                log::warn!("memory ledger: no positions left, dropping {debt:.2} debt");
            }
            return;
        }
        for position in self.positions.values_mut() {
            let share = position.collateral / total_coll;
            position.debt += debt * share;
            position.collateral += coll * share;
        }
    }
}

impl Ledger for MemoryLedger {
    fn set_oracle_price(&mut self, price: f64) -> LedgerResult<()> {
        Self::check_amount("set_oracle_price", price)?;
        self.price = Some(price);
        self.base_rate *= self.params.base_rate_decay;

        let total = self.total_deposits();
        if total > 0.0 && self.params.reward_per_update > 0.0 {
            for deposit in self.deposits.values_mut() {
                deposit.token_gain += self.params.reward_per_update * deposit.amount / total;
            }
        }
        Ok(())
    }

    fn open_position(
        &mut self,
        max_fee: f64,
        debt: f64,
        collateral: f64,
        account: AccountId,
    ) -> LedgerResult<PositionId> {
        let price = self.price()?;
        if self.positions.contains_key(&account) {
            return Err(LedgerError::PositionAlreadyOpen { account });
        }
        Self::check_amount("open_position.debt", debt)?;
        Self::check_amount("open_position.collateral", collateral)?;
        if debt < self.params.min_net_debt {
            return Err(LedgerError::rejected(RejectionReason::BelowMinimumDebt));
        }
        let fee_rate = self.borrowing_rate();
        if fee_rate > max_fee {
            return Err(LedgerError::rejected(RejectionReason::FeeExceedsMaximum));
        }
        let position = Position {
            id: self.next_position_id,
            collateral,
            debt: debt * (1.0 + fee_rate),
        };
        if Self::cr(&position, price) < self.params.mcr {
            return Err(LedgerError::rejected(RejectionReason::BelowMinimumCollateralRatio));
        }
        self.next_position_id += 1;
        let id = position.id;
        self.positions.insert(account, position);
        Ok(id)
    }

    fn close_position(&mut self, account: AccountId) -> LedgerResult<()> {
        if !self.positions.contains_key(&account) {
            return Err(LedgerError::PositionNotFound { account });
        }
        if self.positions.len() == 1 {
            return Err(LedgerError::rejected(RejectionReason::LastPosition));
        }
        self.positions.remove(&account);
        Ok(())
    }

    fn adjust_position(
        &mut self,
        account: AccountId,
        coll_delta: f64,
        debt_delta: f64,
    ) -> LedgerResult<()> {
        let price = self.price()?;
        if !coll_delta.is_finite() {
            return Err(LedgerError::InvalidAmount { op: "adjust_position.coll", amount: coll_delta });
        }
        if !debt_delta.is_finite() {
            return Err(LedgerError::InvalidAmount { op: "adjust_position.debt", amount: debt_delta });
        }
        let fee_rate = self.borrowing_rate();
        let min_net_debt = self.params.min_net_debt;
        let mcr = self.params.mcr;
        let position = self
            .positions
            .get(&account)
            .ok_or(LedgerError::PositionNotFound { account })?;

        let collateral = position.collateral + coll_delta;
        if collateral <= 0.0 {
            return Err(LedgerError::InvalidAmount { op: "adjust_position.coll", amount: coll_delta });
        }
        let debt = if debt_delta > 0.0 {
            position.debt + debt_delta * (1.0 + fee_rate)
        } else {
            position.debt + debt_delta
        };
        if debt < min_net_debt {
            return Err(LedgerError::rejected(RejectionReason::BelowMinimumDebt));
        }
        let candidate = Position { id: position.id, collateral, debt };
        if Self::cr(&candidate, price) < mcr {
            return Err(LedgerError::rejected(RejectionReason::BelowMinimumCollateralRatio));
        }
        self.positions.insert(account, candidate);
        Ok(())
    }

    fn liquidate_positions(&mut self, candidates: &[AccountId]) -> LedgerResult<LiquidationOutcome> {
        let price = self.price()?;
        let mut outcome = LiquidationOutcome::default();
        for &account in candidates {
            let position = self
                .positions
                .get(&account)
                .ok_or(LedgerError::PositionNotFound { account })?;
            if Self::cr(position, price) >= self.params.mcr {
                continue;
            }
            let Some(position) = self.positions.remove(&account) else {
                continue;
            };

            let pool = self.total_deposits();
            let offset = position.debt.min(pool);
            let coll_offset = if position.debt > 0.0 {
                position.collateral * offset / position.debt
            } else {
                0.0
            };
            self.offset_against_pool(offset, coll_offset);
            self.redistribute(position.debt - offset, position.collateral - coll_offset);

            outcome.liquidated.push(LiquidatedPosition {
                account,
                collateral: position.collateral,
                debt: position.debt,
            });
            outcome.coll_total += position.collateral;
            outcome.debt_total += position.debt;
            outcome.debt_offset += offset;
            outcome.coll_to_stability_pool += coll_offset;
        }
        Ok(outcome)
    }

    fn provide_stability_deposit(&mut self, account: AccountId, amount: f64) -> LedgerResult<()> {
        Self::check_amount("provide_stability_deposit", amount)?;
        self.deposits.entry(account).or_default().amount += amount;
        Ok(())
    }

    fn withdraw_from_stability_pool(&mut self, account: AccountId, amount: f64) -> LedgerResult<()> {
        Self::check_amount("withdraw_from_stability_pool", amount)?;
        let deposit = self
            .deposits
            .get_mut(&account)
            .ok_or(LedgerError::rejected(RejectionReason::InsufficientDeposit))?;
        if amount > deposit.amount {
            return Err(LedgerError::rejected(RejectionReason::InsufficientDeposit));
        }
        deposit.amount -= amount;
        Ok(())
    }

    fn withdraw_stability_gains(&mut self, account: AccountId) -> LedgerResult<StabilityGains> {
        let deposit = self
            .deposits
            .get_mut(&account)
            .ok_or(LedgerError::rejected(RejectionReason::InsufficientDeposit))?;
        let gains = StabilityGains {
            collateral: deposit.coll_gain,
            tokens: deposit.token_gain,
        };
        deposit.coll_gain = 0.0;
        deposit.token_gain = 0.0;
        Ok(gains)
    }

    fn redeem_collateral(&mut self, amount: f64, max_fee: f64) -> LedgerResult<RedemptionOutcome> {
        let price = self.price()?;
        Self::check_amount("redeem_collateral", amount)?;
        let supply: f64 = self.positions.values().map(|p| p.debt).sum();
        if supply <= 0.0 {
            return Err(LedgerError::rejected(RejectionReason::NothingToRedeem));
        }
        let bumped = (self.base_rate + REDEMPTION_BETA * amount / supply).min(1.0);
        let fee_rate = (self.params.redemption_fee_floor + bumped).min(1.0);
        if fee_rate > max_fee {
            return Err(LedgerError::rejected(RejectionReason::FeeExceedsMaximum));
        }

        let mut order: Vec<(AccountId, f64)> = self
            .positions
            .iter()
            .map(|(&id, p)| (id, Self::cr(p, price)))
            .filter(|&(_, cr)| cr >= self.params.mcr)
            .collect();
        order.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));

        let mut remaining = amount;
        let mut outcome = RedemptionOutcome::default();
        for (id, _) in order {
            if remaining <= 0.0 {
                break;
            }
            let Some(position) = self.positions.get_mut(&id) else {
                continue;
            };
            let redeemable = (position.debt - self.params.min_net_debt).max(0.0);
            let take = remaining.min(redeemable);
            if take <= 0.0 {
                continue;
            }
            let coll = take / price;
            position.debt -= take;
            position.collateral -= coll;
            remaining -= take;
            outcome.redeemed += take;
            outcome.collateral_drawn += coll;
        }
        if outcome.redeemed <= 0.0 {
            return Err(LedgerError::rejected(RejectionReason::NothingToRedeem));
        }
        self.base_rate = bumped;
        outcome.fee = outcome.collateral_drawn * fee_rate;
        Ok(outcome)
    }

    fn query_position_state(&self, account: AccountId) -> LedgerResult<PositionState> {
        let price = self.price()?;
        let position = self
            .positions
            .get(&account)
            .ok_or(LedgerError::PositionNotFound { account })?;
        Ok(PositionState {
            collateral: position.collateral,
            debt: position.debt,
            cr: Self::cr(position, price),
        })
    }

    fn query_global_state(&self) -> LedgerResult<GlobalState> {
        let price = self.price()?;
        Ok(GlobalState {
            total_collateral: self.positions.values().map(|p| p.collateral).sum(),
            total_debt: self.positions.values().map(|p| p.debt).sum(),
            stability_pool_balance: self.total_deposits(),
            price,
        })
    }

    fn stability_deposit(&self, account: AccountId) -> f64 {
        self.deposits.get(&account).map(|d| d.amount).unwrap_or(0.0)
    }

    fn stability_depositors(&self) -> Vec<AccountId> {
        self.deposits
            .iter()
            .filter(|(_, d)| d.amount > 0.0 || d.coll_gain > 0.0 || d.token_gain > 0.0)
            .map(|(&id, _)| id)
            .collect()
    }

    fn borrowing_rate(&self) -> f64 {
        (self.params.borrowing_fee_floor + self.base_rate).min(self.params.borrowing_fee_cap)
    }

    fn min_net_debt(&self) -> f64 {
        self.params.min_net_debt
    }

    fn open_positions(&self) -> Vec<AccountId> {
        self.positions.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger_at(price: f64) -> MemoryLedger {
        let mut ledger = MemoryLedger::new(LedgerParams {
            reward_per_update: 0.0,
            ..LedgerParams::default()
        });
        ledger.set_oracle_price(price).unwrap();
        ledger
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-6 * b.abs().max(1.0)
    }

    #[test]
    fn open_charges_the_borrowing_fee() {
        let mut ledger = ledger_at(2000.0);
        ledger.open_position(0.05, 10_000.0, 10.0, 1).unwrap();
        let pos = ledger.query_position_state(1).unwrap();
        assert!(approx(pos.debt, 10_050.0));
        assert!(approx(pos.cr, 20_000.0 / 10_050.0));
    }

    #[test]
    fn open_rejections_are_domain_rejections() {
        let mut ledger = ledger_at(2000.0);
        let small = ledger.open_position(0.05, 100.0, 10.0, 1).unwrap_err();
        assert_eq!(small, LedgerError::rejected(RejectionReason::BelowMinimumDebt));
        let thin = ledger.open_position(0.05, 19_000.0, 10.0, 1).unwrap_err();
        assert_eq!(thin, LedgerError::rejected(RejectionReason::BelowMinimumCollateralRatio));
        let fee = ledger.open_position(0.001, 10_000.0, 10.0, 1).unwrap_err();
        assert_eq!(fee, LedgerError::rejected(RejectionReason::FeeExceedsMaximum));
        assert!(small.is_domain_rejection() && thin.is_domain_rejection());
    }

    #[test]
    fn duplicate_open_and_missing_close_are_not_domain_rejections() {
        let mut ledger = ledger_at(2000.0);
        ledger.open_position(0.05, 10_000.0, 10.0, 1).unwrap();
        ledger.open_position(0.05, 10_000.0, 10.0, 2).unwrap();
        let dup = ledger.open_position(0.05, 10_000.0, 10.0, 1).unwrap_err();
        assert!(!dup.is_domain_rejection());
        let missing = ledger.close_position(7).unwrap_err();
        assert_eq!(missing, LedgerError::PositionNotFound { account: 7 });
        assert!(!missing.is_domain_rejection());
    }

    #[test]
    fn last_position_cannot_close() {
        let mut ledger = ledger_at(2000.0);
        ledger.open_position(0.05, 10_000.0, 10.0, 1).unwrap();
        assert_eq!(
            ledger.close_position(1),
            Err(LedgerError::rejected(RejectionReason::LastPosition))
        );
    }

    #[test]
    fn oracle_must_be_set_first() {
        let mut ledger = MemoryLedger::new(LedgerParams::default());
        assert_eq!(
            ledger.open_position(0.05, 10_000.0, 10.0, 1),
            Err(LedgerError::OracleUnset)
        );
        assert!(ledger.set_oracle_price(0.0).is_err());
    }

    #[test]
    fn liquidation_offsets_against_the_stability_pool() {
        let mut ledger = ledger_at(2000.0);
        ledger.open_position(0.05, 1_000_000.0, 3000.0, 0).unwrap(); // CR ~5.97
        ledger.open_position(0.05, 15_000.0, 10.0, 1).unwrap(); // CR ~1.33
        ledger.provide_stability_deposit(0, 100_000.0).unwrap();

        ledger.set_oracle_price(1500.0).unwrap(); // acct 1 CR ~0.995
        let outcome = ledger.liquidate_positions(&[0, 1]).unwrap();

        assert_eq!(outcome.liquidated.len(), 1);
        assert_eq!(outcome.liquidated[0].account, 1);
        assert!(approx(outcome.debt_offset, 15_075.0));
        assert!(approx(outcome.coll_to_stability_pool, 10.0));
        assert!(approx(ledger.stability_deposit(0), 100_000.0 - 15_075.0));
        assert_eq!(ledger.open_positions(), vec![0]);

        let gains = ledger.withdraw_stability_gains(0).unwrap();
        assert!(approx(gains.collateral, 10.0));
        let again = ledger.withdraw_stability_gains(0).unwrap();
        assert_eq!(again.collateral, 0.0);
    }

    #[test]
    fn shortfall_is_redistributed_to_survivors() {
        let mut ledger = ledger_at(2000.0);
        ledger.open_position(0.05, 1_000_000.0, 3000.0, 0).unwrap();
        ledger.open_position(0.05, 15_000.0, 10.0, 1).unwrap();
        ledger.provide_stability_deposit(0, 5_000.0).unwrap();
        let before = ledger.query_position_state(0).unwrap();

        ledger.set_oracle_price(1500.0).unwrap();
        let outcome = ledger.liquidate_positions(&[1]).unwrap();

        assert!(approx(outcome.debt_offset, 5_000.0));
        let after = ledger.query_position_state(0).unwrap();
        assert!(approx(after.debt - before.debt, 15_075.0 - 5_000.0));
        assert!(approx(
            after.collateral - before.collateral,
            10.0 - outcome.coll_to_stability_pool
        ));
        assert!(approx(ledger.stability_deposit(0), 0.0));
    }

    #[test]
    fn healthy_candidates_are_skipped() {
        let mut ledger = ledger_at(2000.0);
        ledger.open_position(0.05, 10_000.0, 10.0, 1).unwrap();
        let outcome = ledger.liquidate_positions(&[1]).unwrap();
        assert!(outcome.liquidated.is_empty());
        assert_eq!(ledger.open_positions(), vec![1]);
    }

    #[test]
    fn redemption_hits_lowest_cr_first_and_respects_min_debt() {
        let mut ledger = ledger_at(2000.0);
        ledger.open_position(0.05, 1_000_000.0, 3000.0, 0).unwrap();
        ledger.open_position(0.05, 15_000.0, 10.0, 1).unwrap();
        let low_debt = ledger.query_position_state(1).unwrap().debt;

        let outcome = ledger.redeem_collateral(20_000.0, 1.0).unwrap();
        assert!(approx(outcome.redeemed, 20_000.0));
        let low = ledger.query_position_state(1).unwrap();
        assert!(approx(low.debt, 1800.0));
        let taken_from_low = low_debt - 1800.0;
        assert!(approx(low.collateral, 10.0 - taken_from_low / 2000.0));
        assert!(approx(outcome.collateral_drawn, 10.0));
        assert!(ledger.base_rate() > 0.0);
        assert!(ledger.borrowing_rate() > 0.005);
    }

    #[test]
    fn redemption_fee_guard_rejects() {
        let mut ledger = ledger_at(2000.0);
        ledger.open_position(0.05, 1_000_000.0, 3000.0, 0).unwrap();
        let err = ledger.redeem_collateral(500_000.0, 0.01).unwrap_err();
        assert_eq!(err, LedgerError::rejected(RejectionReason::FeeExceedsMaximum));
        assert_eq!(ledger.base_rate(), 0.0);
    }

    #[test]
    fn adjust_applies_fee_on_new_debt_and_checks_mcr() {
        let mut ledger = ledger_at(2000.0);
        ledger.open_position(0.05, 10_000.0, 10.0, 1).unwrap();
        ledger.adjust_position(1, 1.0, 0.0).unwrap();
        assert!(approx(ledger.query_position_state(1).unwrap().collateral, 11.0));

        ledger.adjust_position(1, 0.0, 1_000.0).unwrap();
        assert!(approx(ledger.query_position_state(1).unwrap().debt, 10_050.0 + 1_005.0));

        let err = ledger.adjust_position(1, 0.0, 15_000.0).unwrap_err();
        assert_eq!(err, LedgerError::rejected(RejectionReason::BelowMinimumCollateralRatio));
        let err = ledger.adjust_position(1, 0.0, -10_000.0).unwrap_err();
        assert_eq!(err, LedgerError::rejected(RejectionReason::BelowMinimumDebt));
    }

    #[test]
    fn rewards_accrue_to_depositors_on_price_updates() {
        let mut ledger = MemoryLedger::new(LedgerParams::default());
        ledger.set_oracle_price(2000.0).unwrap();
        ledger.provide_stability_deposit(0, 300.0).unwrap();
        ledger.provide_stability_deposit(5, 100.0).unwrap();
        ledger.set_oracle_price(2000.0).unwrap();
        let whale = ledger.withdraw_stability_gains(0).unwrap();
        let small = ledger.withdraw_stability_gains(5).unwrap();
        assert!(approx(whale.tokens, 750.0));
        assert!(approx(small.tokens, 250.0));
        assert_eq!(ledger.stability_depositors(), vec![0, 5]);
    }

    #[test]
    fn withdrawing_more_than_deposited_is_rejected() {
        let mut ledger = ledger_at(2000.0);
        ledger.provide_stability_deposit(0, 100.0).unwrap();
        assert_eq!(
            ledger.withdraw_from_stability_pool(0, 150.0),
            Err(LedgerError::rejected(RejectionReason::InsufficientDeposit))
        );
        ledger.withdraw_from_stability_pool(0, 100.0).unwrap();
        assert_eq!(ledger.stability_deposit(0), 0.0);
    }
}
