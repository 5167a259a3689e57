//! Account pool: the active/inactive partition of simulated actors.
//!
//! RULE: every account sits in exactly one partition.
//! The active sequence keeps insertion order inside a period;
//! only the engine re-sorts it, and only between periods.

use crate::{
    config::ActiveSortKey,
    types::{account_handle, AccountId, Period, WHALE},
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PoolError {
    #[error("unknown account {0}")]
    UnknownAccount(AccountId),

    #[error("{} is already active", account_handle(*.0))]
    AlreadyActive(AccountId),

    #[error("{} is already inactive", account_handle(*.0))]
    AlreadyInactive(AccountId),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AccountRole {
    Whale,
    Borrower,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    Inactive,
    Active,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatedAccount {
    pub id:          AccountId,
    pub role:        AccountRole,
    pub status:      AccountStatus,
    pub collateral:  f64,
    pub debt:        f64,
    pub target_cr:   f64,
    /// Probability of ignoring a price move in a given period.
    pub inattention: f64,
    pub initial_cr:  f64,
    pub opened_in:   Option<Period>,
    /// Debt and collateral redemptions took since the borrower last acted.
    #[serde(default)]
    pub redeemed_debt: f64,
    #[serde(default)]
    pub redeemed_coll: f64,
    /// Free-form parameters for experiments that have not earned a field yet.
    #[serde(default)]
    pub extensions:  BTreeMap<String, f64>,
}

impl SimulatedAccount {
    fn new(id: AccountId, role: AccountRole) -> Self {
        Self {
            id,
            role,
            status: AccountStatus::Inactive,
            collateral: 0.0,
            debt: 0.0,
            target_cr: 0.0,
            inattention: 0.0,
            initial_cr: 0.0,
            opened_in: None,
            redeemed_debt: 0.0,
            redeemed_coll: 0.0,
            extensions: BTreeMap::new(),
        }
    }

    /// Collateral ratio at `price`, from the last synced position figures.
    pub fn current_cr(&self, price: f64) -> f64 {
        if self.debt > 0.0 {
            self.collateral * price / self.debt
        } else {
            f64::INFINITY
        }
    }

    /// CR of a live position with redemptions since the borrower's last
    /// action undone: the ratio the borrower chose, moved only by price.
    pub fn own_cr(&self, collateral: f64, debt: f64, price: f64) -> f64 {
        let debt = debt + self.redeemed_debt;
        if debt > 0.0 {
            (collateral + self.redeemed_coll) * price / debt
        } else {
            f64::INFINITY
        }
    }

    pub fn is_whale(&self) -> bool {
        self.role == AccountRole::Whale
    }
}

/// Attributes assigned when an account opens a position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionAttrs {
    pub collateral:  f64,
    pub debt:        f64,
    pub target_cr:   f64,
    pub inattention: f64,
    pub price:       f64,
}

/// Incremental change to an active account's attributes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttributeDelta {
    pub collateral:  f64,
    pub debt:        f64,
    pub target_cr:   Option<f64>,
    pub inattention: Option<f64>,
    pub extensions:  Vec<(String, f64)>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountPool {
    accounts: Vec<SimulatedAccount>,
    active:   Vec<AccountId>,
    inactive: BTreeSet<AccountId>,
}

impl AccountPool {
    /// The whale plus `population` borrowers, all inactive.
    pub fn new(population: usize) -> Self {
        let mut accounts = Vec::with_capacity(population + 1);
        accounts.push(SimulatedAccount::new(WHALE, AccountRole::Whale));
        for i in 1..=population {
            accounts.push(SimulatedAccount::new(i as AccountId, AccountRole::Borrower));
        }
        let inactive = accounts.iter().map(|a| a.id).collect();
        Self {
            accounts,
            active: Vec::new(),
            inactive,
        }
    }

    pub fn get(&self, id: AccountId) -> Result<&SimulatedAccount, PoolError> {
        self.accounts
            .get(id as usize)
            .ok_or(PoolError::UnknownAccount(id))
    }

    fn get_mut(&mut self, id: AccountId) -> Result<&mut SimulatedAccount, PoolError> {
        self.accounts
            .get_mut(id as usize)
            .ok_or(PoolError::UnknownAccount(id))
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    pub fn is_active(&self, id: AccountId) -> bool {
        self.get(id)
            .map(|a| a.status == AccountStatus::Active)
            .unwrap_or(false)
    }

    pub fn move_to_active(
        &mut self,
        id: AccountId,
        attrs: PositionAttrs,
        period: Period,
    ) -> Result<(), PoolError> {
        if !self.inactive.remove(&id) {
            return match self.get(id) {
                Ok(_) => Err(PoolError::AlreadyActive(id)),
                Err(e) => Err(e),
            };
        }
        let account = self.get_mut(id)?;
        account.status = AccountStatus::Active;
        account.collateral = attrs.collateral;
        account.debt = attrs.debt;
        account.target_cr = attrs.target_cr;
        account.inattention = attrs.inattention;
        account.initial_cr = if attrs.debt > 0.0 {
            attrs.collateral * attrs.price / attrs.debt
        } else {
            f64::INFINITY
        };
        account.opened_in = Some(period);
        account.redeemed_debt = 0.0;
        account.redeemed_coll = 0.0;
        self.active.push(id);
        Ok(())
    }

    pub fn move_to_inactive(&mut self, id: AccountId) -> Result<(), PoolError> {
        let pos = match self.active.iter().position(|&a| a == id) {
            Some(pos) => pos,
            None => {
                self.get(id)?;
                return Err(PoolError::AlreadyInactive(id));
            }
        };
        self.active.remove(pos);
        self.inactive.insert(id);
        let account = self.get_mut(id)?;
        account.status = AccountStatus::Inactive;
        account.collateral = 0.0;
        account.debt = 0.0;
        account.redeemed_debt = 0.0;
        account.redeemed_coll = 0.0;
        Ok(())
    }

    /// Active accounts in their current, period-stable order.
    pub fn query_active(&self) -> &[AccountId] {
        &self.active
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn inactive(&self) -> impl Iterator<Item = AccountId> + '_ {
        self.inactive.iter().copied()
    }

    pub fn inactive_count(&self) -> usize {
        self.inactive.len()
    }

    /// Inactive accounts eligible to open a borrower position, ascending.
    pub fn inactive_borrowers(&self) -> Vec<AccountId> {
        self.inactive
            .iter()
            .copied()
            .filter(|&id| id != WHALE)
            .collect()
    }

    pub fn update_attributes(
        &mut self,
        id: AccountId,
        delta: AttributeDelta,
    ) -> Result<(), PoolError> {
        let account = self.get_mut(id)?;
        if account.status != AccountStatus::Active {
            return Err(PoolError::AlreadyInactive(id));
        }
        account.collateral = (account.collateral + delta.collateral).max(0.0);
        account.debt = (account.debt + delta.debt).max(0.0);
        if let Some(cr) = delta.target_cr {
            account.target_cr = cr;
        }
        if let Some(tau) = delta.inattention {
            account.inattention = tau;
        }
        for (key, value) in delta.extensions {
            account.extensions.insert(key, value);
        }
        Ok(())
    }

    /// Note collateral and debt a redemption took from an active position.
    pub fn record_redemption(
        &mut self,
        id: AccountId,
        collateral: f64,
        debt: f64,
    ) -> Result<(), PoolError> {
        let account = self.get_mut(id)?;
        if account.status != AccountStatus::Active {
            return Err(PoolError::AlreadyInactive(id));
        }
        account.redeemed_coll += collateral.max(0.0);
        account.redeemed_debt += debt.max(0.0);
        Ok(())
    }

    /// The borrower acted on the position; past redemptions are now theirs.
    pub fn clear_redemptions(&mut self, id: AccountId) -> Result<(), PoolError> {
        let account = self.get_mut(id)?;
        account.redeemed_coll = 0.0;
        account.redeemed_debt = 0.0;
        Ok(())
    }

    /// Overwrite position figures with the ledger's view.
    pub fn sync_position(
        &mut self,
        id: AccountId,
        collateral: f64,
        debt: f64,
    ) -> Result<(), PoolError> {
        let account = self.get_mut(id)?;
        account.collateral = collateral;
        account.debt = debt;
        Ok(())
    }

    /// Re-sort the active sequence. Only call between periods.
    pub fn resort_active(&mut self, key: ActiveSortKey) {
        let metric = |a: &SimulatedAccount| match key {
            ActiveSortKey::None => 0.0,
            ActiveSortKey::InitialCr => a.initial_cr,
            ActiveSortKey::TargetCr => a.target_cr,
        };
        if key == ActiveSortKey::None {
            return;
        }
        let accounts = &self.accounts;
        self.active.sort_by(|&x, &y| {
            let (ax, ay) = (&accounts[x as usize], &accounts[y as usize]);
            metric(ax).total_cmp(&metric(ay)).then(x.cmp(&y))
        });
    }

    /// Verify no account is missing, duplicated, or mislabelled.
    pub fn check_partition(&self) -> Result<(), String> {
        let mut seen = BTreeSet::new();
        for &id in &self.active {
            if !seen.insert(id) {
                return Err(format!("{} listed twice", account_handle(id)));
            }
            if self.inactive.contains(&id) {
                return Err(format!("{} in both partitions", account_handle(id)));
            }
            match self.get(id) {
                Ok(a) if a.status == AccountStatus::Active => {}
                Ok(_) => return Err(format!("{} active but flagged inactive", account_handle(id))),
                Err(_) => return Err(format!("{} does not exist", account_handle(id))),
            }
        }
        for &id in &self.inactive {
            match self.get(id) {
                Ok(a) if a.status == AccountStatus::Inactive => {}
                Ok(_) => return Err(format!("{} inactive but flagged active", account_handle(id))),
                Err(_) => return Err(format!("{} does not exist", account_handle(id))),
            }
        }
        if self.active.len() + self.inactive.len() != self.accounts.len() {
            return Err(format!(
                "{} active + {} inactive != {} accounts",
                self.active.len(),
                self.inactive.len(),
                self.accounts.len()
            ));
        }
        Ok(())
    }
}
