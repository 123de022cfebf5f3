//! # StakeEscrow: locked PRISMA inside the holder's own balance
//!
//! Staked tokens never leave the holder's balance; the escrow only records
//! how much of it is locked.  Transfers may spend `balance − staked`.
//!
//! ```text
//!   stake(a, x)    requires: enabled, qualified(a), x ≥ min_stake,
//!                            x ≤ balance(a) − staked(a)
//!   unstake(a, x)  requires: x ≤ staked(a)
//! ```
//!
//! Unstaking has no access check: neither a disabled escrow nor a revoked
//! qualification can keep tokens locked.

use ink::prelude::collections::BTreeSet;

use crate::errors::{Error, Result};
use crate::store::{AccountRead, AccountStore};
use crate::{AccountId, Balance};

#[derive(Debug, Clone, Default, PartialEq, Eq, scale::Encode, scale::Decode)]
#[cfg_attr(feature = "std", derive(scale_info::TypeInfo))]
pub struct StakeEscrow {
    total_staked: Balance,
    min_stake: Balance,
    enabled: bool,
    not_qualified: BTreeSet<AccountId>,
}

impl StakeEscrow {
    pub fn new(min_stake: Balance, enabled: bool) -> Self {
        Self {
            min_stake,
            enabled,
            ..Self::default()
        }
    }

    pub fn staked_of<S: AccountRead + ?Sized>(&self, store: &S, account: &AccountId) -> Balance {
        store.staked(account)
    }

    pub fn total_staked(&self) -> Balance {
        self.total_staked
    }

    pub fn min_stake(&self) -> Balance {
        self.min_stake
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_qualified(&self, account: &AccountId) -> bool {
        !self.not_qualified.contains(account)
    }

    /// Spendable part of the balance.
    pub fn available<S: AccountRead + ?Sized>(&self, store: &S, account: &AccountId) -> Balance {
        let slot = store.slot(account);
        slot.balance.saturating_sub(slot.staked)
    }

    pub fn ensure_access(&self, account: &AccountId) -> Result<()> {
        if !self.enabled {
            return Err(Error::StakingDisabled);
        }
        if !self.is_qualified(account) {
            return Err(Error::NotStakingQualified);
        }
        Ok(())
    }

    /// Lock `amount` of the balance.  Returns the new staked amount.
    pub fn stake<S: AccountStore + ?Sized>(
        &mut self,
        store: &mut S,
        account: AccountId,
        amount: Balance,
    ) -> Result<Balance> {
        self.ensure_access(&account)?;
        if amount == 0 {
            return Err(Error::ZeroAmount);
        }
        if amount < self.min_stake {
            return Err(Error::BelowMinimumStake);
        }
        if amount > self.available(&*store, &account) {
            return Err(Error::InsufficientBalance);
        }
        self.lock(store, account, amount)
    }

    /// Release `amount`.  Returns the new staked amount.
    pub fn unstake<S: AccountStore + ?Sized>(
        &mut self,
        store: &mut S,
        account: AccountId,
        amount: Balance,
    ) -> Result<Balance> {
        if amount == 0 {
            return Err(Error::ZeroAmount);
        }
        let remaining = store
            .staked(&account)
            .checked_sub(amount)
            .ok_or(Error::InsufficientStake)?;
        let total = self
            .total_staked
            .checked_sub(amount)
            .ok_or(Error::ArithmeticUnderflow)?;

        store.set_staked(account, remaining);
        self.total_staked = total;
        Ok(remaining)
    }

    /// Lock tokens bought by a reinvestment.  Skips the minimum: it applies
    /// to deposits a holder makes, not to compounding.
    pub fn credit<S: AccountStore + ?Sized>(
        &mut self,
        store: &mut S,
        account: AccountId,
        amount: Balance,
    ) -> Result<Balance> {
        self.ensure_access(&account)?;
        self.lock(store, account, amount)
    }

    fn lock<S: AccountStore + ?Sized>(
        &mut self,
        store: &mut S,
        account: AccountId,
        amount: Balance,
    ) -> Result<Balance> {
        let staked = store
            .staked(&account)
            .checked_add(amount)
            .ok_or(Error::ArithmeticOverflow)?;
        let total = self
            .total_staked
            .checked_add(amount)
            .ok_or(Error::ArithmeticOverflow)?;
        store.set_staked(account, staked);
        self.total_staked = total;
        Ok(staked)
    }

    // ── Admin ────────────────────────────────────────────────────────────

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn set_min_stake(&mut self, min_stake: Balance) {
        self.min_stake = min_stake;
    }

    pub fn set_qualified(&mut self, account: AccountId, qualified: bool) {
        if qualified {
            self.not_qualified.remove(&account);
        } else {
            self.not_qualified.insert(account);
        }
    }
}
