//! # Account storage
//!
//! Per-account state lives behind [`AccountStore`], so the engine itself only
//! carries totals and admin-bounded sets.  A contract backs the store with
//! storage mappings; [`MemoryStore`] backs it with ordered maps.
//!
//! ```text
//!   slot(a)        balance, staked, mode, holder position, one record per book
//!   holder_at(i)   i-th account ever to hold a balance
//! ```
//!
//! [`Journal`] buffers writes over another store and applies them only on
//! [`Journal::commit`], so a failed step inside a successful call can be
//! dropped without touching the underlying store.

use ink::prelude::collections::BTreeMap;

use crate::settlement::SettlementMode;
use crate::share_ledger::AccountRecord;
use crate::{AccountId, Balance};

/// Which accumulator a record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, scale::Encode, scale::Decode)]
#[cfg_attr(feature = "std", derive(scale_info::TypeInfo))]
pub enum Book {
    /// Reward asset earned by the liquid part of a balance.
    Rewards,
    /// PRISMA earned by the staked part of a balance.
    Compound,
}

/// Everything the engine keeps about one account.
#[derive(Debug, Clone, Default, PartialEq, Eq, scale::Encode, scale::Decode)]
#[cfg_attr(feature = "std", derive(scale_info::TypeInfo))]
pub struct AccountSlot {
    pub balance: Balance,
    pub staked: Balance,
    pub mode: SettlementMode,
    /// Position in the holder list, once registered.
    pub holder_position: Option<u32>,
    pub rewards: AccountRecord,
    pub compound: AccountRecord,
}

impl AccountSlot {
    pub fn record(&self, book: Book) -> &AccountRecord {
        match book {
            Book::Rewards => &self.rewards,
            Book::Compound => &self.compound,
        }
    }

    pub fn record_mut(&mut self, book: Book) -> &mut AccountRecord {
        match book {
            Book::Rewards => &mut self.rewards,
            Book::Compound => &mut self.compound,
        }
    }
}

pub trait AccountRead {
    /// Stored slot of `account`; the default slot if it was never written.
    fn slot(&self, account: &AccountId) -> AccountSlot;

    fn holder_at(&self, position: u32) -> Option<AccountId>;

    fn balance(&self, account: &AccountId) -> Balance {
        self.slot(account).balance
    }

    fn staked(&self, account: &AccountId) -> Balance {
        self.slot(account).staked
    }

    fn mode(&self, account: &AccountId) -> SettlementMode {
        self.slot(account).mode
    }

    fn holder_position(&self, account: &AccountId) -> Option<u32> {
        self.slot(account).holder_position
    }

    fn record(&self, book: Book, account: &AccountId) -> AccountRecord {
        let mut slot = self.slot(account);
        core::mem::take(slot.record_mut(book))
    }
}

pub trait AccountStore: AccountRead {
    fn put_slot(&mut self, account: AccountId, slot: AccountSlot);

    fn put_holder(&mut self, position: u32, account: AccountId);

    fn set_balance(&mut self, account: AccountId, balance: Balance) {
        let mut slot = self.slot(&account);
        slot.balance = balance;
        self.put_slot(account, slot);
    }

    fn set_staked(&mut self, account: AccountId, staked: Balance) {
        let mut slot = self.slot(&account);
        slot.staked = staked;
        self.put_slot(account, slot);
    }

    fn set_mode(&mut self, account: AccountId, mode: SettlementMode) {
        let mut slot = self.slot(&account);
        slot.mode = mode;
        self.put_slot(account, slot);
    }

    fn set_holder_position(&mut self, account: AccountId, position: u32) {
        let mut slot = self.slot(&account);
        slot.holder_position = Some(position);
        self.put_slot(account, slot);
    }

    fn put_record(&mut self, book: Book, account: AccountId, record: AccountRecord) {
        let mut slot = self.slot(&account);
        *slot.record_mut(book) = record;
        self.put_slot(account, slot);
    }
}

// =============================================================================
// IN-MEMORY STORE
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryStore {
    slots: BTreeMap<AccountId, AccountSlot>,
    holders: BTreeMap<u32, AccountId>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every account written so far.
    pub fn accounts(&self) -> impl Iterator<Item = (&AccountId, &AccountSlot)> {
        self.slots.iter()
    }
}

impl AccountRead for MemoryStore {
    fn slot(&self, account: &AccountId) -> AccountSlot {
        self.slots.get(account).cloned().unwrap_or_default()
    }

    fn holder_at(&self, position: u32) -> Option<AccountId> {
        self.holders.get(&position).copied()
    }
}

impl AccountStore for MemoryStore {
    fn put_slot(&mut self, account: AccountId, slot: AccountSlot) {
        self.slots.insert(account, slot);
    }

    fn put_holder(&mut self, position: u32, account: AccountId) {
        self.holders.insert(position, account);
    }
}

// =============================================================================
// JOURNAL
// =============================================================================

/// Write buffer over another store.  Reads see buffered writes first.
/// Dropping the journal without committing discards every write.
pub struct Journal<'a, S: AccountStore + ?Sized> {
    base: &'a mut S,
    writes: MemoryStore,
}

impl<'a, S: AccountStore + ?Sized> Journal<'a, S> {
    pub fn new(base: &'a mut S) -> Self {
        Self {
            base,
            writes: MemoryStore::new(),
        }
    }

    /// Number of accounts touched so far.
    pub fn touched(&self) -> usize {
        self.writes.slots.len()
    }

    pub fn commit(self) {
        for (account, slot) in self.writes.slots {
            self.base.put_slot(account, slot);
        }
        for (position, account) in self.writes.holders {
            self.base.put_holder(position, account);
        }
    }
}

impl<S: AccountStore + ?Sized> AccountRead for Journal<'_, S> {
    fn slot(&self, account: &AccountId) -> AccountSlot {
        match self.writes.slots.get(account) {
            Some(slot) => slot.clone(),
            None => self.base.slot(account),
        }
    }

    fn holder_at(&self, position: u32) -> Option<AccountId> {
        self.writes
            .holder_at(position)
            .or_else(|| self.base.holder_at(position))
    }
}

impl<S: AccountStore + ?Sized> AccountStore for Journal<'_, S> {
    fn put_slot(&mut self, account: AccountId, slot: AccountSlot) {
        self.writes.put_slot(account, slot);
    }

    fn put_holder(&mut self, position: u32, account: AccountId) {
        self.writes.put_holder(position, account);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn acct(n: u8) -> AccountId {
        AccountId::from([n; 32])
    }

    #[test]
    fn unwritten_accounts_read_as_default() {
        let store = MemoryStore::new();
        assert_eq!(store.slot(&acct(1)), AccountSlot::default());
        assert_eq!(store.holder_at(0), None);
        assert_eq!(store.accounts().count(), 0);
    }

    #[test]
    fn setters_touch_only_their_field() {
        let mut store = MemoryStore::new();
        store.set_balance(acct(1), 500);
        store.set_staked(acct(1), 200);
        store.set_mode(acct(1), SettlementMode::Reinvest);
        store.put_record(
            Book::Compound,
            acct(1),
            AccountRecord {
                reward_shares: 200,
                ..AccountRecord::default()
            },
        );

        let slot = store.slot(&acct(1));
        assert_eq!(slot.balance, 500);
        assert_eq!(slot.staked, 200);
        assert_eq!(slot.mode, SettlementMode::Reinvest);
        assert_eq!(slot.compound.reward_shares, 200);
        assert_eq!(slot.rewards, AccountRecord::default());
        assert_eq!(store.record(Book::Compound, &acct(1)).reward_shares, 200);
    }

    #[test]
    fn journal_reads_through_and_applies_on_commit() {
        let mut store = MemoryStore::new();
        store.set_balance(acct(1), 10);

        let mut journal = Journal::new(&mut store);
        assert_eq!(journal.balance(&acct(1)), 10);
        journal.set_balance(acct(1), 7);
        journal.set_balance(acct(2), 3);
        journal.put_holder(0, acct(2));
        assert_eq!(journal.balance(&acct(1)), 7);
        assert_eq!(journal.holder_at(0), Some(acct(2)));
        assert_eq!(journal.touched(), 2);
        journal.commit();

        assert_eq!(store.balance(&acct(1)), 7);
        assert_eq!(store.balance(&acct(2)), 3);
        assert_eq!(store.holder_at(0), Some(acct(2)));
    }

    #[test]
    fn dropped_journal_leaves_store_untouched() {
        let mut store = MemoryStore::new();
        store.set_balance(acct(1), 10);
        let before = store.clone();
        {
            let mut journal = Journal::new(&mut store);
            journal.set_balance(acct(1), 0);
            journal.set_holder_position(acct(1), 4);
        }
        assert_eq!(store, before);
    }
}
