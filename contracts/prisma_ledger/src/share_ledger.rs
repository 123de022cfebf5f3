//! # ShareLedger: magnified reward-per-share accounting
//!
//! ```text
//! entitlement(a) = (magnified_reward_per_share × shares(a) + correction(a)) / SCALE
//! withdrawable(a) = entitlement(a) − withdrawn(a)
//! ```
//!
//! `distribute` bumps one global accumulator, so a distribution costs O(1)
//! regardless of holder count.  A balance change re-prices only the account
//! that changed: its correction absorbs `accumulator × Δshares`, so the
//! entitlement is identical immediately before and after the change.
//!
//! The ledger itself holds only the global state.  Account records live in
//! an [`AccountStore`] under the ledger's [`Book`], so two ledgers can share
//! one store.
//!
//! Division truncates everywhere.  The remainder of
//! `amount × SCALE / total_shares` and the floor of each entitlement stay in
//! the pool as dust and are never redistributed.

use crate::errors::{Error, Result};
use crate::math::{self, SignedWide, Wide};
use crate::settlement::SettlementMode;
use crate::store::{AccountRead, AccountStore, Book};
use crate::{AccountId, Balance, Timestamp};

/// Reward bookkeeping of one holder in one book.  Created lazily on the
/// first balance-affecting event and never removed.
#[derive(Debug, Clone, Default, PartialEq, Eq, scale::Encode, scale::Decode)]
#[cfg_attr(feature = "std", derive(scale_info::TypeInfo))]
pub struct AccountRecord {
    /// Balance counted for rewards in this book.
    pub reward_shares: Balance,
    /// Offset in magnified units neutralising share changes since distributions.
    pub correction: SignedWide,
    /// Lifetime amount paid out or reinvested.
    pub withdrawn: Balance,
    /// Time of the last non-zero settlement.
    pub last_settled: Timestamp,
    /// Pools and sinks do not take part in rewards.
    pub excluded: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, scale::Encode, scale::Decode)]
#[cfg_attr(feature = "std", derive(scale_info::TypeInfo))]
pub struct GlobalLedgerState {
    /// Reward per share scaled by `2^128`.
    pub magnified_reward_per_share: Wide,
    /// Sum of `reward_shares` over non-excluded accounts.
    pub total_reward_shares: Balance,
    /// Lifetime amount injected through `distribute`.
    pub total_distributed: Balance,
    /// Lifetime amount settled, both modes.
    pub total_withdrawn: Balance,
    pub total_paid_out: Balance,
    pub total_reinvested: Balance,
    /// Minimum time between two automatic settlements of one account.
    pub claim_interval: Timestamp,
}

/// Outcome of one `distribute` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Distribution {
    pub amount: Balance,
    pub per_share_increment: Wide,
    pub total_reward_shares: Balance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, scale::Encode, scale::Decode)]
#[cfg_attr(feature = "std", derive(scale_info::TypeInfo))]
pub struct ShareLedger {
    book: Book,
    state: GlobalLedgerState,
}

impl ShareLedger {
    pub fn new(book: Book, claim_interval: Timestamp) -> Self {
        Self {
            book,
            state: GlobalLedgerState {
                claim_interval,
                ..GlobalLedgerState::default()
            },
        }
    }

    // =========================================================================
    // VIEWS
    // =========================================================================

    pub fn book(&self) -> Book {
        self.book
    }

    pub fn state(&self) -> &GlobalLedgerState {
        &self.state
    }

    pub fn record<S: AccountRead + ?Sized>(&self, store: &S, account: &AccountId) -> AccountRecord {
        store.record(self.book, account)
    }

    pub fn reward_shares_of<S: AccountRead + ?Sized>(&self, store: &S, account: &AccountId) -> Balance {
        self.record(store, account).reward_shares
    }

    pub fn withdrawn_of<S: AccountRead + ?Sized>(&self, store: &S, account: &AccountId) -> Balance {
        self.record(store, account).withdrawn
    }

    pub fn last_settled_of<S: AccountRead + ?Sized>(&self, store: &S, account: &AccountId) -> Timestamp {
        self.record(store, account).last_settled
    }

    pub fn is_excluded<S: AccountRead + ?Sized>(&self, store: &S, account: &AccountId) -> bool {
        self.record(store, account).excluded
    }

    pub fn claim_interval(&self) -> Timestamp {
        self.state.claim_interval
    }

    pub fn set_claim_interval(&mut self, interval: Timestamp) {
        self.state.claim_interval = interval;
    }

    /// Lifetime entitlement: everything ever earned, withdrawn or not.
    pub fn accumulative_of<S: AccountRead + ?Sized>(&self, store: &S, account: &AccountId) -> Result<Balance> {
        self.entitlement(&self.record(store, account))
    }

    /// Entitlement not yet settled.
    pub fn withdrawable_of<S: AccountRead + ?Sized>(&self, store: &S, account: &AccountId) -> Result<Balance> {
        let record = self.record(store, account);
        self.entitlement(&record)?
            .checked_sub(record.withdrawn)
            .ok_or(Error::ArithmeticUnderflow)
    }

    /// Whether the claim interval has elapsed for automatic settlement.
    /// Manual claims do not consult this.
    pub fn is_due<S: AccountRead + ?Sized>(&self, store: &S, account: &AccountId, now: Timestamp) -> bool {
        self.last_settled_of(store, account)
            .checked_add(self.state.claim_interval)
            .is_some_and(|due_at| due_at <= now)
    }

    fn entitlement(&self, record: &AccountRecord) -> Result<Balance> {
        let gross = self
            .state
            .magnified_reward_per_share
            .checked_mul(math::widen(record.reward_shares))
            .ok_or(Error::ArithmeticOverflow)?;
        let corrected = record.correction.apply_to(gross)?;
        math::narrow(corrected / math::scale())
    }

    // =========================================================================
    // MUTATIONS
    // =========================================================================

    /// Move `account` to `new_shares`, re-pricing its correction so the
    /// entitlement is unchanged by the move.  Excluded accounts are ignored.
    pub fn set_shares<S: AccountStore + ?Sized>(
        &mut self,
        store: &mut S,
        account: AccountId,
        new_shares: Balance,
    ) -> Result<()> {
        let mut record = self.record(&*store, &account);
        let old_shares = record.reward_shares;
        if record.excluded || old_shares == new_shares {
            return Ok(());
        }

        let per_share = self.state.magnified_reward_per_share;
        let total = if new_shares > old_shares {
            let delta = new_shares - old_shares;
            let magnified = per_share
                .checked_mul(math::widen(delta))
                .ok_or(Error::ArithmeticOverflow)?;
            record.correction = record.correction.checked_sub_unsigned(magnified)?;
            self.state
                .total_reward_shares
                .checked_add(delta)
                .ok_or(Error::ArithmeticOverflow)?
        } else {
            let delta = old_shares - new_shares;
            let magnified = per_share
                .checked_mul(math::widen(delta))
                .ok_or(Error::ArithmeticOverflow)?;
            record.correction = record.correction.checked_add_unsigned(magnified)?;
            self.state
                .total_reward_shares
                .checked_sub(delta)
                .ok_or(Error::ArithmeticUnderflow)?
        };
        record.reward_shares = new_shares;

        self.state.total_reward_shares = total;
        store.put_record(self.book, account, record);
        Ok(())
    }

    /// Spread `amount` over all current reward shares.
    ///
    /// # Errors
    /// - [`Error::NoEligibleShares`]: no account holds shares.
    pub fn distribute(&mut self, amount: Balance) -> Result<Distribution> {
        let total_shares = self.state.total_reward_shares;
        if amount == 0 {
            return Ok(Distribution {
                amount,
                per_share_increment: Wide::zero(),
                total_reward_shares: total_shares,
            });
        }
        if total_shares == 0 {
            return Err(Error::NoEligibleShares);
        }

        let increment = math::mul_div(
            math::widen(amount),
            math::scale(),
            math::widen(total_shares),
        )?;
        let per_share = self
            .state
            .magnified_reward_per_share
            .checked_add(increment)
            .ok_or(Error::ArithmeticOverflow)?;
        let distributed = self
            .state
            .total_distributed
            .checked_add(amount)
            .ok_or(Error::ArithmeticOverflow)?;

        self.state.magnified_reward_per_share = per_share;
        self.state.total_distributed = distributed;

        Ok(Distribution {
            amount,
            per_share_increment: increment,
            total_reward_shares: total_shares,
        })
    }

    /// Mark up to `max_amount` of the withdrawable entitlement as settled and
    /// return it.  The caller moves the value (payout or reinvestment).
    ///
    /// Returns `0` without touching state when nothing is withdrawable.
    pub fn settle<S: AccountStore + ?Sized>(
        &mut self,
        store: &mut S,
        account: AccountId,
        mode: SettlementMode,
        max_amount: Balance,
        now: Timestamp,
    ) -> Result<Balance> {
        let mut record = self.record(&*store, &account);
        let payable = self
            .entitlement(&record)?
            .checked_sub(record.withdrawn)
            .ok_or(Error::ArithmeticUnderflow)?
            .min(max_amount);
        if payable == 0 {
            return Ok(0);
        }

        record.withdrawn = record
            .withdrawn
            .checked_add(payable)
            .ok_or(Error::ArithmeticOverflow)?;
        record.last_settled = now;

        let mut state = self.state;
        state.total_withdrawn = state
            .total_withdrawn
            .checked_add(payable)
            .ok_or(Error::ArithmeticOverflow)?;
        match mode {
            SettlementMode::Payout => {
                state.total_paid_out = state
                    .total_paid_out
                    .checked_add(payable)
                    .ok_or(Error::ArithmeticOverflow)?;
            }
            SettlementMode::Reinvest => {
                state.total_reinvested = state
                    .total_reinvested
                    .checked_add(payable)
                    .ok_or(Error::ArithmeticOverflow)?;
            }
        }

        self.state = state;
        store.put_record(self.book, account, record);
        Ok(payable)
    }

    /// Remove `account` from rewards.  What it accrued so far stays
    /// withdrawable; nothing further accrues.
    pub fn exclude<S: AccountStore + ?Sized>(&mut self, store: &mut S, account: AccountId) -> Result<()> {
        self.set_shares(store, account, 0)?;
        let mut record = self.record(&*store, &account);
        record.excluded = true;
        store.put_record(self.book, account, record);
        Ok(())
    }

    /// Return `account` to rewards holding `shares`.
    pub fn include<S: AccountStore + ?Sized>(
        &mut self,
        store: &mut S,
        account: AccountId,
        shares: Balance,
    ) -> Result<()> {
        let mut record = self.record(&*store, &account);
        if record.excluded {
            record.excluded = false;
            store.put_record(self.book, account, record);
        }
        self.set_shares(store, account, shares)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use proptest::prelude::*;

    fn acct(n: u8) -> AccountId {
        AccountId::from([n; 32])
    }

    fn ledger() -> (ShareLedger, MemoryStore) {
        (ShareLedger::new(Book::Rewards, 60_000), MemoryStore::new())
    }

    #[test]
    fn distribute_without_shares_fails() {
        let (mut l, _) = ledger();
        assert_eq!(l.distribute(1_000), Err(Error::NoEligibleShares));
        assert_eq!(l.state().total_distributed, 0);
    }

    #[test]
    fn distribute_zero_is_a_no_op() {
        let (mut l, _) = ledger();
        let d = l.distribute(0).unwrap();
        assert_eq!(d.per_share_increment, Wide::zero());
        assert_eq!(l.state().magnified_reward_per_share, Wide::zero());
    }

    #[test]
    fn one_reward_per_share_scenario() {
        // 1 000 000 shares, distribute 1 000 000 → 1 per share.
        let (mut l, mut s) = ledger();
        l.set_shares(&mut s, acct(1), 100_000).unwrap();
        l.set_shares(&mut s, acct(2), 900_000).unwrap();
        l.distribute(1_000_000).unwrap();

        assert_eq!(l.state().magnified_reward_per_share, math::scale());
        let w = l.withdrawable_of(&s, &acct(1)).unwrap();
        assert!(w <= 100_000 && w >= 99_999, "withdrawable = {}", w);

        let paid = l.settle(&mut s, acct(1), SettlementMode::Payout, Balance::MAX, 10).unwrap();
        assert_eq!(paid, w);
        assert_eq!(l.withdrawable_of(&s, &acct(1)).unwrap(), 0);
        assert_eq!(
            l.settle(&mut s, acct(1), SettlementMode::Payout, Balance::MAX, 11).unwrap(),
            0,
            "second settlement pays nothing"
        );
    }

    #[test]
    fn shares_bought_after_distribution_earn_nothing() {
        let (mut l, mut s) = ledger();
        l.set_shares(&mut s, acct(1), 1_000).unwrap();
        l.distribute(1_000).unwrap();

        l.set_shares(&mut s, acct(2), 500).unwrap();
        assert_eq!(l.withdrawable_of(&s, &acct(2)).unwrap(), 0);
        assert_eq!(l.withdrawable_of(&s, &acct(1)).unwrap(), 1_000);
    }

    #[test]
    fn selling_keeps_accrued_entitlement() {
        let (mut l, mut s) = ledger();
        l.set_shares(&mut s, acct(1), 1_000).unwrap();
        l.distribute(1_000).unwrap();

        l.set_shares(&mut s, acct(1), 0).unwrap();
        assert_eq!(l.withdrawable_of(&s, &acct(1)).unwrap(), 1_000);
        assert_eq!(l.state().total_reward_shares, 0);

        l.set_shares(&mut s, acct(2), 10).unwrap();
        l.distribute(50).unwrap();
        assert_eq!(l.withdrawable_of(&s, &acct(1)).unwrap(), 1_000);
        assert_eq!(l.withdrawable_of(&s, &acct(2)).unwrap(), 50);
    }

    #[test]
    fn settle_respects_max_amount_and_records_time() {
        let (mut l, mut s) = ledger();
        l.set_shares(&mut s, acct(1), 10).unwrap();
        l.distribute(100).unwrap();

        let paid = l.settle(&mut s, acct(1), SettlementMode::Reinvest, 30, 5_000).unwrap();
        assert_eq!(paid, 30);
        assert_eq!(l.withdrawable_of(&s, &acct(1)).unwrap(), 70);
        assert_eq!(l.last_settled_of(&s, &acct(1)), 5_000);
        assert_eq!(l.state().total_reinvested, 30);
        assert_eq!(l.state().total_paid_out, 0);
    }

    #[test]
    fn nothing_to_settle_leaves_store_untouched() {
        let (mut l, mut s) = ledger();
        l.set_shares(&mut s, acct(1), 10).unwrap();
        let before = s.clone();
        assert_eq!(l.settle(&mut s, acct(1), SettlementMode::Payout, Balance::MAX, 99).unwrap(), 0);
        assert_eq!(l.settle(&mut s, acct(9), SettlementMode::Payout, Balance::MAX, 99).unwrap(), 0);
        assert_eq!(s, before);
    }

    #[test]
    fn books_keep_separate_records() {
        let mut s = MemoryStore::new();
        let mut rewards = ShareLedger::new(Book::Rewards, 0);
        let mut compound = ShareLedger::new(Book::Compound, 0);
        rewards.set_shares(&mut s, acct(1), 70).unwrap();
        compound.set_shares(&mut s, acct(1), 30).unwrap();
        rewards.distribute(700).unwrap();
        compound.distribute(3).unwrap();

        assert_eq!(rewards.withdrawable_of(&s, &acct(1)), Ok(700));
        assert_eq!(compound.withdrawable_of(&s, &acct(1)), Ok(3));
        compound.settle(&mut s, acct(1), SettlementMode::Payout, Balance::MAX, 1).unwrap();
        assert_eq!(rewards.withdrawn_of(&s, &acct(1)), 0);
        assert_eq!(compound.withdrawn_of(&s, &acct(1)), 3);
    }

    #[test]
    fn interval_gates_automatic_settlement() {
        let (mut l, mut s) = ledger();
        l.set_shares(&mut s, acct(1), 10).unwrap();
        assert!(!l.is_due(&s, &acct(1), 59_999));
        assert!(l.is_due(&s, &acct(1), 60_000));

        l.distribute(10).unwrap();
        l.settle(&mut s, acct(1), SettlementMode::Payout, Balance::MAX, 100_000).unwrap();
        assert!(!l.is_due(&s, &acct(1), 159_999));
        assert!(l.is_due(&s, &acct(1), 160_000));
    }

    #[test]
    fn excluded_accounts_do_not_dilute() {
        let (mut l, mut s) = ledger();
        l.set_shares(&mut s, acct(1), 100).unwrap();
        l.exclude(&mut s, acct(2)).unwrap();
        l.set_shares(&mut s, acct(2), 1_000_000).unwrap();

        assert_eq!(l.state().total_reward_shares, 100);
        l.distribute(100).unwrap();
        assert_eq!(l.withdrawable_of(&s, &acct(1)).unwrap(), 100);
        assert_eq!(l.withdrawable_of(&s, &acct(2)).unwrap(), 0);
    }

    #[test]
    fn exclusion_keeps_what_was_earned_and_inclusion_starts_fresh() {
        let (mut l, mut s) = ledger();
        l.set_shares(&mut s, acct(1), 50).unwrap();
        l.set_shares(&mut s, acct(2), 50).unwrap();
        l.distribute(100).unwrap();

        l.exclude(&mut s, acct(1)).unwrap();
        assert!(l.is_excluded(&s, &acct(1)));
        assert_eq!(l.withdrawable_of(&s, &acct(1)).unwrap(), 50);

        l.distribute(100).unwrap();
        assert_eq!(l.withdrawable_of(&s, &acct(1)).unwrap(), 50);
        assert_eq!(l.withdrawable_of(&s, &acct(2)).unwrap(), 150);

        l.include(&mut s, acct(1), 50).unwrap();
        assert!(!l.is_excluded(&s, &acct(1)));
        assert_eq!(l.withdrawable_of(&s, &acct(1)).unwrap(), 50);
        l.distribute(100).unwrap();
        assert_eq!(l.withdrawable_of(&s, &acct(1)).unwrap(), 100);
    }

    #[test]
    fn remainder_of_distribution_is_dust() {
        let (mut l, mut s) = ledger();
        l.set_shares(&mut s, acct(1), 1).unwrap();
        l.set_shares(&mut s, acct(2), 1).unwrap();
        l.set_shares(&mut s, acct(3), 1).unwrap();
        l.distribute(100).unwrap();

        let paid: Balance = (1..=3).map(|n| l.withdrawable_of(&s, &acct(n)).unwrap()).sum();
        assert_eq!(paid, 99);
        assert!(l.state().total_distributed - paid <= 3);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Shares(u8, Balance),
        Distribute(Balance),
        Settle(u8, Balance),
    }

    const ONE: Balance = 1_000_000_000_000_000_000;

    fn shares() -> impl Strategy<Value = Balance> {
        prop_oneof![Just(0u128), ONE..1_000_000 * ONE]
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u8..6, shares()).prop_map(|(a, s)| Op::Shares(a, s)),
            (1u128..1_000_000 * ONE).prop_map(Op::Distribute),
            (0u8..6, 0u128..1_000_000 * ONE).prop_map(|(a, m)| Op::Settle(a, m)),
        ]
    }

    proptest! {
        #[test]
        fn conservation_holds_for_any_sequence(ops in proptest::collection::vec(op(), 1..60)) {
            let (mut l, mut s) = ledger();
            let mut distributions: u128 = 0;
            for (t, op) in ops.into_iter().enumerate() {
                match op {
                    Op::Shares(a, n) => l.set_shares(&mut s, acct(a), n).unwrap(),
                    Op::Distribute(amount) => {
                        if l.distribute(amount).is_ok() {
                            distributions += 1;
                        }
                    }
                    Op::Settle(a, m) => {
                        l.settle(&mut s, acct(a), SettlementMode::Payout, m, t as Timestamp).unwrap();
                    }
                }

                let sum_shares: Balance = s
                    .accounts()
                    .filter(|(_, slot)| !slot.rewards.excluded)
                    .map(|(_, slot)| slot.rewards.reward_shares)
                    .sum();
                prop_assert_eq!(sum_shares, l.state().total_reward_shares);

                let mut owed: Balance = 0;
                for n in 0u8..6 {
                    owed += l.withdrawable_of(&s, &acct(n)).unwrap() + l.withdrawn_of(&s, &acct(n));
                }
                let distributed = l.state().total_distributed;
                prop_assert!(owed <= distributed, "over-allocated: {} > {}", owed, distributed);
                prop_assert!(distributed - owed <= 6 + distributions, "dust too large");
            }
        }
    }
}
