//! # PrismaEngine: totals, configuration and every operation
//!
//! The engine owns everything whose size does not depend on the number of
//! holders: ledger totals, pending tax, escrow totals, the queue cursor and
//! admin-bounded sets.  Per-account state is read and written through an
//! [`AccountStore`] passed into each call.
//!
//! A call that returns `Err` may have written to the store and the engine;
//! the caller discards those writes (a contract host reverts the message).
//! Two steps run inside a successful call and may fail on their own: the
//! tax processing piggy-backed on a transfer and the settlement of one
//! holder during a scan.  Each runs over a [`Journal`] against a snapshot
//! of the engine totals and is dropped whole when it fails.
//!
//! ```text
//! transfer(from, to, amount)
//!   1. amount ≤ balance(from) − staked(from)           else InsufficientBalance
//!   2. FeeTaxEngine::assess → net to `to`, tax to self, pending sinks
//!   3. shares(from / to) ← balances, register `to`
//!   4. class ≠ Buy ∧ pending ≥ swap_threshold → process_tax (failure swallowed)
//!   5. AutoSettlementQueue::run(auto_settle_budget)
//! ```
//!
//! Every holder sits in two books.  The liquid part of a balance earns the
//! reward asset in [`Book::Rewards`]; the staked part earns PRISMA in
//! [`Book::Compound`].  On each distribution the stakers' share of the
//! reward asset is swapped for PRISMA, which the engine holds until the
//! stakers settle:
//!
//! ```text
//! converted  = undistributed × total_staked_shares / (liquid + staked shares)
//! compounded = exchange(reward → PRISMA, converted)     → Compound book
//! remainder  = undistributed − converted                 → Rewards book
//! ```
//!
//! Collateral, checked by [`PrismaEngine::is_collateralized`]:
//!
//! ```text
//! reward_reserve   == undistributed + rewards.distributed − rewards.withdrawn
//! compound_reserve == compound.distributed − compound.withdrawn
//! balance(self)    ≥  compound_reserve + pending tax
//! ```

use crate::constants::{
    DEFAULT_AUTO_SETTLE_BUDGET, DEFAULT_CLAIM_INTERVAL_MS, DEFAULT_MIN_STAKE,
    DEFAULT_SWAP_DEADLINE_MS, DEFAULT_SWAP_THRESHOLD,
};
use crate::conversion::{Market, SwapOrder};
use crate::errors::{Error, Result};
use crate::escrow::StakeEscrow;
use crate::fee_tax::{FeeSchedule, FeeTaxEngine, SinkBalances, TaxAssessment};
use crate::holders::HolderRegistry;
use crate::math;
use crate::settlement::{
    AutoSettlementQueue, CostModel, ScanReport, Settlement, SettlementMode, SettlementRoute,
};
use crate::share_ledger::ShareLedger;
use crate::store::{AccountRead, AccountStore, Book, Journal};
use crate::{AccountId, Balance, Timestamp};

#[derive(Debug, Clone, Copy, PartialEq, Eq, scale::Encode, scale::Decode)]
#[cfg_attr(feature = "std", derive(scale_info::TypeInfo))]
pub struct EngineConfig {
    /// Budget of the settlement scan piggy-backed on every transfer.
    pub auto_settle_budget: u64,
    /// Added to `now` to form every venue deadline.
    pub swap_deadline: Timestamp,
    pub auto_process_tax: bool,
    pub auto_settle: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            auto_settle_budget: DEFAULT_AUTO_SETTLE_BUDGET,
            swap_deadline: DEFAULT_SWAP_DEADLINE_MS,
            auto_process_tax: true,
            auto_settle: true,
        }
    }
}

/// Construction parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineInit {
    /// The token's own account; also the PRISMA asset id on venues.
    pub self_account: AccountId,
    pub reward_asset: AccountId,
    /// PRISMA/reward market pair, registered as a pair at construction.
    pub reward_pair: AccountId,
    pub treasury_wallet: AccountId,
    /// Receives the liquidity positions created from tax.
    pub liquidity_wallet: AccountId,
    /// Receives the whole supply.
    pub initial_holder: AccountId,
    pub total_supply: Balance,
}

/// How one distribution was split between liquid and staked balances.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RewardSplit {
    /// Reward asset handed to the Rewards book.
    pub distributed: Balance,
    /// Reward asset swapped for PRISMA on behalf of stakers.
    pub converted: Balance,
    /// PRISMA handed to the Compound book.
    pub compounded: Balance,
    pub total_reward_shares: Balance,
    pub total_staked_shares: Balance,
}

/// What one `process_tax` call did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaxReport {
    /// Withdrawn from the pending sinks.
    pub taken: SinkBalances,
    pub treasury_sent: Balance,
    /// PRISMA and reward asset added to the pool.
    pub liquidity_native: Balance,
    pub liquidity_reward: Balance,
    /// PRISMA handed back to the pending liquidity sink.
    pub liquidity_returned: Balance,
    /// Reward asset bought with the reward sink.
    pub reward_bought: Balance,
    pub split: RewardSplit,
}

/// What one `transfer` call did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferReceipt {
    pub from: AccountId,
    pub to: AccountId,
    pub assessment: TaxAssessment,
    /// Piggy-backed tax processing, when it ran and succeeded.
    pub tax: Option<TaxReport>,
    /// Piggy-backed tax processing, when it ran and failed.  Swallowed.
    pub tax_error: Option<Error>,
    pub scan: Option<ScanReport>,
}

#[derive(Debug, Clone, PartialEq, Eq, scale::Encode, scale::Decode)]
#[cfg_attr(feature = "std", derive(scale_info::TypeInfo))]
pub struct PrismaEngine {
    self_account: AccountId,
    reward_asset: AccountId,
    reward_pair: AccountId,
    treasury_wallet: AccountId,
    liquidity_wallet: AccountId,

    total_supply: Balance,

    rewards: ShareLedger,
    compound: ShareLedger,
    fees: FeeTaxEngine,
    escrow: StakeEscrow,
    holders: HolderRegistry,
    queue: AutoSettlementQueue,

    /// Reward asset held by the engine.
    reward_reserve: Balance,
    /// Part of the reserve not yet distributed.
    reward_undistributed: Balance,
    /// PRISMA held for stakers, compounded but not yet settled.
    compound_reserve: Balance,

    config: EngineConfig,
}

// =============================================================================
// BALANCE HELPERS
// =============================================================================

fn debit<S: AccountStore + ?Sized>(store: &mut S, account: AccountId, amount: Balance) -> Result<()> {
    let balance = store
        .balance(&account)
        .checked_sub(amount)
        .ok_or(Error::InsufficientBalance)?;
    store.set_balance(account, balance);
    Ok(())
}

fn credit<S: AccountStore + ?Sized>(store: &mut S, account: AccountId, amount: Balance) -> Result<()> {
    let balance = store
        .balance(&account)
        .checked_add(amount)
        .ok_or(Error::ArithmeticOverflow)?;
    store.set_balance(account, balance);
    Ok(())
}

// =============================================================================
// SETTLEMENT ROUTE
// =============================================================================

/// Engine, store and market for the length of one scan.
struct Desk<'a, S: AccountStore + ?Sized, M: Market + ?Sized> {
    engine: &'a mut PrismaEngine,
    store: &'a mut S,
    market: &'a mut M,
}

impl<S: AccountStore + ?Sized, M: Market + ?Sized> SettlementRoute for Desk<'_, S, M> {
    fn holder_count(&self) -> u32 {
        self.engine.holders.len()
    }

    fn holder_at(&self, position: u32) -> Option<AccountId> {
        self.engine.holders.get(&*self.store, position)
    }

    fn is_due(&self, account: &AccountId, now: Timestamp) -> bool {
        self.engine.is_due(&*self.store, account, now)
    }

    fn mode_of(&self, account: &AccountId) -> SettlementMode {
        self.store.mode(account)
    }

    fn settle(&mut self, account: AccountId, mode: SettlementMode, now: Timestamp) -> Result<Settlement> {
        let market = &mut *self.market;
        self.engine.attempt(&mut *self.store, |engine, journal| {
            engine.settle_account(journal, account, mode, now, market)
        })
    }
}

// =============================================================================
// ENGINE
// =============================================================================

impl PrismaEngine {
    pub fn new<S: AccountStore + ?Sized>(store: &mut S, init: EngineInit) -> Result<Self> {
        let mut fees = FeeTaxEngine::new(FeeSchedule::default(), DEFAULT_SWAP_THRESHOLD)?;
        fees.set_pair(init.reward_pair, true);
        for account in [
            init.self_account,
            init.treasury_wallet,
            init.liquidity_wallet,
            init.initial_holder,
        ] {
            fees.set_exempt(account, true);
        }

        let mut engine = Self {
            self_account: init.self_account,
            reward_asset: init.reward_asset,
            reward_pair: init.reward_pair,
            treasury_wallet: init.treasury_wallet,
            liquidity_wallet: init.liquidity_wallet,
            total_supply: init.total_supply,
            rewards: ShareLedger::new(Book::Rewards, DEFAULT_CLAIM_INTERVAL_MS),
            compound: ShareLedger::new(Book::Compound, DEFAULT_CLAIM_INTERVAL_MS),
            fees,
            escrow: StakeEscrow::new(DEFAULT_MIN_STAKE, true),
            holders: HolderRegistry::new(),
            queue: AutoSettlementQueue::new(CostModel::default()),
            reward_reserve: 0,
            reward_undistributed: 0,
            compound_reserve: 0,
            config: EngineConfig::default(),
        };
        for account in [
            init.self_account,
            init.reward_pair,
            init.treasury_wallet,
            init.liquidity_wallet,
        ] {
            engine.exclude_from_rewards(store, account)?;
        }
        credit(store, init.initial_holder, init.total_supply)?;
        engine.sync_shares(store, init.initial_holder)?;
        engine.register(store, init.initial_holder)?;
        Ok(engine)
    }

    /// Run `op` over a journal on `store`.  Its writes and the engine's new
    /// totals are kept only if it succeeds.
    fn attempt<S, T, F>(&mut self, store: &mut S, op: F) -> Result<T>
    where
        S: AccountStore + ?Sized,
        F: FnOnce(&mut Self, &mut Journal<'_, S>) -> Result<T>,
    {
        let snapshot = self.clone();
        let mut journal = Journal::new(store);
        match op(self, &mut journal) {
            Ok(out) => {
                journal.commit();
                Ok(out)
            }
            Err(e) => {
                *self = snapshot;
                Err(e)
            }
        }
    }

    /// Shares of both books follow the balance: staked tokens count in the
    /// Compound book, the rest in the Rewards book.
    fn sync_shares<S: AccountStore + ?Sized>(&mut self, store: &mut S, account: AccountId) -> Result<()> {
        let staked = store.staked(&account);
        self.on_stake_changed(store, account, staked)
    }

    fn register<S: AccountStore + ?Sized>(&mut self, store: &mut S, account: AccountId) -> Result<()> {
        if !self.rewards.is_excluded(&*store, &account) && store.balance(&account) > 0 {
            self.holders.add(store, account)?;
        }
        Ok(())
    }

    /// Untaxed movement of PRISMA with shares kept in sync.
    fn move_native<S: AccountStore + ?Sized>(
        &mut self,
        store: &mut S,
        from: AccountId,
        to: AccountId,
        amount: Balance,
    ) -> Result<()> {
        debit(store, from, amount)?;
        credit(store, to, amount)?;
        self.sync_shares(store, from)?;
        self.sync_shares(store, to)?;
        self.register(store, to)
    }

    fn deadline(&self, now: Timestamp) -> Timestamp {
        now.saturating_add(self.config.swap_deadline)
    }

    fn eligible_shares(&self) -> Result<Balance> {
        self.rewards
            .state()
            .total_reward_shares
            .checked_add(self.compound.state().total_reward_shares)
            .ok_or(Error::ArithmeticOverflow)
    }

    fn is_due<S: AccountRead + ?Sized>(&self, store: &S, account: &AccountId, now: Timestamp) -> bool {
        !self.rewards.is_excluded(store, account)
            && self.rewards.is_due(store, account, now)
            && self.compound.is_due(store, account, now)
    }

    // =========================================================================
    // TRANSFERS
    // =========================================================================

    pub fn transfer<S, M>(
        &mut self,
        store: &mut S,
        from: AccountId,
        to: AccountId,
        amount: Balance,
        now: Timestamp,
        market: &mut M,
    ) -> Result<TransferReceipt>
    where
        S: AccountStore + ?Sized,
        M: Market + ?Sized,
    {
        if amount == 0 {
            return Err(Error::ZeroAmount);
        }
        if amount > self.available_of(&*store, &from) {
            return Err(Error::InsufficientBalance);
        }

        let assessment = self.fees.assess(&from, &to, amount)?;
        debit(store, from, assessment.gross)?;
        credit(store, to, assessment.net)?;
        if assessment.is_taxed() {
            credit(store, self.self_account, assessment.tax())?;
            self.fees.accrue(&assessment)?;
        }
        self.sync_shares(store, from)?;
        self.sync_shares(store, to)?;
        self.register(store, to)?;

        let mut receipt = TransferReceipt {
            from,
            to,
            assessment,
            tax: None,
            tax_error: None,
            scan: None,
        };

        if self.config.auto_process_tax && self.fees.should_process(assessment.class) {
            let threshold = self.fees.swap_threshold();
            let processed = self.attempt(store, |engine, journal| {
                engine.process_tax(journal, threshold, now, market)
            });
            match processed {
                Ok(report) => receipt.tax = Some(report),
                Err(e) => receipt.tax_error = Some(e),
            }
        }

        if self.config.auto_settle && self.config.auto_settle_budget > 0 {
            let budget = self.config.auto_settle_budget;
            receipt.scan = Some(self.process_settlements(store, budget, now, market));
        }

        Ok(receipt)
    }

    // =========================================================================
    // TAX PROCESSING
    // =========================================================================

    /// Convert up to `budget` of pending tax: treasury share out, liquidity
    /// share swapped and paired, reward share swapped and distributed.
    ///
    /// # Errors
    /// - [`Error::ReentrantTax`]: processing is already running.
    /// - [`Error::NoEligibleShares`]: reward to distribute but no shares.
    /// - Venue errors from `quote`, `exchange` or `add_liquidity`.
    pub fn process_tax<S, M>(
        &mut self,
        store: &mut S,
        budget: Balance,
        now: Timestamp,
        market: &mut M,
    ) -> Result<TaxReport>
    where
        S: AccountStore + ?Sized,
        M: Market + ?Sized,
    {
        let preview = self.fees.pending().slice(budget)?;
        let half = preview.liquidity / 2;
        let paired = preview.liquidity - half;
        let liquify = half > 0 && paired > 0;

        // ── Preconditions, before any venue call ─────────────────────────
        if preview.reward > 0 && self.eligible_shares()? == 0 {
            return Err(Error::NoEligibleShares);
        }
        let spendable = store
            .balance(&self.self_account)
            .checked_sub(self.compound_reserve)
            .ok_or(Error::InsufficientBalance)?;
        if spendable < preview.total() {
            return Err(Error::InsufficientBalance);
        }
        let swapped_half = if liquify { half } else { 0 };
        let to_sell = swapped_half
            .checked_add(preview.reward)
            .ok_or(Error::ArithmeticOverflow)?;
        if to_sell > 0 {
            market.quote(&[self.self_account, self.reward_asset], to_sell)?;
        }
        let deadline = self.deadline(now);

        self.fees.begin_processing()?;
        let taken = self.fees.withdraw_pending(budget)?;
        let mut report = TaxReport {
            taken,
            ..TaxReport::default()
        };

        // ── Treasury ────────────────────────────────────────────────────
        if taken.treasury > 0 {
            self.move_native(store, self.self_account, self.treasury_wallet, taken.treasury)?;
            report.treasury_sent = taken.treasury;
        }

        // ── Liquidity: swap half, pair the rest ─────────────────────────
        if liquify {
            let bought = self.sell_native(store, half, deadline, now, market)?;
            let (used_native, used_reward) = if bought > 0 {
                market.add_liquidity(
                    self.self_account,
                    paired,
                    self.reward_asset,
                    bought,
                    self.liquidity_wallet,
                    deadline,
                    now,
                )?
            } else {
                (0, 0)
            };
            if used_native > 0 {
                self.move_native(store, self.self_account, self.reward_pair, used_native)?;
            }
            self.reward_reserve = self
                .reward_reserve
                .checked_sub(used_reward)
                .ok_or(Error::ArithmeticUnderflow)?;

            let spare_reward = bought.checked_sub(used_reward).ok_or(Error::ArithmeticUnderflow)?;
            self.add_undistributed(spare_reward)?;
            let spare_native = paired.checked_sub(used_native).ok_or(Error::ArithmeticUnderflow)?;
            self.fees.return_to_liquidity(spare_native)?;

            report.liquidity_native = used_native;
            report.liquidity_reward = used_reward;
            report.liquidity_returned = spare_native;
        } else if taken.liquidity > 0 {
            self.fees.return_to_liquidity(taken.liquidity)?;
            report.liquidity_returned = taken.liquidity;
        }

        // ── Reward ──────────────────────────────────────────────────────
        if taken.reward > 0 {
            let bought = self.sell_native(store, taken.reward, deadline, now, market)?;
            self.add_undistributed(bought)?;
            report.reward_bought = bought;
        }

        if self.reward_undistributed > 0 && self.eligible_shares()? > 0 {
            report.split = self.distribute_undistributed(store, now, market)?;
        }

        self.fees.end_processing();
        Ok(report)
    }

    /// Sell PRISMA from the engine's own balance into the reward pair.
    fn sell_native<S, M>(
        &mut self,
        store: &mut S,
        amount: Balance,
        deadline: Timestamp,
        now: Timestamp,
        market: &mut M,
    ) -> Result<Balance>
    where
        S: AccountStore + ?Sized,
        M: Market + ?Sized,
    {
        let path = [self.self_account, self.reward_asset];
        let bought = market.exchange(
            SwapOrder {
                path: &path,
                amount_in: amount,
                min_amount_out: 0,
                deadline,
            },
            now,
        )?;
        self.move_native(store, self.self_account, self.reward_pair, amount)?;
        self.reward_reserve = self
            .reward_reserve
            .checked_add(bought)
            .ok_or(Error::ArithmeticOverflow)?;
        Ok(bought)
    }

    /// Buy PRISMA out of the reward pair with `amount` of the reward asset
    /// and credit it to `to`.  The caller takes `amount` off the reserve and
    /// re-syncs the shares of `to`.  Every check runs before the venue is
    /// touched.
    fn buy_native<S, M>(
        &mut self,
        store: &mut S,
        amount: Balance,
        to: AccountId,
        now: Timestamp,
        market: &mut M,
    ) -> Result<Balance>
    where
        S: AccountStore + ?Sized,
        M: Market + ?Sized,
    {
        let path = [self.reward_asset, self.self_account];
        let quoted = market.quote(&path, amount)?;
        if quoted > store.balance(&self.reward_pair) {
            return Err(Error::InsufficientLiquidity);
        }

        let bought = market.exchange(
            SwapOrder {
                path: &path,
                amount_in: amount,
                min_amount_out: 0,
                deadline: self.deadline(now),
            },
            now,
        )?;
        debit(store, self.reward_pair, bought)?;
        credit(store, to, bought)?;
        self.sync_shares(store, self.reward_pair)?;
        Ok(bought)
    }

    fn add_undistributed(&mut self, amount: Balance) -> Result<()> {
        self.reward_undistributed = self
            .reward_undistributed
            .checked_add(amount)
            .ok_or(Error::ArithmeticOverflow)?;
        Ok(())
    }

    fn distribute_undistributed<S, M>(
        &mut self,
        store: &mut S,
        now: Timestamp,
        market: &mut M,
    ) -> Result<RewardSplit>
    where
        S: AccountStore + ?Sized,
        M: Market + ?Sized,
    {
        let liquid = self.rewards.state().total_reward_shares;
        let staked = self.compound.state().total_reward_shares;
        let mut split = RewardSplit {
            total_reward_shares: liquid,
            total_staked_shares: staked,
            ..RewardSplit::default()
        };
        let amount = self.reward_undistributed;
        if amount == 0 {
            return Ok(split);
        }
        let eligible = self.eligible_shares()?;
        if eligible == 0 {
            return Err(Error::NoEligibleShares);
        }

        let mut converted = math::portion(amount, staked, eligible)?;
        if converted > 0 && market.quote(&[self.reward_asset, self.self_account], converted)? == 0 {
            converted = 0;
        }
        let remainder = amount.checked_sub(converted).ok_or(Error::ArithmeticUnderflow)?;
        if remainder > 0 && liquid == 0 {
            // Stakers' share too small to convert and no liquid holder to
            // take it: keep it for the next distribution.
            return Ok(split);
        }

        if converted > 0 {
            self.reward_reserve = self
                .reward_reserve
                .checked_sub(converted)
                .ok_or(Error::InsufficientRewardReserve)?;
            let bought = self.buy_native(store, converted, self.self_account, now, market)?;
            self.compound.distribute(bought)?;
            self.compound_reserve = self
                .compound_reserve
                .checked_add(bought)
                .ok_or(Error::ArithmeticOverflow)?;
            split.converted = converted;
            split.compounded = bought;
        }
        self.rewards.distribute(remainder)?;
        self.reward_undistributed = 0;
        split.distributed = remainder;
        Ok(split)
    }

    // =========================================================================
    // REWARD FUNDING
    // =========================================================================

    /// Collect reward asset from `from` into the undistributed pool.
    pub fn deposit_rewards<M: Market + ?Sized>(
        &mut self,
        from: AccountId,
        amount: Balance,
        market: &mut M,
    ) -> Result<()> {
        if amount == 0 {
            return Err(Error::ZeroAmount);
        }
        let reserve = self
            .reward_reserve
            .checked_add(amount)
            .ok_or(Error::ArithmeticOverflow)?;
        let undistributed = self
            .reward_undistributed
            .checked_add(amount)
            .ok_or(Error::ArithmeticOverflow)?;
        market.pull_reward(from, amount)?;
        self.reward_reserve = reserve;
        self.reward_undistributed = undistributed;
        Ok(())
    }

    /// Hand every undistributed reward to the books, converting the
    /// stakers' share to PRISMA.
    pub fn distribute_pending<S, M>(&mut self, store: &mut S, now: Timestamp, market: &mut M) -> Result<RewardSplit>
    where
        S: AccountStore + ?Sized,
        M: Market + ?Sized,
    {
        self.distribute_undistributed(store, now, market)
    }

    // =========================================================================
    // SETTLEMENT
    // =========================================================================

    /// Pay out everything withdrawable now, ignoring the claim interval.
    pub fn claim<S, M>(&mut self, store: &mut S, account: AccountId, now: Timestamp, market: &mut M) -> Result<Settlement>
    where
        S: AccountStore + ?Sized,
        M: Market + ?Sized,
    {
        self.settle_account(store, account, SettlementMode::Payout, now, market)
    }

    /// Reinvest everything withdrawable now, ignoring the claim interval.
    /// Compounded PRISMA is paid out as with a claim.
    pub fn reinvest<S, M>(&mut self, store: &mut S, account: AccountId, now: Timestamp, market: &mut M) -> Result<Settlement>
    where
        S: AccountStore + ?Sized,
        M: Market + ?Sized,
    {
        self.settle_account(store, account, SettlementMode::Reinvest, now, market)
    }

    /// Compounded PRISMA first, then the reward asset by `mode`; the venue
    /// is the last thing touched.
    fn settle_account<S, M>(
        &mut self,
        store: &mut S,
        account: AccountId,
        mode: SettlementMode,
        now: Timestamp,
        market: &mut M,
    ) -> Result<Settlement>
    where
        S: AccountStore + ?Sized,
        M: Market + ?Sized,
    {
        if mode == SettlementMode::Reinvest && self.rewards.withdrawable_of(&*store, &account)? > 0 {
            self.escrow.ensure_access(&account)?;
        }

        let compounded = self
            .compound
            .settle(store, account, SettlementMode::Payout, Balance::MAX, now)?;
        if compounded > 0 {
            self.compound_reserve = self
                .compound_reserve
                .checked_sub(compounded)
                .ok_or(Error::ArithmeticUnderflow)?;
            self.move_native(store, self.self_account, account, compounded)?;
        }

        let amount = self.rewards.settle(store, account, mode, Balance::MAX, now)?;
        if amount > 0 {
            self.reward_reserve = self
                .reward_reserve
                .checked_sub(amount)
                .ok_or(Error::InsufficientRewardReserve)?;
            match mode {
                SettlementMode::Payout => market.send_reward(account, amount)?,
                SettlementMode::Reinvest => {
                    let bought = self.buy_native(store, amount, account, now, market)?;
                    self.escrow.credit(store, account, bought)?;
                    self.sync_shares(store, account)?;
                    self.register(store, account)?;
                }
            }
        }

        Ok(Settlement {
            account,
            mode,
            amount,
            compounded,
        })
    }

    /// Settlement scan from the cursor within `budget`.  Holders that fail
    /// are rolled back and listed in the report.
    pub fn process_settlements<S, M>(
        &mut self,
        store: &mut S,
        budget: u64,
        now: Timestamp,
        market: &mut M,
    ) -> ScanReport
    where
        S: AccountStore + ?Sized,
        M: Market + ?Sized,
    {
        let mut queue = core::mem::take(&mut self.queue);
        let report = queue.run(
            budget,
            now,
            &mut Desk {
                engine: &mut *self,
                store,
                market,
            },
        );
        self.queue = queue;
        report
    }

    pub fn set_settlement_mode<S: AccountStore + ?Sized>(
        &mut self,
        store: &mut S,
        account: AccountId,
        mode: SettlementMode,
    ) -> Result<()> {
        if self.rewards.is_excluded(&*store, &account) {
            return Err(Error::ExcludedFromRewards);
        }
        if mode == SettlementMode::Reinvest {
            self.escrow.ensure_access(&account)?;
        }
        store.set_mode(account, mode);
        Ok(())
    }

    // =========================================================================
    // STAKING
    // =========================================================================

    pub fn stake<S: AccountStore + ?Sized>(&mut self, store: &mut S, account: AccountId, amount: Balance) -> Result<Balance> {
        let staked = self.escrow.stake(store, account, amount)?;
        self.on_stake_changed(store, account, staked)?;
        Ok(staked)
    }

    /// Always allowed up to the staked amount, qualified or not.
    pub fn unstake<S: AccountStore + ?Sized>(&mut self, store: &mut S, account: AccountId, amount: Balance) -> Result<Balance> {
        let staked = self.escrow.unstake(store, account, amount)?;
        self.on_stake_changed(store, account, staked)?;
        Ok(staked)
    }

    /// Move the account's shares between the books so the Compound book
    /// holds `staked` and the Rewards book holds the rest of the balance.
    pub fn on_stake_changed<S: AccountStore + ?Sized>(
        &mut self,
        store: &mut S,
        account: AccountId,
        staked: Balance,
    ) -> Result<()> {
        let liquid = store
            .balance(&account)
            .checked_sub(staked)
            .ok_or(Error::ArithmeticUnderflow)?;
        self.rewards.set_shares(store, account, liquid)?;
        self.compound.set_shares(store, account, staked)
    }

    // =========================================================================
    // LIQUIDITY
    // =========================================================================

    /// Pair `native_amount` PRISMA of `provider` with `reward_amount` of its
    /// reward asset in the market pool.  Unused reward asset is returned.
    pub fn provide_liquidity<S, M>(
        &mut self,
        store: &mut S,
        provider: AccountId,
        native_amount: Balance,
        reward_amount: Balance,
        now: Timestamp,
        market: &mut M,
    ) -> Result<(Balance, Balance)>
    where
        S: AccountStore + ?Sized,
        M: Market + ?Sized,
    {
        if native_amount == 0 || reward_amount == 0 {
            return Err(Error::ZeroAmount);
        }
        if native_amount > self.available_of(&*store, &provider) {
            return Err(Error::InsufficientBalance);
        }
        let deadline = self.deadline(now);
        market.pull_reward(provider, reward_amount)?;
        let (used_native, used_reward) = market.add_liquidity(
            self.self_account,
            native_amount,
            self.reward_asset,
            reward_amount,
            provider,
            deadline,
            now,
        )?;
        self.move_native(store, provider, self.reward_pair, used_native)?;
        let unused = reward_amount
            .checked_sub(used_reward)
            .ok_or(Error::ArithmeticUnderflow)?;
        if unused > 0 {
            market.send_reward(provider, unused)?;
        }
        Ok((used_native, used_reward))
    }

    // =========================================================================
    // EXCLUSION & ADMIN
    // =========================================================================

    pub fn exclude_from_rewards<S: AccountStore + ?Sized>(&mut self, store: &mut S, account: AccountId) -> Result<()> {
        self.rewards.exclude(store, account)?;
        self.compound.exclude(store, account)
    }

    pub fn include_in_rewards<S: AccountStore + ?Sized>(&mut self, store: &mut S, account: AccountId) -> Result<()> {
        let staked = store.staked(&account);
        let liquid = store
            .balance(&account)
            .checked_sub(staked)
            .ok_or(Error::ArithmeticUnderflow)?;
        self.rewards.include(store, account, liquid)?;
        self.compound.include(store, account, staked)?;
        self.register(store, account)
    }

    /// Register or unregister a market pair.  Pairs never earn rewards.
    pub fn set_market_pair<S: AccountStore + ?Sized>(
        &mut self,
        store: &mut S,
        account: AccountId,
        is_pair: bool,
    ) -> Result<()> {
        if is_pair {
            self.exclude_from_rewards(store, account)?;
        }
        self.fees.set_pair(account, is_pair);
        Ok(())
    }

    pub fn set_fee_exempt(&mut self, account: AccountId, exempt: bool) {
        self.fees.set_exempt(account, exempt);
    }

    pub fn set_fee_schedule(&mut self, schedule: FeeSchedule) -> Result<()> {
        self.fees.set_schedule(schedule)
    }

    pub fn set_swap_threshold(&mut self, threshold: Balance) {
        self.fees.set_swap_threshold(threshold);
    }

    /// Applies to both books.
    pub fn set_claim_interval(&mut self, interval: Timestamp) {
        self.rewards.set_claim_interval(interval);
        self.compound.set_claim_interval(interval);
    }

    pub fn set_min_stake(&mut self, min_stake: Balance) {
        self.escrow.set_min_stake(min_stake);
    }

    pub fn set_staking_enabled(&mut self, enabled: bool) {
        self.escrow.set_enabled(enabled);
    }

    pub fn set_staking_qualified(&mut self, account: AccountId, qualified: bool) {
        self.escrow.set_qualified(account, qualified);
    }

    pub fn set_cost_model(&mut self, cost: CostModel) {
        self.queue.set_cost_model(cost);
    }

    pub fn set_config(&mut self, config: EngineConfig) {
        self.config = config;
    }

    // =========================================================================
    // VIEWS
    // =========================================================================

    pub fn self_account(&self) -> AccountId {
        self.self_account
    }

    pub fn reward_asset(&self) -> AccountId {
        self.reward_asset
    }

    pub fn reward_pair(&self) -> AccountId {
        self.reward_pair
    }

    pub fn total_supply(&self) -> Balance {
        self.total_supply
    }

    pub fn balance_of<S: AccountRead + ?Sized>(&self, store: &S, account: &AccountId) -> Balance {
        store.balance(account)
    }

    pub fn staked_of<S: AccountRead + ?Sized>(&self, store: &S, account: &AccountId) -> Balance {
        self.escrow.staked_of(store, account)
    }

    /// Transferable balance.
    pub fn available_of<S: AccountRead + ?Sized>(&self, store: &S, account: &AccountId) -> Balance {
        self.escrow.available(store, account)
    }

    /// Reward asset the account can settle now.
    pub fn withdrawable_of<S: AccountRead + ?Sized>(&self, store: &S, account: &AccountId) -> Result<Balance> {
        self.rewards.withdrawable_of(store, account)
    }

    /// PRISMA the account's stake has earned and not yet settled.
    pub fn compounded_of<S: AccountRead + ?Sized>(&self, store: &S, account: &AccountId) -> Result<Balance> {
        self.compound.withdrawable_of(store, account)
    }

    pub fn accumulative_of<S: AccountRead + ?Sized>(&self, store: &S, account: &AccountId) -> Result<Balance> {
        self.rewards.accumulative_of(store, account)
    }

    pub fn withdrawn_of<S: AccountRead + ?Sized>(&self, store: &S, account: &AccountId) -> Balance {
        self.rewards.withdrawn_of(store, account)
    }

    pub fn settlement_mode_of<S: AccountRead + ?Sized>(&self, store: &S, account: &AccountId) -> SettlementMode {
        store.mode(account)
    }

    pub fn reward_reserve(&self) -> Balance {
        self.reward_reserve
    }

    pub fn reward_undistributed(&self) -> Balance {
        self.reward_undistributed
    }

    pub fn compound_reserve(&self) -> Balance {
        self.compound_reserve
    }

    pub fn rewards(&self) -> &ShareLedger {
        &self.rewards
    }

    pub fn compound(&self) -> &ShareLedger {
        &self.compound
    }

    pub fn fees(&self) -> &FeeTaxEngine {
        &self.fees
    }

    pub fn escrow(&self) -> &StakeEscrow {
        &self.escrow
    }

    pub fn holders(&self) -> &HolderRegistry {
        &self.holders
    }

    pub fn queue(&self) -> &AutoSettlementQueue {
        &self.queue
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The assets held cover everything owed or still to distribute.
    pub fn is_collateralized<S: AccountRead + ?Sized>(&self, store: &S) -> bool {
        let rewards = self.rewards.state();
        let reward_owed = self
            .reward_undistributed
            .checked_add(rewards.total_distributed)
            .and_then(|v| v.checked_sub(rewards.total_withdrawn));

        let compound = self.compound.state();
        let compound_owed = compound.total_distributed.checked_sub(compound.total_withdrawn);

        let native_owed = self.compound_reserve.checked_add(self.fees.pending().total());

        reward_owed == Some(self.reward_reserve)
            && compound_owed == Some(self.compound_reserve)
            && native_owed.is_some_and(|owed| store.balance(&self.self_account) >= owed)
    }
}
