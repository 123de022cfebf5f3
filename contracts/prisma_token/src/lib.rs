#![cfg_attr(not(feature = "std"), no_std, no_main)]

//! # PRISMA: Token Contract
//!
//! **Role:** On-chain host of [`prisma_ledger::PrismaEngine`].  Keeps the
//! engine totals in one packed cell and every account's slot under its own
//! mapping key, supplies caller and block time, picks the market the engine
//! trades against and turns engine receipts into events.
//!
//! ```text
//!  ┌────────────────────────┬───────────────────────────────────────────────┐
//!  │ Market                 │ Used when                                     │
//!  ├────────────────────────┼───────────────────────────────────────────────┤
//!  │ ConstantProductVenue   │ no router configured (devnet / local testing) │
//!  │ RouterMarket           │ `set_router(Some(router))` was called         │
//!  └────────────────────────┴───────────────────────────────────────────────┘
//! ```
//!
//! A message that returns `Err` reverts every storage write and every
//! cross-contract effect it made, so engine errors need no manual undo here.

pub mod constants {
    pub const TOKEN_NAME: &str = "Prisma Finance";
    pub const TOKEN_SYMBOL: &str = "PRISMA";
    pub const DECIMALS: u8 = 18;
}

#[ink::contract]
mod prisma_token {
    use crate::constants::*;
    use ink::env::call::{build_call, ExecutionInput, Selector};
    use ink::env::DefaultEnvironment;
    use ink::prelude::string::String;
    use ink::prelude::vec::Vec;
    use ink::storage::traits::StorageKey;
    use ink::storage::Mapping;

    use prisma_ledger::constants::TOTAL_SUPPLY;
    use prisma_ledger::{
        AccountRead, AccountSlot, AccountStore, ConstantProductVenue, ConversionGateway,
        CostModel, EngineConfig, EngineInit, FeeSchedule, LiquidityProvider, Market,
        PrismaEngine, RewardAsset, RewardSplit, ScanReport, Settlement, SettlementMode,
        SwapOrder, TaxReport, TransferClass, TransferReceipt,
    };

    type LedgerError = prisma_ledger::Error;
    type LedgerResult<T> = prisma_ledger::Result<T>;

    // =========================================================================
    // ERRORS
    // =========================================================================

    #[derive(Debug, Clone, Copy, PartialEq, Eq, scale::Encode, scale::Decode)]
    #[cfg_attr(feature = "std", derive(scale_info::TypeInfo))]
    pub enum Error {
        /// Caller is not the contract owner.
        NotOwner,
        /// Contract is paused; state-changing messages are disabled.
        ContractPaused,
        /// `transfer_from` exceeds the approved amount.
        InsufficientAllowance,
        /// The router or reward token rejected a call, or a devnet-only
        /// message was used while a router is configured.
        VenueCallFailed,
        /// The reward engine refused the operation.
        Ledger(LedgerError),
    }

    impl From<LedgerError> for Error {
        fn from(e: LedgerError) -> Self {
            match e {
                LedgerError::VenueRejected => Error::VenueCallFailed,
                other => Error::Ledger(other),
            }
        }
    }

    /// Setting touched by an owner message.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, scale::Encode, scale::Decode)]
    #[cfg_attr(feature = "std", derive(scale_info::TypeInfo))]
    pub enum ConfigKey {
        FeeSchedule,
        SwapThreshold,
        ClaimInterval,
        MinStake,
        StakingEnabled,
        StakingQualified,
        CostModel,
        EngineConfig,
        MarketPair,
        FeeExempt,
        RewardExclusion,
        Router,
        Paused,
    }

    // =========================================================================
    // EVENTS
    // =========================================================================

    #[ink(event)]
    pub struct Transfer {
        #[ink(topic)]
        from: Option<AccountId>,
        #[ink(topic)]
        to: Option<AccountId>,
        value: Balance,
    }

    #[ink(event)]
    pub struct Approval {
        #[ink(topic)]
        owner: AccountId,
        #[ink(topic)]
        spender: AccountId,
        value: Balance,
    }

    #[ink(event)]
    pub struct TaxCollected {
        #[ink(topic)]
        from: AccountId,
        class: TransferClass,
        amount: Balance,
    }

    #[ink(event)]
    pub struct TaxProcessed {
        taken: Balance,
        treasury: Balance,
        liquidity_native: Balance,
        liquidity_reward: Balance,
        reward_bought: Balance,
    }

    #[ink(event)]
    pub struct RewardsDistributed {
        /// Reward asset handed to liquid balances.
        amount: Balance,
        /// PRISMA bought for stakers.
        compounded: Balance,
        total_reward_shares: Balance,
        total_staked_shares: Balance,
    }

    #[ink(event)]
    pub struct RewardSettled {
        #[ink(topic)]
        account: AccountId,
        mode: SettlementMode,
        amount: Balance,
        compounded: Balance,
        /// Settled by a transfer's piggy-backed scan rather than by the holder.
        automatic: bool,
    }

    /// A holder the scan could not settle.  Its state is unchanged and the
    /// next cycle tries again.
    #[ink(event)]
    pub struct SettlementFailed {
        #[ink(topic)]
        account: AccountId,
        error: LedgerError,
    }

    #[ink(event)]
    pub struct SettlementScan {
        inspected: u32,
        settled: u32,
        failed: u32,
        budget_used: u64,
        cursor: u32,
    }

    #[ink(event)]
    pub struct StakeChanged {
        #[ink(topic)]
        account: AccountId,
        staked: Balance,
    }

    #[ink(event)]
    pub struct ConfigUpdated {
        #[ink(topic)]
        key: ConfigKey,
        account: Option<AccountId>,
    }

    // =========================================================================
    // ROUTER MARKET
    // =========================================================================

    /// Market backed by an external router and a PSP22 reward token.
    ///
    /// PRISMA legs are booked by the engine against the pair's balance in
    /// this contract; only reward asset moves through the router.
    struct RouterMarket {
        router: AccountId,
        reward_asset: AccountId,
        this: AccountId,
    }

    impl ConversionGateway for RouterMarket {
        fn quote(&self, path: &[AccountId], amount_in: Balance) -> LedgerResult<Balance> {
            let result = build_call::<DefaultEnvironment>()
                .call(self.router)
                .exec_input(
                    ExecutionInput::new(Selector::new(ink::selector_bytes!("quote")))
                        .push_arg(path.to_vec())
                        .push_arg(amount_in),
                )
                .returns::<Balance>()
                .try_invoke();

            match result {
                Ok(Ok(out)) => Ok(out),
                _ => Err(LedgerError::VenueRejected),
            }
        }

        fn exchange(&mut self, order: SwapOrder<'_>, now: Timestamp) -> LedgerResult<Balance> {
            if now > order.deadline {
                return Err(LedgerError::Expired);
            }
            let result = build_call::<DefaultEnvironment>()
                .call(self.router)
                .exec_input(
                    ExecutionInput::new(Selector::new(ink::selector_bytes!("exchange")))
                        .push_arg(order.path.to_vec())
                        .push_arg(order.amount_in)
                        .push_arg(order.min_amount_out)
                        .push_arg(self.this)
                        .push_arg(order.deadline),
                )
                .returns::<Balance>()
                .try_invoke();

            let out = match result {
                Ok(Ok(out)) => out,
                _ => return Err(LedgerError::VenueRejected),
            };
            if out < order.min_amount_out {
                return Err(LedgerError::SlippageExceeded);
            }
            Ok(out)
        }
    }

    impl LiquidityProvider for RouterMarket {
        fn add_liquidity(
            &mut self,
            token_a: AccountId,
            amount_a: Balance,
            token_b: AccountId,
            amount_b: Balance,
            to: AccountId,
            deadline: Timestamp,
            now: Timestamp,
        ) -> LedgerResult<(Balance, Balance)> {
            if now > deadline {
                return Err(LedgerError::Expired);
            }
            let result = build_call::<DefaultEnvironment>()
                .call(self.router)
                .exec_input(
                    ExecutionInput::new(Selector::new(ink::selector_bytes!("add_liquidity")))
                        .push_arg(token_a)
                        .push_arg(token_b)
                        .push_arg(amount_a)
                        .push_arg(amount_b)
                        .push_arg(to)
                        .push_arg(deadline),
                )
                .returns::<(Balance, Balance)>()
                .try_invoke();

            match result {
                Ok(Ok(used)) => Ok(used),
                _ => Err(LedgerError::VenueRejected),
            }
        }
    }

    impl RewardAsset for RouterMarket {
        fn send_reward(&mut self, to: AccountId, amount: Balance) -> LedgerResult<()> {
            let result = build_call::<DefaultEnvironment>()
                .call(self.reward_asset)
                .exec_input(
                    ExecutionInput::new(Selector::new(ink::selector_bytes!("PSP22::transfer")))
                        .push_arg(to)
                        .push_arg(amount)
                        .push_arg(Vec::<u8>::new()),
                )
                .returns::<Result<(), u8>>()
                .try_invoke();

            match result {
                Ok(Ok(Ok(()))) => Ok(()),
                _ => Err(LedgerError::VenueRejected),
            }
        }

        fn pull_reward(&mut self, from: AccountId, amount: Balance) -> LedgerResult<()> {
            let result = build_call::<DefaultEnvironment>()
                .call(self.reward_asset)
                .exec_input(
                    ExecutionInput::new(Selector::new(ink::selector_bytes!(
                        "PSP22::transfer_from"
                    )))
                    .push_arg(from)
                    .push_arg(self.this)
                    .push_arg(amount)
                    .push_arg(Vec::<u8>::new()),
                )
                .returns::<Result<(), u8>>()
                .try_invoke();

            match result {
                Ok(Ok(Ok(()))) => Ok(()),
                _ => Err(LedgerError::VenueRejected),
            }
        }
    }

    // =========================================================================
    // ACCOUNT STORE
    // =========================================================================

    /// Account slots and the holder index as the engine sees them.  Generic
    /// over the key types the storage macro assigns to the mappings.
    struct StorageBook<'a, A: StorageKey, H: StorageKey> {
        accounts: &'a mut Mapping<AccountId, AccountSlot, A>,
        holders: &'a mut Mapping<u32, AccountId, H>,
    }

    impl<A: StorageKey, H: StorageKey> AccountRead for StorageBook<'_, A, H> {
        fn slot(&self, account: &AccountId) -> AccountSlot {
            self.accounts.get(account).unwrap_or_default()
        }

        fn holder_at(&self, position: u32) -> Option<AccountId> {
            self.holders.get(position)
        }
    }

    impl<A: StorageKey, H: StorageKey> AccountStore for StorageBook<'_, A, H> {
        fn put_slot(&mut self, account: AccountId, slot: AccountSlot) {
            self.accounts.insert(account, &slot);
        }

        fn put_holder(&mut self, position: u32, account: AccountId) {
            self.holders.insert(position, &account);
        }
    }

    /// Read-only counterpart for views.
    struct StorageView<'a, A: StorageKey, H: StorageKey> {
        accounts: &'a Mapping<AccountId, AccountSlot, A>,
        holders: &'a Mapping<u32, AccountId, H>,
    }

    impl<A: StorageKey, H: StorageKey> AccountRead for StorageView<'_, A, H> {
        fn slot(&self, account: &AccountId) -> AccountSlot {
            self.accounts.get(account).unwrap_or_default()
        }

        fn holder_at(&self, position: u32) -> Option<AccountId> {
            self.holders.get(position)
        }
    }

    // =========================================================================
    // STORAGE
    // =========================================================================

    #[ink(storage)]
    pub struct PrismaToken {
        name: String,
        symbol: String,
        decimals: u8,
        owner: AccountId,
        allowances: Mapping<(AccountId, AccountId), Balance>,
        /// Balance, stake, mode and both reward records of each account.
        accounts: Mapping<AccountId, AccountSlot>,
        /// Holder index walked by the settlement scan.
        holders: Mapping<u32, AccountId>,
        /// Ledger totals, pending tax, escrow totals and settlement cursor.
        engine: PrismaEngine,
        /// In-contract venue used while `router` is `None`.
        devnet_market: ConstantProductVenue,
        router: Option<AccountId>,
        paused: bool,
    }

    impl PrismaToken {
        /// Mints the whole supply to the deployer.  `reward_pair` is the
        /// PRISMA/reward market pair and is registered as taxed and excluded
        /// from rewards.
        #[ink(constructor)]
        pub fn new(
            reward_asset: AccountId,
            reward_pair: AccountId,
            treasury_wallet: AccountId,
            liquidity_wallet: AccountId,
        ) -> Result<Self, Error> {
            let caller = Self::env().caller();
            let this = Self::env().account_id();

            let mut accounts = Mapping::default();
            let mut holders = Mapping::default();
            let engine = PrismaEngine::new(
                &mut StorageBook {
                    accounts: &mut accounts,
                    holders: &mut holders,
                },
                EngineInit {
                    self_account: this,
                    reward_asset,
                    reward_pair,
                    treasury_wallet,
                    liquidity_wallet,
                    initial_holder: caller,
                    total_supply: TOTAL_SUPPLY,
                },
            )?;

            Self::env().emit_event(Transfer {
                from: None,
                to: Some(caller),
                value: TOTAL_SUPPLY,
            });

            Ok(Self {
                name: String::from(TOKEN_NAME),
                symbol: String::from(TOKEN_SYMBOL),
                decimals: DECIMALS,
                owner: caller,
                allowances: Mapping::default(),
                accounts,
                holders,
                engine,
                devnet_market: ConstantProductVenue::new(reward_asset, this),
                router: None,
                paused: false,
            })
        }

        // =====================================================================
        // TOKEN
        // =====================================================================

        #[ink(message)]
        pub fn name(&self) -> String {
            self.name.clone()
        }

        #[ink(message)]
        pub fn symbol(&self) -> String {
            self.symbol.clone()
        }

        #[ink(message)]
        pub fn decimals(&self) -> u8 {
            self.decimals
        }

        #[ink(message)]
        pub fn total_supply(&self) -> Balance {
            self.engine.total_supply()
        }

        #[ink(message)]
        pub fn balance_of(&self, account: AccountId) -> Balance {
            self.read(|engine, store| engine.balance_of(store, &account))
        }

        #[ink(message)]
        pub fn allowance(&self, owner: AccountId, spender: AccountId) -> Balance {
            self.allowances.get((owner, spender)).unwrap_or(0)
        }

        #[ink(message)]
        pub fn approve(&mut self, spender: AccountId, value: Balance) -> Result<(), Error> {
            let owner = self.env().caller();
            self.allowances.insert((owner, spender), &value);
            self.env().emit_event(Approval {
                owner,
                spender,
                value,
            });
            Ok(())
        }

        /// Taxed by counterparty role.  May also convert pending tax and
        /// settle due holders within the configured budgets.
        #[ink(message)]
        pub fn transfer(&mut self, to: AccountId, value: Balance) -> Result<(), Error> {
            self.assert_not_paused()?;
            let from = self.env().caller();
            self.transfer_from_to(from, to, value)
        }

        #[ink(message)]
        pub fn transfer_from(
            &mut self,
            from: AccountId,
            to: AccountId,
            value: Balance,
        ) -> Result<(), Error> {
            self.assert_not_paused()?;
            let spender = self.env().caller();
            let allowance = self.allowance(from, spender);
            if allowance < value {
                return Err(Error::InsufficientAllowance);
            }
            self.transfer_from_to(from, to, value)?;
            self.allowances.insert((from, spender), &(allowance - value));
            Ok(())
        }

        // =====================================================================
        // REWARDS
        // =====================================================================

        /// Pay the caller's withdrawable reward in the reward asset and the
        /// PRISMA its stake compounded.  Returns the reward amount.
        #[ink(message)]
        pub fn claim(&mut self) -> Result<Balance, Error> {
            self.assert_not_paused()?;
            let account = self.env().caller();
            let now = self.env().block_timestamp();
            let settlement = self.with_market(|engine, store, market| {
                engine.claim(store, account, now, market)
            })?;
            self.emit_settled(&settlement, false);
            Ok(settlement.amount)
        }

        /// Buy PRISMA with the caller's withdrawable reward and stake it.
        /// Returns the reward amount spent.
        #[ink(message)]
        pub fn reinvest(&mut self) -> Result<Balance, Error> {
            self.assert_not_paused()?;
            let account = self.env().caller();
            let now = self.env().block_timestamp();
            let settlement = self.with_market(|engine, store, market| {
                engine.reinvest(store, account, now, market)
            })?;
            self.emit_settled(&settlement, false);
            if settlement.amount > 0 {
                let staked = self.staked_of(account);
                self.env().emit_event(StakeChanged { account, staked });
            }
            Ok(settlement.amount)
        }

        #[ink(message)]
        pub fn set_settlement_mode(&mut self, mode: SettlementMode) -> Result<(), Error> {
            self.assert_not_paused()?;
            let account = self.env().caller();
            self.with_store(|engine, store| engine.set_settlement_mode(store, account, mode))
        }

        /// Convert up to `budget` of pending tax.  Returns the reward amount
        /// distributed to holders.
        #[ink(message)]
        pub fn process_tax(&mut self, budget: Balance) -> Result<Balance, Error> {
            self.assert_not_paused()?;
            let now = self.env().block_timestamp();
            let report = self.with_market(|engine, store, market| {
                engine.process_tax(store, budget, now, market)
            })?;
            self.emit_tax_report(&report);
            Ok(report.split.distributed)
        }

        /// Settle due holders within `budget`.  Returns how many were paid.
        /// Holders that cannot be settled are reported by event and skipped.
        #[ink(message)]
        pub fn process_settlements(&mut self, budget: u64) -> Result<u32, Error> {
            self.assert_not_paused()?;
            let now = self.env().block_timestamp();
            let scan = self.with_market(|engine, store, market| {
                Ok(engine.process_settlements(store, budget, now, market))
            })?;
            self.emit_scan(&scan, false);
            Ok(scan.settled.len() as u32)
        }

        /// Pull `amount` of reward asset from the caller into the
        /// undistributed pool.
        #[ink(message)]
        pub fn deposit_rewards(&mut self, amount: Balance) -> Result<(), Error> {
            self.assert_not_paused()?;
            let from = self.env().caller();
            self.with_market(|engine, _, market| engine.deposit_rewards(from, amount, market))
        }

        /// Hand the undistributed pool to holders.  Returns the reward
        /// amount credited to liquid balances.
        #[ink(message)]
        pub fn distribute_pending(&mut self) -> Result<Balance, Error> {
            self.assert_not_paused()?;
            let now = self.env().block_timestamp();
            let split = self.with_market(|engine, store, market| {
                engine.distribute_pending(store, now, market)
            })?;
            self.emit_split(&split);
            Ok(split.distributed)
        }

        // =====================================================================
        // STAKING & LIQUIDITY
        // =====================================================================

        #[ink(message)]
        pub fn stake(&mut self, amount: Balance) -> Result<Balance, Error> {
            self.assert_not_paused()?;
            let account = self.env().caller();
            let staked = self.with_store(|engine, store| engine.stake(store, account, amount))?;
            self.env().emit_event(StakeChanged { account, staked });
            Ok(staked)
        }

        #[ink(message)]
        pub fn unstake(&mut self, amount: Balance) -> Result<Balance, Error> {
            self.assert_not_paused()?;
            let account = self.env().caller();
            let staked = self.with_store(|engine, store| engine.unstake(store, account, amount))?;
            self.env().emit_event(StakeChanged { account, staked });
            Ok(staked)
        }

        /// Pair caller PRISMA with caller reward asset in the market pool.
        /// Returns `(native_used, reward_used)`.
        #[ink(message)]
        pub fn provide_liquidity(
            &mut self,
            native_amount: Balance,
            reward_amount: Balance,
        ) -> Result<(Balance, Balance), Error> {
            self.assert_not_paused()?;
            let provider = self.env().caller();
            let now = self.env().block_timestamp();
            let used = self.with_market(|engine, store, market| {
                engine.provide_liquidity(store, provider, native_amount, reward_amount, now, market)
            })?;
            self.env().emit_event(Transfer {
                from: Some(provider),
                to: Some(self.engine.reward_pair()),
                value: used.0,
            });
            Ok(used)
        }

        // =====================================================================
        // VIEWS
        // =====================================================================

        #[ink(message)]
        pub fn withdrawable_of(&self, account: AccountId) -> Balance {
            self.read(|engine, store| engine.withdrawable_of(store, &account))
                .unwrap_or_default()
        }

        /// PRISMA the caller's stake has earned and not yet settled.
        #[ink(message)]
        pub fn compounded_of(&self, account: AccountId) -> Balance {
            self.read(|engine, store| engine.compounded_of(store, &account))
                .unwrap_or_default()
        }

        #[ink(message)]
        pub fn accumulative_of(&self, account: AccountId) -> Balance {
            self.read(|engine, store| engine.accumulative_of(store, &account))
                .unwrap_or_default()
        }

        #[ink(message)]
        pub fn withdrawn_of(&self, account: AccountId) -> Balance {
            self.read(|engine, store| engine.withdrawn_of(store, &account))
        }

        #[ink(message)]
        pub fn reward_shares_of(&self, account: AccountId) -> Balance {
            self.read(|engine, store| engine.rewards().reward_shares_of(store, &account))
        }

        #[ink(message)]
        pub fn total_reward_shares(&self) -> Balance {
            self.engine.rewards().state().total_reward_shares
        }

        #[ink(message)]
        pub fn total_staked_shares(&self) -> Balance {
            self.engine.compound().state().total_reward_shares
        }

        #[ink(message)]
        pub fn total_distributed(&self) -> Balance {
            self.engine.rewards().state().total_distributed
        }

        #[ink(message)]
        pub fn settlement_mode_of(&self, account: AccountId) -> SettlementMode {
            self.read(|engine, store| engine.settlement_mode_of(store, &account))
        }

        #[ink(message)]
        pub fn reward_reserve(&self) -> Balance {
            self.engine.reward_reserve()
        }

        #[ink(message)]
        pub fn reward_undistributed(&self) -> Balance {
            self.engine.reward_undistributed()
        }

        /// PRISMA held for stakers until they settle.
        #[ink(message)]
        pub fn compound_reserve(&self) -> Balance {
            self.engine.compound_reserve()
        }

        #[ink(message)]
        pub fn is_collateralized(&self) -> bool {
            self.read(|engine, store| engine.is_collateralized(store))
        }

        #[ink(message)]
        pub fn pending_tax(&self) -> Balance {
            self.engine.fees().pending().total()
        }

        #[ink(message)]
        pub fn fee_schedule(&self) -> FeeSchedule {
            *self.engine.fees().schedule()
        }

        #[ink(message)]
        pub fn swap_threshold(&self) -> Balance {
            self.engine.fees().swap_threshold()
        }

        #[ink(message)]
        pub fn claim_interval(&self) -> Timestamp {
            self.engine.rewards().claim_interval()
        }

        #[ink(message)]
        pub fn engine_config(&self) -> EngineConfig {
            *self.engine.config()
        }

        #[ink(message)]
        pub fn is_fee_exempt(&self, account: AccountId) -> bool {
            self.engine.fees().is_exempt(&account)
        }

        #[ink(message)]
        pub fn is_automated_market_pair(&self, account: AccountId) -> bool {
            self.engine.fees().is_pair(&account)
        }

        #[ink(message)]
        pub fn is_excluded_from_rewards(&self, account: AccountId) -> bool {
            self.read(|engine, store| engine.rewards().is_excluded(store, &account))
        }

        #[ink(message)]
        pub fn staked_of(&self, account: AccountId) -> Balance {
            self.read(|engine, store| engine.staked_of(store, &account))
        }

        #[ink(message)]
        pub fn total_staked(&self) -> Balance {
            self.engine.escrow().total_staked()
        }

        /// Transferable part of the balance.
        #[ink(message)]
        pub fn available_of(&self, account: AccountId) -> Balance {
            self.read(|engine, store| engine.available_of(store, &account))
        }

        #[ink(message)]
        pub fn holder_count(&self) -> u32 {
            self.engine.holders().len()
        }

        #[ink(message)]
        pub fn settlement_cursor(&self) -> u32 {
            self.engine.queue().cursor()
        }

        #[ink(message)]
        pub fn owner(&self) -> AccountId {
            self.owner
        }

        #[ink(message)]
        pub fn router(&self) -> Option<AccountId> {
            self.router
        }

        #[ink(message)]
        pub fn is_paused(&self) -> bool {
            self.paused
        }

        // =====================================================================
        // OWNER ADMIN
        // =====================================================================

        #[ink(message)]
        pub fn set_fee_schedule(&mut self, schedule: FeeSchedule) -> Result<(), Error> {
            self.ensure_owner()?;
            self.engine.set_fee_schedule(schedule)?;
            self.emit_config(ConfigKey::FeeSchedule, None);
            Ok(())
        }

        #[ink(message)]
        pub fn set_swap_threshold(&mut self, threshold: Balance) -> Result<(), Error> {
            self.ensure_owner()?;
            self.engine.set_swap_threshold(threshold);
            self.emit_config(ConfigKey::SwapThreshold, None);
            Ok(())
        }

        #[ink(message)]
        pub fn set_claim_interval(&mut self, interval: Timestamp) -> Result<(), Error> {
            self.ensure_owner()?;
            self.engine.set_claim_interval(interval);
            self.emit_config(ConfigKey::ClaimInterval, None);
            Ok(())
        }

        #[ink(message)]
        pub fn set_min_stake(&mut self, min_stake: Balance) -> Result<(), Error> {
            self.ensure_owner()?;
            self.engine.set_min_stake(min_stake);
            self.emit_config(ConfigKey::MinStake, None);
            Ok(())
        }

        #[ink(message)]
        pub fn set_staking_enabled(&mut self, enabled: bool) -> Result<(), Error> {
            self.ensure_owner()?;
            self.engine.set_staking_enabled(enabled);
            self.emit_config(ConfigKey::StakingEnabled, None);
            Ok(())
        }

        #[ink(message)]
        pub fn set_staking_qualified(
            &mut self,
            account: AccountId,
            qualified: bool,
        ) -> Result<(), Error> {
            self.ensure_owner()?;
            self.engine.set_staking_qualified(account, qualified);
            self.emit_config(ConfigKey::StakingQualified, Some(account));
            Ok(())
        }

        #[ink(message)]
        pub fn set_cost_model(&mut self, cost: CostModel) -> Result<(), Error> {
            self.ensure_owner()?;
            self.engine.set_cost_model(cost);
            self.emit_config(ConfigKey::CostModel, None);
            Ok(())
        }

        #[ink(message)]
        pub fn set_engine_config(&mut self, config: EngineConfig) -> Result<(), Error> {
            self.ensure_owner()?;
            self.engine.set_config(config);
            self.emit_config(ConfigKey::EngineConfig, None);
            Ok(())
        }

        #[ink(message)]
        pub fn set_automated_market_pair(
            &mut self,
            pair: AccountId,
            is_pair: bool,
        ) -> Result<(), Error> {
            self.ensure_owner()?;
            self.with_store(|engine, store| engine.set_market_pair(store, pair, is_pair))?;
            self.emit_config(ConfigKey::MarketPair, Some(pair));
            Ok(())
        }

        #[ink(message)]
        pub fn set_fee_exempt(&mut self, account: AccountId, exempt: bool) -> Result<(), Error> {
            self.ensure_owner()?;
            self.engine.set_fee_exempt(account, exempt);
            self.emit_config(ConfigKey::FeeExempt, Some(account));
            Ok(())
        }

        #[ink(message)]
        pub fn exclude_from_rewards(&mut self, account: AccountId) -> Result<(), Error> {
            self.ensure_owner()?;
            self.with_store(|engine, store| engine.exclude_from_rewards(store, account))?;
            self.emit_config(ConfigKey::RewardExclusion, Some(account));
            Ok(())
        }

        #[ink(message)]
        pub fn include_in_rewards(&mut self, account: AccountId) -> Result<(), Error> {
            self.ensure_owner()?;
            self.with_store(|engine, store| engine.include_in_rewards(store, account))?;
            self.emit_config(ConfigKey::RewardExclusion, Some(account));
            Ok(())
        }

        /// `None` switches back to the in-contract devnet venue.
        #[ink(message)]
        pub fn set_router(&mut self, router: Option<AccountId>) -> Result<(), Error> {
            self.ensure_owner()?;
            self.router = router;
            self.emit_config(ConfigKey::Router, router);
            Ok(())
        }

        #[ink(message)]
        pub fn set_paused(&mut self, paused: bool) -> Result<(), Error> {
            self.ensure_owner()?;
            self.paused = paused;
            self.emit_config(ConfigKey::Paused, None);
            Ok(())
        }

        // =====================================================================
        // DEVNET
        // =====================================================================

        /// Credit reward asset on the devnet venue.  Unavailable once a
        /// router is configured.
        #[ink(message)]
        pub fn devnet_mint_reward(&mut self, to: AccountId, amount: Balance) -> Result<(), Error> {
            self.ensure_owner()?;
            if self.router.is_some() {
                return Err(Error::VenueCallFailed);
            }
            self.devnet_market.mint_reward(to, amount)?;
            Ok(())
        }

        #[ink(message)]
        pub fn devnet_reward_balance_of(&self, account: AccountId) -> Balance {
            self.devnet_market.reward_balance_of(&account)
        }

        #[ink(message)]
        pub fn devnet_reserves(&self) -> Option<(Balance, Balance)> {
            self.devnet_market
                .reserves(self.env().account_id(), self.engine.reward_asset())
        }

        // =====================================================================
        // INTERNAL HELPERS
        // =====================================================================

        fn ensure_owner(&self) -> Result<(), Error> {
            if self.env().caller() != self.owner {
                return Err(Error::NotOwner);
            }
            Ok(())
        }

        fn assert_not_paused(&self) -> Result<(), Error> {
            if self.paused {
                return Err(Error::ContractPaused);
            }
            Ok(())
        }

        fn read<T>(&self, op: impl FnOnce(&PrismaEngine, &dyn AccountRead) -> T) -> T {
            let store = StorageView {
                accounts: &self.accounts,
                holders: &self.holders,
            };
            op(&self.engine, &store)
        }

        fn with_store<T>(
            &mut self,
            op: impl FnOnce(&mut PrismaEngine, &mut dyn AccountStore) -> LedgerResult<T>,
        ) -> Result<T, Error> {
            let mut store = StorageBook {
                accounts: &mut self.accounts,
                holders: &mut self.holders,
            };
            op(&mut self.engine, &mut store).map_err(Error::from)
        }

        /// Run `op` against the account store and the active market.
        fn with_market<T>(
            &mut self,
            op: impl FnOnce(&mut PrismaEngine, &mut dyn AccountStore, &mut dyn Market) -> LedgerResult<T>,
        ) -> Result<T, Error> {
            let this = self.env().account_id();
            let reward_asset = self.engine.reward_asset();
            let mut store = StorageBook {
                accounts: &mut self.accounts,
                holders: &mut self.holders,
            };
            match self.router {
                Some(router) => {
                    let mut market = RouterMarket {
                        router,
                        reward_asset,
                        this,
                    };
                    op(&mut self.engine, &mut store, &mut market).map_err(Error::from)
                }
                None => op(&mut self.engine, &mut store, &mut self.devnet_market)
                    .map_err(Error::from),
            }
        }

        fn transfer_from_to(
            &mut self,
            from: AccountId,
            to: AccountId,
            value: Balance,
        ) -> Result<(), Error> {
            let now = self.env().block_timestamp();
            let receipt = self.with_market(|engine, store, market| {
                engine.transfer(store, from, to, value, now, market)
            })?;
            self.emit_receipt(&receipt);
            Ok(())
        }

        // ── Event emission ──────────────────────────────────────────────────

        fn emit_receipt(&self, receipt: &TransferReceipt) {
            let assessment = &receipt.assessment;
            self.env().emit_event(Transfer {
                from: Some(receipt.from),
                to: Some(receipt.to),
                value: assessment.net,
            });
            if assessment.is_taxed() {
                self.env().emit_event(Transfer {
                    from: Some(receipt.from),
                    to: Some(self.engine.self_account()),
                    value: assessment.tax(),
                });
                self.env().emit_event(TaxCollected {
                    from: receipt.from,
                    class: assessment.class,
                    amount: assessment.tax(),
                });
            }
            if let Some(report) = &receipt.tax {
                self.emit_tax_report(report);
            }
            if let Some(scan) = &receipt.scan {
                self.emit_scan(scan, true);
            }
        }

        fn emit_tax_report(&self, report: &TaxReport) {
            self.env().emit_event(TaxProcessed {
                taken: report.taken.total(),
                treasury: report.treasury_sent,
                liquidity_native: report.liquidity_native,
                liquidity_reward: report.liquidity_reward,
                reward_bought: report.reward_bought,
            });
            self.emit_split(&report.split);
        }

        fn emit_split(&self, split: &RewardSplit) {
            if split.distributed == 0 && split.compounded == 0 {
                return;
            }
            self.env().emit_event(RewardsDistributed {
                amount: split.distributed,
                compounded: split.compounded,
                total_reward_shares: split.total_reward_shares,
                total_staked_shares: split.total_staked_shares,
            });
        }

        fn emit_scan(&self, scan: &ScanReport, automatic: bool) {
            for settlement in &scan.settled {
                self.emit_settled(settlement, automatic);
            }
            for &(account, error) in &scan.failed {
                self.env().emit_event(SettlementFailed { account, error });
            }
            if scan.inspected > 0 {
                self.env().emit_event(SettlementScan {
                    inspected: scan.inspected,
                    settled: scan.settled.len() as u32,
                    failed: scan.failed.len() as u32,
                    budget_used: scan.budget_used,
                    cursor: scan.cursor,
                });
            }
        }

        fn emit_settled(&self, settlement: &Settlement, automatic: bool) {
            if settlement.is_empty() {
                return;
            }
            self.env().emit_event(RewardSettled {
                account: settlement.account,
                mode: settlement.mode,
                amount: settlement.amount,
                compounded: settlement.compounded,
                automatic,
            });
        }

        fn emit_config(&self, key: ConfigKey, account: Option<AccountId>) {
            self.env().emit_event(ConfigUpdated { key, account });
        }
    }

    // =========================================================================
    // UNIT TESTS
    // =========================================================================

    #[cfg(test)]
    mod tests {
        use super::*;
        use ink::env::test;
        use prisma_ledger::constants::ONE_TOKEN;
        use prisma_ledger::SinkSplit;

        type Env = DefaultEnvironment;

        const ONE: Balance = ONE_TOKEN;

        fn accounts() -> test::DefaultAccounts<Env> {
            test::default_accounts::<Env>()
        }

        fn set_caller(account: AccountId) {
            test::set_caller::<Env>(account);
        }

        fn set_block_timestamp(ms: Timestamp) {
            test::set_block_timestamp::<Env>(ms);
        }

        fn contract_id() -> AccountId {
            AccountId::from([0xC0; 32])
        }

        fn reward_asset() -> AccountId {
            AccountId::from([0xAA; 32])
        }

        fn pair() -> AccountId {
            AccountId::from([0xBB; 32])
        }

        fn treasury() -> AccountId {
            AccountId::from([0xEE; 32])
        }

        fn lp_wallet() -> AccountId {
            AccountId::from([0xDD; 32])
        }

        fn deploy() -> PrismaToken {
            test::set_callee::<Env>(contract_id());
            set_caller(accounts().alice);
            set_block_timestamp(0);
            PrismaToken::new(reward_asset(), pair(), treasury(), lp_wallet())
                .expect("constructor must succeed")
        }

        /// Deploy, seed a 10M/10M devnet pool from the owner and give bob
        /// 1M PRISMA.
        fn deploy_with_pool() -> PrismaToken {
            let mut t = deploy();
            let accs = accounts();
            t.devnet_mint_reward(accs.alice, 10_000_000 * ONE).unwrap();
            t.provide_liquidity(10_000_000 * ONE, 10_000_000 * ONE).unwrap();
            t.transfer(accs.bob, 1_000_000 * ONE).unwrap();
            t
        }

        // ── Constructor ─────────────────────────────────────────────────────

        #[ink::test]
        fn constructor_mints_supply_to_deployer() {
            let t = deploy();
            let accs = accounts();
            assert_eq!(t.name(), "Prisma Finance");
            assert_eq!(t.symbol(), "PRISMA");
            assert_eq!(t.decimals(), 18);
            assert_eq!(t.owner(), accs.alice);
            assert_eq!(t.total_supply(), TOTAL_SUPPLY);
            assert_eq!(t.balance_of(accs.alice), TOTAL_SUPPLY);
            assert_eq!(t.reward_shares_of(accs.alice), TOTAL_SUPPLY);
            assert_eq!(t.holder_count(), 1);
            assert!(t.is_fee_exempt(accs.alice));
            assert!(t.is_automated_market_pair(pair()));
            assert!(t.is_excluded_from_rewards(pair()));
            assert!(t.is_excluded_from_rewards(contract_id()));
            assert_eq!(t.router(), None);
            assert_eq!(test::recorded_events().count(), 1);
        }

        // ── Transfers ───────────────────────────────────────────────────────

        #[ink::test]
        fn plain_transfer_moves_balance_and_shares() {
            let mut t = deploy();
            let accs = accounts();
            assert_eq!(t.transfer(accs.bob, 1_000 * ONE), Ok(()));
            assert_eq!(t.balance_of(accs.bob), 1_000 * ONE);
            assert_eq!(t.balance_of(accs.alice), TOTAL_SUPPLY - 1_000 * ONE);
            assert_eq!(t.reward_shares_of(accs.bob), 1_000 * ONE);
            assert_eq!(t.holder_count(), 2);
            assert_eq!(t.pending_tax(), 0);
        }

        #[ink::test]
        fn zero_transfer_is_rejected() {
            let mut t = deploy();
            assert_eq!(
                t.transfer(accounts().bob, 0),
                Err(Error::Ledger(LedgerError::ZeroAmount))
            );
        }

        #[ink::test]
        fn transfer_from_respects_allowance() {
            let mut t = deploy();
            let accs = accounts();
            t.approve(accs.bob, 500).unwrap();
            assert_eq!(t.allowance(accs.alice, accs.bob), 500);

            set_caller(accs.bob);
            assert_eq!(t.transfer_from(accs.alice, accs.charlie, 200), Ok(()));
            assert_eq!(t.balance_of(accs.charlie), 200);
            assert_eq!(t.allowance(accs.alice, accs.bob), 300);
            assert_eq!(
                t.transfer_from(accs.alice, accs.charlie, 400),
                Err(Error::InsufficientAllowance)
            );
        }

        #[ink::test]
        fn pause_is_owner_only_and_blocks_transfers() {
            let mut t = deploy();
            let accs = accounts();

            set_caller(accs.bob);
            assert_eq!(t.set_paused(true), Err(Error::NotOwner));

            set_caller(accs.alice);
            t.set_paused(true).unwrap();
            assert_eq!(t.transfer(accs.bob, ONE), Err(Error::ContractPaused));
            assert_eq!(t.claim(), Err(Error::ContractPaused));

            t.set_paused(false).unwrap();
            assert_eq!(t.transfer(accs.bob, ONE), Ok(()));
        }

        // ── Staking ─────────────────────────────────────────────────────────

        #[ink::test]
        fn staked_tokens_cannot_be_transferred() {
            let mut t = deploy();
            let accs = accounts();
            t.transfer(accs.bob, 5_000 * ONE).unwrap();

            set_caller(accs.bob);
            assert_eq!(t.stake(2_000 * ONE), Ok(2_000 * ONE));
            assert_eq!(t.available_of(accs.bob), 3_000 * ONE);
            assert_eq!(t.reward_shares_of(accs.bob), 3_000 * ONE);
            assert_eq!(t.total_staked_shares(), 2_000 * ONE);
            assert_eq!(
                t.transfer(accs.charlie, 3_001 * ONE),
                Err(Error::Ledger(LedgerError::InsufficientBalance))
            );

            assert_eq!(t.unstake(2_000 * ONE), Ok(0));
            assert_eq!(t.transfer(accs.charlie, 5_000 * ONE), Ok(()));
        }

        #[ink::test]
        fn revoked_qualification_does_not_lock_stake() {
            let mut t = deploy();
            let accs = accounts();
            t.transfer(accs.bob, 5_000 * ONE).unwrap();
            set_caller(accs.bob);
            t.stake(2_000 * ONE).unwrap();

            set_caller(accs.alice);
            t.set_staking_qualified(accs.bob, false).unwrap();

            set_caller(accs.bob);
            assert_eq!(
                t.stake(1_000 * ONE),
                Err(Error::Ledger(LedgerError::NotStakingQualified))
            );
            assert_eq!(t.unstake(2_000 * ONE), Ok(0));
            assert_eq!(t.available_of(accs.bob), 5_000 * ONE);
        }

        #[ink::test]
        fn stakers_earn_compounded_prisma() {
            let mut t = deploy_with_pool();
            let accs = accounts();
            set_caller(accs.bob);
            t.stake(1_000_000 * ONE).unwrap();

            set_caller(accs.alice);
            t.devnet_mint_reward(accs.alice, 900 * ONE).unwrap();
            t.deposit_rewards(900 * ONE).unwrap();
            // 89M liquid, 1M staked: a ninetieth is bought as PRISMA.
            assert_eq!(t.distribute_pending(), Ok(890 * ONE));
            assert_eq!(t.reward_reserve(), 890 * ONE);
            let compounded = t.compound_reserve();
            assert!(compounded > 0);
            assert_eq!(t.balance_of(contract_id()), compounded);
            assert!(t.is_collateralized());

            set_caller(accs.bob);
            let earned = t.compounded_of(accs.bob);
            assert!(compounded - earned <= 1);
            assert_eq!(t.withdrawable_of(accs.bob), 0);
            assert_eq!(t.claim(), Ok(0));
            assert_eq!(t.balance_of(accs.bob), 1_000_000 * ONE + earned);
            assert_eq!(t.staked_of(accs.bob), 1_000_000 * ONE);
            assert_eq!(t.compounded_of(accs.bob), 0);
            assert!(t.is_collateralized());
        }

        #[ink::test]
        fn reinvest_mode_needs_staking_access() {
            let mut t = deploy();
            let accs = accounts();
            t.set_staking_enabled(false).unwrap();

            set_caller(accs.bob);
            assert_eq!(
                t.set_settlement_mode(SettlementMode::Reinvest),
                Err(Error::Ledger(LedgerError::StakingDisabled))
            );
            assert_eq!(t.set_settlement_mode(SettlementMode::Payout), Ok(()));
            assert_eq!(t.settlement_mode_of(accs.bob), SettlementMode::Payout);
        }

        // ── Admin ───────────────────────────────────────────────────────────

        #[ink::test]
        fn admin_messages_are_owner_only() {
            let mut t = deploy();
            let accs = accounts();

            set_caller(accs.bob);
            assert_eq!(t.set_swap_threshold(1), Err(Error::NotOwner));
            assert_eq!(t.set_router(Some(accs.charlie)), Err(Error::NotOwner));
            assert_eq!(t.devnet_mint_reward(accs.bob, ONE), Err(Error::NotOwner));

            set_caller(accs.alice);
            let greedy = FeeSchedule {
                buy: SinkSplit::new(20, 5, 5),
                ..FeeSchedule::default()
            };
            assert_eq!(
                t.set_fee_schedule(greedy),
                Err(Error::Ledger(LedgerError::InvalidFeeSchedule))
            );
            assert_eq!(t.set_swap_threshold(42), Ok(()));
            assert_eq!(t.swap_threshold(), 42);
        }

        #[ink::test]
        fn devnet_mint_is_disabled_behind_a_router() {
            let mut t = deploy();
            let accs = accounts();
            t.set_router(Some(accs.charlie)).unwrap();
            assert_eq!(t.devnet_mint_reward(accs.bob, ONE), Err(Error::VenueCallFailed));

            t.set_router(None).unwrap();
            assert_eq!(t.devnet_mint_reward(accs.bob, ONE), Ok(()));
            assert_eq!(t.devnet_reward_balance_of(accs.bob), ONE);
        }

        // ── Rewards ─────────────────────────────────────────────────────────

        #[ink::test]
        fn deposited_rewards_go_to_holders() {
            let mut t = deploy();
            let accs = accounts();
            t.devnet_mint_reward(accs.alice, 1_000 * ONE).unwrap();
            t.deposit_rewards(1_000 * ONE).unwrap();
            assert_eq!(t.reward_undistributed(), 1_000 * ONE);
            assert_eq!(t.devnet_reward_balance_of(contract_id()), 1_000 * ONE);

            assert_eq!(t.distribute_pending(), Ok(1_000 * ONE));
            let owed = t.withdrawable_of(accs.alice);
            assert!(owed <= 1_000 * ONE && owed + 1 >= 1_000 * ONE, "owed {owed}");
            assert!(t.is_collateralized());

            assert_eq!(t.claim(), Ok(owed));
            assert_eq!(t.devnet_reward_balance_of(accs.alice), owed);
            assert_eq!(t.withdrawable_of(accs.alice), 0);
        }

        #[ink::test]
        fn provide_liquidity_seeds_the_devnet_pool() {
            let t = deploy_with_pool();
            assert_eq!(t.balance_of(pair()), 10_000_000 * ONE);
            assert_eq!(
                t.devnet_reserves(),
                Some((10_000_000 * ONE, 10_000_000 * ONE))
            );
            assert_eq!(t.devnet_reward_balance_of(accounts().alice), 0);
        }

        #[ink::test]
        fn sell_tax_is_converted_and_claimable() {
            let mut t = deploy_with_pool();
            let accs = accounts();

            // 10% of 100k reaches the default swap threshold.
            set_caller(accs.bob);
            t.transfer(pair(), 100_000 * ONE).unwrap();

            assert_eq!(t.balance_of(accs.bob), 900_000 * ONE);
            assert_eq!(t.pending_tax(), 0);
            assert_eq!(t.balance_of(treasury()), 2_000 * ONE);
            assert_eq!(t.reward_undistributed(), 0);
            assert!(t.total_distributed() > 0);
            assert!(t.is_collateralized());

            set_block_timestamp(61_000);
            let owed = t.withdrawable_of(accs.bob);
            assert!(owed > 0);
            assert_eq!(t.claim(), Ok(owed));
            assert_eq!(t.devnet_reward_balance_of(accs.bob), owed);
            assert_eq!(t.withdrawn_of(accs.bob), owed);
            assert!(t.is_collateralized());
        }

        #[ink::test]
        fn transfers_auto_settle_due_holders() {
            let mut t = deploy_with_pool();
            let accs = accounts();
            set_caller(accs.bob);
            t.transfer(pair(), 100_000 * ONE).unwrap();
            let owed = t.withdrawable_of(accs.alice);
            assert!(owed > 0);

            set_block_timestamp(61_000);
            t.transfer(accs.charlie, ONE).unwrap();

            assert_eq!(t.withdrawn_of(accs.alice), owed);
            assert_eq!(t.devnet_reward_balance_of(accs.alice), owed);
            assert!(t.withdrawn_of(accs.bob) > 0);
            assert!(t.is_collateralized());
        }

        #[ink::test]
        fn unsettleable_holder_is_skipped_not_fatal() {
            let mut t = deploy_with_pool();
            let accs = accounts();
            t.devnet_mint_reward(accs.alice, 1_000 * ONE).unwrap();
            t.deposit_rewards(1_000 * ONE).unwrap();
            t.distribute_pending().unwrap();

            set_caller(accs.bob);
            t.set_settlement_mode(SettlementMode::Reinvest).unwrap();
            set_caller(accs.alice);
            t.set_staking_qualified(accs.bob, false).unwrap();
            let bob_owed = t.withdrawable_of(accs.bob);
            assert!(bob_owed > 0);

            set_block_timestamp(61_000);
            let before = test::recorded_events().count();
            assert_eq!(t.process_settlements(1_000_000), Ok(1));
            assert_eq!(t.withdrawable_of(accs.alice), 0);
            assert_eq!(t.withdrawable_of(accs.bob), bob_owed);
            // RewardSettled, SettlementFailed, SettlementScan.
            assert_eq!(test::recorded_events().count(), before + 3);
            assert_eq!(t.settlement_cursor(), 0);
            assert!(t.is_collateralized());
        }
    }
}
