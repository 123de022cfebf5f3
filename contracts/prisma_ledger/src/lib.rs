#![cfg_attr(not(feature = "std"), no_std)]

//! # PRISMA: Reward Ledger & Fee Engine
//!
//! **Role:** Accounting core of the PRISMA token.  Taxes transfers by
//! counterparty role, converts collected tax into the reward asset, and
//! gives every holder an O(1) proportional claim on the reward pool.
//!
//! ```text
//!  transfer ──► [FeeTaxEngine] ──tax──► pending sinks
//!                                         │ process_tax(budget)
//!                                         ▼
//!                                [ConversionGateway] ──reward asset──►
//!                                         │
//!                                         ▼
//!            [ShareLedger] ◄── distribute(amount) ──┘
//!                  ▲
//!                  │ settle(holder)
//!        [AutoSettlementQueue] ──payout / reinvest──► holder
//!                                        │
//!                                        └──► [StakeEscrow]
//! ```
//!
//! Totals and configuration live in [`engine::PrismaEngine`]; everything
//! kept per account lives behind [`store::AccountStore`], one slot per
//! account, so no call touches more than the accounts it names.  Reward
//! state is only ever touched through [`share_ledger::ShareLedger`], one
//! per book: the reward asset for liquid balances, PRISMA for stakes.

pub mod constants {
    use crate::{Balance, Timestamp};

    /// One PRISMA in base units (18 decimals).
    pub const ONE_TOKEN: Balance = 1_000_000_000_000_000_000;

    /// Fixed supply minted to the deployer: 100 000 000 PRISMA.
    pub const TOTAL_SUPPLY: Balance = 100_000_000 * ONE_TOKEN;

    /// Bit shift of the accumulator scale: `SCALE = 2^128`.
    pub const SCALE_SHIFT: usize = 128;

    /// Denominator of every tax rate (rates are whole percents).
    pub const PERCENT: u128 = 100;

    /// Upper bound for the total tax of any transfer class.
    pub const MAX_TAX_PERCENT: u8 = 25;

    // ── Default tax splits (percent of the transferred amount) ───────────
    //
    //   ┌────────┬───────────┬──────────┬────────┬───────┐
    //   │ Class  │ Liquidity │ Treasury │ Reward │ Total │
    //   ├────────┼───────────┼──────────┼────────┼───────┤
    //   │ Buy    │ 2         │ 2        │ 4      │ 8     │
    //   │ Sell   │ 2         │ 2        │ 6      │ 10    │
    //   │ Plain  │ 0         │ 0        │ 0      │ 0     │
    //   └────────┴───────────┴──────────┴────────┴───────┘

    pub const BUY_LIQUIDITY_PERCENT: u8 = 2;
    pub const BUY_TREASURY_PERCENT: u8 = 2;
    pub const BUY_REWARD_PERCENT: u8 = 4;

    pub const SELL_LIQUIDITY_PERCENT: u8 = 2;
    pub const SELL_TREASURY_PERCENT: u8 = 2;
    pub const SELL_REWARD_PERCENT: u8 = 6;

    /// Minimum time between two automatic settlements of one holder (60 s).
    pub const DEFAULT_CLAIM_INTERVAL_MS: Timestamp = 60_000;

    /// Smallest stake accepted by the escrow: 1 000 PRISMA.
    pub const DEFAULT_MIN_STAKE: Balance = 1_000 * ONE_TOKEN;

    /// Pending tax that triggers piggy-backed processing on a transfer.
    pub const DEFAULT_SWAP_THRESHOLD: Balance = 10_000 * ONE_TOKEN;

    /// Validity window handed to the venue as an exchange deadline.
    pub const DEFAULT_SWAP_DEADLINE_MS: Timestamp = 300_000;

    /// Budget handed to the settlement scan piggy-backed on transfers.
    pub const DEFAULT_AUTO_SETTLE_BUDGET: u64 = 300_000;

    // ── Settlement cost model (opaque units, roughly gas) ────────────────

    pub const COST_INSPECT: u64 = 0;
    pub const COST_PAYOUT: u64 = 50_000;
    pub const COST_REINVEST: u64 = 120_000;

    /// Swap fee charged by the reference venue: 0.25% in BPS.
    pub const VENUE_FEE_BPS: u128 = 25;
    pub const BPS_DENOMINATOR: u128 = 10_000;
}

pub mod conversion;
pub mod engine;
pub mod errors;
pub mod escrow;
pub mod fee_tax;
pub mod holders;
pub mod math;
pub mod settlement;
pub mod share_ledger;
pub mod store;

#[cfg(feature = "std")]
mod layout;

pub use ink::primitives::AccountId;

pub type Balance = u128;
pub type Timestamp = u64;

pub use conversion::{
    ConstantProductVenue, ConversionGateway, LiquidityProvider, Market, RewardAsset, SwapOrder,
};
pub use engine::{
    EngineConfig, EngineInit, PrismaEngine, RewardSplit, TaxReport, TransferReceipt,
};
pub use errors::{Error, Result};
pub use escrow::StakeEscrow;
pub use fee_tax::{
    FeeSchedule, FeeTaxEngine, SinkBalances, SinkSplit, TaxAssessment, TransferClass,
};
pub use holders::HolderRegistry;
pub use math::{SignedWide, Wide};
pub use settlement::{
    AutoSettlementQueue, CostModel, ScanReport, Settlement, SettlementMode, SettlementRoute,
};
pub use share_ledger::{AccountRecord, Distribution, GlobalLedgerState, ShareLedger};
pub use store::{AccountRead, AccountSlot, AccountStore, Book, Journal, MemoryStore};
