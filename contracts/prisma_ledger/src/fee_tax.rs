//! # FeeTaxEngine: transfer classification and tax collection
//!
//! ```text
//!   from ∈ pairs            → Buy
//!   to   ∈ pairs            → Sell
//!   otherwise               → Plain
//!
//!   tax       = amount × (liquidity + treasury + reward) / 100
//!   liquidity = amount × liquidity / 100
//!   treasury  = amount × treasury  / 100
//!   reward    = tax − liquidity − treasury
//!   net       = amount − tax
//! ```
//!
//! Transfers touching the engine's own account, a sink wallet or an exempt
//! account are never taxed.  That is what keeps tax processing (which moves
//! tokens out of the engine's own balance) from taxing itself.

use ink::prelude::collections::BTreeSet;

use crate::constants::{
    BUY_LIQUIDITY_PERCENT, BUY_REWARD_PERCENT, BUY_TREASURY_PERCENT, MAX_TAX_PERCENT, PERCENT,
    SELL_LIQUIDITY_PERCENT, SELL_REWARD_PERCENT, SELL_TREASURY_PERCENT,
};
use crate::errors::{Error, Result};
use crate::math;
use crate::{AccountId, Balance};

#[derive(Debug, Clone, Copy, PartialEq, Eq, scale::Encode, scale::Decode)]
#[cfg_attr(feature = "std", derive(scale_info::TypeInfo))]
pub enum TransferClass {
    /// Tokens leave a market pair.
    Buy,
    /// Tokens enter a market pair.
    Sell,
    /// Neither side is a market pair.
    Plain,
}

/// Percent of the transferred amount routed to each sink.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, scale::Encode, scale::Decode)]
#[cfg_attr(feature = "std", derive(scale_info::TypeInfo))]
pub struct SinkSplit {
    pub liquidity: u8,
    pub treasury: u8,
    pub reward: u8,
}

impl SinkSplit {
    pub const fn new(liquidity: u8, treasury: u8, reward: u8) -> Self {
        Self {
            liquidity,
            treasury,
            reward,
        }
    }

    pub fn total(&self) -> u16 {
        self.liquidity as u16 + self.treasury as u16 + self.reward as u16
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, scale::Encode, scale::Decode)]
#[cfg_attr(feature = "std", derive(scale_info::TypeInfo))]
pub struct FeeSchedule {
    pub buy: SinkSplit,
    pub sell: SinkSplit,
    pub plain: SinkSplit,
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self {
            buy: SinkSplit::new(BUY_LIQUIDITY_PERCENT, BUY_TREASURY_PERCENT, BUY_REWARD_PERCENT),
            sell: SinkSplit::new(SELL_LIQUIDITY_PERCENT, SELL_TREASURY_PERCENT, SELL_REWARD_PERCENT),
            plain: SinkSplit::default(),
        }
    }
}

impl FeeSchedule {
    pub fn split_for(&self, class: TransferClass) -> SinkSplit {
        match class {
            TransferClass::Buy => self.buy,
            TransferClass::Sell => self.sell,
            TransferClass::Plain => self.plain,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let max = MAX_TAX_PERCENT as u16;
        if self.buy.total() > max || self.sell.total() > max || self.plain.total() > max {
            return Err(Error::InvalidFeeSchedule);
        }
        Ok(())
    }
}

/// How one transfer is taxed.  `net + liquidity + treasury + reward == gross`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, scale::Encode, scale::Decode)]
#[cfg_attr(feature = "std", derive(scale_info::TypeInfo))]
pub struct TaxAssessment {
    pub class: TransferClass,
    pub gross: Balance,
    pub net: Balance,
    pub liquidity: Balance,
    pub treasury: Balance,
    pub reward: Balance,
}

impl TaxAssessment {
    fn untaxed(class: TransferClass, amount: Balance) -> Self {
        Self {
            class,
            gross: amount,
            net: amount,
            liquidity: 0,
            treasury: 0,
            reward: 0,
        }
    }

    pub fn tax(&self) -> Balance {
        self.gross - self.net
    }

    pub fn is_taxed(&self) -> bool {
        self.net < self.gross
    }
}

/// Tax collected but not yet processed, per sink.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, scale::Encode, scale::Decode)]
#[cfg_attr(feature = "std", derive(scale_info::TypeInfo))]
pub struct SinkBalances {
    pub liquidity: Balance,
    pub treasury: Balance,
    pub reward: Balance,
}

impl SinkBalances {
    pub fn total(&self) -> Balance {
        self.liquidity
            .saturating_add(self.treasury)
            .saturating_add(self.reward)
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    fn checked_add(self, other: SinkBalances) -> Result<Self> {
        Ok(Self {
            liquidity: self
                .liquidity
                .checked_add(other.liquidity)
                .ok_or(Error::ArithmeticOverflow)?,
            treasury: self
                .treasury
                .checked_add(other.treasury)
                .ok_or(Error::ArithmeticOverflow)?,
            reward: self
                .reward
                .checked_add(other.reward)
                .ok_or(Error::ArithmeticOverflow)?,
        })
    }

    fn checked_sub(self, other: SinkBalances) -> Result<Self> {
        Ok(Self {
            liquidity: self
                .liquidity
                .checked_sub(other.liquidity)
                .ok_or(Error::ArithmeticUnderflow)?,
            treasury: self
                .treasury
                .checked_sub(other.treasury)
                .ok_or(Error::ArithmeticUnderflow)?,
            reward: self
                .reward
                .checked_sub(other.reward)
                .ok_or(Error::ArithmeticUnderflow)?,
        })
    }

    /// Pro-rata slice of `min(budget, total)`.  Floors are taken per sink,
    /// then the rounding remainder is handed to sinks with room left,
    /// reward first.
    pub fn slice(&self, budget: Balance) -> Result<SinkBalances> {
        let total = self.total();
        let amount = budget.min(total);
        if amount == total {
            return Ok(*self);
        }

        let mut taken = SinkBalances {
            liquidity: math::portion(amount, self.liquidity, total)?,
            treasury: math::portion(amount, self.treasury, total)?,
            reward: math::portion(amount, self.reward, total)?,
        };
        let mut leftover = amount
            .checked_sub(taken.total())
            .ok_or(Error::ArithmeticUnderflow)?;
        for (slot, cap) in [
            (&mut taken.reward, self.reward),
            (&mut taken.treasury, self.treasury),
            (&mut taken.liquidity, self.liquidity),
        ] {
            let extra = leftover.min(cap - *slot);
            *slot += extra;
            leftover -= extra;
        }
        Ok(taken)
    }
}

impl From<&TaxAssessment> for SinkBalances {
    fn from(a: &TaxAssessment) -> Self {
        Self {
            liquidity: a.liquidity,
            treasury: a.treasury,
            reward: a.reward,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, scale::Encode, scale::Decode)]
#[cfg_attr(feature = "std", derive(scale_info::TypeInfo))]
pub struct FeeTaxEngine {
    schedule: FeeSchedule,
    pairs: BTreeSet<AccountId>,
    exempt: BTreeSet<AccountId>,
    pending: SinkBalances,
    processing: bool,
    swap_threshold: Balance,
}

impl FeeTaxEngine {
    pub fn new(schedule: FeeSchedule, swap_threshold: Balance) -> Result<Self> {
        schedule.validate()?;
        Ok(Self {
            schedule,
            pairs: BTreeSet::new(),
            exempt: BTreeSet::new(),
            pending: SinkBalances::default(),
            processing: false,
            swap_threshold,
        })
    }

    pub fn classify(&self, from: &AccountId, to: &AccountId) -> TransferClass {
        if self.pairs.contains(from) {
            TransferClass::Buy
        } else if self.pairs.contains(to) {
            TransferClass::Sell
        } else {
            TransferClass::Plain
        }
    }

    pub fn is_exempt_transfer(&self, from: &AccountId, to: &AccountId) -> bool {
        self.exempt.contains(from) || self.exempt.contains(to)
    }

    /// Classify and price a transfer.  Does not mutate.
    pub fn assess(&self, from: &AccountId, to: &AccountId, amount: Balance) -> Result<TaxAssessment> {
        let class = self.classify(from, to);
        let split = self.schedule.split_for(class);
        if split.total() == 0 || self.is_exempt_transfer(from, to) {
            return Ok(TaxAssessment::untaxed(class, amount));
        }

        let denominator = PERCENT;
        let tax = math::portion(amount, split.total() as u128, denominator)?;
        let liquidity = math::portion(amount, split.liquidity as u128, denominator)?;
        let treasury = math::portion(amount, split.treasury as u128, denominator)?;
        let reward = tax
            .checked_sub(liquidity)
            .and_then(|r| r.checked_sub(treasury))
            .ok_or(Error::ArithmeticUnderflow)?;
        let net = amount.checked_sub(tax).ok_or(Error::ArithmeticUnderflow)?;

        Ok(TaxAssessment {
            class,
            gross: amount,
            net,
            liquidity,
            treasury,
            reward,
        })
    }

    /// Credit an assessment's tax to the pending sinks.
    pub fn accrue(&mut self, assessment: &TaxAssessment) -> Result<()> {
        self.pending = self.pending.checked_add(SinkBalances::from(assessment))?;
        Ok(())
    }

    /// Remove up to `budget` from the pending sinks, pro rata.
    pub fn withdraw_pending(&mut self, budget: Balance) -> Result<SinkBalances> {
        let taken = self.pending.slice(budget)?;
        self.pending = self.pending.checked_sub(taken)?;
        Ok(taken)
    }

    /// Put native tokens that processing could not use back in a sink.
    pub fn return_to_liquidity(&mut self, amount: Balance) -> Result<()> {
        self.pending.liquidity = self
            .pending
            .liquidity
            .checked_add(amount)
            .ok_or(Error::ArithmeticOverflow)?;
        Ok(())
    }

    pub fn begin_processing(&mut self) -> Result<()> {
        if self.processing {
            return Err(Error::ReentrantTax);
        }
        self.processing = true;
        Ok(())
    }

    pub fn end_processing(&mut self) {
        self.processing = false;
    }

    pub fn is_processing(&self) -> bool {
        self.processing
    }

    /// Whether a transfer of `class` should piggy-back tax processing.
    /// Buys never do: the pair is mid-swap.
    pub fn should_process(&self, class: TransferClass) -> bool {
        class != TransferClass::Buy
            && !self.processing
            && !self.pending.is_empty()
            && self.pending.total() >= self.swap_threshold
    }

    // ── Views ────────────────────────────────────────────────────────────

    pub fn schedule(&self) -> &FeeSchedule {
        &self.schedule
    }

    pub fn pending(&self) -> &SinkBalances {
        &self.pending
    }

    pub fn swap_threshold(&self) -> Balance {
        self.swap_threshold
    }

    pub fn is_pair(&self, account: &AccountId) -> bool {
        self.pairs.contains(account)
    }

    pub fn is_exempt(&self, account: &AccountId) -> bool {
        self.exempt.contains(account)
    }

    // ── Admin ────────────────────────────────────────────────────────────

    pub fn set_schedule(&mut self, schedule: FeeSchedule) -> Result<()> {
        schedule.validate()?;
        self.schedule = schedule;
        Ok(())
    }

    pub fn set_swap_threshold(&mut self, threshold: Balance) {
        self.swap_threshold = threshold;
    }

    pub fn set_pair(&mut self, account: AccountId, is_pair: bool) {
        if is_pair {
            self.pairs.insert(account);
        } else {
            self.pairs.remove(&account);
        }
    }

    pub fn set_exempt(&mut self, account: AccountId, exempt: bool) {
        if exempt {
            self.exempt.insert(account);
        } else {
            self.exempt.remove(&account);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn acct(n: u8) -> AccountId {
        AccountId::from([n; 32])
    }

    fn engine() -> FeeTaxEngine {
        let mut e = FeeTaxEngine::new(FeeSchedule::default(), 1_000).unwrap();
        e.set_pair(acct(0xAA), true);
        e.set_exempt(acct(0xEE), true);
        e
    }

    #[test]
    fn classification() {
        let e = engine();
        assert_eq!(e.classify(&acct(0xAA), &acct(1)), TransferClass::Buy);
        assert_eq!(e.classify(&acct(1), &acct(0xAA)), TransferClass::Sell);
        assert_eq!(e.classify(&acct(1), &acct(2)), TransferClass::Plain);
    }

    #[test]
    fn sell_tax_splits_and_conserves() {
        let e = engine();
        let a = e.assess(&acct(1), &acct(0xAA), 1_000).unwrap();
        assert_eq!(a.class, TransferClass::Sell);
        assert_eq!(a.net, 900);
        assert_eq!(a.liquidity, 20);
        assert_eq!(a.treasury, 20);
        assert_eq!(a.reward, 60);
        assert_eq!(a.net + a.tax(), a.gross);
    }

    #[test]
    fn rounding_never_creates_value() {
        let e = engine();
        for amount in [1u128, 7, 9, 11, 99, 101, 12_345, 999_999_999] {
            let a = e.assess(&acct(1), &acct(0xAA), amount).unwrap();
            assert_eq!(a.net + a.liquidity + a.treasury + a.reward, amount);
            // recipient gets A*(100-R)/100 up to one unit
            let exact_net = amount * 90 / 100;
            assert!(a.net >= exact_net && a.net - exact_net <= 1);
        }
    }

    #[test]
    fn plain_and_exempt_transfers_are_untaxed() {
        let e = engine();
        let plain = e.assess(&acct(1), &acct(2), 1_000).unwrap();
        assert!(!plain.is_taxed());
        let exempt = e.assess(&acct(0xEE), &acct(0xAA), 1_000).unwrap();
        assert_eq!(exempt.class, TransferClass::Sell);
        assert_eq!(exempt.net, 1_000);
    }

    #[test]
    fn schedule_is_capped() {
        let mut e = engine();
        let bad = FeeSchedule {
            sell: SinkSplit::new(10, 10, 6),
            ..FeeSchedule::default()
        };
        assert_eq!(e.set_schedule(bad), Err(Error::InvalidFeeSchedule));
        assert_eq!(e.schedule(), &FeeSchedule::default());
    }

    #[test]
    fn pending_is_withdrawn_pro_rata() {
        let mut e = engine();
        let a = e.assess(&acct(1), &acct(0xAA), 1_000).unwrap();
        e.accrue(&a).unwrap();
        assert_eq!(e.pending().total(), 100);

        let taken = e.withdraw_pending(33).unwrap();
        assert_eq!(taken.total(), 33);
        assert!(taken.liquidity <= 20 && taken.treasury <= 20 && taken.reward <= 60);
        assert_eq!(e.pending().total(), 67);

        let rest = e.withdraw_pending(Balance::MAX).unwrap();
        assert_eq!(rest.total(), 67);
        assert!(e.pending().is_empty());
    }

    #[test]
    fn slice_remainder_respects_sink_capacity() {
        let pending = SinkBalances {
            liquidity: 1,
            treasury: 1,
            reward: 0,
        };
        let taken = pending.slice(1).unwrap();
        assert_eq!(taken.total(), 1);
        assert_eq!(taken.reward, 0);
    }

    #[test]
    fn processing_guard_and_trigger() {
        let mut e = engine();
        let a = e.assess(&acct(1), &acct(0xAA), 20_000).unwrap();
        e.accrue(&a).unwrap();
        assert!(e.should_process(TransferClass::Sell));
        assert!(e.should_process(TransferClass::Plain));
        assert!(!e.should_process(TransferClass::Buy));

        e.begin_processing().unwrap();
        assert_eq!(e.begin_processing(), Err(Error::ReentrantTax));
        assert!(!e.should_process(TransferClass::Sell));
        e.end_processing();
        assert!(!e.is_processing());
    }
}
