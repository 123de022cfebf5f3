//! # ConversionGateway: the external exchange, seen from the engine
//!
//! The engine never prices anything itself.  It asks a venue to `quote`,
//! then `exchange`, along a path of asset ids:
//!
//! ```text
//!   [PRISMA, REWARD]   sell collected tax for the reward asset
//!   [REWARD, PRISMA]   buy PRISMA back for a reinvesting holder
//! ```
//!
//! `ConstantProductVenue` is the in-memory reference venue (x·y = k with a
//! 0.25% input fee).  The contract runs it in devnet mode and tests use it
//! directly; with a router configured the contract swaps it for
//! cross-contract calls implementing the same traits.
//!
//! Native PRISMA balances are owned by the engine, so venues only move the
//! reward asset.  The engine moves PRISMA between itself, the pair and
//! holders to mirror what a venue does with it.

use ink::prelude::{collections::BTreeMap, vec::Vec};

use crate::constants::{BPS_DENOMINATOR, VENUE_FEE_BPS};
use crate::errors::{Error, Result};
use crate::math;
use crate::{AccountId, Balance, Timestamp};

/// One exchange request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapOrder<'a> {
    pub path: &'a [AccountId],
    pub amount_in: Balance,
    pub min_amount_out: Balance,
    pub deadline: Timestamp,
}

pub trait ConversionGateway {
    /// Output for `amount_in` along `path` at current reserves.  No effects.
    fn quote(&self, path: &[AccountId], amount_in: Balance) -> Result<Balance>;

    /// Execute `order` and return the realized output.
    ///
    /// # Errors
    /// - [`Error::Expired`]: `now > order.deadline`.
    /// - [`Error::SlippageExceeded`]: output below `order.min_amount_out`.
    fn exchange(&mut self, order: SwapOrder<'_>, now: Timestamp) -> Result<Balance>;
}

pub trait LiquidityProvider {
    /// Add up to the given amounts to the `(token_a, token_b)` pool on
    /// behalf of `to`.  Returns the amounts actually used, at the pool ratio.
    #[allow(clippy::too_many_arguments)]
    fn add_liquidity(
        &mut self,
        token_a: AccountId,
        amount_a: Balance,
        token_b: AccountId,
        amount_b: Balance,
        to: AccountId,
        deadline: Timestamp,
        now: Timestamp,
    ) -> Result<(Balance, Balance)>;
}

/// The reward asset as a token the engine holds.
pub trait RewardAsset {
    /// Pay `amount` out of the engine's holdings.
    fn send_reward(&mut self, to: AccountId, amount: Balance) -> Result<()>;
    /// Collect `amount` from `from` into the engine's holdings.
    fn pull_reward(&mut self, from: AccountId, amount: Balance) -> Result<()>;
}

/// Everything the engine needs from the outside world.
pub trait Market: ConversionGateway + LiquidityProvider + RewardAsset {}

impl<T: ConversionGateway + LiquidityProvider + RewardAsset + ?Sized> Market for T {}

// =============================================================================
// REFERENCE VENUE
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, scale::Encode, scale::Decode)]
#[cfg_attr(feature = "std", derive(scale_info::TypeInfo))]
pub struct Pool {
    /// Reserve of the lower-ordered asset of the pair.
    pub reserve_low: Balance,
    /// Reserve of the higher-ordered asset of the pair.
    pub reserve_high: Balance,
    pub total_liquidity: Balance,
    pub providers: BTreeMap<AccountId, Balance>,
}

impl Pool {
    fn reserves(&self, token_in: &AccountId, token_out: &AccountId) -> (Balance, Balance) {
        if token_in < token_out {
            (self.reserve_low, self.reserve_high)
        } else {
            (self.reserve_high, self.reserve_low)
        }
    }

    fn set_reserves(&mut self, token_in: &AccountId, token_out: &AccountId, r_in: Balance, r_out: Balance) {
        if token_in < token_out {
            self.reserve_low = r_in;
            self.reserve_high = r_out;
        } else {
            self.reserve_high = r_in;
            self.reserve_low = r_out;
        }
    }
}

fn pool_key(a: AccountId, b: AccountId) -> (AccountId, AccountId) {
    if a < b {
        (a, b)
    } else {
        (b, a)
    }
}

/// `out = in·(1−fee)·R_out / (R_in + in·(1−fee))`, truncating.
fn amount_out(amount_in: Balance, reserve_in: Balance, reserve_out: Balance) -> Result<Balance> {
    if amount_in == 0 {
        return Err(Error::ZeroAmount);
    }
    if reserve_in == 0 || reserve_out == 0 {
        return Err(Error::InsufficientLiquidity);
    }
    let in_with_fee = math::widen(amount_in)
        .checked_mul(math::widen(BPS_DENOMINATOR - VENUE_FEE_BPS))
        .ok_or(Error::ArithmeticOverflow)?;
    let numerator = in_with_fee
        .checked_mul(math::widen(reserve_out))
        .ok_or(Error::ArithmeticOverflow)?;
    let denominator = math::widen(reserve_in)
        .checked_mul(math::widen(BPS_DENOMINATOR))
        .and_then(|d| d.checked_add(in_with_fee))
        .ok_or(Error::ArithmeticOverflow)?;
    math::narrow(numerator / denominator)
}

/// Constant-product venue with a built-in ledger for the reward asset.
#[derive(Debug, Clone, PartialEq, Eq, scale::Encode, scale::Decode)]
#[cfg_attr(feature = "std", derive(scale_info::TypeInfo))]
pub struct ConstantProductVenue {
    reward_asset: AccountId,
    /// Account whose reward wallet backs `send_reward`/`pull_reward`.
    reward_holder: AccountId,
    pools: BTreeMap<(AccountId, AccountId), Pool>,
    reward_wallets: BTreeMap<AccountId, Balance>,
}

impl ConstantProductVenue {
    pub fn new(reward_asset: AccountId, reward_holder: AccountId) -> Self {
        Self {
            reward_asset,
            reward_holder,
            pools: BTreeMap::new(),
            reward_wallets: BTreeMap::new(),
        }
    }

    pub fn reward_asset(&self) -> AccountId {
        self.reward_asset
    }

    pub fn pool(&self, a: AccountId, b: AccountId) -> Option<&Pool> {
        self.pools.get(&pool_key(a, b))
    }

    /// `(reserve_a, reserve_b)` of the pair, in argument order.
    pub fn reserves(&self, a: AccountId, b: AccountId) -> Option<(Balance, Balance)> {
        self.pool(a, b).map(|p| p.reserves(&a, &b))
    }

    pub fn liquidity_of(&self, a: AccountId, b: AccountId, provider: &AccountId) -> Balance {
        self.pool(a, b)
            .and_then(|p| p.providers.get(provider).copied())
            .unwrap_or(0)
    }

    pub fn reward_balance_of(&self, account: &AccountId) -> Balance {
        self.reward_wallets.get(account).copied().unwrap_or(0)
    }

    /// Add reserves to a pool without taking anything from a wallet.
    pub fn seed_pool(&mut self, a: AccountId, amount_a: Balance, b: AccountId, amount_b: Balance) -> Result<()> {
        if a == b {
            return Err(Error::InvalidPath);
        }
        let mut pool = self.pool(a, b).cloned().unwrap_or_default();
        let (r_a, r_b) = pool.reserves(&a, &b);
        let r_a = r_a.checked_add(amount_a).ok_or(Error::ArithmeticOverflow)?;
        let r_b = r_b.checked_add(amount_b).ok_or(Error::ArithmeticOverflow)?;
        pool.set_reserves(&a, &b, r_a, r_b);
        self.pools.insert(pool_key(a, b), pool);
        Ok(())
    }

    /// Credit reward asset out of thin air.
    pub fn mint_reward(&mut self, to: AccountId, amount: Balance) -> Result<()> {
        let balance = self
            .reward_balance_of(&to)
            .checked_add(amount)
            .ok_or(Error::ArithmeticOverflow)?;
        self.reward_wallets.insert(to, balance);
        Ok(())
    }

    fn move_reward(&mut self, from: AccountId, to: AccountId, amount: Balance) -> Result<()> {
        let from_balance = self
            .reward_balance_of(&from)
            .checked_sub(amount)
            .ok_or(Error::InsufficientRewardReserve)?;
        self.reward_wallets.insert(from, from_balance);
        let to_balance = self
            .reward_balance_of(&to)
            .checked_add(amount)
            .ok_or(Error::ArithmeticOverflow)?;
        self.reward_wallets.insert(to, to_balance);
        Ok(())
    }

    fn validate_path(path: &[AccountId]) -> Result<()> {
        if path.len() < 2 {
            return Err(Error::InvalidPath);
        }
        for (i, asset) in path.iter().enumerate() {
            if path[..i].contains(asset) {
                return Err(Error::InvalidPath);
            }
        }
        Ok(())
    }

    /// Walk the path, returning the output and the post-trade pools.
    fn simulate(&self, path: &[AccountId], amount_in: Balance) -> Result<(Balance, Vec<((AccountId, AccountId), Pool)>)> {
        Self::validate_path(path)?;
        let mut touched = Vec::with_capacity(path.len() - 1);
        let mut amount = amount_in;
        for hop in path.windows(2) {
            let (token_in, token_out) = (hop[0], hop[1]);
            let mut pool = self.pool(token_in, token_out).cloned().ok_or(Error::UnknownPool)?;
            let (r_in, r_out) = pool.reserves(&token_in, &token_out);
            let out = amount_out(amount, r_in, r_out)?;
            let r_in = r_in.checked_add(amount).ok_or(Error::ArithmeticOverflow)?;
            let r_out = r_out.checked_sub(out).ok_or(Error::InsufficientLiquidity)?;
            pool.set_reserves(&token_in, &token_out, r_in, r_out);
            touched.push((pool_key(token_in, token_out), pool));
            amount = out;
        }
        Ok((amount, touched))
    }
}

impl ConversionGateway for ConstantProductVenue {
    fn quote(&self, path: &[AccountId], amount_in: Balance) -> Result<Balance> {
        self.simulate(path, amount_in).map(|(out, _)| out)
    }

    fn exchange(&mut self, order: SwapOrder<'_>, now: Timestamp) -> Result<Balance> {
        if now > order.deadline {
            return Err(Error::Expired);
        }
        let (out, touched) = self.simulate(order.path, order.amount_in)?;
        if out < order.min_amount_out {
            return Err(Error::SlippageExceeded);
        }

        let pays_reward = order.path.first() == Some(&self.reward_asset);
        if pays_reward && self.reward_balance_of(&self.reward_holder) < order.amount_in {
            return Err(Error::InsufficientRewardReserve);
        }

        // ── Commit ──────────────────────────────────────────────────────
        for (key, pool) in touched {
            self.pools.insert(key, pool);
        }
        let holder = self.reward_holder;
        if pays_reward {
            let balance = self.reward_balance_of(&holder) - order.amount_in;
            self.reward_wallets.insert(holder, balance);
        }
        if order.path.last() == Some(&self.reward_asset) {
            self.mint_reward(holder, out)?;
        }
        Ok(out)
    }
}

impl LiquidityProvider for ConstantProductVenue {
    fn add_liquidity(
        &mut self,
        token_a: AccountId,
        amount_a: Balance,
        token_b: AccountId,
        amount_b: Balance,
        to: AccountId,
        deadline: Timestamp,
        now: Timestamp,
    ) -> Result<(Balance, Balance)> {
        if now > deadline {
            return Err(Error::Expired);
        }
        if token_a == token_b {
            return Err(Error::InvalidPath);
        }
        let mut pool = self.pool(token_a, token_b).cloned().unwrap_or_default();
        let (r_a, r_b) = pool.reserves(&token_a, &token_b);

        let (used_a, used_b) = if r_a == 0 || r_b == 0 {
            (amount_a, amount_b)
        } else {
            let b_optimal = math::portion(amount_a, r_b, r_a)?;
            if b_optimal <= amount_b {
                (amount_a, b_optimal)
            } else {
                (math::portion(amount_b, r_a, r_b)?, amount_b)
            }
        };
        if used_a == 0 || used_b == 0 {
            return Err(Error::InsufficientLiquidity);
        }

        let minted = if pool.total_liquidity == 0 || r_a == 0 {
            used_a
        } else {
            math::portion(used_a, pool.total_liquidity, r_a)?
        };

        let reward_used = if token_a == self.reward_asset {
            used_a
        } else if token_b == self.reward_asset {
            used_b
        } else {
            0
        };
        if self.reward_balance_of(&self.reward_holder) < reward_used {
            return Err(Error::InsufficientRewardReserve);
        }

        let r_a = r_a.checked_add(used_a).ok_or(Error::ArithmeticOverflow)?;
        let r_b = r_b.checked_add(used_b).ok_or(Error::ArithmeticOverflow)?;
        pool.set_reserves(&token_a, &token_b, r_a, r_b);
        pool.total_liquidity = pool
            .total_liquidity
            .checked_add(minted)
            .ok_or(Error::ArithmeticOverflow)?;
        let position = pool.providers.get(&to).copied().unwrap_or(0);
        pool.providers.insert(to, position.saturating_add(minted));

        // ── Commit ──────────────────────────────────────────────────────
        self.pools.insert(pool_key(token_a, token_b), pool);
        if reward_used > 0 {
            let holder = self.reward_holder;
            let balance = self.reward_balance_of(&holder) - reward_used;
            self.reward_wallets.insert(holder, balance);
        }
        Ok((used_a, used_b))
    }
}

impl RewardAsset for ConstantProductVenue {
    fn send_reward(&mut self, to: AccountId, amount: Balance) -> Result<()> {
        self.move_reward(self.reward_holder, to, amount)
    }

    fn pull_reward(&mut self, from: AccountId, amount: Balance) -> Result<()> {
        self.move_reward(from, self.reward_holder, amount)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prisma() -> AccountId {
        AccountId::from([0xC0; 32])
    }
    fn reward() -> AccountId {
        AccountId::from([0xD0; 32])
    }
    fn other() -> AccountId {
        AccountId::from([0x10; 32])
    }

    fn venue() -> ConstantProductVenue {
        let mut v = ConstantProductVenue::new(reward(), prisma());
        v.seed_pool(prisma(), 1_000_000, reward(), 1_000_000).unwrap();
        v
    }

    fn order(path: &[AccountId], amount_in: Balance) -> SwapOrder<'_> {
        SwapOrder {
            path,
            amount_in,
            min_amount_out: 0,
            deadline: 100,
        }
    }

    #[test]
    fn quote_matches_constant_product_with_fee() {
        let v = venue();
        // 10_000·0.9975·1e6 / (1e6 + 9_975) = 9_876.48… → 9_876
        assert_eq!(v.quote(&[prisma(), reward()], 10_000), Ok(9_876));
    }

    #[test]
    fn exchange_moves_reserves_and_credits_holder() {
        let mut v = venue();
        let path = [prisma(), reward()];
        let quoted = v.quote(&path, 10_000).unwrap();
        let out = v.exchange(order(&path, 10_000), 1).unwrap();
        assert_eq!(out, quoted);
        assert_eq!(v.reserves(prisma(), reward()), Some((1_010_000, 1_000_000 - out)));
        assert_eq!(v.reward_balance_of(&prisma()), out);
    }

    #[test]
    fn exchange_failures_leave_venue_unchanged() {
        let mut v = venue();
        let before = v.clone();
        let path = [prisma(), reward()];

        assert_eq!(v.exchange(order(&path, 10_000), 101), Err(Error::Expired));
        let greedy = SwapOrder {
            min_amount_out: 9_877,
            ..order(&path, 10_000)
        };
        assert_eq!(v.exchange(greedy, 1), Err(Error::SlippageExceeded));
        assert_eq!(
            v.exchange(order(&[reward(), prisma()], 10), 1),
            Err(Error::InsufficientRewardReserve)
        );
        assert_eq!(v.exchange(order(&[prisma(), other()], 10), 1), Err(Error::UnknownPool));
        assert_eq!(v.exchange(order(&[prisma()], 10), 1), Err(Error::InvalidPath));
        assert_eq!(v, before);
    }

    #[test]
    fn multi_hop_routes_through_intermediate_pool() {
        let mut v = venue();
        v.seed_pool(reward(), 500_000, other(), 2_000_000).unwrap();
        let first = v.quote(&[prisma(), reward()], 1_000).unwrap();
        let second = v.quote(&[reward(), other()], first).unwrap();
        assert_eq!(v.quote(&[prisma(), reward(), other()], 1_000), Ok(second));
    }

    #[test]
    fn add_liquidity_uses_pool_ratio() {
        let mut v = venue();
        v.mint_reward(prisma(), 1_000).unwrap();
        let (a, b) = v
            .add_liquidity(prisma(), 100, reward(), 1_000, other(), 10, 1)
            .unwrap();
        assert_eq!((a, b), (100, 100));
        assert_eq!(v.reward_balance_of(&prisma()), 900);
        assert_eq!(v.liquidity_of(prisma(), reward(), &other()), 100);
        assert_eq!(v.reserves(prisma(), reward()), Some((1_000_100, 1_000_100)));
    }

    #[test]
    fn reward_wallet_moves() {
        let mut v = venue();
        let alice = other();
        v.mint_reward(alice, 50).unwrap();
        v.pull_reward(alice, 30).unwrap();
        assert_eq!(v.reward_balance_of(&prisma()), 30);
        v.send_reward(alice, 10).unwrap();
        assert_eq!(v.reward_balance_of(&alice), 30);
        assert_eq!(v.send_reward(alice, 21), Err(Error::InsufficientRewardReserve));
    }
}
