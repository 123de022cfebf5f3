/// Every failure the reward engine can surface.
///
/// Every variant is fatal to the call that produced it, and the caller
/// discards that call's writes.  A holder that fails inside a settlement
/// scan is the one exception: it is rolled back and listed in the scan
/// report while the scan goes on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, scale::Encode, scale::Decode)]
#[cfg_attr(feature = "std", derive(scale_info::TypeInfo))]
pub enum Error {
    /// Transfer or stake exceeds the spendable balance (balance minus stake).
    InsufficientBalance,
    /// Reward distribution attempted while no account holds reward shares.
    NoEligibleShares,
    /// Venue output fell below the caller's `min_amount_out`.
    SlippageExceeded,
    /// Venue exchange attempted after its deadline.
    Expired,
    /// Tax processing was entered while already running.
    ReentrantTax,
    /// An arithmetic step overflowed.
    ArithmeticOverflow,
    /// An arithmetic step underflowed.
    ArithmeticUnderflow,
    /// Zero-value transfer, stake or deposit.
    ZeroAmount,
    /// Staking is switched off.
    StakingDisabled,
    /// The account is barred from staking and reinvesting.
    NotStakingQualified,
    /// Stake below the configured minimum.
    BelowMinimumStake,
    /// Unstake exceeds the staked amount.
    InsufficientStake,
    /// Tax split exceeds `MAX_TAX_PERCENT` for some transfer class.
    InvalidFeeSchedule,
    /// Exchange path shorter than two assets or revisiting an asset.
    InvalidPath,
    /// No pool exists for a hop of the path.
    UnknownPool,
    /// Pool reserves cannot serve the request.
    InsufficientLiquidity,
    /// Reward asset held by the engine does not cover a settlement.
    InsufficientRewardReserve,
    /// Operation requires the account to take part in rewards.
    ExcludedFromRewards,
    /// An external venue or reward token rejected the call.
    VenueRejected,
}

pub type Result<T> = core::result::Result<T, Error>;
