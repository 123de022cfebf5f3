//! # AutoSettlementQueue: bounded cyclic settlement scan
//!
//! ```text
//!   run(budget):  visit holders[cursor], cursor += 1 (wrapping)
//!                 until the budget cannot cover one more holder
//!                 or every holder was visited once
//! ```
//!
//! Per visited holder:
//!
//! | Condition                          | Action                       | Cost              |
//! |------------------------------------|------------------------------|-------------------|
//! | excluded or interval not elapsed   | skip                         | `inspect`         |
//! | nothing withdrawable               | skip                         | `inspect`         |
//! | settlement succeeds                | record in `settled`          | `inspect + mode`  |
//! | settlement fails                   | roll back, record in `failed`| `inspect + mode`  |
//!
//! A holder is visited only if the remaining budget covers the worst case
//! (`inspect + max(payout, reinvest)`), so a run never overshoots its budget
//! and never leaves a holder half settled.  A failing holder never stops the
//! cursor: the next run starts behind it like after any other holder.
//!
//! The queue borrows its route mutably for the whole run, so a second scan
//! cannot start while one is running.

use ink::prelude::vec::Vec;

use crate::constants::{COST_INSPECT, COST_PAYOUT, COST_REINVEST};
use crate::errors::{Error, Result};
use crate::{AccountId, Balance, Timestamp};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, scale::Encode, scale::Decode)]
#[cfg_attr(feature = "std", derive(scale_info::TypeInfo))]
pub enum SettlementMode {
    /// Reward asset sent to the holder.
    #[default]
    Payout,
    /// Reward asset swapped for PRISMA and added to the holder's stake.
    Reinvest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, scale::Encode, scale::Decode)]
#[cfg_attr(feature = "std", derive(scale_info::TypeInfo))]
pub struct CostModel {
    pub inspect: u64,
    pub payout: u64,
    pub reinvest: u64,
}

impl Default for CostModel {
    fn default() -> Self {
        Self {
            inspect: COST_INSPECT,
            payout: COST_PAYOUT,
            reinvest: COST_REINVEST,
        }
    }
}

impl CostModel {
    pub fn cost_of(&self, mode: SettlementMode) -> u64 {
        match mode {
            SettlementMode::Payout => self.payout,
            SettlementMode::Reinvest => self.reinvest,
        }
    }

    /// Budget that must remain before a holder is visited.
    pub fn worst_case(&self) -> u64 {
        self.inspect.saturating_add(self.payout.max(self.reinvest))
    }
}

/// One finalized entitlement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, scale::Encode, scale::Decode)]
#[cfg_attr(feature = "std", derive(scale_info::TypeInfo))]
pub struct Settlement {
    pub account: AccountId,
    pub mode: SettlementMode,
    /// Reward asset paid out or reinvested.
    pub amount: Balance,
    /// PRISMA earned by the holder's stake, paid out with it.
    pub compounded: Balance,
}

impl Settlement {
    pub fn is_empty(&self) -> bool {
        self.amount == 0 && self.compounded == 0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// Holders visited, skipped ones included.
    pub inspected: u32,
    pub settled: Vec<Settlement>,
    /// Holders whose settlement failed and was rolled back.
    pub failed: Vec<(AccountId, Error)>,
    pub budget_used: u64,
    /// Position the next run starts from.
    pub cursor: u32,
    /// Every holder was visited once in this run.
    pub completed_cycle: bool,
}

/// The holder list and the settlement of one holder, as seen by the queue.
pub trait SettlementRoute {
    fn holder_count(&self) -> u32;

    fn holder_at(&self, position: u32) -> Option<AccountId>;

    /// Taking part in rewards and past the claim interval.
    fn is_due(&self, account: &AccountId, now: Timestamp) -> bool;

    fn mode_of(&self, account: &AccountId) -> SettlementMode;

    /// Settle and deliver everything `account` can withdraw.  All or
    /// nothing: on `Err` no state has changed.
    fn settle(&mut self, account: AccountId, mode: SettlementMode, now: Timestamp) -> Result<Settlement>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, scale::Encode, scale::Decode)]
#[cfg_attr(feature = "std", derive(scale_info::TypeInfo))]
pub struct AutoSettlementQueue {
    cursor: u32,
    cost: CostModel,
}

impl AutoSettlementQueue {
    pub fn new(cost: CostModel) -> Self {
        Self { cursor: 0, cost }
    }

    pub fn cursor(&self) -> u32 {
        self.cursor
    }

    pub fn cost_model(&self) -> &CostModel {
        &self.cost
    }

    pub fn set_cost_model(&mut self, cost: CostModel) {
        self.cost = cost;
    }

    /// Settle due holders starting at the cursor until `budget` or one full
    /// cycle runs out.  Failing holders are reported, never propagated.
    pub fn run<R: SettlementRoute + ?Sized>(
        &mut self,
        budget: u64,
        now: Timestamp,
        route: &mut R,
    ) -> ScanReport {
        let len = route.holder_count();
        if len == 0 {
            return ScanReport::default();
        }

        let worst_case = self.cost.worst_case();
        let mut position = self.cursor % len;
        let mut remaining = budget;
        let mut report = ScanReport::default();

        while report.inspected < len && remaining >= worst_case {
            let Some(account) = route.holder_at(position) else {
                break;
            };
            remaining = remaining.saturating_sub(self.cost.inspect);

            if route.is_due(&account, now) {
                let mode = route.mode_of(&account);
                match route.settle(account, mode, now) {
                    Ok(settlement) if settlement.is_empty() => {}
                    Ok(settlement) => {
                        remaining = remaining.saturating_sub(self.cost.cost_of(mode));
                        report.settled.push(settlement);
                    }
                    Err(e) => {
                        remaining = remaining.saturating_sub(self.cost.cost_of(mode));
                        report.failed.push((account, e));
                    }
                }
            }

            report.inspected += 1;
            position = (position + 1) % len;
        }

        report.budget_used = budget - remaining;
        report.cursor = position;
        report.completed_cycle = report.inspected == len;
        self.cursor = position;
        report
    }
}
