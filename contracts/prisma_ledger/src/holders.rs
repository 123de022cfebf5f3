use crate::errors::{Error, Result};
use crate::store::{AccountRead, AccountStore};
use crate::AccountId;

/// Append-only list of every account that ever held a balance, in order of
/// first appearance.  Positions are kept in the account store; the registry
/// only tracks the length.  The settlement cursor walks these positions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, scale::Encode, scale::Decode)]
#[cfg_attr(feature = "std", derive(scale_info::TypeInfo))]
pub struct HolderRegistry {
    len: u32,
}

impl HolderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `account`; returns `true` on first sight.  Re-adding never
    /// moves an account.
    pub fn add<S: AccountStore + ?Sized>(&mut self, store: &mut S, account: AccountId) -> Result<bool> {
        if store.holder_position(&account).is_some() {
            return Ok(false);
        }
        let position = self.len;
        self.len = position.checked_add(1).ok_or(Error::ArithmeticOverflow)?;
        store.put_holder(position, account);
        store.set_holder_position(account, position);
        Ok(true)
    }

    pub fn contains<S: AccountRead + ?Sized>(&self, store: &S, account: &AccountId) -> bool {
        store.holder_position(account).is_some()
    }

    pub fn position_of<S: AccountRead + ?Sized>(&self, store: &S, account: &AccountId) -> Option<u32> {
        store.holder_position(account)
    }

    pub fn get<S: AccountRead + ?Sized>(&self, store: &S, position: u32) -> Option<AccountId> {
        if position >= self.len {
            return None;
        }
        store.holder_at(position)
    }

    pub fn len(&self) -> u32 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}
