//! Metadata layout for types stored as one packed contract cell: the engine
//! totals, the reference venue, and each account slot as a mapping value.
//!
//! The wide accumulator type has no layout of its own, so these types are
//! described to the metadata as a single SCALE-encoded cell.

use ink::metadata::layout::{Layout, LayoutKey, LeafLayout};
use ink::primitives::Key;
use ink::storage::traits::StorageLayout;

use crate::conversion::ConstantProductVenue;
use crate::engine::PrismaEngine;
use crate::store::AccountSlot;

macro_rules! packed_leaf {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl StorageLayout for $ty {
                fn layout(key: &Key) -> Layout {
                    Layout::Leaf(LeafLayout::from_key::<Self>(LayoutKey::from(key)))
                }
            }
        )+
    };
}

packed_leaf!(PrismaEngine, ConstantProductVenue, AccountSlot);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregates_are_single_leaves() {
        assert!(matches!(PrismaEngine::layout(&7), Layout::Leaf(_)));
        assert!(matches!(ConstantProductVenue::layout(&7), Layout::Leaf(_)));
        assert!(matches!(AccountSlot::layout(&7), Layout::Leaf(_)));
    }
}
