//! Fixed, stake-weighted member set (spec.md "Member Table").
//!
//! Membership and stake are fixed for the window this crate covers; there
//! is deliberately no add/remove API (dynamic membership is a spec.md
//! Non-goal).
use serde::{Deserialize, Serialize};

/// Ordered, fixed stake table: member `i` is entry `i`, `0..N-1`.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct MemberTable {
    stakes: Vec<u64>,
    total_stake: u64,
}

impl MemberTable {
    /// Build a member table from a stake vector, indexed by member id.
    pub fn new(stakes: Vec<u64>) -> Self {
        let total_stake = stakes.iter().sum();
        Self { stakes, total_stake }
    }

    /// An evenly-weighted table of `n` members, each with stake 1. Handy
    /// for tests and for callers that don't yet model weighted stake.
    pub fn uniform(n: u32) -> Self {
        Self::new(vec![1; n as usize])
    }

    /// Number of members, `N`.
    pub fn len(&self) -> u32 {
        self.stakes.len() as u32
    }

    /// Whether the table has no members.
    pub fn is_empty(&self) -> bool {
        self.stakes.is_empty()
    }

    /// Stake weight of member `id`.
    pub fn stake(&self, id: u32) -> u64 {
        self.stakes[id as usize]
    }

    /// Sum of all member stakes.
    pub fn total_stake(&self) -> u64 {
        self.total_stake
    }

    /// Whether `yes` out of `total_stake` constitutes a supermajority:
    /// strictly greater than two-thirds, i.e. `2 * yes > total`.
    pub fn is_supermajority(&self, yes: u64) -> bool {
        2 * yes > self.total_stake
    }

    /// Iterate member ids `0..N`.
    pub fn ids(&self) -> impl Iterator<Item = u32> {
        0..self.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_two_thirds_is_not_supermajority() {
        // N=4 stakes of 1 each: total=4. yes=2 gives 2*2=4, not > 4.
        let table = MemberTable::uniform(4);
        assert!(!table.is_supermajority(2));
        assert!(table.is_supermajority(3));
    }

    #[test]
    fn weighted_stake_supermajority() {
        let table = MemberTable::new(vec![5, 1, 1, 1]);
        assert_eq!(table.total_stake(), 8);
        // 5 alone is already > 2/3 of 8 (5.33).
        assert!(table.is_supermajority(5));
        assert!(!table.is_supermajority(3));
    }
}
