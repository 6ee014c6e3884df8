use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::protocol::Role;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectorState {
    pub role: Role,
    pub resource_level: i64,
}

/// Resource counters for every currently assigned role.
///
/// Only existence is checked here; deciding *when* a sector may change is
/// the authority's job.
#[derive(Default)]
pub struct SectorStore {
    sectors: HashMap<Role, SectorState>,
}

impl SectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a fresh sector at zero. An existing sector for the role is kept.
    pub fn create(&mut self, role: Role) -> &SectorState {
        self.sectors.entry(role).or_insert(SectorState {
            role,
            resource_level: 0,
        })
    }

    #[cfg(test)]
    pub fn get(&self, role: Role) -> Option<&SectorState> {
        self.sectors.get(&role)
    }

    /// Adds `amount` (may be negative), saturating at the `i64` bounds.
    /// Returns the new level, or `None` when the role has no sector.
    pub fn increment(&mut self, role: Role, amount: i64) -> Option<i64> {
        let sector = self.sectors.get_mut(&role)?;
        sector.resource_level = sector.resource_level.saturating_add(amount);
        Some(sector.resource_level)
    }

    pub fn remove(&mut self, role: Role) -> Option<SectorState> {
        self.sectors.remove(&role)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.sectors.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn increment_requires_a_created_sector() {
        let mut store = SectorStore::new();
        assert_eq!(store.increment(Role::Housing, 3), None);

        store.create(Role::Housing);
        assert_eq!(store.increment(Role::Housing, 3), Some(3));
        assert_eq!(store.increment(Role::Housing, -5), Some(-2));
        assert_eq!(store.get(Role::Housing).unwrap().resource_level, -2);
    }

    #[test]
    fn increment_saturates_at_the_bounds() {
        let mut store = SectorStore::new();
        store.create(Role::Farming);
        assert_eq!(store.increment(Role::Farming, i64::MAX), Some(i64::MAX));
        assert_eq!(store.increment(Role::Farming, 1), Some(i64::MAX));
        assert_eq!(store.increment(Role::Farming, i64::MIN), Some(-1));
    }

    #[test]
    fn removed_sector_starts_over_when_recreated() {
        let mut store = SectorStore::new();
        store.create(Role::Nature);
        store.increment(Role::Nature, 4);

        let removed = store.remove(Role::Nature).unwrap();
        assert_eq!(removed.resource_level, 4);
        assert!(store.get(Role::Nature).is_none());

        assert_eq!(store.create(Role::Nature).resource_level, 0);
        assert_eq!(store.len(), 1);
    }
}
