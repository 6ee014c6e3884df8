use std::collections::{BTreeMap, VecDeque};

use tracing::{info, warn};

use crate::protocol::{ObserverId, Role};

/// Hands out the playable roles to connecting observers and takes them back
/// on disconnect.
///
/// Every connected observer is registered here, spectators included (they
/// hold `Role::Unassigned`), so the pool doubles as the list of live
/// observers.
pub struct RolePool {
    available: VecDeque<Role>,
    holders: BTreeMap<ObserverId, Role>,
}

impl RolePool {
    pub fn new() -> Self {
        Self {
            available: Role::PLAYABLE.into_iter().collect(),
            holders: BTreeMap::new(),
        }
    }

    /// Takes the role at the front of the queue, or the spectator sentinel
    /// when the queue is empty. Re-assigning an already registered observer
    /// returns the role it holds.
    pub fn assign_role(&mut self, observer: ObserverId) -> Role {
        if let Some(&role) = self.holders.get(&observer) {
            warn!("Observer {} already registered with {:?}", observer, role);
            return role;
        }

        let role = self.available.pop_front().unwrap_or(Role::Unassigned);

        if role.is_playable() {
            if let Some(previous) = self.holder_of(role) {
                debug_assert!(false, "{:?} handed out while held by {}", role, previous);
                // Last writer wins: the earlier holder drops to spectator.
                warn!(
                    "{:?} was still held by observer {}; demoting it to spectator",
                    role, previous
                );
                self.holders.insert(previous, Role::Unassigned);
            }
        }

        self.holders.insert(observer, role);
        info!("Assigned {:?} to observer {}", role, observer);
        role
    }

    /// Puts a playable role back at the end of the queue. The sentinel and
    /// roles that are already queued or still held are ignored.
    pub fn return_role(&mut self, role: Role) {
        if !role.is_playable() || self.available.contains(&role) {
            return;
        }
        if let Some(holder) = self.holder_of(role) {
            warn!("Refusing to requeue {:?}: still held by {}", role, holder);
            return;
        }
        self.available.push_back(role);
    }

    /// Unregisters the observer and requeues its role. Returns the role it
    /// held, or `None` for an unknown observer.
    pub fn reclaim(&mut self, observer: ObserverId) -> Option<Role> {
        let role = self.holders.remove(&observer)?;
        self.return_role(role);
        info!("Reclaimed {:?} from observer {}", role, observer);
        Some(role)
    }

    pub fn role_of(&self, observer: ObserverId) -> Option<Role> {
        self.holders.get(&observer).copied()
    }

    pub fn holder_of(&self, role: Role) -> Option<ObserverId> {
        self.holders
            .iter()
            .find(|(_, &held)| held == role)
            .map(|(&id, _)| id)
    }

    pub fn is_connected(&self, observer: ObserverId) -> bool {
        self.holders.contains_key(&observer)
    }

    /// Observers holding a playable role, in id order.
    pub fn role_holders(&self) -> Vec<ObserverId> {
        self.holders
            .iter()
            .filter(|(_, role)| role.is_playable())
            .map(|(&id, _)| id)
            .collect()
    }

    #[cfg(test)]
    pub fn has_available(&self) -> bool {
        !self.available.is_empty()
    }

    #[cfg(test)]
    pub fn available(&self) -> impl Iterator<Item = Role> + '_ {
        self.available.iter().copied()
    }
}

impl Default for RolePool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roles_are_handed_out_in_fixed_order() {
        let mut pool = RolePool::new();
        assert_eq!(pool.assign_role(10), Role::Farming);
        assert_eq!(pool.assign_role(11), Role::Industry);
        assert_eq!(pool.assign_role(12), Role::Housing);
        assert_eq!(pool.assign_role(13), Role::Nature);
        assert!(!pool.has_available());
    }

    #[test]
    fn exhausted_pool_registers_spectators() {
        let mut pool = RolePool::new();
        for id in 0..4 {
            pool.assign_role(id);
        }
        assert_eq!(pool.assign_role(99), Role::Unassigned);
        assert_eq!(pool.role_of(99), Some(Role::Unassigned));
        assert!(pool.is_connected(99));
        assert_eq!(pool.role_holders(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn reclaimed_role_goes_to_back_of_queue() {
        let mut pool = RolePool::new();
        pool.assign_role(1); // Farming
        pool.assign_role(2); // Industry

        assert_eq!(pool.reclaim(1), Some(Role::Farming));
        let queue: Vec<Role> = pool.available().collect();
        assert_eq!(queue, vec![Role::Housing, Role::Nature, Role::Farming]);

        assert_eq!(pool.assign_role(3), Role::Housing);
        assert_eq!(pool.assign_role(4), Role::Nature);
        assert_eq!(pool.assign_role(5), Role::Farming);
    }

    #[test]
    fn reclaiming_spectator_does_not_queue_sentinel() {
        let mut pool = RolePool::new();
        for id in 0..5 {
            pool.assign_role(id);
        }
        assert_eq!(pool.reclaim(4), Some(Role::Unassigned));
        assert!(!pool.has_available());
        assert_eq!(pool.reclaim(4), None);
    }

    #[test]
    fn no_role_is_ever_held_twice() {
        let mut pool = RolePool::new();
        let mut next_id = 0;
        // Churn connections and disconnections in an uneven pattern.
        for step in 0..40u64 {
            if step % 3 == 2 {
                let victim = pool.role_holders().first().copied();
                if let Some(id) = victim {
                    pool.reclaim(id);
                }
            } else {
                pool.assign_role(next_id);
                next_id += 1;
            }
            for role in Role::PLAYABLE {
                let holders = pool
                    .role_holders()
                    .into_iter()
                    .filter(|&id| pool.role_of(id) == Some(role))
                    .count();
                assert!(holders <= 1, "{:?} held by {} observers", role, holders);
            }
        }
    }

    #[test]
    fn returning_a_held_role_is_ignored() {
        let mut pool = RolePool::new();
        pool.assign_role(1); // Farming
        pool.return_role(Role::Farming);
        assert!(!pool.available().any(|r| r == Role::Farming));
    }
}
