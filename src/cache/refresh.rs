// # Refresh Coordination
//
// Refresh-after-write reloads entries in the background once they pass
// an age threshold, independent of expiration: readers keep getting the
// stale value until the reload lands. The in-flight registry guarantees
// at most one reload per key; concurrent triggers coalesce on the
// registry entry and back off.

use std::hash::Hash;

use dashmap::mapref::entry::Entry as MapEntry;
use dashmap::DashMap;

pub(crate) struct RefreshCoordinator<K> {
    in_flight: DashMap<K, ()>,
}

impl<K> RefreshCoordinator<K>
where
    K: Eq + Hash + Clone,
{
    pub(crate) fn new() -> Self {
        RefreshCoordinator {
            in_flight: DashMap::new(),
        }
    }

    /// Claim the refresh for `key`. Returns false when a reload is
    /// already running, in which case the caller must not start one.
    pub(crate) fn try_begin(&self, key: K) -> bool {
        match self.in_flight.entry(key) {
            MapEntry::Occupied(_) => false,
            MapEntry::Vacant(slot) => {
                slot.insert(());
                true
            }
        }
    }

    /// Release the claim once the reload finished, successfully or not.
    pub(crate) fn complete(&self, key: &K) {
        self.in_flight.remove(key);
    }

    pub(crate) fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_claim_per_key() {
        let coordinator: RefreshCoordinator<String> = RefreshCoordinator::new();
        assert!(coordinator.try_begin("a".to_string()));
        assert!(!coordinator.try_begin("a".to_string()));
        assert!(coordinator.try_begin("b".to_string()));
        assert_eq!(coordinator.in_flight_count(), 2);

        coordinator.complete(&"a".to_string());
        assert_eq!(coordinator.in_flight_count(), 1);
        assert!(coordinator.try_begin("a".to_string()));
    }
}
