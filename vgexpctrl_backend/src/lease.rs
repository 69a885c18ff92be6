//! Channel-set leasing: the mutual-exclusion discipline of the shared
//! physical channels.
//!
//! A scan leases its whole channel set for the duration of
//! upload/arm/trigger/acquire; interactive gate writes lease the same set
//! briefly. Overlapping sets serialize behind the table's condvar, disjoint
//! sets proceed independently. The guard releases on drop, so a lease is
//! never leaked past an error path.

use parking_lot::{Condvar, Mutex};
use std::collections::HashSet;

/// Table of currently-leased channel names.
pub struct LeaseTable {
    held: Mutex<HashSet<String>>,
    cv: Condvar,
}

impl LeaseTable {
    pub fn new() -> Self {
        Self {
            held: Mutex::new(HashSet::new()),
            cv: Condvar::new(),
        }
    }

    /// Blocks until none of `names` is leased, then leases them all.
    pub fn acquire(&self, names: &[String]) -> LeaseGuard<'_> {
        let mut held = self.held.lock();
        while names.iter().any(|n| held.contains(n)) {
            self.cv.wait(&mut held);
        }
        for name in names {
            held.insert(name.clone());
        }
        LeaseGuard {
            table: self,
            names: names.to_vec(),
        }
    }

    /// Non-blocking variant; `None` when any of `names` is already leased.
    pub fn try_acquire(&self, names: &[String]) -> Option<LeaseGuard<'_>> {
        let mut held = self.held.lock();
        if names.iter().any(|n| held.contains(n)) {
            return None;
        }
        for name in names {
            held.insert(name.clone());
        }
        Some(LeaseGuard {
            table: self,
            names: names.to_vec(),
        })
    }
}

impl Default for LeaseTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Releases its channel names and wakes waiters on drop.
pub struct LeaseGuard<'a> {
    table: &'a LeaseTable,
    names: Vec<String>,
}

impl<'a> Drop for LeaseGuard<'a> {
    fn drop(&mut self) {
        let mut held = self.table.held.lock();
        for name in &self.names {
            held.remove(name);
        }
        self.table.cv.notify_all();
    }
}
