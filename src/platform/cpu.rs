//! CPU identity and liveness.

use core::sync::atomic::{AtomicUsize, Ordering};

/// A unique identifier for a single CPU core.
pub type Id = usize;

/// Fetches the current CPU [`Id`].
pub trait CpuIdReader: Sync {
    /// The current CPU [`Id`] that is executing.
    fn current_cpu() -> Id;
}

/// A bitmask of cores that are currently online.
///
/// Maintained by the embedding kernel's hotplug path. Supports at most
/// `usize::BITS` cores, which also bounds the size of the device registry.
#[derive(Default)]
pub struct OnlineSet {
    bits: AtomicUsize,
}

impl OnlineSet {
    /// Create a set with every core offline.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            bits: AtomicUsize::new(0),
        }
    }

    /// Mark a core as online. Ids beyond the set's capacity are ignored.
    pub fn mark_online(&self, core: Id) {
        if core < usize::BITS as usize {
            self.bits.fetch_or(1 << core, Ordering::Release);
        }
    }

    /// Mark a core as offline. Ids beyond the set's capacity are ignored.
    pub fn mark_offline(&self, core: Id) {
        if core < usize::BITS as usize {
            self.bits.fetch_and(!(1 << core), Ordering::Release);
        }
    }

    /// Is the core currently online?
    #[must_use]
    pub fn is_online(&self, core: Id) -> bool {
        core < usize::BITS as usize && self.bits.load(Ordering::Acquire) & (1 << core) != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn online_tracking() {
        let set = OnlineSet::new();
        assert!(!set.is_online(0));
        set.mark_online(0);
        set.mark_online(3);
        assert!(set.is_online(0));
        assert!(!set.is_online(1));
        assert!(set.is_online(3));
        set.mark_offline(0);
        assert!(!set.is_online(0));
        assert!(set.is_online(3));
    }

    #[test]
    fn out_of_range_is_offline() {
        let set = OnlineSet::new();
        assert!(!set.is_online(usize::BITS as usize));
        assert!(!set.is_online(usize::MAX));
    }

    #[test]
    fn out_of_range_marks_are_ignored() {
        let set = OnlineSet::new();
        set.mark_online(2);
        set.mark_online(usize::BITS as usize);
        set.mark_online(usize::MAX);
        set.mark_offline(usize::MAX);
        assert!(set.is_online(2));
        assert!(!set.is_online(usize::BITS as usize));
        for core in 0..usize::BITS as usize {
            assert_eq!(set.is_online(core), core == 2);
        }
    }
}
