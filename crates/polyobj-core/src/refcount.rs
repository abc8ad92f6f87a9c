//! Strong and weak reference counts packed into one atomic word.
//!
//! The low 32 bits hold the strong count and the high 32 bits the weak count,
//! so every transition that touches both (such as the last strong release
//! taking a temporary weak reference) is a single compare-and-swap.

use std::sync::atomic::{fence, AtomicU64, Ordering};

const STRONG_ONE: u64 = 1;
const STRONG_MASK: u64 = 0xFFFF_FFFF;
const WEAK_ONE: u64 = 1 << 32;

#[inline]
fn strong_of(word: u64) -> u32 {
    (word & STRONG_MASK) as u32
}

#[inline]
fn weak_of(word: u64) -> u32 {
    (word >> 32) as u32
}

/// Outcome of dropping a strong reference.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum StrongRelease {
    /// Other strong references remain.
    Shared,
    /// This was the last strong reference. The caller now owns a temporary
    /// weak reference and must tear the object down, then release that weak
    /// reference.
    Last,
    /// The strong count was already zero; nothing happened.
    AlreadyDead,
}

/// Outcome of dropping a weak reference.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum WeakRelease {
    /// Strong or weak references remain.
    Retained,
    /// Both counts reached zero; the caller must free the shell.
    Deallocate,
    /// The weak count was already zero; nothing happened.
    Underflow,
}

#[derive(Debug)]
pub struct RefCounts {
    word: AtomicU64,
}

impl RefCounts {
    /// One strong reference, no weak references.
    pub fn new() -> Self {
        Self {
            word: AtomicU64::new(STRONG_ONE),
        }
    }

    pub fn strong(&self) -> u32 {
        strong_of(self.word.load(Ordering::Acquire))
    }

    pub fn weak(&self) -> u32 {
        weak_of(self.word.load(Ordering::Acquire))
    }

    /// Adds a strong reference unless the count is zero.
    ///
    /// Refusing to go from zero keeps a stray obtain inside a `finalize` or
    /// `free` callback from resurrecting an object that is being torn down.
    pub fn obtain_strong(&self) -> bool {
        self.try_upgrade()
    }

    /// Adds a strong reference only if one is still held. This is the one
    /// safe way to turn a weak reference into a strong one.
    pub fn try_upgrade(&self) -> bool {
        let mut current = self.word.load(Ordering::Relaxed);
        loop {
            if strong_of(current) == 0 {
                return false;
            }
            match self.word.compare_exchange_weak(
                current,
                current + STRONG_ONE,
                Ordering::Acquire,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(observed) => current = observed,
            }
        }
    }

    pub fn release_strong(&self) -> StrongRelease {
        let mut current = self.word.load(Ordering::Relaxed);
        loop {
            let strong = strong_of(current);
            if strong == 0 {
                return StrongRelease::AlreadyDead;
            }
            // The last release also takes a weak reference in the same step so
            // no weak holder can free the shell while teardown runs.
            let next = if strong == 1 {
                current - STRONG_ONE + WEAK_ONE
            } else {
                current - STRONG_ONE
            };
            match self.word.compare_exchange_weak(
                current,
                next,
                Ordering::Release,
                Ordering::Relaxed,
            ) {
                Ok(_) if strong == 1 => {
                    fence(Ordering::Acquire);
                    return StrongRelease::Last;
                }
                Ok(_) => return StrongRelease::Shared,
                Err(observed) => current = observed,
            }
        }
    }

    pub fn obtain_weak(&self) {
        self.word.fetch_add(WEAK_ONE, Ordering::Relaxed);
    }

    pub fn release_weak(&self) -> WeakRelease {
        let mut current = self.word.load(Ordering::Relaxed);
        loop {
            if weak_of(current) == 0 {
                return WeakRelease::Underflow;
            }
            let next = current - WEAK_ONE;
            match self.word.compare_exchange_weak(
                current,
                next,
                Ordering::Release,
                Ordering::Relaxed,
            ) {
                Ok(_) if next == 0 => {
                    fence(Ordering::Acquire);
                    return WeakRelease::Deallocate;
                }
                Ok(_) => return WeakRelease::Retained,
                Err(observed) => current = observed,
            }
        }
    }
}

impl Default for RefCounts {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn starts_with_one_strong() {
        let counts = RefCounts::new();
        assert_eq!(counts.strong(), 1);
        assert_eq!(counts.weak(), 0);
    }

    #[test]
    fn last_release_takes_temporary_weak() {
        let counts = RefCounts::new();
        assert!(counts.obtain_strong());
        assert_eq!(counts.release_strong(), StrongRelease::Shared);
        assert_eq!(counts.release_strong(), StrongRelease::Last);
        assert_eq!(counts.strong(), 0);
        assert_eq!(counts.weak(), 1);
        assert_eq!(counts.release_weak(), WeakRelease::Deallocate);
    }

    #[test]
    fn zero_strong_is_guarded() {
        let counts = RefCounts::new();
        counts.obtain_weak();
        assert_eq!(counts.release_strong(), StrongRelease::Last);
        assert!(!counts.obtain_strong());
        assert!(!counts.try_upgrade());
        assert_eq!(counts.release_strong(), StrongRelease::AlreadyDead);
        assert_eq!(counts.strong(), 0);
    }

    #[test]
    fn weak_holder_keeps_shell() {
        let counts = RefCounts::new();
        counts.obtain_weak();
        assert_eq!(counts.release_strong(), StrongRelease::Last);
        // Teardown finished: drop the temporary weak reference.
        assert_eq!(counts.release_weak(), WeakRelease::Retained);
        assert_eq!(counts.weak(), 1);
        assert_eq!(counts.release_weak(), WeakRelease::Deallocate);
        assert_eq!(counts.release_weak(), WeakRelease::Underflow);
    }

    #[test]
    fn upgrade_succeeds_while_alive() {
        let counts = RefCounts::new();
        counts.obtain_weak();
        assert!(counts.try_upgrade());
        assert_eq!(counts.strong(), 2);
        assert_eq!(counts.weak(), 1);
    }

    #[test]
    fn concurrent_obtain_release_balances() {
        let counts = RefCounts::new();
        thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    for _ in 0..10_000 {
                        assert!(counts.obtain_strong());
                        counts.obtain_weak();
                        assert_eq!(counts.release_weak(), WeakRelease::Retained);
                        assert_eq!(counts.release_strong(), StrongRelease::Shared);
                    }
                });
            }
        });
        assert_eq!(counts.strong(), 1);
        assert_eq!(counts.weak(), 0);
        assert_eq!(counts.release_strong(), StrongRelease::Last);
    }
}
