use crate::KeyId;
use portable_atomic::{AtomicU64, Ordering};

/// Sentinel for "nothing found yet". Never a searchable key, since ranges
/// are half-open and end at most at `u64::MAX`.
const UNSET: u64 = u64::MAX;

/// The outcome of offering a key to a [`FoundState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Adoption {
    /// The state was unset and now holds the offered key.
    First,
    /// The state held a larger key, which the offered key replaced.
    ///
    /// Only possible when more than one key satisfies the predicate.
    Lowered { previous: KeyId },
    /// The state already held this key or a smaller one.
    Kept { current: KeyId },
}

impl Adoption {
    /// Whether the offered key is now the adopted one.
    pub const fn is_adopted(&self) -> bool {
        matches!(self, Self::First | Self::Lowered { .. })
    }
}

/// The process-local replica of "has a key been found, and which".
///
/// Writers never overwrite: [`FoundState::adopt`] is a compare-and-set that
/// only moves from unset to a key, or from a key to a smaller one. Every
/// replica fed the same announcements therefore converges on the smallest
/// matching key, whatever the delivery order.
#[derive(Debug)]
pub struct FoundState {
    slot: AtomicU64,
}

impl Default for FoundState {
    fn default() -> Self {
        Self::new()
    }
}

impl FoundState {
    pub const fn new() -> Self {
        Self {
            slot: AtomicU64::new(UNSET),
        }
    }

    /// The adopted key, if any.
    pub fn get(&self) -> Option<KeyId> {
        match self.slot.load(Ordering::Acquire) {
            UNSET => None,
            key => Some(key),
        }
    }

    pub fn is_set(&self) -> bool {
        self.slot.load(Ordering::Acquire) != UNSET
    }

    /// Offers `key` using adopt-if-smaller semantics.
    ///
    /// Repeated delivery of the same key is a no-op.
    pub fn adopt(&self, key: KeyId) -> Adoption {
        debug_assert!(key != UNSET, "u64::MAX is not a searchable key");
        let mut current = self.slot.load(Ordering::Acquire);
        loop {
            if key >= current {
                return Adoption::Kept { current };
            }
            match self.slot.compare_exchange_weak(
                current,
                key,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(UNSET) => return Adoption::First,
                Ok(previous) => return Adoption::Lowered { previous },
                Err(actual) => current = actual,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread::scope;

    #[test]
    fn first_adoption_then_idempotent() {
        let state = FoundState::new();
        assert_eq!(state.get(), None);
        assert_eq!(state.adopt(577), Adoption::First);
        assert_eq!(state.adopt(577), Adoption::Kept { current: 577 });
        assert_eq!(state.get(), Some(577));
    }

    #[test]
    fn smaller_key_wins() {
        let state = FoundState::new();
        state.adopt(900);
        assert_eq!(state.adopt(1000), Adoption::Kept { current: 900 });
        assert_eq!(state.adopt(12), Adoption::Lowered { previous: 900 });
        assert_eq!(state.get(), Some(12));
    }

    #[test]
    fn zero_is_a_valid_key() {
        let state = FoundState::new();
        assert!(state.adopt(0).is_adopted());
        assert!(state.is_set());
        assert_eq!(state.get(), Some(0));
    }

    #[test]
    fn racing_writers_converge_on_minimum() {
        let state = Arc::new(FoundState::new());
        scope(|s| {
            for t in 0..8_u64 {
                let state = Arc::clone(&state);
                s.spawn(move || {
                    for k in (0..1000).rev() {
                        state.adopt(100 + t * 1000 + k);
                    }
                });
            }
        });
        assert_eq!(state.get(), Some(100));
    }
}
