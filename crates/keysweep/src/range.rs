use crate::{Error, Result};
use core::cmp::Ordering;

/// An index into the key space.
///
/// Every key that can be searched is strictly below `u64::MAX`: ranges are
/// half-open, so the largest representable end is `u64::MAX` itself.
pub type KeyId = u64;

/// Number of effective keys in single DES.
pub const DES_KEY_SPACE: KeyId = 1 << 56;

/// A half-open interval `[start, end)` of the key space with a scheduling
/// hint.
///
/// The priority decides which range the dispatcher hands out next. It never
/// affects which keys get searched.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Range {
    start: KeyId,
    end: KeyId,
    priority: f64,
}

impl Range {
    /// Creates `[start, end)` with zero priority.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `end < start`. An empty range
    /// (`start == end`) is allowed; it is the "no more work" sentinel.
    pub fn new(start: KeyId, end: KeyId) -> Result<Self> {
        if end < start {
            return Err(Error::invalid(format!(
                "inverted range [{start}, {end})"
            )));
        }
        Ok(Self {
            start,
            end,
            priority: 0.0,
        })
    }

    /// The empty sentinel range.
    pub const fn empty() -> Self {
        Self {
            start: 0,
            end: 0,
            priority: 0.0,
        }
    }

    /// Returns a copy of this range carrying `priority`.
    #[must_use]
    pub const fn with_priority(mut self, priority: f64) -> Self {
        self.priority = priority;
        self
    }

    pub const fn start(&self) -> KeyId {
        self.start
    }

    pub const fn end(&self) -> KeyId {
        self.end
    }

    pub const fn priority(&self) -> f64 {
        self.priority
    }

    /// Number of keys covered.
    pub const fn len(&self) -> u64 {
        self.end - self.start
    }

    pub const fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub const fn contains(&self, key: KeyId) -> bool {
        self.start <= key && key < self.end
    }

    /// Iterates the keys in ascending order, without gaps or duplicates.
    pub const fn keys(&self) -> core::ops::Range<KeyId> {
        self.start..self.end
    }

    /// Splits off at most `max_len` keys from the front.
    ///
    /// Returns the head and, if anything is left over, the tail. Both halves
    /// keep this range's priority. A `max_len` of zero is treated as one.
    pub fn split_front(&self, max_len: u64) -> (Self, Option<Self>) {
        let max_len = max_len.max(1);
        if self.len() <= max_len {
            return (*self, None);
        }
        let mid = self.start + max_len;
        let head = Self {
            end: mid,
            ..*self
        };
        let tail = Self {
            start: mid,
            ..*self
        };
        (head, Some(tail))
    }

    /// Scheduling order: higher priority first, then lower start first.
    ///
    /// `Greater` means "serve before". Priorities compare with
    /// [`f64::total_cmp`] so the order is total even for NaN.
    pub fn schedule_cmp(&self, other: &Self) -> Ordering {
        self.priority
            .total_cmp(&other.priority)
            .then_with(|| other.start.cmp(&self.start))
    }
}

impl core::fmt::Display for Range {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}
