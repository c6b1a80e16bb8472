use crate::{Error, Range, Result};
use rand::{Rng, SeedableRng, rngs::StdRng};

/// How the partitioner assigns scheduling priorities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PriorityPolicy {
    /// Every range gets priority zero, so ranges are served by ascending
    /// start.
    #[default]
    Uniform,
    /// Each range gets a uniformly random priority in `[0, 1)`. A seed makes
    /// the assignment reproducible.
    Random { seed: Option<u64> },
}

/// Splits `full` into `count` contiguous, non-overlapping ranges that cover it
/// exactly.
///
/// Ranges are returned in ascending start order. Each has
/// `full.len() / count` keys except the last, which also absorbs the
/// remainder of the division. With more ranges than keys, every range but
/// the last is empty.
///
/// # Errors
///
/// Returns [`Error::InvalidArgument`] if `count` is zero or `full` is empty.
///
/// # Example
///
/// ```
/// use keysweep::{PriorityPolicy, Range, partition};
///
/// let full = Range::new(0, 23).unwrap();
/// let parts = partition(full, 5, PriorityPolicy::Uniform).unwrap();
/// let lens: Vec<_> = parts.iter().map(Range::len).collect();
/// assert_eq!(lens, vec![4, 4, 4, 4, 7]);
/// ```
pub fn partition(full: Range, count: usize, policy: PriorityPolicy) -> Result<Vec<Range>> {
    if count == 0 {
        return Err(Error::invalid("partition count must be at least 1"));
    }
    if full.is_empty() {
        return Err(Error::invalid(format!("cannot partition empty range {full}")));
    }
    let count_keys = count as u64;
    let span = full.len() / count_keys;
    let mut rng = match policy {
        PriorityPolicy::Uniform => None,
        PriorityPolicy::Random { seed: Some(seed) } => Some(StdRng::seed_from_u64(seed)),
        PriorityPolicy::Random { seed: None } => Some(StdRng::from_rng(&mut rand::rng())),
    };

    let mut ranges = Vec::with_capacity(count);
    for i in 0..count_keys {
        let start = full.start() + i * span;
        let end = if i == count_keys - 1 {
            full.end()
        } else {
            start + span
        };
        let priority = rng.as_mut().map_or(0.0, |rng| rng.random::<f64>());
        ranges.push(Range::new(start, end)?.with_priority(priority));
    }

    #[cfg(feature = "tracing")]
    tracing::debug!("Partitioned {full} into {count} ranges of {span} keys");

    Ok(ranges)
}
