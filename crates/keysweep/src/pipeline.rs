//! The per-worker generate → transform → verify pipeline.
//!
//! One scan covers one [`Range`]. Three kinds of stage run concurrently and
//! hand items over through [`BoundedQueue`]s:
//!
//! - **generate** (one thread) enumerates the range's keys in ascending order,
//! - **transform** (`transform_threads` threads) decrypts the ciphertext under
//!   each key,
//! - **verify** (the calling thread) evaluates the predicate.
//!
//! Verify runs on the caller so the worker engine can poll its inbox between
//! pipeline outputs without another thread. Cancellation is cooperative:
//! generate and transform check the [`FoundState`] before each item, verify
//! cancels both queues as soon as it stops for any reason.

use crate::{BoundedQueue, Candidate, FoundState, KeyId, Probe, Range};
use std::thread;

/// Pipeline tunables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Capacity of each hand-off queue.
    pub queue_depth: usize,
    /// Number of transform threads.
    pub transform_threads: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_depth: 1024,
            transform_threads: num_cpus::get(),
        }
    }
}

/// How a scan ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOutcome {
    /// This scan found `key` and adopted it into the found-state.
    Found(KeyId),
    /// Every key of the range was verified without a match.
    Exhausted,
    /// The scan stopped early: the found-state was set elsewhere or the
    /// poll callback asked to stop.
    Cancelled,
}

/// Work counters for one scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanStats {
    /// Keys pushed by the generate stage.
    pub generated: u64,
    /// Candidates produced by the transform stage.
    pub transformed: u64,
    /// Candidates evaluated by the verify stage.
    pub verified: u64,
    /// Candidates whose key the cipher refused.
    pub rejected: u64,
}

impl core::ops::AddAssign for ScanStats {
    fn add_assign(&mut self, rhs: Self) {
        self.generated += rhs.generated;
        self.transformed += rhs.transformed;
        self.verified += rhs.verified;
        self.rejected += rhs.rejected;
    }
}

/// Answer of the poll callback invoked before every verify step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Poll {
    Continue,
    Stop,
}

/// Scans ranges for the key a [`Probe`] accepts.
#[derive(Debug, Clone)]
pub struct Pipeline {
    probe: Probe,
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(probe: Probe, config: PipelineConfig) -> Self {
        let config = PipelineConfig {
            queue_depth: config.queue_depth.max(1),
            transform_threads: config.transform_threads.max(1),
        };
        Self { probe, config }
    }

    pub const fn probe(&self) -> &Probe {
        &self.probe
    }

    pub const fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Scans `range`, stopping at the first match.
    ///
    /// `poll` runs on the calling thread before each candidate is verified.
    /// It is where the caller drains its inbox; it may adopt a key into
    /// `found`, which stops the scan, or return [`Poll::Stop`].
    ///
    /// An empty range is [`ScanOutcome::Exhausted`] right away.
    pub fn scan<P>(&self, range: Range, found: &FoundState, mut poll: P) -> (ScanOutcome, ScanStats)
    where
        P: FnMut() -> Poll,
    {
        if range.is_empty() {
            return (ScanOutcome::Exhausted, ScanStats::default());
        }

        let keys: BoundedQueue<KeyId> = BoundedQueue::new(self.config.queue_depth, 1);
        let candidates: BoundedQueue<Candidate> =
            BoundedQueue::new(self.config.queue_depth, self.config.transform_threads);

        thread::scope(|s| {
            let generator = s.spawn(|| generate(range, found, &keys));
            let transformers: Vec<_> = (0..self.config.transform_threads)
                .map(|_| s.spawn(|| transform(&self.probe, found, &keys, &candidates)))
                .collect();

            let mut stats = ScanStats::default();
            let outcome = loop {
                if poll() == Poll::Stop || found.is_set() {
                    break ScanOutcome::Cancelled;
                }
                let Some(candidate) = candidates.pop() else {
                    break if stats.verified == range.len() {
                        ScanOutcome::Exhausted
                    } else {
                        ScanOutcome::Cancelled
                    };
                };
                stats.verified += 1;
                if self.probe.verify(&candidate) {
                    let adoption = found.adopt(candidate.key);
                    #[cfg(feature = "tracing")]
                    tracing::debug!(key = candidate.key, ?adoption, "Verify matched");
                    break if adoption.is_adopted() {
                        ScanOutcome::Found(candidate.key)
                    } else {
                        ScanOutcome::Cancelled
                    };
                }
            };
            keys.cancel();
            candidates.cancel();

            stats.generated = join(generator);
            for handle in transformers {
                let (transformed, rejected) = join(handle);
                stats.transformed += transformed;
                stats.rejected += rejected;
            }

            #[cfg(feature = "tracing")]
            tracing::trace!(%range, ?outcome, ?stats, "Scan finished");
            (outcome, stats)
        })
    }
}

fn join<T>(handle: thread::ScopedJoinHandle<'_, T>) -> T {
    handle
        .join()
        .unwrap_or_else(|panic| std::panic::resume_unwind(panic))
}

/// Returns the number of keys pushed.
fn generate(range: Range, found: &FoundState, keys: &BoundedQueue<KeyId>) -> u64 {
    let mut generated = 0;
    for key in range.keys() {
        if found.is_set() || keys.push(key).is_err() {
            break;
        }
        generated += 1;
    }
    keys.close();
    generated
}

/// Returns `(transformed, rejected)`.
fn transform(
    probe: &Probe,
    found: &FoundState,
    keys: &BoundedQueue<KeyId>,
    candidates: &BoundedQueue<Candidate>,
) -> (u64, u64) {
    let (mut transformed, mut rejected) = (0, 0);
    while !found.is_set() {
        let Some(key) = keys.pop() else { break };
        let candidate = probe.transform(key);
        transformed += 1;
        if candidate.plaintext.is_none() {
            rejected += 1;
        }
        if candidates.push(candidate).is_err() {
            break;
        }
    }
    // Unblock the generator if this was the last consumer to leave early.
    if found.is_set() {
        keys.cancel();
    }
    candidates.close();
    (transformed, rejected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Codec, XorCipher};
    use bytes::Bytes;
    use std::sync::Arc;

    /// XOR over a zero block decrypts to the big-endian key itself.
    fn probe_for(target: KeyId) -> Probe {
        Probe::new(
            Codec::BigEndian,
            Arc::new(XorCipher),
            Bytes::from_static(&[0; 8]),
            Arc::new(move |text: &[u8]| text == target.to_be_bytes()),
        )
    }

    fn pipeline(target: KeyId, queue_depth: usize, transform_threads: usize) -> Pipeline {
        Pipeline::new(
            probe_for(target),
            PipelineConfig {
                queue_depth,
                transform_threads,
            },
        )
    }

    #[test]
    fn default_transform_threads_follow_the_core_count() {
        let config = PipelineConfig::default();
        assert_eq!(config.transform_threads, num_cpus::get());
        assert!(config.transform_threads >= 1);
    }

    #[test]
    fn finds_the_matching_key() {
        let found = FoundState::new();
        let (outcome, stats) =
            pipeline(577, 8, 3).scan(Range::new(0, 1000).unwrap(), &found, || Poll::Continue);
        assert_eq!(outcome, ScanOutcome::Found(577));
        assert_eq!(found.get(), Some(577));
        assert!(stats.verified >= 1);
    }

    #[test]
    fn exhausts_a_range_without_match() {
        let found = FoundState::new();
        let range = Range::new(100, 400).unwrap();
        let (outcome, stats) = pipeline(5, 4, 2).scan(range, &found, || Poll::Continue);
        assert_eq!(outcome, ScanOutcome::Exhausted);
        assert_eq!(stats.generated, 300);
        assert_eq!(stats.transformed, 300);
        assert_eq!(stats.verified, 300);
        assert_eq!(found.get(), None);
    }

    #[test]
    fn empty_range_is_immediately_exhausted() {
        let found = FoundState::new();
        let (outcome, stats) =
            pipeline(0, 4, 2).scan(Range::empty(), &found, || panic!("no polling"));
        assert_eq!(outcome, ScanOutcome::Exhausted);
        assert_eq!(stats, ScanStats::default());
    }

    #[test]
    fn boundary_keys_are_searched() {
        for target in [0, 63] {
            let found = FoundState::new();
            let (outcome, _) =
                pipeline(target, 2, 2).scan(Range::new(0, 64).unwrap(), &found, || Poll::Continue);
            assert_eq!(outcome, ScanOutcome::Found(target));
        }
    }

    #[test]
    fn stop_latency_is_bounded_by_queue_depth() {
        let depth = 16;
        let found = FoundState::new();
        let (outcome, stats) = pipeline(1_000, depth, 1).scan(
            Range::new(0, 10_000_000).unwrap(),
            &found,
            || Poll::Continue,
        );
        assert_eq!(outcome, ScanOutcome::Found(1_000));
        // Keys up to the match, plus both queues and one item in flight on
        // each side of the transform stage.
        let bound = 1_001 + 2 * depth as u64 + 2;
        assert!(stats.generated <= bound, "generated {}", stats.generated);
    }

    #[test]
    fn poll_stop_cancels_scan() {
        let found = FoundState::new();
        let mut polls = 0;
        let (outcome, stats) = pipeline(u64::MAX - 1, 4, 2).scan(
            Range::new(0, 1_000_000).unwrap(),
            &found,
            || {
                polls += 1;
                if polls > 10 { Poll::Stop } else { Poll::Continue }
            },
        );
        assert_eq!(outcome, ScanOutcome::Cancelled);
        assert_eq!(stats.verified, 10);
    }

    #[test]
    fn external_adoption_cancels_scan() {
        let found = FoundState::new();
        let mut polls = 0;
        let (outcome, _) = pipeline(900_000, 4, 2).scan(
            Range::new(0, 1_000_000).unwrap(),
            &found,
            || {
                polls += 1;
                if polls == 50 {
                    found.adopt(7);
                }
                Poll::Continue
            },
        );
        assert_eq!(outcome, ScanOutcome::Cancelled);
        assert_eq!(found.get(), Some(7));
    }

    #[test]
    fn weak_keys_count_as_rejected_not_errors() {
        let probe = Probe::new(
            Codec::BigEndian,
            crate::CipherKind::Des.build(),
            Bytes::from_static(&[0; 8]),
            Arc::new(|_: &[u8]| false),
        );
        let pipeline = Pipeline::new(probe, PipelineConfig::default());
        let found = FoundState::new();
        let (outcome, stats) = pipeline.scan(Range::new(0, 2).unwrap(), &found, || Poll::Continue);
        assert_eq!(outcome, ScanOutcome::Exhausted);
        // Keys 0 and 1 both map to the all-0x01 weak key.
        assert_eq!(stats.rejected, 2);
    }
}
