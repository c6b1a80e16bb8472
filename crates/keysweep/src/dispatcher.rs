//! The dispatcher state machine.
//!
//! The dispatcher owns the backlog of unassigned ranges and is its only
//! writer. It is transport agnostic: [`Dispatcher::handle`] consumes one
//! inbound message and returns the messages to deliver, so every caller
//! serializes request handling by construction.
//!
//! ```text
//! SERVING ──backlog empty──▶ DRAINED ──all workers idle──▶ DONE (exhausted)
//!    │                          │
//!    └────────── found ─────────┴──────────────────────────▶ DONE (found)
//! ```

use crate::{Error, KeyId, Range, Result, ToDispatcher, ToWorker, WorkerId, WorkerSummary};
use core::cmp::Ordering;
use std::collections::{BTreeMap, BinaryHeap};

/// Lifecycle of the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherState {
    /// The backlog still holds ranges.
    Serving,
    /// The backlog is empty. Work requests get the "no more work" reply.
    Drained,
    /// A verdict exists. Only terminal messages are relayed.
    Done,
}

/// The final result of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Found(KeyId),
    Exhausted,
}

impl Verdict {
    pub const fn key(&self) -> Option<KeyId> {
        match self {
            Self::Found(key) => Some(*key),
            Self::Exhausted => None,
        }
    }

    const fn announcement(&self) -> ToWorker {
        match self {
            Self::Found(key) => ToWorker::Found { key: *key },
            Self::Exhausted => ToWorker::Exhausted,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatcherConfig {
    /// Workers that must join before exhaustion can be declared.
    pub expected_workers: usize,
    /// Ranges handed to each worker in its seed.
    pub seed_ranges: usize,
    /// Longest range handed out at once. Longer backlog entries are split
    /// and their tail goes back into the backlog.
    pub max_grant: Option<u64>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            expected_workers: 1,
            seed_ranges: 1,
            max_grant: None,
        }
    }
}

/// A message for one worker.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub to: WorkerId,
    pub msg: ToWorker,
}

impl Envelope {
    const fn new(to: WorkerId, msg: ToWorker) -> Self {
        Self { to, msg }
    }
}

/// Backlog entry, max-heap ordered by [`Range::schedule_cmp`].
#[derive(Debug)]
struct Queued(Range);

impl PartialEq for Queued {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Queued {}

impl PartialOrd for Queued {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Queued {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.schedule_cmp(&other.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PeerStatus {
    /// Holds work, or is about to ask for it.
    Active,
    /// Got the "no more work" reply.
    Idle,
    /// Sent `Finished`.
    Finished,
    /// Went away after finishing.
    Gone,
}

#[derive(Debug)]
struct Peer {
    status: PeerStatus,
    /// Last terminal announcement this worker is known to have observed.
    notified: Option<Verdict>,
    summary: Option<WorkerSummary>,
}

impl Peer {
    const fn finished(&self) -> bool {
        matches!(self.status, PeerStatus::Finished | PeerStatus::Gone)
    }
}

/// Serves ranges to workers and decides the verdict.
#[derive(Debug)]
pub struct Dispatcher {
    config: DispatcherConfig,
    backlog: BinaryHeap<Queued>,
    peers: BTreeMap<WorkerId, Peer>,
    verdict: Option<Verdict>,
    history: Vec<DispatcherState>,
}

impl Dispatcher {
    /// Creates a dispatcher owning `backlog`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `expected_workers` is zero.
    pub fn new(backlog: impl IntoIterator<Item = Range>, config: DispatcherConfig) -> Result<Self> {
        if config.expected_workers == 0 {
            return Err(Error::invalid("at least one worker is required"));
        }
        let backlog: BinaryHeap<_> = backlog
            .into_iter()
            .filter(|range| !range.is_empty())
            .map(Queued)
            .collect();
        let initial = if backlog.is_empty() {
            DispatcherState::Drained
        } else {
            DispatcherState::Serving
        };
        Ok(Self {
            config,
            backlog,
            peers: BTreeMap::new(),
            verdict: None,
            history: vec![initial],
        })
    }

    pub fn state(&self) -> DispatcherState {
        self.history
            .last()
            .copied()
            .unwrap_or(DispatcherState::Serving)
    }

    /// Every state entered so far, oldest first.
    pub fn history(&self) -> &[DispatcherState] {
        &self.history
    }

    pub const fn verdict(&self) -> Option<Verdict> {
        self.verdict
    }

    pub fn backlog_len(&self) -> usize {
        self.backlog.len()
    }

    pub const fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    pub fn joined(&self) -> usize {
        self.peers.len()
    }

    /// Summaries of the workers that finished, by worker id.
    pub fn summaries(&self) -> impl Iterator<Item = (WorkerId, &WorkerSummary)> {
        self.peers
            .iter()
            .filter_map(|(id, peer)| peer.summary.as_ref().map(|s| (*id, s)))
    }

    /// A verdict exists, every expected worker joined and all of them sent
    /// `Finished`.
    pub fn is_complete(&self) -> bool {
        self.verdict.is_some()
            && self.peers.len() == self.config.expected_workers
            && self.peers.values().all(Peer::finished)
    }

    /// Handles one inbound message.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ProtocolViolation`] for a duplicate join, a join past
    /// the expected worker count, a message from a worker that never joined,
    /// a `Finished` before any verdict, or a found key after exhaustion was
    /// declared.
    pub fn handle(&mut self, msg: ToDispatcher) -> Result<Vec<Envelope>> {
        #[cfg(feature = "tracing")]
        tracing::trace!(?msg, state = ?self.state(), "Dispatcher inbound");

        match msg {
            ToDispatcher::Join { worker } => self.on_join(worker),
            ToDispatcher::WorkRequest { from_worker } => self.on_work_request(from_worker),
            ToDispatcher::Found { from_worker, key } => self.on_found(from_worker, key),
            ToDispatcher::Finished { worker, summary } => self.on_finished(worker, summary),
        }
    }

    /// Records that the connection to `worker` is gone.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CommunicationFailure`] if the worker joined but had
    /// not sent `Finished`, since its ranges can no longer be accounted for.
    pub fn disconnect(&mut self, worker: WorkerId) -> Result<()> {
        let Some(peer) = self.peers.get_mut(&worker) else {
            return Ok(());
        };
        if !peer.finished() {
            return Err(Error::comms(format!(
                "worker {worker} disconnected before finishing"
            )));
        }
        peer.status = PeerStatus::Gone;
        Ok(())
    }

    fn on_join(&mut self, worker: WorkerId) -> Result<Vec<Envelope>> {
        if self.peers.contains_key(&worker) {
            return Err(Error::protocol(format!("worker {worker} joined twice")));
        }
        if self.peers.len() >= self.config.expected_workers {
            return Err(Error::protocol(format!(
                "worker {worker} joined past the expected {} workers",
                self.config.expected_workers
            )));
        }
        self.peers.insert(
            worker,
            Peer {
                status: PeerStatus::Active,
                notified: None,
                summary: None,
            },
        );

        let mut out = Vec::with_capacity(2);
        if let Some(verdict) = self.verdict {
            out.push(Envelope::new(worker, ToWorker::Seed { ranges: Vec::new() }));
            out.extend(self.notify(worker, verdict));
            return Ok(out);
        }

        let ranges: Vec<_> = (0..self.config.seed_ranges)
            .map_while(|_| self.grant())
            .collect();
        #[cfg(feature = "tracing")]
        tracing::debug!(worker, seeded = ranges.len(), "Worker joined");
        out.push(Envelope::new(worker, ToWorker::Seed { ranges }));
        Ok(out)
    }

    fn on_work_request(&mut self, worker: WorkerId) -> Result<Vec<Envelope>> {
        self.known(worker)?;
        if let Some(verdict) = self.verdict {
            return Ok(self.notify(worker, verdict).into_iter().collect());
        }

        if let Some(range) = self.grant() {
            #[cfg(feature = "tracing")]
            tracing::debug!(worker, %range, "Granted range");
            self.set_status(worker, PeerStatus::Active);
            return Ok(vec![Envelope::new(worker, ToWorker::WorkReply { range })]);
        }

        self.set_status(worker, PeerStatus::Idle);
        let mut out = vec![Envelope::new(worker, ToWorker::no_more_work())];
        out.extend(self.check_exhausted());
        Ok(out)
    }

    fn on_found(&mut self, worker: WorkerId, key: KeyId) -> Result<Vec<Envelope>> {
        self.known(worker)?;
        let best = match self.verdict {
            Some(Verdict::Exhausted) => {
                return Err(Error::protocol(format!(
                    "worker {worker} found {key} after exhaustion was declared"
                )));
            }
            Some(Verdict::Found(current)) => current.min(key),
            None => key,
        };
        let verdict = Verdict::Found(best);
        if self.verdict != Some(verdict) {
            #[cfg(feature = "tracing")]
            tracing::info!(worker, key = best, "Key found");
            self.verdict = Some(verdict);
        }
        self.enter(DispatcherState::Done);

        // The sender already knows its own key.
        if best == key {
            if let Some(peer) = self.peers.get_mut(&worker) {
                peer.notified = Some(verdict);
            }
        }
        Ok(self.broadcast(verdict))
    }

    fn on_finished(&mut self, worker: WorkerId, summary: WorkerSummary) -> Result<Vec<Envelope>> {
        self.known(worker)?;
        if self.verdict.is_none() {
            return Err(Error::protocol(format!(
                "worker {worker} finished before the run terminated"
            )));
        }
        if let Some(peer) = self.peers.get_mut(&worker) {
            peer.status = PeerStatus::Finished;
            peer.summary = Some(summary);
        }
        #[cfg(feature = "tracing")]
        tracing::debug!(worker, ?summary, "Worker finished");
        Ok(Vec::new())
    }

    /// Pops the next range to hand out, splitting it to `max_grant`.
    fn grant(&mut self) -> Option<Range> {
        let Queued(range) = self.backlog.pop()?;
        let head = match self.config.max_grant {
            Some(max) => {
                let (head, tail) = range.split_front(max);
                if let Some(tail) = tail {
                    self.backlog.push(Queued(tail));
                }
                head
            }
            None => range,
        };
        if self.backlog.is_empty() {
            self.enter(DispatcherState::Drained);
        }
        Some(head)
    }

    fn check_exhausted(&mut self) -> Vec<Envelope> {
        let all_idle = self.peers.len() == self.config.expected_workers
            && self
                .peers
                .values()
                .all(|peer| peer.status == PeerStatus::Idle);
        if self.state() != DispatcherState::Drained || !all_idle {
            return Vec::new();
        }
        #[cfg(feature = "tracing")]
        tracing::info!("Key space exhausted without a match");
        self.verdict = Some(Verdict::Exhausted);
        self.enter(DispatcherState::Done);
        self.broadcast(Verdict::Exhausted)
    }

    /// Announces `verdict` to every worker that has not observed it.
    fn broadcast(&mut self, verdict: Verdict) -> Vec<Envelope> {
        let ids: Vec<_> = self.peers.keys().copied().collect();
        ids.into_iter()
            .filter_map(|id| self.notify(id, verdict))
            .collect()
    }

    fn notify(&mut self, worker: WorkerId, verdict: Verdict) -> Option<Envelope> {
        let peer = self.peers.get_mut(&worker)?;
        if peer.finished() || peer.notified == Some(verdict) {
            return None;
        }
        peer.notified = Some(verdict);
        Some(Envelope::new(worker, verdict.announcement()))
    }

    fn known(&self, worker: WorkerId) -> Result<()> {
        if self.peers.contains_key(&worker) {
            Ok(())
        } else {
            Err(Error::protocol(format!("message from unknown worker {worker}")))
        }
    }

    fn set_status(&mut self, worker: WorkerId, status: PeerStatus) {
        if let Some(peer) = self.peers.get_mut(&worker) {
            peer.status = status;
        }
    }

    fn enter(&mut self, state: DispatcherState) {
        if self.state() == state || self.state() == DispatcherState::Done {
            return;
        }
        #[cfg(feature = "tracing")]
        tracing::debug!(from = ?self.state(), to = ?state, "Dispatcher transition");
        self.history.push(state);
    }
}
