//! The per-worker driver.
//!
//! A [`WorkerEngine`] joins the run, scans its seed ranges through its
//! [`Pipeline`], asks the dispatcher for more work whenever the local queue
//! runs dry and stops on the first terminal announcement. The inbox is
//! checked once per range and once per pipeline output, so a found key from
//! elsewhere stops the engine after at most one queue depth of extra work.

use crate::{
    Error, FoundState, KeyId, Link, Pipeline, Poll, Range, Result, ScanOutcome, ScanStats,
    ToDispatcher, ToWorker, WorkerId, WorkerSummary,
};
use core::time::Duration;
use std::collections::VecDeque;
use std::time::Instant;

/// Where a worker engine is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Sent `Join`, waiting for the seed.
    Joining,
    /// Running the pipeline over a local range.
    Scanning,
    /// Sent a work request, waiting for the reply.
    AwaitingWork,
    /// Told there is no more work. Only terminal messages are expected.
    Idle,
    Done,
}

/// How the run ended, as seen by one worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Found(KeyId),
    Exhausted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// How long to wait for the seed or for a work reply before giving up
    /// on the dispatcher.
    pub reply_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            reply_timeout: Duration::from_secs(30),
        }
    }
}

/// What a worker engine returns once done.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerReport {
    pub worker: WorkerId,
    pub termination: Termination,
    /// Whether this worker's own pipeline produced the key.
    pub found_locally: bool,
    pub summary: WorkerSummary,
    pub stats: ScanStats,
}

/// Messages absorbed but not acted on yet.
#[derive(Debug, Default)]
struct Inbox {
    local: VecDeque<Range>,
    seeded: bool,
    reply: Option<Range>,
    exhausted: bool,
    aborted: Option<String>,
}

impl Inbox {
    fn absorb(&mut self, found: &FoundState, msg: ToWorker) {
        match msg {
            ToWorker::Seed { ranges } => {
                self.local
                    .extend(ranges.into_iter().filter(|range| !range.is_empty()));
                self.seeded = true;
            }
            ToWorker::WorkReply { range } => self.reply = Some(range),
            ToWorker::Found { key } => {
                let _adoption = found.adopt(key);
                #[cfg(feature = "tracing")]
                tracing::debug!(key, adoption = ?_adoption, "Found announcement");
            }
            ToWorker::Exhausted => self.exhausted = true,
            ToWorker::Abort { reason } => self.aborted = Some(reason),
        }
    }

    /// Whether the run is over for this worker.
    fn terminal(&self, found: &FoundState) -> bool {
        found.is_set() || self.exhausted || self.aborted.is_some()
    }

    fn drain<L: Link>(&mut self, link: &mut L, found: &FoundState) -> Result<()> {
        while let Some(msg) = link.try_recv()? {
            self.absorb(found, msg);
        }
        Ok(())
    }
}

/// Drives one worker's share of the search.
pub struct WorkerEngine<L> {
    id: WorkerId,
    link: L,
    pipeline: Pipeline,
    config: EngineConfig,
    found: FoundState,
    inbox: Inbox,
    state: EngineState,
    stats: ScanStats,
    ranges_scanned: u64,
    found_locally: bool,
}

impl<L: Link> WorkerEngine<L> {
    pub fn new(id: WorkerId, link: L, pipeline: Pipeline, config: EngineConfig) -> Self {
        Self {
            id,
            link,
            pipeline,
            config,
            found: FoundState::new(),
            inbox: Inbox::default(),
            state: EngineState::Joining,
            stats: ScanStats::default(),
            ranges_scanned: 0,
            found_locally: false,
        }
    }

    pub const fn id(&self) -> WorkerId {
        self.id
    }

    pub const fn state(&self) -> EngineState {
        self.state
    }

    /// This worker's replica of the found-state.
    pub const fn found(&self) -> &FoundState {
        &self.found
    }

    /// Runs the engine to completion.
    ///
    /// # Errors
    ///
    /// - [`Error::CommunicationFailure`] if the link fails or the dispatcher
    ///   does not answer within the reply timeout.
    /// - [`Error::Aborted`] if the coordinating process aborted the run.
    pub fn run(&mut self) -> Result<WorkerReport> {
        self.link.send(ToDispatcher::Join { worker: self.id })?;
        self.await_reply(|inbox| inbox.seeded)?;

        while !self.inbox.terminal(&self.found) {
            if let Some(range) = self.inbox.local.pop_front() {
                self.enter(EngineState::Scanning);
                if let ScanOutcome::Found(key) = self.scan(range)? {
                    self.found_locally = true;
                    self.link.send(ToDispatcher::Found {
                        from_worker: self.id,
                        key,
                    })?;
                    break;
                }
                self.inbox.drain(&mut self.link, &self.found)?;
                continue;
            }

            self.enter(EngineState::AwaitingWork);
            self.inbox.reply = None;
            self.link.send(ToDispatcher::WorkRequest {
                from_worker: self.id,
            })?;
            self.await_reply(|inbox| inbox.reply.is_some())?;
            match self.inbox.reply.take() {
                Some(range) if !range.is_empty() => self.inbox.local.push_back(range),
                Some(_) => self.idle()?,
                None => {}
            }
        }

        if let Some(reason) = self.inbox.aborted.take() {
            return Err(Error::Aborted { reason });
        }
        self.finish()
    }

    fn scan(&mut self, range: Range) -> Result<ScanOutcome> {
        let Self {
            link,
            pipeline,
            found,
            inbox,
            ..
        } = self;
        let mut failure = None;
        let (outcome, stats) = pipeline.scan(range, found, || {
            if let Err(err) = inbox.drain(link, found) {
                failure = Some(err);
                return Poll::Stop;
            }
            if inbox.exhausted || inbox.aborted.is_some() {
                Poll::Stop
            } else {
                Poll::Continue
            }
        });
        self.stats += stats;
        if let Some(err) = failure {
            return Err(err);
        }
        if outcome == ScanOutcome::Exhausted {
            self.ranges_scanned += 1;
        }
        #[cfg(feature = "tracing")]
        tracing::debug!(worker = self.id, %range, ?outcome, "Range scanned");
        Ok(outcome)
    }

    /// Blocks until `done` holds, the run is over, or the reply timeout
    /// expires.
    fn await_reply(&mut self, done: impl Fn(&Inbox) -> bool) -> Result<()> {
        let deadline = Instant::now() + self.config.reply_timeout;
        while !done(&self.inbox) && !self.inbox.terminal(&self.found) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(Error::comms(format!(
                    "worker {}: no reply from the dispatcher within {:?}",
                    self.id, self.config.reply_timeout
                )));
            }
            if let Some(msg) = self.link.recv_timeout(remaining)? {
                self.inbox.absorb(&self.found, msg);
            }
        }
        Ok(())
    }

    /// Waits without polling for the terminal announcement.
    fn idle(&mut self) -> Result<()> {
        self.enter(EngineState::Idle);
        while !self.inbox.terminal(&self.found) && self.inbox.local.is_empty() {
            let msg = self.link.recv()?;
            self.inbox.absorb(&self.found, msg);
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<WorkerReport> {
        self.enter(EngineState::Done);
        let termination = match self.found.get() {
            Some(key) => Termination::Found(key),
            None => Termination::Exhausted,
        };
        let summary = WorkerSummary {
            ranges_scanned: self.ranges_scanned,
            keys_verified: self.stats.verified,
            keys_rejected: self.stats.rejected,
        };
        self.link.send(ToDispatcher::Finished {
            worker: self.id,
            summary,
        })?;
        self.link.close()?;
        Ok(WorkerReport {
            worker: self.id,
            termination,
            found_locally: self.found_locally,
            summary,
            stats: self.stats,
        })
    }

    fn enter(&mut self, state: EngineState) {
        if self.state != state {
            #[cfg(feature = "tracing")]
            tracing::trace!(worker = self.id, from = ?self.state, to = ?state, "Engine transition");
            self.state = state;
        }
    }
}
