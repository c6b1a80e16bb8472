//! An in-process cluster: one dispatcher thread and one thread per worker
//! engine, sharing nothing but channel messages.
//!
//! Each worker owns its own [`FoundState`](crate::FoundState) replica and its
//! own pipeline threads. Found announcements travel to the dispatcher and
//! directly to every peer, so replicas converge the same way they do across
//! processes.

use crate::{
    Dispatcher, DispatcherConfig, DispatcherState, EngineConfig, Error, Link, Pipeline,
    PipelineConfig, PriorityPolicy, Probe, Range, Result, ToDispatcher, ToWorker, Verdict,
    WorkerEngine, WorkerId, WorkerReport, partition,
};
use core::time::Duration;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, unbounded};
use std::thread;

/// What the dispatcher thread receives.
#[derive(Debug)]
enum Inbound {
    Message(ToDispatcher),
    /// The worker's thread returned, successfully or not.
    Disconnected(WorkerId),
}

/// A worker's [`Link`] inside a [`LocalCluster`].
pub struct LocalLink {
    worker: WorkerId,
    dispatcher: Sender<Inbound>,
    peers: Vec<Sender<ToWorker>>,
    inbox: Receiver<ToWorker>,
}

impl LocalLink {
    fn closed(&self) -> Error {
        Error::comms(format!("worker {}: dispatcher channel closed", self.worker))
    }
}

impl Link for LocalLink {
    fn send(&mut self, msg: ToDispatcher) -> Result<()> {
        let peer_msg = match msg {
            ToDispatcher::Found { key, .. } => Some(ToWorker::Found { key }),
            _ => None,
        };
        self.dispatcher
            .send(Inbound::Message(msg))
            .map_err(|_| self.closed())?;
        if let Some(peer_msg) = peer_msg {
            for peer in &self.peers {
                // A finished peer has dropped its inbox.
                let _ = peer.send(peer_msg.clone());
            }
        }
        Ok(())
    }

    fn try_recv(&mut self) -> Result<Option<ToWorker>> {
        match self.inbox.try_recv() {
            Ok(msg) => Ok(Some(msg)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(self.closed()),
        }
    }

    fn recv_timeout(&mut self, timeout: Duration) -> Result<Option<ToWorker>> {
        match self.inbox.recv_timeout(timeout) {
            Ok(msg) => Ok(Some(msg)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(self.closed()),
        }
    }

    fn recv(&mut self) -> Result<ToWorker> {
        self.inbox.recv().map_err(|_| self.closed())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClusterConfig {
    pub workers: usize,
    /// Ranges the key space is partitioned into.
    pub ranges: usize,
    pub priority: PriorityPolicy,
    pub seed_ranges: usize,
    pub max_grant: Option<u64>,
    pub pipeline: PipelineConfig,
    pub engine: EngineConfig,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            ranges: 10,
            priority: PriorityPolicy::Uniform,
            seed_ranges: 1,
            max_grant: None,
            pipeline: PipelineConfig::default(),
            engine: EngineConfig::default(),
        }
    }
}

/// The result of a [`LocalCluster`] run.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterOutcome {
    pub verdict: Verdict,
    /// Dispatcher states in the order they were entered.
    pub history: Vec<DispatcherState>,
    /// One report per worker, by worker id.
    pub workers: Vec<WorkerReport>,
}

/// Runs a whole search inside this process.
#[derive(Debug)]
pub struct LocalCluster {
    probe: Probe,
    full: Range,
    config: ClusterConfig,
}

impl LocalCluster {
    pub fn new(probe: Probe, full: Range, config: ClusterConfig) -> Self {
        Self {
            probe,
            full,
            config,
        }
    }

    /// Partitions the key space, runs the dispatcher and every worker to
    /// completion and returns the verdict.
    ///
    /// # Errors
    ///
    /// Returns the first fatal error of the dispatcher or any worker. The
    /// dispatcher aborts every worker when it fails.
    pub fn run(&self) -> Result<ClusterOutcome> {
        let workers = self.config.workers;
        let ranges = partition(
            self.full,
            self.config.ranges.max(workers),
            self.config.priority,
        )?;
        let mut dispatcher = Dispatcher::new(
            ranges,
            DispatcherConfig {
                expected_workers: workers,
                seed_ranges: self.config.seed_ranges,
                max_grant: self.config.max_grant,
            },
        )?;

        let (to_dispatcher, inbound) = unbounded();
        let (outboxes, inboxes): (Vec<_>, Vec<_>) = (0..workers).map(|_| unbounded()).unzip();

        #[cfg(feature = "tracing")]
        tracing::info!(workers, full = %self.full, "Starting local cluster");

        thread::scope(|s| {
            let handles: Vec<_> = inboxes
                .into_iter()
                .enumerate()
                .map(|(idx, inbox)| {
                    let id = idx as WorkerId;
                    let link = LocalLink {
                        worker: id,
                        dispatcher: to_dispatcher.clone(),
                        peers: outboxes
                            .iter()
                            .enumerate()
                            .filter(|(peer, _)| *peer != idx)
                            .map(|(_, tx)| tx.clone())
                            .collect(),
                        inbox,
                    };
                    let pipeline = Pipeline::new(self.probe.clone(), self.config.pipeline);
                    let engine_config = self.config.engine;
                    let notify = to_dispatcher.clone();
                    s.spawn(move || {
                        let mut engine = WorkerEngine::new(id, link, pipeline, engine_config);
                        let report = engine.run();
                        drop(engine);
                        let _ = notify.send(Inbound::Disconnected(id));
                        report
                    })
                })
                .collect();
            drop(to_dispatcher);

            let served = serve(&mut dispatcher, &inbound, &outboxes);
            drop(outboxes);

            let mut reports = Vec::with_capacity(workers);
            let mut failure = served.err();
            for handle in handles {
                match handle.join() {
                    Ok(Ok(report)) => reports.push(report),
                    Ok(Err(err)) => {
                        failure.get_or_insert(err);
                    }
                    Err(panic) => std::panic::resume_unwind(panic),
                }
            }
            if let Some(err) = failure {
                return Err(err);
            }

            let verdict = dispatcher
                .verdict()
                .ok_or_else(|| Error::comms("run ended without a verdict"))?;
            Ok(ClusterOutcome {
                verdict,
                history: dispatcher.history().to_vec(),
                workers: reports,
            })
        })
    }
}

/// Runs the dispatcher loop, aborting every worker if it fails.
fn serve(
    dispatcher: &mut Dispatcher,
    inbound: &Receiver<Inbound>,
    outboxes: &[Sender<ToWorker>],
) -> Result<()> {
    let result = pump(dispatcher, inbound, outboxes);
    if let Err(err) = &result {
        #[cfg(feature = "tracing")]
        tracing::error!(%err, "Dispatcher failed, aborting workers");
        for outbox in outboxes {
            let _ = outbox.send(ToWorker::Abort {
                reason: err.to_string(),
            });
        }
    }
    result
}

/// One message at a time until the run is complete.
fn pump(
    dispatcher: &mut Dispatcher,
    inbound: &Receiver<Inbound>,
    outboxes: &[Sender<ToWorker>],
) -> Result<()> {
    while !dispatcher.is_complete() {
        let envelopes = match inbound.recv() {
            Ok(Inbound::Message(msg)) => dispatcher.handle(msg)?,
            Ok(Inbound::Disconnected(worker)) => {
                dispatcher.disconnect(worker)?;
                continue;
            }
            Err(_) => return Err(Error::comms("every worker hung up")),
        };
        for envelope in envelopes {
            let outbox = outboxes
                .get(envelope.to as usize)
                .ok_or_else(|| Error::protocol(format!("no worker {}", envelope.to)))?;
            // A finished worker has dropped its inbox.
            let _ = outbox.send(envelope.msg);
        }
    }
    Ok(())
}
