//! The TCP dispatcher service.
//!
//! One task per connection moves frames between its socket and the service
//! loop. The loop owns the [`Dispatcher`], so requests are handled strictly
//! one at a time, and routes every reply to the connection's outbox.

use super::config::DispatchConfig;
use core::future::Future;
use futures::{SinkExt, StreamExt};
use keysweep::{
    Dispatcher, DispatcherConfig, DispatcherState, Envelope, Error, Job, Result, ToDispatcher,
    Verdict, WorkerId, WorkerSummary, partition,
};
use keysweep_wire::{Frame, FrameCodec, frame::Body};
use std::{collections::HashMap, io, sync::Arc};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::mpsc::{self, UnboundedReceiver, UnboundedSender},
    task::JoinSet,
    time::{Duration, Instant, sleep_until},
};
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::codec::Framed;

/// How long connections get to flush their last frames once the run ends.
const DRAIN_GRACE: Duration = Duration::from_secs(1);

/// What a finished run looked like from the dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceOutcome {
    pub verdict: Verdict,
    pub history: Vec<DispatcherState>,
    /// Summaries of the workers that sent `Finished`, by worker id.
    pub summaries: Vec<(WorkerId, WorkerSummary)>,
}

/// Sent from connection tasks to the service loop.
#[derive(Debug)]
enum Event {
    /// The handshake went out; frames for `worker` go to `outbox`.
    Connected {
        worker: WorkerId,
        outbox: UnboundedSender<Frame>,
    },
    Message(ToDispatcher),
    Failed {
        worker: WorkerId,
        error: Error,
    },
    Disconnected(WorkerId),
}

/// Serves `job` to workers connecting on `listener` until the run completes.
///
/// The run ends once a verdict exists and every worker sent `Finished`, or
/// `finish_timeout` after the verdict, whichever comes first.
///
/// # Errors
///
/// Every connected worker is sent an abort, and the error returned, when the
/// dispatcher fails, a worker drops out before a verdict, `shutdown`
/// resolves, or fewer than the expected workers join within `join_timeout`.
pub async fn serve<F>(
    listener: TcpListener,
    job: Job,
    config: &DispatchConfig,
    shutdown: F,
) -> Result<ServiceOutcome>
where
    F: Future<Output = ()>,
{
    let ranges = partition(
        job.full_range(),
        config.search.range_count(config.num_workers),
        config.search.priority,
    )?;
    let dispatcher = Dispatcher::new(
        ranges,
        DispatcherConfig {
            expected_workers: config.num_workers,
            seed_ranges: config.search.seed_ranges,
            max_grant: config.search.max_grant,
        },
    )?;
    #[cfg(feature = "tracing")]
    tracing::info!(
        ranges = dispatcher.backlog_len(),
        workers = config.num_workers,
        "Key space partitioned"
    );

    let mut service = Service::new(dispatcher, job);
    let result = service.run(listener, config, shutdown).await;
    if let Err(err) = &result {
        #[cfg(feature = "tracing")]
        tracing::error!(%err, "Run failed, aborting workers");
        service.abort_all(&err.to_string());
    }
    service.drain().await;
    result
}

struct Service {
    dispatcher: Dispatcher,
    job: Arc<Job>,
    outboxes: HashMap<WorkerId, UnboundedSender<Frame>>,
    connections: JoinSet<()>,
    events_tx: UnboundedSender<Event>,
    events_rx: UnboundedReceiver<Event>,
    next_worker: WorkerId,
}

impl Service {
    fn new(dispatcher: Dispatcher, job: Job) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            dispatcher,
            job: Arc::new(job),
            outboxes: HashMap::new(),
            connections: JoinSet::new(),
            events_tx,
            events_rx,
            next_worker: 0,
        }
    }

    async fn run<F>(
        &mut self,
        listener: TcpListener,
        config: &DispatchConfig,
        shutdown: F,
    ) -> Result<ServiceOutcome>
    where
        F: Future<Output = ()>,
    {
        let expected = config.num_workers;
        let mut incoming = TcpListenerStream::new(listener);
        tokio::pin!(shutdown);
        let join_deadline = Instant::now() + config.join_timeout;
        let mut finish_deadline = None;

        while !self.dispatcher.is_complete() {
            if finish_deadline.is_none() && self.dispatcher.verdict().is_some() {
                finish_deadline = Some(Instant::now() + config.finish_timeout);
            }
            let joining = finish_deadline.is_none() && self.dispatcher.joined() < expected;

            tokio::select! {
                () = &mut shutdown => {
                    return Err(Error::Aborted {
                        reason: "dispatcher interrupted".to_string(),
                    });
                }
                () = sleep_until(join_deadline), if joining => {
                    return Err(Error::CommunicationFailure {
                        context: format!(
                            "only {} of {} workers joined within {:?}",
                            self.dispatcher.joined(),
                            expected,
                            config.join_timeout
                        ),
                    });
                }
                () = sleep_until(finish_deadline.unwrap_or(join_deadline)), if finish_deadline.is_some() => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(
                        finished = self.dispatcher.summaries().count(),
                        expected,
                        "Not every worker finished in time"
                    );
                    break;
                }
                accepted = incoming.next() => self.accept(accepted, expected),
                Some(event) = self.events_rx.recv() => self.on_event(event)?,
            }
        }

        let verdict = self
            .dispatcher
            .verdict()
            .ok_or_else(|| Error::CommunicationFailure {
                context: "run ended without a verdict".to_string(),
            })?;
        Ok(ServiceOutcome {
            verdict,
            history: self.dispatcher.history().to_vec(),
            summaries: self
                .dispatcher
                .summaries()
                .map(|(worker, summary)| (worker, *summary))
                .collect(),
        })
    }

    fn accept(&mut self, accepted: Option<io::Result<TcpStream>>, expected: usize) {
        let stream = match accepted {
            Some(Ok(stream)) => stream,
            Some(Err(_e)) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(error = %_e, "Failed to accept connection");
                return;
            }
            None => return,
        };
        let worker = self.next_worker;
        self.next_worker = self.next_worker.saturating_add(1);

        if worker as usize >= expected {
            #[cfg(feature = "tracing")]
            tracing::warn!(peer = ?stream.peer_addr().ok(), "Rejecting connection, all workers assigned");
            self.connections.spawn(reject(stream, expected));
            return;
        }

        #[cfg(feature = "tracing")]
        tracing::info!(worker, peer = ?stream.peer_addr().ok(), "Worker connected");
        self.connections.spawn(connection(
            worker,
            stream,
            Arc::clone(&self.job),
            self.events_tx.clone(),
        ));
    }

    fn on_event(&mut self, event: Event) -> Result<()> {
        match event {
            Event::Connected { worker, outbox } => {
                self.outboxes.insert(worker, outbox);
            }
            Event::Message(msg) => {
                let envelopes = self.dispatcher.handle(msg)?;
                self.route(envelopes);
            }
            Event::Failed {
                error: error @ Error::ProtocolViolation { .. },
                ..
            } => return Err(error),
            Event::Failed { worker, error: _e } => {
                #[cfg(feature = "tracing")]
                tracing::warn!(worker, error = %_e, "Worker connection failed");
                self.remove(worker)?;
            }
            Event::Disconnected(worker) => self.remove(worker)?,
        }
        Ok(())
    }

    /// Forgets a worker whose connection ended. Fatal while the result is
    /// still open and the worker had ranges in flight.
    fn remove(&mut self, worker: WorkerId) -> Result<()> {
        self.outboxes.remove(&worker);
        match self.dispatcher.disconnect(worker) {
            Ok(()) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(worker, "Worker disconnected");
                Ok(())
            }
            Err(err) if self.dispatcher.verdict().is_none() => Err(err),
            Err(_err) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(worker, err = %_err, "Worker left after the verdict without finishing");
                Ok(())
            }
        }
    }

    fn route(&self, envelopes: Vec<Envelope>) {
        for Envelope { to, msg } in envelopes {
            match self.outboxes.get(&to) {
                Some(outbox) => {
                    // A closing connection has dropped its receiver.
                    let _ = outbox.send(Frame::from(msg));
                }
                None => {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(worker = to, ?msg, "Dropping message for departed worker");
                }
            }
        }
    }

    fn abort_all(&self, reason: &str) {
        for outbox in self.outboxes.values() {
            let _ = outbox.send(Frame::abort(reason));
        }
    }

    /// Closes every outbox and gives connections a moment to flush.
    async fn drain(&mut self) {
        self.outboxes.clear();
        let connections = &mut self.connections;
        let drained = tokio::time::timeout(DRAIN_GRACE, async {
            while connections.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            #[cfg(feature = "tracing")]
            tracing::debug!(
                remaining = self.connections.len(),
                "Dropping connections that did not close in time"
            );
            self.connections.abort_all();
        }
    }
}

/// Moves frames between one worker's socket and the service loop.
async fn connection(
    worker: WorkerId,
    stream: TcpStream,
    job: Arc<Job>,
    events: UnboundedSender<Event>,
) {
    let _ = stream.set_nodelay(true);
    let mut framed = Framed::new(stream, FrameCodec::new());
    if let Err(e) = framed.send(Frame::hello(worker, &job)).await {
        let _ = events.send(Event::Failed {
            worker,
            error: e.into(),
        });
        return;
    }

    let (outbox, mut frames) = mpsc::unbounded_channel();
    if events.send(Event::Connected { worker, outbox }).is_err() {
        return;
    }

    let last = loop {
        tokio::select! {
            frame = frames.recv() => {
                // The service is done with this worker.
                let Some(frame) = frame else { return };
                let abort = matches!(frame.body, Some(Body::Abort(_)));
                if let Err(e) = framed.send(frame).await {
                    break Event::Failed { worker, error: e.into() };
                }
                if abort {
                    return;
                }
            }
            incoming = framed.next() => match incoming {
                Some(Ok(frame)) => match ToDispatcher::try_from(frame) {
                    Ok(msg) if msg.sender() == worker => {
                        if events.send(Event::Message(msg)).is_err() {
                            return;
                        }
                    }
                    Ok(msg) => {
                        break Event::Failed {
                            worker,
                            error: Error::ProtocolViolation {
                                context: format!(
                                    "connection of worker {worker} spoke for worker {}",
                                    msg.sender()
                                ),
                            },
                        };
                    }
                    Err(e) => break Event::Failed { worker, error: e.into() },
                },
                Some(Err(e)) => break Event::Failed { worker, error: e.into() },
                None => break Event::Disconnected(worker),
            },
        }
    };
    let _ = events.send(last);
}

/// Turns away a connection arriving after every worker slot was handed out.
async fn reject(stream: TcpStream, expected: usize) {
    let mut framed = Framed::new(stream, FrameCodec::new());
    let _ = framed
        .send(Frame::abort(format!("all {expected} workers already joined")))
        .await;
}
