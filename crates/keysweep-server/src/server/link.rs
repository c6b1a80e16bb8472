//! The worker side of the TCP transport.
//!
//! [`TcpLink`] owns a small Tokio runtime. A writer task drains an unbounded
//! queue of outbound frames into the socket and a reader task decodes
//! inbound frames into a second queue, so the engine's sync calls never
//! touch the socket directly.

use core::time::Duration;
use futures::{SinkExt, StreamExt};
use keysweep::{Error, Job, Link, Result, ToDispatcher, ToWorker, WorkerId};
use keysweep_wire::{Frame, FrameCodec};
use tokio::{
    net::TcpStream,
    runtime::Runtime,
    sync::mpsc::{self, UnboundedReceiver, UnboundedSender, error::TryRecvError},
    task::JoinHandle,
};
use tokio_util::codec::Framed;

type Inbound = keysweep_wire::Result<ToWorker>;

pub struct TcpLink {
    worker: WorkerId,
    outbound: Option<UnboundedSender<Frame>>,
    inbound: UnboundedReceiver<Inbound>,
    writer: Option<JoinHandle<keysweep_wire::Result<()>>>,
    // Dropped last: tasks die with it.
    runtime: Runtime,
}

impl TcpLink {
    /// Connects to the dispatcher and waits for the handshake.
    ///
    /// Must not be called from inside a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CommunicationFailure`] if the dispatcher cannot be
    /// reached or does not say hello within `timeout`, and
    /// [`Error::Aborted`] if it refuses the connection.
    pub fn connect(addr: &str, timeout: Duration) -> Result<(Self, Job)> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("keysweep-link")
            .enable_all()
            .build()
            .map_err(|e| comms(format!("cannot start link runtime: {e}")))?;

        let (framed, worker, job) = runtime.block_on(async {
            let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
                .await
                .map_err(|_| comms(format!("connecting to {addr} timed out")))?
                .map_err(|e| comms(format!("cannot connect to {addr}: {e}")))?;
            stream
                .set_nodelay(true)
                .map_err(|e| comms(format!("cannot configure socket: {e}")))?;
            let mut framed = Framed::new(stream, FrameCodec::new());
            let hello = tokio::time::timeout(timeout, framed.next())
                .await
                .map_err(|_| comms(format!("no hello from {addr}")))?
                .ok_or_else(|| comms(format!("{addr} closed before hello")))??;
            let (worker, job) = hello.into_hello()?;
            Ok::<_, Error>((framed, worker, job))
        })?;

        #[cfg(feature = "tracing")]
        tracing::info!(worker, addr, key_space = job.key_space(), "Connected to dispatcher");

        let (mut sink, mut stream) = framed.split();
        let (outbound, mut outbox) = mpsc::unbounded_channel::<Frame>();
        let (inbox, inbound) = mpsc::unbounded_channel();

        let writer = runtime.spawn(async move {
            while let Some(frame) = outbox.recv().await {
                sink.feed(frame).await?;
                if outbox.is_empty() {
                    sink.flush().await?;
                }
            }
            sink.close().await
        });

        runtime.spawn(async move {
            while let Some(frame) = stream.next().await {
                let msg = frame.and_then(ToWorker::try_from);
                let failed = msg.is_err();
                if inbox.send(msg).is_err() || failed {
                    return;
                }
            }
            let _ = inbox.send(Err(keysweep_wire::Error::closed(
                "dispatcher closed the connection",
            )));
        });

        Ok((
            Self {
                worker,
                outbound: Some(outbound),
                inbound,
                writer: Some(writer),
                runtime,
            },
            job,
        ))
    }

    pub const fn worker(&self) -> WorkerId {
        self.worker
    }
}

impl Link for TcpLink {
    fn send(&mut self, msg: ToDispatcher) -> Result<()> {
        self.outbound
            .as_ref()
            .ok_or_else(|| comms("link already closed"))?
            .send(Frame::from(msg))
            .map_err(|_| comms("connection writer stopped"))
    }

    fn try_recv(&mut self) -> Result<Option<ToWorker>> {
        match self.inbound.try_recv() {
            Ok(msg) => Ok(Some(msg?)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(comms("connection reader stopped")),
        }
    }

    fn recv_timeout(&mut self, timeout: Duration) -> Result<Option<ToWorker>> {
        let inbound = &mut self.inbound;
        match self
            .runtime
            .block_on(async { tokio::time::timeout(timeout, inbound.recv()).await })
        {
            Ok(Some(msg)) => Ok(Some(msg?)),
            Ok(None) => Err(comms("connection reader stopped")),
            Err(_) => Ok(None),
        }
    }

    fn recv(&mut self) -> Result<ToWorker> {
        match self.inbound.blocking_recv() {
            Some(msg) => Ok(msg?),
            None => Err(comms("connection reader stopped")),
        }
    }

    fn close(&mut self) -> Result<()> {
        self.outbound = None;
        let Some(writer) = self.writer.take() else {
            return Ok(());
        };
        match self.runtime.block_on(writer) {
            Ok(result) => Ok(result?),
            Err(e) => Err(comms(format!("connection writer failed: {e}"))),
        }
    }
}

fn comms(context: impl Into<String>) -> Error {
    Error::CommunicationFailure {
        context: context.into(),
    }
}
