use crate::{Result, ToDispatcher, ToWorker};
use core::time::Duration;

/// A worker engine's connection to the rest of the run.
///
/// All calls are blocking or non-blocking sync calls; async transports bridge
/// them onto their own runtime. Every error is a
/// [`CommunicationFailure`](crate::Error::CommunicationFailure): a worker that
/// cannot talk to the dispatcher must abort.
pub trait Link: Send {
    /// Sends a message. [`ToDispatcher::Found`] also reaches every peer, either
    /// directly or relayed by the dispatcher.
    fn send(&mut self, msg: ToDispatcher) -> Result<()>;

    /// Returns the next pending message without blocking.
    fn try_recv(&mut self) -> Result<Option<ToWorker>>;

    /// Waits up to `timeout` for the next message.
    fn recv_timeout(&mut self, timeout: Duration) -> Result<Option<ToWorker>>;

    /// Waits for the next message.
    fn recv(&mut self) -> Result<ToWorker>;

    /// Flushes outbound messages. Called once, after the last send.
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<L: Link + ?Sized> Link for Box<L> {
    fn send(&mut self, msg: ToDispatcher) -> Result<()> {
        (**self).send(msg)
    }

    fn try_recv(&mut self) -> Result<Option<ToWorker>> {
        (**self).try_recv()
    }

    fn recv_timeout(&mut self, timeout: Duration) -> Result<Option<ToWorker>> {
        (**self).recv_timeout(timeout)
    }

    fn recv(&mut self) -> Result<ToWorker> {
        (**self).recv()
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
}
