//! Error types for the key search.
//!
//! Every variant of [`Error`] is fatal to a run: the caller aborts and the
//! process exits non-zero. The one recoverable condition, a cipher refusing a
//! particular key, is modelled separately as [`WeakKeyRejected`] and never
//! escapes the pipeline.
//!
//! [`WeakKeyRejected`]: crate::WeakKeyRejected

/// A result type defaulting to the crate's [`Error`].
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// All fatal errors a search run can produce.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// A bad partition count, an inverted range or an out-of-domain bound.
    #[error("Invalid argument: {reason}")]
    InvalidArgument { reason: String },

    /// Input material could not be loaded or prepared.
    #[error("Loader failure: {reason}")]
    LoaderFailure { reason: String },

    /// A peer or the dispatcher could not be reached, or went away before
    /// the run terminated.
    #[error("Communication failure: {context}")]
    CommunicationFailure { context: String },

    /// A peer sent a message that is not valid in the current state.
    #[error("Protocol violation: {context}")]
    ProtocolViolation { context: String },

    /// The coordinating process aborted the run.
    #[error("Run aborted: {reason}")]
    Aborted { reason: String },
}

impl Error {
    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            reason: reason.into(),
        }
    }

    pub(crate) fn comms(context: impl Into<String>) -> Self {
        Self::CommunicationFailure {
            context: context.into(),
        }
    }

    pub(crate) fn protocol(context: impl Into<String>) -> Self {
        Self::ProtocolViolation {
            context: context.into(),
        }
    }
}
