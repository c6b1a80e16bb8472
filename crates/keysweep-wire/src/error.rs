//! Errors raised while moving frames between processes.
//!
//! Every variant is fatal to the connection. Converted into the core
//! [`keysweep::Error`] they all become a communication failure, except an
//! explicit abort from the other side and errors that already came from the
//! core crate.

pub type Result<T> = core::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The socket failed or a frame exceeded the length limit.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A frame was not valid protobuf.
    #[error("Decode error: {0}")]
    Decode(#[from] prost::DecodeError),

    /// A frame decoded but its content makes no sense here.
    #[error("Malformed frame: {context}")]
    MalformedFrame { context: String },

    /// The other side of an internal channel or the connection is gone.
    #[error("Channel closed: {context}")]
    ChannelClosed { context: String },

    /// The dispatcher refused or aborted this connection.
    #[error("Rejected by peer: {reason}")]
    Rejected { reason: String },

    /// The frame carried values the core types refuse.
    #[error(transparent)]
    Core(#[from] keysweep::Error),
}

impl Error {
    pub fn malformed(context: impl Into<String>) -> Self {
        Self::MalformedFrame {
            context: context.into(),
        }
    }

    pub fn closed(context: impl Into<String>) -> Self {
        Self::ChannelClosed {
            context: context.into(),
        }
    }
}

impl From<Error> for keysweep::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Core(e) => e,
            Error::Rejected { reason } => Self::Aborted { reason },
            other => Self::CommunicationFailure {
                context: other.to_string(),
            },
        }
    }
}
