mod cipher;
mod cluster;
mod codec;
mod dispatcher;
mod engine;
mod error;
mod found;
mod job;
mod link;
mod message;
mod partition;
mod pipeline;
mod predicate;
mod probe;
mod queue;
mod range;

pub use crate::cipher::*;
pub use crate::cluster::*;
pub use crate::codec::*;
pub use crate::dispatcher::*;
pub use crate::engine::*;
pub use crate::error::*;
pub use crate::found::*;
pub use crate::job::*;
pub use crate::link::*;
pub use crate::message::*;
pub use crate::partition::*;
pub use crate::pipeline::*;
pub use crate::predicate::*;
pub use crate::probe::*;
pub use crate::queue::*;
pub use crate::range::*;
