#![doc = include_str!("../README.md")]

mod codec;
mod convert;
mod error;
mod proto;

pub use crate::codec::*;
pub use crate::error::*;
pub use crate::proto::*;
// Public re-export so downstream crates can reach the core types via
// `keysweep_wire::keysweep`
pub use keysweep;
