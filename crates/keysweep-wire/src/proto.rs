//! Protobuf messages of the dispatcher ⇄ worker protocol.
//!
//! Every message on the wire is a single [`Frame`] carrying exactly one body.
//! The equivalent `.proto` definition:
//!
//! ```proto
//! syntax = "proto3";
//! package keysweep;
//!
//! message Frame {
//!   oneof body {
//!     Hello hello = 1;
//!     Join join = 2;
//!     Seed seed = 3;
//!     WorkRequest work_request = 4;
//!     WorkReply work_reply = 5;
//!     Found found = 6;
//!     Exhausted exhausted = 7;
//!     Finished finished = 8;
//!     Abort abort = 9;
//!   }
//! }
//! ```

use bytes::Bytes;

#[derive(Clone, PartialEq, prost::Message)]
pub struct Frame {
    #[prost(oneof = "frame::Body", tags = "1, 2, 3, 4, 5, 6, 7, 8, 9")]
    pub body: Option<frame::Body>,
}

pub mod frame {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Body {
        /// Dispatcher → worker, right after accept.
        #[prost(message, tag = "1")]
        Hello(super::Hello),
        #[prost(message, tag = "2")]
        Join(super::Join),
        #[prost(message, tag = "3")]
        Seed(super::Seed),
        #[prost(message, tag = "4")]
        WorkRequest(super::WorkRequest),
        #[prost(message, tag = "5")]
        WorkReply(super::WorkReply),
        #[prost(message, tag = "6")]
        Found(super::Found),
        #[prost(message, tag = "7")]
        Exhausted(super::Exhausted),
        #[prost(message, tag = "8")]
        Finished(super::Finished),
        #[prost(message, tag = "9")]
        Abort(super::Abort),
    }
}

/// Assigns the worker id and ships the job.
#[derive(Clone, PartialEq, prost::Message)]
pub struct Hello {
    #[prost(uint32, tag = "1")]
    pub worker: u32,
    #[prost(message, optional, tag = "2")]
    pub job: Option<JobSpec>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct JobSpec {
    #[prost(enumeration = "CipherId", tag = "1")]
    pub cipher: i32,
    #[prost(enumeration = "CodecId", tag = "2")]
    pub codec: i32,
    #[prost(bytes = "bytes", tag = "3")]
    pub ciphertext: Bytes,
    #[prost(bytes = "bytes", tag = "4")]
    pub phrase: Bytes,
    /// Exclusive upper bound of the key space.
    #[prost(uint64, tag = "5")]
    pub key_space: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum CipherId {
    Des = 0,
    Xor = 1,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum CodecId {
    BigEndian = 0,
    Des56 = 1,
}

#[derive(Clone, Copy, PartialEq, prost::Message)]
pub struct WireRange {
    #[prost(uint64, tag = "1")]
    pub start: u64,
    #[prost(uint64, tag = "2")]
    pub end: u64,
    #[prost(double, tag = "3")]
    pub priority: f64,
}

#[derive(Clone, Copy, PartialEq, prost::Message)]
pub struct Join {
    #[prost(uint32, tag = "1")]
    pub worker: u32,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Seed {
    #[prost(message, repeated, tag = "1")]
    pub ranges: Vec<WireRange>,
}

#[derive(Clone, Copy, PartialEq, prost::Message)]
pub struct WorkRequest {
    #[prost(uint32, tag = "1")]
    pub from_worker: u32,
}

/// An absent range means "no more work".
#[derive(Clone, Copy, PartialEq, prost::Message)]
pub struct WorkReply {
    #[prost(message, optional, tag = "1")]
    pub range: Option<WireRange>,
}

/// Sent by the finder (with `from_worker`) and relayed by the dispatcher.
#[derive(Clone, Copy, PartialEq, prost::Message)]
pub struct Found {
    #[prost(uint32, tag = "1")]
    pub from_worker: u32,
    #[prost(uint64, tag = "2")]
    pub key: u64,
}

#[derive(Clone, Copy, PartialEq, prost::Message)]
pub struct Exhausted {}

#[derive(Clone, Copy, PartialEq, prost::Message)]
pub struct Summary {
    #[prost(uint64, tag = "1")]
    pub ranges_scanned: u64,
    #[prost(uint64, tag = "2")]
    pub keys_verified: u64,
    #[prost(uint64, tag = "3")]
    pub keys_rejected: u64,
}

#[derive(Clone, Copy, PartialEq, prost::Message)]
pub struct Finished {
    #[prost(uint32, tag = "1")]
    pub worker: u32,
    #[prost(message, optional, tag = "2")]
    pub summary: Option<Summary>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Abort {
    #[prost(string, tag = "1")]
    pub reason: String,
}
