//! Conversions between frames and the core message types.

use crate::{
    Abort, CipherId, CodecId, Error, Exhausted, Finished, Found, Frame, Hello, JobSpec, Join,
    Result, Seed, Summary, WireRange, WorkReply, WorkRequest, frame::Body,
};
use keysweep::{
    CipherKind, Codec, Job, Range, ToDispatcher, ToWorker, WorkerId, WorkerSummary,
};

impl From<Range> for WireRange {
    fn from(range: Range) -> Self {
        Self {
            start: range.start(),
            end: range.end(),
            priority: range.priority(),
        }
    }
}

impl TryFrom<WireRange> for Range {
    type Error = Error;

    fn try_from(wire: WireRange) -> Result<Self> {
        Ok(Range::new(wire.start, wire.end)?.with_priority(wire.priority))
    }
}

impl From<WorkerSummary> for Summary {
    fn from(summary: WorkerSummary) -> Self {
        Self {
            ranges_scanned: summary.ranges_scanned,
            keys_verified: summary.keys_verified,
            keys_rejected: summary.keys_rejected,
        }
    }
}

impl From<Summary> for WorkerSummary {
    fn from(summary: Summary) -> Self {
        Self {
            ranges_scanned: summary.ranges_scanned,
            keys_verified: summary.keys_verified,
            keys_rejected: summary.keys_rejected,
        }
    }
}

impl From<CipherKind> for CipherId {
    fn from(kind: CipherKind) -> Self {
        match kind {
            CipherKind::Des => Self::Des,
            CipherKind::Xor => Self::Xor,
        }
    }
}

impl From<CipherId> for CipherKind {
    fn from(id: CipherId) -> Self {
        match id {
            CipherId::Des => Self::Des,
            CipherId::Xor => Self::Xor,
        }
    }
}

impl From<Codec> for CodecId {
    fn from(codec: Codec) -> Self {
        match codec {
            Codec::BigEndian => Self::BigEndian,
            Codec::Des56 => Self::Des56,
        }
    }
}

impl From<CodecId> for Codec {
    fn from(id: CodecId) -> Self {
        match id {
            CodecId::BigEndian => Self::BigEndian,
            CodecId::Des56 => Self::Des56,
        }
    }
}

impl From<&Job> for JobSpec {
    fn from(job: &Job) -> Self {
        Self {
            cipher: CipherId::from(job.cipher()) as i32,
            codec: CodecId::from(job.codec()) as i32,
            ciphertext: job.ciphertext().clone(),
            phrase: job.phrase().clone(),
            key_space: job.key_space(),
        }
    }
}

impl TryFrom<JobSpec> for Job {
    type Error = Error;

    fn try_from(spec: JobSpec) -> Result<Self> {
        let cipher = CipherId::try_from(spec.cipher)
            .map_err(|_| Error::malformed(format!("unknown cipher id {}", spec.cipher)))?;
        let codec = CodecId::try_from(spec.codec)
            .map_err(|_| Error::malformed(format!("unknown codec id {}", spec.codec)))?;
        Ok(Job::new(
            cipher.into(),
            codec.into(),
            spec.ciphertext,
            spec.phrase,
            spec.key_space,
        )?)
    }
}

impl Frame {
    const fn with(body: Body) -> Self {
        Self { body: Some(body) }
    }

    /// The handshake frame assigning `worker` its id and job.
    pub fn hello(worker: WorkerId, job: &Job) -> Self {
        Self::with(Body::Hello(Hello {
            worker,
            job: Some(job.into()),
        }))
    }

    pub fn abort(reason: impl Into<String>) -> Self {
        Self::with(Body::Abort(Abort {
            reason: reason.into(),
        }))
    }

    /// Reads a handshake frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Rejected`] for an abort, and
    /// [`Error::MalformedFrame`] for anything else that is not a complete
    /// hello.
    pub fn into_hello(self) -> Result<(WorkerId, Job)> {
        match self.body {
            Some(Body::Hello(Hello {
                worker,
                job: Some(spec),
            })) => Ok((worker, spec.try_into()?)),
            Some(Body::Abort(Abort { reason })) => Err(Error::Rejected { reason }),
            other => Err(Error::malformed(format!(
                "expected hello, got {}",
                describe(other.as_ref())
            ))),
        }
    }
}

impl From<ToDispatcher> for Frame {
    fn from(msg: ToDispatcher) -> Self {
        Self::with(match msg {
            ToDispatcher::Join { worker } => Body::Join(Join { worker }),
            ToDispatcher::WorkRequest { from_worker } => {
                Body::WorkRequest(WorkRequest { from_worker })
            }
            ToDispatcher::Found { from_worker, key } => Body::Found(Found { from_worker, key }),
            ToDispatcher::Finished { worker, summary } => Body::Finished(Finished {
                worker,
                summary: Some(summary.into()),
            }),
        })
    }
}

impl From<ToWorker> for Frame {
    fn from(msg: ToWorker) -> Self {
        Self::with(match msg {
            ToWorker::Seed { ranges } => Body::Seed(Seed {
                ranges: ranges.into_iter().map(WireRange::from).collect(),
            }),
            ToWorker::WorkReply { range } => Body::WorkReply(WorkReply {
                range: (!range.is_empty()).then(|| range.into()),
            }),
            ToWorker::Found { key } => Body::Found(Found {
                from_worker: 0,
                key,
            }),
            ToWorker::Exhausted => Body::Exhausted(Exhausted {}),
            ToWorker::Abort { reason } => Body::Abort(Abort { reason }),
        })
    }
}

impl TryFrom<Frame> for ToDispatcher {
    type Error = Error;

    fn try_from(frame: Frame) -> Result<Self> {
        match frame.body {
            Some(Body::Join(Join { worker })) => Ok(Self::Join { worker }),
            Some(Body::WorkRequest(WorkRequest { from_worker })) => {
                Ok(Self::WorkRequest { from_worker })
            }
            Some(Body::Found(Found { from_worker, key })) => Ok(Self::Found { from_worker, key }),
            Some(Body::Finished(Finished { worker, summary })) => Ok(Self::Finished {
                worker,
                summary: summary.map(Into::into).unwrap_or_default(),
            }),
            other => Err(Error::malformed(format!(
                "{} is not a worker message",
                describe(other.as_ref())
            ))),
        }
    }
}

impl TryFrom<Frame> for ToWorker {
    type Error = Error;

    fn try_from(frame: Frame) -> Result<Self> {
        match frame.body {
            Some(Body::Seed(Seed { ranges })) => Ok(Self::Seed {
                ranges: ranges
                    .into_iter()
                    .map(Range::try_from)
                    .collect::<Result<_>>()?,
            }),
            Some(Body::WorkReply(WorkReply { range })) => Ok(Self::WorkReply {
                range: range.map(Range::try_from).transpose()?.unwrap_or(Range::empty()),
            }),
            Some(Body::Found(Found { key, .. })) => Ok(Self::Found { key }),
            Some(Body::Exhausted(_)) => Ok(Self::Exhausted),
            Some(Body::Abort(Abort { reason })) => Ok(Self::Abort { reason }),
            other => Err(Error::malformed(format!(
                "{} is not a dispatcher message",
                describe(other.as_ref())
            ))),
        }
    }
}

fn describe(body: Option<&Body>) -> &'static str {
    match body {
        None => "empty frame",
        Some(Body::Hello(_)) => "hello",
        Some(Body::Join(_)) => "join",
        Some(Body::Seed(_)) => "seed",
        Some(Body::WorkRequest(_)) => "work request",
        Some(Body::WorkReply(_)) => "work reply",
        Some(Body::Found(_)) => "found",
        Some(Body::Exhausted(_)) => "exhausted",
        Some(Body::Finished(_)) => "finished",
        Some(Body::Abort(_)) => "abort",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn no_more_work_travels_as_an_absent_range() {
        let frame = Frame::from(ToWorker::no_more_work());
        assert_eq!(
            frame.body,
            Some(Body::WorkReply(WorkReply { range: None }))
        );
        assert_eq!(
            ToWorker::try_from(frame).unwrap(),
            ToWorker::no_more_work()
        );
    }

    #[test]
    fn hello_carries_the_job() {
        let job = Job::from_plaintext(
            CipherKind::Des,
            Codec::Des56,
            b"hello world",
            99,
            "world",
            1 << 20,
        )
        .unwrap();
        let (worker, received) = Frame::hello(4, &job).into_hello().unwrap();
        assert_eq!(worker, 4);
        assert_eq!(received, job);
    }

    #[test]
    fn abort_during_handshake_is_rejected() {
        assert!(matches!(
            Frame::abort("full").into_hello(),
            Err(Error::Rejected { reason }) if reason == "full"
        ));
    }

    #[test]
    fn inverted_range_is_refused() {
        let frame = Frame::with(Body::Seed(Seed {
            ranges: vec![WireRange {
                start: 9,
                end: 3,
                priority: 0.0,
            }],
        }));
        let err = ToWorker::try_from(frame).unwrap_err();
        assert!(matches!(
            keysweep::Error::from(err),
            keysweep::Error::InvalidArgument { .. }
        ));
    }

    #[test]
    fn direction_is_checked() {
        let frame = Frame::from(ToWorker::Exhausted);
        assert!(matches!(
            ToDispatcher::try_from(frame),
            Err(Error::MalformedFrame { .. })
        ));
        let frame = Frame::from(ToDispatcher::Join { worker: 1 });
        assert!(matches!(
            ToWorker::try_from(frame),
            Err(Error::MalformedFrame { .. })
        ));
    }

    #[test]
    fn unknown_cipher_is_malformed() {
        let spec = JobSpec {
            cipher: 42,
            codec: 0,
            ciphertext: Bytes::from_static(b"12345678"),
            phrase: Bytes::from_static(b"x"),
            key_space: 16,
        };
        assert!(matches!(
            Job::try_from(spec),
            Err(Error::MalformedFrame { .. })
        ));
    }

    #[test]
    fn finished_summary_survives() {
        let summary = WorkerSummary {
            ranges_scanned: 3,
            keys_verified: 300,
            keys_rejected: 1,
        };
        let frame = Frame::from(ToDispatcher::Finished { worker: 7, summary });
        assert_eq!(
            ToDispatcher::try_from(frame).unwrap(),
            ToDispatcher::Finished { worker: 7, summary }
        );
    }
}
