//! Dispatcher and workers talking over real sockets on localhost.

use super::{
    config::{DispatchConfig, SearchConfig, WorkConfig},
    link::TcpLink,
    service::{ServiceOutcome, serve},
    worker::run_worker,
};
use core::time::Duration;
use futures::{SinkExt, StreamExt};
use keysweep::{
    CipherKind, Codec, DispatcherState, EngineConfig, Error, Job, KeyId, PipelineConfig,
    PriorityPolicy, Result, Termination, ToDispatcher, Verdict, WorkerReport,
};
use keysweep_wire::{Frame, FrameCodec};
use std::thread;
use tokio::{net::TcpListener, runtime::Runtime};
use tokio_util::codec::Framed;

const KEY_SPACE: KeyId = 1 << 12;

const ABSENT: KeyId = KEY_SPACE;

/// Keys below 2^12 only differ in the last two bytes, and the phrase spans
/// all eight, so exactly the secret key matches.
fn job(secret: KeyId) -> Job {
    Job::from_plaintext(
        CipherKind::Xor,
        Codec::BigEndian,
        b"keysweep",
        secret,
        "keysweep",
        KEY_SPACE,
    )
    .unwrap()
}

fn dispatch_config(workers: usize) -> DispatchConfig {
    DispatchConfig {
        listen_addr: "127.0.0.1:0".to_string(),
        num_workers: workers,
        join_timeout: Duration::from_secs(10),
        finish_timeout: Duration::from_secs(10),
        search: SearchConfig {
            plaintext_file: "unused".into(),
            phrase_file: "unused".into(),
            secret_key: "0".to_string(),
            key_space: KEY_SPACE,
            cipher: CipherKind::Xor,
            codec: Codec::BigEndian,
            ranges_per_worker: 4,
            seed_ranges: 1,
            max_grant: Some(200),
            priority: PriorityPolicy::Random { seed: Some(11) },
        },
    }
}

fn work_config(addr: &str) -> WorkConfig {
    WorkConfig {
        dispatcher_addr: addr.to_string(),
        pipeline: PipelineConfig {
            queue_depth: 16,
            transform_threads: 2,
        },
        engine: EngineConfig {
            reply_timeout: Duration::from_secs(10),
        },
    }
}

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap()
}

/// Runs a dispatcher and `workers` TCP workers to completion.
fn run(secret: KeyId, workers: usize) -> (Result<ServiceOutcome>, Vec<Result<WorkerReport>>) {
    let runtime = runtime();
    let listener = runtime.block_on(TcpListener::bind("127.0.0.1:0")).unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let config = dispatch_config(workers);
    let server = runtime.spawn(async move {
        serve(listener, job(secret), &config, core::future::pending()).await
    });

    let handles: Vec<_> = (0..workers)
        .map(|_| {
            let config = work_config(&addr);
            thread::spawn(move || run_worker(&config))
        })
        .collect();
    let reports = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let outcome = runtime.block_on(server).unwrap();
    (outcome, reports)
}

#[test]
fn workers_find_the_key_over_tcp() {
    let (outcome, reports) = run(3_001, 3);
    let outcome = outcome.unwrap();

    assert_eq!(outcome.verdict, Verdict::Found(3_001));
    assert_eq!(outcome.history.last(), Some(&DispatcherState::Done));
    assert_eq!(outcome.summaries.len(), 3);

    let reports: Vec<_> = reports.into_iter().map(|r| r.unwrap()).collect();
    assert!(
        reports
            .iter()
            .all(|r| r.termination == Termination::Found(3_001))
    );
    assert_eq!(reports.iter().filter(|r| r.found_locally).count(), 1);
}

#[test]
fn absent_key_exhausts_over_tcp() {
    let (outcome, reports) = run(ABSENT, 2);
    let outcome = outcome.unwrap();

    assert_eq!(outcome.verdict, Verdict::Exhausted);
    assert_eq!(
        outcome.history,
        vec![
            DispatcherState::Serving,
            DispatcherState::Drained,
            DispatcherState::Done
        ]
    );
    let verified: u64 = outcome
        .summaries
        .iter()
        .map(|(_, s)| s.keys_verified)
        .sum();
    assert_eq!(verified, KEY_SPACE);
    for report in reports {
        assert_eq!(report.unwrap().termination, Termination::Exhausted);
    }
}

#[test]
fn extra_connection_is_turned_away() {
    let runtime = runtime();
    let listener = runtime.block_on(TcpListener::bind("127.0.0.1:0")).unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let mut config = dispatch_config(1);
    config.join_timeout = Duration::from_millis(500);
    let server = runtime.spawn(async move {
        serve(listener, job(ABSENT), &config, core::future::pending()).await
    });

    // Holds the only slot without joining.
    let (first, _job) = TcpLink::connect(&addr, Duration::from_secs(5)).unwrap();
    assert_eq!(first.worker(), 0);
    let err = TcpLink::connect(&addr, Duration::from_secs(5)).err().unwrap();
    assert!(matches!(err, Error::Aborted { .. }), "{err}");

    // Nobody joined in time.
    let outcome = runtime.block_on(server).unwrap();
    assert!(matches!(outcome, Err(Error::CommunicationFailure { .. })));
    drop(first);
}

#[test]
fn spoofed_sender_aborts_the_run() {
    let runtime = runtime();
    let listener = runtime.block_on(TcpListener::bind("127.0.0.1:0")).unwrap();
    let addr = listener.local_addr().unwrap();
    let config = dispatch_config(1);
    let server = runtime.spawn(async move {
        serve(listener, job(ABSENT), &config, core::future::pending()).await
    });

    let outcome = runtime.block_on(async {
        let stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        let mut framed = Framed::new(stream, FrameCodec::new());
        let (worker, _job) = framed.next().await.unwrap().unwrap().into_hello().unwrap();
        framed
            .send(Frame::from(ToDispatcher::Join { worker: worker + 1 }))
            .await
            .unwrap();

        let reply = framed.next().await.unwrap().unwrap();
        assert!(matches!(
            reply.body,
            Some(keysweep_wire::frame::Body::Abort(_))
        ));
        server.await.unwrap()
    });
    assert!(matches!(outcome, Err(Error::ProtocolViolation { .. })));
}

#[test]
fn shutdown_aborts_connected_workers() {
    let runtime = runtime();
    let listener = runtime.block_on(TcpListener::bind("127.0.0.1:0")).unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let config = dispatch_config(2);
    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let server = runtime.spawn(async move {
        let shutdown = async {
            let _ = stop_rx.await;
        };
        serve(listener, job(ABSENT), &config, shutdown).await
    });

    // The run cannot finish with one of two workers, so it waits.
    let worker = {
        let config = work_config(&addr);
        thread::spawn(move || run_worker(&config))
    };
    thread::sleep(Duration::from_millis(200));
    let _ = stop_tx.send(());

    let outcome = runtime.block_on(server).unwrap();
    assert!(matches!(outcome, Err(Error::Aborted { .. })));
    let err = worker.join().unwrap().unwrap_err();
    assert!(
        matches!(
            err,
            Error::Aborted { .. } | Error::CommunicationFailure { .. }
        ),
        "{err}"
    );
}
