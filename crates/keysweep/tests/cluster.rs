use bytes::Bytes;
use core::time::Duration;
use keysweep::{
    CipherKind, ClusterConfig, Codec, DispatcherState, EngineConfig, Job, KeyId, LocalCluster,
    PipelineConfig, PriorityPolicy, Probe, Range, Termination, Verdict, XorCipher,
};
use std::sync::Arc;

/// XOR over a zero block decrypts to the big-endian key, so the predicate
/// can single out one key id.
fn probe_for(target: KeyId) -> Probe {
    Probe::new(
        Codec::BigEndian,
        Arc::new(XorCipher),
        Bytes::from_static(&[0; 8]),
        Arc::new(move |text: &[u8]| text == target.to_be_bytes()),
    )
}

fn nothing_matches() -> Probe {
    Probe::new(
        Codec::BigEndian,
        Arc::new(XorCipher),
        Bytes::from_static(&[0; 8]),
        Arc::new(|_: &[u8]| false),
    )
}

fn config(workers: usize, ranges: usize) -> ClusterConfig {
    ClusterConfig {
        workers,
        ranges,
        priority: PriorityPolicy::Random { seed: Some(7) },
        seed_ranges: 1,
        max_grant: None,
        pipeline: PipelineConfig {
            queue_depth: 8,
            transform_threads: 2,
        },
        engine: EngineConfig {
            reply_timeout: Duration::from_secs(10),
        },
    }
}

#[test]
fn three_workers_find_577() {
    let full = Range::new(0, 1000).unwrap();
    let outcome = LocalCluster::new(probe_for(577), full, config(3, 10))
        .run()
        .unwrap();

    assert_eq!(outcome.verdict, Verdict::Found(577));
    assert_eq!(outcome.workers.len(), 3);
    for report in &outcome.workers {
        assert_eq!(report.termination, Termination::Found(577));
    }
    assert_eq!(
        outcome
            .workers
            .iter()
            .filter(|report| report.found_locally)
            .count(),
        1
    );
    assert_eq!(outcome.history.last(), Some(&DispatcherState::Done));
}

#[test]
fn single_worker_exhausts_64_keys() {
    let full = Range::new(0, 64).unwrap();
    let outcome = LocalCluster::new(nothing_matches(), full, config(1, 4))
        .run()
        .unwrap();

    assert_eq!(outcome.verdict, Verdict::Exhausted);
    assert_eq!(
        outcome.history,
        vec![
            DispatcherState::Serving,
            DispatcherState::Drained,
            DispatcherState::Done
        ]
    );
    let report = &outcome.workers[0];
    assert_eq!(report.termination, Termination::Exhausted);
    assert_eq!(report.summary.keys_verified, 64);
    assert_eq!(report.summary.ranges_scanned, 4);
}

#[test]
fn every_key_is_searched_exactly_once_without_a_match() {
    let full = Range::new(0, 5_000).unwrap();
    let mut config = config(4, 7);
    config.max_grant = Some(300);
    config.seed_ranges = 2;
    let outcome = LocalCluster::new(nothing_matches(), full, config)
        .run()
        .unwrap();

    assert_eq!(outcome.verdict, Verdict::Exhausted);
    let verified: u64 = outcome
        .workers
        .iter()
        .map(|report| report.summary.keys_verified)
        .sum();
    assert_eq!(verified, 5_000);
}

#[test]
fn boundary_keys_are_found() {
    let bound: KeyId = 1 << 12;
    for target in [0, bound - 1] {
        let full = Range::new(0, bound).unwrap();
        let outcome = LocalCluster::new(probe_for(target), full, config(2, 5))
            .run()
            .unwrap();
        assert_eq!(outcome.verdict, Verdict::Found(target), "target {target}");
    }
}

#[test]
fn key_past_the_exclusive_bound_is_not_searched() {
    let bound: KeyId = 1 << 10;
    let full = Range::new(0, bound).unwrap();
    let outcome = LocalCluster::new(probe_for(bound), full, config(2, 4))
        .run()
        .unwrap();
    assert_eq!(outcome.verdict, Verdict::Exhausted);
}

#[test]
fn found_stops_the_other_workers_early() {
    // One worker holds the match near its start, the others hold ranges
    // far too large to finish.
    let full = Range::new(0, 400_000_000).unwrap();
    let mut config = config(3, 3);
    config.priority = PriorityPolicy::Uniform;
    let outcome = LocalCluster::new(probe_for(10), full, config)
        .run()
        .unwrap();

    assert_eq!(outcome.verdict, Verdict::Found(10));
    let verified: u64 = outcome
        .workers
        .iter()
        .map(|report| report.summary.keys_verified)
        .sum();
    assert!(verified < 400_000_000);
}

#[test]
fn des_job_end_to_end() {
    let secret = 3_141;
    let job = Job::from_plaintext(
        CipherKind::Des,
        Codec::BigEndian,
        b"Esta es una prueba de proyecto 2",
        secret,
        "es una prueba",
        1 << 13,
    )
    .unwrap();
    let probe = Probe::from_job(&job).unwrap();
    let outcome = LocalCluster::new(probe.clone(), job.full_range(), config(2, 8))
        .run()
        .unwrap();

    // DES ignores the parity bit, so the even neighbour decrypts too.
    let Verdict::Found(key) = outcome.verdict else {
        panic!("expected a key, got {:?}", outcome.verdict);
    };
    assert!(key == secret || key == secret & !1, "found {key}");
    assert!(probe.test(key));
    let text = probe.reveal(key).unwrap();
    assert!(text.starts_with(b"Esta es una prueba"));
}

#[test]
fn more_workers_than_keys() {
    let full = Range::new(0, 5).unwrap();
    let outcome = LocalCluster::new(probe_for(3), full, config(8, 1))
        .run()
        .unwrap();
    assert_eq!(outcome.verdict, Verdict::Found(3));
    assert_eq!(outcome.workers.len(), 8);
    assert!(
        outcome
            .workers
            .iter()
            .all(|r| r.termination == Termination::Found(3))
    );

    let outcome = LocalCluster::new(nothing_matches(), full, config(8, 1))
        .run()
        .unwrap();
    assert_eq!(outcome.verdict, Verdict::Exhausted);
    let verified: u64 = outcome.workers.iter().map(|r| r.summary.keys_verified).sum();
    assert_eq!(verified, 5);
}

#[test]
fn zero_workers_is_invalid() {
    let full = Range::new(0, 10).unwrap();
    assert!(
        LocalCluster::new(nothing_matches(), full, config(0, 1))
            .run()
            .is_err()
    );
}
