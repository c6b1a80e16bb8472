#![doc = include_str!("../README.md")]

mod server;

use clap::Parser;
use keysweep::{ClusterConfig, LocalCluster, Probe};
use server::config::{CliArgs, DispatchConfig, LocalConfig, Mode, WorkConfig};
use server::loader::load_job;
use server::report::report;
use server::service::serve;
use server::telemetry::init_telemetry;
use server::worker::run_worker;
use tokio::net::TcpListener;
use tokio::signal;

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let mode = Mode::try_from(args)?;

    init_telemetry()?;

    match mode {
        Mode::Dispatch(config) => dispatch(&config),
        Mode::Work(config) => work(&config),
        Mode::Local(config) => local(&config),
    }
}

fn dispatch(config: &DispatchConfig) -> anyhow::Result<()> {
    let job = load_job(&config.search)?;
    let probe = Probe::from_job(&job)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("keysweep-dispatch")
        .enable_all()
        .build()?;
    let outcome = runtime.block_on(async {
        let listener = TcpListener::bind(&config.listen_addr).await?;
        log_startup_info(&config.listen_addr, config);
        anyhow::Ok(serve(listener, job, config, shutdown_signal()).await?)
    })?;

    #[cfg(feature = "tracing")]
    tracing::info!(
        history = ?outcome.history,
        finished = outcome.summaries.len(),
        verified = outcome.summaries.iter().map(|(_, s)| s.keys_verified).sum::<u64>(),
        "Run complete"
    );
    report(outcome.verdict, &probe);
    Ok(())
}

fn work(config: &WorkConfig) -> anyhow::Result<()> {
    #[cfg(feature = "tracing")]
    tracing::info!(
        addr = %config.dispatcher_addr,
        transform_threads = config.pipeline.transform_threads,
        queue_depth = config.pipeline.queue_depth,
        "Starting worker"
    );
    run_worker(config)?;
    Ok(())
}

fn local(config: &LocalConfig) -> anyhow::Result<()> {
    let job = load_job(&config.search)?;
    let probe = Probe::from_job(&job)?;
    let cluster = LocalCluster::new(
        probe.clone(),
        job.full_range(),
        ClusterConfig {
            workers: config.num_workers,
            ranges: config.search.range_count(config.num_workers),
            priority: config.search.priority,
            seed_ranges: config.search.seed_ranges,
            max_grant: config.search.max_grant,
            pipeline: config.pipeline,
            engine: config.engine,
        },
    );
    let outcome = cluster.run()?;

    #[cfg(feature = "tracing")]
    tracing::info!(
        history = ?outcome.history,
        verified = outcome.workers.iter().map(|w| w.summary.keys_verified).sum::<u64>(),
        "Run complete"
    );
    report(outcome.verdict, &probe);
    Ok(())
}

fn log_startup_info(_addr: &str, _config: &DispatchConfig) {
    if cfg!(debug_assertions) {
        #[cfg(feature = "tracing")]
        tracing::info!(
            "Dispatching on {} with full config: {:#?}",
            _addr,
            _config
        );
    } else {
        #[cfg(feature = "tracing")]
        tracing::info!(
            "Dispatching on {} to {} workers over {} keys",
            _addr,
            _config.num_workers,
            _config.search.key_space
        );
    }
}

/// Resolves on Ctrl+C or SIGTERM. A handler that cannot be installed never
/// fires.
async fn shutdown_signal() {
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(_e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!("Failed to install SIGTERM handler: {_e}");
                core::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = core::future::pending::<()>();

    let ctrl_c = async {
        if let Err(_e) = signal::ctrl_c().await {
            #[cfg(feature = "tracing")]
            tracing::warn!("Failed to install Ctrl+C handler: {_e}");
            core::future::pending::<()>().await;
        }
    };

    tokio::select! {
        () = ctrl_c => {
            #[cfg(feature = "tracing")]
            tracing::info!("Received Ctrl+C signal");
        },
        () = terminate => {
            #[cfg(feature = "tracing")]
            tracing::info!("Received SIGTERM signal");
        },
    }
}
