use super::{config::WorkConfig, link::TcpLink};
use keysweep::{Pipeline, Probe, Result, WorkerEngine, WorkerReport};

/// Joins the dispatcher at `config.dispatcher_addr` and searches until the
/// run ends.
///
/// # Errors
///
/// Returns any fatal error of the link or the engine, including an abort
/// sent by the dispatcher.
pub fn run_worker(config: &WorkConfig) -> Result<WorkerReport> {
    let (link, job) = TcpLink::connect(&config.dispatcher_addr, config.engine.reply_timeout)?;
    let worker = link.worker();
    let probe = Probe::from_job(&job)?;
    let pipeline = Pipeline::new(probe, config.pipeline);
    let mut engine = WorkerEngine::new(worker, link, pipeline, config.engine);
    let report = engine.run()?;

    #[cfg(feature = "tracing")]
    tracing::info!(
        worker,
        termination = ?report.termination,
        found_locally = report.found_locally,
        ranges = report.summary.ranges_scanned,
        verified = report.summary.keys_verified,
        rejected = report.summary.keys_rejected,
        "Worker finished"
    );
    Ok(report)
}
