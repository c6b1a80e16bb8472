use anyhow::bail;
use clap::{Args, Parser, Subcommand, ValueEnum};
use core::time::Duration;
use keysweep::{CipherKind, Codec, EngineConfig, KeyId, PipelineConfig, PriorityPolicy};
use std::path::PathBuf;

/// Runtime configuration for the `keysweep` binary.
///
/// Every value can come from a CLI flag or an environment variable (a `.env`
/// file in the working directory is loaded first). The same binary plays
/// every role: one `dispatch` process plus any number of `work` processes, or
/// a single `local` process that runs the dispatcher and its workers as
/// threads.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "keysweep",
    version,
    about = "Distributed exhaustive key search"
)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Load the job, serve work ranges over TCP and print the result.
    Dispatch(DispatchArgs),
    /// Connect to a dispatcher and search the ranges it hands out.
    Work(WorkArgs),
    /// Run the dispatcher and every worker inside this process.
    Local(LocalArgs),
}

#[derive(Args, Debug, Clone)]
pub struct DispatchArgs {
    /// Address the dispatcher listens on.
    ///
    /// Environment variable: `LISTEN_ADDR`
    #[arg(long, env = "LISTEN_ADDR", default_value_t = String::from("0.0.0.0:7117"))]
    pub listen_addr: String,

    /// Number of worker processes that must join before the run can end.
    ///
    /// Environment variable: `NUM_WORKERS`
    #[arg(long, env = "NUM_WORKERS", default_value_t = 1)]
    pub num_workers: usize,

    /// Seconds to wait for every worker to join before aborting the run.
    ///
    /// Environment variable: `JOIN_TIMEOUT_SECS`
    #[arg(long, env = "JOIN_TIMEOUT_SECS", default_value_t = 60)]
    pub join_timeout_secs: u64,

    /// Seconds to wait for workers to report `Finished` once the result is
    /// known. The result is printed either way.
    ///
    /// Environment variable: `FINISH_TIMEOUT_SECS`
    #[arg(long, env = "FINISH_TIMEOUT_SECS", default_value_t = 10)]
    pub finish_timeout_secs: u64,

    #[command(flatten)]
    pub search: SearchArgs,
}

#[derive(Args, Debug, Clone)]
pub struct WorkArgs {
    /// Dispatcher address to connect to.
    ///
    /// Environment variable: `DISPATCHER_ADDR`
    #[arg(long, env = "DISPATCHER_ADDR", default_value_t = String::from("127.0.0.1:7117"))]
    pub dispatcher_addr: String,

    #[command(flatten)]
    pub pipeline: PipelineArgs,
}

#[derive(Args, Debug, Clone)]
pub struct LocalArgs {
    /// Number of worker threads, each with its own pipeline.
    ///
    /// Environment variable: `NUM_WORKERS`
    #[arg(long, env = "NUM_WORKERS", default_value_t = 4)]
    pub num_workers: usize,

    #[command(flatten)]
    pub search: SearchArgs,

    #[command(flatten)]
    pub pipeline: PipelineArgs,
}

/// What to search for and how the key space is carved up.
#[derive(Args, Debug, Clone)]
pub struct SearchArgs {
    /// File holding the plaintext to encrypt.
    ///
    /// Environment variable: `PLAINTEXT_FILE`
    #[arg(long, env = "PLAINTEXT_FILE")]
    pub plaintext_file: PathBuf,

    /// File holding the phrase a correct decryption contains.
    ///
    /// Environment variable: `PHRASE_FILE`
    #[arg(long, env = "PHRASE_FILE")]
    pub phrase_file: PathBuf,

    /// Key the plaintext is encrypted with, decimal or `0x` hex.
    ///
    /// Environment variable: `SECRET_KEY`
    #[arg(long, env = "SECRET_KEY")]
    pub secret_key: String,

    /// Width of the searched key space. Keys `[0, 2^bits)` are searched.
    ///
    /// Environment variable: `KEY_BITS`
    #[arg(long, env = "KEY_BITS", default_value_t = 56)]
    pub key_bits: u32,

    /// Environment variable: `CIPHER`
    #[arg(long, env = "CIPHER", value_enum, default_value_t = CipherArg::Des)]
    pub cipher: CipherArg,

    /// How a key id becomes the 8-byte key handed to the cipher.
    ///
    /// Environment variable: `CODEC`
    #[arg(long, env = "CODEC", value_enum, default_value_t = CodecArg::Des56)]
    pub codec: CodecArg,

    /// Ranges the key space is split into, per worker.
    ///
    /// Environment variable: `RANGES_PER_WORKER`
    #[arg(long, env = "RANGES_PER_WORKER", default_value_t = 10)]
    pub ranges_per_worker: usize,

    /// Ranges handed to each worker when it joins.
    ///
    /// Environment variable: `SEED_RANGES`
    #[arg(long, env = "SEED_RANGES", default_value_t = 1)]
    pub seed_ranges: usize,

    /// Longest range handed out at once. Longer ranges are split.
    ///
    /// Environment variable: `MAX_GRANT`
    #[arg(long, env = "MAX_GRANT")]
    pub max_grant: Option<u64>,

    /// Give ranges random priorities instead of serving them in key order.
    ///
    /// Environment variable: `RANDOM_PRIORITY`
    #[arg(long, env = "RANDOM_PRIORITY", default_value_t = false)]
    pub random_priority: bool,

    /// Seed for random priorities. Implies `--random-priority`.
    ///
    /// Environment variable: `PRIORITY_SEED`
    #[arg(long, env = "PRIORITY_SEED")]
    pub priority_seed: Option<u64>,
}

/// Tunables of a worker's pipeline.
#[derive(Args, Debug, Clone)]
pub struct PipelineArgs {
    /// Capacity of each queue between pipeline stages.
    ///
    /// Environment variable: `QUEUE_DEPTH`
    #[arg(long, env = "QUEUE_DEPTH", default_value_t = 1024)]
    pub queue_depth: usize,

    /// Decrypting threads per worker. Defaults to the number of CPUs.
    ///
    /// Environment variable: `TRANSFORM_THREADS`
    #[arg(long, env = "TRANSFORM_THREADS")]
    pub transform_threads: Option<usize>,

    /// Seconds a worker waits for the dispatcher to answer before giving up.
    ///
    /// Environment variable: `REPLY_TIMEOUT_SECS`
    #[arg(long, env = "REPLY_TIMEOUT_SECS", default_value_t = 30)]
    pub reply_timeout_secs: u64,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherArg {
    Des,
    Xor,
}

impl From<CipherArg> for CipherKind {
    fn from(arg: CipherArg) -> Self {
        match arg {
            CipherArg::Des => Self::Des,
            CipherArg::Xor => Self::Xor,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecArg {
    BigEndian,
    Des56,
}

impl From<CodecArg> for Codec {
    fn from(arg: CodecArg) -> Self {
        match arg {
            CodecArg::BigEndian => Self::BigEndian,
            CodecArg::Des56 => Self::Des56,
        }
    }
}

/// The validated role and settings of this process.
#[derive(Debug, Clone)]
pub enum Mode {
    Dispatch(DispatchConfig),
    Work(WorkConfig),
    Local(LocalConfig),
}

#[derive(Debug, Clone)]
pub struct SearchConfig {
    pub plaintext_file: PathBuf,
    pub phrase_file: PathBuf,
    /// Parsed by the loader, so a bad key fails like a bad input file.
    pub secret_key: String,
    pub key_space: KeyId,
    pub cipher: CipherKind,
    pub codec: Codec,
    pub ranges_per_worker: usize,
    pub seed_ranges: usize,
    pub max_grant: Option<u64>,
    pub priority: PriorityPolicy,
}

#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub listen_addr: String,
    pub num_workers: usize,
    pub join_timeout: Duration,
    pub finish_timeout: Duration,
    pub search: SearchConfig,
}

#[derive(Debug, Clone)]
pub struct WorkConfig {
    pub dispatcher_addr: String,
    pub pipeline: PipelineConfig,
    pub engine: EngineConfig,
}

#[derive(Debug, Clone)]
pub struct LocalConfig {
    pub num_workers: usize,
    pub search: SearchConfig,
    pub pipeline: PipelineConfig,
    pub engine: EngineConfig,
}

impl TryFrom<CliArgs> for Mode {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        Ok(match args.command {
            Command::Dispatch(args) => {
                if args.num_workers == 0 {
                    bail!("NUM_WORKERS must be greater than 0");
                }
                if args.join_timeout_secs == 0 {
                    bail!("JOIN_TIMEOUT_SECS must be greater than 0");
                }
                let search = SearchConfig::try_from_args(args.search, args.num_workers)?;
                Self::Dispatch(DispatchConfig {
                    listen_addr: args.listen_addr,
                    num_workers: args.num_workers,
                    join_timeout: Duration::from_secs(args.join_timeout_secs),
                    finish_timeout: Duration::from_secs(args.finish_timeout_secs),
                    search,
                })
            }
            Command::Work(args) => {
                let (pipeline, engine) = pipeline_config(&args.pipeline)?;
                Self::Work(WorkConfig {
                    dispatcher_addr: args.dispatcher_addr,
                    pipeline,
                    engine,
                })
            }
            Command::Local(args) => {
                if args.num_workers == 0 {
                    bail!("NUM_WORKERS must be greater than 0");
                }
                let search = SearchConfig::try_from_args(args.search, args.num_workers)?;
                let (pipeline, engine) = pipeline_config(&args.pipeline)?;
                Self::Local(LocalConfig {
                    num_workers: args.num_workers,
                    search,
                    pipeline,
                    engine,
                })
            }
        })
    }
}

impl SearchConfig {
    fn try_from_args(args: SearchArgs, num_workers: usize) -> anyhow::Result<Self> {
        let codec = Codec::from(args.codec);
        if args.key_bits == 0 || args.key_bits > 64 {
            bail!("KEY_BITS ({}) must be between 1 and 64", args.key_bits);
        }
        let key_space = keysweep::key_space_for_bits(args.key_bits);
        if let Some(bound) = codec.domain_bound() {
            if key_space > bound {
                bail!(
                    "KEY_BITS ({}) exceeds the {:?} codec's key space (max = {} keys)",
                    args.key_bits,
                    codec,
                    bound
                );
            }
        }
        if args.ranges_per_worker == 0 {
            bail!("RANGES_PER_WORKER must be greater than 0");
        }
        if args.seed_ranges == 0 {
            bail!("SEED_RANGES must be greater than 0");
        }
        if args.max_grant == Some(0) {
            bail!("MAX_GRANT must be greater than 0");
        }
        if num_workers.checked_mul(args.ranges_per_worker).is_none() {
            bail!("Overflow in range count computation");
        }
        let priority = match (args.random_priority, args.priority_seed) {
            (_, Some(seed)) => PriorityPolicy::Random { seed: Some(seed) },
            (true, None) => PriorityPolicy::Random { seed: None },
            (false, None) => PriorityPolicy::Uniform,
        };

        Ok(Self {
            plaintext_file: args.plaintext_file,
            phrase_file: args.phrase_file,
            secret_key: args.secret_key,
            key_space,
            cipher: args.cipher.into(),
            codec,
            ranges_per_worker: args.ranges_per_worker,
            seed_ranges: args.seed_ranges,
            max_grant: args.max_grant,
            priority,
        })
    }

    /// Total ranges the key space is partitioned into for `num_workers`.
    pub const fn range_count(&self, num_workers: usize) -> usize {
        num_workers.saturating_mul(self.ranges_per_worker)
    }
}

fn pipeline_config(args: &PipelineArgs) -> anyhow::Result<(PipelineConfig, EngineConfig)> {
    if args.queue_depth == 0 {
        bail!("QUEUE_DEPTH must be greater than 0");
    }
    let transform_threads = args
        .transform_threads
        .unwrap_or_else(|| PipelineConfig::default().transform_threads);
    if transform_threads == 0 {
        bail!("TRANSFORM_THREADS must be greater than 0");
    }
    if args.reply_timeout_secs == 0 {
        bail!("REPLY_TIMEOUT_SECS must be greater than 0");
    }
    Ok((
        PipelineConfig {
            queue_depth: args.queue_depth,
            transform_threads,
        },
        EngineConfig {
            reply_timeout: Duration::from_secs(args.reply_timeout_secs),
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> anyhow::Result<Mode> {
        let args = CliArgs::try_parse_from(args)?;
        Mode::try_from(args)
    }

    const SEARCH: [&str; 6] = [
        "--plaintext-file",
        "plain.txt",
        "--phrase-file",
        "phrase.txt",
        "--secret-key",
        "42",
    ];

    fn local(extra: &[&str]) -> anyhow::Result<Mode> {
        let mut args = vec!["keysweep", "local"];
        args.extend(SEARCH);
        args.extend(extra);
        parse(&args)
    }

    #[test]
    fn local_defaults() {
        let Mode::Local(config) = local(&["--transform-threads", "2"]).unwrap() else {
            panic!("expected local mode");
        };
        assert_eq!(config.num_workers, 4);
        assert_eq!(config.search.key_space, 1 << 56);
        assert_eq!(config.search.cipher, CipherKind::Des);
        assert_eq!(config.search.codec, Codec::Des56);
        assert_eq!(config.search.range_count(config.num_workers), 40);
        assert_eq!(config.search.priority, PriorityPolicy::Uniform);
        assert_eq!(config.pipeline.transform_threads, 2);
        assert_eq!(config.engine.reply_timeout, Duration::from_secs(30));
    }

    #[test]
    fn priority_seed_implies_random() {
        let Mode::Local(config) = local(&["--priority-seed", "7"]).unwrap() else {
            panic!("expected local mode");
        };
        assert_eq!(
            config.search.priority,
            PriorityPolicy::Random { seed: Some(7) }
        );
    }

    #[test]
    fn des56_caps_key_bits() {
        assert!(local(&["--key-bits", "57"]).is_err());
        assert!(local(&["--key-bits", "57", "--codec", "big-endian"]).is_ok());
        assert!(local(&["--key-bits", "0"]).is_err());
        assert!(local(&["--key-bits", "65", "--codec", "big-endian"]).is_err());
    }

    #[test]
    fn zero_values_are_refused() {
        assert!(local(&["--num-workers", "0"]).is_err());
        assert!(local(&["--queue-depth", "0"]).is_err());
        assert!(local(&["--transform-threads", "0"]).is_err());
        assert!(local(&["--max-grant", "0"]).is_err());
        assert!(local(&["--seed-ranges", "0"]).is_err());
        assert!(local(&["--ranges-per-worker", "0"]).is_err());
    }

    #[test]
    fn more_ranges_than_keys_is_accepted() {
        let Mode::Local(config) = local(&[
            "--key-bits",
            "2",
            "--num-workers",
            "8",
            "--ranges-per-worker",
            "3",
        ])
        .unwrap() else {
            panic!("expected local mode");
        };
        assert_eq!(config.search.key_space, 4);
        assert_eq!(config.search.range_count(config.num_workers), 24);
    }

    #[test]
    fn transform_threads_default_matches_the_library() {
        let Mode::Local(config) = local(&[]).unwrap() else {
            panic!("expected local mode");
        };
        assert_eq!(
            config.pipeline.transform_threads,
            PipelineConfig::default().transform_threads
        );
    }

    #[test]
    fn dispatch_and_work() {
        let mut args = vec!["keysweep", "dispatch", "--num-workers", "3"];
        args.extend(SEARCH);
        let Mode::Dispatch(config) = parse(&args).unwrap() else {
            panic!("expected dispatch mode");
        };
        assert_eq!(config.num_workers, 3);
        assert_eq!(config.listen_addr, "0.0.0.0:7117");
        assert_eq!(config.join_timeout, Duration::from_secs(60));
        assert_eq!(config.finish_timeout, Duration::from_secs(10));

        let Mode::Work(config) = parse(&[
            "keysweep",
            "work",
            "--dispatcher-addr",
            "10.0.0.1:9000",
            "--queue-depth",
            "64",
        ])
        .unwrap() else {
            panic!("expected work mode");
        };
        assert_eq!(config.dispatcher_addr, "10.0.0.1:9000");
        assert_eq!(config.pipeline.queue_depth, 64);
    }
}
