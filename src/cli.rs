//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use chrono::NaiveDate;
use clap::builder::TypedValueParser;
use clap::{Parser, Subcommand};

use oai_mirror::{DEFAULT_MAX_REQUESTS, DEFAULT_WORKERS, Verb, WindowUnit};

/// Default retries after the first attempt.
const DEFAULT_RETRIES: u32 = 2;

/// Default per-attempt timeout in seconds.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120;

/// Default repository description deadline in seconds.
const DEFAULT_INFO_TIMEOUT_SECS: u64 = 10;

/// Harvest and mirror OAI-PMH repositories.
///
/// Harvested windows are cached on disk, so repeated and incremental runs
/// only fetch what is missing.
#[derive(Parser, Debug)]
#[command(name = "oai-mirror")]
#[command(author, version, about)]
pub struct Args {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Retries for transient failures after the first attempt (0-10)
    #[arg(long, global = true, default_value_t = DEFAULT_RETRIES, value_parser = clap::value_parser!(u32).range(0..=10))]
    pub retries: u32,

    /// Timeout for a single HTTP attempt in seconds (1-3600)
    #[arg(long, global = true, default_value_t = DEFAULT_REQUEST_TIMEOUT_SECS, value_parser = clap::value_parser!(u64).range(1..=3600))]
    pub request_timeout: u64,

    /// Maximum HTTP requests per resumption chain (0 for unlimited)
    #[arg(long, global = true, default_value_t = DEFAULT_MAX_REQUESTS)]
    pub max_requests: usize,

    /// Cache directory (default: ~/.oai-mirror)
    #[arg(long, global = true)]
    pub cache_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Harvest a repository and write XML to stdout
    Harvest(HarvestArgs),

    /// Describe a repository as JSON
    Info(InfoArgs),

    /// Print the cache directory used for a request
    Dirname(DirnameArgs),

    /// Warm the cache for a list of endpoints
    Sync(SyncArgs),

    /// Describe a list of endpoints, one JSON line each
    InfoBatch(InfoBatchArgs),
}

#[derive(clap::Args, Debug)]
pub struct HarvestArgs {
    /// Repository base URL
    pub endpoint: String,

    /// Protocol verb
    #[arg(long, default_value = "ListRecords")]
    pub verb: Verb,

    /// Start date (YYYY-MM-DD, default: repository's earliest datestamp)
    #[arg(long)]
    pub from: Option<NaiveDate>,

    /// End date (YYYY-MM-DD, default: today)
    #[arg(long)]
    pub until: Option<NaiveDate>,

    /// Set spec to restrict the harvest to
    #[arg(long)]
    pub set: Option<String>,

    /// Metadata prefix (default: oai_dc)
    #[arg(long)]
    pub prefix: Option<String>,

    /// Record identifier, for GetRecord
    #[arg(long)]
    pub identifier: Option<String>,

    /// Wrap the output in a root element with this name
    #[arg(long)]
    pub root: Option<String>,

    /// Window size: day, week, month or year
    #[arg(long)]
    pub window: Option<WindowUnit>,
}

#[derive(clap::Args, Debug)]
pub struct InfoArgs {
    /// Repository base URL
    pub endpoint: String,

    /// Deadline in seconds
    #[arg(long, default_value_t = DEFAULT_INFO_TIMEOUT_SECS)]
    pub timeout: u64,
}

#[derive(clap::Args, Debug)]
pub struct DirnameArgs {
    /// Repository base URL
    pub endpoint: String,

    /// Protocol verb
    #[arg(long, default_value = "ListRecords")]
    pub verb: Verb,

    /// Set spec
    #[arg(long)]
    pub set: Option<String>,

    /// Metadata prefix (default: oai_dc)
    #[arg(long)]
    pub prefix: Option<String>,
}

#[derive(clap::Args, Debug)]
pub struct SyncArgs {
    /// File with one endpoint per line (default: stdin)
    pub file: Option<PathBuf>,

    /// Endpoints processed concurrently (1-64)
    #[arg(short = 'w', long, default_value_t = DEFAULT_WORKERS, value_parser = clap::value_parser!(u16).range(1..=64).map(usize::from))]
    pub workers: usize,
}

#[derive(clap::Args, Debug)]
pub struct InfoBatchArgs {
    /// File with one endpoint per line (default: stdin)
    pub file: Option<PathBuf>,

    /// Endpoints processed concurrently (1-64)
    #[arg(short = 'w', long, default_value_t = DEFAULT_WORKERS, value_parser = clap::value_parser!(u16).range(1..=64).map(usize::from))]
    pub workers: usize,

    /// Deadline per endpoint in seconds
    #[arg(long, default_value_t = DEFAULT_INFO_TIMEOUT_SECS)]
    pub timeout: u64,
}
