//! CLI entry point for the OAI-PMH mirror.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, IsTerminal, Write};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use oai_mirror::config::DEFAULT_CACHE_DIR;
use oai_mirror::{BatchEngine, CacheShard, Config, Request, RetryPolicy, read_endpoint_list};
use tracing::{debug, info, warn};

mod cli;

use cli::{Args, Command, DirnameArgs, HarvestArgs, InfoArgs, InfoBatchArgs, SyncArgs};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    // stdout carries the harvested XML and JSON, logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    debug!(?args, "CLI arguments parsed");

    let config = build_config(&args);
    match args.command {
        Command::Harvest(harvest) => run_harvest(config, harvest).await,
        Command::Info(info) => run_info(&config, &info).await,
        Command::Dirname(dirname) => run_dirname(&config, dirname),
        Command::Sync(sync) => run_sync(&config, sync).await,
        Command::InfoBatch(batch) => run_info_batch(&config, batch).await,
    }
}

fn build_config(args: &Args) -> Config {
    let mut config = Config::default();
    config.transport.request_timeout = Duration::from_secs(args.request_timeout);
    config.transport.retry = RetryPolicy::with_max_attempts(args.retries + 1);
    config.max_requests = args.max_requests;
    config.cache.root = args.cache_dir.clone().unwrap_or_else(default_cache_root);
    config
}

fn default_cache_root() -> PathBuf {
    match std::env::var_os("HOME") {
        Some(home) => PathBuf::from(home).join(DEFAULT_CACHE_DIR),
        None => PathBuf::from(DEFAULT_CACHE_DIR),
    }
}

async fn run_harvest(mut config: Config, args: HarvestArgs) -> Result<()> {
    if let Some(root) = args.root {
        config.harvest.root_tag = Some(root);
    }
    if let Some(unit) = args.window {
        config.harvest.window_unit = unit;
    }

    let mut request = Request::new(args.endpoint, args.verb);
    request.from = args.from;
    request.until = args.until;
    request.set = args.set;
    request.prefix = args.prefix;
    request.identifier = args.identifier;

    let harvester = config.harvester()?;
    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    let stats = harvester
        .harvest(&request, &mut out)
        .await
        .with_context(|| format!("harvesting {} failed", request.endpoint))?;
    out.flush()?;

    info!(
        windows = stats.windows,
        cache_hits = stats.cache_hits,
        fetched = stats.fetched,
        "done"
    );
    Ok(())
}

async fn run_info(config: &Config, args: &InfoArgs) -> Result<()> {
    let describer = config.describer()?;
    let timeout = Duration::from_secs(args.timeout);
    let (info, outcome) = match describer.describe(&args.endpoint, timeout).await {
        Ok(info) => (info, Ok(())),
        Err(timed_out) => {
            let message = timed_out.to_string();
            (timed_out.into_info(), Err(message))
        }
    };

    let stdout = io::stdout();
    let mut out = stdout.lock();
    serde_json::to_writer_pretty(&mut out, &info)?;
    writeln!(out)?;

    if let Err(message) = outcome {
        bail!("{message}");
    }
    Ok(())
}

fn run_dirname(config: &Config, args: DirnameArgs) -> Result<()> {
    let prefix = args
        .prefix
        .unwrap_or_else(|| config.harvest.default_prefix.clone());
    let shard = CacheShard::new(
        &args.endpoint,
        args.verb,
        &prefix,
        args.set.as_deref().unwrap_or_default(),
    )?;
    println!("{}", config.cache().directory(&shard).display());
    Ok(())
}

async fn run_sync(config: &Config, args: SyncArgs) -> Result<()> {
    let Some(endpoints) = load_endpoints(args.file)? else {
        return Ok(());
    };

    let engine = BatchEngine::new(args.workers)?;
    let stats = engine
        .sync_endpoints(&config.harvester()?, endpoints)
        .await?;

    if stats.failed() > 0 {
        bail!("{} of {} endpoints failed to sync", stats.failed(), stats.total());
    }
    Ok(())
}

async fn run_info_batch(config: &Config, args: InfoBatchArgs) -> Result<()> {
    let Some(endpoints) = load_endpoints(args.file)? else {
        return Ok(());
    };

    let engine = BatchEngine::new(args.workers)?;
    let stdout = io::stdout();
    let mut out = stdout.lock();
    let mut write_error = None;
    let stats = engine
        .describe_endpoints(
            &config.describer()?,
            endpoints,
            Duration::from_secs(args.timeout),
            |info| {
                if write_error.is_some() {
                    return;
                }
                let written = serde_json::to_writer(&mut out, &info)
                    .map_err(io::Error::from)
                    .and_then(|()| writeln!(out));
                if let Err(e) = written {
                    write_error = Some(e);
                }
            },
        )
        .await?;

    if let Some(e) = write_error {
        return Err(e).context("writing repository info failed");
    }
    if stats.failed() > 0 {
        warn!(
            failed = stats.failed(),
            total = stats.total(),
            "some repositories did not answer in time"
        );
    }
    Ok(())
}

/// Reads the endpoint list from `file`, or from stdin when it is piped.
/// Returns `None` when there is nothing to read.
fn load_endpoints(file: Option<PathBuf>) -> Result<Option<Vec<String>>> {
    let endpoints = match file {
        Some(path) => {
            let reader = File::open(&path)
                .with_context(|| format!("opening {} failed", path.display()))?;
            read_endpoint_list(BufReader::new(reader))?
        }
        None if !io::stdin().is_terminal() => read_endpoint_list(io::stdin().lock())?,
        None => {
            info!("No input provided. Pipe endpoints via stdin or pass a file.");
            info!("Example: echo 'https://example.org/oai' | oai-mirror sync");
            return Ok(None);
        }
    };

    if endpoints.is_empty() {
        info!("No endpoints found in input");
        return Ok(None);
    }
    info!(endpoints = endpoints.len(), "Loaded endpoint list");
    Ok(Some(endpoints))
}
