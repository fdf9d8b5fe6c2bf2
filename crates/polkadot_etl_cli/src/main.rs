//! polkadot-etl CLI: export-blocks, enrich, resolve, latest-block.

use clap::{Args, Parser, Subcommand, ValueEnum};
use polkadot_etl::chain::{
    parse_timestamp, resolve, validate_inputs, FetchConfig, ResolveConfig, SearchMode,
    SidecarClient, SidecarEndpoint,
};
use polkadot_etl::export::{enrich_dir, export_range, ExportOptions, FaultPolicy};
use polkadot_etl::polkadot::ChainConfig;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use time::format_description::well_known::Rfc3339;
use tracing::{info, warn};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()))
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();
    match cli.command {
        Command::ExportBlocks(args) => run_export_blocks(args),
        Command::Enrich(args) => run_enrich(args),
        Command::Resolve(args) => run_resolve(args),
        Command::LatestBlock(args) => run_latest_block(args),
    }
}

#[derive(Parser)]
#[command(name = "polkadot-etl")]
#[command(about = "Export Polkadot blocks from a sidecar and normalize them into transfer rows")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Export raw blocks to `{output_dir}/{height}.json` by block or timestamp range.
    ExportBlocks(ExportArgs),
    /// Normalize exported block files into newline-delimited transfer rows.
    Enrich(EnrichArgs),
    /// Resolve a timestamp to a block height.
    Resolve(ResolveArgs),
    /// Print the head block height and its timestamp.
    LatestBlock(LatestArgs),
}

#[derive(Args)]
struct SidecarArgs {
    /// Sidecar base URL; a query string (API key) is forwarded but never logged.
    #[arg(long, env = "POLKADOT_SIDECAR_URL")]
    sidecar_url: String,
    /// Total attempts per block.
    #[arg(long, default_value_t = 5)]
    retries: u32,
    #[arg(long, default_value_t = 60)]
    max_delay_secs: u64,
}

impl SidecarArgs {
    fn client(&self) -> Result<SidecarClient, Box<dyn std::error::Error>> {
        let endpoint = SidecarEndpoint::parse(&self.sidecar_url)?;
        let config = FetchConfig {
            max_attempts: self.retries,
            max_delay: Duration::from_secs(self.max_delay_secs),
            ..FetchConfig::default()
        };
        info!(%endpoint, retries = self.retries, "using sidecar");
        Ok(SidecarClient::new(endpoint, config)?)
    }
}

#[derive(Args)]
struct SearchArgs {
    /// Coarse search stops within this many seconds of the target.
    #[arg(long, default_value_t = 12)]
    tolerance_secs: u64,
    #[arg(long, default_value_t = 6)]
    block_interval_secs: u64,
}

impl SearchArgs {
    fn config(&self) -> ResolveConfig {
        ResolveConfig {
            tolerance: Duration::from_secs(self.tolerance_secs),
            average_block_interval: Duration::from_secs(self.block_interval_secs),
        }
    }
}

#[derive(Parser)]
struct ExportArgs {
    #[command(flatten)]
    sidecar: SidecarArgs,
    #[command(flatten)]
    search: SearchArgs,
    #[arg(long)]
    start_block: Option<u64>,
    #[arg(long)]
    end_block: Option<u64>,
    /// Unix seconds, RFC3339, or `YYYY-MM-DD HH:MM:SS` (UTC).
    #[arg(long)]
    start_timestamp: Option<String>,
    #[arg(long)]
    end_timestamp: Option<String>,
    #[arg(long, default_value = "./data/blocks")]
    output_dir: PathBuf,
    /// Blocks fetched at once.
    #[arg(long, default_value_t = 1)]
    concurrency: usize,
    /// Stop on the first failed block instead of skipping it.
    #[arg(long)]
    strict: bool,
}

#[derive(Parser)]
struct EnrichArgs {
    #[arg(long, default_value = "./data/blocks")]
    input_dir: PathBuf,
    /// Output file; `-` writes to stdout.
    #[arg(long, default_value = "-")]
    output: String,
    #[arg(long)]
    start: u64,
    #[arg(long)]
    stop: u64,
    /// Stop on the first faulty block instead of skipping it.
    #[arg(long)]
    strict: bool,
    /// Chain config JSON; defaults to POLKADOT_ETL_CONFIG_PATH or ./config/polkadot.json.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    Forward,
    Strict,
}

impl From<ModeArg> for SearchMode {
    fn from(m: ModeArg) -> Self {
        match m {
            ModeArg::Forward => SearchMode::Forward,
            ModeArg::Strict => SearchMode::Strict,
        }
    }
}

#[derive(Parser)]
struct ResolveArgs {
    #[command(flatten)]
    sidecar: SidecarArgs,
    #[command(flatten)]
    search: SearchArgs,
    #[arg(long)]
    timestamp: String,
    #[arg(long, value_enum, default_value_t = ModeArg::Forward)]
    mode: ModeArg,
}

#[derive(Parser)]
struct LatestArgs {
    #[command(flatten)]
    sidecar: SidecarArgs,
}

fn policy(strict: bool) -> FaultPolicy {
    if strict {
        FaultPolicy::Abort
    } else {
        FaultPolicy::Skip
    }
}

fn run_export_blocks(args: ExportArgs) -> Result<(), Box<dyn std::error::Error>> {
    let start_timestamp = args
        .start_timestamp
        .as_deref()
        .map(parse_timestamp)
        .transpose()?;
    let end_timestamp = args
        .end_timestamp
        .as_deref()
        .map(parse_timestamp)
        .transpose()?;
    let range = validate_inputs(args.start_block, args.end_block, start_timestamp, end_timestamp)?;
    let client = Arc::new(args.sidecar.client()?);
    let options = ExportOptions {
        concurrency: args.concurrency,
        policy: policy(args.strict),
    };
    info!(%range, output_dir = %args.output_dir.display(), "export started");
    let rt = tokio::runtime::Runtime::new()?;
    let summary = rt.block_on(export_range(
        client,
        &args.output_dir,
        range,
        &args.search.config(),
        &options,
    ))?;
    if !summary.failed.is_empty() {
        warn!(failed = ?summary.failed, "some blocks were not exported");
    }
    Ok(())
}

fn run_enrich(args: EnrichArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = match &args.config {
        Some(path) => ChainConfig::load_from_path(path)?,
        None => ChainConfig::load()?,
    };
    let mut out: Box<dyn Write> = if args.output == "-" {
        Box::new(BufWriter::new(std::io::stdout().lock()))
    } else {
        Box::new(BufWriter::new(std::fs::File::create(&args.output)?))
    };
    let summary = enrich_dir(
        &args.input_dir,
        args.start,
        args.stop,
        &config,
        policy(args.strict),
        &mut out,
    )?;
    if !summary.failed.is_empty() {
        warn!(failed = ?summary.failed, "some blocks were skipped");
    }
    Ok(())
}

fn run_resolve(args: ResolveArgs) -> Result<(), Box<dyn std::error::Error>> {
    let target = parse_timestamp(&args.timestamp)?;
    let client = args.sidecar.client()?;
    let rt = tokio::runtime::Runtime::new()?;
    let height = rt.block_on(resolve(
        &client,
        target,
        args.mode.into(),
        &args.search.config(),
    ))?;
    println!("{height}");
    Ok(())
}

fn run_latest_block(args: LatestArgs) -> Result<(), Box<dyn std::error::Error>> {
    let client = args.sidecar.client()?;
    let rt = tokio::runtime::Runtime::new()?;
    let (height, timestamp) = rt.block_on(client.latest_block())?;
    let timestamp = timestamp.map(|t| t.format(&Rfc3339)).transpose()?;
    println!(
        "{}",
        serde_json::json!({ "height": height, "timestamp": timestamp })
    );
    Ok(())
}
