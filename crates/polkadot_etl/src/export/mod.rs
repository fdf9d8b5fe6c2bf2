//! Export (sidecar -> `{height}.json`) and enrich (`{height}.json` -> NDJSON rows) pipelines.

use crate::chain::{
    resolve_range, BlockId, BlockSource, ExportRange, FetchError, InputError, ResolveConfig,
    ResolveError,
};
use crate::polkadot::{normalize_block, BlockRecord, ChainConfig, NormalizeError, Normalized};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use time::OffsetDateTime;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// What to do when one block fails.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FaultPolicy {
    /// Log, record the height, continue with the next block.
    #[default]
    Skip,
    /// Stop the whole run on the first failure.
    Abort,
}

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("input: {0}")]
    Input(#[from] InputError),
    #[error("fetch: {0}")]
    Fetch(#[from] FetchError),
    #[error("resolve: {0}")]
    Resolve(#[from] ResolveError),
    #[error("normalize: {0}")]
    Normalize(#[from] NormalizeError),
    #[error("{}: {source}", path.display())]
    Io { path: PathBuf, source: io::Error },
    #[error("parse {}: {source}", path.display())]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("write output: {0}")]
    Write(io::Error),
    #[error("serialize: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("export task: {0}")]
    Join(#[from] tokio::task::JoinError),
}

fn io_at(path: &Path) -> impl FnOnce(io::Error) -> ExportError + '_ {
    move |source| ExportError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[derive(Clone, Debug)]
pub struct ExportOptions {
    /// Blocks fetched at once.
    pub concurrency: usize,
    pub policy: FaultPolicy,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            concurrency: 1,
            policy: FaultPolicy::Skip,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExportSummary {
    pub written: usize,
    pub skipped_existing: usize,
    /// Heights that failed under [`FaultPolicy::Skip`], ascending.
    pub failed: Vec<u64>,
}

pub fn block_path(dir: &Path, height: u64) -> PathBuf {
    dir.join(format!("{height}.json"))
}

/// A block counts as exported when its file parses and has `extrinsics`.
pub async fn is_exported(path: &Path) -> bool {
    tokio::fs::read(path)
        .await
        .ok()
        .and_then(|bytes| serde_json::from_slice::<serde_json::Value>(&bytes).ok())
        .is_some_and(|v| v.get("extrinsics").is_some())
}

fn check_range(start: u64, end: u64) -> Result<(), InputError> {
    if start == 0 {
        return Err(InputError::InvalidBlock("0".to_string()));
    }
    if start > end {
        return Err(InputError::InvalidRange {
            start: start.to_string(),
            end: end.to_string(),
        });
    }
    Ok(())
}

async fn export_one<S: BlockSource + ?Sized>(
    source: &S,
    height: u64,
    path: &Path,
) -> Result<(), ExportError> {
    let value = source.block_json(BlockId::Height(height)).await?;
    let body = serde_json::to_vec(&value)?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, &body).await.map_err(io_at(&tmp))?;
    tokio::fs::rename(&tmp, path).await.map_err(io_at(path))?;
    debug!(height, "exported block");
    Ok(())
}

type Outcome = (u64, Result<(), ExportError>);

fn settle(
    outcome: Outcome,
    policy: FaultPolicy,
    summary: &mut ExportSummary,
    tasks: &mut JoinSet<Outcome>,
) -> Result<(), ExportError> {
    match outcome {
        (_, Ok(())) => {
            summary.written += 1;
            Ok(())
        }
        (height, Err(e)) => match policy {
            FaultPolicy::Abort => {
                tasks.abort_all();
                Err(e)
            }
            FaultPolicy::Skip => {
                error!(height, error = %e, "skipping block");
                summary.failed.push(height);
                Ok(())
            }
        },
    }
}

/// Export blocks `start..=end` into `out_dir`, skipping blocks already on disk.
pub async fn export_blocks_by_number<S: BlockSource + 'static>(
    source: Arc<S>,
    out_dir: &Path,
    start: u64,
    end: u64,
    options: &ExportOptions,
) -> Result<ExportSummary, ExportError> {
    check_range(start, end)?;
    tokio::fs::create_dir_all(out_dir)
        .await
        .map_err(io_at(out_dir))?;

    let limit = options.concurrency.max(1);
    let mut summary = ExportSummary::default();
    let mut tasks = JoinSet::new();
    for height in start..=end {
        let path = block_path(out_dir, height);
        if is_exported(&path).await {
            debug!(height, "already exported");
            summary.skipped_existing += 1;
            continue;
        }
        while tasks.len() >= limit {
            match tasks.join_next().await {
                Some(joined) => settle(joined?, options.policy, &mut summary, &mut tasks)?,
                None => break,
            }
        }
        let source = Arc::clone(&source);
        tasks.spawn(async move {
            let result = export_one(source.as_ref(), height, &path).await;
            (height, result)
        });
    }
    while let Some(joined) = tasks.join_next().await {
        settle(joined?, options.policy, &mut summary, &mut tasks)?;
    }

    summary.failed.sort_unstable();
    info!(
        start,
        end,
        written = summary.written,
        skipped = summary.skipped_existing,
        failed = summary.failed.len(),
        "export finished"
    );
    Ok(summary)
}

/// Resolve a timestamp range to blocks (FORWARD start, STRICT end), then export them.
pub async fn export_blocks_by_timestamp<S: BlockSource + 'static>(
    source: Arc<S>,
    out_dir: &Path,
    start: OffsetDateTime,
    end: OffsetDateTime,
    resolve: &ResolveConfig,
    options: &ExportOptions,
) -> Result<ExportSummary, ExportError> {
    let (first, last) = resolve_range(source.as_ref(), start, end, resolve).await?;
    if first > last {
        info!(%start, %end, "no blocks in timestamp range");
        return Ok(ExportSummary::default());
    }
    info!(%start, %end, first, last, "timestamp range resolved");
    export_blocks_by_number(source, out_dir, first, last, options).await
}

pub async fn export_range<S: BlockSource + 'static>(
    source: Arc<S>,
    out_dir: &Path,
    range: ExportRange,
    resolve: &ResolveConfig,
    options: &ExportOptions,
) -> Result<ExportSummary, ExportError> {
    match range {
        ExportRange::Blocks { start, end } => {
            export_blocks_by_number(source, out_dir, start, end, options).await
        }
        ExportRange::Timestamps { start, end } => {
            export_blocks_by_timestamp(source, out_dir, start, end, resolve, options).await
        }
    }
}

/// Normalize one exported block file.
pub fn enrich_block_file(path: &Path, config: &ChainConfig) -> Result<Normalized, ExportError> {
    let content = std::fs::read_to_string(path).map_err(io_at(path))?;
    let block: BlockRecord =
        serde_json::from_str(&content).map_err(|source| ExportError::Json {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(normalize_block(&block, config)?)
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EnrichSummary {
    pub blocks: usize,
    pub transfers: usize,
    pub advisories: usize,
    pub failed: Vec<u64>,
}

/// Normalize `{in_dir}/{height}.json` for `start..=stop`, writing one JSON row per line.
/// Output write failures always abort, whatever the policy.
pub fn enrich_dir<W: Write>(
    in_dir: &Path,
    start: u64,
    stop: u64,
    config: &ChainConfig,
    policy: FaultPolicy,
    out: &mut W,
) -> Result<EnrichSummary, ExportError> {
    check_range(start, stop)?;
    let mut summary = EnrichSummary::default();
    for height in start..=stop {
        let normalized = match enrich_block_file(&block_path(in_dir, height), config) {
            Ok(normalized) => normalized,
            Err(e) if policy == FaultPolicy::Abort => return Err(e),
            Err(e) => {
                error!(height, error = %e, "skipping block");
                summary.failed.push(height);
                continue;
            }
        };
        for advisory in &normalized.advisories {
            warn!(%advisory, "advisory");
        }
        for row in &normalized.transfers {
            serde_json::to_writer(&mut *out, row)?;
            out.write_all(b"\n").map_err(ExportError::Write)?;
        }
        summary.blocks += 1;
        summary.transfers += normalized.transfers.len();
        summary.advisories += normalized.advisories.len();
    }
    out.flush().map_err(ExportError::Write)?;
    info!(
        start,
        stop,
        blocks = summary.blocks,
        transfers = summary.transfers,
        failed = summary.failed.len(),
        "enrich finished"
    );
    Ok(summary)
}
