//! Timestamp -> block height resolution over a remote block source.
//!
//! Two phases: a coarse binary search over `[1, head]` that stops once a probe
//! lands within `tolerance` of the target, then a scan of the two blocks on
//! either side of that probe. The picked block is confirmed against its outer
//! neighbour so that targets outside the chain fail instead of snapping to
//! genesis or head.

use crate::chain::fetch::{BlockId, BlockSource, FetchError};
use crate::chain::input::InputError;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{debug, info};

const TOLERANCE: Duration = Duration::from_secs(12);
const AVERAGE_BLOCK_INTERVAL: Duration = Duration::from_secs(6);
const NEIGHBORHOOD: u64 = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SearchMode {
    /// Smallest height whose timestamp is at or after the target.
    Forward,
    /// Largest height whose timestamp is at or before the target.
    Strict,
}

impl fmt::Display for SearchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchMode::Forward => f.write_str("FORWARD"),
            SearchMode::Strict => f.write_str("STRICT"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ResolveConfig {
    /// Coarse search stops once a probe is this close to the target.
    pub tolerance: Duration,
    /// STRICT accepts a block at most this far before the target.
    pub average_block_interval: Duration,
}

impl Default for ResolveConfig {
    fn default() -> Self {
        Self {
            tolerance: TOLERANCE,
            average_block_interval: AVERAGE_BLOCK_INTERVAL,
        }
    }
}

#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("fetch: {0}")]
    Fetch(#[from] FetchError),
    #[error("input: {0}")]
    Input(#[from] InputError),
    #[error("block #{block} has no timestamp")]
    MissingTimestamp { block: u64 },
    #[error("no block at {target} ({mode}); nearest probed block: {nearest:?}")]
    NoBlockAtTimestamp {
        target: OffsetDateTime,
        mode: SearchMode,
        nearest: Option<u64>,
    },
}

fn millis(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}

/// Memoized block timestamps (epoch ms) for one resolve call.
struct Probes<'a, S: ?Sized> {
    source: &'a S,
    seen: BTreeMap<u64, i64>,
}

impl<'a, S: BlockSource + ?Sized> Probes<'a, S> {
    fn new(source: &'a S) -> Self {
        Self {
            source,
            seen: BTreeMap::new(),
        }
    }

    async fn head(&mut self) -> Result<u64, ResolveError> {
        let block = self.source.block(BlockId::Head).await?;
        let ts = block
            .timestamp_ms()
            .ok_or(ResolveError::MissingTimestamp {
                block: block.number,
            })?;
        self.seen.insert(block.number, ts);
        Ok(block.number)
    }

    async fn ts(&mut self, height: u64) -> Result<i64, ResolveError> {
        if let Some(&ts) = self.seen.get(&height) {
            return Ok(ts);
        }
        let block = self.source.block(BlockId::Height(height)).await?;
        let ts = block
            .timestamp_ms()
            .ok_or(ResolveError::MissingTimestamp { block: height })?;
        debug!(height, timestamp_ms = ts, "probe");
        self.seen.insert(height, ts);
        Ok(ts)
    }

    fn nearest(&self, target: i64) -> Option<u64> {
        self.seen
            .iter()
            .min_by_key(|(_, ts)| ts.abs_diff(target))
            .map(|(h, _)| *h)
    }
}

/// Resolve `target` to a block height under `mode`.
pub async fn resolve<S: BlockSource + ?Sized>(
    source: &S,
    target: OffsetDateTime,
    mode: SearchMode,
    config: &ResolveConfig,
) -> Result<u64, ResolveError> {
    let target_ms = i64::try_from(target.unix_timestamp_nanos() / 1_000_000).unwrap_or(i64::MAX);
    let tolerance = millis(config.tolerance);
    let interval = millis(config.average_block_interval);

    let mut probes = Probes::new(source);
    let head = probes.head().await?;

    let (mut low, mut high) = (1, head);
    let mut mid = low;
    while high.saturating_sub(low) > 1 {
        mid = low + (high - low) / 2;
        let delta = probes.ts(mid).await? - target_ms;
        if delta < -tolerance {
            low = mid;
        } else if delta > tolerance {
            high = mid;
        } else {
            break;
        }
    }

    let from = mid.saturating_sub(NEIGHBORHOOD).max(1);
    let to = mid.saturating_add(NEIGHBORHOOD).min(head);
    for height in from..=to {
        probes.ts(height).await?;
    }
    let mut window = probes.seen.range(from..=to).map(|(&h, &ts)| (h, ts));
    let candidate = match mode {
        SearchMode::Forward => window
            .find(|&(_, ts)| ts >= target_ms && ts - target_ms <= tolerance)
            .map(|(h, _)| h),
        SearchMode::Strict => window
            .rev()
            .find(|&(_, ts)| ts <= target_ms && target_ms - ts <= interval)
            .map(|(h, _)| h),
    };

    let confirmed = match (mode, candidate) {
        (_, None) => None,
        (SearchMode::Forward, Some(1)) => (probes.ts(1).await? == target_ms).then_some(1),
        (SearchMode::Forward, Some(c)) => (probes.ts(c - 1).await? < target_ms).then_some(c),
        (SearchMode::Strict, Some(c)) if c == head => {
            (probes.ts(head).await? == target_ms).then_some(c)
        }
        (SearchMode::Strict, Some(c)) => (probes.ts(c + 1).await? > target_ms).then_some(c),
    };

    match confirmed {
        Some(height) => {
            info!(%target, %mode, height, probes = probes.seen.len(), "resolved timestamp");
            Ok(height)
        }
        None => Err(ResolveError::NoBlockAtTimestamp {
            target,
            mode,
            nearest: probes.nearest(target_ms),
        }),
    }
}

/// Block range covering `[start, end]`: FORWARD for the start, STRICT for the end.
/// When no block falls inside the interval the returned start exceeds the end.
pub async fn resolve_range<S: BlockSource + ?Sized>(
    source: &S,
    start: OffsetDateTime,
    end: OffsetDateTime,
    config: &ResolveConfig,
) -> Result<(u64, u64), ResolveError> {
    if start > end {
        return Err(InputError::InvalidRange {
            start: start.to_string(),
            end: end.to_string(),
        }
        .into());
    }
    let first = resolve(source, start, SearchMode::Forward, config).await?;
    let last = resolve(source, end, SearchMode::Strict, config).await?;
    Ok((first, last))
}
