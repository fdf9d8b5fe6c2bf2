//! polkadot_etl — Polkadot sidecar blocks to normalized transfer rows.
//!
//! Fetches blocks from a Substrate sidecar with retries, resolves timestamps to
//! block heights, and decodes balance-moving events into canonical rows.
//! Read-only; keeps no state between runs beyond the files it writes.

pub mod chain;
pub mod export;
pub mod polkadot;

pub use chain::{
    BlockId, BlockSource, FetchConfig, FetchError, ResolveConfig, SearchMode, SidecarClient,
    SidecarEndpoint,
};
pub use export::{EnrichSummary, ExportError, ExportOptions, ExportSummary, FaultPolicy};
pub use polkadot::{
    normalize_block, Advisory, BlockRecord, CanonicalTransfer, ChainConfig, NormalizeError,
    Normalized, TransferType,
};
