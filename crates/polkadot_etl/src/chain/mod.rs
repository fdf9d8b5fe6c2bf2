//! Sidecar access: block fetching with retries, timestamp resolution, and input parsing.

pub mod fetch;
mod input;
mod resolve;

pub use fetch::{
    decode_block, BlockId, BlockSource, FetchConfig, FetchError, HttpTransport, RawResponse,
    ScriptedTransport, SidecarClient, SidecarEndpoint, Transport,
};
pub use input::{parse_time_rfc3339, parse_timestamp, validate_inputs, ExportRange, InputError};
pub use resolve::{resolve, resolve_range, ResolveConfig, ResolveError, SearchMode};
