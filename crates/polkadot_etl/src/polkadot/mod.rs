//! Polkadot-specific block model, chain constants, and transfer normalization.

pub mod block;
mod config;
mod normalize;
pub mod rules;
mod transfer;

pub use block::{BlockRecord, Event, Extrinsic, MethodId, Signature, Signer};
pub use config::{ChainConfig, ConfigError, POLKADOT_TREASURY, REDENOMINATION_HEIGHT};
pub use normalize::{normalize_block, resolve_signer, Advisory, NormalizeError, Normalized};
pub use transfer::{CanonicalTransfer, TransferType};
