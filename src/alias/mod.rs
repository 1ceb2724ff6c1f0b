//! Human names for coordinate keys

pub mod resolver;
pub mod sidecar;

pub use resolver::{
    erase_all, resolve, resolve_batch, AliasIndex, BatchResolution, ResolvedEntry, SkipReason, SkippedEntry,
    StaleAlias,
};
pub use sidecar::{sidecar_path, AliasMap};
