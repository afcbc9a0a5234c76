//! Shared infrastructure utilities for Bespoke.
//!
//! Cross-cutting helpers that multiple Bespoke crates need but that don't
//! belong in the domain-pure `bespoke-types` crate:
//!
//! - **`atomic_write`**: Crash-safe file persistence (temp + rename)
//! - **`hashing`**: SHA-256 content fingerprints
//! - **`format`**: Human-readable sizes for reports and summaries

pub mod atomic_write;
pub mod format;
pub mod hashing;

pub use atomic_write::{
    AtomicWriteOptions, FileSyncPolicy, PersistMode, atomic_write, atomic_write_with_options,
    recover_bak_file,
};
pub use format::format_bytes;
pub use hashing::{sha256_bytes, sha256_file};
