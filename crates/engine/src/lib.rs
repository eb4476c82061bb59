//! Engine layer for AxonDB
//!
//! Owns the registry of open spaces ([`manager::SpaceManager`]) and the
//! credential store ([`auth::AuthStore`]). Both persist JSON documents under
//! the instance base directory with atomic rewrites.

pub mod auth;
pub mod manager;

pub use auth::AuthStore;
pub use manager::{Space, SpaceManager};

use axon_core::error::Result;
use std::path::Path;

/// Atomically replace `path` with `contents` (temp file + rename + fsync).
pub(crate) fn atomic_write(path: &Path, contents: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, contents)?;
    let file = std::fs::File::open(&tmp)?;
    file.sync_all()?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}
