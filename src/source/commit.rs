//! Committing edited documents to disk

use crate::error::{Error, Result};
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

/// Replaces a file's contents with new bytes.
pub trait Committer: Send + Sync {
    /// On error the file at `path` must be unchanged.
    fn commit(&self, path: &Path, data: &[u8]) -> Result<()>;
}

/// Write to a temporary file in the same directory, flush it, then rename
/// it over the target.
#[derive(Debug, Default, Clone, Copy)]
pub struct AtomicCommitter;

impl Committer for AtomicCommitter {
    fn commit(&self, path: &Path, data: &[u8]) -> Result<()> {
        let failure = |reason: String| Error::WriteFailure {
            path: path.display().to_string(),
            reason,
        };
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));

        let mut staged = NamedTempFile::new_in(dir).map_err(|e| failure(e.to_string()))?;
        staged
            .write_all(data)
            .and_then(|_| staged.as_file().sync_all())
            .map_err(|e| failure(e.to_string()))?;

        if let Ok(metadata) = std::fs::metadata(path) {
            // keep the original mode; a failure here is not worth aborting for
            let _ = std::fs::set_permissions(staged.path(), metadata.permissions());
        }

        staged
            .persist(path)
            .map_err(|e| failure(e.error.to_string()))?;
        tracing::debug!(path = %path.display(), bytes = data.len(), "Committed document");
        Ok(())
    }
}
