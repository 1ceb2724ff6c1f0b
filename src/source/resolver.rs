//! Path validation for PDF operations

use crate::error::{Error, Result};
use std::fs::{File, OpenOptions};
use std::io::Read;
use std::path::{Path, PathBuf};

/// Access an operation needs on the PDF file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    ReadWrite,
}

/// Validate that a path is within allowed resource directories.
/// If no resource_dirs are configured, all paths are allowed.
pub fn validate_path_access(path: &str, resource_dirs: &[String]) -> Result<PathBuf> {
    if resource_dirs.is_empty() {
        return Ok(PathBuf::from(path));
    }

    let canonical = std::fs::canonicalize(path).map_err(|_| Error::PathAccessDenied {
        path: path.to_string(),
    })?;

    for dir in resource_dirs {
        if let Ok(canonical_dir) = std::fs::canonicalize(dir) {
            if canonical.starts_with(&canonical_dir) {
                return Ok(canonical);
            }
        }
    }

    Err(Error::PathAccessDenied {
        path: path.to_string(),
    })
}

/// Check that `path` names an existing, accessible PDF.
///
/// Each failure is reported as its own error kind: missing file, missing
/// permission, wrong extension, or a file without a PDF header.
pub fn resolve_path<P: AsRef<Path>>(path: P, access: Access) -> Result<PathBuf> {
    let path = path.as_ref();
    let display = path.display().to_string();

    if !path.exists() {
        return Err(Error::PdfNotFound { path: display });
    }

    let is_pdf = path.is_file()
        && path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));
    if !is_pdf {
        return Err(Error::NotAPdf { path: display });
    }

    let mut file = File::open(path).map_err(|e| denied_or_io(e, &display, "read"))?;
    let mut header = [0u8; 5];
    let read = file.read(&mut header).map_err(Error::Io)?;
    if read < 5 || &header != b"%PDF-" {
        return Err(Error::UnreadablePdf {
            reason: format!("{} has no %PDF- header", display),
        });
    }

    if access == Access::ReadWrite {
        OpenOptions::new()
            .write(true)
            .open(path)
            .map_err(|e| denied_or_io(e, &display, "write"))?;
    }

    Ok(path.to_path_buf())
}

fn denied_or_io(e: std::io::Error, path: &str, access: &'static str) -> Error {
    if e.kind() == std::io::ErrorKind::PermissionDenied {
        Error::PermissionDenied {
            path: path.to_string(),
            access,
        }
    } else {
        Error::Io(e)
    }
}
