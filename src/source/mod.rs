//! Filesystem side of PDF operations: path checks, per-path locking and
//! atomic commits

pub mod commit;
pub mod lock;
pub mod resolver;

pub use commit::{AtomicCommitter, Committer};
pub use lock::{PathGuard, PathLocks};
pub use resolver::{resolve_path, validate_path_access, Access};
