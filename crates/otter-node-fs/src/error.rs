//! Error types for otter-node-fs.
//!
//! Engine failures keep the Node-style shape (`code`, `syscall`, `path`) so
//! they can be surfaced to script callers unchanged.

use std::fmt;
use std::io;
use thiserror::Error;

/// Errors produced by the fs facade, the translator, and read streams.
#[derive(Debug, Clone, Error)]
pub enum FsError {
    /// Malformed caller input: stream range, mode, encoding, option types.
    #[error("EINVAL: {0}")]
    InvalidArgument(String),

    /// Open/close/read/write failure reported by the engine.
    #[error(transparent)]
    Handle(#[from] HandleError),

    /// Operation on a descriptor that is absent or already closed.
    #[error("EBADF: {syscall}: {}", describe_fd(.fd))]
    UnknownHandle { syscall: &'static str, fd: Option<u64> },

    /// Operation exposed for API shape only.
    #[error("ENOSYS: {0} is not implemented")]
    NotImplemented(&'static str),
}

fn describe_fd(fd: &Option<u64>) -> String {
    match fd {
        Some(fd) => format!("unknown file handle {fd}"),
        None => "no file handle".to_string(),
    }
}

impl FsError {
    pub fn invalid(detail: impl Into<String>) -> Self {
        Self::InvalidArgument(detail.into())
    }

    pub(crate) fn unknown_handle(syscall: &'static str, fd: Option<u64>) -> Self {
        Self::UnknownHandle { syscall, fd }
    }

    /// Node-style error code (`EINVAL`, `ENOENT`, ...).
    pub fn code(&self) -> &'static str {
        match self {
            FsError::InvalidArgument(_) => "EINVAL",
            FsError::Handle(e) => e.code,
            FsError::UnknownHandle { .. } => "EBADF",
            FsError::NotImplemented(_) => "ENOSYS",
        }
    }
}

/// Engine failure with syscall and path context.
#[derive(Debug, Clone)]
pub struct HandleError {
    pub code: &'static str,
    pub syscall: &'static str,
    pub path: Option<String>,
    pub dest: Option<String>,
    pub detail: String,
}

impl HandleError {
    pub fn from_io(syscall: &'static str, path: &str, err: io::Error) -> Self {
        Self {
            code: io_kind_to_code(err.kind()),
            syscall,
            path: Some(path.to_string()),
            dest: None,
            detail: err.to_string(),
        }
    }

    pub fn from_io_two(syscall: &'static str, from: &str, to: &str, err: io::Error) -> Self {
        Self {
            code: io_kind_to_code(err.kind()),
            syscall,
            path: Some(from.to_string()),
            dest: Some(to.to_string()),
            detail: err.to_string(),
        }
    }

    pub(crate) fn internal(syscall: &'static str, detail: impl Into<String>) -> Self {
        Self {
            code: "EIO",
            syscall,
            path: None,
            dest: None,
            detail: detail.into(),
        }
    }
}

impl fmt::Display for HandleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.path, &self.dest) {
            (Some(path), Some(dest)) => write!(
                f,
                "{}: {} '{}' -> '{}': {}",
                self.code, self.syscall, path, dest, self.detail
            ),
            (Some(path), None) => write!(
                f,
                "{}: {} '{}': {}",
                self.code, self.syscall, path, self.detail
            ),
            _ => write!(f, "{}: {}: {}", self.code, self.syscall, self.detail),
        }
    }
}

impl std::error::Error for HandleError {}

fn io_kind_to_code(kind: io::ErrorKind) -> &'static str {
    match kind {
        io::ErrorKind::NotFound => "ENOENT",
        io::ErrorKind::PermissionDenied => "EACCES",
        io::ErrorKind::AlreadyExists => "EEXIST",
        io::ErrorKind::InvalidInput => "EINVAL",
        io::ErrorKind::NotADirectory => "ENOTDIR",
        io::ErrorKind::IsADirectory => "EISDIR",
        io::ErrorKind::DirectoryNotEmpty => "ENOTEMPTY",
        io::ErrorKind::Unsupported => "ENOSYS",
        _ => "EIO",
    }
}

/// Result type alias for fs operations.
pub type FsResult<T> = Result<T, FsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_error_display_has_code_and_syscall() {
        let err = HandleError::from_io(
            "open",
            "/missing.txt",
            io::Error::new(io::ErrorKind::NotFound, "no such file"),
        );
        assert_eq!(err.to_string(), "ENOENT: open '/missing.txt': no such file");
        assert_eq!(FsError::from(err).code(), "ENOENT");
    }

    #[test]
    fn handle_error_display_for_two_paths() {
        let err = HandleError::from_io_two(
            "rename",
            "/a",
            "/b",
            io::Error::new(io::ErrorKind::AlreadyExists, "exists"),
        );
        assert_eq!(err.to_string(), "EEXIST: rename '/a' -> '/b': exists");
    }

    #[test]
    fn unknown_handle_is_ebadf() {
        let err = FsError::unknown_handle("close", Some(7));
        assert_eq!(err.code(), "EBADF");
        assert_eq!(err.to_string(), "EBADF: close: unknown file handle 7");

        let err = FsError::unknown_handle("close", None);
        assert!(err.to_string().contains("no file handle"));
    }

    #[test]
    fn invalid_argument_code() {
        assert_eq!(FsError::invalid("start must be <= end").code(), "EINVAL");
        assert_eq!(FsError::NotImplemented("realpath").code(), "ENOSYS");
    }
}
