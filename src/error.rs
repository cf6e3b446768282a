//! The error kinds named by the on-disk core, plus device I/O errors from
//! the block-device port. Propagated with `Result`/`?`; the CLI boundary
//! (see `cli`) is the only place that flattens these into a numeric status.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("no such file or directory")]
    NoEnt,
    #[error("file or directory already exists")]
    Exist,
    #[error("directory not empty")]
    NotEmpty,
    #[error("file too large")]
    FBig,
    #[error("no space left on device")]
    NoSpc,
    #[error("bad file descriptor")]
    BadF,
    #[error("operation not permitted in current fd mode")]
    Access,
    #[error("malformed path")]
    Inval,
    #[error("device I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("volume is not mounted or not formatted")]
    NotMounted,
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// The POSIX-ish status this error maps to at the CLI boundary: every
    /// public operation fails with -1, so this exists only for readable
    /// diagnostics, not for distinguishing exit codes.
    pub fn errno_name(&self) -> &'static str {
        match self {
            Error::NoEnt => "ENOENT",
            Error::Exist => "EEXIST",
            Error::NotEmpty => "ENOTEMPTY",
            Error::FBig => "EFBIG",
            Error::NoSpc => "ENOSPC",
            Error::BadF => "EBADF",
            Error::Access => "EACCES",
            Error::Inval => "EINVAL",
            Error::Io(_) => "EIO",
            Error::NotMounted => "EINVAL",
        }
    }
}
