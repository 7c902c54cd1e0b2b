use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Status codes a caller can observe. Every client-facing failure mode maps
/// to one of these; internal invariant violations use `assert!`/`debug_assert!`
/// at the call site instead of a variant here.
#[derive(Debug, Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not found")]
    NotFound,

    #[error("already exists")]
    AlreadyExists,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not supported: {0}")]
    NotSupported(&'static str),

    #[error("not implemented: {0}")]
    NotImplemented(&'static str),

    #[error("io error: {0}")]
    IoError(String),

    #[error("no space left")]
    NoSpace,

    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("result size over limit")]
    ResultSizeOverLimit,

    #[error("self-loop edges are not supported")]
    UnsupportedSelfLoop,
}
