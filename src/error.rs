//! Crate-wide error kinds.
//!
//! Every fallible public operation returns `Result<T,Error>`. The variants
//! are the semantic kinds named in the design: callers that only care about
//! routing (retry, surface to user, abort) can match on these without
//! digging into a particular engine's internal error type. Engines still
//! define their own focused error enums (e.g. [`crate::fs::dos3x::Error`])
//! and fold them in here with `#[from]` so detail is never lost.

use std::io;

/// Coarse error kind shared by every component in the stack.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Bad filename, bad access mode, bad geometry, or a part kind not
    /// supported by the target filesystem/archive.
    #[error("argument invalid: {0}")]
    ArgumentInvalid(String),

    /// Structural access refused: read-only, file already open,
    /// format-while-in-use, delete-while-open.
    #[error("I/O failure: {0}")]
    IoFailure(String),

    /// Missing entry or missing part.
    #[error("not found: {0}")]
    NotFound(String),

    /// Allocator cannot satisfy the request. Transactional: no partial
    /// allocation survives a failed call.
    #[error("disk full")]
    DiskFull,

    /// Volume or file marked dubious/damaged by a prior scan; operation
    /// suppressed.
    #[error("damaged: {0}")]
    Damaged(String),

    /// Container, archive, or filesystem signature/checksum failed
    /// validation during open.
    #[error("format error: {0}")]
    FormatError(String),

    /// API called in the wrong state (commit without start, open_part
    /// mid-transaction, etc).
    #[error("transaction state error: {0}")]
    TransactionState(String),

    /// Bubbled up from the underlying byte stream.
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn arg<S: Into<String>>(msg: S) -> Self {
        Error::ArgumentInvalid(msg.into())
    }
    pub fn io_failure<S: Into<String>>(msg: S) -> Self {
        Error::IoFailure(msg.into())
    }
    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        Error::NotFound(msg.into())
    }
    pub fn damaged<S: Into<String>>(msg: S) -> Self {
        Error::Damaged(msg.into())
    }
    pub fn format<S: Into<String>>(msg: S) -> Self {
        Error::FormatError(msg.into())
    }
    pub fn txn_state<S: Into<String>>(msg: S) -> Self {
        Error::TransactionState(msg.into())
    }
}
