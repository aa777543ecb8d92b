//! Recoverable failures of the lifecycle engine.
//!
//! Only header recognition can fail recoverably: it is the one path a buggy or
//! hostile pointer from user code can reach. Everything else is a contract
//! violation and panics.

use thiserror::Error;

/// Why a pointer could not be recognized as an instrumented object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum ExtentError {
    #[error("null pointer")]
    NullPointer,
    #[error("pointer {0:#x} is not granule aligned")]
    Misaligned(usize),
    /// The shadow table does not mark the header bytes as an object header,
    /// so they were never written by this engine.
    #[error("no instrumented object header at {0:#x}")]
    NotInstrumented(usize),
    #[error("bad header magic {0:#06x}")]
    BadMagic(u16),
    #[error("header checksum mismatch at {0:#x}")]
    BadChecksum(usize),
    #[error("invalid object state {0}")]
    BadState(u8),
    #[error("inconsistent header layout at {0:#x}")]
    BadLayout(usize),
}
