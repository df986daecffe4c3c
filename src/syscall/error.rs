//! The executive's error taxonomy.
//!
//! Every syscall returns either its success payload or one of these kinds in
//! the error channel. The kernel never panics on a caller-induced error.

use thiserror::Error as ThisError;

#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
pub enum Error {
    /// Token not in the caller's handle table.
    #[error("invalid handle")]
    InvalidHandle,
    /// Synapse check or access-mask check failed.
    #[error("access denied")]
    AccessDenied,
    /// Object lacks a dispatch header.
    #[error("not waitable")]
    NotWaitable,
    /// Attempt to wait at DISPATCH_LEVEL or above.
    #[error("cannot block")]
    CannotBlock,
    /// Wait deadline expired before satisfaction.
    #[error("timeout")]
    Timeout,
    /// Mutex inherited from a dead owner.
    #[error("abandoned")]
    Abandoned,
    /// Write on a pipe whose read end is closed.
    #[error("broken pipe")]
    BrokenPipe,
    /// Name lookup failed in the object namespace.
    #[error("no such object")]
    NoSuchObject,
    /// File permission bits rejected the caller.
    #[error("permission denied")]
    PermissionDenied,
    /// The backing filesystem or driver reported a missing path.
    #[error("file not found")]
    FileNotFound,
    /// A device driver returned an unspecified failure.
    #[error("driver error: {0}")]
    DriverError(String),
    /// A bounded queue refused a non-blocking operation while full.
    #[error("queue full")]
    QueueFull,
    /// A bounded queue refused a non-blocking operation while empty.
    #[error("queue empty")]
    QueueEmpty,
    /// Message queue payload exceeded the configured maximum.
    #[error("message too large")]
    MsgTooLarge,
    /// Target pid absent or dead.
    #[error("no such process")]
    NoSuchProcess,
    /// Override owner died while the request was pending.
    #[error("syscall handler gone")]
    SyscallHandlerGone,
    /// Malformed or out-of-range syscall argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
}

pub type Result<T> = core::result::Result<T, Error>;
