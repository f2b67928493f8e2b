//! # Kernel Result Codes
//!
//! Ordinary API failures are reported as [`KernelError`] values for the
//! caller to handle. Violations of the scheduler's own invariants are a
//! separate class ([`SchedError`]) that the kernel escalates to a halt.

use core::fmt;

/// Error returned by the kernel API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    /// The pid is out of range, unregistered, or not valid for the request.
    InvalidPid,
    /// The priority is out of range or reserved for the idle process.
    InvalidPriority,
    /// The address does not name a block of the pool.
    InvalidAddress,
    /// The block is already free.
    DoubleRelease,
    /// The block is free and its contents may not be accessed.
    NotAllocated,
    /// The pool is exhausted and the caller may not block.
    Unavailable,
    /// The request would block in interrupt context.
    WouldBlock,
    /// The operation is not allowed from the calling context.
    NotPermitted,
    /// A process is already registered under this pid.
    AlreadyRegistered,
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            KernelError::InvalidPid => "invalid process id",
            KernelError::InvalidPriority => "invalid priority",
            KernelError::InvalidAddress => "address is not a block of this pool",
            KernelError::DoubleRelease => "block already released",
            KernelError::NotAllocated => "block is not allocated",
            KernelError::Unavailable => "pool exhausted",
            KernelError::WouldBlock => "operation would block in interrupt context",
            KernelError::NotPermitted => "operation not permitted in this context",
            KernelError::AlreadyRegistered => "pid already registered",
        };
        f.write_str(msg)
    }
}

/// Corrupted scheduler state. There is no safe recovery from these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedError {
    /// Every ready queue level is empty.
    NoRunnable,
    /// The process picked to run is neither NEW nor READY.
    BadSwitchTarget,
    /// A mailbox or the delay list links an envelope that is free.
    StrayEnvelope,
}

impl fmt::Display for SchedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedError::NoRunnable => f.write_str("no runnable process"),
            SchedError::BadSwitchTarget => f.write_str("switch target is neither new nor ready"),
            SchedError::StrayEnvelope => f.write_str("queued envelope is not allocated"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        extern crate std;
        use std::string::ToString;

        assert_eq!(KernelError::DoubleRelease.to_string(), "block already released");
        assert_eq!(KernelError::NotAllocated.to_string(), "block is not allocated");
        assert_eq!(SchedError::NoRunnable.to_string(), "no runnable process");
    }
}
