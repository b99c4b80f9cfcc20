use serde::Serialize;
use thiserror::Error;

use crate::x86::Addr;

#[derive(Debug, Error)]
pub enum Error {
    #[error("breakpoint {name}: not an object")]
    NotAnObject { name: String },

    #[error("breakpoint {name}: ignored")]
    Ignored { name: String },

    #[error("breakpoint {name}: no cavesize specified")]
    MissingCaveSize { name: String },

    #[error("breakpoint {name}: invalid cavesize ({reason})")]
    InvalidCaveSize { name: String, reason: String },

    #[error("breakpoint {name}: cavesize {size} too small to implement breakpoint")]
    CaveSizeTooSmall { name: String, size: usize },

    #[error("breakpoint {name}: no valid addresses")]
    NoAddresses { name: String },

    #[error("breakpoint {name}: handler {key} not found")]
    HandlerNotFound { name: String, key: String },

    #[error("breakpoint list must be an object")]
    InvalidBreakpointList,

    #[error("cannot resolve address expression {0}")]
    UnresolvedAddress(String),

    #[error("failed to allocate {size} bytes of code cave memory: {message}")]
    AllocationFailed { size: usize, message: String },

    #[error("memory access failed at {address:#x} ({size} bytes): {message}")]
    MemoryAccess {
        address: Addr,
        size: usize,
        message: String,
    },

    #[error("failed to change protection at {address:#x}: {message}")]
    ProtectFailed { address: Addr, message: String },

    #[error("host pointer {0:#x} does not fit the 32-bit address space")]
    PointerOutOfRange(usize),

    #[error("invalid stub template: {0}")]
    InvalidStubTemplate(String),

    #[error("no dispatch address configured for this target")]
    NoDispatchAddress,
}

pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification used when reporting setup results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, Serialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Configuration,
    Resolution,
    Allocation,
    HandlerNotFound,
    Internal,
}

impl Error {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::NotAnObject { .. }
            | Error::Ignored { .. }
            | Error::MissingCaveSize { .. }
            | Error::InvalidCaveSize { .. }
            | Error::CaveSizeTooSmall { .. }
            | Error::InvalidBreakpointList => ErrorCategory::Configuration,
            Error::NoAddresses { .. } | Error::UnresolvedAddress(_) => ErrorCategory::Resolution,
            Error::AllocationFailed { .. } => ErrorCategory::Allocation,
            Error::HandlerNotFound { .. } => ErrorCategory::HandlerNotFound,
            Error::MemoryAccess { .. }
            | Error::ProtectFailed { .. }
            | Error::PointerOutOfRange(_)
            | Error::InvalidStubTemplate(_)
            | Error::NoDispatchAddress => ErrorCategory::Internal,
        }
    }

    /// Errors that abort the whole setup pass instead of one description.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self.category(),
            ErrorCategory::Configuration
                | ErrorCategory::Resolution
                | ErrorCategory::HandlerNotFound
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_category() {
        let err = Error::CaveSizeTooSmall {
            name: "foo".to_string(),
            size: 3,
        };
        assert_eq!(err.category(), ErrorCategory::Configuration);
        assert!(!err.is_fatal());

        let err = Error::AllocationFailed {
            size: 16,
            message: "out of memory".to_string(),
        };
        assert_eq!(err.category(), ErrorCategory::Allocation);
        assert!(err.is_fatal());
    }

    #[test]
    fn test_error_display() {
        let err = Error::HandlerNotFound {
            name: "foo#1".to_string(),
            key: "BP_foo".to_string(),
        };
        assert_eq!(err.to_string(), "breakpoint foo#1: handler BP_foo not found");
        assert_eq!(ErrorCategory::HandlerNotFound.to_string(), "handler_not_found");
    }
}
