//! Error types for the route-info layer.

use fib_types::RejectKind;
use thiserror::Error;

/// Errors returned while building or resolving route-info entries.
///
/// Lifecycle violations (releasing a handle twice, reclaiming a live entry)
/// are not represented here; they panic.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FibError {
    /// Malformed attributes or a request that breaks a route rule.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("No such device: index {0}")]
    NoSuchDevice(u32),

    #[error("Network is down: device {0}")]
    NetworkDown(u32),

    #[error("Host unreachable")]
    HostUnreachable,

    #[error("Permission denied")]
    PermissionDenied,

    /// The lookup hit a throw route; the caller may retry elsewhere.
    #[error("Resource temporarily unavailable")]
    Retry,

    #[error("Route-info pool exhausted ({0} entries)")]
    PoolExhausted(usize),
}

impl FibError {
    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        FibError::InvalidArgument(reason.into())
    }
}

impl From<RejectKind> for FibError {
    fn from(kind: RejectKind) -> Self {
        match kind {
            RejectKind::InvalidArgument => FibError::invalid("route type rejects traffic"),
            RejectKind::HostUnreachable => FibError::HostUnreachable,
            RejectKind::PermissionDenied => FibError::PermissionDenied,
            RejectKind::Retry => FibError::Retry,
        }
    }
}

/// Result type for route-info operations.
pub type Result<T> = std::result::Result<T, FibError>;
