//! Value types shared by the FIB route-info layer.
//!
//! - [`Address`]: opaque 32-bit network address
//! - [`AddressType`]: classification of an address (unicast, broadcast, ...)
//! - [`Scope`]: ordinal reachability scope (universe .. host)
//! - [`RouteType`]: route class with its default error/scope properties

mod addr;
mod route_type;
mod scope;

pub use addr::{Address, AddressType};
pub use route_type::{RejectKind, RouteType, RouteTypeProps};
pub use scope::Scope;

/// Common error type for parsing failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("invalid address format: {0}")]
    InvalidAddress(String),

    #[error("invalid scope: {0}")]
    InvalidScope(String),

    #[error("invalid route type: {0}")]
    InvalidRouteType(String),
}
