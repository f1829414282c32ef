//! Decoded route-update request.

use fib_types::{Address, RouteType, Scope};
use serde::Deserialize;

use crate::route_info::Metrics;

/// The route-level part of a routing-update message, already decoded by the
/// transport. Multipath next hops travel separately as a raw attribute
/// buffer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RouteRequest {
    #[serde(rename = "type")]
    pub route_type: RouteType,
    pub protocol: u8,
    pub scope: Scope,
    /// Message flags; bits above the low byte are inherited by every hop.
    pub flags: u32,
    pub priority: u32,
    pub preferred_source: Option<Address>,
    /// Destination of the route, used to accept a local route whose
    /// preferred source is its own address.
    pub destination: Option<Address>,
    pub metrics: Metrics,
    /// Inline output interface.
    pub oif: Option<u32>,
    /// Inline gateway.
    pub gateway: Option<Address>,
    /// Inline routing realm.
    pub classid: Option<u32>,
}

impl RouteRequest {
    /// Flags every parsed next hop inherits.
    pub fn base_nexthop_flags(&self) -> u32 {
        self.flags & !0xff
    }

    /// Returns true if the request carries inline next-hop information.
    pub fn has_inline_nexthop(&self) -> bool {
        self.oif.is_some() || self.gateway.is_some() || self.classid.is_some()
    }
}
