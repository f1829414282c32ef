//! Routing lookup interface used for recursive gateway resolution.

use fib_types::{Address, RouteType, Scope};
use parking_lot::RwLock;
use serde::Deserialize;

use crate::error::{FibError, Result};

/// Key for a gateway resolution lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowKey {
    pub dst: Address,
    /// Required output interface, 0 for any.
    pub oif: u32,
    /// Narrowest route scope the result may have.
    pub scope: Scope,
}

/// Outcome of a successful lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub route_type: RouteType,
    pub scope: Scope,
    /// Output interface of the resolved route, 0 if it has none.
    pub oif: u32,
}

/// The routing lookup service.
pub trait RouteLookup: Send + Sync {
    /// Resolves a flow. Reject-type routes report their type's error.
    fn lookup(&self, key: &FlowKey) -> Result<Resolution>;
}

/// A route known to [`StaticLookup`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StaticRoute {
    pub prefix: Address,
    pub prefix_len: u8,
    #[serde(rename = "type", default)]
    pub route_type: RouteType,
    #[serde(default)]
    pub scope: Scope,
    #[serde(default)]
    pub oif: u32,
}

impl StaticRoute {
    fn covers(&self, addr: Address) -> bool {
        let mask = match self.prefix_len {
            0 => 0,
            len => u32::MAX << (32 - u32::from(len.min(32))),
        };
        addr.raw() & mask == self.prefix.raw() & mask
    }
}

/// Longest-prefix table scanned linearly.
///
/// Stands in for the forwarding trie in tests and in `fibctl`.
#[derive(Debug, Default)]
pub struct StaticLookup {
    routes: RwLock<Vec<StaticRoute>>,
}

impl StaticLookup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_route(&self, route: StaticRoute) {
        self.routes.write().push(route);
    }

    pub fn len(&self) -> usize {
        self.routes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.read().is_empty()
    }
}

impl FromIterator<StaticRoute> for StaticLookup {
    fn from_iter<I: IntoIterator<Item = StaticRoute>>(iter: I) -> Self {
        Self {
            routes: RwLock::new(iter.into_iter().collect()),
        }
    }
}

impl RouteLookup for StaticLookup {
    fn lookup(&self, key: &FlowKey) -> Result<Resolution> {
        let routes = self.routes.read();
        let best = routes
            .iter()
            .filter(|r| r.covers(key.dst))
            .filter(|r| key.oif == 0 || r.oif == key.oif)
            .filter(|r| r.scope >= key.scope)
            .max_by_key(|r| r.prefix_len)
            .ok_or(FibError::HostUnreachable)?;

        if let Some(kind) = best.route_type.props().error {
            return Err(kind.into());
        }

        Ok(Resolution {
            route_type: best.route_type,
            scope: best.scope,
            oif: best.oif,
        })
    }
}
