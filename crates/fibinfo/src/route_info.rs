//! Route-info aggregate.
//!
//! A [`RouteInfo`] is the shared descriptor that routing-table entries point
//! at: origin protocol, preferred source, priority, metrics and the ordered
//! next-hop list. Two descriptors that differ only in transient liveness are
//! equivalent and the pool keeps one of them.

use fib_types::Address;
use serde::{Deserialize, Serialize};

use crate::device::DeviceRegistry;
use crate::nexthop::NextHop;
use crate::request::RouteRequest;

/// Number of per-route metric slots.
pub const METRICS_MAX: usize = 8;

/// Fixed-size vector of per-route tunables. Unset slots are zero.
///
/// Serialized as a list; shorter lists leave trailing slots zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "Vec<u32>", into = "Vec<u32>")]
pub struct Metrics([u32; METRICS_MAX]);

impl Metrics {
    /// Builds metrics from leading values; extra values are ignored.
    pub fn from_slice(values: &[u32]) -> Self {
        let mut metrics = [0u32; METRICS_MAX];
        for (slot, value) in metrics.iter_mut().zip(values) {
            *slot = *value;
        }
        Self(metrics)
    }

    pub fn as_slice(&self) -> &[u32] {
        &self.0
    }
}

impl From<Vec<u32>> for Metrics {
    fn from(values: Vec<u32>) -> Self {
        Self::from_slice(&values)
    }
}

impl From<Metrics> for Vec<u32> {
    fn from(metrics: Metrics) -> Self {
        metrics.0.to_vec()
    }
}

/// Route-level flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(transparent)]
pub struct RouteFlags(u32);

impl RouteFlags {
    pub const NONE: Self = Self(0);
    /// No live next hop remains. Shares its bit with the next-hop dead flag.
    pub const DEAD: Self = Self(1 << 0);
    /// Notify user of route change.
    pub const NOTIFY: Self = Self(0x100);

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(&self) -> u32 {
        self.0
    }

    pub const fn is_dead(&self) -> bool {
        self.0 & Self::DEAD.0 != 0
    }

    pub const fn without_dead(&self) -> Self {
        Self(self.0 & !Self::DEAD.0)
    }

    pub fn set_dead(&mut self, dead: bool) {
        if dead {
            self.0 |= Self::DEAD.0;
        } else {
            self.0 &= !Self::DEAD.0;
        }
    }
}

/// Shared route descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteInfo {
    protocol: u8,
    preferred_source: Option<Address>,
    priority: u32,
    metrics: Metrics,
    flags: RouteFlags,
    nexthops: Vec<NextHop>,
}

impl RouteInfo {
    /// Creates a candidate with no next hops.
    pub fn new(protocol: u8, priority: u32) -> Self {
        Self {
            protocol,
            preferred_source: None,
            priority,
            metrics: Metrics::default(),
            flags: RouteFlags::NONE,
            nexthops: Vec::new(),
        }
    }

    /// Creates a candidate carrying the request's route-level attributes.
    pub fn from_request(request: &RouteRequest) -> Self {
        Self::new(request.protocol, request.priority)
            .with_preferred_source(request.preferred_source)
            .with_metrics(request.metrics)
            .with_flags(RouteFlags::from_bits(request.flags).without_dead())
    }

    pub fn with_preferred_source(mut self, source: Option<Address>) -> Self {
        self.preferred_source = source;
        self
    }

    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_flags(mut self, flags: RouteFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_nexthop(mut self, nexthop: NextHop) -> Self {
        self.nexthops.push(nexthop);
        self
    }

    pub fn protocol(&self) -> u8 {
        self.protocol
    }

    pub fn preferred_source(&self) -> Option<Address> {
        self.preferred_source
    }

    pub fn priority(&self) -> u32 {
        self.priority
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn flags(&self) -> RouteFlags {
        self.flags
    }

    pub fn nexthops(&self) -> &[NextHop] {
        &self.nexthops
    }

    /// Number of explicit next hops.
    pub fn nhs(&self) -> usize {
        self.nexthops.len()
    }

    /// Returns true if the route is marked unreachable.
    pub fn is_dead(&self) -> bool {
        self.flags.is_dead()
    }

    pub fn live_nexthops(&self) -> impl Iterator<Item = &NextHop> {
        self.nexthops.iter().filter(|nh| !nh.is_dead())
    }

    pub fn has_live_nexthop(&self) -> bool {
        self.live_nexthops().next().is_some()
    }

    /// Equivalence used for deduplication.
    ///
    /// Next hops are compared position by position; reordered lists are
    /// distinct descriptors.
    pub fn is_equivalent(&self, other: &Self) -> bool {
        self.nhs() == other.nhs()
            && self.protocol == other.protocol
            && self.preferred_source == other.preferred_source
            && self.priority == other.priority
            && self.metrics == other.metrics
            && self.flags.without_dead() == other.flags.without_dead()
            && (self.nexthops.is_empty()
                || self
                    .nexthops
                    .iter()
                    .zip(&other.nexthops)
                    .all(|(a, b)| a.is_equivalent(b)))
    }

    /// Returns true if a delete request designates this descriptor.
    ///
    /// Unset request fields are wildcards. An inline oif/gateway is checked
    /// against the first hop; a multipath list is checked hop by hop, where a
    /// zero field in a requested hop matches anything.
    pub fn matches_request(&self, request: &RouteRequest, multipath: &[NextHop]) -> bool {
        if request.priority != 0 && request.priority != self.priority {
            return false;
        }

        if request.oif.is_some() || request.gateway.is_some() {
            let Some(first) = self.nexthops.first() else {
                return false;
            };
            return request.oif.map_or(true, |oif| oif == first.oif())
                && request.gateway.map_or(true, |gw| gw == first.gateway());
        }

        self.nexthops.iter().zip(multipath).all(|(nh, want)| {
            (want.oif() == 0 || want.oif() == nh.oif())
                && (want.gateway().is_unspecified() || want.gateway() == nh.gateway())
                && (want.classid() == 0 || want.classid() == nh.classid())
        })
    }

    /// Picks a live next hop for a flow hash, weighted by hop weight.
    ///
    /// An unreachable descriptor yields nothing, even if some of its hops
    /// are still live. The same hash always selects the same hop while the
    /// set of live hops is unchanged.
    pub fn select_nexthop(&self, hash: u32) -> Option<&NextHop> {
        if self.is_dead() {
            return None;
        }
        let total: u64 = self.live_nexthops().map(|nh| u64::from(nh.weight())).sum();
        if total == 0 {
            return None;
        }
        let mut point = u64::from(hash) % total;
        for nh in self.live_nexthops() {
            let weight = u64::from(nh.weight());
            if point < weight {
                return Some(nh);
            }
            point -= weight;
        }
        None
    }

    pub(crate) fn nexthops_mut(&mut self) -> &mut [NextHop] {
        &mut self.nexthops
    }

    pub(crate) fn push_nexthop(&mut self, nexthop: NextHop) {
        self.nexthops.push(nexthop);
    }

    /// Replaces the next-hop list with `count` unfilled slots, ready for
    /// [`parse_nexthops`](crate::attr::parse_nexthops).
    pub fn reserve_nexthops(&mut self, count: usize) {
        self.nexthops = vec![NextHop::default(); count];
    }

    pub(crate) fn set_dead(&mut self, dead: bool) {
        self.flags.set_dead(dead);
    }

    /// Drops every device binding, releasing the registry references.
    pub(crate) fn release_devices(&mut self, registry: &dyn DeviceRegistry) {
        for nh in &mut self.nexthops {
            if let Some(dev) = nh.unbind() {
                registry.release(dev);
            }
        }
    }
}
