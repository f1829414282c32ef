//! Next-hop value type and flags.
//!
//! A next hop is one outgoing path of a route-info entry: the interface it
//! leaves through, an optional gateway, the scope it was resolved at and its
//! multipath weight.

use fib_types::{Address, Scope};
use serde::Serialize;
use std::fmt;

use crate::device::DeviceRef;

/// Per-next-hop flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(transparent)]
pub struct NextHopFlags(u32);

impl NextHopFlags {
    /// No flags set.
    pub const NONE: Self = Self(0);
    /// The device is down; the hop must not be used.
    pub const DEAD: Self = Self(1 << 0);
    /// Do recursive gateway lookup.
    pub const PERVASIVE: Self = Self(1 << 1);
    /// Gateway is directly reachable on the device, skip resolution.
    pub const ONLINK: Self = Self(1 << 2);

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(&self) -> u32 {
        self.0
    }

    /// Returns true if all bits of `other` are set.
    pub const fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns true if the dead flag is set.
    pub const fn is_dead(&self) -> bool {
        self.contains(Self::DEAD)
    }

    /// Returns true if the onlink flag is set.
    pub const fn is_onlink(&self) -> bool {
        self.contains(Self::ONLINK)
    }

    /// Returns the flags with the transient dead bit cleared.
    pub const fn without_dead(&self) -> Self {
        Self(self.0 & !Self::DEAD.0)
    }

    /// Sets the dead flag.
    pub fn set_dead(&mut self, dead: bool) {
        if dead {
            self.0 |= Self::DEAD.0;
        } else {
            self.0 &= !Self::DEAD.0;
        }
    }
}

impl std::ops::BitOr for NextHopFlags {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for NextHopFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// One outgoing path of a route-info entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NextHop {
    /// Device the hop is bound to once validated. Holds a registry reference.
    device: Option<DeviceRef>,
    /// Output interface index (declared, then resolved).
    oif: u32,
    /// Gateway address; unspecified for directly attached destinations.
    gateway: Address,
    scope: Scope,
    /// Multipath weight, never below 1.
    weight: u32,
    flags: NextHopFlags,
    /// Routing realm from the flow sub-attribute.
    classid: u32,
}

impl NextHop {
    /// Creates an unresolved next hop leaving through `oif`.
    pub fn new(oif: u32) -> Self {
        Self {
            device: None,
            oif,
            gateway: Address::UNSPECIFIED,
            scope: Scope::UNIVERSE,
            weight: 1,
            flags: NextHopFlags::NONE,
            classid: 0,
        }
    }

    /// Creates a next hop with a gateway.
    pub fn with_gateway(mut self, gateway: Address) -> Self {
        self.gateway = gateway;
        self
    }

    /// Creates a next hop with weight (clamped to at least 1).
    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight.max(1);
        self
    }

    pub fn with_flags(mut self, flags: NextHopFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_classid(mut self, classid: u32) -> Self {
        self.classid = classid;
        self
    }

    pub fn device(&self) -> Option<DeviceRef> {
        self.device
    }

    pub fn oif(&self) -> u32 {
        self.oif
    }

    pub fn gateway(&self) -> Address {
        self.gateway
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    pub fn weight(&self) -> u32 {
        self.weight
    }

    pub fn flags(&self) -> NextHopFlags {
        self.flags
    }

    pub fn classid(&self) -> u32 {
        self.classid
    }

    /// Returns true if the hop is marked dead.
    pub fn is_dead(&self) -> bool {
        self.flags.is_dead()
    }

    /// Returns true if the hop has no gateway (directly attached).
    pub fn is_direct(&self) -> bool {
        self.gateway.is_unspecified()
    }

    /// Returns true if the hop is bound to `dev`.
    pub fn is_bound_to(&self, dev: DeviceRef) -> bool {
        self.device == Some(dev)
    }

    /// Compares everything except the transient dead flag. Device bindings
    /// only count when both hops are bound, so hops on different
    /// registrations of one interface index never match.
    pub fn is_equivalent(&self, other: &Self) -> bool {
        self.oif == other.oif
            && self.gateway == other.gateway
            && self.scope == other.scope
            && self.weight == other.weight
            && self.flags.without_dead() == other.flags.without_dead()
            && self.classid == other.classid
            && match (self.device, other.device) {
                (Some(a), Some(b)) => a == b,
                _ => true,
            }
    }

    pub(crate) fn set_oif(&mut self, oif: u32) {
        self.oif = oif;
    }

    pub(crate) fn set_gateway(&mut self, gateway: Address) {
        self.gateway = gateway;
    }

    pub(crate) fn set_scope(&mut self, scope: Scope) {
        self.scope = scope;
    }

    pub(crate) fn set_weight(&mut self, weight: u32) {
        self.weight = weight.max(1);
    }

    pub(crate) fn set_flags(&mut self, flags: NextHopFlags) {
        self.flags = flags;
    }

    pub(crate) fn set_classid(&mut self, classid: u32) {
        self.classid = classid;
    }

    pub(crate) fn set_dead(&mut self, dead: bool) {
        self.flags.set_dead(dead);
    }

    /// Records the device binding. The caller must already hold a registry
    /// reference for `dev`.
    pub(crate) fn bind(&mut self, dev: DeviceRef) {
        self.device = Some(dev);
    }

    /// Drops the device binding, returning it so the caller can release the
    /// registry reference.
    pub(crate) fn unbind(&mut self) -> Option<DeviceRef> {
        self.device.take()
    }
}

impl Default for NextHop {
    fn default() -> Self {
        Self::new(0)
    }
}

impl fmt::Display for NextHop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.is_direct() {
            write!(f, "via {} ", self.gateway)?;
        }
        write!(f, "dev {} scope {} weight {}", self.oif, self.scope, self.weight)?;
        if self.flags.is_onlink() {
            write!(f, " onlink")?;
        }
        if self.is_dead() {
            write!(f, " dead")?;
        }
        Ok(())
    }
}
