//! Device state propagation across the pool.

use fib_types::{Address, Scope};
use log::info;
use std::fmt;

use crate::device::DeviceRef;
use crate::pool::{FibInfoId, FibInfoPool};

/// What went away in a down event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTarget {
    /// A device went down or is being removed.
    Device(DeviceRef),
    /// A local address was removed.
    Address(Address),
}

impl fmt::Display for SyncTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncTarget::Device(dev) => write!(f, "device {}", dev),
            SyncTarget::Address(addr) => write!(f, "address {}", addr),
        }
    }
}

/// Flips next-hop and route liveness on device events.
///
/// Runs under the pool lock, so a sync never interleaves with an insert or a
/// release. Syncing never fails; finding nothing to change is normal.
pub struct DeviceSyncer<'a> {
    pool: &'a FibInfoPool,
}

impl<'a> DeviceSyncer<'a> {
    pub fn new(pool: &'a FibInfoPool) -> Self {
        Self { pool }
    }

    /// Marks paths through `target` dead.
    ///
    /// For a device, every hop bound to it is marked dead; host-scope hops
    /// survive unless `force` is set. An entry becomes unreachable when it has
    /// a hop on the device and either no live hop remains or `force` is set.
    /// For an address, entries using it as preferred source have every hop
    /// marked dead and become unreachable.
    ///
    /// Returns the number of entries changed.
    pub fn sync_down(&self, target: SyncTarget, force: bool) -> usize {
        let affected = match target {
            SyncTarget::Device(dev) => self.down_device(dev, force),
            SyncTarget::Address(addr) => self.down_address(addr),
        };
        if affected > 0 {
            info!(
                "DeviceSyncer: {} down (force={}), {} entries affected",
                target, force, affected
            );
        }
        affected
    }

    fn down_device(&self, dev: DeviceRef, force: bool) -> usize {
        let mut affected = 0;
        self.pool.for_each_entry_mut(|_, info| {
            let mut on_device = false;
            let mut changed = false;

            for nh in info.nexthops_mut() {
                if !nh.is_bound_to(dev) {
                    continue;
                }
                on_device = true;
                if nh.is_dead() || (!force && nh.scope() == Scope::NOWHERE) {
                    continue;
                }
                nh.set_dead(true);
                changed = true;
            }

            if on_device && !info.is_dead() && (force || !info.has_live_nexthop()) {
                info.set_dead(true);
                changed = true;
            }
            if changed {
                affected += 1;
            }
        });
        affected
    }

    fn down_address(&self, addr: Address) -> usize {
        let mut affected = 0;
        self.pool.for_each_entry_mut(|_, info| {
            if info.preferred_source() != Some(addr) {
                return;
            }
            let mut changed = false;
            for nh in info.nexthops_mut().iter_mut().filter(|nh| !nh.is_dead()) {
                nh.set_dead(true);
                changed = true;
            }
            if !info.is_dead() {
                info.set_dead(true);
                changed = true;
            }
            if changed {
                affected += 1;
            }
        });
        affected
    }

    /// Revives hops bound to `dev` if the device is up.
    ///
    /// Reachability is not re-validated. Entries whose preferred source is
    /// no longer a local address stay down. Entries left with a live hop
    /// lose their unreachable mark. Returns the number of entries with a hop
    /// revived.
    pub fn sync_up(&self, dev: DeviceRef) -> usize {
        let registry = self.pool.registry();
        if !registry.device_is_up(dev) {
            return 0;
        }

        let mut revived = 0;
        self.pool.for_each_entry_mut(|_, info| {
            if info
                .preferred_source()
                .is_some_and(|src| !registry.is_local_address(src))
            {
                return;
            }
            let mut any = false;
            for nh in info.nexthops_mut() {
                if nh.is_dead() && nh.is_bound_to(dev) {
                    nh.set_dead(false);
                    any = true;
                }
            }
            if any {
                if info.has_live_nexthop() {
                    info.set_dead(false);
                }
                revived += 1;
            }
        });

        if revived > 0 {
            info!("DeviceSyncer: {} up, {} entries revived", dev, revived);
        }
        revived
    }

    /// Ids of entries currently unreachable, newest first.
    pub fn unreachable(&self) -> Vec<FibInfoId> {
        let mut ids = Vec::new();
        self.pool.for_each_entry_mut(|id, info| {
            if info.is_dead() {
                ids.push(id);
            }
        });
        ids
    }
}
