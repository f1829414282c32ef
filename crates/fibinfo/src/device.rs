//! Device registry interface and an in-memory implementation.
//!
//! Route-info entries never own devices. A validated next hop stores a
//! [`DeviceRef`] and holds one registry reference on it until the entry is
//! reclaimed.
//!
//! A [`DeviceRef`] names one registration of a device: the interface index
//! plus a generation the registry bumps each time the index is registered
//! anew. A reference to a removed device never matches a later device that
//! reuses its index.

use fib_types::Address;
use log::{debug, warn};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Weak reference to one registration of a network device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceRef {
    ifindex: u32,
    generation: u32,
}

impl DeviceRef {
    pub const fn new(ifindex: u32, generation: u32) -> Self {
        Self {
            ifindex,
            generation,
        }
    }

    pub const fn ifindex(&self) -> u32 {
        self.ifindex
    }

    pub const fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Display for DeviceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "if{}.{}", self.ifindex, self.generation)
    }
}

/// Device state consumed by validation and device sync.
///
/// Every method taking a [`DeviceRef`] treats a reference to an earlier
/// registration of the same index as an unknown device.
pub trait DeviceRegistry: Send + Sync {
    /// Resolves an interface index to its current registration.
    fn device_by_index(&self, ifindex: u32) -> Option<DeviceRef>;

    /// Returns true if the device is registered and administratively up.
    fn device_is_up(&self, dev: DeviceRef) -> bool;

    /// Takes a reference on the device.
    fn acquire(&self, dev: DeviceRef);

    /// Drops a reference taken with [`DeviceRegistry::acquire`].
    fn release(&self, dev: DeviceRef);

    /// Returns true if `addr` is configured on any local device.
    fn is_local_address(&self, addr: Address) -> bool;
}

/// Registry entry for one device.
#[derive(Debug, Clone, Default)]
pub struct DeviceEntry {
    pub name: String,
    pub generation: u32,
    pub up: bool,
    pub addresses: Vec<Address>,
    pub ref_count: u32,
}

impl DeviceEntry {
    pub fn add_ref(&mut self) -> u32 {
        self.ref_count = self.ref_count.saturating_add(1);
        self.ref_count
    }

    /// Returns the remaining count, or `None` if no reference was held.
    pub fn remove_ref(&mut self) -> Option<u32> {
        self.ref_count = self.ref_count.checked_sub(1)?;
        Some(self.ref_count)
    }
}

#[derive(Debug, Default)]
struct Devices {
    entries: HashMap<u32, DeviceEntry>,
    /// Last generation handed out per index; survives removal.
    generations: HashMap<u32, u32>,
}

impl Devices {
    fn get(&self, dev: DeviceRef) -> Option<&DeviceEntry> {
        self.entries
            .get(&dev.ifindex)
            .filter(|e| e.generation == dev.generation)
    }

    fn get_mut(&mut self, dev: DeviceRef) -> Option<&mut DeviceEntry> {
        self.entries
            .get_mut(&dev.ifindex)
            .filter(|e| e.generation == dev.generation)
    }
}

/// In-memory device registry.
#[derive(Debug, Default)]
pub struct DeviceTable {
    devices: RwLock<Devices>,
}

impl DeviceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a device and returns its reference.
    ///
    /// Updating a registered index keeps its generation and references. A
    /// new registration, including one after removal, gets a fresh
    /// generation.
    pub fn add_device(&self, ifindex: u32, name: impl Into<String>, up: bool) -> DeviceRef {
        let mut devices = self.devices.write();
        let Devices {
            entries,
            generations,
        } = &mut *devices;
        let entry = entries.entry(ifindex).or_insert_with(|| {
            let generation = generations
                .entry(ifindex)
                .and_modify(|g| *g = g.wrapping_add(1))
                .or_insert(1);
            DeviceEntry {
                generation: *generation,
                ..DeviceEntry::default()
            }
        });
        entry.name = name.into();
        entry.up = up;
        let dev = DeviceRef::new(ifindex, entry.generation);
        debug!("DeviceTable: added {} ({}) up={}", dev, entry.name, up);
        dev
    }

    /// Removes a device, returning its last entry.
    ///
    /// Callers should first mark every dependent next hop dead; remaining
    /// references are reported but do not keep the device alive.
    pub fn remove_device(&self, ifindex: u32) -> Option<DeviceEntry> {
        let entry = self.devices.write().entries.remove(&ifindex)?;
        if entry.ref_count > 0 {
            warn!(
                "DeviceTable: removed {} ({}) with {} references outstanding",
                ifindex, entry.name, entry.ref_count
            );
        }
        Some(entry)
    }

    /// Sets the administrative state. Returns false for unknown devices.
    pub fn set_up(&self, ifindex: u32, up: bool) -> bool {
        match self.devices.write().entries.get_mut(&ifindex) {
            Some(entry) => {
                entry.up = up;
                true
            }
            None => false,
        }
    }

    /// Adds a local address to a device. Returns false for unknown devices.
    pub fn add_address(&self, ifindex: u32, addr: Address) -> bool {
        match self.devices.write().entries.get_mut(&ifindex) {
            Some(entry) => {
                if !entry.addresses.contains(&addr) {
                    entry.addresses.push(addr);
                }
                true
            }
            None => false,
        }
    }

    /// Removes a local address from whichever device carries it.
    pub fn remove_address(&self, addr: Address) -> bool {
        let mut devices = self.devices.write();
        for entry in devices.entries.values_mut() {
            if let Some(pos) = entry.addresses.iter().position(|a| *a == addr) {
                entry.addresses.remove(pos);
                return true;
            }
        }
        false
    }

    /// Returns the number of references held on the device currently
    /// registered at `ifindex`.
    pub fn ref_count(&self, ifindex: u32) -> Option<u32> {
        self.devices
            .read()
            .entries
            .get(&ifindex)
            .map(|e| e.ref_count)
    }

    pub fn len(&self) -> usize {
        self.devices.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.read().entries.is_empty()
    }
}

impl DeviceRegistry for DeviceTable {
    fn device_by_index(&self, ifindex: u32) -> Option<DeviceRef> {
        if ifindex == 0 {
            return None;
        }
        self.devices
            .read()
            .entries
            .get(&ifindex)
            .map(|e| DeviceRef::new(ifindex, e.generation))
    }

    fn device_is_up(&self, dev: DeviceRef) -> bool {
        self.devices.read().get(dev).is_some_and(|e| e.up)
    }

    fn acquire(&self, dev: DeviceRef) {
        match self.devices.write().get_mut(dev) {
            Some(entry) => {
                entry.add_ref();
            }
            None => warn!("DeviceTable: acquire on unknown device {}", dev),
        }
    }

    fn release(&self, dev: DeviceRef) {
        match self.devices.write().get_mut(dev) {
            Some(entry) => {
                if entry.remove_ref().is_none() {
                    warn!("DeviceTable: release on {} with no references held", dev);
                }
            }
            // Registration already gone; its references went with it.
            None => debug!("DeviceTable: release on removed device {}", dev),
        }
    }

    fn is_local_address(&self, addr: Address) -> bool {
        self.devices
            .read()
            .entries
            .values()
            .any(|e| e.addresses.contains(&addr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_ref_counting() {
        let mut entry = DeviceEntry::default();
        assert_eq!(entry.add_ref(), 1);
        assert_eq!(entry.remove_ref(), Some(0));
        assert_eq!(entry.remove_ref(), None);
        assert_eq!(entry.ref_count, 0);
    }

    #[test]
    fn test_lookup_and_state() {
        let table = DeviceTable::new();
        let eth0 = table.add_device(5, "eth0", true);
        let eth1 = table.add_device(6, "eth1", false);

        assert_eq!(table.device_by_index(5), Some(eth0));
        assert!(table.device_is_up(eth0));
        assert!(!table.device_is_up(eth1));
        assert!(table.device_by_index(7).is_none());
        assert!(table.device_by_index(0).is_none());

        assert!(table.set_up(6, true));
        assert!(table.device_is_up(eth1));
        assert!(!table.set_up(9, true));
    }

    #[test]
    fn test_update_keeps_generation() {
        let table = DeviceTable::new();
        let first = table.add_device(5, "eth0", false);
        table.acquire(first);

        let again = table.add_device(5, "eth0", true);
        assert_eq!(again, first);
        assert_eq!(table.ref_count(5), Some(1));
        assert!(table.device_is_up(first));
    }

    #[test]
    fn test_acquire_release() {
        let table = DeviceTable::new();
        let dev = table.add_device(5, "eth0", true);

        table.acquire(dev);
        table.acquire(dev);
        assert_eq!(table.ref_count(5), Some(2));

        table.release(dev);
        table.release(dev);
        assert_eq!(table.ref_count(5), Some(0));

        // Underflow is logged, not applied.
        table.release(dev);
        assert_eq!(table.ref_count(5), Some(0));
    }

    #[test]
    fn test_local_addresses() {
        let table = DeviceTable::new();
        table.add_device(5, "eth0", true);
        let addr: Address = "192.168.0.10".parse().unwrap();

        assert!(!table.is_local_address(addr));
        assert!(table.add_address(5, addr));
        assert!(table.is_local_address(addr));
        assert!(table.remove_address(addr));
        assert!(!table.is_local_address(addr));
    }

    #[test]
    fn test_remove_device() {
        let table = DeviceTable::new();
        let dev = table.add_device(5, "eth0", true);
        table.acquire(dev);

        let entry = table.remove_device(5).unwrap();
        assert_eq!(entry.ref_count, 1);
        assert!(table.is_empty());

        // Releasing against a removed device is harmless.
        table.release(dev);
    }

    #[test]
    fn test_reregistered_index_is_a_new_device() {
        let table = DeviceTable::new();
        let old = table.add_device(5, "eth0", true);
        table.acquire(old);
        table.remove_device(5);

        let new = table.add_device(5, "eth0", true);
        assert_ne!(old, new);
        assert_eq!(new.ifindex(), old.ifindex());
        assert_eq!(table.device_by_index(5), Some(new));
        assert!(!table.device_is_up(old));
        assert!(table.device_is_up(new));

        table.acquire(new);
        assert_eq!(table.ref_count(5), Some(1));

        // The stale reference neither takes nor drops references on the
        // new registration.
        table.release(old);
        table.acquire(old);
        assert_eq!(table.ref_count(5), Some(1));

        table.release(new);
        assert_eq!(table.ref_count(5), Some(0));
    }
}
