//! Address classification.

use fib_types::{Address, AddressType};
use std::sync::Arc;

use crate::device::DeviceRegistry;

/// Classifies addresses as seen from this host.
pub trait AddressClassifier: Send + Sync {
    fn classify(&self, addr: Address) -> AddressType;
}

/// Classifier for 32-bit addresses backed by the device registry's local
/// address list.
#[derive(Clone)]
pub struct Ipv4Classifier {
    registry: Arc<dyn DeviceRegistry>,
}

impl Ipv4Classifier {
    pub fn new(registry: Arc<dyn DeviceRegistry>) -> Self {
        Self { registry }
    }
}

impl AddressClassifier for Ipv4Classifier {
    fn classify(&self, addr: Address) -> AddressType {
        if addr.is_zeronet() || addr.is_limited_broadcast() {
            return AddressType::Broadcast;
        }
        if addr.is_multicast() {
            return AddressType::Multicast;
        }
        if self.registry.is_local_address(addr) {
            return AddressType::Local;
        }
        AddressType::Unicast
    }
}
