//! Next-hop gateway validation.
//!
//! A hop with a gateway is admitted only when the gateway is reachable: either
//! asserted on-link through an up device, or resolved recursively through the
//! routing lookup to a unicast or local route with a real device.

use fib_types::{RouteType, Scope};
use log::debug;

use crate::classify::AddressClassifier;
use crate::device::DeviceRegistry;
use crate::error::{FibError, Result};
use crate::lookup::{FlowKey, RouteLookup};
use crate::nexthop::NextHop;
use crate::request::RouteRequest;
use crate::route_info::RouteInfo;

/// Validates next hops against device state and the routing lookup.
///
/// On success a hop is bound to its device and one registry reference is
/// held for it. On failure nothing is acquired for that hop.
pub struct NextHopValidator<'a> {
    registry: &'a dyn DeviceRegistry,
    lookup: &'a dyn RouteLookup,
    classifier: &'a dyn AddressClassifier,
}

impl<'a> NextHopValidator<'a> {
    pub fn new(
        registry: &'a dyn DeviceRegistry,
        lookup: &'a dyn RouteLookup,
        classifier: &'a dyn AddressClassifier,
    ) -> Self {
        Self {
            registry,
            lookup,
            classifier,
        }
    }

    /// Checks one hop of a route being installed with `request`.
    ///
    /// Hops without a gateway pass untouched; binding a directly attached
    /// hop to its device is the builder's job.
    pub fn check(&self, request: &RouteRequest, nh: &mut NextHop) -> Result<()> {
        if nh.gateway().is_unspecified() {
            return Ok(());
        }

        if nh.flags().is_onlink() {
            self.check_onlink(request, nh)
        } else {
            self.check_recursive(request, nh)
        }
    }

    /// Checks every gateway hop of `info`, stopping at the first failure.
    ///
    /// Hops validated before the failure keep their device references; the
    /// caller releases them with the rest of the candidate.
    pub fn check_route(&self, request: &RouteRequest, info: &mut RouteInfo) -> Result<()> {
        for nh in info.nexthops_mut() {
            self.check(request, nh)?;
        }
        Ok(())
    }

    fn check_onlink(&self, request: &RouteRequest, nh: &mut NextHop) -> Result<()> {
        if request.scope >= Scope::LINK {
            debug!(
                "NextHopValidator: onlink gateway {} with route scope {}",
                nh.gateway(),
                request.scope
            );
            return Err(FibError::invalid(format!(
                "onlink next hop requires scope below link, got {}",
                request.scope
            )));
        }

        let kind = self.classifier.classify(nh.gateway());
        if !kind.is_unicast() {
            debug!(
                "NextHopValidator: onlink gateway {} is {}",
                nh.gateway(),
                kind
            );
            return Err(FibError::invalid(format!(
                "onlink gateway {} is not unicast",
                nh.gateway()
            )));
        }

        let dev = self
            .registry
            .device_by_index(nh.oif())
            .ok_or(FibError::NoSuchDevice(nh.oif()))?;
        if !self.registry.device_is_up(dev) {
            return Err(FibError::NetworkDown(nh.oif()));
        }

        self.registry.acquire(dev);
        nh.bind(dev);
        nh.set_scope(Scope::LINK);
        Ok(())
    }

    fn check_recursive(&self, request: &RouteRequest, nh: &mut NextHop) -> Result<()> {
        let key = FlowKey {
            dst: nh.gateway(),
            oif: nh.oif(),
            scope: request.scope.narrower().max(Scope::LINK),
        };

        let res = self.lookup.lookup(&key).map_err(|e| {
            debug!("NextHopValidator: gateway {} lookup failed: {}", key.dst, e);
            e
        })?;

        if !matches!(res.route_type, RouteType::Unicast | RouteType::Local) {
            return Err(FibError::invalid(format!(
                "gateway {} resolves to a {} route",
                key.dst, res.route_type
            )));
        }

        nh.set_scope(res.scope);
        nh.set_oif(res.oif);

        let dev = self.registry.device_by_index(res.oif).ok_or_else(|| {
            FibError::invalid(format!("gateway {} resolves to no device", key.dst))
        })?;
        if !self.registry.device_is_up(dev) {
            return Err(FibError::NetworkDown(dev.ifindex()));
        }

        self.registry.acquire(dev);
        nh.bind(dev);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::Ipv4Classifier;
    use crate::device::DeviceTable;
    use crate::lookup::{StaticLookup, StaticRoute};
    use crate::nexthop::NextHopFlags;
    use fib_types::Address;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    struct Env {
        devices: Arc<DeviceTable>,
        lookup: StaticLookup,
        classifier: Ipv4Classifier,
    }

    impl Env {
        fn new() -> Self {
            let devices = Arc::new(DeviceTable::new());
            devices.add_device(5, "eth0", true);
            devices.add_device(6, "eth1", false);
            devices.add_address(5, addr("192.168.0.10"));

            let lookup = StaticLookup::new();
            lookup.add_route(StaticRoute {
                prefix: addr("192.168.0.0"),
                prefix_len: 24,
                route_type: RouteType::Unicast,
                scope: Scope::LINK,
                oif: 5,
            });
            lookup.add_route(StaticRoute {
                prefix: addr("10.6.0.0"),
                prefix_len: 16,
                route_type: RouteType::Unicast,
                scope: Scope::LINK,
                oif: 6,
            });
            lookup.add_route(StaticRoute {
                prefix: addr("224.0.0.0"),
                prefix_len: 4,
                route_type: RouteType::Multicast,
                scope: Scope::LINK,
                oif: 5,
            });

            let classifier = Ipv4Classifier::new(devices.clone());
            Self {
                devices,
                lookup,
                classifier,
            }
        }

        fn validator(&self) -> NextHopValidator<'_> {
            NextHopValidator::new(self.devices.as_ref(), &self.lookup, &self.classifier)
        }
    }

    fn addr(s: &str) -> Address {
        s.parse().unwrap()
    }

    fn onlink(oif: u32, gw: &str) -> NextHop {
        NextHop::new(oif)
            .with_gateway(addr(gw))
            .with_flags(NextHopFlags::ONLINK)
    }

    #[test]
    fn test_no_gateway_is_noop() {
        let env = Env::new();
        let mut nh = NextHop::new(5);
        env.validator()
            .check(&RouteRequest::default(), &mut nh)
            .unwrap();
        assert_eq!(nh, NextHop::new(5));
        assert_eq!(env.devices.ref_count(5), Some(0));
    }

    #[test]
    fn test_onlink_success() {
        let env = Env::new();
        let mut nh = onlink(5, "172.16.0.1");
        env.validator()
            .check(&RouteRequest::default(), &mut nh)
            .unwrap();

        assert_eq!(nh.scope(), Scope::LINK);
        assert_eq!(nh.device(), env.devices.device_by_index(5));
        assert_eq!(env.devices.ref_count(5), Some(1));
    }

    #[test]
    fn test_onlink_scope_too_wide() {
        let env = Env::new();
        for scope in [Scope::LINK, Scope::HOST, Scope::NOWHERE] {
            let request = RouteRequest {
                scope,
                ..RouteRequest::default()
            };
            let mut nh = onlink(5, "172.16.0.1");
            let err = env.validator().check(&request, &mut nh).unwrap_err();
            assert!(matches!(err, FibError::InvalidArgument(_)));
        }
        assert_eq!(env.devices.ref_count(5), Some(0));
    }

    #[test]
    fn test_onlink_broadcast_gateway_rejected_regardless_of_device() {
        let env = Env::new();
        // Existing up device, down device, and missing device.
        for oif in [5, 6, 42] {
            let mut nh = onlink(oif, "255.255.255.255");
            let err = env
                .validator()
                .check(&RouteRequest::default(), &mut nh)
                .unwrap_err();
            assert!(matches!(err, FibError::InvalidArgument(_)));
        }
    }

    #[test]
    fn test_onlink_local_gateway_rejected() {
        let env = Env::new();
        let mut nh = onlink(5, "192.168.0.10");
        let err = env
            .validator()
            .check(&RouteRequest::default(), &mut nh)
            .unwrap_err();
        assert!(matches!(err, FibError::InvalidArgument(_)));
    }

    #[test]
    fn test_onlink_device_errors() {
        let env = Env::new();
        let validator = env.validator();

        let mut missing = onlink(42, "172.16.0.1");
        assert_eq!(
            validator.check(&RouteRequest::default(), &mut missing),
            Err(FibError::NoSuchDevice(42))
        );

        let mut down = onlink(6, "172.16.0.1");
        assert_eq!(
            validator.check(&RouteRequest::default(), &mut down),
            Err(FibError::NetworkDown(6))
        );
        assert_eq!(env.devices.ref_count(6), Some(0));
    }

    #[test]
    fn test_recursive_success() {
        let env = Env::new();
        let mut nh = NextHop::new(0).with_gateway(addr("192.168.0.1"));
        env.validator()
            .check(&RouteRequest::default(), &mut nh)
            .unwrap();

        assert_eq!(nh.oif(), 5);
        assert_eq!(nh.scope(), Scope::LINK);
        assert_eq!(nh.device(), env.devices.device_by_index(5));
        assert_eq!(env.devices.ref_count(5), Some(1));
    }

    #[test]
    fn test_recursive_lookup_error_propagates() {
        let env = Env::new();
        let mut nh = NextHop::new(0).with_gateway(addr("203.0.113.1"));
        assert_eq!(
            env.validator().check(&RouteRequest::default(), &mut nh),
            Err(FibError::HostUnreachable)
        );
    }

    #[test]
    fn test_recursive_wrong_route_type() {
        let env = Env::new();
        let mut nh = NextHop::new(0).with_gateway(addr("224.0.0.9"));
        let err = env
            .validator()
            .check(&RouteRequest::default(), &mut nh)
            .unwrap_err();
        assert!(matches!(err, FibError::InvalidArgument(_)));
        assert_eq!(env.devices.ref_count(5), Some(0));
    }

    #[test]
    fn test_recursive_device_down() {
        let env = Env::new();
        let mut nh = NextHop::new(0).with_gateway(addr("10.6.0.1"));
        assert_eq!(
            env.validator().check(&RouteRequest::default(), &mut nh),
            Err(FibError::NetworkDown(6))
        );
        assert_eq!(env.devices.ref_count(6), Some(0));
    }

    #[test]
    fn test_recursive_scope_floor() {
        let env = Env::new();
        // A route asking for link scope needs a host-scope gateway route,
        // which the table does not have.
        let request = RouteRequest {
            scope: Scope::LINK,
            ..RouteRequest::default()
        };
        let mut nh = NextHop::new(0).with_gateway(addr("192.168.0.1"));
        assert_eq!(
            env.validator().check(&request, &mut nh),
            Err(FibError::HostUnreachable)
        );
    }

    #[test]
    fn test_check_route_stops_at_first_failure() {
        let env = Env::new();
        let mut info = RouteInfo::new(3, 0)
            .with_nexthop(NextHop::new(0).with_gateway(addr("192.168.0.1")))
            .with_nexthop(NextHop::new(0).with_gateway(addr("203.0.113.1")));

        let err = env
            .validator()
            .check_route(&RouteRequest::default(), &mut info)
            .unwrap_err();
        assert_eq!(err, FibError::HostUnreachable);
        assert_eq!(env.devices.ref_count(5), Some(1));

        info.release_devices(env.devices.as_ref());
        assert_eq!(env.devices.ref_count(5), Some(0));
    }
}
