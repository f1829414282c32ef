//! Route-info build pipeline and device event entry points.

use fib_types::{Address, AddressType, RouteType, Scope};
use log::{debug, warn};
use std::sync::Arc;

use crate::attr::{count_nexthops, decode_nexthops, parse_nexthops};
use crate::classify::AddressClassifier;
use crate::config::FibConfig;
use crate::device::{DeviceRef, DeviceRegistry};
use crate::error::{FibError, Result};
use crate::lookup::RouteLookup;
use crate::nexthop::{NextHop, NextHopFlags};
use crate::pool::{FibInfoPool, FibInfoRef};
use crate::request::RouteRequest;
use crate::route_info::RouteInfo;
use crate::sync::{DeviceSyncer, SyncTarget};
use crate::validate::NextHopValidator;

/// The route-info layer: a pool plus the collaborators used to fill it.
pub struct FibContext {
    pool: FibInfoPool,
    registry: Arc<dyn DeviceRegistry>,
    lookup: Arc<dyn RouteLookup>,
    classifier: Arc<dyn AddressClassifier>,
    config: FibConfig,
}

impl FibContext {
    pub fn new(
        registry: Arc<dyn DeviceRegistry>,
        lookup: Arc<dyn RouteLookup>,
        classifier: Arc<dyn AddressClassifier>,
        config: FibConfig,
    ) -> Self {
        let pool = FibInfoPool::new(registry.clone(), config.max_entries);
        Self {
            pool,
            registry,
            lookup,
            classifier,
            config,
        }
    }

    pub fn pool(&self) -> &FibInfoPool {
        &self.pool
    }

    pub fn config(&self) -> &FibConfig {
        &self.config
    }

    pub fn syncer(&self) -> DeviceSyncer<'_> {
        DeviceSyncer::new(&self.pool)
    }

    fn validator(&self) -> NextHopValidator<'_> {
        NextHopValidator::new(
            self.registry.as_ref(),
            self.lookup.as_ref(),
            self.classifier.as_ref(),
        )
    }

    /// Builds, validates and registers the route info for `request`.
    ///
    /// `attrs` is the raw multipath attribute buffer, if the request carried
    /// one. On error the pool is unchanged and every device reference taken
    /// for the candidate has been returned.
    pub fn build_route_info(
        &self,
        request: &RouteRequest,
        attrs: Option<&[u8]>,
    ) -> Result<FibInfoRef> {
        if request.route_type.props().scope > request.scope {
            return Err(FibError::invalid(format!(
                "scope {} too wide for {} route",
                request.scope, request.route_type
            )));
        }

        let multipath = match attrs {
            Some(buf) => {
                let count = count_nexthops(buf);
                if count == 0 {
                    return Err(FibError::invalid("malformed next-hop attribute buffer"));
                }
                if count > 1 && !self.config.multipath {
                    return Err(FibError::invalid("multipath routes are disabled"));
                }
                Some((buf, count))
            }
            None => None,
        };

        let mut info = RouteInfo::from_request(request);
        if let Err(e) = self.populate(request, &mut info, multipath) {
            debug!(
                "FibContext: rejecting {} route (protocol {}): {}",
                request.route_type, request.protocol, e
            );
            info.release_devices(self.registry.as_ref());
            return Err(e);
        }

        self.pool.insert(info)
    }

    fn populate(
        &self,
        request: &RouteRequest,
        info: &mut RouteInfo,
        multipath: Option<(&[u8], usize)>,
    ) -> Result<()> {
        if request.route_type.is_reject() {
            if multipath.is_some() || request.has_inline_nexthop() {
                return Err(FibError::invalid(format!(
                    "{} route cannot carry next hops",
                    request.route_type
                )));
            }
            return Ok(());
        }

        match multipath {
            Some((buf, count)) => {
                info.reserve_nexthops(count);
                parse_nexthops(info, buf, request)?;
                check_inline_agrees(request, &info.nexthops()[0])?;
            }
            None => {
                let nh = NextHop::new(request.oif.unwrap_or(0))
                    .with_gateway(request.gateway.unwrap_or(Address::UNSPECIFIED))
                    .with_classid(request.classid.unwrap_or(0))
                    .with_flags(NextHopFlags::from_bits(request.flags).without_dead());
                info.push_nexthop(nh);
            }
        }

        if request.scope == Scope::HOST {
            self.bind_host(info)?;
        } else {
            let validator = self.validator();
            for nh in info.nexthops_mut() {
                if nh.is_direct() {
                    self.bind_direct(nh)?;
                } else {
                    validator.check(request, nh)?;
                }
            }
        }

        if self.config.check_prefsrc {
            self.check_prefsrc(request, info)?;
        }
        Ok(())
    }

    /// A host route is a single hop without gateway on an existing device.
    fn bind_host(&self, info: &mut RouteInfo) -> Result<()> {
        let [nh] = info.nexthops_mut() else {
            return Err(FibError::invalid("host route must have exactly one next hop"));
        };
        if !nh.is_direct() {
            return Err(FibError::invalid("host route cannot have a gateway"));
        }

        let dev = self
            .registry
            .device_by_index(nh.oif())
            .ok_or(FibError::NoSuchDevice(nh.oif()))?;
        self.registry.acquire(dev);
        nh.bind(dev);
        nh.set_scope(Scope::NOWHERE);
        Ok(())
    }

    fn bind_direct(&self, nh: &mut NextHop) -> Result<()> {
        if nh.flags().contains(NextHopFlags::PERVASIVE) || nh.flags().is_onlink() {
            return Err(FibError::invalid(
                "onlink or pervasive next hop needs a gateway",
            ));
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
        nh.set_scope(Scope::HOST);
        Ok(())
    }

    fn check_prefsrc(&self, request: &RouteRequest, info: &RouteInfo) -> Result<()> {
        let Some(src) = info.preferred_source() else {
            return Ok(());
        };
        if request.route_type == RouteType::Local && request.destination == Some(src) {
            return Ok(());
        }
        if self.classifier.classify(src) != AddressType::Local {
            return Err(FibError::invalid(format!(
                "preferred source {} is not a local address",
                src
            )));
        }
        Ok(())
    }

    /// Drops one reference to `entry`.
    pub fn release_route_info(&self, entry: FibInfoRef) {
        self.pool.release(entry);
    }

    /// Returns references to the entries a delete request designates.
    pub fn match_request(
        &self,
        request: &RouteRequest,
        attrs: Option<&[u8]>,
    ) -> Result<Vec<FibInfoRef>> {
        let multipath = match attrs {
            Some(buf) => decode_nexthops(buf, request)?,
            None => Vec::new(),
        };
        Ok(self.pool.find_matching(request, &multipath))
    }

    pub fn on_device_down(&self, dev: DeviceRef, force: bool) -> usize {
        self.syncer().sync_down(SyncTarget::Device(dev), force)
    }

    pub fn on_device_up(&self, dev: DeviceRef) -> usize {
        self.syncer().sync_up(dev)
    }

    /// Paths through a device being unregistered are always forced down.
    pub fn on_device_removed(&self, dev: DeviceRef) -> usize {
        let affected = self.on_device_down(dev, true);
        if affected > 0 {
            warn!(
                "FibContext: {} removed, {} entries lost a path",
                dev, affected
            );
        }
        affected
    }

    pub fn on_address_removed(&self, addr: Address) -> usize {
        self.syncer().sync_down(SyncTarget::Address(addr), false)
    }
}

/// Inline oif, gateway and realm must agree with the first listed hop.
fn check_inline_agrees(request: &RouteRequest, first: &NextHop) -> Result<()> {
    let oif_ok = request.oif.map_or(true, |oif| oif == first.oif());
    let gateway_ok = request.gateway.map_or(true, |gw| gw == first.gateway());
    let classid_ok = request.classid.map_or(true, |id| id == first.classid());
    if oif_ok && gateway_ok && classid_ok {
        Ok(())
    } else {
        Err(FibError::invalid(
            "inline next hop disagrees with the multipath list",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attr::{encode_nexthops, NextHopRecord};
    use crate::classify::Ipv4Classifier;
    use crate::device::DeviceTable;
    use crate::lookup::{StaticLookup, StaticRoute};
    use pretty_assertions::assert_eq;

    fn addr(s: &str) -> Address {
        s.parse().unwrap()
    }

    fn setup(config: FibConfig) -> (Arc<DeviceTable>, FibContext) {
        let devices = Arc::new(DeviceTable::new());
        devices.add_device(1, "lo", true);
        devices.add_device(5, "eth0", true);
        devices.add_device(6, "eth1", true);
        devices.add_address(5, addr("192.168.0.10"));

        let lookup: StaticLookup = [
            StaticRoute {
                prefix: addr("192.168.0.0"),
                prefix_len: 24,
                route_type: RouteType::Unicast,
                scope: Scope::LINK,
                oif: 5,
            },
            StaticRoute {
                prefix: addr("10.6.0.0"),
                prefix_len: 16,
                route_type: RouteType::Unicast,
                scope: Scope::LINK,
                oif: 6,
            },
        ]
        .into_iter()
        .collect();

        let ctx = FibContext::new(
            devices.clone(),
            Arc::new(lookup),
            Arc::new(Ipv4Classifier::new(devices.clone())),
            config,
        );
        (devices, ctx)
    }

    fn via(gateway: &str) -> RouteRequest {
        RouteRequest {
            protocol: 3,
            priority: 10,
            gateway: Some(addr(gateway)),
            ..RouteRequest::default()
        }
    }

    #[test]
    fn test_inline_gateway_route() {
        let (devices, ctx) = setup(FibConfig::default());
        let entry = ctx.build_route_info(&via("192.168.0.1"), None).unwrap();

        let info = entry.info();
        assert_eq!(info.nhs(), 1);
        assert_eq!(info.nexthops()[0].oif(), 5);
        assert_eq!(info.nexthops()[0].scope(), Scope::LINK);
        assert_eq!(devices.ref_count(5), Some(1));

        ctx.release_route_info(entry);
        assert_eq!(devices.ref_count(5), Some(0));
        assert!(ctx.pool().is_empty());
    }

    #[test]
    fn test_direct_route_binds_device() {
        let (devices, ctx) = setup(FibConfig::default());
        let request = RouteRequest {
            oif: Some(6),
            scope: Scope::LINK,
            ..RouteRequest::default()
        };
        let entry = ctx.build_route_info(&request, None).unwrap();
        let nh = entry.info().nexthops()[0].clone();
        assert_eq!(nh.scope(), Scope::HOST);
        assert_eq!(nh.device(), devices.device_by_index(6));
        assert_eq!(devices.ref_count(6), Some(1));
    }

    #[test]
    fn test_direct_route_device_errors() {
        let (devices, ctx) = setup(FibConfig::default());
        let request = RouteRequest {
            oif: Some(9),
            ..RouteRequest::default()
        };
        assert_eq!(
            ctx.build_route_info(&request, None).unwrap_err(),
            FibError::NoSuchDevice(9)
        );

        devices.set_up(6, false);
        let request = RouteRequest {
            oif: Some(6),
            ..RouteRequest::default()
        };
        assert_eq!(
            ctx.build_route_info(&request, None).unwrap_err(),
            FibError::NetworkDown(6)
        );
    }

    #[test]
    fn test_host_route() {
        let (devices, ctx) = setup(FibConfig::default());
        let request = RouteRequest {
            route_type: RouteType::Local,
            scope: Scope::HOST,
            oif: Some(1),
            ..RouteRequest::default()
        };
        let entry = ctx.build_route_info(&request, None).unwrap();
        assert_eq!(entry.info().nexthops()[0].scope(), Scope::NOWHERE);
        assert_eq!(devices.ref_count(1), Some(1));

        let with_gateway = RouteRequest {
            gateway: Some(addr("192.168.0.1")),
            ..request
        };
        assert!(matches!(
            ctx.build_route_info(&with_gateway, None),
            Err(FibError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_route_type_scope_check() {
        let (_, ctx) = setup(FibConfig::default());
        // Local routes must be host scope.
        let request = RouteRequest {
            route_type: RouteType::Local,
            oif: Some(1),
            ..RouteRequest::default()
        };
        assert!(matches!(
            ctx.build_route_info(&request, None),
            Err(FibError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_reject_route_has_no_nexthops() {
        let (_, ctx) = setup(FibConfig::default());
        let request = RouteRequest {
            route_type: RouteType::Unreachable,
            ..RouteRequest::default()
        };
        let entry = ctx.build_route_info(&request, None).unwrap();
        assert_eq!(entry.info().nhs(), 0);

        let with_hop = RouteRequest {
            oif: Some(5),
            ..request
        };
        assert!(matches!(
            ctx.build_route_info(&with_hop, None),
            Err(FibError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_multipath_route() {
        let (devices, ctx) = setup(FibConfig::default());
        let buf = encode_nexthops(&[
            NextHopRecord::new(0).with_gateway(addr("192.168.0.1")).with_weight(2),
            NextHopRecord::new(0).with_gateway(addr("10.6.0.1")),
        ]);
        let request = RouteRequest {
            protocol: 3,
            ..RouteRequest::default()
        };

        let entry = ctx.build_route_info(&request, Some(&buf)).unwrap();
        let info = entry.info();
        assert_eq!(info.nhs(), 2);
        assert_eq!(info.nexthops()[0].oif(), 5);
        assert_eq!(info.nexthops()[0].weight(), 2);
        assert_eq!(info.nexthops()[1].oif(), 6);
        assert_eq!(devices.ref_count(5), Some(1));
        assert_eq!(devices.ref_count(6), Some(1));
    }

    #[test]
    fn test_multipath_failure_releases_devices() {
        let (devices, ctx) = setup(FibConfig::default());
        let buf = encode_nexthops(&[
            NextHopRecord::new(0).with_gateway(addr("192.168.0.1")),
            NextHopRecord::new(0).with_gateway(addr("203.0.113.1")),
        ]);

        assert_eq!(
            ctx.build_route_info(&RouteRequest::default(), Some(&buf))
                .unwrap_err(),
            FibError::HostUnreachable
        );
        assert_eq!(devices.ref_count(5), Some(0));
        assert!(ctx.pool().is_empty());
    }

    #[test]
    fn test_multipath_disabled() {
        let (_, ctx) = setup(FibConfig {
            multipath: false,
            ..FibConfig::default()
        });
        let buf = encode_nexthops(&[NextHopRecord::new(5), NextHopRecord::new(6)]);
        assert!(matches!(
            ctx.build_route_info(&RouteRequest::default(), Some(&buf)),
            Err(FibError::InvalidArgument(_))
        ));

        // A single record is still accepted.
        let single = encode_nexthops(&[NextHopRecord::new(5)]);
        assert!(ctx
            .build_route_info(&RouteRequest::default(), Some(&single))
            .is_ok());
    }

    #[test]
    fn test_inline_must_agree_with_multipath() {
        let (_, ctx) = setup(FibConfig::default());
        let buf = encode_nexthops(&[NextHopRecord::new(5), NextHopRecord::new(6)]);
        let request = RouteRequest {
            oif: Some(6),
            ..RouteRequest::default()
        };
        assert!(matches!(
            ctx.build_route_info(&request, Some(&buf)),
            Err(FibError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_preferred_source() {
        let (_, ctx) = setup(FibConfig::default());

        let local = RouteRequest {
            preferred_source: Some(addr("192.168.0.10")),
            ..via("192.168.0.1")
        };
        assert!(ctx.build_route_info(&local, None).is_ok());

        let foreign = RouteRequest {
            preferred_source: Some(addr("192.168.0.99")),
            ..via("192.168.0.1")
        };
        assert!(matches!(
            ctx.build_route_info(&foreign, None),
            Err(FibError::InvalidArgument(_))
        ));

        // A local route may name its own destination as source.
        let own = RouteRequest {
            route_type: RouteType::Local,
            scope: Scope::HOST,
            oif: Some(1),
            destination: Some(addr("192.168.0.99")),
            preferred_source: Some(addr("192.168.0.99")),
            ..RouteRequest::default()
        };
        assert!(ctx.build_route_info(&own, None).is_ok());
    }

    #[test]
    fn test_prefsrc_check_can_be_disabled() {
        let (_, ctx) = setup(FibConfig {
            check_prefsrc: false,
            ..FibConfig::default()
        });
        let foreign = RouteRequest {
            preferred_source: Some(addr("192.168.0.99")),
            ..via("192.168.0.1")
        };
        assert!(ctx.build_route_info(&foreign, None).is_ok());
    }

    #[test]
    fn test_match_request() {
        let (_, ctx) = setup(FibConfig::default());
        let a = ctx.build_route_info(&via("192.168.0.1"), None).unwrap();
        let _b = ctx.build_route_info(&via("10.6.0.1"), None).unwrap();

        let matched = ctx.match_request(&via("192.168.0.1"), None).unwrap();
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0], a);

        let buf = encode_nexthops(&[NextHopRecord::new(6)]);
        let matched = ctx
            .match_request(&RouteRequest::default(), Some(&buf))
            .unwrap();
        assert_eq!(matched.len(), 1);
        assert_ne!(matched[0], a);
    }

    #[test]
    fn test_device_events() {
        let (devices, ctx) = setup(FibConfig::default());
        let entry = ctx.build_route_info(&via("192.168.0.1"), None).unwrap();
        let dev = devices.device_by_index(5).unwrap();

        devices.set_up(5, false);
        assert_eq!(ctx.on_device_down(dev, false), 1);
        assert!(entry.is_unreachable());

        devices.set_up(5, true);
        assert_eq!(ctx.on_device_up(dev), 1);
        assert!(!entry.is_unreachable());

        assert_eq!(ctx.on_device_removed(dev), 1);
        assert!(entry.is_unreachable());
    }

    #[test]
    fn test_address_removed() {
        let (devices, ctx) = setup(FibConfig::default());
        let src = addr("192.168.0.10");
        let entry = ctx
            .build_route_info(
                &RouteRequest {
                    preferred_source: Some(src),
                    ..via("192.168.0.1")
                },
                None,
            )
            .unwrap();

        devices.remove_address(src);
        assert_eq!(ctx.on_address_removed(src), 1);
        assert!(entry.is_unreachable());
        assert!(entry.info().nexthops().iter().all(|nh| nh.is_dead()));
        assert!(entry.select_nexthop(0).is_none());

        // Device churn does not bring the entry back without its source.
        let eth0 = devices.device_by_index(5).unwrap();
        assert_eq!(ctx.on_device_up(eth0), 0);
        assert!(entry.is_unreachable());
    }
}
