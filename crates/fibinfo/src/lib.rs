//! Route-info pool for a forwarding information base.
//!
//! Routing-table entries share route descriptors ([`RouteInfo`]): origin
//! protocol, preferred source, priority, metrics and the list of next hops.
//! This crate keeps one copy of each distinct descriptor in a
//! reference-counted [`FibInfoPool`], builds descriptors from route-update
//! requests, validates their next hops and keeps them in step with device
//! state.
//!
//! # Architecture
//!
//! ```text
//!  RouteRequest + attribute buffer
//!           │
//!           ▼
//!  ┌─────────────────┐   ┌──────────────────┐   ┌──────────────┐
//!  │  attr (parser)  │──▶│ NextHopValidator │──▶│ FibInfoPool  │
//!  └─────────────────┘   └──────────────────┘   └──────────────┘
//!                          │            │               ▲
//!                          ▼            ▼               │
//!                   DeviceRegistry  RouteLookup   DeviceSyncer
//!                                                 (up/down events)
//! ```
//!
//! [`FibContext`] ties the pieces together and is the entry point for the
//! route-table layer.

pub mod attr;
pub mod builder;
pub mod classify;
pub mod config;
pub mod device;
pub mod error;
pub mod lookup;
pub mod nexthop;
pub mod pool;
pub mod request;
pub mod route_info;
pub mod sync;
pub mod validate;

pub use attr::{count_nexthops, encode_nexthops, parse_nexthops, NextHopRecord};
pub use builder::FibContext;
pub use classify::{AddressClassifier, Ipv4Classifier};
pub use config::FibConfig;
pub use device::{DeviceRef, DeviceRegistry, DeviceTable};
pub use error::{FibError, Result};
pub use lookup::{FlowKey, Resolution, RouteLookup, StaticLookup, StaticRoute};
pub use nexthop::{NextHop, NextHopFlags};
pub use pool::{EntrySnapshot, FibInfoId, FibInfoPool, FibInfoRef, LifeState, PoolStats};
pub use request::RouteRequest;
pub use route_info::{Metrics, RouteFlags, RouteInfo, METRICS_MAX};
pub use sync::{DeviceSyncer, SyncTarget};
pub use validate::NextHopValidator;
