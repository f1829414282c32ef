//! fibctl: replay a route-info scenario and dump the resulting pool.
//!
//! The scenario is a JSON document listing devices, lookup routes, route
//! requests to install and device events to apply afterwards.

use anyhow::{Context, Result};
use clap::Parser;
use fib_types::Address;
use fibinfo::{
    encode_nexthops, DeviceRegistry, DeviceTable, EntrySnapshot, FibConfig, FibContext, FibInfoId,
    FibInfoRef, Ipv4Classifier, NextHopRecord, PoolStats, RouteRequest, StaticLookup, StaticRoute,
};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

/// Route-info pool scenario runner
#[derive(Parser, Debug)]
#[command(name = "fibctl")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Scenario file (JSON)
    #[arg(short = 's', long)]
    scenario: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, default_value = "info")]
    log_level: String,

    /// Pretty-print the JSON report
    #[arg(short = 'p', long)]
    pretty: bool,
}

#[derive(Debug, Deserialize)]
struct DeviceSpec {
    ifindex: u32,
    name: String,
    #[serde(default = "default_up")]
    up: bool,
    #[serde(default)]
    addresses: Vec<Address>,
}

fn default_up() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct RouteSpec {
    name: String,
    #[serde(flatten)]
    request: RouteRequest,
    /// Multipath list; encoded into an attribute buffer when present.
    #[serde(default)]
    nexthops: Vec<NextHopRecord>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum Event {
    DeviceDown {
        ifindex: u32,
        #[serde(default)]
        force: bool,
    },
    DeviceUp {
        ifindex: u32,
    },
    DeviceRemoved {
        ifindex: u32,
    },
    AddressRemoved {
        address: Address,
    },
    Release {
        route: String,
    },
}

#[derive(Debug, Deserialize)]
struct Scenario {
    #[serde(default)]
    config: FibConfig,
    #[serde(default)]
    devices: Vec<DeviceSpec>,
    #[serde(default)]
    lookup: Vec<StaticRoute>,
    #[serde(default)]
    routes: Vec<RouteSpec>,
    #[serde(default)]
    events: Vec<Event>,
}

#[derive(Debug, Serialize)]
struct Rejected {
    route: String,
    error: String,
}

#[derive(Debug, Serialize)]
struct Report {
    entries: Vec<EntrySnapshot>,
    unreachable: Vec<FibInfoId>,
    rejected: Vec<Rejected>,
    stats: PoolStats,
}

fn load_scenario(path: &Path) -> Result<Scenario> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading scenario {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing scenario {}", path.display()))
}

fn run(args: &Args) -> Result<()> {
    let scenario = load_scenario(&args.scenario)?;

    let devices = Arc::new(DeviceTable::new());
    for dev in &scenario.devices {
        devices.add_device(dev.ifindex, dev.name.clone(), dev.up);
        for addr in &dev.addresses {
            devices.add_address(dev.ifindex, *addr);
        }
    }
    let lookup: StaticLookup = scenario.lookup.into_iter().collect();
    info!(
        "Loaded {} devices and {} lookup routes",
        devices.len(),
        lookup.len()
    );

    let ctx = FibContext::new(
        devices.clone(),
        Arc::new(lookup),
        Arc::new(Ipv4Classifier::new(devices.clone())),
        scenario.config,
    );

    let mut installed: HashMap<String, Vec<FibInfoRef>> = HashMap::new();
    let mut rejected = Vec::new();
    for route in &scenario.routes {
        let buf = (!route.nexthops.is_empty()).then(|| encode_nexthops(&route.nexthops));
        match ctx.build_route_info(&route.request, buf.as_deref()) {
            Ok(entry) => {
                info!("Installed {} as {}", route.name, entry.id());
                installed.entry(route.name.clone()).or_default().push(entry);
            }
            Err(e) => {
                warn!("Rejected {}: {}", route.name, e);
                rejected.push(Rejected {
                    route: route.name.clone(),
                    error: e.to_string(),
                });
            }
        }
    }

    for event in scenario.events {
        match event {
            Event::DeviceDown { ifindex, force } => match devices.device_by_index(ifindex) {
                Some(dev) => {
                    devices.set_up(ifindex, false);
                    ctx.on_device_down(dev, force);
                }
                None => warn!("Down event for unknown device {}", ifindex),
            },
            Event::DeviceUp { ifindex } => match devices.device_by_index(ifindex) {
                Some(dev) => {
                    devices.set_up(ifindex, true);
                    ctx.on_device_up(dev);
                }
                None => warn!("Up event for unknown device {}", ifindex),
            },
            Event::DeviceRemoved { ifindex } => match devices.device_by_index(ifindex) {
                Some(dev) => {
                    ctx.on_device_removed(dev);
                    devices.remove_device(ifindex);
                }
                None => warn!("Removal of unknown device {}", ifindex),
            },
            Event::AddressRemoved { address } => {
                devices.remove_address(address);
                ctx.on_address_removed(address);
            }
            Event::Release { route } => match installed.get_mut(&route).and_then(Vec::pop) {
                Some(entry) => ctx.release_route_info(entry),
                None => warn!("Release of unknown route {}", route),
            },
        }
    }

    let report = Report {
        entries: ctx.pool().snapshot(),
        unreachable: ctx.syncer().unreachable(),
        rejected,
        stats: ctx.pool().stats(),
    };
    let out = if args.pretty {
        serde_json::to_string_pretty(&report)?
    } else {
        serde_json::to_string(&report)?
    };
    println!("{}", out);
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&args.log_level))
        .init();

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("fibctl failed: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
