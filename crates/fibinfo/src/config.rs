//! Route-info layer configuration.

use serde::Deserialize;

/// Configuration for the route-info pool and build pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FibConfig {
    /// Maximum number of distinct live entries in the pool.
    pub max_entries: usize,
    /// Whether requests may carry more than one next hop.
    pub multipath: bool,
    /// Whether a preferred source must be an address of a local device.
    pub check_prefsrc: bool,
}

impl Default for FibConfig {
    fn default() -> Self {
        Self {
            max_entries: 65536,
            multipath: true,
            check_prefsrc: true,
        }
    }
}
