//! Runtime configuration: YAML file with environment variable overrides.
//!
//! Everything has a sensible default, so running without a config file just
//! works: data lands in `./data`, snapshots are capped at 200, subnet
//! listings sort by VLAN.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use color_eyre::eyre::{eyre, WrapErr};
use color_eyre::Result;
use log::info;
use serde::{Deserialize, Serialize};

pub const DEFAULT_SNAPSHOT_LIMIT: usize = 200;

/// Listing order for subnets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    /// By network address, then prefix.
    Network,
    /// By VLAN id (untagged last), then network.
    Vlan,
    /// By name (case-insensitive), then network.
    Name,
}

impl FromStr for SortOrder {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "network" => Ok(SortOrder::Network),
            "vlan" => Ok(SortOrder::Vlan),
            "name" => Ok(SortOrder::Name),
            other => Err(format!(
                "unknown sort order '{}' (expected network, vlan or name)",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory holding the record sets, change log and snapshots.
    pub data_dir: PathBuf,
    /// Retention ceiling for snapshots; 0 is floored to 1 by the store.
    pub snapshot_limit: usize,
    pub default_sort: SortOrder,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            data_dir: PathBuf::from("data"),
            snapshot_limit: DEFAULT_SNAPSHOT_LIMIT,
            default_sort: SortOrder::Vlan,
        }
    }
}

/// Load configuration from a YAML file, then apply environment overrides
/// (`NETBLOCKS_DATA_DIR`, `NETBLOCKS_SNAPSHOT_LIMIT`,
/// `NETBLOCKS_DEFAULT_SORT`). With no path, defaults are used.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let mut config = match path {
        Some(path) => {
            info!("Loading configuration from: {:?}", path);
            let file = std::fs::File::open(path)
                .wrap_err_with(|| format!("Failed to open config file '{}'", path.display()))?;
            serde_yaml::from_reader(file)
                .wrap_err_with(|| format!("Failed to parse config file '{}'", path.display()))?
        }
        None => Config::default(),
    };
    apply_env_overrides(&mut config)?;
    Ok(config)
}

fn apply_env_overrides(config: &mut Config) -> Result<()> {
    if let Ok(dir) = std::env::var("NETBLOCKS_DATA_DIR") {
        config.data_dir = PathBuf::from(dir);
    }
    if let Ok(limit) = std::env::var("NETBLOCKS_SNAPSHOT_LIMIT") {
        config.snapshot_limit = limit
            .parse()
            .map_err(|_| eyre!("NETBLOCKS_SNAPSHOT_LIMIT must be a number, got '{}'", limit))?;
    }
    if let Ok(sort) = std::env::var("NETBLOCKS_DEFAULT_SORT") {
        config.default_sort = sort.parse().map_err(|e| eyre!("{}", e))?;
    }
    Ok(())
}
