//! Runtime configuration loaded from environment variables.

use std::path::PathBuf;

use crate::db::{StorageLocation, DEFAULT_FEATURES_TABLE, DEFAULT_GATES_TABLE};
use crate::error::{Error, Result};
use crate::groups::{Group, Groups};
use crate::registry::{RegistryOptions, DEFAULT_GHOST_CAPACITY};

#[derive(Clone, Debug)]
pub struct Config {
    /// SQLite file (from GATEKEEPER_DATABASE). `None` means the platform data dir.
    pub database: Option<PathBuf>,
    /// Table names (from GATEKEEPER_FEATURES_TABLE / GATEKEEPER_GATES_TABLE)
    pub location: StorageLocation,
    /// From GATEKEEPER_CACHE, `true` unless set to `false` or `0`
    pub cache: bool,
    /// Most ghost features kept in the cache (from GATEKEEPER_GHOST_CAPACITY)
    pub ghost_capacity: usize,
    /// Static groups (from GATEKEEPER_GROUPS, `name=id,id;name=id`)
    pub groups: Vec<(String, Vec<String>)>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let database = std::env::var("GATEKEEPER_DATABASE").ok().map(PathBuf::from);

        let location = StorageLocation::new(
            std::env::var("GATEKEEPER_FEATURES_TABLE")
                .unwrap_or_else(|_| DEFAULT_FEATURES_TABLE.to_string()),
            std::env::var("GATEKEEPER_GATES_TABLE")
                .unwrap_or_else(|_| DEFAULT_GATES_TABLE.to_string()),
        )?;

        let cache = std::env::var("GATEKEEPER_CACHE")
            .map(|v| parse_flag(&v))
            .unwrap_or(true);

        let ghost_capacity = match std::env::var("GATEKEEPER_GHOST_CAPACITY") {
            Ok(raw) => raw.trim().parse().map_err(|_| {
                Error::validation(format!("GATEKEEPER_GHOST_CAPACITY is not a count: {}", raw))
            })?,
            Err(_) => DEFAULT_GHOST_CAPACITY,
        };

        let groups = match std::env::var("GATEKEEPER_GROUPS") {
            Ok(raw) => parse_groups(&raw)?,
            Err(_) => Vec::new(),
        };

        Ok(Self {
            database,
            location,
            cache,
            ghost_capacity,
            groups,
        })
    }

    pub fn registry_options(&self) -> RegistryOptions {
        RegistryOptions {
            cache: self.cache,
            ghost_capacity: self.ghost_capacity,
        }
    }

    pub fn build_groups(&self) -> Groups {
        self.groups
            .iter()
            .map(|(name, ids)| Group::members(name.clone(), ids.iter().cloned()))
            .collect()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: None,
            location: StorageLocation::default(),
            cache: true,
            ghost_capacity: DEFAULT_GHOST_CAPACITY,
            groups: Vec::new(),
        }
    }
}

fn parse_flag(value: &str) -> bool {
    !matches!(value.trim().to_ascii_lowercase().as_str(), "false" | "0" | "no" | "off")
}

/// Parses `beta=alice,bob;staff=carol` into named member lists.
fn parse_groups(raw: &str) -> Result<Vec<(String, Vec<String>)>> {
    let mut groups = Vec::new();
    for entry in raw.split(';').map(str::trim).filter(|e| !e.is_empty()) {
        let (name, members) = entry
            .split_once('=')
            .ok_or_else(|| Error::validation(format!("group entry missing '=': {}", entry)))?;

        let name = name.trim();
        if name.is_empty() {
            return Err(Error::validation(format!("group entry has no name: {}", entry)));
        }

        let members = members
            .split(',')
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .map(String::from)
            .collect();
        groups.push((name.to_string(), members));
    }
    Ok(groups)
}
