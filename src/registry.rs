//! Feature lookup, evaluation and mutation on top of an [`Adapter`].
//!
//! The registry keeps an in-memory copy of every feature it has handed out.
//! Unknown keys resolve to *ghost* features: they are cached but not written,
//! so they stay out of [`Registry::all`] until the first mutation. At most
//! [`RegistryOptions::ghost_capacity`] ghosts are cached; past that, ghosts are
//! still returned but every lookup reads storage.
//!
//! Mutations re-read the stored gates, apply the change and write the whole
//! gate set back in one adapter call. Within one registry, mutations and
//! removals run one at a time, so the cache always ends on the last write.
//! Across processes, concurrent mutations of the same feature are
//! last-write-wins.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use crate::adapter::Adapter;
use crate::error::{Error, Result};
use crate::groups::{Group, Groups};
use crate::models::{Feature, MutationTarget, Percentage, Thing};

pub const DEFAULT_GHOST_CAPACITY: usize = 1024;

/// Registry behaviour switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryOptions {
    /// Serve `get` from memory after the first load. Turn off when other
    /// processes write to the same store.
    pub cache: bool,
    /// Upper bound on cached ghost features.
    pub ghost_capacity: usize,
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self {
            cache: true,
            ghost_capacity: DEFAULT_GHOST_CAPACITY,
        }
    }
}

/// Cached features.
///
/// `generation` moves on every write to the cache made by a mutation, a
/// removal or an invalidation. A lookup that missed only fills its slot if the
/// generation is unchanged since before it read storage, so a slow read can
/// never overwrite a newer state.
#[derive(Debug, Default)]
struct Cache {
    entries: HashMap<String, Feature>,
    ghosts: HashSet<String>,
    generation: u64,
}

impl Cache {
    fn evict(&mut self, key: &str) {
        self.entries.remove(key);
        self.ghosts.remove(key);
        self.generation += 1;
    }
}

pub struct Registry {
    adapter: Arc<dyn Adapter>,
    groups: Groups,
    options: RegistryOptions,
    cache: RwLock<Cache>,
    /// Held across read, apply, write and cache update of every mutation.
    writes: Mutex<()>,
}

impl Registry {
    pub fn new(adapter: Arc<dyn Adapter>) -> Self {
        Self::with_options(adapter, Groups::new(), RegistryOptions::default())
    }

    pub fn with_groups(adapter: Arc<dyn Adapter>, groups: Groups) -> Self {
        Self::with_options(adapter, groups, RegistryOptions::default())
    }

    pub fn with_options(adapter: Arc<dyn Adapter>, groups: Groups, options: RegistryOptions) -> Self {
        tracing::debug!(
            "Creating registry on {} adapter (cache: {}, ghost capacity: {})",
            adapter.name(),
            options.cache,
            options.ghost_capacity
        );
        Self {
            adapter,
            groups,
            options,
            cache: RwLock::new(Cache::default()),
            writes: Mutex::new(()),
        }
    }

    pub fn adapter(&self) -> &dyn Adapter {
        self.adapter.as_ref()
    }

    // ============================================================
    // Lookup
    // ============================================================

    /// The feature named `key`.
    ///
    /// Returns the cached copy when there is one, otherwise the stored state,
    /// otherwise an empty ghost feature. Only a storage read failure is an
    /// error.
    pub fn get(&self, key: &str) -> Result<Feature> {
        if !self.options.cache {
            return Ok(self.load(key)?.0);
        }

        let generation = {
            let cache = self.read_cache();
            if let Some(feature) = cache.entries.get(key) {
                return Ok(feature.clone());
            }
            cache.generation
        };

        let (feature, ghost) = self.load(key)?;

        let mut cache = self.write_cache();
        if cache.generation != generation {
            // A mutation or invalidation ran while storage was being read
            return Ok(match cache.entries.get(key) {
                Some(newer) => newer.clone(),
                None => feature,
            });
        }
        if ghost {
            if cache.ghosts.len() >= self.options.ghost_capacity {
                tracing::trace!("Ghost cache full, not caching {}", key);
                return Ok(feature);
            }
            cache.ghosts.insert(key.to_string());
        }
        Ok(cache
            .entries
            .entry(key.to_string())
            .or_insert(feature)
            .clone())
    }

    /// Every persisted feature, in storage order. Ghosts are not included.
    pub fn all(&self) -> Result<Vec<Feature>> {
        self.adapter
            .features()?
            .iter()
            .map(|key| self.get(key))
            .collect()
    }

    /// Whether `feature` has been written to storage, as opposed to only
    /// existing in memory.
    pub fn is_persisted(&self, feature: &Feature) -> Result<bool> {
        Ok(self
            .adapter
            .features()?
            .iter()
            .any(|key| key == feature.key()))
    }

    pub fn is_enabled(&self, key: &str, thing: Option<&Thing>) -> Result<bool> {
        Ok(self.get(key)?.is_enabled(thing, &self.groups))
    }

    // ============================================================
    // Mutation
    // ============================================================

    /// Opens the gate addressed by `target` on `key`.
    ///
    /// Pass `true` to turn the feature on for everyone.
    pub fn enable(&self, key: &str, target: impl Into<MutationTarget>) -> Result<Feature> {
        let target = target.into();
        tracing::info!("Enabling {} for {:?}", key, target);
        self.mutate(key, |feature| feature.enable(target))
    }

    /// Closes the gate addressed by `target` on `key`.
    ///
    /// A boolean target (`false` by convention) clears every gate.
    pub fn disable(&self, key: &str, target: impl Into<MutationTarget>) -> Result<Feature> {
        let target = target.into();
        tracing::info!("Disabling {} for {:?}", key, target);
        self.mutate(key, |feature| feature.disable(target))
    }

    pub fn enable_group(&self, key: &str, group: impl Into<String>) -> Result<Feature> {
        self.enable(key, MutationTarget::group(group))
    }

    pub fn disable_group(&self, key: &str, group: impl Into<String>) -> Result<Feature> {
        self.disable(key, MutationTarget::group(group))
    }

    pub fn enable_actor(&self, key: &str, actor: impl Into<String>) -> Result<Feature> {
        self.enable(key, MutationTarget::actor(actor))
    }

    pub fn disable_actor(&self, key: &str, actor: impl Into<String>) -> Result<Feature> {
        self.disable(key, MutationTarget::actor(actor))
    }

    pub fn enable_percentage_of_actors(&self, key: &str, percentage: i64) -> Result<Feature> {
        self.enable(key, MutationTarget::percentage(percentage))
    }

    pub fn disable_percentage_of_actors(&self, key: &str) -> Result<Feature> {
        self.disable(key, Percentage::ZERO)
    }

    /// Deletes the feature and all its gates. Afterwards `key` resolves to a
    /// ghost again. Returns whether anything was stored.
    pub fn remove(&self, key: &str) -> Result<bool> {
        let _writes = self.writes.lock().unwrap_or_else(PoisonError::into_inner);
        let removed = self.adapter.remove(key)?;
        self.invalidate(key);
        if removed {
            tracing::info!("Removed feature {}", key);
        }
        Ok(removed)
    }

    fn mutate<F>(&self, key: &str, apply: F) -> Result<Feature>
    where
        F: FnOnce(&mut Feature) -> Result<()>,
    {
        if key.trim().is_empty() {
            return Err(Error::validation("feature key must not be empty"));
        }

        let _writes = self.writes.lock().unwrap_or_else(PoisonError::into_inner);

        let (mut feature, _) = self.load(key)?;
        apply(&mut feature)?;

        if let Err(e) = self.adapter.write(key, feature.gates()) {
            tracing::error!("Failed to persist feature {}: {}", key, e);
            return Err(e.into());
        }

        tracing::debug!("Feature {} is now {}", key, feature.state().as_str());
        if self.options.cache {
            let mut cache = self.write_cache();
            cache.evict(key);
            cache.entries.insert(key.to_string(), feature.clone());
        }
        Ok(feature)
    }

    /// Reads `key` from storage. The flag is true for a ghost.
    fn load(&self, key: &str) -> Result<(Feature, bool)> {
        Ok(match self.adapter.get(key)? {
            Some(gates) => (Feature::with_gates(key, gates), false),
            None => {
                tracing::trace!("Materializing ghost feature {}", key);
                (Feature::new(key), true)
            }
        })
    }

    // ============================================================
    // Cache
    // ============================================================

    /// Drops the cached copy of `key` so the next `get` reads storage.
    pub fn invalidate(&self, key: &str) {
        self.write_cache().evict(key);
    }

    pub fn invalidate_all(&self) {
        let mut cache = self.write_cache();
        cache.entries.clear();
        cache.ghosts.clear();
        cache.generation += 1;
    }

    fn read_cache(&self) -> std::sync::RwLockReadGuard<'_, Cache> {
        self.cache.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_cache(&self) -> std::sync::RwLockWriteGuard<'_, Cache> {
        self.cache.write().unwrap_or_else(PoisonError::into_inner)
    }

    // ============================================================
    // Groups
    // ============================================================

    pub fn groups(&self) -> &Groups {
        &self.groups
    }

    pub fn group(&self, name: &str) -> Option<Group> {
        self.groups.group(name)
    }

    pub fn register_group(&self, group: Group) -> Option<Group> {
        self.groups.register(group)
    }
}
