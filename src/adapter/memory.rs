use std::collections::HashMap;
use std::sync::RwLock;

use super::Adapter;
use crate::error::StorageError;
use crate::models::GateSet;

#[derive(Debug, Default)]
struct Store {
    order: Vec<String>,
    gates: HashMap<String, GateSet>,
}

/// Process-local adapter. State is lost when the value is dropped.
#[derive(Debug, Default)]
pub struct MemoryAdapter {
    store: RwLock<Store>,
}

impl MemoryAdapter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Adapter for MemoryAdapter {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn features(&self) -> Result<Vec<String>, StorageError> {
        let store = self.store.read().map_err(|_| StorageError::Poisoned)?;
        Ok(store.order.clone())
    }

    fn get(&self, key: &str) -> Result<Option<GateSet>, StorageError> {
        let store = self.store.read().map_err(|_| StorageError::Poisoned)?;
        Ok(store.gates.get(key).cloned())
    }

    fn write(&self, key: &str, gates: &GateSet) -> Result<(), StorageError> {
        let mut store = self.store.write().map_err(|_| StorageError::Poisoned)?;
        if store.gates.insert(key.to_string(), gates.clone()).is_none() {
            store.order.push(key.to_string());
        }
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<bool, StorageError> {
        let mut store = self.store.write().map_err(|_| StorageError::Poisoned)?;
        if store.gates.remove(key).is_none() {
            return Ok(false);
        }
        store.order.retain(|k| k != key);
        Ok(true)
    }
}
