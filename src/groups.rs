//! Named groups of subjects for group gates.
//!
//! A group is a predicate over [`Thing`]. Groups live in memory only; a
//! feature stores group *names*, and membership is resolved at check time. A
//! group gate naming an unregistered group never opens.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use crate::models::Thing;

type Predicate = dyn Fn(&Thing) -> bool + Send + Sync;

#[derive(Clone)]
pub struct Group {
    name: String,
    predicate: Arc<Predicate>,
}

impl Group {
    pub fn new<F>(name: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&Thing) -> bool + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            predicate: Arc::new(predicate),
        }
    }

    /// A group with a fixed member list.
    pub fn members<I, S>(name: impl Into<String>, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let ids: BTreeSet<String> = ids.into_iter().map(Into::into).collect();
        Self::new(name, move |thing: &Thing| ids.contains(&thing.id))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn contains(&self, thing: &Thing) -> bool {
        (self.predicate)(thing)
    }
}

impl fmt::Debug for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Group").field("name", &self.name).finish()
    }
}

/// Lookup table from group name to [`Group`].
#[derive(Debug, Default)]
pub struct Groups {
    groups: RwLock<BTreeMap<String, Group>>,
}

impl Groups {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `group`, returning the group it replaced, if any.
    pub fn register(&self, group: Group) -> Option<Group> {
        tracing::debug!("Registering group {}", group.name());
        self.groups
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(group.name.clone(), group)
    }

    pub fn unregister(&self, name: &str) -> Option<Group> {
        self.groups
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
    }

    pub fn group(&self, name: &str) -> Option<Group> {
        self.groups
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.groups
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    pub fn is_member(&self, name: &str, thing: &Thing) -> bool {
        self.group(name).is_some_and(|g| g.contains(thing))
    }
}

impl FromIterator<Group> for Groups {
    fn from_iter<T: IntoIterator<Item = Group>>(iter: T) -> Self {
        let groups = Self::new();
        for group in iter {
            groups.register(group);
        }
        groups
    }
}
