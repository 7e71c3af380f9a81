use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use gatekeeper::adapter::{Adapter, MemoryAdapter};
use gatekeeper::db::Database;
use gatekeeper::groups::{Group, Groups};
use gatekeeper::models::*;
use gatekeeper::registry::{Registry, RegistryOptions};
use gatekeeper::{Error, StorageError};
use speculate2::speculate;

/// Memory adapter whose writes can be switched off to simulate a lost
/// connection.
#[derive(Default)]
struct FlakyAdapter {
    inner: MemoryAdapter,
    broken: AtomicBool,
}

impl FlakyAdapter {
    fn break_writes(&self) {
        self.broken.store(true, Ordering::SeqCst);
    }
}

impl Adapter for FlakyAdapter {
    fn name(&self) -> &'static str {
        "flaky"
    }

    fn features(&self) -> Result<Vec<String>, StorageError> {
        self.inner.features()
    }

    fn get(&self, key: &str) -> Result<Option<GateSet>, StorageError> {
        self.inner.get(key)
    }

    fn write(&self, key: &str, gates: &GateSet) -> Result<(), StorageError> {
        if self.broken.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("connection lost".to_string()));
        }
        self.inner.write(key, gates)
    }

    fn remove(&self, key: &str) -> Result<bool, StorageError> {
        self.inner.remove(key)
    }
}

/// Memory adapter whose next `get` stops after taking its snapshot and waits
/// until the test lets it return.
struct StallAdapter {
    inner: MemoryAdapter,
    armed: AtomicBool,
    reached: Barrier,
    release: Barrier,
}

impl StallAdapter {
    fn new() -> Self {
        Self {
            inner: MemoryAdapter::new(),
            armed: AtomicBool::new(false),
            reached: Barrier::new(2),
            release: Barrier::new(2),
        }
    }

    fn stall_next_get(&self) {
        self.armed.store(true, Ordering::SeqCst);
    }
}

impl Adapter for StallAdapter {
    fn name(&self) -> &'static str {
        "stall"
    }

    fn features(&self) -> Result<Vec<String>, StorageError> {
        self.inner.features()
    }

    fn get(&self, key: &str) -> Result<Option<GateSet>, StorageError> {
        let snapshot = self.inner.get(key)?;
        if self.armed.swap(false, Ordering::SeqCst) {
            self.reached.wait();
            self.release.wait();
        }
        Ok(snapshot)
    }

    fn write(&self, key: &str, gates: &GateSet) -> Result<(), StorageError> {
        self.inner.write(key, gates)
    }

    fn remove(&self, key: &str) -> Result<bool, StorageError> {
        self.inner.remove(key)
    }
}

/// Every gate set a cycling writer can leave behind for `key`.
fn cycle_states(key: &str) -> Vec<GateSet> {
    let mut on = GateSet::new();
    on.insert(Gate::Boolean(true));

    let mut on_with_actor = on.clone();
    on_with_actor.insert(Gate::Actors(BTreeSet::from(["a".to_string()])));

    vec![GateSet::new(), on, on_with_actor, last_write(key)]
}

fn last_write(key: &str) -> GateSet {
    let mut gates = GateSet::new();
    gates.insert(Gate::Actors(BTreeSet::from([format!("last-{}", key)])));
    gates
}

/// Writers cycle their own key through on, on plus actor, and off while
/// readers poll every key through the registry and the adapter.
fn run_concurrent_cycles(adapter: Arc<dyn Adapter>) {
    let registry = Registry::new(adapter.clone());
    let keys: Vec<String> = (0..4).map(|i| format!("feature-{}", i)).collect();

    thread::scope(|s| {
        for key in &keys {
            let registry = &registry;
            s.spawn(move || {
                for _ in 0..50 {
                    registry.enable(key, true).unwrap();
                    registry.enable_actor(key, "a").unwrap();
                    registry.disable(key, false).unwrap();
                }
                registry.enable_actor(key, format!("last-{}", key)).unwrap();
            });
        }

        for _ in 0..4 {
            let registry = &registry;
            let adapter = &adapter;
            let keys = &keys;
            s.spawn(move || {
                for _ in 0..100 {
                    for key in keys {
                        let allowed = cycle_states(key);

                        let cached = registry.get(key).unwrap();
                        assert!(
                            allowed.contains(cached.gates()),
                            "registry showed a partial gate set for {}: {:?}",
                            key,
                            cached.gates()
                        );

                        if let Some(stored) = adapter.get(key).unwrap() {
                            assert!(
                                allowed.contains(&stored),
                                "adapter showed a partial gate set for {}: {:?}",
                                key,
                                stored
                            );
                        }

                        registry.is_enabled(key, Some(&Thing::new("a"))).unwrap();
                    }
                }
            });
        }
    });

    for key in &keys {
        let stored = adapter.get(key).unwrap().expect("feature missing");
        assert_eq!(stored, last_write(key));
        assert_eq!(registry.get(key).unwrap().gates(), &last_write(key));
    }
}

fn beta_groups() -> Groups {
    [Group::members("beta_testers", ["ann", "ben"])]
        .into_iter()
        .collect()
}

fn sqlite_registry() -> Registry {
    let db = Database::open_memory().expect("Failed to create in-memory database");
    db.migrate().expect("Failed to run migrations");
    Registry::with_groups(Arc::new(db), beta_groups())
}

speculate! {
    before {
        let registry = Registry::with_groups(Arc::new(MemoryAdapter::new()), beta_groups());
        let ann = Thing::new("ann");
        let zed = Thing::new("zed");
    }

    describe "get" {
        it "returns a ghost for a key that was never mutated" {
            let feature = registry.get("never-touched").expect("get failed");

            assert_eq!(feature.key(), "never-touched");
            assert!(feature.gates().is_empty());
            assert!(!registry.is_persisted(&feature).expect("query failed"));
            assert!(!feature.is_enabled(None, registry.groups()));
            assert!(!feature.is_enabled(Some(&ann), registry.groups()));
        }

        it "does not write ghosts through to storage" {
            registry.get("ghost").expect("get failed");
            registry.get("ghost").expect("get failed");

            assert!(registry.all().expect("all failed").is_empty());
            assert!(registry.adapter().get("ghost").expect("read failed").is_none());
        }

        it "loads persisted state written by another registry" {
            let adapter: Arc<dyn Adapter> = Arc::new(MemoryAdapter::new());
            let writer = Registry::new(adapter.clone());
            writer.enable_actor("search", "ann").expect("enable failed");

            let reader = Registry::new(adapter);
            let feature = reader.get("search").expect("get failed");
            assert_eq!(feature.actors(), vec!["ann"]);
        }
    }

    describe "enable and disable" {
        it "turns a feature on for everyone with true" {
            registry.enable("new-nav", true).expect("enable failed");

            assert!(registry.is_enabled("new-nav", None).unwrap());
            assert!(registry.is_enabled("new-nav", Some(&ann)).unwrap());
            assert!(registry.is_enabled("new-nav", Some(&zed)).unwrap());
        }

        it "turns a feature off with false" {
            registry.enable("new-nav", true).expect("enable failed");
            registry.disable("new-nav", false).expect("disable failed");

            assert!(!registry.is_enabled("new-nav", None).unwrap());
            assert!(!registry.is_enabled("new-nav", Some(&ann)).unwrap());
        }

        it "clears every gate on a default disable" {
            registry.enable_actor("new-nav", "zed").unwrap();
            registry.enable_group("new-nav", "beta_testers").unwrap();
            registry.enable_percentage_of_actors("new-nav", 50).unwrap();

            let feature = registry.disable("new-nav", false).expect("disable failed");

            assert_eq!(feature.state(), FeatureState::Off);
            assert!(registry.get("new-nav").unwrap().gates().is_empty());
            assert!(registry.is_persisted(&feature).unwrap());
        }

        it "enables single actors" {
            registry.enable_actor("search", "zed").unwrap();

            assert!(registry.is_enabled("search", Some(&zed)).unwrap());
            assert!(!registry.is_enabled("search", Some(&ann)).unwrap());
            assert!(!registry.is_enabled("search", None).unwrap());

            registry.disable_actor("search", "zed").unwrap();
            assert!(!registry.is_enabled("search", Some(&zed)).unwrap());
        }

        it "rejects percentages outside 0..=100 without writing" {
            let result = registry.enable("search", MutationTarget::percentage(150));

            assert!(matches!(result, Err(Error::Validation(_))));
            let feature = registry.get("search").unwrap();
            assert!(!registry.is_persisted(&feature).unwrap());
        }

        it "rejects an empty key" {
            assert!(matches!(registry.enable("", true), Err(Error::Validation(_))));
        }
    }

    describe "groups" {
        it "enables a feature for members of a group only" {
            registry.enable("new-nav", MutationTarget::group("beta_testers")).unwrap();

            assert!(registry.is_enabled("new-nav", Some(&ann)).unwrap());
            assert!(!registry.is_enabled("new-nav", Some(&zed)).unwrap());

            let keys: Vec<String> = registry
                .all()
                .unwrap()
                .iter()
                .map(|f| f.key().to_string())
                .collect();
            assert_eq!(keys, vec!["new-nav"]);
        }

        it "stops matching after disable_group" {
            registry.enable_group("new-nav", "beta_testers").unwrap();
            registry.disable_group("new-nav", "beta_testers").unwrap();

            assert!(!registry.is_enabled("new-nav", Some(&ann)).unwrap());
        }

        it "never matches an unregistered group" {
            registry.enable_group("new-nav", "nobody_registered_this").unwrap();
            assert!(!registry.is_enabled("new-nav", Some(&ann)).unwrap());
        }

        it "picks up groups registered later" {
            registry.enable_group("new-nav", "staff").unwrap();
            assert!(!registry.is_enabled("new-nav", Some(&zed)).unwrap());

            registry.register_group(Group::new("staff", |t: &Thing| t.id == "zed"));
            assert!(registry.group("staff").is_some());
            assert!(registry.is_enabled("new-nav", Some(&zed)).unwrap());
        }
    }

    describe "percentage of actors" {
        it "gives the same answer on repeated checks" {
            registry.enable_percentage_of_actors("rollout", 30).unwrap();

            for i in 0..100 {
                let thing = Thing::new(format!("user-{}", i));
                let first = registry.is_enabled("rollout", Some(&thing)).unwrap();
                assert_eq!(registry.is_enabled("rollout", Some(&thing)).unwrap(), first);
            }
        }

        it "only grows the enabled set as the percentage rises" {
            let things: Vec<Thing> = (0..300).map(|i| Thing::new(format!("u{}", i))).collect();
            let mut enabled = vec![false; things.len()];

            for pct in [0, 5, 10, 25, 50, 75, 99, 100] {
                registry.enable_percentage_of_actors("rollout", pct).unwrap();
                for (i, thing) in things.iter().enumerate() {
                    let now = registry.is_enabled("rollout", Some(thing)).unwrap();
                    assert!(now || !enabled[i], "{} dropped out at {}%", thing.id, pct);
                    enabled[i] = now;
                }
            }

            assert!(enabled.iter().all(|e| *e));
        }

        it "resets to zero on disable" {
            registry.enable_percentage_of_actors("rollout", 100).unwrap();
            registry.disable_percentage_of_actors("rollout").unwrap();

            assert_eq!(registry.get("rollout").unwrap().percentage_of_actors(), Percentage::ZERO);
            assert!(!registry.is_enabled("rollout", Some(&ann)).unwrap());
        }
    }

    describe "persistence" {
        it "marks a ghost persisted after any mutation" {
            let ghost = registry.get("new-nav").unwrap();
            assert!(!registry.is_persisted(&ghost).unwrap());

            registry.disable("new-nav", false).unwrap();
            assert!(registry.is_persisted(&ghost).unwrap());
        }

        it "lists persisted features in write order" {
            registry.enable("b", true).unwrap();
            registry.get("ghost").unwrap();
            registry.enable("a", true).unwrap();

            let keys: Vec<String> = registry
                .all()
                .unwrap()
                .iter()
                .map(|f| f.key().to_string())
                .collect();
            assert_eq!(keys, vec!["b", "a"]);
        }

        it "turns a removed feature back into a ghost" {
            registry.enable("search", true).unwrap();

            assert!(registry.remove("search").unwrap());
            assert!(!registry.remove("search").unwrap());

            let feature = registry.get("search").unwrap();
            assert!(!registry.is_persisted(&feature).unwrap());
            assert!(!registry.is_enabled("search", None).unwrap());
        }
    }

    describe "storage failures" {
        it "surfaces write failures and keeps the cached copy" {
            let adapter = Arc::new(FlakyAdapter::default());
            let flaky = Registry::new(adapter.clone());
            flaky.enable_actor("search", "ann").unwrap();

            adapter.break_writes();
            let result = flaky.enable("search", true);

            assert!(matches!(result, Err(Error::Storage(StorageError::Unavailable(_)))));
            let feature = flaky.get("search").unwrap();
            assert_eq!(feature.state(), FeatureState::Conditional);
            assert_eq!(feature.actors(), vec!["ann"]);
        }
    }

    describe "cache" {
        it "serves stale state until invalidated" {
            let adapter: Arc<dyn Adapter> = Arc::new(MemoryAdapter::new());
            let reader = Registry::new(adapter.clone());
            let writer = Registry::new(adapter);

            assert!(!reader.is_enabled("search", None).unwrap());
            writer.enable("search", true).unwrap();
            assert!(!reader.is_enabled("search", None).unwrap());

            reader.invalidate("search");
            assert!(reader.is_enabled("search", None).unwrap());
        }

        it "re-reads storage on every get when disabled" {
            let adapter: Arc<dyn Adapter> = Arc::new(MemoryAdapter::new());
            let reader = Registry::with_options(
                adapter.clone(),
                Groups::new(),
                RegistryOptions { cache: false, ..Default::default() },
            );
            let writer = Registry::new(adapter);

            assert!(!reader.is_enabled("search", None).unwrap());
            writer.enable("search", true).unwrap();
            assert!(reader.is_enabled("search", None).unwrap());
        }
    }

    describe "ghost capacity" {
        it "stops caching ghosts once the bound is reached" {
            let adapter: Arc<dyn Adapter> = Arc::new(MemoryAdapter::new());
            let reader = Registry::with_options(
                adapter.clone(),
                Groups::new(),
                RegistryOptions { ghost_capacity: 1, ..Default::default() },
            );
            let writer = Registry::new(adapter);

            assert!(!reader.is_enabled("a", None).unwrap());
            assert!(!reader.is_enabled("b", None).unwrap());
            writer.enable("a", true).unwrap();
            writer.enable("b", true).unwrap();

            // "a" took the only ghost slot, "b" is read from storage each time
            assert!(!reader.is_enabled("a", None).unwrap());
            assert!(reader.is_enabled("b", None).unwrap());
        }

        it "frees the ghost slot when that feature is mutated" {
            let adapter: Arc<dyn Adapter> = Arc::new(MemoryAdapter::new());
            let reader = Registry::with_options(
                adapter.clone(),
                Groups::new(),
                RegistryOptions { ghost_capacity: 1, ..Default::default() },
            );
            let writer = Registry::new(adapter);

            reader.get("a").unwrap();
            reader.enable_actor("a", "ann").unwrap();

            reader.get("c").unwrap();
            writer.enable("c", true).unwrap();
            assert!(!reader.is_enabled("c", None).unwrap());
        }
    }

    describe "concurrent access" {
        it "keeps an enable that lands while a lookup is reading storage" {
            let adapter = Arc::new(StallAdapter::new());
            let stalled = Registry::new(adapter.clone());
            adapter.stall_next_get();

            thread::scope(|s| {
                let lookup = s.spawn(|| stalled.get("new-nav"));
                adapter.reached.wait();
                stalled.enable("new-nav", true).unwrap();
                adapter.release.wait();

                let seen = lookup.join().unwrap().unwrap();
                assert!(seen.gates().is_empty() || seen.is_on());
            });

            assert!(adapter.inner.get("new-nav").unwrap().is_some());
            assert!(stalled.is_enabled("new-nav", None).unwrap());
        }

        it "keeps a removal that lands while a lookup is reading storage" {
            let adapter = Arc::new(StallAdapter::new());
            let stalled = Registry::new(adapter.clone());
            stalled.enable("new-nav", true).unwrap();
            stalled.invalidate("new-nav");
            adapter.stall_next_get();

            thread::scope(|s| {
                let lookup = s.spawn(|| stalled.get("new-nav"));
                adapter.reached.wait();
                assert!(stalled.remove("new-nav").unwrap());
                adapter.release.wait();
                lookup.join().unwrap().unwrap();
            });

            let feature = stalled.get("new-nav").unwrap();
            assert!(!stalled.is_persisted(&feature).unwrap());
            assert!(!stalled.is_enabled("new-nav", None).unwrap());
        }

        it "shows only whole gate sets to readers on the memory adapter" {
            run_concurrent_cycles(Arc::new(MemoryAdapter::new()));
        }

        it "shows only whole gate sets to readers on the sqlite adapter" {
            let db = Database::open_memory().expect("Failed to create in-memory database");
            db.migrate().expect("Failed to run migrations");
            run_concurrent_cycles(Arc::new(db));
        }
    }

    describe "sqlite adapter" {
        it "supports the beta testers scenario" {
            let registry = sqlite_registry();
            registry.enable("new-nav", MutationTarget::group("beta_testers")).unwrap();

            assert!(registry.is_enabled("new-nav", Some(&ann)).unwrap());
            assert!(!registry.is_enabled("new-nav", Some(&zed)).unwrap());

            let all = registry.all().unwrap();
            assert_eq!(all.len(), 1);
            assert_eq!(all[0].key(), "new-nav");
        }

        it "persists on first mutation only" {
            let registry = sqlite_registry();
            let ghost = registry.get("new-nav").unwrap();
            assert!(!registry.is_persisted(&ghost).unwrap());

            registry.enable("new-nav", true).unwrap();
            assert!(registry.is_persisted(&ghost).unwrap());
        }
    }
}
