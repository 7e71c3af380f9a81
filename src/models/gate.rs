use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::thing::Thing;
use crate::error::Error;
use crate::groups::Groups;

/// The kind of a [`Gate`]. A feature holds at most one gate of each kind.
///
/// The string form is what adapters store in the gate `key` column.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum GateKind {
    Boolean,
    Actors,
    Groups,
    PercentageOfActors,
}

impl GateKind {
    pub const ALL: [GateKind; 4] = [
        Self::Boolean,
        Self::Actors,
        Self::Groups,
        Self::PercentageOfActors,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Boolean => "boolean",
            Self::Actors => "actors",
            Self::Groups => "groups",
            Self::PercentageOfActors => "percentage_of_actors",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "boolean" => Some(Self::Boolean),
            "actors" => Some(Self::Actors),
            "groups" => Some(Self::Groups),
            "percentage_of_actors" => Some(Self::PercentageOfActors),
            _ => None,
        }
    }
}

/// A whole percentage in `0..=100`.
#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(try_from = "i64", into = "u8")]
pub struct Percentage(u8);

impl Percentage {
    pub const ZERO: Percentage = Percentage(0);
    pub const FULL: Percentage = Percentage(100);

    pub fn new(value: i64) -> Result<Self, Error> {
        if (0..=100).contains(&value) {
            Ok(Self(value as u8))
        } else {
            Err(Error::validation(format!(
                "percentage must be between 0 and 100, got {}",
                value
            )))
        }
    }

    pub fn value(self) -> u8 {
        self.0
    }
}

impl TryFrom<i64> for Percentage {
    type Error = Error;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Percentage> for u8 {
    fn from(p: Percentage) -> Self {
        p.0
    }
}

/// A single enablement rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gate {
    /// On for everyone, with or without a subject.
    Boolean(bool),
    /// On for subjects whose id is listed.
    Actors(BTreeSet<String>),
    /// On for subjects accepted by any listed group.
    Groups(BTreeSet<String>),
    /// On for a stable slice of subjects.
    PercentageOfActors(Percentage),
}

impl Gate {
    pub fn kind(&self) -> GateKind {
        match self {
            Self::Boolean(_) => GateKind::Boolean,
            Self::Actors(_) => GateKind::Actors,
            Self::Groups(_) => GateKind::Groups,
            Self::PercentageOfActors(_) => GateKind::PercentageOfActors,
        }
    }

    /// Whether the gate opens for `thing` on the feature named `feature_key`.
    ///
    /// Everything except the boolean gate is closed when there is no subject.
    pub fn is_open(&self, feature_key: &str, thing: Option<&Thing>, groups: &Groups) -> bool {
        match (self, thing) {
            (Self::Boolean(on), _) => *on,
            (_, None) => false,
            (Self::Actors(ids), Some(thing)) => ids.contains(&thing.id),
            (Self::Groups(names), Some(thing)) => {
                names.iter().any(|name| groups.is_member(name, thing))
            }
            (Self::PercentageOfActors(pct), Some(thing)) => {
                bucket(feature_key, &thing.id) < u32::from(pct.value())
            }
        }
    }

    /// True when the gate cannot open for anything.
    pub fn is_inert(&self) -> bool {
        match self {
            Self::Boolean(on) => !on,
            Self::Actors(set) | Self::Groups(set) => set.is_empty(),
            Self::PercentageOfActors(pct) => pct.value() == 0,
        }
    }
}

/// Stable bucket in `0..100` for a subject on a feature.
///
/// The feature key is part of the hash so the same subject lands in
/// different buckets for different features.
pub fn bucket(feature_key: &str, thing_id: &str) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(feature_key.as_bytes());
    hasher.update(thing_id.as_bytes());
    hasher.finalize() % 100
}

/// The gates of one feature, keyed by kind.
///
/// Inert gates are never stored, so an empty set means the feature is off.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GateSet(BTreeMap<GateKind, Gate>);

impl GateSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, kind: GateKind) -> Option<&Gate> {
        self.0.get(&kind)
    }

    /// Stores `gate`, replacing any gate of the same kind. Inert gates remove
    /// the slot instead.
    pub fn insert(&mut self, gate: Gate) {
        let kind = gate.kind();
        if gate.is_inert() {
            self.0.remove(&kind);
        } else {
            self.0.insert(kind, gate);
        }
    }

    pub fn remove(&mut self, kind: GateKind) -> Option<Gate> {
        self.0.remove(&kind)
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn kinds(&self) -> Vec<GateKind> {
        self.0.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Gate> {
        self.0.values()
    }

    /// Flattens the set into `(kind, value)` rows, one per set member.
    pub fn to_rows(&self) -> Vec<(GateKind, String)> {
        let mut rows = Vec::new();
        for gate in self.iter() {
            match gate {
                Gate::Boolean(on) => rows.push((GateKind::Boolean, on.to_string())),
                Gate::Actors(ids) => {
                    rows.extend(ids.iter().map(|id| (GateKind::Actors, id.clone())))
                }
                Gate::Groups(names) => {
                    rows.extend(names.iter().map(|n| (GateKind::Groups, n.clone())))
                }
                Gate::PercentageOfActors(pct) => {
                    rows.push((GateKind::PercentageOfActors, pct.value().to_string()))
                }
            }
        }
        rows
    }

    /// Rebuilds a set from stored rows. Rows with an unknown kind or an
    /// unparseable value are skipped.
    pub fn from_rows<I>(rows: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut boolean = false;
        let mut actors = BTreeSet::new();
        let mut groups = BTreeSet::new();
        let mut percentage = Percentage::ZERO;

        for (key, value) in rows {
            match GateKind::from_str(&key) {
                Some(GateKind::Boolean) => boolean = value == "true",
                Some(GateKind::Actors) => {
                    actors.insert(value);
                }
                Some(GateKind::Groups) => {
                    groups.insert(value);
                }
                Some(GateKind::PercentageOfActors) => {
                    match value.parse::<i64>().ok().and_then(|v| Percentage::new(v).ok()) {
                        Some(p) => percentage = p,
                        None => tracing::warn!("Skipping invalid percentage value: {}", value),
                    }
                }
                None => tracing::warn!("Skipping unknown gate kind: {}", key),
            }
        }

        let mut set = Self::new();
        set.insert(Gate::Boolean(boolean));
        set.insert(Gate::Actors(actors));
        set.insert(Gate::Groups(groups));
        set.insert(Gate::PercentageOfActors(percentage));
        set
    }
}
