use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::gate::{Gate, GateKind, GateSet, Percentage};
use super::target::MutationTarget;
use super::thing::Thing;
use crate::error::{Error, Result};
use crate::groups::Groups;

/// A named feature flag and its gates.
///
/// The key is fixed at construction. Mutations here only change the value in
/// memory; the [`Registry`](crate::Registry) is what writes them to storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feature {
    key: String,
    gates: GateSet,
}

/// The overall state of a feature.
///
/// - `On`: the boolean gate is open, every check passes
/// - `Off`: no gates, every check fails
/// - `Conditional`: the answer depends on the subject
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FeatureState {
    On,
    Off,
    Conditional,
}

impl FeatureState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::On => "on",
            Self::Off => "off",
            Self::Conditional => "conditional",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "on" => Some(Self::On),
            "off" => Some(Self::Off),
            "conditional" => Some(Self::Conditional),
            _ => None,
        }
    }
}

impl Feature {
    /// A feature with no gates.
    pub fn new(key: impl Into<String>) -> Self {
        Self::with_gates(key, GateSet::new())
    }

    pub fn with_gates(key: impl Into<String>, gates: GateSet) -> Self {
        Self {
            key: key.into(),
            gates,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn gates(&self) -> &GateSet {
        &self.gates
    }

    pub fn gate(&self, kind: GateKind) -> Option<&Gate> {
        self.gates.get(kind)
    }

    pub fn enabled_gate_kinds(&self) -> Vec<GateKind> {
        self.gates.kinds()
    }

    pub fn state(&self) -> FeatureState {
        if self.is_on() {
            FeatureState::On
        } else if self.gates.is_empty() {
            FeatureState::Off
        } else {
            FeatureState::Conditional
        }
    }

    /// True when any gate opens for `thing`.
    pub fn is_enabled(&self, thing: Option<&Thing>, groups: &Groups) -> bool {
        self.gates
            .iter()
            .any(|gate| gate.is_open(&self.key, thing, groups))
    }

    pub fn is_on(&self) -> bool {
        matches!(self.gate(GateKind::Boolean), Some(Gate::Boolean(true)))
    }

    pub fn actors(&self) -> Vec<&str> {
        self.members(GateKind::Actors)
    }

    pub fn groups(&self) -> Vec<&str> {
        self.members(GateKind::Groups)
    }

    pub fn percentage_of_actors(&self) -> Percentage {
        match self.gate(GateKind::PercentageOfActors) {
            Some(Gate::PercentageOfActors(p)) => *p,
            _ => Percentage::ZERO,
        }
    }

    /// Opens the gate addressed by `target`.
    ///
    /// `true` turns the feature fully on and drops every other gate. `false`
    /// behaves like a plain [`disable`](Self::disable).
    pub fn enable(&mut self, target: impl Into<MutationTarget>) -> Result<()> {
        match target.into() {
            MutationTarget::Boolean(true) => {
                self.gates.clear();
                self.gates.insert(Gate::Boolean(true));
            }
            MutationTarget::Boolean(false) => self.gates.clear(),
            MutationTarget::Actor(id) => {
                let id = non_empty("actor id", id)?;
                self.update_members(GateKind::Actors, id, true);
            }
            MutationTarget::Group(name) => {
                let name = non_empty("group name", name)?;
                self.update_members(GateKind::Groups, name, true);
            }
            MutationTarget::Percentage(value) => {
                let pct = Percentage::new(value)?;
                self.gates.insert(Gate::PercentageOfActors(pct));
            }
        }
        Ok(())
    }

    /// Closes the gate addressed by `target`.
    ///
    /// A boolean target clears every gate, leaving the feature off for
    /// everyone. A percentage target resets the rollout to zero whatever its
    /// value, as long as the value is a valid percentage.
    pub fn disable(&mut self, target: impl Into<MutationTarget>) -> Result<()> {
        match target.into() {
            MutationTarget::Boolean(_) => self.gates.clear(),
            MutationTarget::Actor(id) => {
                let id = non_empty("actor id", id)?;
                self.update_members(GateKind::Actors, id, false);
            }
            MutationTarget::Group(name) => {
                let name = non_empty("group name", name)?;
                self.update_members(GateKind::Groups, name, false);
            }
            MutationTarget::Percentage(value) => {
                Percentage::new(value)?;
                self.gates.remove(GateKind::PercentageOfActors);
            }
        }
        Ok(())
    }

    pub fn enable_group(&mut self, name: impl Into<String>) -> Result<()> {
        self.enable(MutationTarget::group(name))
    }

    pub fn disable_group(&mut self, name: impl Into<String>) -> Result<()> {
        self.disable(MutationTarget::group(name))
    }

    pub fn enable_actor(&mut self, id: impl Into<String>) -> Result<()> {
        self.enable(MutationTarget::actor(id))
    }

    pub fn disable_actor(&mut self, id: impl Into<String>) -> Result<()> {
        self.disable(MutationTarget::actor(id))
    }

    pub fn enable_percentage_of_actors(&mut self, value: i64) -> Result<()> {
        self.enable(MutationTarget::percentage(value))
    }

    pub fn disable_percentage_of_actors(&mut self) -> Result<()> {
        self.disable(MutationTarget::Percentage(0))
    }

    fn members(&self, kind: GateKind) -> Vec<&str> {
        match self.gate(kind) {
            Some(Gate::Actors(set)) | Some(Gate::Groups(set)) => {
                set.iter().map(String::as_str).collect()
            }
            _ => Vec::new(),
        }
    }

    fn update_members(&mut self, kind: GateKind, value: String, add: bool) {
        let mut set: BTreeSet<String> = match self.gate(kind) {
            Some(Gate::Actors(set)) | Some(Gate::Groups(set)) => set.clone(),
            _ => BTreeSet::new(),
        };

        if add {
            set.insert(value);
        } else {
            set.remove(&value);
        }

        let gate = match kind {
            GateKind::Actors => Gate::Actors(set),
            _ => Gate::Groups(set),
        };
        self.gates.insert(gate);
    }
}

fn non_empty(what: &str, value: String) -> Result<String> {
    if value.trim().is_empty() {
        Err(Error::validation(format!("{} must not be empty", what)))
    } else {
        Ok(value)
    }
}

/// Flat view of a feature, used for API and CLI output.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FeatureSummary {
    pub key: String,
    pub state: FeatureState,
    pub boolean: bool,
    pub actors: Vec<String>,
    pub groups: Vec<String>,
    pub percentage_of_actors: u8,
}

impl From<&Feature> for FeatureSummary {
    fn from(f: &Feature) -> Self {
        Self {
            key: f.key.clone(),
            state: f.state(),
            boolean: f.is_on(),
            actors: f.actors().into_iter().map(String::from).collect(),
            groups: f.groups().into_iter().map(String::from).collect(),
            percentage_of_actors: f.percentage_of_actors().value(),
        }
    }
}

impl From<Feature> for FeatureSummary {
    fn from(f: Feature) -> Self {
        Self::from(&f)
    }
}
