use serde::{Deserialize, Serialize};

use super::gate::{GateKind, Percentage};

/// What an `enable` or `disable` call acts on.
///
/// `true`/`false` convert into [`MutationTarget::Boolean`], and a
/// [`Percentage`] converts into [`MutationTarget::Percentage`], so callers can
/// write `registry.enable("search", true)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationTarget {
    Boolean(bool),
    Actor(String),
    Group(String),
    /// Checked against `0..=100` when applied.
    Percentage(i64),
}

impl MutationTarget {
    pub fn actor(id: impl Into<String>) -> Self {
        Self::Actor(id.into())
    }

    pub fn group(name: impl Into<String>) -> Self {
        Self::Group(name.into())
    }

    pub fn percentage(value: i64) -> Self {
        Self::Percentage(value)
    }

    /// The gate this target reads and writes.
    pub fn gate_kind(&self) -> GateKind {
        match self {
            Self::Boolean(_) => GateKind::Boolean,
            Self::Actor(_) => GateKind::Actors,
            Self::Group(_) => GateKind::Groups,
            Self::Percentage(_) => GateKind::PercentageOfActors,
        }
    }
}

impl From<bool> for MutationTarget {
    fn from(on: bool) -> Self {
        Self::Boolean(on)
    }
}

impl From<Percentage> for MutationTarget {
    fn from(p: Percentage) -> Self {
        Self::Percentage(i64::from(p.value()))
    }
}
