use serde::{Deserialize, Serialize};

/// The subject a feature is checked against (a user, an account, a host...).
///
/// Only the id matters for gating: actor gates compare it, percentage gates
/// hash it, and group predicates receive the whole value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Thing {
    pub id: String,
}

impl Thing {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

impl From<&str> for Thing {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for Thing {
    fn from(id: String) -> Self {
        Self { id }
    }
}
