//! Domain models for feature flags.
//!
//! # Core Concepts
//!
//! - [`Feature`]: A named flag made of [`Gate`]s. It is enabled for a subject when
//!   any of its gates opens.
//! - [`Gate`]: One enablement rule: a boolean switch, an actor list, a group list
//!   or a percentage of actors. A feature holds at most one gate per [`GateKind`].
//! - [`Thing`]: The subject being checked, identified by an opaque id.
//! - [`MutationTarget`]: What an enable/disable call touches.
//!
//! A feature that was looked up but never written is a *ghost*: it exists in
//! memory with no gates and is not listed by storage until the first mutation.

mod feature;
mod gate;
mod target;
mod thing;

pub use feature::*;
pub use gate::*;
pub use target::*;
pub use thing::*;
