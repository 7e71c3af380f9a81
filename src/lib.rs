//! Feature flags with persisted gates.
//!
//! A [`Registry`](registry::Registry) resolves feature keys to
//! [`Feature`](models::Feature) values, evaluates them against a
//! [`Thing`](models::Thing) and writes every mutation through an
//! [`Adapter`](adapter::Adapter).

pub mod adapter;
pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod groups;
pub mod models;
pub mod registry;

pub use error::{Error, Result, StorageError};
pub use registry::Registry;
