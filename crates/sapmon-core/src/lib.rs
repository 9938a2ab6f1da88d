//! Provider/check execution engine for the SAP Monitor collector agent.
//!
//! This crate owns the polymorphic data model and scheduling core (C4–C9):
//! content loading, the provider registry and its `ProviderInstance` /
//! `ProviderCheck` contract, the check execution engine, the state store,
//! the config loader, and the shared error type. Concrete provider types
//! live in `sapmon-providers`; secret storage and the sink live in
//! `sapmon-secrets` / `sapmon-sink` and are wired in by `sapmon-cli`.

pub mod config;
pub mod content;
pub mod engine;
pub mod error;
pub mod migrate;
pub mod model;
pub mod record;
pub mod registry;
pub mod secrets;
pub mod state;

pub use error::{Result, SapmonError};

/// The agent's own version, stamped into every emitted record as `SAPMON_VERSION`.
pub const SAPMON_VERSION: &str = env!("CARGO_PKG_VERSION");
