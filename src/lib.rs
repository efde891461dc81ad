//! # Token Keeper Library
//!
//! Keeps short-lived third-party credentials fresh per tenant: each
//! registered (tenant, type) pair gets its own recurring refresh task with
//! bounded retry, and the latest value stays queryable over HTTP.
//!
//! Modules:
//! - `catalog` — credential types and remote-endpoint descriptors
//! - `scheduler` — recurring runner with bounded retry and cancellable waits
//! - `registry` — tenants, tasks, per-type refresh strategies, recovery
//! - `remote` — remote-call helper, dynamic-params suppliers, callbacks
//! - `store` — per-tenant flat key/value persistence
//! - `server` — registration and query API

pub mod catalog;
pub mod error;
pub mod registry;
pub mod remote;
pub mod scheduler;
pub mod server;
pub mod store;
pub mod tests;
pub mod utils;

pub use crate::catalog::{Catalog, CredentialType};
pub use crate::error::RefreshError;
pub use crate::registry::Registry;
