//! Core library for `kvsecrets`.
//!
//! Sits between callers and a `kvsecrets-storage` backend:
//!
//! - [`selector`] picks the SQL or plugin backend at startup and decides
//!   whether a plugin failure is fatal.
//! - [`cache`] wraps the chosen backend with a TTL read cache that is
//!   invalidated on every successful write.
//! - [`fixed`] binds one `(org, namespace, type)` triple for call sites that
//!   always address the same secret.
//! - [`migration`] moves legacy inline data-source secrets into the store.
//!
//! [`config`] loads the tunables, [`crypto`] provides the value cipher used
//! by the SQL backend.

pub mod cache;
pub mod config;
pub mod crypto;
pub mod datasource;
pub mod error;
pub mod events;
pub mod fixed;
pub mod migration;
pub mod selector;
