//! Storage connector for the optional persistent backing store.
//!
//! A connection attempt walks three steps, each of which fails definitively:
//! resolve the configured driver, build the connection target, connect. A
//! failure at any step is reported as a [`StorageError`] and the server
//! continues with the in-memory manager. After connecting, the backend's
//! identity is queried for diagnostics; that query is allowed to fail.

mod connector;
mod driver;
mod errors;
mod handle;
mod target;

pub use connector::{SqlStorageConnector, StorageConnector, connect_storage};
pub use driver::{DriverKind, DriverParseError};
pub use errors::StorageError;
pub use handle::{BackendMetadata, StorageHandle};
pub use target::{ConnectionTarget, StorageSettings};

#[cfg(test)]
pub(crate) use connector::MockStorageConnector;
