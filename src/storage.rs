//! Persistence layer
//!
//! A fault-reporting adapter over pluggable key/value back-ends, a schema
//! migrator, and the service that owns the versioned on-disk envelope.

mod adapter;
mod backend;
mod error;
mod file;
mod migration;
mod service;

pub use adapter::{FaultContext, FaultEvent, FaultSubscription, Operation, StorageAdapter, DEFAULT_MAX_SIZE};
pub use backend::{KeyValueBackend, MemoryBackend};
pub use error::{PersistError, StorageFault};
pub use file::FileBackend;
pub use migration::{Migration, MigrationService, Version, CURRENT_VERSION, LEGACY_VERSION};
pub use service::{Envelope, StorageService, DEFAULT_STORAGE_KEY};
