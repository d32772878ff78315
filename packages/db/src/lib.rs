//! Durable store adapter for the job queue system.
//!
//! This crate provides the [`JobStore`] contract and its backends:
//!
//! - [`MemoryStore`]: in-process store for development and tests
//! - [`SurrealStore`]: SurrealDB-backed store
//!
//! # Features
//!
//! - `memory` (default): Use in-memory SurrealDB storage
//! - `rocksdb`: Use RocksDB for persistent file-based storage

mod connection;
mod memory;
mod schema;
mod store;
mod surreal;

pub use connection::{Database, DbConfig, connect};
pub use memory::MemoryStore;
pub use schema::init_schema;
pub use store::{JobStore, StoreError};
pub use surreal::SurrealStore;

/// Connect with the given configuration and wrap the connection in a store.
pub async fn open(config: &DbConfig) -> Result<SurrealStore, StoreError> {
    Ok(SurrealStore::new(connect(config).await?))
}
