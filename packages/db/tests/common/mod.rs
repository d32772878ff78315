use db::{DbConfig, StoreError, SurrealStore};

/// Fresh SurrealDB store in its own in-memory database.
pub async fn surreal_store() -> Result<SurrealStore, StoreError> {
    let config = DbConfig::memory().with_database(format!("test_{}", ulid::Ulid::new()));
    db::open(&config).await
}
