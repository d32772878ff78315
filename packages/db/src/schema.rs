//! Database schema definitions using SurrealQL.

use crate::{Database, StoreError};

/// Initialize the database schema.
///
/// Every statement is idempotent, so this runs on each connect.
pub async fn init_schema(db: &Database) -> Result<(), StoreError> {
    tracing::info!("Initializing database schema...");

    db.query(JOB_SCHEMA).await?.check()?;

    tracing::info!("Database schema initialized");

    Ok(())
}

/// Job table schema.
///
/// One row per job record. `state_list` names the state list the job belongs
/// to; `seq` orders members within a list; `data` holds the serialized record.
const JOB_SCHEMA: &str = r#"
DEFINE TABLE IF NOT EXISTS job SCHEMAFULL;

DEFINE FIELD IF NOT EXISTS queue ON job TYPE string;
DEFINE FIELD IF NOT EXISTS state_list ON job TYPE string;
DEFINE FIELD IF NOT EXISTS seq ON job TYPE string;
DEFINE FIELD IF NOT EXISTS available_at ON job TYPE int;
DEFINE FIELD IF NOT EXISTS version ON job TYPE int DEFAULT 0;
DEFINE FIELD IF NOT EXISTS data ON job TYPE string;

-- Claim polling walks one queue's list in seq order
DEFINE INDEX IF NOT EXISTS job_queue_list ON job FIELDS queue, state_list, seq;
"#;
