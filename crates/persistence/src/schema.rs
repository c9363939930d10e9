//! ScyllaDB schema for the broker's two best-effort sinks (spec §6).

use crate::error::PersistenceError;
use scylla::Session;

pub async fn create_keyspace(
    session: &Session,
    keyspace: &str,
    replication_factor: u8,
) -> Result<(), PersistenceError> {
    let query = format!(
        "CREATE KEYSPACE IF NOT EXISTS {} WITH replication = {{'class': 'SimpleStrategy', 'replication_factor': {}}}",
        keyspace, replication_factor
    );

    session
        .query_unpaged(query, &[])
        .await
        .map_err(|e| PersistenceError::SchemaError(format!("failed to create keyspace: {}", e)))?;

    Ok(())
}

pub async fn create_tables(session: &Session, keyspace: &str) -> Result<(), PersistenceError> {
    let transcript_entries_table = format!(
        r#"
        CREATE TABLE IF NOT EXISTS {}.transcript_entries (
            call_id TEXT,
            seq BIGINT,
            speaker TEXT,
            text TEXT,
            language TEXT,
            confidence FLOAT,
            started_at TIMESTAMP,
            ended_at TIMESTAMP,
            PRIMARY KEY ((call_id), seq)
        ) WITH CLUSTERING ORDER BY (seq ASC)
    "#,
        keyspace
    );

    session
        .query_unpaged(transcript_entries_table, &[])
        .await
        .map_err(|e| {
            PersistenceError::SchemaError(format!("failed to create transcript_entries table: {}", e))
        })?;

    let intelligence_snapshots_table = format!(
        r#"
        CREATE TABLE IF NOT EXISTS {}.intelligence_snapshots (
            call_id TEXT,
            updated_at TIMESTAMP,
            entities_json TEXT,
            tactics_json TEXT,
            threat_score FLOAT,
            PRIMARY KEY ((call_id), updated_at)
        ) WITH CLUSTERING ORDER BY (updated_at DESC)
    "#,
        keyspace
    );

    session
        .query_unpaged(intelligence_snapshots_table, &[])
        .await
        .map_err(|e| {
            PersistenceError::SchemaError(format!(
                "failed to create intelligence_snapshots table: {}",
                e
            ))
        })?;

    tracing::info!("persistence schema ensured");
    Ok(())
}
