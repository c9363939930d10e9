use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("schema error: {0}")]
    SchemaError(String),

    #[error("query error: {0}")]
    QueryError(String),

    #[error("recording log error: {0}")]
    RecordingError(String),
}

impl From<scylla::transport::errors::NewSessionError> for PersistenceError {
    fn from(err: scylla::transport::errors::NewSessionError) -> Self {
        PersistenceError::Connection(err.to_string())
    }
}

impl From<scylla::transport::errors::QueryError> for PersistenceError {
    fn from(err: scylla::transport::errors::QueryError) -> Self {
        PersistenceError::QueryError(err.to_string())
    }
}

impl From<PersistenceError> for callbroker_core::BrokerError {
    fn from(err: PersistenceError) -> Self {
        callbroker_core::BrokerError::CollaboratorTransient(err.to_string())
    }
}
