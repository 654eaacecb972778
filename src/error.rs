use thiserror::Error;

type Cause = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Query construction error: {0}")]
    QueryConstruction(String),
    #[error("Query execution error: {message}")]
    QueryExecution {
        message: String,
        #[source]
        source: Option<Cause>,
    },
    #[error("Transaction not closed: {pending} pending operation(s) were discarded")]
    TransactionNotClosed { pending: usize },
    #[error("No matching row found")]
    NotFound,
    #[error("Expected a single row but the query returned {rows}")]
    AmbiguousResult { rows: usize },
    #[error("Invalid transaction state: {0}")]
    InvalidState(String),
    #[error("Unknown attribute '{field}' on entity '{entity}'")]
    InvalidAttribute { entity: String, field: String },
    #[error("Pagination error: {0}")]
    Pagination(String),
    #[error("Config error: {0}")]
    Config(String),
    #[error("Model error: {0}")]
    Model(String),
    #[error("Lock poisoned: {0}")]
    Lock(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn execution(message: impl Into<String>) -> Self {
        Self::QueryExecution { message: message.into(), source: None }
    }
    pub fn construction(message: impl Into<String>) -> Self {
        Self::QueryConstruction(message.into())
    }
    /// True for faults raised by the backing store rather than by the caller.
    pub fn is_execution(&self) -> bool {
        matches!(self, Self::QueryExecution { .. })
    }
}

// Helper conversions
impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Self::QueryExecution { message: e.to_string(), source: Some(Box::new(e)) }
    }
}
impl From<rusqlite::types::FromSqlError> for Error {
    fn from(e: rusqlite::types::FromSqlError) -> Self {
        Self::QueryExecution { message: e.to_string(), source: Some(Box::new(e)) }
    }
}
impl From<config::ConfigError> for Error {
    fn from(e: config::ConfigError) -> Self { Self::Config(e.to_string()) }
}
impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self { Self::Model(e.to_string()) }
}
