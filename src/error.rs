use thiserror::Error;

/// Main error type for RouteScribe operations
#[derive(Error, Debug)]
pub enum RouteScribeError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Parser error: {0}")]
    Parser(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Template error: {0}")]
    Template(#[from] tera::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("File system error: {0}")]
    FileSystem(String),

    #[error("No application root found under {0}")]
    Discovery(String),

    #[error("Failed to load application: {0}")]
    Loading(String),

    #[error("Could not resolve {0}")]
    Resolution(String),

    #[error("Schema store error: {0}")]
    Schema(String),

    #[error("Table not found: {0}")]
    TableNotFound(String),

    #[error("Generation failed: {0}")]
    Generation(String),

    #[error("Test runner error: {0}")]
    TestRunner(String),
}

impl From<rusqlite::Error> for RouteScribeError {
    fn from(err: rusqlite::Error) -> Self {
        RouteScribeError::Schema(err.to_string())
    }
}

impl From<tokio_postgres::Error> for RouteScribeError {
    fn from(err: tokio_postgres::Error) -> Self {
        RouteScribeError::Schema(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RouteScribeError>;
