//! DB Error Types

use thiserror::Error;

pub type Result<T> = std::result::Result<T, DbError>;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("Connection error: {0}")]
    Connection(#[from] tokio_postgres::Error),

    #[error("Pool error: {0}")]
    Pool(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Row not found")]
    NotFound,
}

impl From<DbError> for voxway_core::VoxwayError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound => voxway_core::VoxwayError::NotFound("Row not found".to_string()),
            other => voxway_core::VoxwayError::Database(other.to_string()),
        }
    }
}
