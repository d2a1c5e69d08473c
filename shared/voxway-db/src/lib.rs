//! Voxway DB
//!
//! Postgres access for the control plane: connection pooling, transaction
//! helpers, and the schema bootstrap run at startup. All shared state lives
//! in the database; the process itself stays stateless.

mod error;
mod pool;
mod schema;

pub use error::{DbError, Result};
pub use pool::{DbPool, PoolConfig};
pub use schema::bootstrap_schema;

/// Re-export tokio-postgres types for convenience
pub use tokio_postgres::{types::ToSql, Row};
