//! The SQL backend collaborator interface.
//!
//! The dispatcher routes every decoded command into these traits. A backend
//! registers exactly the capabilities it has: statement execution is
//! required, while metadata discovery and SQL-info advertising are optional
//! accessors the dispatcher maps to NotImplemented when absent.
//!
//! Backend calls may block; the dispatcher always invokes them from a
//! blocking task.

mod filter;
pub mod memory;

pub use filter::{catalog_matches, like_match, pattern_matches, DbSchemaFilter, TableFilter};

use arrow_array::RecordBatch;
use arrow_schema::SchemaRef;
use thiserror::Error;

use crate::catalog::{DbSchemaEntry, KeyEntry, PrimaryKeyEntry, SqlInfoRegistry, TableEntry};

/// Failure surfaced by the SQL backend.
#[derive(Debug, Error)]
pub enum BackendError {
    /// Execution failed; `sqlstate` carries the engine's code when known.
    #[error("{message}")]
    Execution {
        message: String,
        sqlstate: Option<String>,
    },
    /// The backend cannot run this kind of statement at all.
    #[error("unsupported statement: {0}")]
    Unsupported(String),
    #[error("arrow error: {0}")]
    Arrow(#[from] arrow_schema::ArrowError),
}

impl BackendError {
    pub fn execution(message: impl Into<String>) -> Self {
        BackendError::Execution {
            message: message.into(),
            sqlstate: None,
        }
    }
}

/// A fully materialized query result. The schema always equals the schema
/// of every batch.
#[derive(Debug, Clone)]
pub struct QueryResult {
    pub schema: SchemaRef,
    pub batches: Vec<RecordBatch>,
}

/// Identifies a table for the key-discovery calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    pub catalog: Option<String>,
    pub db_schema: Option<String>,
    pub table: String,
}

impl TableRef {
    pub fn bare(table: impl Into<String>) -> Self {
        Self {
            catalog: None,
            db_schema: None,
            table: table.into(),
        }
    }
}

/// A compiled statement held alive by a prepared-statement context.
///
/// Dropping the value releases the backend statement and whatever
/// connection owns it.
pub trait PreparedQuery: Send {
    /// Schema of the expected parameter batch; empty when the statement
    /// takes no parameters.
    fn parameter_schema(&self) -> SchemaRef;

    /// Schema of the result set, when the backend can determine it before
    /// execution. `None` for statements that return no rows.
    fn result_schema(&self) -> Option<SchemaRef>;

    fn execute(&mut self, parameters: Option<RecordBatch>) -> Result<QueryResult, BackendError>;

    fn execute_update(&mut self, parameters: Option<RecordBatch>) -> Result<i64, BackendError>;
}

/// Catalog discovery. Filters follow the three-valued convention: an absent
/// field does not constrain, an empty string selects entries with no value,
/// and patterns treat `%` / `_` as LIKE metacharacters.
pub trait MetadataProvider: Send + Sync {
    fn catalogs(&self) -> Result<Vec<Option<String>>, BackendError>;

    fn db_schemas(&self, filter: &DbSchemaFilter) -> Result<Vec<DbSchemaEntry>, BackendError>;

    fn tables(&self, filter: &TableFilter) -> Result<Vec<TableEntry>, BackendError>;

    fn table_types(&self) -> Result<Vec<String>, BackendError>;

    fn primary_keys(&self, table: &TableRef) -> Result<Vec<PrimaryKeyEntry>, BackendError>;

    fn imported_keys(&self, table: &TableRef) -> Result<Vec<KeyEntry>, BackendError>;

    fn exported_keys(&self, table: &TableRef) -> Result<Vec<KeyEntry>, BackendError>;

    fn cross_reference(
        &self,
        pk_table: &TableRef,
        fk_table: &TableRef,
    ) -> Result<Vec<KeyEntry>, BackendError>;
}

/// The capability interface the dispatcher drives.
pub trait SqlBackend: Send + Sync + 'static {
    /// Determine the result schema of a query without executing it.
    fn plan_query(&self, sql: &str) -> Result<SchemaRef, BackendError>;

    fn execute_query(&self, sql: &str) -> Result<QueryResult, BackendError>;

    /// Run an update and report the affected row count (-1 when unknown).
    fn execute_update(&self, sql: &str) -> Result<i64, BackendError>;

    fn prepare(&self, sql: &str) -> Result<Box<dyn PreparedQuery>, BackendError>;

    /// Catalog discovery, when the backend supports it.
    fn metadata(&self) -> Option<&dyn MetadataProvider> {
        None
    }

    /// Advertised engine attributes, when the backend supplies them.
    fn sql_info(&self) -> Option<&SqlInfoRegistry> {
        None
    }
}
