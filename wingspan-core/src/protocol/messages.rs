//! Wire messages of the Flight SQL command registry.
//!
//! Field numbers follow the published `arrow.flight.protocol.sql` schema so
//! that envelopes produced here interoperate with any compliant peer.

use bytes::Bytes;

/// An ad-hoc SQL query, carried in the command member of a flight descriptor.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CommandStatementQuery {
    /// The SQL text to execute. Must not be empty.
    #[prost(string, tag = "1")]
    pub query: ::prost::alloc::string::String,
    /// Optional client-chosen handle correlating this execution.
    #[prost(bytes = "bytes", optional, tag = "2")]
    pub client_execution_handle: ::core::option::Option<Bytes>,
}

/// Server-issued ticket for streaming the results of an ad-hoc query.
///
/// Clients treat the handle as opaque and pass it back verbatim on DoGet.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TicketStatementQuery {
    #[prost(bytes = "bytes", tag = "1")]
    pub statement_handle: Bytes,
}

/// Executes a previously created prepared statement. Carried in a flight
/// descriptor for GetFlightInfo (execute) and DoPut (parameter binding).
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CommandPreparedStatementQuery {
    #[prost(bytes = "bytes", tag = "1")]
    pub prepared_statement_handle: Bytes,
}

/// An ad-hoc SQL update, carried in a DoPut descriptor.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CommandStatementUpdate {
    #[prost(string, tag = "1")]
    pub query: ::prost::alloc::string::String,
}

/// Executes a prepared statement as an update, carried in a DoPut descriptor.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CommandPreparedStatementUpdate {
    #[prost(bytes = "bytes", tag = "1")]
    pub prepared_statement_handle: Bytes,
}

/// Requests the list of catalogs.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CommandGetCatalogs {}

/// Requests the list of database schemas.
///
/// An absent `catalog` leaves the search unconstrained; an empty string
/// selects schemas that have no catalog. The filter pattern treats `%` and
/// `_` as SQL LIKE metacharacters.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CommandGetDbSchemas {
    #[prost(string, optional, tag = "1")]
    pub catalog: ::core::option::Option<::prost::alloc::string::String>,
    #[prost(string, optional, tag = "2")]
    pub db_schema_filter_pattern: ::core::option::Option<::prost::alloc::string::String>,
}

/// Requests the list of tables, optionally with their serialized schemas.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CommandGetTables {
    #[prost(string, optional, tag = "1")]
    pub catalog: ::core::option::Option<::prost::alloc::string::String>,
    #[prost(string, optional, tag = "2")]
    pub db_schema_filter_pattern: ::core::option::Option<::prost::alloc::string::String>,
    #[prost(string, optional, tag = "3")]
    pub table_name_filter_pattern: ::core::option::Option<::prost::alloc::string::String>,
    /// Table types to include; empty means every type.
    #[prost(string, repeated, tag = "4")]
    pub table_types: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
    /// When set, each row additionally carries the table schema as an IPC
    /// schema message.
    #[prost(bool, tag = "5")]
    pub include_schema: bool,
}

/// Requests the list of table types the backend distinguishes.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CommandGetTableTypes {}

/// Requests engine metadata keyed by SQL-info code. An empty list requests
/// every registered value.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CommandGetSqlInfo {
    #[prost(int32, repeated, tag = "1")]
    pub info: ::prost::alloc::vec::Vec<i32>,
}

/// Requests the primary-key columns of a table.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CommandGetPrimaryKeys {
    #[prost(string, optional, tag = "1")]
    pub catalog: ::core::option::Option<::prost::alloc::string::String>,
    #[prost(string, optional, tag = "2")]
    pub db_schema: ::core::option::Option<::prost::alloc::string::String>,
    #[prost(string, tag = "3")]
    pub table: ::prost::alloc::string::String,
}

/// Requests the foreign keys declared on a table (keys it imports).
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CommandGetImportedKeys {
    #[prost(string, optional, tag = "1")]
    pub catalog: ::core::option::Option<::prost::alloc::string::String>,
    #[prost(string, optional, tag = "2")]
    pub db_schema: ::core::option::Option<::prost::alloc::string::String>,
    #[prost(string, tag = "3")]
    pub table: ::prost::alloc::string::String,
}

/// Requests the foreign keys of other tables that reference a table's
/// primary key (keys it exports).
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CommandGetExportedKeys {
    #[prost(string, optional, tag = "1")]
    pub catalog: ::core::option::Option<::prost::alloc::string::String>,
    #[prost(string, optional, tag = "2")]
    pub db_schema: ::core::option::Option<::prost::alloc::string::String>,
    #[prost(string, tag = "3")]
    pub table: ::prost::alloc::string::String,
}

/// Requests the foreign-key relationship between a parent (pk) table and a
/// foreign (fk) table.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CommandGetCrossReference {
    #[prost(string, optional, tag = "1")]
    pub pk_catalog: ::core::option::Option<::prost::alloc::string::String>,
    #[prost(string, optional, tag = "2")]
    pub pk_db_schema: ::core::option::Option<::prost::alloc::string::String>,
    #[prost(string, tag = "3")]
    pub pk_table: ::prost::alloc::string::String,
    #[prost(string, optional, tag = "4")]
    pub fk_catalog: ::core::option::Option<::prost::alloc::string::String>,
    #[prost(string, optional, tag = "5")]
    pub fk_db_schema: ::core::option::Option<::prost::alloc::string::String>,
    #[prost(string, tag = "6")]
    pub fk_table: ::prost::alloc::string::String,
}

/// Body of the `CreatePreparedStatement` action.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ActionCreatePreparedStatementRequest {
    #[prost(string, tag = "1")]
    pub query: ::prost::alloc::string::String,
}

/// Result of the `CreatePreparedStatement` action.
///
/// `dataset_schema` is empty when the backend cannot determine the result
/// schema before execution; `parameter_schema` is empty when the statement
/// takes no parameters. Both are IPC schema messages otherwise.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ActionCreatePreparedStatementResult {
    #[prost(bytes = "bytes", tag = "1")]
    pub prepared_statement_handle: Bytes,
    #[prost(bytes = "bytes", tag = "2")]
    pub dataset_schema: Bytes,
    #[prost(bytes = "bytes", tag = "3")]
    pub parameter_schema: Bytes,
}

/// Body of the `ClosePreparedStatement` action.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ActionClosePreparedStatementRequest {
    #[prost(bytes = "bytes", tag = "1")]
    pub prepared_statement_handle: Bytes,
}

/// Returned as DoPut app metadata after executing an update. A record count
/// of -1 means the backend could not determine how many rows were affected.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DoPutUpdateResult {
    #[prost(int64, tag = "1")]
    pub record_count: i64,
}
