//! Engine metadata for GetSqlInfo.
//!
//! The result's `value` column is a dense union; each row's type id selects
//! the child that holds the value (0 = string, 1 = int32, 2 = int64,
//! 3 = int32 bitmask). [`SqlInfoRegistry`] owns the registered values and
//! builds the union batch, filtered by the requested codes.

use std::collections::BTreeMap;
use std::sync::Arc;

use arrow_array::{ArrayRef, Int32Array, Int64Array, RecordBatch, StringArray, UnionArray};
use arrow_buffer::ScalarBuffer;
use arrow_schema::{ArrowError, DataType, Field, UnionFields};

use super::SQL_INFO_SCHEMA;

/// Well-known SQL-info codes from the public enumeration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum SqlInfoId {
    ServerName = 0,
    ServerVersion = 1,
    ServerArrowVersion = 2,
    ServerReadOnly = 3,
    SqlDdlCatalog = 500,
    SqlDdlSchema = 501,
    SqlDdlTable = 502,
    SqlIdentifierCase = 503,
    SqlIdentifierQuoteChar = 504,
    SqlQuotedIdentifierCase = 505,
}

impl From<SqlInfoId> for i32 {
    fn from(id: SqlInfoId) -> i32 {
        id as i32
    }
}

/// A value registered under a SQL-info code. The variant fixes the dense
/// union child the row is encoded into.
#[derive(Clone, Debug, PartialEq)]
pub enum SqlInfoValue {
    String(String),
    Int32(i32),
    Int64(i64),
    Bitmask(i32),
}

impl From<&str> for SqlInfoValue {
    fn from(value: &str) -> Self {
        SqlInfoValue::String(value.to_string())
    }
}

impl From<String> for SqlInfoValue {
    fn from(value: String) -> Self {
        SqlInfoValue::String(value)
    }
}

impl From<i32> for SqlInfoValue {
    fn from(value: i32) -> Self {
        SqlInfoValue::Int32(value)
    }
}

impl From<i64> for SqlInfoValue {
    fn from(value: i64) -> Self {
        SqlInfoValue::Int64(value)
    }
}

impl From<bool> for SqlInfoValue {
    fn from(value: bool) -> Self {
        SqlInfoValue::Int32(value as i32)
    }
}

pub(crate) fn union_fields() -> UnionFields {
    UnionFields::new(
        vec![0, 1, 2, 3],
        vec![
            Field::new("string_value", DataType::Utf8, false),
            Field::new("int32_value", DataType::Int32, false),
            Field::new("bigint_value", DataType::Int64, false),
            Field::new("int32_bitmask", DataType::Int32, false),
        ],
    )
}

/// The SQL-info values a server advertises, keyed by code.
#[derive(Clone, Debug, Default)]
pub struct SqlInfoRegistry {
    entries: BTreeMap<i32, SqlInfoValue>,
}

impl SqlInfoRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Server-identity defaults every reference deployment registers.
    pub fn with_server_defaults(name: &str, version: &str, read_only: bool) -> Self {
        let mut registry = Self::new();
        registry.append(SqlInfoId::ServerName, name);
        registry.append(SqlInfoId::ServerVersion, version);
        registry.append(SqlInfoId::ServerArrowVersion, "1.3");
        registry.append(SqlInfoId::ServerReadOnly, read_only);
        registry.append(SqlInfoId::SqlDdlCatalog, false);
        registry.append(SqlInfoId::SqlDdlSchema, false);
        registry.append(SqlInfoId::SqlDdlTable, true);
        registry.append(SqlInfoId::SqlIdentifierCase, 1);
        registry.append(SqlInfoId::SqlIdentifierQuoteChar, "\"");
        registry.append(SqlInfoId::SqlQuotedIdentifierCase, 1);
        registry
    }

    /// Register a value. Re-registering a code replaces the old value.
    pub fn append(&mut self, id: impl Into<i32>, value: impl Into<SqlInfoValue>) {
        self.entries.insert(id.into(), value.into());
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Build the result batch for the requested codes. An empty request
    /// returns every registered value; unregistered codes are skipped.
    pub fn batch(&self, requested: &[i32]) -> Result<RecordBatch, ArrowError> {
        let codes: Vec<i32> = if requested.is_empty() {
            self.entries.keys().copied().collect()
        } else {
            requested
                .iter()
                .copied()
                .filter(|code| self.entries.contains_key(code))
                .collect()
        };

        let mut type_ids: Vec<i8> = Vec::with_capacity(codes.len());
        let mut offsets: Vec<i32> = Vec::with_capacity(codes.len());
        let mut strings: Vec<String> = Vec::new();
        let mut int32s: Vec<i32> = Vec::new();
        let mut bigints: Vec<i64> = Vec::new();
        let mut bitmasks: Vec<i32> = Vec::new();

        for code in &codes {
            match &self.entries[code] {
                SqlInfoValue::String(value) => {
                    type_ids.push(0);
                    offsets.push(strings.len() as i32);
                    strings.push(value.clone());
                }
                SqlInfoValue::Int32(value) => {
                    type_ids.push(1);
                    offsets.push(int32s.len() as i32);
                    int32s.push(*value);
                }
                SqlInfoValue::Int64(value) => {
                    type_ids.push(2);
                    offsets.push(bigints.len() as i32);
                    bigints.push(*value);
                }
                SqlInfoValue::Bitmask(value) => {
                    type_ids.push(3);
                    offsets.push(bitmasks.len() as i32);
                    bitmasks.push(*value);
                }
            }
        }

        let children: Vec<ArrayRef> = vec![
            Arc::new(StringArray::from(strings)),
            Arc::new(Int32Array::from(int32s)),
            Arc::new(Int64Array::from(bigints)),
            Arc::new(Int32Array::from(bitmasks)),
        ];
        let values = UnionArray::try_new(
            union_fields(),
            ScalarBuffer::from(type_ids),
            Some(ScalarBuffer::from(offsets)),
            children,
        )?;

        RecordBatch::try_new(
            SQL_INFO_SCHEMA.clone(),
            vec![Arc::new(Int32Array::from(codes)), Arc::new(values)],
        )
    }
}
