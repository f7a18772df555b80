//! Fixed result layouts for the metadata queries.
//!
//! Every compliant server must emit these schemas exactly, so they live in
//! one place: static schema definitions plus row-struct builders that
//! produce matching record batches. Handlers never assemble metadata arrays
//! by hand.

mod sql_info;

pub use sql_info::{SqlInfoId, SqlInfoRegistry, SqlInfoValue};

use std::sync::Arc;

use arrow_array::builder::{BinaryBuilder, StringBuilder};
use arrow_array::{ArrayRef, Int32Array, RecordBatch, StringArray, UInt8Array};
use arrow_flight::{IpcMessage, SchemaAsIpc};
use arrow_ipc::writer::IpcWriteOptions;
use arrow_schema::{ArrowError, DataType, Field, Schema, SchemaRef};
use bytes::Bytes;
use once_cell::sync::Lazy;

use crate::protocol::Command;

/// Result layout for GetCatalogs.
pub static CATALOGS_SCHEMA: Lazy<SchemaRef> = Lazy::new(|| {
    Arc::new(Schema::new(vec![Field::new(
        "catalog_name",
        DataType::Utf8,
        true,
    )]))
});

/// Result layout for GetDbSchemas.
pub static DB_SCHEMAS_SCHEMA: Lazy<SchemaRef> = Lazy::new(|| {
    Arc::new(Schema::new(vec![
        Field::new("catalog_name", DataType::Utf8, true),
        Field::new("db_schema_name", DataType::Utf8, false),
    ]))
});

/// Result layout for GetTables without table schemas.
pub static TABLES_SCHEMA: Lazy<SchemaRef> = Lazy::new(|| {
    Arc::new(Schema::new(vec![
        Field::new("catalog_name", DataType::Utf8, true),
        Field::new("db_schema_name", DataType::Utf8, true),
        Field::new("table_name", DataType::Utf8, false),
        Field::new("table_type", DataType::Utf8, false),
    ]))
});

/// Result layout for GetTables with `include_schema` set; the extra column
/// carries each table's schema as an IPC schema message.
pub static TABLES_WITH_SCHEMA: Lazy<SchemaRef> = Lazy::new(|| {
    let mut fields: Vec<Field> = TABLES_SCHEMA
        .fields()
        .iter()
        .map(|f| f.as_ref().clone())
        .collect();
    fields.push(Field::new("table_schema", DataType::Binary, false));
    Arc::new(Schema::new(fields))
});

/// Result layout for GetTableTypes.
pub static TABLE_TYPES_SCHEMA: Lazy<SchemaRef> = Lazy::new(|| {
    Arc::new(Schema::new(vec![Field::new(
        "table_type",
        DataType::Utf8,
        false,
    )]))
});

/// Result layout for GetPrimaryKeys.
pub static PRIMARY_KEYS_SCHEMA: Lazy<SchemaRef> = Lazy::new(|| {
    Arc::new(Schema::new(vec![
        Field::new("catalog_name", DataType::Utf8, true),
        Field::new("db_schema_name", DataType::Utf8, true),
        Field::new("table_name", DataType::Utf8, false),
        Field::new("column_name", DataType::Utf8, false),
        Field::new("key_name", DataType::Utf8, true),
        Field::new("key_sequence", DataType::Int32, false),
    ]))
});

/// Result layout shared by GetImportedKeys, GetExportedKeys and
/// GetCrossReference.
pub static KEYS_SCHEMA: Lazy<SchemaRef> = Lazy::new(|| {
    Arc::new(Schema::new(vec![
        Field::new("pk_catalog_name", DataType::Utf8, true),
        Field::new("pk_db_schema_name", DataType::Utf8, true),
        Field::new("pk_table_name", DataType::Utf8, false),
        Field::new("pk_column_name", DataType::Utf8, false),
        Field::new("fk_catalog_name", DataType::Utf8, true),
        Field::new("fk_db_schema_name", DataType::Utf8, true),
        Field::new("fk_table_name", DataType::Utf8, false),
        Field::new("fk_column_name", DataType::Utf8, false),
        Field::new("key_sequence", DataType::Int32, false),
        Field::new("fk_key_name", DataType::Utf8, true),
        Field::new("pk_key_name", DataType::Utf8, true),
        Field::new("update_rule", DataType::UInt8, false),
        Field::new("delete_rule", DataType::UInt8, false),
    ]))
});

/// Result layout for GetSqlInfo.
pub static SQL_INFO_SCHEMA: Lazy<SchemaRef> = Lazy::new(|| {
    Arc::new(Schema::new(vec![
        Field::new("info_name", DataType::Int32, false),
        Field::new(
            "value",
            DataType::Union(sql_info::union_fields(), arrow_schema::UnionMode::Dense),
            false,
        ),
    ]))
});

/// The fixed result schema a command variant streams, if it has one.
///
/// Ad-hoc and prepared queries derive their schema from the statement, so
/// they return `None` here.
pub fn result_schema(command: &Command) -> Option<SchemaRef> {
    match command {
        Command::GetCatalogs(_) => Some(CATALOGS_SCHEMA.clone()),
        Command::GetDbSchemas(_) => Some(DB_SCHEMAS_SCHEMA.clone()),
        Command::GetTables(cmd) if cmd.include_schema => Some(TABLES_WITH_SCHEMA.clone()),
        Command::GetTables(_) => Some(TABLES_SCHEMA.clone()),
        Command::GetTableTypes(_) => Some(TABLE_TYPES_SCHEMA.clone()),
        Command::GetSqlInfo(_) => Some(SQL_INFO_SCHEMA.clone()),
        Command::GetPrimaryKeys(_) => Some(PRIMARY_KEYS_SCHEMA.clone()),
        Command::GetImportedKeys(_)
        | Command::GetExportedKeys(_)
        | Command::GetCrossReference(_) => Some(KEYS_SCHEMA.clone()),
        _ => None,
    }
}

/// Encode a schema as an IPC schema message, the form carried in
/// `table_schema`, `dataset_schema` and `parameter_schema` fields.
pub fn encode_schema(schema: &Schema) -> Result<Bytes, ArrowError> {
    let message: IpcMessage = SchemaAsIpc::new(schema, &IpcWriteOptions::default()).try_into()?;
    Ok(message.0)
}

/// Decode the IPC schema message form produced by [`encode_schema`].
pub fn decode_schema(bytes: impl Into<Bytes>) -> Result<Schema, ArrowError> {
    Schema::try_from(IpcMessage(bytes.into()))
}

/// One GetDbSchemas row.
#[derive(Clone, Debug, PartialEq)]
pub struct DbSchemaEntry {
    pub catalog: Option<String>,
    pub db_schema: String,
}

/// One GetTables row. `schema` is only emitted when the request asked for
/// table schemas; providers may always fill it.
#[derive(Clone, Debug)]
pub struct TableEntry {
    pub catalog: Option<String>,
    pub db_schema: Option<String>,
    pub name: String,
    pub table_type: String,
    pub schema: Option<SchemaRef>,
}

/// One GetPrimaryKeys row.
#[derive(Clone, Debug)]
pub struct PrimaryKeyEntry {
    pub catalog: Option<String>,
    pub db_schema: Option<String>,
    pub table: String,
    pub column: String,
    pub key_name: Option<String>,
    pub key_sequence: i32,
}

/// Referential action byte used by the `update_rule` / `delete_rule`
/// columns, per the registry enumeration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ReferentialRule {
    Cascade = 0,
    Restrict = 1,
    SetNull = 2,
    NoAction = 3,
    SetDefault = 4,
}

/// One imported/exported/cross-reference key row.
#[derive(Clone, Debug)]
pub struct KeyEntry {
    pub pk_catalog: Option<String>,
    pub pk_db_schema: Option<String>,
    pub pk_table: String,
    pub pk_column: String,
    pub fk_catalog: Option<String>,
    pub fk_db_schema: Option<String>,
    pub fk_table: String,
    pub fk_column: String,
    pub key_sequence: i32,
    pub fk_key_name: Option<String>,
    pub pk_key_name: Option<String>,
    pub update_rule: ReferentialRule,
    pub delete_rule: ReferentialRule,
}

pub fn catalogs_batch(rows: &[Option<String>]) -> Result<RecordBatch, ArrowError> {
    let names = StringArray::from(rows.to_vec());
    RecordBatch::try_new(CATALOGS_SCHEMA.clone(), vec![Arc::new(names)])
}

pub fn db_schemas_batch(rows: &[DbSchemaEntry]) -> Result<RecordBatch, ArrowError> {
    let catalogs: StringArray = rows.iter().map(|r| r.catalog.as_deref()).collect();
    let schemas: StringArray = rows.iter().map(|r| Some(r.db_schema.as_str())).collect();
    RecordBatch::try_new(
        DB_SCHEMAS_SCHEMA.clone(),
        vec![Arc::new(catalogs), Arc::new(schemas)],
    )
}

pub fn tables_batch(rows: &[TableEntry], include_schema: bool) -> Result<RecordBatch, ArrowError> {
    let catalogs: StringArray = rows.iter().map(|r| r.catalog.as_deref()).collect();
    let db_schemas: StringArray = rows.iter().map(|r| r.db_schema.as_deref()).collect();
    let names: StringArray = rows.iter().map(|r| Some(r.name.as_str())).collect();
    let types: StringArray = rows.iter().map(|r| Some(r.table_type.as_str())).collect();

    let mut columns: Vec<ArrayRef> = vec![
        Arc::new(catalogs),
        Arc::new(db_schemas),
        Arc::new(names),
        Arc::new(types),
    ];
    if include_schema {
        let mut builder = BinaryBuilder::new();
        for row in rows {
            match &row.schema {
                Some(schema) => builder.append_value(encode_schema(schema)?),
                None => builder.append_value(encode_schema(&Schema::empty())?),
            }
        }
        columns.push(Arc::new(builder.finish()));
        RecordBatch::try_new(TABLES_WITH_SCHEMA.clone(), columns)
    } else {
        RecordBatch::try_new(TABLES_SCHEMA.clone(), columns)
    }
}

pub fn table_types_batch(rows: &[String]) -> Result<RecordBatch, ArrowError> {
    let mut builder = StringBuilder::new();
    for row in rows {
        builder.append_value(row);
    }
    RecordBatch::try_new(TABLE_TYPES_SCHEMA.clone(), vec![Arc::new(builder.finish())])
}

pub fn primary_keys_batch(rows: &[PrimaryKeyEntry]) -> Result<RecordBatch, ArrowError> {
    let catalogs: StringArray = rows.iter().map(|r| r.catalog.as_deref()).collect();
    let db_schemas: StringArray = rows.iter().map(|r| r.db_schema.as_deref()).collect();
    let tables: StringArray = rows.iter().map(|r| Some(r.table.as_str())).collect();
    let columns: StringArray = rows.iter().map(|r| Some(r.column.as_str())).collect();
    let key_names: StringArray = rows.iter().map(|r| r.key_name.as_deref()).collect();
    let sequences = Int32Array::from(rows.iter().map(|r| r.key_sequence).collect::<Vec<_>>());
    RecordBatch::try_new(
        PRIMARY_KEYS_SCHEMA.clone(),
        vec![
            Arc::new(catalogs),
            Arc::new(db_schemas),
            Arc::new(tables),
            Arc::new(columns),
            Arc::new(key_names),
            Arc::new(sequences),
        ],
    )
}

pub fn keys_batch(rows: &[KeyEntry]) -> Result<RecordBatch, ArrowError> {
    let pk_catalogs: StringArray = rows.iter().map(|r| r.pk_catalog.as_deref()).collect();
    let pk_db_schemas: StringArray = rows.iter().map(|r| r.pk_db_schema.as_deref()).collect();
    let pk_tables: StringArray = rows.iter().map(|r| Some(r.pk_table.as_str())).collect();
    let pk_columns: StringArray = rows.iter().map(|r| Some(r.pk_column.as_str())).collect();
    let fk_catalogs: StringArray = rows.iter().map(|r| r.fk_catalog.as_deref()).collect();
    let fk_db_schemas: StringArray = rows.iter().map(|r| r.fk_db_schema.as_deref()).collect();
    let fk_tables: StringArray = rows.iter().map(|r| Some(r.fk_table.as_str())).collect();
    let fk_columns: StringArray = rows.iter().map(|r| Some(r.fk_column.as_str())).collect();
    let sequences = Int32Array::from(rows.iter().map(|r| r.key_sequence).collect::<Vec<_>>());
    let fk_key_names: StringArray = rows.iter().map(|r| r.fk_key_name.as_deref()).collect();
    let pk_key_names: StringArray = rows.iter().map(|r| r.pk_key_name.as_deref()).collect();
    let update_rules =
        UInt8Array::from(rows.iter().map(|r| r.update_rule as u8).collect::<Vec<_>>());
    let delete_rules =
        UInt8Array::from(rows.iter().map(|r| r.delete_rule as u8).collect::<Vec<_>>());
    RecordBatch::try_new(
        KEYS_SCHEMA.clone(),
        vec![
            Arc::new(pk_catalogs),
            Arc::new(pk_db_schemas),
            Arc::new(pk_tables),
            Arc::new(pk_columns),
            Arc::new(fk_catalogs),
            Arc::new(fk_db_schemas),
            Arc::new(fk_tables),
            Arc::new(fk_columns),
            Arc::new(sequences),
            Arc::new(fk_key_names),
            Arc::new(pk_key_names),
            Arc::new(update_rules),
            Arc::new(delete_rules),
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow_array::Array;

    #[test]
    fn schema_bytes_round_trip() {
        let schema = Schema::new(vec![
            Field::new("ID", DataType::Int32, false),
            Field::new("KEYNAME", DataType::Utf8, true),
        ]);
        let bytes = encode_schema(&schema).unwrap();
        assert!(!bytes.is_empty());
        let decoded = decode_schema(bytes).unwrap();
        assert_eq!(decoded, schema);
    }

    #[test]
    fn tables_batch_matches_fixed_layout() {
        let rows = vec![TableEntry {
            catalog: None,
            db_schema: Some("APP".to_string()),
            name: "INTTABLE".to_string(),
            table_type: "TABLE".to_string(),
            schema: Some(Arc::new(Schema::new(vec![Field::new(
                "ID",
                DataType::Int32,
                false,
            )]))),
        }];

        let bare = tables_batch(&rows, false).unwrap();
        assert_eq!(bare.schema(), *TABLES_SCHEMA);
        assert!(bare.column(0).is_null(0));

        let with_schema = tables_batch(&rows, true).unwrap();
        assert_eq!(with_schema.schema(), *TABLES_WITH_SCHEMA);
        let encoded = with_schema
            .column(4)
            .as_any()
            .downcast_ref::<arrow_array::BinaryArray>()
            .unwrap()
            .value(0);
        let decoded = decode_schema(Bytes::copy_from_slice(encoded)).unwrap();
        assert_eq!(decoded.fields().len(), 1);
    }

    #[test]
    fn keys_batch_matches_fixed_layout() {
        let rows = vec![KeyEntry {
            pk_catalog: None,
            pk_db_schema: Some("APP".to_string()),
            pk_table: "FOREIGNTABLE".to_string(),
            pk_column: "ID".to_string(),
            fk_catalog: None,
            fk_db_schema: Some("APP".to_string()),
            fk_table: "INTTABLE".to_string(),
            fk_column: "FOREIGNID".to_string(),
            key_sequence: 1,
            fk_key_name: Some("FK_FOREIGNID".to_string()),
            pk_key_name: Some("PK_FOREIGNTABLE".to_string()),
            update_rule: ReferentialRule::NoAction,
            delete_rule: ReferentialRule::NoAction,
        }];
        let batch = keys_batch(&rows).unwrap();
        assert_eq!(batch.schema(), *KEYS_SCHEMA);
        let update = batch
            .column(11)
            .as_any()
            .downcast_ref::<UInt8Array>()
            .unwrap();
        assert_eq!(update.value(0), 3);
    }

    #[test]
    fn result_schema_covers_every_metadata_variant() {
        use crate::protocol::*;

        let fixed = [
            Command::GetCatalogs(CommandGetCatalogs {}),
            Command::GetDbSchemas(CommandGetDbSchemas::default()),
            Command::GetTables(CommandGetTables::default()),
            Command::GetTableTypes(CommandGetTableTypes {}),
            Command::GetSqlInfo(CommandGetSqlInfo::default()),
            Command::GetPrimaryKeys(CommandGetPrimaryKeys::default()),
            Command::GetImportedKeys(CommandGetImportedKeys::default()),
            Command::GetExportedKeys(CommandGetExportedKeys::default()),
            Command::GetCrossReference(CommandGetCrossReference::default()),
        ];
        for command in &fixed {
            assert!(result_schema(command).is_some(), "{}", command.type_url());
        }

        let derived = Command::StatementQuery(CommandStatementQuery::default());
        assert!(result_schema(&derived).is_none());
    }
}
