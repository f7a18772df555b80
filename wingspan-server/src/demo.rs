//! Demo dataset served by the reference binary.

use std::sync::Arc;

use arrow_schema::{DataType, Field, Schema};

use wingspan_core::backend::memory::{
    ForeignKeySpec, Literal, MemoryBackend, PrimaryKeySpec, TableSpec,
};
use wingspan_core::catalog::SqlInfoRegistry;
use wingspan_core::config::ServerConfig;
use wingspan_core::error::ServerError;

pub fn demo_backend(config: &ServerConfig) -> Result<MemoryBackend, ServerError> {
    let sql_info = SqlInfoRegistry::with_server_defaults(
        &config.server_name,
        env!("CARGO_PKG_VERSION"),
        config.read_only,
    );
    let backend = MemoryBackend::new(sql_info);

    backend.register_table(TableSpec {
        db_schema: "APP".to_string(),
        name: "FOREIGNTABLE".to_string(),
        schema: Arc::new(Schema::new(vec![
            Field::new("ID", DataType::Int32, false),
            Field::new("FOREIGNNAME", DataType::Utf8, true),
            Field::new("VALUE", DataType::Int32, true),
        ])),
        auto_increment: Some("ID".to_string()),
        primary_key: Some(PrimaryKeySpec {
            column: "ID".to_string(),
            key_name: "PK_FOREIGNTABLE".to_string(),
        }),
        foreign_keys: vec![],
        rows: vec![
            vec![
                Literal::Int(1),
                Literal::Text("keyOne".to_string()),
                Literal::Int(1),
            ],
            vec![
                Literal::Int(2),
                Literal::Text("keyTwo".to_string()),
                Literal::Int(0),
            ],
            vec![
                Literal::Int(3),
                Literal::Text("keyThree".to_string()),
                Literal::Int(-1),
            ],
        ],
    })?;

    backend.register_table(TableSpec {
        db_schema: "APP".to_string(),
        name: "INTTABLE".to_string(),
        schema: Arc::new(Schema::new(vec![
            Field::new("ID", DataType::Int32, false),
            Field::new("KEYNAME", DataType::Utf8, true),
            Field::new("VALUE", DataType::Int32, true),
            Field::new("FOREIGNID", DataType::Int32, true),
        ])),
        auto_increment: Some("ID".to_string()),
        primary_key: Some(PrimaryKeySpec {
            column: "ID".to_string(),
            key_name: "PK_INTTABLE".to_string(),
        }),
        foreign_keys: vec![ForeignKeySpec {
            column: "FOREIGNID".to_string(),
            key_name: "FK_INTTABLE_FOREIGNID".to_string(),
            referenced_table: "FOREIGNTABLE".to_string(),
            referenced_column: "ID".to_string(),
        }],
        rows: vec![
            vec![
                Literal::Int(1),
                Literal::Text("one".to_string()),
                Literal::Int(1),
                Literal::Int(1),
            ],
            vec![
                Literal::Int(2),
                Literal::Text("zero".to_string()),
                Literal::Int(0),
                Literal::Int(1),
            ],
            vec![
                Literal::Int(3),
                Literal::Text("negative one".to_string()),
                Literal::Int(-1),
                Literal::Int(1),
            ],
        ],
    })?;

    Ok(backend)
}
