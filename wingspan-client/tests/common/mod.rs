//! In-process server fixture for the integration suite.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow_flight::flight_service_server::FlightServiceServer;
use arrow_schema::{DataType, Field, Schema};
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Server;

use wingspan_client::FlightSqlClient;
use wingspan_core::backend::memory::{
    ForeignKeySpec, Literal, MemoryBackend, PrimaryKeySpec, TableSpec,
};
use wingspan_core::backend::SqlBackend;
use wingspan_core::catalog::SqlInfoRegistry;
use wingspan_core::service::SqlFlightService;

pub const SERVER_NAME: &str = "Wingspan Test Server";

/// The two sample tables the scenarios run against.
pub fn sample_backend() -> Result<MemoryBackend> {
    let sql_info = SqlInfoRegistry::with_server_defaults(SERVER_NAME, "0.3.1", false);
    let backend = MemoryBackend::new(sql_info);

    backend
        .register_table(TableSpec {
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
        })
        .context("failed to register FOREIGNTABLE")?;

    backend
        .register_table(TableSpec {
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
        })
        .context("failed to register INTTABLE")?;

    Ok(backend)
}

/// Serve a backend on an ephemeral port.
pub async fn start_server<B: SqlBackend>(backend: B) -> Result<SocketAddr> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .context("failed to bind test listener")?;
    let addr = listener.local_addr()?;
    let service = SqlFlightService::new(Arc::new(backend));

    tokio::spawn(async move {
        Server::builder()
            .add_service(FlightServiceServer::new(service))
            .serve_with_incoming(TcpListenerStream::new(listener))
            .await
            .expect("test server failed");
    });

    Ok(addr)
}

/// Boot the sample server and connect a client to it.
pub async fn connect() -> Result<(FlightSqlClient, SocketAddr)> {
    let addr = start_server(sample_backend()?).await?;
    let client = FlightSqlClient::connect(format!("http://{addr}"))
        .await
        .context("failed to connect test client")?;
    Ok((client, addr))
}
