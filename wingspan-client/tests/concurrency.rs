//! Concurrent-handle exclusion: while one execution is in flight on a
//! prepared statement, a second call on the same handle is rejected, and
//! the handle is usable again once the first completes.

mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use anyhow::{Context, Result};
use arrow_array::{Int32Array, RecordBatch};
use arrow_flight::flight_service_client::FlightServiceClient;
use arrow_flight::Ticket;
use arrow_schema::{DataType, Field, Schema, SchemaRef};
use prost::Message;

use wingspan_core::backend::{
    BackendError, PreparedQuery, QueryResult, SqlBackend,
};
use wingspan_core::protocol::{CommandPreparedStatementQuery, PackedMessage};

#[derive(Default)]
struct Gate {
    started: AtomicBool,
    released: Mutex<bool>,
    condvar: Condvar,
}

impl Gate {
    fn wait_released(&self) {
        self.started.store(true, Ordering::SeqCst);
        let mut released = self.released.lock().expect("gate lock poisoned");
        while !*released {
            released = self.condvar.wait(released).expect("gate lock poisoned");
        }
    }

    fn release(&self) {
        *self.released.lock().expect("gate lock poisoned") = true;
        self.condvar.notify_all();
    }
}

/// Backend whose prepared executions park on a gate until the test
/// releases them.
struct GatedBackend {
    gate: Arc<Gate>,
    schema: SchemaRef,
}

impl GatedBackend {
    fn new(gate: Arc<Gate>) -> Self {
        Self {
            gate,
            schema: Arc::new(Schema::new(vec![Field::new("v", DataType::Int32, false)])),
        }
    }

    fn result(&self) -> Result<QueryResult, BackendError> {
        let batch = RecordBatch::try_new(
            self.schema.clone(),
            vec![Arc::new(Int32Array::from(vec![1]))],
        )?;
        Ok(QueryResult {
            schema: self.schema.clone(),
            batches: vec![batch],
        })
    }
}

impl SqlBackend for GatedBackend {
    fn plan_query(&self, _sql: &str) -> Result<SchemaRef, BackendError> {
        Ok(self.schema.clone())
    }

    fn execute_query(&self, _sql: &str) -> Result<QueryResult, BackendError> {
        self.result()
    }

    fn execute_update(&self, _sql: &str) -> Result<i64, BackendError> {
        Ok(0)
    }

    fn prepare(&self, _sql: &str) -> Result<Box<dyn PreparedQuery>, BackendError> {
        Ok(Box::new(GatedStatement {
            gate: Arc::clone(&self.gate),
            schema: self.schema.clone(),
        }))
    }
}

struct GatedStatement {
    gate: Arc<Gate>,
    schema: SchemaRef,
}

impl PreparedQuery for GatedStatement {
    fn parameter_schema(&self) -> SchemaRef {
        Arc::new(Schema::empty())
    }

    fn result_schema(&self) -> Option<SchemaRef> {
        Some(self.schema.clone())
    }

    fn execute(&mut self, _parameters: Option<RecordBatch>) -> Result<QueryResult, BackendError> {
        self.gate.wait_released();
        let batch = RecordBatch::try_new(
            self.schema.clone(),
            vec![Arc::new(Int32Array::from(vec![1]))],
        )?;
        Ok(QueryResult {
            schema: self.schema.clone(),
            batches: vec![batch],
        })
    }

    fn execute_update(&mut self, _parameters: Option<RecordBatch>) -> Result<i64, BackendError> {
        self.gate.wait_released();
        Ok(0)
    }
}

#[tokio::test]
async fn second_concurrent_execute_gets_handle_busy() -> Result<()> {
    let gate = Arc::new(Gate::default());
    let addr = common::start_server(GatedBackend::new(Arc::clone(&gate))).await?;

    let mut client = wingspan_client::FlightSqlClient::connect(format!("http://{addr}")).await?;
    let statement = client.prepare("SELECT v").await?;
    let ticket = Ticket::new(
        CommandPreparedStatementQuery {
            prepared_statement_handle: statement.handle().clone(),
        }
        .as_any()
        .encode_to_vec(),
    );

    let mut first = FlightServiceClient::connect(format!("http://{addr}")).await?;
    let first_ticket = ticket.clone();
    let in_flight =
        tokio::spawn(async move { first.do_get(first_ticket).await.map(|_| ()) });

    // wait until the first execution is parked inside the backend
    while !gate.started.load(Ordering::SeqCst) {
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }

    let mut second = FlightServiceClient::connect(format!("http://{addr}")).await?;
    let err = second.do_get(ticket.clone()).await.unwrap_err();
    assert_eq!(err.code(), tonic::Code::Aborted);

    gate.release();
    in_flight
        .await
        .context("first execution task panicked")?
        .context("first execution should complete normally")?;

    // the slot freed: the handle executes again
    let mut third = FlightServiceClient::connect(format!("http://{addr}")).await?;
    third.do_get(ticket).await?;
    Ok(())
}
