use std::sync::Arc;

use arrow_array::RecordBatch;
use arrow_flight::encode::FlightDataEncoderBuilder;
use arrow_flight::flight_service_client::FlightServiceClient;
use arrow_flight::{Action, FlightData, FlightDescriptor, FlightInfo, PutResult, SchemaAsIpc};
use arrow_ipc::writer::IpcWriteOptions;
use arrow_schema::{Schema, SchemaRef};
use bytes::Bytes;
use futures::{stream, TryStreamExt};
use prost::Message;
use tonic::transport::Channel;
use tracing::debug;

use wingspan_core::catalog::decode_schema;
use wingspan_core::protocol::{
    ActionClosePreparedStatementRequest, ActionCreatePreparedStatementResult,
    CommandPreparedStatementQuery, CommandPreparedStatementUpdate, DoPutUpdateResult,
    PackedMessage,
};
use wingspan_core::service::CLOSE_PREPARED_STATEMENT_ACTION;

use crate::error::ClientError;

/// A prepared statement held open on the server.
///
/// The object spans multiple RPCs: parameters set here are uploaded ahead
/// of each execution, and [`PreparedStatement::close`] releases the server
/// state. Schema payloads decode lazily; an empty parameter payload means
/// the statement takes no parameters.
pub struct PreparedStatement {
    client: FlightServiceClient<Channel>,
    handle: Bytes,
    dataset_schema_bytes: Bytes,
    parameter_schema_bytes: Bytes,
    parameter_schema: Option<SchemaRef>,
    parameters: Option<RecordBatch>,
    closed: bool,
}

impl PreparedStatement {
    pub(crate) fn new(
        client: FlightServiceClient<Channel>,
        result: ActionCreatePreparedStatementResult,
    ) -> Self {
        Self {
            client,
            handle: result.prepared_statement_handle,
            dataset_schema_bytes: result.dataset_schema,
            parameter_schema_bytes: result.parameter_schema,
            parameter_schema: None,
            parameters: None,
            closed: false,
        }
    }

    /// The server-issued opaque handle.
    pub fn handle(&self) -> &Bytes {
        &self.handle
    }

    /// Schema of the result set, when the server knew it at prepare time.
    pub fn dataset_schema(&self) -> Result<Option<Schema>, ClientError> {
        if self.dataset_schema_bytes.is_empty() {
            return Ok(None);
        }
        Ok(Some(decode_schema(self.dataset_schema_bytes.clone())?))
    }

    /// Schema of the expected parameter batch; empty for statements
    /// without parameters.
    pub fn parameter_schema(&mut self) -> Result<SchemaRef, ClientError> {
        if let Some(schema) = &self.parameter_schema {
            return Ok(Arc::clone(schema));
        }
        let schema = if self.parameter_schema_bytes.is_empty() {
            Arc::new(Schema::empty())
        } else {
            Arc::new(decode_schema(self.parameter_schema_bytes.clone())?)
        };
        self.parameter_schema = Some(Arc::clone(&schema));
        Ok(schema)
    }

    /// Retain a parameter batch for the next execution. The batch schema
    /// must equal the statement's parameter schema.
    pub fn set_parameters(&mut self, batch: RecordBatch) -> Result<(), ClientError> {
        let expected = self.parameter_schema()?;
        if batch.schema() != expected {
            return Err(ClientError::SchemaMismatch(format!(
                "expected parameter schema {:?}, got {:?}",
                expected.fields(),
                batch.schema().fields()
            )));
        }
        self.parameters = Some(batch);
        Ok(())
    }

    pub fn clear_parameters(&mut self) {
        self.parameters = None;
    }

    /// Execute as a query: upload any set parameters, then describe the
    /// statement to obtain result endpoints.
    pub async fn execute(&mut self) -> Result<FlightInfo, ClientError> {
        self.ensure_open()?;
        let descriptor = self.descriptor(CommandPreparedStatementQuery {
            prepared_statement_handle: self.handle.clone(),
        });

        if let Some(batch) = self.parameters.clone() {
            self.upload(descriptor.clone(), Some(batch)).await?;
            debug!("parameters uploaded");
        }

        let response = self.client.get_flight_info(descriptor).await?;
        Ok(response.into_inner())
    }

    /// Execute as an update and return the affected row count.
    pub async fn execute_update(&mut self) -> Result<i64, ClientError> {
        self.ensure_open()?;
        let descriptor = self.descriptor(CommandPreparedStatementUpdate {
            prepared_statement_handle: self.handle.clone(),
        });

        let ack = self.upload(descriptor, self.parameters.clone()).await?;
        let result = DoPutUpdateResult::decode(ack.app_metadata.as_ref())?;
        Ok(result.record_count)
    }

    /// Release the server-side statement. Idempotent.
    pub async fn close(&mut self) -> Result<(), ClientError> {
        if self.closed {
            return Ok(());
        }
        let body = ActionClosePreparedStatementRequest {
            prepared_statement_handle: self.handle.clone(),
        }
        .as_any()
        .encode_to_vec();
        let action = Action {
            r#type: CLOSE_PREPARED_STATEMENT_ACTION.to_string(),
            body: body.into(),
        };
        let mut results = self.client.do_action(action).await?.into_inner();
        while results.message().await?.is_some() {}
        self.closed = true;
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn ensure_open(&self) -> Result<(), ClientError> {
        if self.closed {
            return Err(ClientError::Closed);
        }
        Ok(())
    }

    fn descriptor<M: PackedMessage>(&self, command: M) -> FlightDescriptor {
        FlightDescriptor::new_cmd(command.as_any().encode_to_vec())
    }

    /// Open the parameter upload stream and wait for the server's single
    /// acknowledgement. Without a batch, a schema-only frame is written so
    /// the stream still opens with a descriptor.
    async fn upload(
        &mut self,
        descriptor: FlightDescriptor,
        batch: Option<RecordBatch>,
    ) -> Result<PutResult, ClientError> {
        let frames: Vec<FlightData> = match batch {
            Some(batch) => {
                FlightDataEncoderBuilder::new()
                    .with_flight_descriptor(Some(descriptor))
                    .build(stream::iter([Ok(batch)]))
                    .try_collect()
                    .await?
            }
            None => {
                let schema = self.parameter_schema()?;
                let mut frame: FlightData =
                    SchemaAsIpc::new(schema.as_ref(), &IpcWriteOptions::default()).into();
                frame.flight_descriptor = Some(descriptor);
                vec![frame]
            }
        };

        let mut responses = self.client.do_put(stream::iter(frames)).await?.into_inner();
        let ack = responses
            .message()
            .await?
            .ok_or_else(|| ClientError::Protocol("missing DoPut acknowledgement".to_string()))?;
        while responses.message().await?.is_some() {}
        Ok(ack)
    }
}
