use arrow_array::RecordBatch;
use arrow_flight::decode::FlightRecordBatchStream;
use arrow_flight::error::FlightError;
use arrow_flight::flight_service_client::FlightServiceClient;
use arrow_flight::{
    Action, ActionType, Empty, FlightData, FlightDescriptor, FlightInfo, SchemaAsIpc, Ticket,
};
use arrow_ipc::writer::IpcWriteOptions;
use arrow_schema::Schema;
use futures::{stream, TryStreamExt};
use prost::Message;
use tonic::transport::Channel;
use tracing::debug;

use wingspan_core::backend::TableRef;
use wingspan_core::protocol::{
    ActionCreatePreparedStatementRequest, ActionCreatePreparedStatementResult, Any,
    CommandGetCatalogs, CommandGetCrossReference, CommandGetDbSchemas, CommandGetExportedKeys,
    CommandGetImportedKeys, CommandGetPrimaryKeys, CommandGetSqlInfo, CommandGetTableTypes,
    CommandGetTables, CommandStatementQuery, CommandStatementUpdate, DoPutUpdateResult,
    PackedMessage,
};
use wingspan_core::service::CREATE_PREPARED_STATEMENT_ACTION;

use crate::error::ClientError;
use crate::pool::ConnectionPool;
use crate::prepared::PreparedStatement;

/// A Flight SQL client over one transport channel.
pub struct FlightSqlClient {
    inner: FlightServiceClient<Channel>,
    pool: ConnectionPool,
}

impl FlightSqlClient {
    /// Connect to a Flight SQL server, e.g. `http://127.0.0.1:4414`.
    pub async fn connect(endpoint: impl Into<String>) -> Result<Self, ClientError> {
        let inner = FlightServiceClient::connect(endpoint.into())
            .await
            .map_err(ClientError::from)?;
        Ok(Self::new_from_inner(inner))
    }

    pub fn new(channel: Channel) -> Self {
        Self::new_from_inner(FlightServiceClient::new(channel))
    }

    fn new_from_inner(inner: FlightServiceClient<Channel>) -> Self {
        Self {
            inner,
            pool: ConnectionPool::default(),
        }
    }

    /// Describe an ad-hoc query; pull the result with [`Self::fetch_all`].
    pub async fn execute(&mut self, query: impl Into<String>) -> Result<FlightInfo, ClientError> {
        let command = CommandStatementQuery {
            query: query.into(),
            client_execution_handle: None,
        };
        self.flight_info_for(command.as_any()).await
    }

    /// Run an ad-hoc update and return the affected row count (-1 when the
    /// server could not determine it).
    pub async fn execute_update(&mut self, query: impl Into<String>) -> Result<i64, ClientError> {
        let command = CommandStatementUpdate {
            query: query.into(),
        };
        let descriptor = FlightDescriptor::new_cmd(command.as_any().encode_to_vec());

        // schema-only frame: the update carries no data
        let mut frame: FlightData =
            SchemaAsIpc::new(&Schema::empty(), &IpcWriteOptions::default()).into();
        frame.flight_descriptor = Some(descriptor);

        let mut responses = self
            .inner
            .do_put(stream::iter(vec![frame]))
            .await?
            .into_inner();
        let ack = responses
            .message()
            .await?
            .ok_or_else(|| ClientError::Protocol("missing DoPut acknowledgement".to_string()))?;
        while responses.message().await?.is_some() {}

        let result = DoPutUpdateResult::decode(ack.app_metadata.as_ref())?;
        Ok(result.record_count)
    }

    /// Create a prepared statement for the query.
    pub async fn prepare(
        &mut self,
        query: impl Into<String>,
    ) -> Result<PreparedStatement, ClientError> {
        let body = ActionCreatePreparedStatementRequest {
            query: query.into(),
        }
        .as_any()
        .encode_to_vec();
        let action = Action {
            r#type: CREATE_PREPARED_STATEMENT_ACTION.to_string(),
            body: body.into(),
        };

        let mut results = self.inner.do_action(action).await?.into_inner();
        let first = results.message().await?.ok_or_else(|| {
            ClientError::Protocol("CreatePreparedStatement returned no result".to_string())
        })?;
        while results.message().await?.is_some() {}

        let any = Any::try_decode(&first.body)?;
        let result = any
            .unpack::<ActionCreatePreparedStatementResult>()?
            .ok_or_else(|| {
                ClientError::Protocol(format!(
                    "unexpected CreatePreparedStatement result type {}",
                    any.type_url
                ))
            })?;
        debug!(handle_len = result.prepared_statement_handle.len(), "prepared statement created");
        Ok(PreparedStatement::new(self.inner.clone(), result))
    }

    pub async fn get_catalogs(&mut self) -> Result<FlightInfo, ClientError> {
        self.flight_info_for(CommandGetCatalogs {}.as_any()).await
    }

    pub async fn get_db_schemas(
        &mut self,
        catalog: Option<&str>,
        db_schema_pattern: Option<&str>,
    ) -> Result<FlightInfo, ClientError> {
        let command = CommandGetDbSchemas {
            catalog: catalog.map(str::to_string),
            db_schema_filter_pattern: db_schema_pattern.map(str::to_string),
        };
        self.flight_info_for(command.as_any()).await
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn get_tables(
        &mut self,
        catalog: Option<&str>,
        db_schema_pattern: Option<&str>,
        table_pattern: Option<&str>,
        table_types: &[&str],
        include_schema: bool,
    ) -> Result<FlightInfo, ClientError> {
        let command = CommandGetTables {
            catalog: catalog.map(str::to_string),
            db_schema_filter_pattern: db_schema_pattern.map(str::to_string),
            table_name_filter_pattern: table_pattern.map(str::to_string),
            table_types: table_types.iter().map(|t| t.to_string()).collect(),
            include_schema,
        };
        self.flight_info_for(command.as_any()).await
    }

    pub async fn get_table_types(&mut self) -> Result<FlightInfo, ClientError> {
        self.flight_info_for(CommandGetTableTypes {}.as_any()).await
    }

    pub async fn get_primary_keys(&mut self, table: TableRef) -> Result<FlightInfo, ClientError> {
        let command = CommandGetPrimaryKeys {
            catalog: table.catalog,
            db_schema: table.db_schema,
            table: table.table,
        };
        self.flight_info_for(command.as_any()).await
    }

    pub async fn get_imported_keys(&mut self, table: TableRef) -> Result<FlightInfo, ClientError> {
        let command = CommandGetImportedKeys {
            catalog: table.catalog,
            db_schema: table.db_schema,
            table: table.table,
        };
        self.flight_info_for(command.as_any()).await
    }

    pub async fn get_exported_keys(&mut self, table: TableRef) -> Result<FlightInfo, ClientError> {
        let command = CommandGetExportedKeys {
            catalog: table.catalog,
            db_schema: table.db_schema,
            table: table.table,
        };
        self.flight_info_for(command.as_any()).await
    }

    pub async fn get_cross_reference(
        &mut self,
        pk_table: TableRef,
        fk_table: TableRef,
    ) -> Result<FlightInfo, ClientError> {
        let command = CommandGetCrossReference {
            pk_catalog: pk_table.catalog,
            pk_db_schema: pk_table.db_schema,
            pk_table: pk_table.table,
            fk_catalog: fk_table.catalog,
            fk_db_schema: fk_table.db_schema,
            fk_table: fk_table.table,
        };
        self.flight_info_for(command.as_any()).await
    }

    /// Request engine metadata; an empty code list requests everything.
    pub async fn get_sql_info(&mut self, info: &[i32]) -> Result<FlightInfo, ClientError> {
        let command = CommandGetSqlInfo {
            info: info.to_vec(),
        };
        self.flight_info_for(command.as_any()).await
    }

    pub async fn list_actions(&mut self) -> Result<Vec<ActionType>, ClientError> {
        let mut stream = self.inner.list_actions(Empty {}).await?.into_inner();
        let mut actions = Vec::new();
        while let Some(action) = stream.message().await? {
            actions.push(action);
        }
        Ok(actions)
    }

    /// Open one endpoint's stream of record batches.
    pub async fn do_get(&mut self, ticket: Ticket) -> Result<FlightRecordBatchStream, ClientError> {
        let stream = self.inner.do_get(ticket).await?.into_inner();
        Ok(FlightRecordBatchStream::new_from_flight_data(
            stream.map_err(|status| FlightError::Tonic(Box::new(status))),
        ))
    }

    /// Pull every endpoint of a FlightInfo in order. Endpoints that name a
    /// location are read over a pooled connection to their first location;
    /// the rest use this client's own channel.
    pub async fn fetch_all(&mut self, info: FlightInfo) -> Result<Vec<RecordBatch>, ClientError> {
        let mut batches = Vec::new();
        for endpoint in info.endpoint {
            let ticket = endpoint
                .ticket
                .clone()
                .ok_or_else(|| ClientError::Protocol("endpoint has no ticket".to_string()))?;
            let location = endpoint
                .location
                .first()
                .map(|location| location.uri.clone())
                .filter(|uri| !uri.is_empty());

            match location {
                Some(uri) => {
                    let mut connection = self.pool.acquire(&uri).await?;
                    let result = Self::collect_stream(&mut connection, ticket).await;
                    self.pool.release(&uri, connection).await;
                    batches.extend(result?);
                }
                None => {
                    batches.extend(Self::collect_stream(&mut self.inner, ticket).await?);
                }
            }
        }
        Ok(batches)
    }

    async fn collect_stream(
        connection: &mut FlightServiceClient<Channel>,
        ticket: Ticket,
    ) -> Result<Vec<RecordBatch>, ClientError> {
        let stream = connection.do_get(ticket).await?.into_inner();
        let mut decoder = FlightRecordBatchStream::new_from_flight_data(
            stream.map_err(|status| FlightError::Tonic(Box::new(status))),
        );
        let mut batches = Vec::new();
        while let Some(batch) = decoder.try_next().await? {
            batches.push(batch);
        }
        Ok(batches)
    }

    async fn flight_info_for(&mut self, any: Any) -> Result<FlightInfo, ClientError> {
        let descriptor = FlightDescriptor::new_cmd(any.encode_to_vec());
        let response = self.inner.get_flight_info(descriptor).await?;
        Ok(response.into_inner())
    }
}
