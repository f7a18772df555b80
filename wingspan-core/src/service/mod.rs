//! The server dispatcher.
//!
//! [`SqlFlightService`] implements the four generic Flight verbs and routes
//! each decoded command envelope to its typed handler. Routing never looks
//! past the envelope: handlers receive the decoded variant and talk to the
//! backend from blocking tasks.

mod handlers;

use std::pin::Pin;
use std::sync::Arc;

use arrow_array::RecordBatch;
use arrow_flight::error::FlightError;
use arrow_flight::flight_descriptor::DescriptorType;
use arrow_flight::flight_service_server::FlightService;
use arrow_flight::{
    Action, ActionType, Criteria, Empty, FlightData, FlightDescriptor, FlightEndpoint, FlightInfo,
    HandshakeRequest, HandshakeResponse, PollInfo, PutResult, SchemaAsIpc, SchemaResult, Ticket,
};
use arrow_ipc::writer::IpcWriteOptions;
use arrow_schema::{ArrowError, SchemaRef};
use futures::{stream, Stream, StreamExt, TryStreamExt};
use prost::Message;
use tonic::{Request, Response, Status, Streaming};
use tracing::{debug, error, info};

use crate::backend::SqlBackend;
use crate::catalog::{self, SqlInfoRegistry};
use crate::error::ServerError;
use crate::protocol::{
    ActionClosePreparedStatementRequest, ActionCreatePreparedStatementRequest, Any, Command,
    DoPutUpdateResult, PackedMessage,
};
use crate::statements::{CacheConfig, HandleCache, PreparedContext, StatementEntry};

/// Action type exposed for creating prepared statements.
pub const CREATE_PREPARED_STATEMENT_ACTION: &str = "CreatePreparedStatement";
/// Action type exposed for closing prepared statements.
pub const CLOSE_PREPARED_STATEMENT_ACTION: &str = "ClosePreparedStatement";

pub(crate) type BoxedFlightStream<T> =
    Pin<Box<dyn Stream<Item = Result<T, Status>> + Send + 'static>>;

/// Cache bounds for the dispatcher's statement state.
#[derive(Debug, Clone, Copy, Default)]
pub struct ServiceConfig {
    pub prepared_statements: CacheConfig,
    pub statements: CacheConfig,
}

/// The Flight SQL dispatcher over a [`SqlBackend`].
pub struct SqlFlightService<B> {
    backend: Arc<B>,
    prepared: HandleCache<PreparedContext>,
    statements: HandleCache<StatementEntry>,
}

impl<B: SqlBackend> SqlFlightService<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self::with_config(backend, ServiceConfig::default())
    }

    pub fn with_config(backend: Arc<B>, config: ServiceConfig) -> Self {
        Self {
            backend,
            prepared: HandleCache::new(config.prepared_statements),
            statements: HandleCache::new(config.statements),
        }
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    pub(crate) fn prepared(&self) -> &HandleCache<PreparedContext> {
        &self.prepared
    }

    pub(crate) fn statements(&self) -> &HandleCache<StatementEntry> {
        &self.statements
    }

    /// Run a backend call on the blocking pool.
    pub(crate) async fn run_blocking<T, F>(&self, f: F) -> Result<T, Status>
    where
        F: FnOnce(&B) -> Result<T, ServerError> + Send + 'static,
        T: Send + 'static,
    {
        let backend = Arc::clone(&self.backend);
        tokio::task::spawn_blocking(move || f(&backend))
            .await
            .map_err(status_from_join)?
            .map_err(status_from_error)
    }

    pub(crate) fn metadata_required(&self) -> Result<(), Status> {
        if self.backend.metadata().is_none() {
            return Err(status_from_error(ServerError::NotImplemented(
                "metadata discovery",
            )));
        }
        Ok(())
    }

    pub(crate) fn sql_info_required(&self) -> Result<&SqlInfoRegistry, Status> {
        self.backend
            .sql_info()
            .ok_or_else(|| status_from_error(ServerError::NotImplemented("SQL info")))
    }
}

pub(crate) fn status_from_error(err: ServerError) -> Status {
    match err {
        ServerError::InvalidRequest(message) => Status::invalid_argument(message),
        ServerError::Protocol(err) => {
            debug!(error = %err, "rejecting invalid envelope");
            Status::invalid_argument(err.to_string())
        }
        ServerError::NotImplemented(what) => {
            Status::unimplemented(format!("{what} is not supported by this backend"))
        }
        ServerError::HandleNotFound => Status::not_found("unknown statement handle"),
        ServerError::HandleBusy => {
            Status::aborted("statement handle already has a call in flight")
        }
        ServerError::SchemaMismatch(message) => Status::failed_precondition(message),
        ServerError::Backend(err) => {
            error!(error = %err, "backend error");
            Status::internal(err.to_string())
        }
        ServerError::Arrow(err) => {
            error!(error = %err, "arrow conversion error");
            Status::internal(format!("arrow error: {err}"))
        }
    }
}

pub(crate) fn status_from_join(err: tokio::task::JoinError) -> Status {
    if err.is_panic() {
        error!(%err, "blocking task panicked");
        Status::internal("blocking task panicked")
    } else {
        error!(%err, "blocking task cancelled");
        Status::internal(format!("blocking task cancelled: {err}"))
    }
}

pub(crate) fn status_from_flight_error(err: FlightError) -> Status {
    match err {
        FlightError::Tonic(status) => *status,
        other => Status::invalid_argument(format!("invalid flight data: {other}")),
    }
}

fn decode_descriptor(descriptor: &FlightDescriptor) -> Result<Command, Status> {
    if descriptor.r#type != DescriptorType::Cmd as i32 {
        return Err(Status::invalid_argument(
            "only command descriptors are supported",
        ));
    }
    Command::try_decode(&descriptor.cmd).map_err(|err| status_from_error(err.into()))
}

fn decode_ticket(ticket: &Ticket) -> Result<Command, Status> {
    Command::try_decode(&ticket.ticket).map_err(|err| status_from_error(err.into()))
}

pub(crate) fn into_stream(data: Vec<FlightData>) -> BoxedFlightStream<FlightData> {
    Box::pin(stream::iter(data.into_iter().map(Ok)))
}

/// Encode a fully materialized result as a DoGet stream.
pub(crate) fn batch_stream(
    schema: SchemaRef,
    batches: Vec<RecordBatch>,
) -> Result<Response<BoxedFlightStream<FlightData>>, Status> {
    let data =
        arrow_flight::utils::batches_to_flight_data(schema.as_ref(), batches).map_err(|err| {
            error!(%err, "failed to convert record batches to flight data");
            Status::internal(format!(
                "failed to convert record batches to flight data: {err}"
            ))
        })?;
    debug!(frame_count = data.len(), "encoded result stream");
    Ok(Response::new(into_stream(data)))
}

/// Assemble a single-endpoint FlightInfo whose ticket carries the given
/// envelope bytes.
pub(crate) fn flight_info(
    schema: &SchemaRef,
    descriptor: FlightDescriptor,
    ticket_bytes: Vec<u8>,
) -> Result<FlightInfo, Status> {
    let endpoint = FlightEndpoint::new().with_ticket(Ticket::new(ticket_bytes));
    let info = FlightInfo::new()
        .try_with_schema(schema.as_ref())
        .map_err(|err| Status::internal(format!("failed to encode schema: {err}")))?
        .with_descriptor(descriptor)
        .with_endpoint(endpoint)
        .with_total_records(-1);
    Ok(info)
}

/// Decode the parameter batches of a DoPut upload. The first frame has
/// already been read for its descriptor; a frame that carries no IPC
/// payload at all (bare descriptor) is skipped.
async fn decode_put_batches(
    first: FlightData,
    rest: Streaming<FlightData>,
) -> Result<Vec<RecordBatch>, Status> {
    let head = if first.data_header.is_empty() && first.data_body.is_empty() {
        None
    } else {
        Some(first)
    };
    let data = stream::iter(head.into_iter().map(Ok))
        .chain(rest.map_err(|status| FlightError::Tonic(Box::new(status))));
    let mut decoder = arrow_flight::decode::FlightRecordBatchStream::new_from_flight_data(data);

    let mut batches = Vec::new();
    while let Some(batch) = decoder.try_next().await.map_err(status_from_flight_error)? {
        batches.push(batch);
    }
    Ok(batches)
}

fn put_ack(result: PutResult) -> BoxedFlightStream<PutResult> {
    Box::pin(stream::iter([Ok(result)]))
}

fn update_ack(record_count: i64) -> Response<BoxedFlightStream<PutResult>> {
    let metadata = DoPutUpdateResult { record_count }.encode_to_vec();
    Response::new(put_ack(PutResult {
        app_metadata: metadata.into(),
    }))
}

#[tonic::async_trait]
impl<B: SqlBackend> FlightService for SqlFlightService<B> {
    type HandshakeStream = BoxedFlightStream<HandshakeResponse>;
    type ListFlightsStream = BoxedFlightStream<FlightInfo>;
    type DoGetStream = BoxedFlightStream<FlightData>;
    type DoPutStream = BoxedFlightStream<PutResult>;
    type DoActionStream = BoxedFlightStream<arrow_flight::Result>;
    type ListActionsStream = BoxedFlightStream<ActionType>;
    type DoExchangeStream = BoxedFlightStream<FlightData>;

    async fn handshake(
        &self,
        _request: Request<Streaming<HandshakeRequest>>,
    ) -> Result<Response<Self::HandshakeStream>, Status> {
        Err(Status::unimplemented("handshake is not supported"))
    }

    async fn list_flights(
        &self,
        _request: Request<Criteria>,
    ) -> Result<Response<Self::ListFlightsStream>, Status> {
        Err(Status::unimplemented("list_flights is not supported"))
    }

    async fn get_flight_info(
        &self,
        request: Request<FlightDescriptor>,
    ) -> Result<Response<FlightInfo>, Status> {
        let descriptor = request.into_inner();
        let command = decode_descriptor(&descriptor)?;
        match command {
            Command::StatementQuery(query) => {
                handlers::statement::get_flight_info_statement(self, query, descriptor).await
            }
            Command::PreparedStatementQuery(query) => {
                handlers::prepared::get_flight_info_prepared_statement(self, query, descriptor)
            }
            Command::GetCatalogs(_)
            | Command::GetDbSchemas(_)
            | Command::GetTables(_)
            | Command::GetTableTypes(_)
            | Command::GetSqlInfo(_)
            | Command::GetPrimaryKeys(_)
            | Command::GetImportedKeys(_)
            | Command::GetExportedKeys(_)
            | Command::GetCrossReference(_) => {
                handlers::metadata::get_flight_info_metadata(self, command, descriptor)
            }
            Command::StatementUpdate(_)
            | Command::PreparedStatementUpdate(_)
            | Command::TicketStatementQuery(_) => Err(Status::invalid_argument(format!(
                "{} is not valid for GetFlightInfo",
                command.type_url()
            ))),
        }
    }

    async fn poll_flight_info(
        &self,
        _request: Request<FlightDescriptor>,
    ) -> Result<Response<PollInfo>, Status> {
        Err(Status::unimplemented("poll_flight_info is not supported"))
    }

    async fn get_schema(
        &self,
        request: Request<FlightDescriptor>,
    ) -> Result<Response<SchemaResult>, Status> {
        let descriptor = request.into_inner();
        let command = decode_descriptor(&descriptor)?;
        let schema: SchemaRef = match &command {
            Command::StatementQuery(query) => {
                let sql = query.query.clone();
                self.run_blocking(move |backend| {
                    backend.plan_query(&sql).map_err(ServerError::from)
                })
                .await?
            }
            Command::PreparedStatementQuery(query) => {
                let (_, context) =
                    handlers::prepared::lookup(self, &query.prepared_statement_handle)?;
                context.dataset_schema().cloned().ok_or_else(|| {
                    Status::invalid_argument("prepared statement does not return a result set")
                })?
            }
            _ => match catalog::result_schema(&command) {
                Some(schema) => {
                    match &command {
                        Command::GetSqlInfo(_) => {
                            self.sql_info_required()?;
                        }
                        _ => self.metadata_required()?,
                    }
                    schema
                }
                None => {
                    return Err(Status::invalid_argument(format!(
                        "{} is not valid for GetSchema",
                        command.type_url()
                    )))
                }
            },
        };
        let result: SchemaResult = SchemaAsIpc::new(schema.as_ref(), &IpcWriteOptions::default())
            .try_into()
            .map_err(|err: ArrowError| {
                Status::internal(format!("failed to encode schema: {err}"))
            })?;
        Ok(Response::new(result))
    }

    async fn do_get(&self, request: Request<Ticket>) -> Result<Response<Self::DoGetStream>, Status> {
        let ticket = request.into_inner();
        let command = decode_ticket(&ticket)?;
        match command {
            Command::TicketStatementQuery(ticket) => {
                handlers::statement::do_get_statement(self, ticket).await
            }
            Command::PreparedStatementQuery(query) => {
                handlers::prepared::do_get_prepared_statement(self, query).await
            }
            Command::GetCatalogs(_)
            | Command::GetDbSchemas(_)
            | Command::GetTables(_)
            | Command::GetTableTypes(_)
            | Command::GetSqlInfo(_)
            | Command::GetPrimaryKeys(_)
            | Command::GetImportedKeys(_)
            | Command::GetExportedKeys(_)
            | Command::GetCrossReference(_) => {
                handlers::metadata::do_get_metadata(self, command).await
            }
            Command::StatementQuery(_)
            | Command::StatementUpdate(_)
            | Command::PreparedStatementUpdate(_) => Err(Status::invalid_argument(format!(
                "{} is not valid for DoGet",
                command.type_url()
            ))),
        }
    }

    async fn do_put(
        &self,
        request: Request<Streaming<FlightData>>,
    ) -> Result<Response<Self::DoPutStream>, Status> {
        let mut stream = request.into_inner();
        let first = stream
            .message()
            .await?
            .ok_or_else(|| Status::invalid_argument("empty DoPut stream"))?;
        let descriptor = first
            .flight_descriptor
            .clone()
            .ok_or_else(|| Status::invalid_argument("DoPut stream is missing a descriptor"))?;
        let command = decode_descriptor(&descriptor)?;

        match command {
            Command::StatementUpdate(update) => {
                // an ad-hoc update carries no data beyond the descriptor frame
                while stream.message().await?.is_some() {}
                let record_count =
                    handlers::statement::do_put_statement_update(self, update).await?;
                Ok(update_ack(record_count))
            }
            Command::PreparedStatementQuery(query) => {
                let batches = decode_put_batches(first, stream).await?;
                handlers::prepared::do_put_prepared_statement_query(self, query, batches)?;
                Ok(Response::new(put_ack(PutResult::default())))
            }
            Command::PreparedStatementUpdate(update) => {
                let batches = decode_put_batches(first, stream).await?;
                let record_count =
                    handlers::prepared::do_put_prepared_statement_update(self, update, batches)
                        .await?;
                Ok(update_ack(record_count))
            }
            other => Err(Status::invalid_argument(format!(
                "{} is not valid for DoPut",
                other.type_url()
            ))),
        }
    }

    async fn do_exchange(
        &self,
        _request: Request<Streaming<FlightData>>,
    ) -> Result<Response<Self::DoExchangeStream>, Status> {
        Err(Status::unimplemented("do_exchange is not supported"))
    }

    async fn do_action(
        &self,
        request: Request<Action>,
    ) -> Result<Response<Self::DoActionStream>, Status> {
        let action = request.into_inner();
        match action.r#type.as_str() {
            CREATE_PREPARED_STATEMENT_ACTION => {
                let any =
                    Any::try_decode(&action.body).map_err(|err| status_from_error(err.into()))?;
                let request = any
                    .unpack::<ActionCreatePreparedStatementRequest>()
                    .map_err(|err| status_from_error(err.into()))?
                    .ok_or_else(|| {
                        Status::invalid_argument(format!(
                            "action body does not match {CREATE_PREPARED_STATEMENT_ACTION}"
                        ))
                    })?;
                let result =
                    handlers::prepared::create_prepared_statement(self, request).await?;
                let body = result.as_any().encode_to_vec();
                let output: Self::DoActionStream =
                    Box::pin(stream::iter([Ok(arrow_flight::Result { body: body.into() })]));
                Ok(Response::new(output))
            }
            CLOSE_PREPARED_STATEMENT_ACTION => {
                let any =
                    Any::try_decode(&action.body).map_err(|err| status_from_error(err.into()))?;
                let request = any
                    .unpack::<ActionClosePreparedStatementRequest>()
                    .map_err(|err| status_from_error(err.into()))?
                    .ok_or_else(|| {
                        Status::invalid_argument(format!(
                            "action body does not match {CLOSE_PREPARED_STATEMENT_ACTION}"
                        ))
                    })?;
                handlers::prepared::close_prepared_statement(self, request);
                let output: Self::DoActionStream = Box::pin(stream::empty());
                Ok(Response::new(output))
            }
            other => Err(Status::invalid_argument(format!(
                "unknown action type: {other}"
            ))),
        }
    }

    async fn list_actions(
        &self,
        _request: Request<Empty>,
    ) -> Result<Response<Self::ListActionsStream>, Status> {
        info!("listing supported actions");
        let actions = vec![
            Ok(ActionType {
                r#type: CREATE_PREPARED_STATEMENT_ACTION.to_string(),
                description: "Compile a SQL statement into a reusable prepared statement; \
                              returns the handle with its parameter and result schemas"
                    .to_string(),
            }),
            Ok(ActionType {
                r#type: CLOSE_PREPARED_STATEMENT_ACTION.to_string(),
                description: "Release the server resources held by a prepared statement handle"
                    .to_string(),
            }),
        ];
        let output: Self::ListActionsStream = Box::pin(stream::iter(actions));
        Ok(Response::new(output))
    }
}
