//! Prepared-statement handlers.
//!
//! The lifecycle runs through here: the CreatePreparedStatement action
//! compiles and caches a context, DoPut binds parameters or executes
//! updates, GetFlightInfo + DoGet execute queries, and the
//! ClosePreparedStatement action releases the context. At most one
//! execution may be in flight per handle.

use std::sync::Arc;

use arrow_array::RecordBatch;
use arrow_flight::{FlightData, FlightDescriptor, FlightInfo};
use bytes::Bytes;
use prost::Message;
use tonic::{Response, Status};
use tracing::{debug, info};

use crate::backend::SqlBackend;
use crate::catalog::encode_schema;
use crate::error::ServerError;
use crate::protocol::{
    ActionClosePreparedStatementRequest, ActionCreatePreparedStatementRequest,
    ActionCreatePreparedStatementResult, CommandPreparedStatementQuery,
    CommandPreparedStatementUpdate, PackedMessage,
};
use crate::service::{
    batch_stream, flight_info, status_from_error, status_from_join, BoxedFlightStream,
    SqlFlightService,
};
use crate::statements::{PreparedContext, StatementHandle};

pub(crate) fn lookup<B: SqlBackend>(
    service: &SqlFlightService<B>,
    handle_bytes: &[u8],
) -> Result<(StatementHandle, Arc<PreparedContext>), Status> {
    let handle = StatementHandle::try_from_bytes(handle_bytes)
        .ok_or_else(|| status_from_error(ServerError::HandleNotFound))?;
    let context = service
        .prepared()
        .get(&handle)
        .ok_or_else(|| status_from_error(ServerError::HandleNotFound))?;
    Ok((handle, context))
}

pub(crate) async fn create_prepared_statement<B: SqlBackend>(
    service: &SqlFlightService<B>,
    request: ActionCreatePreparedStatementRequest,
) -> Result<ActionCreatePreparedStatementResult, Status> {
    if request.query.trim().is_empty() {
        return Err(Status::invalid_argument("query must not be empty"));
    }

    let sql = request.query.clone();
    let statement = service
        .run_blocking(move |backend| backend.prepare(&sql).map_err(ServerError::from))
        .await?;

    let parameter_schema = statement.parameter_schema();
    let dataset_schema = statement.result_schema();

    let dataset_bytes = match &dataset_schema {
        Some(schema) => encode_schema(schema)
            .map_err(|err| status_from_error(ServerError::Arrow(err)))?,
        None => Bytes::new(),
    };
    let parameter_bytes = if parameter_schema.fields().is_empty() {
        Bytes::new()
    } else {
        encode_schema(&parameter_schema)
            .map_err(|err| status_from_error(ServerError::Arrow(err)))?
    };

    let handle = StatementHandle::generate();
    let context = PreparedContext::new(
        handle.clone(),
        statement,
        parameter_schema,
        dataset_schema,
    );
    let evicted = service.prepared().insert(handle.clone(), context);
    drop(evicted);

    info!(%handle, sql = %request.query, "prepared statement created");
    Ok(ActionCreatePreparedStatementResult {
        prepared_statement_handle: handle.as_bytes(),
        dataset_schema: dataset_bytes,
        parameter_schema: parameter_bytes,
    })
}

pub(crate) fn get_flight_info_prepared_statement<B: SqlBackend>(
    service: &SqlFlightService<B>,
    query: CommandPreparedStatementQuery,
    descriptor: FlightDescriptor,
) -> Result<Response<FlightInfo>, Status> {
    let (handle, context) = lookup(service, &query.prepared_statement_handle)?;
    let schema = context.dataset_schema().cloned().ok_or_else(|| {
        Status::invalid_argument("prepared statement does not return a result set")
    })?;
    if context.expects_parameters() && !context.has_parameters() {
        return Err(status_from_error(ServerError::SchemaMismatch(
            "statement expects parameters but none are bound".to_string(),
        )));
    }

    let ticket_bytes = CommandPreparedStatementQuery {
        prepared_statement_handle: handle.as_bytes(),
    }
    .as_any()
    .encode_to_vec();

    let info = flight_info(&schema, descriptor, ticket_bytes)?;
    info!(%handle, "prepared statement described");
    Ok(Response::new(info))
}

pub(crate) async fn do_get_prepared_statement<B: SqlBackend>(
    service: &SqlFlightService<B>,
    query: CommandPreparedStatementQuery,
) -> Result<Response<BoxedFlightStream<FlightData>>, Status> {
    let (handle, context) = lookup(service, &query.prepared_statement_handle)?;
    let guard = context.begin_execution().map_err(status_from_error)?;

    let parameters = context.take_parameters();
    if context.expects_parameters() && parameters.is_none() {
        return Err(status_from_error(ServerError::SchemaMismatch(
            "statement expects parameters but none are bound".to_string(),
        )));
    }

    info!(%handle, "executing prepared statement");
    let execution = Arc::clone(&context);
    let result = tokio::task::spawn_blocking(move || {
        execution.with_statement(|statement| {
            statement.execute(parameters).map_err(ServerError::from)
        })
    })
    .await
    .map_err(status_from_join)?
    .map_err(status_from_error)?;
    drop(guard);

    batch_stream(result.schema, result.batches)
}

pub(crate) fn do_put_prepared_statement_query<B: SqlBackend>(
    service: &SqlFlightService<B>,
    query: CommandPreparedStatementQuery,
    mut batches: Vec<RecordBatch>,
) -> Result<(), Status> {
    let (handle, context) = lookup(service, &query.prepared_statement_handle)?;
    if batches.len() > 1 {
        return Err(Status::invalid_argument(
            "parameter upload must contain at most one batch",
        ));
    }
    match batches.pop() {
        Some(batch) => {
            context.bind(batch).map_err(status_from_error)?;
            info!(%handle, "parameters bound to prepared statement");
        }
        None => debug!(%handle, "parameter upload carried no batch"),
    }
    Ok(())
}

pub(crate) async fn do_put_prepared_statement_update<B: SqlBackend>(
    service: &SqlFlightService<B>,
    update: CommandPreparedStatementUpdate,
    mut batches: Vec<RecordBatch>,
) -> Result<i64, Status> {
    let (handle, context) = lookup(service, &update.prepared_statement_handle)?;
    if batches.len() > 1 {
        return Err(Status::invalid_argument(
            "parameter upload must contain at most one batch",
        ));
    }
    let guard = context.begin_execution().map_err(status_from_error)?;

    // a batch in the same upload replaces any standing binding
    let parameters = match batches.pop() {
        Some(batch) => {
            context.bind(batch).map_err(status_from_error)?;
            context.take_parameters()
        }
        None => context.take_parameters(),
    };
    if context.expects_parameters() && parameters.is_none() {
        return Err(status_from_error(ServerError::SchemaMismatch(
            "statement expects parameters but none are bound".to_string(),
        )));
    }

    info!(%handle, "executing prepared statement update");
    let execution = Arc::clone(&context);
    let record_count = tokio::task::spawn_blocking(move || {
        execution.with_statement(|statement| {
            statement.execute_update(parameters).map_err(ServerError::from)
        })
    })
    .await
    .map_err(status_from_join)?
    .map_err(status_from_error)?;
    drop(guard);

    info!(%handle, record_count, "prepared statement update complete");
    Ok(record_count)
}

pub(crate) fn close_prepared_statement<B: SqlBackend>(
    service: &SqlFlightService<B>,
    request: ActionClosePreparedStatementRequest,
) {
    // closing is idempotent: unknown or malformed handles are ignored
    match StatementHandle::try_from_bytes(&request.prepared_statement_handle) {
        Some(handle) => match service.prepared().remove(&handle) {
            Some(_context) => info!(%handle, "prepared statement closed"),
            None => debug!(%handle, "close of unknown prepared statement ignored"),
        },
        None => debug!("close with malformed handle ignored"),
    }
}
