//! Ad-hoc statement handlers.
//!
//! GetFlightInfo plans the query, records it under a fresh execution
//! handle, and answers with a replacement [`TicketStatementQuery`] ticket.
//! DoGet redeems that ticket exactly once.

use arrow_flight::{FlightData, FlightDescriptor, FlightInfo};
use prost::Message;
use tonic::{Response, Status};
use tracing::{debug, info};

use crate::backend::SqlBackend;
use crate::error::ServerError;
use crate::protocol::{
    CommandStatementQuery, CommandStatementUpdate, PackedMessage, TicketStatementQuery,
};
use crate::service::{
    batch_stream, flight_info, status_from_error, BoxedFlightStream, SqlFlightService,
};
use crate::statements::{StatementEntry, StatementHandle};

pub(crate) async fn get_flight_info_statement<B: SqlBackend>(
    service: &SqlFlightService<B>,
    query: CommandStatementQuery,
    descriptor: FlightDescriptor,
) -> Result<Response<FlightInfo>, Status> {
    if query.query.trim().is_empty() {
        return Err(Status::invalid_argument("query must not be empty"));
    }

    let sql = query.query.clone();
    let schema = service
        .run_blocking(move |backend| backend.plan_query(&sql).map_err(ServerError::from))
        .await?;
    debug!(field_count = schema.fields().len(), "planned statement schema");

    let handle = StatementHandle::generate();
    let evicted = service.statements().insert(
        handle.clone(),
        StatementEntry {
            query,
            schema: schema.clone(),
        },
    );
    drop(evicted);

    let ticket = TicketStatementQuery {
        statement_handle: handle.as_bytes(),
    };
    let info = flight_info(&schema, descriptor, ticket.as_any().encode_to_vec())?;
    info!(%handle, "registered ad-hoc statement");
    Ok(Response::new(info))
}

pub(crate) async fn do_get_statement<B: SqlBackend>(
    service: &SqlFlightService<B>,
    ticket: TicketStatementQuery,
) -> Result<Response<BoxedFlightStream<FlightData>>, Status> {
    let handle = StatementHandle::try_from_bytes(&ticket.statement_handle)
        .ok_or_else(|| status_from_error(ServerError::HandleNotFound))?;
    // statement tickets redeem exactly once
    let entry = service
        .statements()
        .remove(&handle)
        .ok_or_else(|| status_from_error(ServerError::HandleNotFound))?;

    info!(%handle, sql = %entry.query.query, "executing statement");
    let sql = entry.query.query.clone();
    let result = service
        .run_blocking(move |backend| backend.execute_query(&sql).map_err(ServerError::from))
        .await?;

    batch_stream(result.schema, result.batches)
}

pub(crate) async fn do_put_statement_update<B: SqlBackend>(
    service: &SqlFlightService<B>,
    command: CommandStatementUpdate,
) -> Result<i64, Status> {
    if command.query.trim().is_empty() {
        return Err(Status::invalid_argument("query must not be empty"));
    }

    let sql = command.query.clone();
    info!(sql = %command.query, "executing statement update");
    let record_count = service
        .run_blocking(move |backend| backend.execute_update(&sql).map_err(ServerError::from))
        .await?;
    info!(record_count, "statement update complete");
    Ok(record_count)
}
