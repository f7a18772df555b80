//! Metadata query handlers.
//!
//! Every metadata FlightInfo takes its schema from the catalog and carries
//! the request envelope back as its ticket; DoGet builds the result batch
//! from the backend's metadata provider through the catalog builders, so
//! the streamed layout always matches the advertised schema.

use arrow_flight::{FlightData, FlightDescriptor, FlightInfo};
use prost::Message;
use tonic::{Response, Status};
use tracing::debug;

use crate::backend::{DbSchemaFilter, SqlBackend, TableFilter, TableRef};
use crate::catalog;
use crate::error::ServerError;
use crate::protocol::Command;
use crate::service::{
    batch_stream, flight_info, status_from_error, BoxedFlightStream, SqlFlightService,
};

fn table_ref(catalog: Option<String>, db_schema: Option<String>, table: String) -> TableRef {
    TableRef {
        catalog,
        db_schema,
        table,
    }
}

fn capability_check<B: SqlBackend>(
    service: &SqlFlightService<B>,
    command: &Command,
) -> Result<(), Status> {
    match command {
        Command::GetSqlInfo(_) => service.sql_info_required().map(|_| ()),
        _ => service.metadata_required(),
    }
}

pub(crate) fn get_flight_info_metadata<B: SqlBackend>(
    service: &SqlFlightService<B>,
    command: Command,
    descriptor: FlightDescriptor,
) -> Result<Response<FlightInfo>, Status> {
    let schema = catalog::result_schema(&command)
        .ok_or_else(|| Status::internal("command has no fixed result schema"))?;
    capability_check(service, &command)?;

    debug!(type_url = command.type_url(), "describing metadata query");
    let ticket_bytes = command.into_any().encode_to_vec();
    let info = flight_info(&schema, descriptor, ticket_bytes)?;
    Ok(Response::new(info))
}

pub(crate) async fn do_get_metadata<B: SqlBackend>(
    service: &SqlFlightService<B>,
    command: Command,
) -> Result<Response<BoxedFlightStream<FlightData>>, Status> {
    let schema = catalog::result_schema(&command)
        .ok_or_else(|| Status::internal("command has no fixed result schema"))?;
    capability_check(service, &command)?;

    if let Command::GetSqlInfo(query) = &command {
        let registry = service.sql_info_required()?;
        let batch = registry
            .batch(&query.info)
            .map_err(|err| status_from_error(ServerError::Arrow(err)))?;
        return batch_stream(schema, vec![batch]);
    }

    debug!(type_url = command.type_url(), "streaming metadata query");
    let batch = service
        .run_blocking(move |backend| {
            let provider = backend
                .metadata()
                .ok_or(ServerError::NotImplemented("metadata discovery"))?;
            let batch = match command {
                Command::GetCatalogs(_) => catalog::catalogs_batch(&provider.catalogs()?)?,
                Command::GetDbSchemas(query) => {
                    let filter = DbSchemaFilter {
                        catalog: query.catalog,
                        db_schema_pattern: query.db_schema_filter_pattern,
                    };
                    catalog::db_schemas_batch(&provider.db_schemas(&filter)?)?
                }
                Command::GetTables(query) => {
                    let filter = TableFilter {
                        catalog: query.catalog,
                        db_schema_pattern: query.db_schema_filter_pattern,
                        table_pattern: query.table_name_filter_pattern,
                        table_types: query.table_types,
                    };
                    catalog::tables_batch(&provider.tables(&filter)?, query.include_schema)?
                }
                Command::GetTableTypes(_) => {
                    catalog::table_types_batch(&provider.table_types()?)?
                }
                Command::GetPrimaryKeys(query) => {
                    let table = table_ref(query.catalog, query.db_schema, query.table);
                    catalog::primary_keys_batch(&provider.primary_keys(&table)?)?
                }
                Command::GetImportedKeys(query) => {
                    let table = table_ref(query.catalog, query.db_schema, query.table);
                    catalog::keys_batch(&provider.imported_keys(&table)?)?
                }
                Command::GetExportedKeys(query) => {
                    let table = table_ref(query.catalog, query.db_schema, query.table);
                    catalog::keys_batch(&provider.exported_keys(&table)?)?
                }
                Command::GetCrossReference(query) => {
                    let pk_table =
                        table_ref(query.pk_catalog, query.pk_db_schema, query.pk_table);
                    let fk_table =
                        table_ref(query.fk_catalog, query.fk_db_schema, query.fk_table);
                    catalog::keys_batch(&provider.cross_reference(&pk_table, &fk_table)?)?
                }
                other => {
                    return Err(ServerError::InvalidRequest(format!(
                        "{} is not a metadata command",
                        other.type_url()
                    )))
                }
            };
            Ok(batch)
        })
        .await?;

    batch_stream(schema, vec![batch])
}
