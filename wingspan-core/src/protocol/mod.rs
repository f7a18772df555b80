//! Typed command envelopes.
//!
//! Every Flight SQL request rides inside one of three generic Flight
//! carriers: a descriptor's `cmd` bytes, a ticket's bytes, or an action
//! body. The payload is always the same shape: a protobuf `Any` whose
//! `type_url` names a message from the `arrow.flight.protocol.sql`
//! registry. This module owns packing and unpacking that container and the
//! exhaustive [`Command`] union the dispatcher matches on.
//!
//! Encoding is canonical: packing equal messages yields equal bytes, and
//! unknown type URLs are rejected without ever touching the payload.

mod messages;

pub use messages::*;

use bytes::Bytes;
use prost::Message;

/// Prefix shared by every type URL in the command registry.
pub const TYPE_URL_PREFIX: &str = "type.googleapis.com/arrow.flight.protocol.sql.";

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The carrier bytes did not decode as a tagged envelope.
    #[error("invalid command envelope: {0}")]
    InvalidEnvelope(prost::DecodeError),
    /// The envelope tag names no message in the registry.
    #[error("unknown command type: {0}")]
    UnknownCommand(String),
    /// The tag matched but the payload did not decode as that message.
    #[error("malformed {type_url} payload: {source}")]
    MalformedCommand {
        type_url: &'static str,
        source: prost::DecodeError,
    },
}

/// The tagged container every command travels in. Wire-compatible with
/// `google.protobuf.Any`.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Any {
    #[prost(string, tag = "1")]
    pub type_url: ::prost::alloc::string::String,
    #[prost(bytes = "bytes", tag = "2")]
    pub value: Bytes,
}

impl Any {
    /// Decode the envelope itself. The payload stays untouched.
    pub fn try_decode(buf: impl AsRef<[u8]>) -> Result<Self, ProtocolError> {
        <Self as Message>::decode(buf.as_ref()).map_err(ProtocolError::InvalidEnvelope)
    }

    /// Tag-only check: does this envelope carry an `M`?
    pub fn is<M: PackedMessage>(&self) -> bool {
        self.type_url == M::type_url()
    }

    /// Decode the payload as `M` if the tag matches, `Ok(None)` otherwise.
    pub fn unpack<M: PackedMessage>(&self) -> Result<Option<M>, ProtocolError> {
        if !self.is::<M>() {
            return Ok(None);
        }
        M::decode(self.value.as_ref())
            .map(Some)
            .map_err(|source| ProtocolError::MalformedCommand {
                type_url: M::type_url(),
                source,
            })
    }
}

/// A message from the command registry that knows its type URL.
pub trait PackedMessage: Message + Default {
    fn type_url() -> &'static str;

    /// Wrap the message in its tagged envelope.
    fn as_any(&self) -> Any {
        Any {
            type_url: Self::type_url().to_string(),
            value: self.encode_to_vec().into(),
        }
    }
}

macro_rules! packed_message {
    ($($name:ident),* $(,)?) => {
        $(impl PackedMessage for $name {
            fn type_url() -> &'static str {
                concat!(
                    "type.googleapis.com/arrow.flight.protocol.sql.",
                    stringify!($name)
                )
            }
        })*
    };
}

packed_message!(
    CommandStatementQuery,
    TicketStatementQuery,
    CommandPreparedStatementQuery,
    CommandStatementUpdate,
    CommandPreparedStatementUpdate,
    CommandGetCatalogs,
    CommandGetDbSchemas,
    CommandGetTables,
    CommandGetTableTypes,
    CommandGetSqlInfo,
    CommandGetPrimaryKeys,
    CommandGetImportedKeys,
    CommandGetExportedKeys,
    CommandGetCrossReference,
    ActionCreatePreparedStatementRequest,
    ActionCreatePreparedStatementResult,
    ActionClosePreparedStatementRequest,
    DoPutUpdateResult,
);

macro_rules! command_union {
    ($($variant:ident($msg:ty)),* $(,)?) => {
        /// The exhaustive union of command variants a carrier may hold.
        #[derive(Clone, Debug, PartialEq)]
        pub enum Command {
            $($variant($msg),)*
        }

        impl Command {
            /// Decode an envelope into its variant. Unknown tags fail
            /// without decoding the payload.
            pub fn try_from_any(any: Any) -> Result<Self, ProtocolError> {
                $(
                    if any.is::<$msg>() {
                        return match any.unpack::<$msg>()? {
                            Some(msg) => Ok(Command::$variant(msg)),
                            None => Err(ProtocolError::UnknownCommand(any.type_url)),
                        };
                    }
                )*
                Err(ProtocolError::UnknownCommand(any.type_url))
            }

            pub fn into_any(self) -> Any {
                match self {
                    $(Command::$variant(msg) => msg.as_any(),)*
                }
            }

            pub fn type_url(&self) -> &'static str {
                match self {
                    $(Command::$variant(_) => <$msg as PackedMessage>::type_url(),)*
                }
            }
        }
    };
}

command_union!(
    StatementQuery(CommandStatementQuery),
    TicketStatementQuery(TicketStatementQuery),
    PreparedStatementQuery(CommandPreparedStatementQuery),
    StatementUpdate(CommandStatementUpdate),
    PreparedStatementUpdate(CommandPreparedStatementUpdate),
    GetCatalogs(CommandGetCatalogs),
    GetDbSchemas(CommandGetDbSchemas),
    GetTables(CommandGetTables),
    GetTableTypes(CommandGetTableTypes),
    GetSqlInfo(CommandGetSqlInfo),
    GetPrimaryKeys(CommandGetPrimaryKeys),
    GetImportedKeys(CommandGetImportedKeys),
    GetExportedKeys(CommandGetExportedKeys),
    GetCrossReference(CommandGetCrossReference),
);

impl Command {
    /// Decode raw carrier bytes into a variant.
    pub fn try_decode(buf: impl AsRef<[u8]>) -> Result<Self, ProtocolError> {
        Command::try_from_any(Any::try_decode(buf)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_unpack_round_trip() {
        let cmd = CommandStatementQuery {
            query: "SELECT * FROM t".to_string(),
            client_execution_handle: Some(Bytes::from_static(b"h1")),
        };
        let any = cmd.as_any();
        assert_eq!(any.type_url, CommandStatementQuery::type_url());
        assert!(any.is::<CommandStatementQuery>());
        assert!(!any.is::<CommandStatementUpdate>());

        let decoded = any
            .unpack::<CommandStatementQuery>()
            .unwrap()
            .expect("tag matches");
        assert_eq!(decoded, cmd);
    }

    #[test]
    fn unpack_mismatched_tag_is_none() {
        let any = CommandGetCatalogs {}.as_any();
        assert!(any.unpack::<CommandGetTables>().unwrap().is_none());
    }

    #[test]
    fn command_round_trips_every_variant() {
        let commands = vec![
            Command::StatementQuery(CommandStatementQuery {
                query: "SELECT 1".to_string(),
                client_execution_handle: None,
            }),
            Command::TicketStatementQuery(TicketStatementQuery {
                statement_handle: Bytes::from_static(b"abc"),
            }),
            Command::PreparedStatementQuery(CommandPreparedStatementQuery {
                prepared_statement_handle: Bytes::from_static(b"abc"),
            }),
            Command::StatementUpdate(CommandStatementUpdate {
                query: "DELETE FROM t".to_string(),
            }),
            Command::PreparedStatementUpdate(CommandPreparedStatementUpdate {
                prepared_statement_handle: Bytes::from_static(b"abc"),
            }),
            Command::GetCatalogs(CommandGetCatalogs {}),
            Command::GetDbSchemas(CommandGetDbSchemas {
                catalog: Some(String::new()),
                db_schema_filter_pattern: Some("APP%".to_string()),
            }),
            Command::GetTables(CommandGetTables {
                catalog: None,
                db_schema_filter_pattern: None,
                table_name_filter_pattern: Some("%".to_string()),
                table_types: vec!["TABLE".to_string()],
                include_schema: true,
            }),
            Command::GetTableTypes(CommandGetTableTypes {}),
            Command::GetSqlInfo(CommandGetSqlInfo { info: vec![0, 1] }),
            Command::GetPrimaryKeys(CommandGetPrimaryKeys {
                catalog: None,
                db_schema: None,
                table: "T".to_string(),
            }),
            Command::GetImportedKeys(CommandGetImportedKeys {
                catalog: None,
                db_schema: Some("APP".to_string()),
                table: "T".to_string(),
            }),
            Command::GetExportedKeys(CommandGetExportedKeys {
                catalog: Some("C".to_string()),
                db_schema: None,
                table: "T".to_string(),
            }),
            Command::GetCrossReference(CommandGetCrossReference {
                pk_catalog: None,
                pk_db_schema: None,
                pk_table: "P".to_string(),
                fk_catalog: None,
                fk_db_schema: None,
                fk_table: "F".to_string(),
            }),
        ];

        for command in commands {
            let any = command.clone().into_any();
            let bytes = any.encode_to_vec();
            let decoded = Command::try_decode(&bytes).expect("round trip");
            assert_eq!(decoded, command);
        }
    }

    #[test]
    fn canonical_encoding() {
        let a = CommandGetTables {
            catalog: Some("c".to_string()),
            db_schema_filter_pattern: None,
            table_name_filter_pattern: None,
            table_types: vec![],
            include_schema: false,
        };
        let b = a.clone();
        assert_eq!(a.as_any().encode_to_vec(), b.as_any().encode_to_vec());
    }

    #[test]
    fn unknown_type_url_is_rejected() {
        let any = Any {
            type_url: format!("{TYPE_URL_PREFIX}CommandDoesNotExist"),
            value: Bytes::from_static(b"\x0a\x01x"),
        };
        let err = Command::try_from_any(any).unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownCommand(_)));
    }

    #[test]
    fn malformed_payload_is_rejected() {
        let any = Any {
            type_url: CommandGetSqlInfo::type_url().to_string(),
            // field 1 wire type claims a length-delimited payload that is
            // longer than the buffer
            value: Bytes::from_static(b"\x0a\xff\x01"),
        };
        let err = Command::try_from_any(any).unwrap_err();
        assert!(matches!(err, ProtocolError::MalformedCommand { .. }));
    }

    #[test]
    fn garbage_envelope_is_rejected() {
        let err = Any::try_decode(b"\xff\xff\xff").unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidEnvelope(_)));
    }
}
