use thiserror::Error;

use crate::backend::BackendError;
use crate::protocol::ProtocolError;

/// Everything the protocol engine can fail with. Each variant maps to one
/// transport status code in `service::status_from_error`.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("{0} is not supported by this backend")]
    NotImplemented(&'static str),
    #[error("unknown statement handle")]
    HandleNotFound,
    #[error("statement handle already has a call in flight")]
    HandleBusy,
    #[error("parameter schema mismatch: {0}")]
    SchemaMismatch(String),
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),
    #[error("arrow error: {0}")]
    Arrow(#[from] arrow_schema::ArrowError),
}
