use arrow_flight::error::FlightError;
use thiserror::Error;
use tonic::{Code, Status};

use wingspan_core::protocol::ProtocolError;

/// Client-side error taxonomy. Server failures keep their category: each
/// variant corresponds to one transport status code.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("not implemented: {0}")]
    NotImplemented(String),
    #[error("statement handle not found: {0}")]
    HandleNotFound(String),
    #[error("statement handle busy: {0}")]
    HandleBusy(String),
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("server error: {0}")]
    Server(String),
    /// Cancelled, deadline exceeded, unavailable, and the other transport
    /// classes, propagated unchanged.
    #[error("transport error: {0}")]
    Transport(Status),
    #[error("connection error: {0}")]
    Connection(#[from] tonic::transport::Error),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("prepared statement is closed")]
    Closed,
    #[error("arrow error: {0}")]
    Arrow(#[from] arrow_schema::ArrowError),
}

impl ClientError {
    /// Whether the caller's retry policy may reasonably apply. Requests
    /// rejected by the server ([`ClientError::InvalidRequest`],
    /// [`ClientError::HandleNotFound`], ...) never are.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClientError::Transport(status) if matches!(
                status.code(),
                Code::Unavailable | Code::Cancelled | Code::DeadlineExceeded
            )
        )
    }
}

impl From<Status> for ClientError {
    fn from(status: Status) -> Self {
        let message = status.message().to_string();
        match status.code() {
            Code::InvalidArgument => ClientError::InvalidRequest(message),
            Code::Unimplemented => ClientError::NotImplemented(message),
            Code::NotFound => ClientError::HandleNotFound(message),
            Code::Aborted => ClientError::HandleBusy(message),
            Code::FailedPrecondition => ClientError::SchemaMismatch(message),
            Code::Unauthenticated => ClientError::Unauthenticated(message),
            Code::PermissionDenied => ClientError::PermissionDenied(message),
            Code::Internal => ClientError::Server(message),
            _ => ClientError::Transport(status),
        }
    }
}

impl From<FlightError> for ClientError {
    fn from(err: FlightError) -> Self {
        match err {
            FlightError::Tonic(status) => (*status).into(),
            other => ClientError::Protocol(other.to_string()),
        }
    }
}

impl From<prost::DecodeError> for ClientError {
    fn from(err: prost::DecodeError) -> Self {
        ClientError::Protocol(err.to_string())
    }
}

impl From<ProtocolError> for ClientError {
    fn from(err: ProtocolError) -> Self {
        ClientError::Protocol(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categories_follow_status_codes() {
        assert!(matches!(
            ClientError::from(Status::not_found("gone")),
            ClientError::HandleNotFound(_)
        ));
        assert!(matches!(
            ClientError::from(Status::failed_precondition("schema")),
            ClientError::SchemaMismatch(_)
        ));
        assert!(matches!(
            ClientError::from(Status::aborted("busy")),
            ClientError::HandleBusy(_)
        ));
    }

    #[test]
    fn only_transport_classes_are_retryable() {
        assert!(ClientError::from(Status::unavailable("down")).is_retryable());
        assert!(ClientError::from(Status::cancelled("stop")).is_retryable());
        assert!(ClientError::from(Status::deadline_exceeded("late")).is_retryable());
        assert!(!ClientError::from(Status::invalid_argument("bad")).is_retryable());
        assert!(!ClientError::from(Status::not_found("gone")).is_retryable());
        assert!(!ClientError::from(Status::unimplemented("nope")).is_retryable());
    }
}
