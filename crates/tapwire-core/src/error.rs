use std::time::Duration;

use thiserror::Error;
use tonic::Status;

use crate::record::RecordId;

pub type ProxyResult<T> = Result<T, ProxyError>;

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("parse error: {0}")]
    Parse(String),

    #[error("unknown method: {0}")]
    UnknownMethod(String),

    #[error("unknown service: {0}")]
    UnknownService(String),

    #[error("no message type {type_name} for method {method}")]
    UnresolvedType { method: String, type_name: String },

    #[error("client-streaming method {0} is not supported")]
    UnsupportedMethod(String),

    #[error("backend error: {0}")]
    Backend(Status),

    #[error("call record {0} no longer exists")]
    RecordGone(RecordId),

    #[error("release wait timed out after {0:?}")]
    ReleaseTimeout(Duration),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ProxyError {
    /// Coarse signal for the caller. Full detail stays server-side; only the
    /// backend's own status crosses the boundary unchanged.
    pub fn into_status(self) -> Status {
        match self {
            ProxyError::UnknownMethod(_) => Status::unimplemented("method not implemented"),
            ProxyError::Backend(status) => status,
            _ => Status::internal("interception proxy error"),
        }
    }
}
