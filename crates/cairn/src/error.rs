use http::StatusCode;
use serde::Serialize;
use thiserror::Error;

use crate::header::HeaderError;
use crate::method::{Method, MethodSet};
use crate::range::{Range, RangeError};
use crate::registry::RegistryError;
use crate::role::Role;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("{action} requires role {required}")]
    Forbidden { action: String, required: Role },

    #[error("Resource not found: {path}")]
    NotFound { path: String },

    #[error("{method} not allowed on {path} (allow: {allow})")]
    MethodNotAllowed {
        path: String,
        method: Method,
        allow: MethodSet,
        immutable: bool,
    },

    #[error("Resource is immutable: {path}")]
    Conflict { path: String },

    #[error("Resource gone: {path}")]
    Gone { path: String },

    #[error(transparent)]
    RangeNotSatisfiable(#[from] RangeError),

    #[error("Chunk {chunk_index} out of bounds for {path} ({length} chunks)")]
    OutOfBoundsChunk {
        path: String,
        chunk_index: u64,
        length: u64,
    },

    #[error("Invalid header: {0}")]
    InvalidHeader(#[from] HeaderError),

    #[error("Invalid role {role}: {reason}")]
    InvalidRole { role: Role, reason: &'static str },

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
}

impl Error {
    pub fn status(&self) -> StatusCode {
        match self {
            Error::BadRequest(_) | Error::InvalidHeader(_) | Error::InvalidRole { .. } => {
                StatusCode::BAD_REQUEST
            }
            Error::Forbidden { .. } => StatusCode::FORBIDDEN,
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            Error::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
            Error::Conflict { .. } => StatusCode::CONFLICT,
            Error::Gone { .. } => StatusCode::GONE,
            Error::RangeNotSatisfiable(_) | Error::OutOfBoundsChunk { .. } => {
                StatusCode::RANGE_NOT_SATISFIABLE
            }
            Error::Registry(RegistryError::EmptyContent) => StatusCode::BAD_REQUEST,
            Error::Registry(RegistryError::NotFound(_)) => StatusCode::NOT_FOUND,
            Error::Registry(_) | Error::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Machine-readable reason.
    pub fn reason(&self) -> &'static str {
        match self {
            Error::BadRequest(_) => "bad_request",
            Error::Forbidden { .. } => "forbidden",
            Error::NotFound { .. } => "not_found",
            Error::MethodNotAllowed { .. } => "method_not_allowed",
            Error::Conflict { .. } => "conflict",
            Error::Gone { .. } => "gone",
            Error::RangeNotSatisfiable(_) => "range_not_satisfiable",
            Error::OutOfBoundsChunk { .. } => "out_of_bounds_chunk",
            Error::InvalidHeader(_) => "invalid_header",
            Error::InvalidRole { .. } => "invalid_role",
            Error::Registry(_) => "registry",
            Error::Database(_) => "internal",
        }
    }
}

/// Serializable form of an [`Error`] handed back to callers.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub status: u16,
    pub error: &'static str,
    pub detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allow: Option<MethodSet>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub immutable: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required_role: Option<Role>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub range: Option<Range>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<i64>,
}

impl From<&Error> for ErrorResponse {
    fn from(err: &Error) -> Self {
        let mut body = ErrorResponse {
            status: err.status().as_u16(),
            error: err.reason(),
            detail: err.to_string(),
            allow: None,
            immutable: None,
            required_role: None,
            range: None,
            index: None,
        };

        match err {
            Error::MethodNotAllowed {
                allow, immutable, ..
            } => {
                body.allow = Some(*allow);
                body.immutable = Some(*immutable);
            }
            Error::Forbidden { required, .. } => body.required_role = Some(*required),
            Error::RangeNotSatisfiable(range) => {
                body.range = Some(range.range);
                body.index = Some(range.index);
            }
            Error::OutOfBoundsChunk { chunk_index, .. } => {
                body.index = i64::try_from(*chunk_index).ok();
            }
            _ => {}
        }

        body
    }
}
