//! Error type for the AI proxy gateway.

use crate::providers::Engine;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProxyError {
    /// The requested engine is not one the gateway can reach
    #[error("Unsupported AI engine. Please use \"qwen\" or \"openai\".")]
    UnsupportedEngine,

    /// Neither the caller nor the server supplied a key
    #[error("{} API key is not configured. Please add your API key in Settings.", .0.display_name())]
    MissingCredential(Engine),

    /// Provider answered with a non-success status
    #[error("{} API error ({status}): {message}", .provider.display_name())]
    Upstream {
        provider: Engine,
        status: u16,
        message: String,
        details: Value,
    },

    /// Provider answered 2xx but without the expected content
    #[error("Invalid response format from {} API", .provider.display_name())]
    InvalidFormat { provider: Engine, details: Value },

    /// Transport-level failure reaching the provider
    #[error(
        "Connection to {} API failed. This could be due to network issues or server problems. Please try again in a few moments.",
        .provider.display_name()
    )]
    Connection { provider: Engine },

    #[error("Internal server error while processing your request")]
    Internal { details: String },
}

impl ProxyError {
    /// Classifies a reqwest failure: anything that never produced a response
    /// is a connectivity problem.
    pub fn transport(provider: Engine, err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() || err.is_request() {
            ProxyError::Connection { provider }
        } else {
            ProxyError::Internal {
                details: err.to_string(),
            }
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::UnsupportedEngine => StatusCode::BAD_REQUEST,
            ProxyError::MissingCredential(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ProxyError::Upstream { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            ProxyError::InvalidFormat { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            ProxyError::Connection { .. } => StatusCode::SERVICE_UNAVAILABLE,
            ProxyError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn body(&self) -> ErrorBody {
        let (details, kind) = match self {
            ProxyError::Upstream { details, .. } | ProxyError::InvalidFormat { details, .. } => {
                (Some(details.clone()), None)
            }
            ProxyError::Internal { details } => (Some(Value::String(details.clone())), None),
            ProxyError::Connection { .. } => (None, Some("connection_error")),
            ProxyError::UnsupportedEngine | ProxyError::MissingCredential(_) => (None, None),
        };
        ErrorBody {
            error: self.to_string(),
            details,
            kind,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<&'static str>,
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        (self.status(), Json(self.body())).into_response()
    }
}
