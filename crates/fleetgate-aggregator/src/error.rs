//! Aggregator error taxonomy and its Redfish error response rendering.

use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde_json::{Value, json};

use crate::storage::DatabaseError;

/// Prefix of every Redfish base registry message id.
const REGISTRY_PREFIX: &str = "Base.1.6.1.";

/// Registry message attached to a 400 property error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyMessage {
    NotInList,
    FormatError,
}

impl PropertyMessage {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotInList => "PropertyValueNotInList",
            Self::FormatError => "PropertyValueFormatError",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AggregatorError {
    #[error("invalid username or password")]
    Credential,

    #[error("failed to look up user: {0}")]
    Lookup(String),

    #[error("no valid session found")]
    InvalidToken,

    #[error("session expired")]
    SessionExpired,

    #[error("no valid session with plugin {0}")]
    NoValidPluginSession(String),

    #[error("plugin unreachable: {0}")]
    PluginUnreachable(String),

    #[error("plugin responded with status {status}")]
    PluginProtocol { status: u16, body: Vec<u8> },

    #[error("{resource} {id} not found")]
    ResourceNotFound { resource: String, id: String },

    #[error("malformed JSON: {0}")]
    MalformedJson(String),

    #[error("{detail}")]
    PropertyValue {
        message: PropertyMessage,
        detail: String,
        args: Vec<String>,
    },

    #[error("{0}")]
    GeneralError(String),

    #[error("{0}")]
    Privilege(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, AggregatorError>;

impl AggregatorError {
    pub fn not_found(resource: impl Into<String>, id: impl Into<String>) -> Self {
        Self::ResourceNotFound {
            resource: resource.into(),
            id: id.into(),
        }
    }

    /// HTTP status returned to the northbound caller.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Credential
            | Self::Lookup(_)
            | Self::InvalidToken
            | Self::SessionExpired
            | Self::NoValidPluginSession(_) => StatusCode::UNAUTHORIZED,
            Self::PluginUnreachable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::PluginProtocol { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            Self::ResourceNotFound { .. } => StatusCode::NOT_FOUND,
            Self::MalformedJson(_) | Self::PropertyValue { .. } | Self::GeneralError(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::Privilege(_) => StatusCode::FORBIDDEN,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Registry status message, without the registry prefix.
    pub const fn status_message(&self) -> &'static str {
        match self {
            Self::Credential | Self::Lookup(_) => "ResourceAtURIUnauthorized",
            Self::InvalidToken | Self::SessionExpired | Self::NoValidPluginSession(_) => {
                "NoValidSession"
            }
            Self::PluginUnreachable(_) => "ServiceTemporarilyUnavailable",
            Self::PluginProtocol { .. } | Self::GeneralError(_) => "GeneralError",
            Self::ResourceNotFound { .. } => "ResourceNotFound",
            Self::MalformedJson(_) => "MalformedJSON",
            Self::PropertyValue { message, .. } => message.as_str(),
            Self::Privilege(_) => "InsufficientPrivilege",
            Self::Internal(_) => "InternalError",
        }
    }

    fn message_args(&self) -> Vec<String> {
        match self {
            Self::ResourceNotFound { resource, id } => vec![resource.clone(), id.clone()],
            Self::PropertyValue { args, .. } => args.clone(),
            _ => Vec::new(),
        }
    }

    /// Structured Redfish error body.
    pub fn to_body(&self) -> Value {
        let message = self.to_string();
        json!({
            "error": {
                "code": format!("{REGISTRY_PREFIX}GeneralError"),
                "message": "An error has occurred. See ExtendedInfo for more information.",
                "@Message.ExtendedInfo": [{
                    "@odata.type": "#Message.v1_0_8.Message",
                    "MessageId": format!("{REGISTRY_PREFIX}{}", self.status_message()),
                    "Message": message,
                    "MessageArgs": self.message_args(),
                }]
            }
        })
    }
}

impl From<DatabaseError> for AggregatorError {
    fn from(e: DatabaseError) -> Self {
        match e {
            DatabaseError::NotFound(what) => {
                let (resource, id) = what.split_once(' ').unwrap_or(("Resource", what.as_str()));
                Self::not_found(resource, id)
            }
            other => Self::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for AggregatorError {
    fn into_response(self) -> Response {
        let status = self.status();
        match &self {
            Self::Internal(_) | Self::PluginUnreachable(_) => {
                tracing::error!(error = %self, "Request failed");
            }
            _ => tracing::debug!(error = %self, status = status.as_u16(), "Request rejected"),
        }

        // A plugin's own JSON error body is more useful than a wrapper.
        if let Self::PluginProtocol { body, .. } = &self {
            if serde_json::from_slice::<Value>(body).is_ok() {
                let mut response = (status, body.clone()).into_response();
                response.headers_mut().insert(
                    header::CONTENT_TYPE,
                    HeaderValue::from_static("application/json; charset=utf-8"),
                );
                return response;
            }
        }

        (status, axum::Json(self.to_body())).into_response()
    }
}
