use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use phonon_client::ClientError;
use phonon_shared::{DenominationError, DeviceError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Device error: {0}")]
    Device(DeviceError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<ClientError> for ServerError {
    fn from(e: ClientError) -> Self {
        match e {
            ClientError::CardNotFound(_) => ServerError::NotFound(e.to_string()),
            ClientError::IncorrectPin => ServerError::Unauthorized(e.to_string()),
            ClientError::CardLocked(_) => ServerError::Forbidden(e.to_string()),
            ClientError::MiningReportNotFound(_) => ServerError::NotFound(e.to_string()),
            ClientError::InvalidPin { .. }
            | ClientError::Denomination(_)
            | ClientError::PhononNotOnCard { .. }
            | ClientError::AlreadyInitialized(_)
            | ClientError::NothingToRedeem => ServerError::BadRequest(e.to_string()),
            ClientError::RemoteCardPhonons(_)
            | ClientError::PhononAlreadyProposed { .. }
            | ClientError::MiningActive(_)
            | ClientError::MiningNotActive
            | ClientError::InvalidTransition { .. }
            | ClientError::ValidationErrorsPresent
            | ClientError::EmptyProposal
            | ClientError::Cancelled => ServerError::Conflict(e.to_string()),
            ClientError::Device(device) => ServerError::Device(device),
            ClientError::Store(_) => ServerError::Internal(e.to_string()),
        }
    }
}

impl From<DenominationError> for ServerError {
    fn from(e: DenominationError) -> Self {
        ServerError::BadRequest(e.to_string())
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ServerError::NotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            ServerError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ServerError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, self.to_string()),
            ServerError::Forbidden(_) => (StatusCode::FORBIDDEN, self.to_string()),
            ServerError::Conflict(_) => (StatusCode::CONFLICT, self.to_string()),
            ServerError::Device(DeviceError::Timeout { .. }) => {
                (StatusCode::GATEWAY_TIMEOUT, self.to_string())
            }
            ServerError::Device(_) => (StatusCode::BAD_GATEWAY, self.to_string()),
            ServerError::Internal(detail) => {
                tracing::error!(error = %detail, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, axum::Json(body)).into_response()
    }
}
