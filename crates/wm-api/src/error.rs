use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use wm_core::ServiceError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("store error: {0}")]
    Store(#[from] wm_db::Error),

    #[error("dispatch error: {0}")]
    Dispatch(#[from] wm_core::DispatchError),
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::InvalidId | ServiceError::IdTaken(_) => ApiError::BadRequest(err.to_string()),
            ServiceError::Store(e) => ApiError::Store(e),
            ServiceError::Dispatch(e) => ApiError::Dispatch(e),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Store(_) | ApiError::Dispatch(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        let body = serde_json::json!({ "error": self.to_string() });
        (status, axum::Json(body)).into_response()
    }
}
