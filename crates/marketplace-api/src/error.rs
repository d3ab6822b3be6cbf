use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::{error, warn};

use marketplace_common::error::CommonError;
use marketplace_common::llm::LlmError;
use marketplace_common::supabase::SupabaseError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Common(#[from] CommonError),

    #[error("config error: {0}")]
    Config(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    PayloadTooLarge(String),

    #[error("{0}")]
    RateLimited(String),

    #[error("{0}")]
    Internal(String),
}

impl From<LlmError> for AppError {
    fn from(e: LlmError) -> Self {
        Self::Common(e.into())
    }
}

impl From<SupabaseError> for AppError {
    fn from(e: SupabaseError) -> Self {
        Self::Common(e.into())
    }
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            Self::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            Self::Common(CommonError::Llm(_)) => StatusCode::BAD_GATEWAY,
            Self::Common(CommonError::Supabase(_)) | Self::Config(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(status = status.as_u16(), error = %self, "request failed");
        } else {
            warn!(status = status.as_u16(), error = %self, "request rejected");
        }
        (status, Json(json!({ "detail": self.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(AppError::BadRequest("x".into()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::Unauthorized("x".into()).status(), StatusCode::UNAUTHORIZED);
        assert_eq!(AppError::Forbidden("x".into()).status(), StatusCode::FORBIDDEN);
        assert_eq!(AppError::NotFound("x".into()).status(), StatusCode::NOT_FOUND);
        assert_eq!(AppError::RateLimited("x".into()).status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(AppError::PayloadTooLarge("x".into()).status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(
            AppError::from(LlmError::EmptyCompletion).status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            AppError::from(SupabaseError::MissingUser).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn test_llm_transport_failure_keeps_key_out_of_detail() {
        use std::time::Duration;

        use marketplace_common::llm::{LlmClient, LlmClientConfig, LlmProvider};

        let key = "SECRET-GEMINI-KEY";
        let mut config = LlmClientConfig::new(LlmProvider::Gemini);
        config.base_url = "http://127.0.0.1:9/v1".to_string();
        config.api_key = Some(key.to_string());
        config.max_retries = 0;
        config.default_timeout = Duration::from_secs(2);
        let client = LlmClient::new(config).unwrap();

        let err = AppError::from(client.complete("hello", None).await.unwrap_err());
        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
        let detail = err.to_string();
        assert!(!detail.contains(key), "{detail}");

        let resp = err.into_response();
        let body = axum::body::to_bytes(resp.into_body(), 64 * 1024).await.unwrap();
        assert!(!String::from_utf8_lossy(&body).contains(key));
    }

    #[test]
    fn test_response_carries_detail() {
        let resp = AppError::Forbidden("Only examiners can view submissions".into()).into_response();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }
}
