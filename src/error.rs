use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Body of every non-2xx response. `error` is shown to the operator as is.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

#[derive(Debug)]
pub enum ApiError {
    Unauthorized(&'static str, String),
    Forbidden(&'static str, String),
    BadRequest(&'static str, String),
    NotFound(&'static str, String),
    Conflict(&'static str, String),
    /// An external dependency is missing or failing.
    Unavailable(&'static str, String),
    Internal(String),
}

impl ApiError {
    pub fn invalid_credentials() -> Self {
        ApiError::Unauthorized("INVALID_CREDENTIALS", "E-posta veya şifre hatalı".into())
    }

    pub fn session_expired() -> Self {
        ApiError::Unauthorized("SESSION_EXPIRED", "Oturumunuzun süresi doldu, lütfen tekrar giriş yapın".into())
    }

    pub fn session_evicted() -> Self {
        ApiError::Unauthorized(
            "SESSION_EVICTED",
            "Hesabınıza başka bir cihazdan giriş yapıldı, oturumunuz kapatıldı".into(),
        )
    }

    pub fn forbidden() -> Self {
        ApiError::Forbidden("FORBIDDEN", "Bu işlem için yetkiniz yok".into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        ApiError::BadRequest("VALIDATION_ERROR", message.into())
    }

    pub fn not_found(what: &str) -> Self {
        ApiError::NotFound("NOT_FOUND", format!("{what} bulunamadı"))
    }

    pub fn code(&self) -> &str {
        match self {
            ApiError::Unauthorized(code, _)
            | ApiError::Forbidden(code, _)
            | ApiError::BadRequest(code, _)
            | ApiError::NotFound(code, _)
            | ApiError::Conflict(code, _)
            | ApiError::Unavailable(code, _) => code,
            ApiError::Internal(_) => "INTERNAL",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized(..) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(..) => StatusCode::FORBIDDEN,
            ApiError::BadRequest(..) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(..) => StatusCode::NOT_FOUND,
            ApiError::Conflict(..) => StatusCode::CONFLICT,
            ApiError::Unavailable(..) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(e: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &e {
            if db.is_unique_violation() {
                return ApiError::Conflict("DUPLICATE", "Bu kayıt zaten mevcut".into());
            }
            if db.is_foreign_key_violation() {
                return ApiError::BadRequest("INVALID_REFERENCE", "İlişkili kayıt bulunamadı".into());
            }
        }
        ApiError::Internal(format!("db error: {e}"))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code().to_string();
        let message = match self {
            ApiError::Internal(detail) => {
                tracing::error!(%detail, "internal error");
                "Beklenmeyen bir hata oluştu, lütfen tekrar deneyin".to_string()
            }
            ApiError::Unauthorized(_, m)
            | ApiError::Forbidden(_, m)
            | ApiError::BadRequest(_, m)
            | ApiError::NotFound(_, m)
            | ApiError::Conflict(_, m)
            | ApiError::Unavailable(_, m) => m,
        };

        (status, Json(ErrorResponse { error: message, code })).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_json(resp: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn error_body_is_flat_error_string() {
        let resp = ApiError::validation("Tutar sıfırdan büyük olmalı").into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let body = body_json(resp).await;
        assert_eq!(body["error"], "Tutar sıfırdan büyük olmalı");
        assert_eq!(body["code"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn internal_details_are_not_leaked() {
        let resp = ApiError::Internal("db error: connection refused".into()).into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = body_json(resp).await;
        assert_eq!(body["code"], "INTERNAL");
        assert!(!body["error"].as_str().unwrap().contains("connection refused"));
    }

    #[test]
    fn row_not_found_maps_to_internal() {
        let err: ApiError = sqlx::Error::RowNotFound.into();
        assert_eq!(err.code(), "INTERNAL");
    }
}
