//! The `{code, msg, data}` envelope every HTTP response uses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::json;

use nexim_shared::errcode::AppError;

pub fn success<T: Serialize>(data: T) -> Response {
    Json(json!({ "code": 0, "msg": "ok", "data": data })).into_response()
}

/// Wrapper so domain errors can flow out of handlers with `?`.
#[derive(Debug)]
pub struct ApiError(pub AppError);

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        error_response(&self.0)
    }
}

pub fn error_response(err: &AppError) -> Response {
    let status =
        StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (
        status,
        Json(json!({ "code": err.code, "msg": err.message, "data": null })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_response_uses_code_derived_status() {
        let resp = error_response(&AppError::token_invalid());
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let resp = error_response(&AppError::conv_not_found());
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
