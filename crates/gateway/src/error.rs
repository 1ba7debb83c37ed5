use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use parley_common::{ApiResponse, AppError};

/// Newtype bridging [`AppError`] into an axum response carrying the
/// uniform `{success, error}` envelope.
pub struct ApiError(pub AppError);

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.code.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(ApiResponse::<()>::err(&self.0))).into_response()
    }
}

pub type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

/// Wrap a payload in the success envelope.
pub fn ok<T>(data: T) -> ApiResult<T> {
    Ok(Json(ApiResponse::ok(data)))
}

pub fn ok_with_meta<T>(data: T, meta: serde_json::Value) -> ApiResult<T> {
    Ok(Json(ApiResponse::ok_with_meta(data, meta)))
}
