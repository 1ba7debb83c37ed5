use std::{sync::Arc, time::Duration};

use {
    axum::{
        extract::{Request, State},
        middleware::Next,
        response::{IntoResponse, Response},
    },
    http::Method,
    tracing::{error, warn},
};

use {
    parley_bus::subjects::key,
    parley_common::{AppError, ErrorCode},
};

use crate::{auth::Identity, error::ApiError, state::GatewayState};

/// Fixed-window per-user rate limit on mutating API routes.
///
/// The counter lives in the ephemeral key/value store. When that store is
/// unreachable the limiter fails closed: requests are denied rather than
/// silently unmetered.
pub async fn rate_limit(
    State(state): State<Arc<GatewayState>>,
    request: Request,
    next: Next,
) -> Response {
    if !state.rate_limit.enabled || !is_mutating(request.method()) {
        return next.run(request).await;
    }

    let Some(identity) = request.extensions().get::<Identity>().cloned() else {
        // Auth middleware runs first; an unauthenticated request never
        // reaches the counter.
        return next.run(request).await;
    };

    let window_secs = state.rate_limit.window_secs.max(1);
    let window = chrono::Utc::now().timestamp() / window_secs as i64;
    let counter_key = key::rate_limit(&identity.user_id, window);

    match state
        .kv
        .incr_ex(&counter_key, Duration::from_secs(window_secs))
        .await
    {
        Ok(count) if count <= state.rate_limit.max_requests as i64 => next.run(request).await,
        Ok(_) => {
            warn!(user_id = %identity.user_id, "rate limit exceeded");
            ApiError(AppError::new(
                ErrorCode::TooManyRequests,
                "rate limit exceeded",
            ))
            .into_response()
        },
        Err(e) => {
            error!(error = %e, "rate limit store unavailable, denying request");
            ApiError(AppError::new(
                ErrorCode::TooManyRequests,
                "rate limiter unavailable",
            ))
            .into_response()
        },
    }
}

fn is_mutating(method: &Method) -> bool {
    matches!(
        *method,
        Method::POST | Method::PUT | Method::PATCH | Method::DELETE
    )
}
