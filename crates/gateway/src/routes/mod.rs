use std::sync::Arc;

use axum::{
    extract::{Request, State},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    Router,
};

use parley_common::AppError;

use crate::{auth, error::ApiError, ratelimit, state::GatewayState};

pub mod chats;
pub mod messages;

/// The `/api/v1` surface: identity resolution, then rate limiting, then
/// the domain routers.
pub fn api_router(state: Arc<GatewayState>) -> Router<Arc<GatewayState>> {
    Router::new()
        .nest("/messages", messages::router())
        .nest("/chats", chats::router())
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            ratelimit::rate_limit,
        ))
        .layer(middleware::from_fn_with_state(state, require_identity))
}

/// Resolve the caller's identity (trusted headers or bearer token) and
/// stash it in request extensions; 401 otherwise.
async fn require_identity(
    State(state): State<Arc<GatewayState>>,
    mut request: Request,
    next: Next,
) -> Response {
    match auth::authenticate(&state, request.headers(), None).await {
        Ok(identity) => {
            request.extensions_mut().insert(identity);
            next.run(request).await
        },
        Err(e) => {
            let err = if e.code.http_status() == 401 {
                e
            } else {
                AppError::unauthorized("unauthorized")
            };
            ApiError(err).into_response()
        },
    }
}
