mod api;
mod web;

use std::sync::Arc;

use axum::{Router, middleware};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::{
    AppState, auth,
    error::{AppError, AppResult},
};

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(api::router())
        .merge(web::router())
        .layer(middleware::from_fn_with_state(state.clone(), auth::authenticate))
        .layer(CorsLayer::new().allow_origin(Any).allow_headers(Any).allow_methods(Any))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Login attempts share one process-wide budget.
fn check_login_rate(state: &AppState) -> AppResult<()> {
    if state.login_limiter.check().is_err() {
        tracing::warn!("login rate limit exceeded");
        return Err(AppError::RateLimited);
    }
    Ok(())
}
