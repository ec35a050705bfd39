use axum::{
    Router,
    http::{Request, header::HeaderName},
    middleware,
    routing::get,
};
use tower_http::{
    cors::CorsLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, RequestId, SetRequestIdLayer},
    trace::{DefaultOnFailure, DefaultOnResponse, TraceLayer},
};
use tracing::{Level, field};

use crate::{
    AppState,
    auth::{self, require_session, require_session_or_trigger_token},
};

pub mod dashboard;
pub mod health;
pub mod issues;
pub mod snapshot;
pub mod sprints;

pub fn router(state: AppState) -> Router {
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(|request: &Request<_>| {
            let request_id = request
                .extensions()
                .get::<RequestId>()
                .and_then(|id| id.header_value().to_str().ok());
            let span = tracing::info_span!(
                "http_request",
                method = %request.method(),
                uri = %request.uri(),
                request_id = field::Empty
            );
            if let Some(request_id) = request_id {
                span.record("request_id", field::display(request_id));
            }
            span
        })
        .on_response(DefaultOnResponse::new().level(Level::INFO))
        .on_failure(DefaultOnFailure::new().level(Level::ERROR));

    let public = Router::<AppState>::new()
        .route("/health", get(health::health_check))
        .merge(auth::oauth::public_router());

    let protected = Router::<AppState>::new()
        .merge(dashboard::router())
        .merge(sprints::router())
        .merge(issues::router())
        .merge(auth::oauth::protected_router())
        .layer(middleware::from_fn_with_state(
            state.clone(),
            require_session,
        ));

    let triggers = Router::<AppState>::new()
        .merge(snapshot::router())
        .layer(middleware::from_fn_with_state(
            state.clone(),
            require_session_or_trigger_token,
        ));

    Router::<AppState>::new()
        .merge(public)
        .merge(protected)
        .merge(triggers)
        .layer(CorsLayer::permissive())
        .layer(trace_layer)
        .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
            "x-request-id",
        )))
        .layer(SetRequestIdLayer::new(
            HeaderName::from_static("x-request-id"),
            MakeRequestUuid {},
        ))
        .with_state(state)
}
