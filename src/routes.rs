// routes.rs
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::{docs, handlers, models::AppState};

/// Headroom on top of the audio size cap for multipart framing and headers.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

pub fn create_router(state: Arc<AppState>) -> Router {
    let body_limit = state.max_upload_bytes.saturating_add(MULTIPART_OVERHEAD);

    let api = Router::new()
        .route("/health", get(handlers::health))
        .route("/status", get(handlers::status))
        .route("/motor", post(handlers::control_motor))
        .route("/led", post(handlers::control_led))
        .route(
            "/speech",
            post(handlers::recognize_speech).layer(DefaultBodyLimit::max(body_limit)),
        );

    Router::new()
        // The mobile client opens its push channel on the server root.
        .route("/", get(handlers::handle_client_ws_upgrade))
        .route("/ws", get(handlers::handle_client_ws_upgrade))
        .nest("/api", api)
        .merge(SwaggerUi::new("/docs").url("/api-doc/openapi.json", docs::ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
