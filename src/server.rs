//! HTTP server and routes.

mod handlers;
mod state;

pub use state::AppState;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{delete, get, post, put},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Upper bound on an upload request body (500 MB).
const MAX_UPLOAD_BYTES: usize = 500 * 1024 * 1024;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let epaper_routes = Router::new()
        .route("/", get(handlers::list_editions))
        .route("/", post(handlers::create_edition))
        .route("/crop-share", post(handlers::crop_and_share))
        .route("/share/{token}", get(handlers::get_shared_crop))
        .route("/{id}", get(handlers::get_edition))
        .route("/{id}", put(handlers::update_edition))
        .route("/{id}", delete(handlers::delete_edition))
        .route("/{id}/publish", post(handlers::publish_edition));

    let areamap_routes = Router::new()
        .route("/", post(handlers::create_area_map))
        .route("/batch", post(handlers::batch_create_area_maps))
        .route("/{id}", put(handlers::update_area_map))
        .route("/{id}", delete(handlers::delete_area_map))
        .route("/page/{page_id}", get(handlers::get_page_area_maps))
        .route("/e-paper/{edition_id}", get(handlers::get_edition_area_maps))
        .route("/stats/{edition_id}", get(handlers::get_area_map_stats))
        .route("/test-point/{page_id}", post(handlers::test_point));

    let auth_routes = Router::new()
        .route("/login", post(handlers::auth_login))
        .route("/register", post(handlers::auth_register))
        .route("/logout", post(handlers::auth_logout))
        .route("/me", get(handlers::auth_me));

    let settings_routes = Router::new()
        .route("/{key}", get(handlers::get_setting))
        .route("/{key}", put(handlers::update_setting));

    Router::new()
        .route("/uploads/{bucket}/{file}", get(handlers::serve_artifact))
        .nest("/epapers", epaper_routes)
        .nest("/areamaps", areamap_routes)
        .nest("/api/auth", auth_routes)
        .nest("/api/settings", settings_routes)
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
