pub mod health;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, patch, post},
    Router,
};

use crate::photos::handlers;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    let upload_limit = state.config.max_upload_bytes;

    Router::new()
        .route("/health", get(health::health_handler))
        // Photo library
        .route(
            "/api/v1/photos",
            post(handlers::handle_upload)
                .get(handlers::handle_list_photos)
                .delete(handlers::handle_reset),
        )
        .route(
            "/api/v1/photos/:id",
            get(handlers::handle_get_photo).delete(handlers::handle_delete_photo),
        )
        .route(
            "/api/v1/photos/:id/location",
            patch(handlers::handle_update_location),
        )
        .route(
            "/api/v1/photos/:id/note",
            get(handlers::handle_get_note).put(handlers::handle_put_note),
        )
        // Map
        .route("/api/v1/clusters", get(handlers::handle_clusters))
        .route(
            "/api/v1/clusters/:key/relocate",
            post(handlers::handle_relocate_cluster),
        )
        // Calendar and timeline
        .route("/api/v1/calendar", get(handlers::handle_calendar))
        .route("/api/v1/days/:date", get(handlers::handle_day))
        // Display bytes and change notification
        .route("/api/v1/display/:token", get(handlers::handle_display))
        .route("/api/v1/revision", get(handlers::handle_revision))
        .layer(DefaultBodyLimit::max(upload_limit))
        .with_state(state)
}
