pub mod auth;
pub mod groups;
pub mod middleware;
pub mod rest;
pub mod state;
pub mod students;

use axum::{
    http::{
        header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
        HeaderValue, Method,
    },
    middleware as axum_middleware,
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::warn;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

pub use middleware::require_auth;
use rest::ApiDoc;
use state::AppState;

/// Builds the complete application: the `/api` routes, CORS, request tracing
/// and the Swagger UI.
pub fn router(state: Arc<AppState>) -> Router {
    // Public routes (no auth required)
    let public_routes = Router::new()
        .route("/auth/login", post(auth::login_handler))
        .route("/students", get(students::list_students_handler))
        .route("/groups", get(groups::list_groups_handler))
        .route("/groups/{id}", get(groups::get_group_handler));

    // Protected routes (auth required)
    let protected_routes = Router::new()
        .route("/auth/logout", post(auth::logout_handler))
        .route("/auth/me", get(auth::me_handler))
        .route("/students", post(students::create_student_handler))
        .route(
            "/students/{id}",
            put(students::update_student_handler).delete(students::delete_student_handler),
        )
        .route("/students/{id}/history", get(students::student_history_handler))
        .route("/groups", post(groups::create_group_handler))
        .route(
            "/groups/{id}",
            axum::routing::delete(groups::delete_group_handler),
        )
        .route("/groups/{group_id}/lessons", post(groups::start_lesson_handler))
        .route(
            "/groups/{group_id}/lessons/{lesson_id}/students/{student_id}",
            put(groups::record_attendance_handler),
        )
        .route(
            "/groups/{group_id}/lessons/{lesson_id}/end",
            post(groups::finalize_lesson_handler),
        )
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            require_auth,
        ));

    let cors = cors_layer(&state.config.allowed_origins);
    let api_router = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state);

    Router::new()
        .nest("/api", api_router)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let methods = [
        Method::GET,
        Method::POST,
        Method::PUT,
        Method::DELETE,
        Method::OPTIONS,
    ];
    let headers = [AUTHORIZATION, CONTENT_TYPE, ACCEPT];

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(%origin, "Ignoring unparsable CORS origin");
                None
            }
        })
        .collect();

    // Credentials cannot be combined with a wildcard origin.
    if allowed.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(methods)
            .allow_headers(headers)
    } else {
        CorsLayer::new()
            .allow_origin(allowed)
            .allow_credentials(true)
            .allow_methods(methods)
            .allow_headers(headers)
    }
}
