use axum::{
    Router,
    routing::{get, post, put},
};
#[cfg(debug_assertions)]
use tower_http::cors::CorsLayer;

use crate::{
    AppState,
    middleware::{auth_middleware, log_errors},
    routes,
};

pub fn build_router(state: AppState) -> Router {
    let protected_routes = Router::new()
        .route("/presence", put(routes::presence::update_presence))
        .route("/emergencies/toggle", post(routes::emergency::toggle))
        .route("/emergencies/activate", post(routes::emergency::activate))
        .route("/emergencies/deactivate", post(routes::emergency::deactivate))
        .route("/emergencies/active", get(routes::emergency::active))
        .route("/emergencies/by-id", get(routes::emergency::by_id))
        .route("/emergencies/respond", post(routes::emergency::respond))
        .route("/emergencies/location", post(routes::emergency::update_location))
        .route("/visibility", get(routes::visibility::snapshot))
        .route("/visibility/stream", get(routes::visibility::stream))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    let router = Router::new()
        .nest(&state.config.api_base_uri, protected_routes)
        .layer(axum::middleware::from_fn(log_errors));

    #[cfg(debug_assertions)]
    let router = {
        tracing::debug!("Adding CORS layer for development mode");
        router.layer(CorsLayer::permissive())
    };

    router.with_state(state)
}
