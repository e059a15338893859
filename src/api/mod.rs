pub mod auth;
pub mod error;
pub mod handlers;

use axum::{
    routing::{get, post},
    Router,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::engine::World;
use auth::SessionStore;

#[derive(Clone)]
pub struct ApiState {
    pub world: Arc<World>,
    pub sessions: SessionStore,
}

impl ApiState {
    pub fn new(world: Arc<World>) -> Self {
        Self {
            world,
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/login", post(auth::login))
        .route("/logout", post(auth::logout))
        .route("/api/status", get(handlers::get_status))
        .route("/api/plant", get(handlers::get_plant))
        .route("/api/electrical", get(handlers::get_electrical))
        .route("/api/buildings", get(handlers::get_buildings))
        .route("/api/building/:id", get(handlers::get_building))
        .route("/api/datacenter", get(handlers::get_datacenter))
        .route("/api/wastewater", get(handlers::get_wastewater))
        .route("/api/points", get(handlers::get_points))
        .route("/api/overrides", get(handlers::get_overrides))
        .route("/api/override/set", post(handlers::set_override))
        .route("/api/override/release", post(handlers::release_override))
        .route("/api/override/info/*path", get(handlers::get_override_info))
        .route(
            "/api/admin/parameters",
            get(handlers::get_parameters).post(handlers::set_parameters),
        )
        .route("/api/admin/scenario", post(handlers::set_scenario))
        .route("/api/admin/unit-system", post(handlers::set_unit_system))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
