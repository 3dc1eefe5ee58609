//! Axum router wiring for the scrape listener.

use axum::{routing::get, Router};

use crate::{app_state::AppState, ops};

pub fn build_router(state: AppState) -> Router {
    let scrape_path = state.cfg().daemon.path.clone();
    Router::new()
        .route(&scrape_path, get(ops::metrics))
        .route("/healthz", get(ops::healthz))
        .with_state(state)
}
