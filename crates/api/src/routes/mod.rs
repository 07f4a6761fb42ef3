pub mod health;
pub mod jobs;
pub mod pose;

use axum::routing::get;
use axum::Router;

use crate::handlers;
use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// Route hierarchy:
///
/// ```text
/// /jobs                                  list, submit
/// /jobs/{id}                             status + result|error
/// /jobs/{id}/log                         worker output so far (text/plain)
/// /jobs/{id}/frames/{index}              one frame record
/// /jobs/{id}/frames/{index}/render       frame overlay (PNG)
///
/// /pool                                  GPU occupancy and queue
///
/// /pose/frame                            single-image estimate (POST)
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .nest("/jobs", jobs::router())
        .route("/pool", get(handlers::jobs::pool_status))
        .nest("/pose", pose::router())
}
