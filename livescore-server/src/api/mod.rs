//! Client-facing endpoints.

mod sportshub;

use crate::state::AppState;
use axum::{Router, routing::get};

pub fn routes() -> Router<AppState> {
    Router::new().route("/sportshub", get(sportshub::sportshub_ws))
}
