mod stats;

use axum::Json;
use serde_json::{Value, json};

pub use stats::stats_ws;

pub async fn health() -> Json<Value> {
    Json(json!({"status": "ok"}))
}
