use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use crate::errors::AppError;
use crate::state::AppState;

// GET /health
pub async fn health(State(state): State<Arc<AppState>>) -> Result<Json<Value>, AppError> {
    {
        let db = state.db()?;
        db.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .map_err(|e| AppError::Unavailable(format!("database check failed: {e}")))?;
    }
    Ok(Json(json!({
        "status": "ok",
        "notifications": state.notifier.breaker().state().as_str(),
    })))
}
