//! Runtime settings endpoints.

use crate::api::AppState;
use crate::pipeline::UnitInfo;
use crate::settings::{Setting, SettingsPatch, SettingsProvider};
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;

#[derive(Debug, Serialize)]
pub struct SettingsResponse {
    pub settings: Map<String, Value>,
    pub schema: Vec<Setting>,
    pub modules: Vec<UnitInfo>,
}

/// `GET /api/settings`: current values, schema and registered units.
pub async fn get_settings(State(state): State<Arc<AppState>>) -> Json<SettingsResponse> {
    Json(SettingsResponse {
        settings: state.settings.get_all().into_map(),
        schema: state.settings.schema().to_vec(),
        modules: state.pipeline.unit_info(),
    })
}

/// `POST /api/settings`: validated partial update; nothing is applied if any
/// key is rejected.
pub async fn update_settings(
    State(state): State<Arc<AppState>>,
    Json(patch): Json<SettingsPatch>,
) -> impl IntoResponse {
    match state.settings.update(patch) {
        Ok(_) => (
            StatusCode::OK,
            Json(json!({"success": true, "message": "Settings saved successfully"})),
        ),
        Err(e) => {
            tracing::warn!(error = %e, "Rejected settings update");
            (
                StatusCode::BAD_REQUEST,
                Json(json!({"success": false, "message": e.to_string()})),
            )
        }
    }
}
