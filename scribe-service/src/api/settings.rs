//! Runtime settings endpoints.
//!
//! Values written here are stored in the settings table and layered over the
//! file/environment configuration; most take effect on the next request.

use axum::{Json, extract::State};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::api::AppState;
use crate::config::DynamicConfig;
use crate::error::{I18nError, ServiceError};

/// Response for GET /api/settings
#[derive(Debug, Serialize)]
pub struct SettingsResponse {
    /// Effective values, secrets masked
    pub settings: HashMap<String, serde_json::Value>,
    /// Keys currently overridden in the database
    pub overridden: Vec<String>,
}

/// Request body for PUT /api/settings
#[derive(Debug, Deserialize)]
pub struct UpdateSettingsRequest {
    /// `null` reverts a key to its configured default
    pub settings: HashMap<String, serde_json::Value>,
}

/// GET /api/settings
pub async fn get_settings_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<SettingsResponse>, I18nError> {
    let db_settings = state
        .service
        .db
        .get_all_settings()
        .map_err(|e| state.i18n_error(e))?;

    let mut overridden: Vec<String> = db_settings.into_keys().collect();
    overridden.sort();

    Ok(Json(SettingsResponse {
        settings: state.service.runtime_config.dynamic().to_key_value_map(),
        overridden,
    }))
}

/// PUT /api/settings
pub async fn update_settings_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<UpdateSettingsRequest>,
) -> Result<Json<SettingsResponse>, I18nError> {
    let valid_keys = DynamicConfig::valid_keys();
    if let Some(key) = request
        .settings
        .keys()
        .find(|key| !valid_keys.contains(key.as_str()))
    {
        return Err(state.i18n_error(ServiceError::InvalidRequest {
            message: format!("Unknown setting key: {}", key),
        }));
    }

    state
        .service
        .update_settings(request.settings)
        .await
        .map_err(|e| state.i18n_error(e))?;

    get_settings_handler(State(state)).await
}
