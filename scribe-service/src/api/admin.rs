//! Allow-list and reference-link administration.

use axum::{Json, extract::State};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::I18nError;
use crate::retrieval::LinkFailure;

use super::AppState;

#[derive(Debug, Serialize)]
pub struct AllowedSitesResponse {
    pub allowed_sites: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct AddSiteRequest {
    #[serde(default)]
    pub site: String,
}

#[derive(Debug, Deserialize)]
pub struct SetLinksRequest {
    #[serde(default)]
    pub links: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct SetLinksResponse {
    pub message: String,
    pub succeeded: Vec<String>,
    pub failed: Vec<LinkFailure>,
}

/// GET /admin/allowed-sites
pub async fn get_allowed_sites_handler(
    State(state): State<Arc<AppState>>,
) -> Json<AllowedSitesResponse> {
    Json(AllowedSitesResponse {
        allowed_sites: state.service.allowed_sites(),
    })
}

/// POST /admin/add-allowed-site
pub async fn add_allowed_site_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<AddSiteRequest>,
) -> Result<Json<AllowedSitesResponse>, I18nError> {
    let allowed_sites = state
        .service
        .add_allowed_site(&request.site)
        .map_err(|e| state.i18n_error(e))?;

    Ok(Json(AllowedSitesResponse { allowed_sites }))
}

/// POST /admin/set-links - replace the reference collection
pub async fn set_links_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SetLinksRequest>,
) -> Result<Json<SetLinksResponse>, I18nError> {
    let report = state
        .service
        .set_reference_links(&request.links)
        .await
        .map_err(|e| state.i18n_error(e))?;

    Ok(Json(SetLinksResponse {
        message: state.service.i18n.get("en", "links-ingested", None),
        succeeded: report.succeeded,
        failed: report.failed,
    }))
}
