//! `/redfish/v1/Managers`

use axum::Json;
use axum::extract::{Path, State};
use axum::http::Uri;
use serde_json::Value;
use tracing::instrument;

use super::AppState;
use super::extract::AuthToken;
use crate::auth::Privilege;
use crate::error::Result;

/// `GET /redfish/v1/Managers`
pub async fn collection(
    State(state): State<AppState>,
    AuthToken(token): AuthToken,
) -> Result<Json<Value>> {
    state
        .authorizer
        .authorize(&token, &[Privilege::Login], &[])
        .await?;
    Ok(Json(state.resources.managers_collection().await?))
}

/// `GET /redfish/v1/Managers/{id}`
#[instrument(skip_all, fields(manager_id = %id))]
pub async fn manager(
    State(state): State<AppState>,
    AuthToken(token): AuthToken,
    Path(id): Path<String>,
    uri: Uri,
) -> Result<Json<Value>> {
    state
        .authorizer
        .authorize(&token, &[Privilege::Login], &[])
        .await?;
    Ok(Json(state.resources.get_manager(uri.path(), &id).await?))
}

/// `GET /redfish/v1/Managers/{id}/{*rest}`
#[instrument(skip_all, fields(manager_id = %id))]
pub async fn manager_resource(
    State(state): State<AppState>,
    AuthToken(token): AuthToken,
    Path((id, _rest)): Path<(String, String)>,
    uri: Uri,
) -> Result<Json<Value>> {
    state
        .authorizer
        .authorize(&token, &[Privilege::Login], &[])
        .await?;
    Ok(Json(state.resources.get_manager_resource(uri.path(), &id).await?))
}
