//! `/redfish/v1/AccountService/Accounts`

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, State};
use serde_json::Value;
use tracing::instrument;

use super::AppState;
use super::extract::{AuthToken, json_body};
use crate::auth::account::account_resource;
use crate::auth::{AccountUpdate, Privilege};
use crate::error::Result;

/// `PATCH /redfish/v1/AccountService/Accounts/{id}`
#[instrument(skip_all, fields(account_id = %account_id))]
pub async fn update(
    State(state): State<AppState>,
    AuthToken(token): AuthToken,
    Path(account_id): Path<String>,
    body: Bytes,
) -> Result<Json<Value>> {
    let session = state
        .authorizer
        .authorize(&token, &[Privilege::Login], &[])
        .await?;
    let update: AccountUpdate = json_body(&body)?;
    let user = state.accounts.update(&session, &account_id, &update).await?;
    Ok(Json(account_resource(&user)))
}
