//! Login and logout.

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, instrument};

use super::AppState;
use super::extract::{AuthToken, json_body};
use crate::auth::Privilege;
use crate::error::{AggregatorError, Result};
use crate::plugin::AUTH_TOKEN_HEADER;

#[derive(Deserialize)]
struct LoginRequest {
    #[serde(rename = "UserName", alias = "username", default)]
    username: String,
    #[serde(rename = "Password", alias = "password", default)]
    password: String,
}

/// `POST /login` and `POST /redfish/v1/SessionService/Sessions`
#[instrument(skip_all)]
pub async fn login(State(state): State<AppState>, body: Bytes) -> Result<Response> {
    let req: LoginRequest = json_body(&body)?;
    let user = state.sessions.authenticate(&req.username, &req.password).await?;
    let session = state.sessions.create_session(&user).await?;
    info!(username = %session.username, "Session created");

    Ok((
        StatusCode::CREATED,
        [(AUTH_TOKEN_HEADER, session.token.clone())],
        Json(json!({"token": session.token})),
    )
        .into_response())
}

/// `DELETE /redfish/v1/SessionService/Sessions/{token}`
///
/// Callers may end their own session; ending another one needs
/// `ConfigureUsers`.
#[instrument(skip_all)]
pub async fn logout(
    State(state): State<AppState>,
    AuthToken(caller): AuthToken,
    Path(target): Path<String>,
) -> Result<StatusCode> {
    let session = state
        .authorizer
        .authorize(&caller, &[Privilege::Login], &[])
        .await?;
    if target != session.token && !session.has(Privilege::ConfigureUsers) {
        return Err(AggregatorError::Privilege(
            "ending another user's session requires ConfigureUsers".into(),
        ));
    }
    state.sessions.delete_session(&target).await?;
    info!(username = %session.username, "Session deleted");
    Ok(StatusCode::NO_CONTENT)
}
