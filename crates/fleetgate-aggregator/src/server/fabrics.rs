//! `/redfish/v1/Fabrics`, forwarded to the plugin managing each fabric.

use std::collections::HashMap;

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{Method, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use serde_json::Value;
use tracing::instrument;

use super::AppState;
use super::extract::AuthToken;
use crate::auth::Privilege;
use crate::error::Result;
use crate::proxy::ProxyResponse;

/// `GET /redfish/v1/Fabrics`
pub async fn collection(
    State(state): State<AppState>,
    AuthToken(token): AuthToken,
) -> Result<Json<Value>> {
    state
        .authorizer
        .authorize(&token, &[Privilege::ConfigureComponents], &[])
        .await?;
    Ok(Json(state.resources.fabrics_collection().await?))
}

/// Any method on `/redfish/v1/Fabrics/{id}` and below.
#[instrument(skip_all, fields(method = %method, path = %uri.path()))]
pub async fn forward(
    State(state): State<AppState>,
    AuthToken(token): AuthToken,
    method: Method,
    uri: Uri,
    Path(params): Path<HashMap<String, String>>,
    body: Bytes,
) -> Result<Response> {
    state
        .authorizer
        .authorize(&token, &[Privilege::ConfigureComponents], &[])
        .await?;
    let fabric_id = params.get("id").map(String::as_str).unwrap_or_default();
    let body = (!body.is_empty()).then_some(body.as_ref());
    let resp = state
        .proxy
        .forward_to_fabric(fabric_id, method, uri.path(), body)
        .await?;
    Ok(proxy_response(resp))
}

fn proxy_response(resp: ProxyResponse) -> Response {
    let status = StatusCode::from_u16(resp.status).unwrap_or(StatusCode::OK);
    let mut response = match resp.body {
        Some(body) => (status, Json(body)).into_response(),
        None => status.into_response(),
    };
    if let Some(location) = resp.location {
        if let Ok(value) = location.parse() {
            response.headers_mut().insert(header::LOCATION, value);
        }
    }
    response
}
