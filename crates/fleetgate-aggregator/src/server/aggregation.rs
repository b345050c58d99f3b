//! `/redfish/v1/AggregationService`

use std::collections::BTreeMap;

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use tracing::{info, instrument};

use super::AppState;
use super::extract::{AuthToken, json_body};
use crate::auth::Privilege;
use crate::error::Result;
use crate::subscription::SubscriptionTarget;

/// `POST /redfish/v1/AggregationService/Actions/RegisterDevices`
///
/// Brings up event subscriptions for every listed device and answers with
/// the subscription location per device host.
#[instrument(skip_all)]
pub async fn register_devices(
    State(state): State<AppState>,
    AuthToken(token): AuthToken,
    body: Bytes,
) -> Result<Json<BTreeMap<String, String>>> {
    state
        .authorizer
        .authorize(&token, &[Privilege::ConfigureComponents], &[])
        .await?;
    let targets: Vec<SubscriptionTarget> = json_body(&body)?;
    info!(devices = targets.len(), "Registering devices");
    Ok(Json(state.subscriptions.reconcile(targets).await?))
}
