//! Northbound HTTP API for the Fleetgate aggregator.

pub mod accounts;
pub mod aggregation;
pub mod extract;
pub mod fabrics;
pub mod health;
pub mod managers;
pub mod sessions;


use std::sync::Arc;

use axum::Router;
use axum::routing::{delete, get, patch, post};

use crate::auth::{AccountService, Authorizer, SessionManager};
use crate::proxy::PluginProxy;
use crate::resources::ResourceService;
use crate::subscription::SubscriptionReconciler;

pub use extract::AuthToken;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<SessionManager>,
    pub authorizer: Arc<dyn Authorizer>,
    pub accounts: Arc<AccountService>,
    pub resources: Arc<ResourceService>,
    pub proxy: Arc<PluginProxy>,
    pub subscriptions: Arc<SubscriptionReconciler>,
}

pub fn build_router(state: AppState) -> Router {
    let fabric = get(fabrics::forward)
        .post(fabrics::forward)
        .patch(fabrics::forward)
        .put(fabrics::forward)
        .delete(fabrics::forward);

    Router::new()
        .route("/health", get(health::health))
        .route("/login", post(sessions::login))
        .route("/redfish/v1/SessionService/Sessions", post(sessions::login))
        .route(
            "/redfish/v1/SessionService/Sessions/{token}",
            delete(sessions::logout),
        )
        .route("/redfish/v1/Managers", get(managers::collection))
        .route("/redfish/v1/Managers/{id}", get(managers::manager))
        .route("/redfish/v1/Managers/{id}/{*rest}", get(managers::manager_resource))
        .route("/redfish/v1/Fabrics", get(fabrics::collection))
        .route("/redfish/v1/Fabrics/{id}", fabric.clone())
        .route("/redfish/v1/Fabrics/{id}/{*rest}", fabric)
        .route(
            "/redfish/v1/AccountService/Accounts/{id}",
            patch(accounts::update),
        )
        .route(
            "/redfish/v1/AggregationService/Actions/RegisterDevices",
            post(aggregation::register_devices),
        )
        .with_state(state)
}
