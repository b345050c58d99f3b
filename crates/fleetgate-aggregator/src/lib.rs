//! Fleetgate Aggregator Library
//!
//! Core functionality for the Fleetgate aggregator:
//! - SQLite storage for accounts, sessions, plugins, devices and resources
//! - Caller sessions with idle expiry and background cleanup
//! - Authenticated plugin contact with token caching and 401 retry
//! - North/south URL translation
//! - Startup rediscovery and bulk event-subscription reconciliation
//! - The Redfish-style HTTP API

pub mod auth;
pub mod device;
pub mod error;
pub mod events;
pub mod plugin;
pub mod proxy;
pub mod rediscovery;
pub mod resources;
pub mod server;
pub mod storage;
pub mod subscription;
pub mod translate;

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
pub mod test_helpers;
