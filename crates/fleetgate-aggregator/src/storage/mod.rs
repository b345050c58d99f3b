//! SQLite storage for the Fleetgate aggregator.
//!
//! Provides persistence for accounts, sessions, plugins, devices, fabrics
//! and the aggregated resource inventory.

mod db;
mod models;
mod queries;
mod queries_inventory;


pub use db::{AggregatorDatabase, DatabaseError};
pub use models::*;
pub use queries_inventory::{NewDevice, NewPlugin};
