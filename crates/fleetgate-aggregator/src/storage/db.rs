//! SQLite database for the aggregator.

pub use fleetgate_core::db::DatabaseError;

fleetgate_core::define_database!(AggregatorDatabase, "Aggregator database migrations complete");
