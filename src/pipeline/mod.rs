//! Batch pipeline stages, in execution order: schema resolution, trip
//! loading and cleaning, hourly demand aggregation, weather join, zone
//! clustering, and the end-to-end run.

pub mod hourly;
pub mod run;
pub mod schema;
pub mod trips;
pub mod weather;
pub mod zones;

pub use run::run;
