//! Axis domain types.
//!
//! Organized by concern: enumerations, persisted parameter sets, status
//! and fault words, command-mutation messages and the log-event taxonomy.

pub mod command;
pub mod log;
pub mod params;
pub mod status;
pub mod types;
