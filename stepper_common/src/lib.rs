//! Stepper Common Library
//!
//! Hardware-free types shared by every crate of the stepper control
//! workspace: axis enumerations, persisted parameter sets, status and fault
//! bitflags, the command-mutation message and the log-event taxonomy, plus
//! the TOML configuration loading utilities.
//!
//! # Module Structure
//!
//! - [`axis`] - Axis enums, parameters, status words, commands and log events
//! - [`config`] - Configuration loading traits and types
//! - [`consts`] - Numeric constants shared by control and tooling
//! - [`prelude`] - Common re-exports for convenience
//!
//! # Usage
//!
//! ```rust
//! use stepper_common::prelude::*;
//!
//! let params = AxisParameters::default();
//! assert!(params.validate().is_ok());
//! ```

pub mod axis;
pub mod config;
pub mod consts;
pub mod prelude;
