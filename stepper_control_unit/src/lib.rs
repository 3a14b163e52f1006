//! # Stepper Control Unit Library
//!
//! Per-axis motion control engine for a multi-slot stepper card. Each
//! fitted axis runs a fixed-period cycle that reads its encoder and limit
//! inputs, applies queued host commands, runs the active control mode and
//! programs its L64xx drive over a shared bus.
//!
//! ## Engine components
//!
//! 1. **SpeedChannelRegistry** ([`speed`]): per-purpose speed limits
//! 2. **SafetyMonitor** ([`safety`]): limits, collisions, emergency stop
//! 3. **PositionController** ([`control::pid`]): closed-loop positioning
//! 4. **HomingEngine** ([`homing`]): limit/index, magnetic and turret homing
//! 5. **MovementModeController** ([`mode`]): per-cycle mode dispatch
//! 6. **AxisCycleScheduler** ([`cycle`]): connection lifecycle and pacing
//!
//! ## Collaborators
//!
//! The bus, slot ports, position store and host command channel sit behind
//! traits and queues ([`hal`], [`persistence`], [`command`]). The
//! [`hal::sim`] card model stands in for hardware in the binary, tests and
//! benchmarks.

#![deny(clippy::disallowed_types)]

pub mod command;
pub mod config;
pub mod control;
pub mod cycle;
pub mod encoder;
pub mod error;
pub mod hal;
pub mod homing;
pub mod mode;
pub mod persistence;
pub mod position;
pub mod safety;
pub mod speed;
pub mod state;
pub mod telemetry;
